//! Domain model for the inspection core

pub mod result;
pub mod roi;

pub use result::{DeviceSummary, InspectionReport, OverallResult, RoiPayload, RoiResult};
pub use roi::{ColorConfig, ColorRange, ColorSpace, FeatureMethod, Roi, RoiType};
