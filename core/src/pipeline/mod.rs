//! Inspection pipeline: per-ROI processing, capture-group orchestration and
//! result aggregation

pub mod aggregator;
pub mod orchestrator;
pub mod processor;

pub use aggregator::{aggregate, BarcodeRequest};
pub use orchestrator::{CaptureGroupSpec, Orchestrator};
pub use processor::{process_roi, ProcessedRoi};
