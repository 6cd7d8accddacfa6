//! Persistent configuration stores: ROI configs and the golden sample library

pub mod golden;
pub mod products;

pub use golden::{GoldenLibrary, GoldenSampleInfo};
pub use products::{ProductInfo, ProductStore, SaveOutcome};
