//! Analyzer capabilities and the four ROI analyzers
//!
//! The ML kernels (feature extraction, OCR, barcode decoding) are consumed
//! as opaque capabilities behind small traits so deployments can wire real
//! engines in and tests can stub them. When no engine is registered the
//! core falls back to deterministic simulation engines, mirroring how the
//! system behaves on hosts without the inference stack.

pub mod barcode;
pub mod color;
pub mod compare;
pub mod features;
pub mod ocr;

use crate::domain::FeatureMethod;
use crate::error::{CoreError, CoreResult};
use features::HistogramFeatures;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Deep-feature extraction over an image crop
pub trait FeatureExtractor: Send + Sync {
	fn name(&self) -> &'static str;
	fn extract(&self, image: &RgbImage, method: FeatureMethod) -> CoreResult<Vec<f32>>;
}

/// Opaque barcode decoder: zero or more decoded strings per crop
pub trait BarcodeDecoder: Send + Sync {
	fn decode(&self, image: &RgbImage) -> CoreResult<Vec<String>>;
}

/// Opaque OCR engine
pub trait OcrEngine: Send + Sync {
	fn recognize(&self, image: &RgbImage) -> CoreResult<String>;
}

/// The analyzer capability set handed to the pipeline
#[derive(Clone)]
pub struct Capabilities {
	pub features: Arc<dyn FeatureExtractor>,
	pub barcode: Arc<dyn BarcodeDecoder>,
	pub ocr: Arc<dyn OcrEngine>,
	/// True when any engine is a simulation stand-in
	pub simulation: bool,
}

impl Capabilities {
	/// Build from whatever real engines are available, simulating the rest
	pub fn with_engines(
		features: Option<Arc<dyn FeatureExtractor>>,
		barcode: Option<Arc<dyn BarcodeDecoder>>,
		ocr: Option<Arc<dyn OcrEngine>>,
	) -> Self {
		let simulation = barcode.is_none() || ocr.is_none();
		Self {
			features: features.unwrap_or_else(|| Arc::new(HistogramFeatures)),
			barcode: barcode.unwrap_or_else(|| Arc::new(SimulatedBarcodeDecoder::default())),
			ocr: ocr.unwrap_or_else(|| Arc::new(SimulatedOcrEngine)),
			simulation,
		}
	}

	/// Fully simulated capability set (no inference stack present)
	pub fn simulated() -> Self {
		Self::with_engines(None, None, None)
	}

	/// Exercise each engine once so model loading happens before the first
	/// real inspection
	pub fn warm_up(&self) -> CoreResult<String> {
		let probe = RgbImage::new(8, 8);
		self.features.extract(&probe, FeatureMethod::Mobilenet)?;
		self.barcode.decode(&probe)?;
		self.ocr.recognize(&probe)?;
		let message = if self.simulation {
			"System initialized (simulation mode)".to_string()
		} else {
			format!(
				"System initialized successfully (feature extractor: {})",
				self.features.name()
			)
		};
		info!("{message}");
		Ok(message)
	}
}

impl std::fmt::Debug for Capabilities {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Capabilities")
			.field("features", &self.features.name())
			.field("simulation", &self.simulation)
			.finish()
	}
}

/// Simulation decoder: deterministic TEST barcodes, one per call
#[derive(Default)]
pub struct SimulatedBarcodeDecoder {
	counter: AtomicU64,
}

impl BarcodeDecoder for SimulatedBarcodeDecoder {
	fn decode(&self, _image: &RgbImage) -> CoreResult<Vec<String>> {
		let n = self.counter.fetch_add(1, Ordering::Relaxed);
		Ok(vec![format!("TEST{}", 123456 + n)])
	}
}

/// Simulation OCR engine
pub struct SimulatedOcrEngine;

impl OcrEngine for SimulatedOcrEngine {
	fn recognize(&self, _image: &RgbImage) -> CoreResult<String> {
		Ok("SIMULATED".to_string())
	}
}

/// Decoder stand-in that always fails, for exercising the `Unavailable` path
pub struct UnavailableEngine(pub &'static str);

impl BarcodeDecoder for UnavailableEngine {
	fn decode(&self, _image: &RgbImage) -> CoreResult<Vec<String>> {
		Err(CoreError::Unavailable(self.0.to_string()))
	}
}

impl OcrEngine for UnavailableEngine {
	fn recognize(&self, _image: &RgbImage) -> CoreResult<String> {
		Err(CoreError::Unavailable(self.0.to_string()))
	}
}
