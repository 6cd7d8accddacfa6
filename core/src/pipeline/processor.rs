//! Per-ROI processor
//!
//! One decoded frame plus one ROI in, one `RoiResult` out. Analyzer
//! failures are captured into the result with `passed = false`; nothing a
//! single ROI does can abort the rest of the batch.

use crate::analyzers::{barcode, color, compare, ocr, Capabilities};
use crate::domain::{ColorConfig, ColorRange, Roi, RoiResult, RoiType};
use crate::error::CoreResult;
use crate::infra::codec;
use image::RgbImage;
use std::path::PathBuf;
use tracing::warn;

/// Outcome of processing one ROI, before export paths are attached
#[derive(Debug)]
pub struct ProcessedRoi {
	pub result: RoiResult,
	/// The exact crop the analyzer saw, for `roi_<idx>.jpg`
	pub crop: Option<RgbImage>,
	/// The exact resized golden used by Compare, for `golden_<idx>.jpg`
	pub golden: Option<RgbImage>,
	/// Golden alternative the compare analyzer wants promoted
	pub promote: Option<String>,
}

/// Process a single ROI against a decoded frame.
///
/// `golden_files` is the ordered golden set for Compare ROIs (best first);
/// `product_colors` is the product-level fallback for Color ROIs without an
/// embedded configuration.
pub fn process_roi(
	image: &RgbImage,
	roi: &Roi,
	caps: &Capabilities,
	golden_files: &[PathBuf],
	product_colors: &[ColorRange],
) -> ProcessedRoi {
	match run_analyzer(image, roi, caps, golden_files, product_colors) {
		Ok(processed) => processed,
		Err(e) => {
			warn!("ROI {} analyzer error: {e}", roi.idx);
			ProcessedRoi {
				result: RoiResult::errored(
					roi.idx,
					roi.device_location,
					&roi.type_name(),
					roi.coords,
					e.to_string(),
				),
				crop: None,
				golden: None,
				promote: None,
			}
		}
	}
}

fn run_analyzer(
	image: &RgbImage,
	roi: &Roi,
	caps: &Capabilities,
	golden_files: &[PathBuf],
	product_colors: &[ColorRange],
) -> CoreResult<ProcessedRoi> {
	let crop = codec::rotate(codec::crop(image, roi.coords)?, roi.rotation);

	let (payload, passed, golden, promote) = match roi.roi_type {
		RoiType::Barcode => {
			let (payload, passed) = barcode::analyze(&crop, caps.barcode.as_ref())?;
			(payload, passed, None, None)
		}
		RoiType::Compare => {
			let goldens = decode_goldens(golden_files, roi.idx);
			let outcome = compare::analyze(&crop, roi, &goldens, caps.features.as_ref())?;
			(
				outcome.payload,
				outcome.passed,
				outcome.golden_image,
				outcome.promote,
			)
		}
		RoiType::Ocr => {
			let (payload, passed) = ocr::analyze(&crop, roi, caps.ocr.as_ref())?;
			(payload, passed, None, None)
		}
		RoiType::Color => {
			let config = resolve_color_config(roi, product_colors)?;
			let (payload, passed) = color::analyze(&crop, &config)?;
			(payload, passed, None, None)
		}
	};

	Ok(ProcessedRoi {
		result: RoiResult {
			roi_id: roi.idx,
			device_id: roi.device_location,
			roi_type_name: roi.type_name(),
			passed,
			coordinates: roi.coords,
			roi_image_path: None,
			golden_image_path: None,
			error: None,
			payload,
		},
		crop: Some(crop),
		golden,
		promote,
	})
}

/// Decode golden files in their scan order, skipping unreadable ones
fn decode_goldens(files: &[PathBuf], roi_idx: u32) -> Vec<(String, RgbImage)> {
	files
		.iter()
		.filter_map(|path| {
			let name = path
				.file_name()
				.map(|n| n.to_string_lossy().to_string())
				.unwrap_or_default();
			match codec::decode_file(path) {
				Ok(image) => Some((name, image)),
				Err(e) => {
					warn!("Skipping unreadable golden '{name}' for ROI {roi_idx}: {e}");
					None
				}
			}
		})
		.collect()
}

/// Embedded ROI config wins; the product-level color file is the fallback
fn resolve_color_config(roi: &Roi, product_colors: &[ColorRange]) -> CoreResult<ColorConfig> {
	if let Some(config) = &roi.color_config {
		return Ok(config.clone());
	}
	if !product_colors.is_empty() {
		return Ok(ColorConfig::Legacy {
			color_ranges: product_colors.to_vec(),
		});
	}
	Err(crate::error::CoreError::validation(format!(
		"Color ROI {} has no color configuration",
		roi.idx
	)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::RoiPayload;
	use image::Rgb;
	use serde_json::json;

	fn frame() -> RgbImage {
		// Left half red, right half blue
		RgbImage::from_fn(40, 20, |x, _| {
			if x < 20 {
				Rgb([255, 0, 0])
			} else {
				Rgb([0, 0, 255])
			}
		})
	}

	fn color_roi(coords: [u32; 4]) -> Roi {
		Roi::normalize(&json!({
			"idx": 4,
			"type": 4,
			"coords": coords,
			"focus": 305,
			"exposure": 3000,
			"device_location": 1,
			"expected_color": [255, 0, 0],
			"color_tolerance": 10,
			"min_pixel_percentage": 5.0
		}))
		.unwrap()
	}

	#[test]
	fn color_roi_sees_only_its_crop() {
		let caps = Capabilities::simulated();
		let processed = process_roi(&frame(), &color_roi([0, 0, 20, 20]), &caps, &[], &[]);
		assert!(processed.result.passed);
		assert_eq!(processed.crop.as_ref().unwrap().dimensions(), (20, 20));

		let processed = process_roi(&frame(), &color_roi([20, 0, 40, 20]), &caps, &[], &[]);
		assert!(!processed.result.passed);
	}

	#[test]
	fn analyzer_error_becomes_failed_result() {
		let caps = Capabilities::simulated();
		// Color ROI with neither embedded nor product config: normalize would
		// reject it, so build the gap by hand
		let mut roi = color_roi([0, 0, 20, 20]);
		roi.color_config = None;
		let processed = process_roi(&frame(), &roi, &caps, &[], &[]);
		assert!(!processed.result.passed);
		assert!(processed
			.result
			.error
			.as_deref()
			.unwrap()
			.contains("color configuration"));
		assert_eq!(processed.result.payload, RoiPayload::Empty {});
	}

	#[test]
	fn product_colors_are_the_fallback() {
		let caps = Capabilities::simulated();
		let mut roi = color_roi([0, 0, 20, 20]);
		roi.color_config = None;
		let product = vec![crate::domain::ColorRange {
			name: "red".to_string(),
			lower: [200, 0, 0],
			upper: [255, 30, 30],
			color_space: crate::domain::ColorSpace::RGB,
			threshold: 50.0,
		}];
		let processed = process_roi(&frame(), &roi, &caps, &[], &product);
		assert!(processed.result.passed);
	}

	#[test]
	fn out_of_frame_roi_errors_cleanly() {
		let caps = Capabilities::simulated();
		let roi = color_roi([100, 100, 120, 120]);
		let processed = process_roi(&frame(), &roi, &caps, &[], &[]);
		assert!(!processed.result.passed);
		assert!(processed.result.error.is_some());
	}

	#[test]
	fn barcode_roi_uses_the_decoder() {
		let caps = Capabilities::simulated();
		let roi = Roi::normalize(&json!({
			"idx": 1,
			"type": 1,
			"coords": [0, 0, 10, 10],
			"focus": 305,
			"exposure": 1200,
			"device_location": 2,
			"is_device_barcode": true
		}))
		.unwrap();
		let processed = process_roi(&frame(), &roi, &caps, &[], &[]);
		assert!(processed.result.passed);
		assert_eq!(processed.result.device_id, 2);
		assert!(matches!(
			processed.result.payload,
			RoiPayload::Barcode { .. }
		));
	}
}
