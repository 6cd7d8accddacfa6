//! OCR analyzer

use super::OcrEngine;
use crate::domain::{Roi, RoiPayload};
use crate::error::CoreResult;
use image::RgbImage;

/// Run OCR on a crop. With `expected_text` configured the recognized text
/// must contain it (whitespace-trimmed substring), and a display marker is
/// appended; without it any non-empty recognition passes.
pub fn analyze(crop: &RgbImage, roi: &Roi, engine: &dyn OcrEngine) -> CoreResult<(RoiPayload, bool)> {
	let text = engine.recognize(crop)?;

	let (ocr_text, passed) = match roi.expected_text.as_deref().map(str::trim) {
		Some(expected) if !expected.is_empty() => {
			if text.trim().contains(expected) {
				(format!("{text} [PASS:{expected}]"), true)
			} else {
				(format!("{text} [FAIL:{expected}]"), false)
			}
		}
		_ => {
			let passed = !text.trim().is_empty();
			(text, passed)
		}
	};

	Ok((RoiPayload::Ocr { ocr_text }, passed))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	struct FixedOcr(&'static str);

	impl OcrEngine for FixedOcr {
		fn recognize(&self, _image: &RgbImage) -> CoreResult<String> {
			Ok(self.0.to_string())
		}
	}

	fn ocr_roi(expected: Option<&str>) -> Roi {
		Roi::normalize(&json!({
			"idx": 1,
			"type": 3,
			"coords": [0, 0, 10, 10],
			"focus": 305,
			"exposure": 3000,
			"device_location": 1,
			"expected_text": expected
		}))
		.unwrap()
	}

	#[test]
	fn expected_text_substring_passes_with_marker() {
		let crop = RgbImage::new(4, 4);
		let roi = ocr_roi(Some("LOT42"));
		let (payload, passed) = analyze(&crop, &roi, &FixedOcr("batch LOT42 ok")).unwrap();
		assert!(passed);
		assert_eq!(
			payload,
			RoiPayload::Ocr {
				ocr_text: "batch LOT42 ok [PASS:LOT42]".to_string()
			}
		);
	}

	#[test]
	fn missing_expected_text_fails_with_marker() {
		let crop = RgbImage::new(4, 4);
		let roi = ocr_roi(Some("LOT42"));
		let (payload, passed) = analyze(&crop, &roi, &FixedOcr("batch LOT43")).unwrap();
		assert!(!passed);
		match payload {
			RoiPayload::Ocr { ocr_text } => assert!(ocr_text.ends_with("[FAIL:LOT42]")),
			other => panic!("unexpected payload {other:?}"),
		}
	}

	#[test]
	fn without_expected_text_any_recognition_passes() {
		let crop = RgbImage::new(4, 4);
		let roi = ocr_roi(None);
		let (_, passed) = analyze(&crop, &roi, &FixedOcr("anything")).unwrap();
		assert!(passed);
		let (_, passed) = analyze(&crop, &roi, &FixedOcr("   ")).unwrap();
		assert!(!passed);
	}
}
