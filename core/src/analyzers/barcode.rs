//! Barcode analyzer

use super::BarcodeDecoder;
use crate::domain::RoiPayload;
use crate::error::CoreResult;
use image::RgbImage;

/// Decode a barcode crop. Passes when at least one non-empty value came back.
pub fn analyze(crop: &RgbImage, decoder: &dyn BarcodeDecoder) -> CoreResult<(RoiPayload, bool)> {
	let values: Vec<String> = decoder
		.decode(crop)?
		.into_iter()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
		.collect();
	let passed = !values.is_empty();
	Ok((
		RoiPayload::Barcode {
			barcode_values: values,
		},
		passed,
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::analyzers::SimulatedBarcodeDecoder;

	struct FixedDecoder(Vec<String>);

	impl BarcodeDecoder for FixedDecoder {
		fn decode(&self, _image: &RgbImage) -> CoreResult<Vec<String>> {
			Ok(self.0.clone())
		}
	}

	#[test]
	fn non_empty_decode_passes_and_keeps_values() {
		let crop = RgbImage::new(4, 4);
		let decoder = FixedDecoder(vec!["  ABC ".to_string(), "".to_string()]);
		let (payload, passed) = analyze(&crop, &decoder).unwrap();
		assert!(passed);
		assert_eq!(
			payload,
			RoiPayload::Barcode {
				barcode_values: vec!["ABC".to_string()]
			}
		);
	}

	#[test]
	fn empty_decode_fails() {
		let crop = RgbImage::new(4, 4);
		let (payload, passed) = analyze(&crop, &FixedDecoder(vec![])).unwrap();
		assert!(!passed);
		assert_eq!(
			payload,
			RoiPayload::Barcode {
				barcode_values: vec![]
			}
		);
	}

	#[test]
	fn simulated_decoder_always_passes() {
		let crop = RgbImage::new(4, 4);
		let (_, passed) = analyze(&crop, &SimulatedBarcodeDecoder::default()).unwrap();
		assert!(passed);
	}
}
