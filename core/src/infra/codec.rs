//! Image codec boundary
//!
//! Single place where bytes become pixels and back. Everything downstream
//! works on `RgbImage` buffers.

use crate::error::{CoreError, CoreResult};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// JPEG quality used for every crop and golden export
const JPEG_QUALITY: u8 = 85;

/// Decode an image from raw encoded bytes (any format the `image` crate knows)
pub fn decode_bytes(bytes: &[u8]) -> CoreResult<RgbImage> {
	Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Decode an image from a file on the shared folder
pub fn decode_file(path: &Path) -> CoreResult<RgbImage> {
	if !path.exists() {
		return Err(CoreError::not_found(format!("image file {}", path.display())));
	}
	Ok(image::open(path)?.to_rgb8())
}

/// Decode a legacy base64 payload, tolerating `data:image/...;base64,` prefixes
pub fn decode_base64(data: &str) -> CoreResult<RgbImage> {
	let raw = match data.split_once(',') {
		Some((prefix, rest)) if prefix.starts_with("data:image/") => rest,
		_ => data,
	};
	let bytes = base64::engine::general_purpose::STANDARD
		.decode(raw.trim())
		.map_err(|e| CoreError::validation(format!("invalid base64 image data: {e}")))?;
	decode_bytes(&bytes)
}

/// Encode to JPEG at the standard export quality
pub fn encode_jpeg(image: &RgbImage) -> CoreResult<Vec<u8>> {
	let mut out = Vec::new();
	JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(image)?;
	Ok(out)
}

/// Extract `image[y1:y2, x1:x2]`, clamping the window to the frame
pub fn crop(image: &RgbImage, coords: [u32; 4]) -> CoreResult<RgbImage> {
	let [x1, y1, x2, y2] = coords;
	let x1 = x1.min(image.width());
	let y1 = y1.min(image.height());
	let x2 = x2.min(image.width());
	let y2 = y2.min(image.height());
	if x2 <= x1 || y2 <= y1 {
		return Err(CoreError::validation(format!(
			"ROI window [{x1}, {y1}, {x2}, {y2}] lies outside the {}x{} frame",
			image.width(),
			image.height()
		)));
	}
	Ok(imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// Apply a quarter-turn rotation. `rotation` has already been validated to
/// one of 0, 90, 180, 270.
pub fn rotate(image: RgbImage, rotation: u16) -> RgbImage {
	match rotation {
		90 => imageops::rotate90(&image),
		180 => imageops::rotate180(&image),
		270 => imageops::rotate270(&image),
		_ => image,
	}
}

/// Resize to exact target dimensions (used to bring goldens onto the live
/// crop's grid before feature extraction)
pub fn resize_to(image: &RgbImage, width: u32, height: u32) -> RgbImage {
	if image.width() == width && image.height() == height {
		return image.clone();
	}
	imageops::resize(image, width, height, FilterType::Triangle)
}
