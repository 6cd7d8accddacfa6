//! Feature math shared by the Compare analyzer
//!
//! Illumination normalization, the built-in histogram feature extractor and
//! cosine similarity. External deep-feature engines plug in through the
//! [`FeatureExtractor`](super::FeatureExtractor) trait; the histogram
//! extractor keeps Compare ROIs functional on hosts without one.

use super::FeatureExtractor;
use crate::domain::FeatureMethod;
use crate::error::CoreResult;
use image::{Rgb, RgbImage};

/// Bins per channel for the histogram features (3 * 32 = 96 dimensions)
const HISTOGRAM_BINS: usize = 32;

/// Target mean luminance after normalization
const TARGET_LUMA: f64 = 128.0;

/// Scale an image so its mean luminance sits at a fixed target, flattening
/// exposure differences between a live crop and its golden references
pub fn normalize_illumination(image: &RgbImage) -> RgbImage {
	let pixels = (image.width() * image.height()) as f64;
	if pixels == 0.0 {
		return image.clone();
	}
	let mean_luma: f64 = image
		.pixels()
		.map(|Rgb([r, g, b])| 0.299 * f64::from(*r) + 0.587 * f64::from(*g) + 0.114 * f64::from(*b))
		.sum::<f64>()
		/ pixels;
	if mean_luma < 1.0 {
		// Effectively black; scaling would just amplify noise
		return image.clone();
	}
	let scale = TARGET_LUMA / mean_luma;
	let mut out = image.clone();
	for Rgb(channels) in out.pixels_mut() {
		for c in channels.iter_mut() {
			*c = (f64::from(*c) * scale).round().clamp(0.0, 255.0) as u8;
		}
	}
	out
}

/// Cosine similarity between two feature vectors, 0 when either is empty
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
	if a.is_empty() || b.is_empty() || a.len() != b.len() {
		return 0.0;
	}
	let mut dot = 0.0f64;
	let mut norm_a = 0.0f64;
	let mut norm_b = 0.0f64;
	for (x, y) in a.iter().zip(b) {
		dot += f64::from(*x) * f64::from(*y);
		norm_a += f64::from(*x) * f64::from(*x);
		norm_b += f64::from(*y) * f64::from(*y);
	}
	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}
	dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Built-in extractor: normalized per-channel intensity histograms
pub struct HistogramFeatures;

impl FeatureExtractor for HistogramFeatures {
	fn name(&self) -> &'static str {
		"histogram"
	}

	fn extract(&self, image: &RgbImage, _method: FeatureMethod) -> CoreResult<Vec<f32>> {
		let mut bins = [0u32; HISTOGRAM_BINS * 3];
		for Rgb([r, g, b]) in image.pixels() {
			bins[*r as usize * HISTOGRAM_BINS / 256] += 1;
			bins[HISTOGRAM_BINS + *g as usize * HISTOGRAM_BINS / 256] += 1;
			bins[2 * HISTOGRAM_BINS + *b as usize * HISTOGRAM_BINS / 256] += 1;
		}
		let total = (image.width() * image.height()).max(1) as f32;
		Ok(bins.iter().map(|&count| count as f32 / total).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn solid(color: [u8; 3], w: u32, h: u32) -> RgbImage {
		RgbImage::from_pixel(w, h, Rgb(color))
	}

	#[test]
	fn cosine_similarity_of_identical_vectors_is_one() {
		let v = vec![0.2, 0.5, 0.3];
		assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
	}

	#[test]
	fn cosine_similarity_of_orthogonal_vectors_is_zero() {
		assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
		assert_eq!(cosine_similarity(&[], &[]), 0.0);
	}

	#[test]
	fn identical_images_produce_identical_features() {
		let img = solid([10, 200, 60], 16, 16);
		let a = HistogramFeatures.extract(&img, FeatureMethod::Opencv).unwrap();
		let b = HistogramFeatures.extract(&img, FeatureMethod::Opencv).unwrap();
		assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
	}

	#[test]
	fn different_images_score_below_identical_ones() {
		let red = solid([255, 0, 0], 16, 16);
		let blue = solid([0, 0, 255], 16, 16);
		let feat_red = HistogramFeatures.extract(&red, FeatureMethod::Opencv).unwrap();
		let feat_blue = HistogramFeatures.extract(&blue, FeatureMethod::Opencv).unwrap();
		assert!(cosine_similarity(&feat_red, &feat_blue) < 0.9);
	}

	#[test]
	fn illumination_normalization_equalizes_exposure() {
		let dark = solid([40, 40, 40], 8, 8);
		let bright = solid([200, 200, 200], 8, 8);
		let norm_dark = normalize_illumination(&dark);
		let norm_bright = normalize_illumination(&bright);
		// Both land on the same target luminance
		assert_eq!(norm_dark.get_pixel(0, 0), norm_bright.get_pixel(0, 0));
	}

	#[test]
	fn black_images_are_left_alone() {
		let black = solid([0, 0, 0], 4, 4);
		assert_eq!(normalize_illumination(&black), black);
	}
}
