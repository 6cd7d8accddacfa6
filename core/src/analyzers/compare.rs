//! Compare analyzer: deep-feature comparison against the golden library
//!
//! The analyzer itself never touches the filesystem. The caller hands it
//! the decoded goldens in scan order (best first) and executes the returned
//! promotion command through the golden library afterwards; that command
//! is the self-tuning loop by which successful alternatives rise to best.

use super::features::{cosine_similarity, normalize_illumination};
use super::FeatureExtractor;
use crate::domain::{FeatureMethod, Roi, RoiPayload};
use crate::error::CoreResult;
use crate::infra::codec;
use crate::store::golden::BEST_GOLDEN;
use image::RgbImage;
use tracing::debug;

/// Similarity comparisons tolerate float noise at the threshold boundary
const MATCH_EPSILON: f64 = 1e-8;

/// What the Compare analyzer decided
#[derive(Debug)]
pub struct CompareOutcome {
	pub payload: RoiPayload,
	pub passed: bool,
	/// The resized golden actually used for the decision, for export
	pub golden_image: Option<RgbImage>,
	/// Alternative (by file name) the caller should promote to best
	pub promote: Option<String>,
}

/// Compare a live crop against the ordered golden set.
///
/// Scans best-first and stops at the first golden whose similarity clears
/// the ROI's threshold. A matching non-best alternative is promoted; when
/// nothing clears the threshold, the best-scoring alternative is still
/// promoted if it outscored the current best, so the next run tries it
/// first.
pub fn analyze(
	crop: &RgbImage,
	roi: &Roi,
	goldens: &[(String, RgbImage)],
	extractor: &dyn FeatureExtractor,
) -> CoreResult<CompareOutcome> {
	let threshold = roi.ai_threshold.unwrap_or(0.9);
	let method = roi.feature_method.unwrap_or(FeatureMethod::Mobilenet);

	let crop_normalized = normalize_illumination(crop);
	let crop_features = extractor.extract(&crop_normalized, method)?;

	let mut best_similarity = 0.0f64;
	let mut best_golden: Option<RgbImage> = None;
	let mut best_name: Option<&String> = None;

	for (name, golden) in goldens {
		let resized = codec::resize_to(golden, crop.width(), crop.height());
		let golden_features = extractor.extract(&normalize_illumination(&resized), method)?;
		let similarity = cosine_similarity(&golden_features, &crop_features);
		debug!(
			"ROI {} golden '{}' similarity {:.4} (threshold {})",
			roi.idx, name, similarity, threshold
		);

		if similarity > best_similarity || best_golden.is_none() {
			best_similarity = similarity;
			best_golden = Some(resized.clone());
			best_name = Some(name);
		}

		if similarity + MATCH_EPSILON >= threshold {
			return Ok(CompareOutcome {
				payload: RoiPayload::Compare {
					match_result: "Match".to_string(),
					ai_similarity: similarity,
					threshold,
				},
				passed: true,
				golden_image: Some(resized),
				// Matching the best golden itself needs no promotion
				promote: (name != BEST_GOLDEN).then(|| name.clone()),
			});
		}
	}

	// No golden cleared the threshold; report the closest one and nudge the
	// library when an alternative outscored the current best
	let promote = best_name
		.filter(|name| name.as_str() != BEST_GOLDEN)
		.cloned();
	Ok(CompareOutcome {
		payload: RoiPayload::Compare {
			match_result: "Different".to_string(),
			ai_similarity: best_similarity,
			threshold,
		},
		passed: false,
		golden_image: best_golden,
		promote,
	})
}
