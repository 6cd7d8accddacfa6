//! Color analyzer
//!
//! Two evaluation modes, resolved in priority order: the config embedded in
//! the ROI wins, then the product-level `colors_config_<name>.json`.
//! Legacy ranges follow OpenCV conventions (HSV hue 0..180, S/V 0..255) so
//! configurations written against the original pipeline keep working.

use crate::domain::{ColorConfig, ColorRange, ColorSpace, RoiPayload};
use crate::error::{CoreError, CoreResult};
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;

/// Evaluate a color crop against its resolved configuration
pub fn analyze(crop: &RgbImage, config: &ColorConfig) -> CoreResult<(RoiPayload, bool)> {
	let total = (crop.width() * crop.height()) as f64;
	if total == 0.0 {
		return Err(CoreError::validation("color ROI crop is empty"));
	}
	let dominant = dominant_color(crop);

	match config {
		ColorConfig::Simple {
			expected_color,
			color_tolerance,
			min_pixel_percentage,
		} => {
			let matched = crop
				.pixels()
				.filter(|Rgb(px)| {
					px.iter()
						.zip(expected_color)
						.all(|(c, e)| (i64::from(*c) - e).abs() <= *color_tolerance)
				})
				.count();
			let match_percentage = matched as f64 / total * 100.0;
			let passed = match_percentage >= *min_pixel_percentage;
			let [r, g, b] = expected_color;
			Ok((
				RoiPayload::Color {
					detected_color: if passed {
						format!("RGB({r},{g},{b})")
					} else {
						"None".to_string()
					},
					match_percentage,
					dominant_color: dominant,
					threshold: *min_pixel_percentage,
				},
				passed,
			))
		}
		ColorConfig::Legacy { color_ranges } => analyze_ranges(crop, color_ranges, total, dominant),
	}
}

/// Legacy mode: aggregate per-range pixel counts by range name, pick the
/// highest aggregate as the detected color and judge it against that
/// name's threshold
fn analyze_ranges(
	crop: &RgbImage,
	ranges: &[ColorRange],
	total: f64,
	dominant: [u8; 3],
) -> CoreResult<(RoiPayload, bool)> {
	if ranges.is_empty() {
		return Err(CoreError::validation("color configuration has no ranges"));
	}

	let mut aggregates: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
	for range in ranges {
		let matched = crop
			.pixels()
			.filter(|Rgb(px)| {
				let value = match range.color_space {
					ColorSpace::RGB => [i64::from(px[0]), i64::from(px[1]), i64::from(px[2])],
					ColorSpace::HSV => rgb_to_hsv(*px),
				};
				value
					.iter()
					.zip(range.lower.iter().zip(&range.upper))
					.all(|(v, (lo, hi))| v >= lo && v <= hi)
			})
			.count();
		let percentage = matched as f64 / total * 100.0;
		let entry = aggregates.entry(range.name.as_str()).or_insert((0.0, 0.0));
		entry.0 += percentage;
		entry.1 = entry.1.max(range.threshold);
	}

	let (name, (match_percentage, threshold)) = aggregates
		.into_iter()
		.max_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
		.expect("ranges checked non-empty");
	let passed = match_percentage >= threshold;

	Ok((
		RoiPayload::Color {
			detected_color: name.to_string(),
			match_percentage,
			dominant_color: dominant,
			threshold,
		},
		passed,
	))
}

/// Mean color over the crop
fn dominant_color(crop: &RgbImage) -> [u8; 3] {
	let mut sums = [0u64; 3];
	for Rgb(px) in crop.pixels() {
		for (sum, c) in sums.iter_mut().zip(px) {
			*sum += u64::from(*c);
		}
	}
	let total = u64::from(crop.width()) * u64::from(crop.height());
	if total == 0 {
		return [0, 0, 0];
	}
	sums.map(|s| (s / total) as u8)
}

/// RGB → HSV in OpenCV's 8-bit ranges: H 0..180, S 0..255, V 0..255
fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [i64; 3] {
	let r = f64::from(r) / 255.0;
	let g = f64::from(g) / 255.0;
	let b = f64::from(b) / 255.0;
	let max = r.max(g).max(b);
	let min = r.min(g).min(b);
	let delta = max - min;

	let hue = if delta == 0.0 {
		0.0
	} else if max == r {
		60.0 * (((g - b) / delta).rem_euclid(6.0))
	} else if max == g {
		60.0 * ((b - r) / delta + 2.0)
	} else {
		60.0 * ((r - g) / delta + 4.0)
	};
	let saturation = if max == 0.0 { 0.0 } else { delta / max };

	[
		(hue / 2.0).round() as i64,
		(saturation * 255.0).round() as i64,
		(max * 255.0).round() as i64,
	]
}
