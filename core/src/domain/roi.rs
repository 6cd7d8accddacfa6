//! ROI configuration model
//!
//! The canonical persisted form is a 12-field JSON object. Configurations
//! written by older clients arrive either as partial objects or as bare
//! arrays of 3 to 11 positional fields; [`Roi::normalize`] folds every
//! historical shape into the canonical one so nothing downstream has to
//! care about config vintage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

/// Inspection task kind, persisted as its numeric tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(into = "u8", try_from = "u8")]
#[strum(serialize_all = "lowercase")]
pub enum RoiType {
	Barcode,
	Compare,
	Ocr,
	Color,
}

impl From<RoiType> for u8 {
	fn from(t: RoiType) -> u8 {
		match t {
			RoiType::Barcode => 1,
			RoiType::Compare => 2,
			RoiType::Ocr => 3,
			RoiType::Color => 4,
		}
	}
}

impl TryFrom<u8> for RoiType {
	type Error = String;

	fn try_from(v: u8) -> Result<Self, Self::Error> {
		match v {
			1 => Ok(Self::Barcode),
			2 => Ok(Self::Compare),
			3 => Ok(Self::Ocr),
			4 => Ok(Self::Color),
			other => Err(format!(
				"invalid ROI type: {other}. Must be 1 (Barcode), 2 (Compare), 3 (OCR) or 4 (Color)"
			)),
		}
	}
}

/// Feature extraction method for Compare ROIs (and the tag values recorded
/// for Barcode/OCR ROIs by older clients)
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FeatureMethod {
	#[default]
	Mobilenet,
	Opencv,
	Sift,
	Orb,
	Barcode,
	Ocr,
}

/// Color space for legacy color ranges, OpenCV conventions
/// (HSV hue in 0..180, saturation/value in 0..255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
	RGB,
	HSV,
}

/// One named band of a legacy color configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
	pub name: String,
	pub lower: [i64; 3],
	pub upper: [i64; 3],
	pub color_space: ColorSpace,
	#[serde(default = "default_range_threshold")]
	pub threshold: f64,
}

fn default_range_threshold() -> f64 {
	50.0
}

/// Color-check configuration for a Color ROI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorConfig {
	/// Single expected color with a per-channel tolerance band
	Simple {
		expected_color: [i64; 3],
		#[serde(default = "default_color_tolerance")]
		color_tolerance: i64,
		#[serde(default = "default_min_pixel_percentage")]
		min_pixel_percentage: f64,
	},
	/// Multiple named bounds, aggregated by name
	Legacy { color_ranges: Vec<ColorRange> },
}

fn default_color_tolerance() -> i64 {
	10
}

fn default_min_pixel_percentage() -> f64 {
	5.0
}

/// Canonical 12-field ROI configuration
///
/// Fields irrelevant to the ROI's type are always `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
	pub idx: u32,
	#[serde(rename = "type")]
	pub roi_type: RoiType,
	/// (x1, y1, x2, y2) with x1 < x2, y1 < y2
	pub coords: [u32; 4],
	pub focus: u32,
	pub exposure: u32,
	pub ai_threshold: Option<f64>,
	pub feature_method: Option<FeatureMethod>,
	pub rotation: u16,
	pub device_location: u8,
	pub expected_text: Option<String>,
	pub is_device_barcode: Option<bool>,
	pub color_config: Option<ColorConfig>,
}

impl Roi {
	/// Normalize one persisted or submitted ROI into canonical form,
	/// validating every field on the way. The error string is suitable for
	/// a per-ROI validation report.
	pub fn normalize(value: &Value) -> Result<Self, String> {
		let mut roi = match value {
			Value::Array(fields) => Self::from_legacy_array(fields)?,
			Value::Object(_) => Self::from_object(value)?,
			_ => return Err("ROI must be an object or a legacy array".to_string()),
		};
		roi.apply_type_defaults();
		roi.validate()?;
		Ok(roi)
	}

	/// Decode the legacy positional array form:
	/// `(idx, type, coords, focus, exposure, ai_threshold, feature_method,
	/// rotation, device_location, expected_text, is_device_barcode)`,
	/// truncated at any point from 3 fields on.
	fn from_legacy_array(fields: &[Value]) -> Result<Self, String> {
		if fields.len() < 3 || fields.len() > 11 {
			return Err(format!(
				"legacy ROI array must have 3..=11 fields, got {}",
				fields.len()
			));
		}

		let idx = int_field(&fields[0], "idx")?;
		let roi_type = RoiType::try_from(small_int_field(&fields[1], "type")?)?;
		let coords = coords_field(&fields[2])?;

		// 4-field forms carry focus; 5-field forms historically carried
		// (focus, ai_threshold) with exposure implied
		let (focus, exposure, ai_threshold_pos) = match fields.len() {
			3 => (305, 3000, None),
			4 => (int_field(&fields[3], "focus")?, 3000, None),
			5 => (int_field(&fields[3], "focus")?, 3000, Some(4)),
			_ => (
				int_field(&fields[3], "focus")?,
				int_field(&fields[4], "exposure")?,
				Some(5),
			),
		};

		let ai_threshold = match ai_threshold_pos.and_then(|i| fields.get(i)) {
			Some(Value::Null) | None => None,
			Some(v) => Some(float_field(v, "ai_threshold")?),
		};

		let feature_method = match fields.get(6) {
			Some(Value::String(s)) => Some(
				s.parse::<FeatureMethod>()
					.map_err(|_| format!("unknown feature_method: {s}"))?,
			),
			Some(Value::Null) | None => None,
			Some(other) => return Err(format!("invalid feature_method: {other}")),
		};

		let rotation = match fields.get(7) {
			Some(v) => int_field(v, "rotation")? as u16,
			None => 0,
		};

		let device_location = match fields.get(8) {
			Some(v) => small_int_field(v, "device_location")?,
			None => 1,
		};

		let expected_text = match fields.get(9) {
			Some(Value::String(s)) => Some(s.clone()),
			_ => None,
		};

		// Pre-11-field configs treated every Barcode ROI as the device barcode
		let is_device_barcode = match fields.get(10) {
			Some(Value::Bool(b)) => Some(*b),
			Some(Value::Null) => Some(true),
			Some(other) => return Err(format!("invalid is_device_barcode: {other}")),
			None if roi_type == RoiType::Barcode => Some(true),
			None => None,
		};

		Ok(Self {
			idx: idx as u32,
			roi_type,
			coords,
			focus: focus as u32,
			exposure: exposure as u32,
			ai_threshold: ai_threshold.or(if roi_type == RoiType::Compare {
				Some(0.9)
			} else {
				None
			}),
			feature_method,
			rotation,
			device_location,
			expected_text,
			is_device_barcode,
			color_config: None,
		})
	}

	/// Decode the object form, accepting both the canonical `color_config`
	/// key and the flattened v3.2 save format (`expected_color` & friends at
	/// the top level)
	fn from_object(value: &Value) -> Result<Self, String> {
		for field in ["idx", "type", "coords", "focus", "exposure", "device_location"] {
			if value.get(field).map_or(true, Value::is_null) {
				return Err(format!("Missing required field: {field}"));
			}
		}

		let roi_type = RoiType::try_from(small_int_field(&value["type"], "type")?)?;

		let color_config = if let Some(cc) = value.get("color_config").filter(|v| !v.is_null()) {
			Some(
				serde_json::from_value::<ColorConfig>(cc.clone())
					.map_err(|e| format!("invalid color_config: {e}"))?,
			)
		} else if value.get("expected_color").is_some() {
			Some(
				serde_json::from_value::<ColorConfig>(value.clone())
					.map_err(|e| format!("invalid color fields: {e}"))?,
			)
		} else if value.get("color_ranges").is_some() {
			Some(
				serde_json::from_value::<ColorConfig>(value.clone())
					.map_err(|e| format!("invalid color_ranges: {e}"))?,
			)
		} else {
			None
		};

		let ai_threshold = match value.get("ai_threshold") {
			Some(Value::Null) | None => None,
			Some(v) => Some(float_field(v, "ai_threshold")?),
		};

		let feature_method = match value.get("feature_method") {
			Some(Value::String(s)) => Some(
				s.parse::<FeatureMethod>()
					.map_err(|_| format!("unknown feature_method: {s}"))?,
			),
			_ => None,
		};

		let expected_text = match value.get("expected_text") {
			Some(Value::String(s)) => Some(s.clone()),
			_ => None,
		};

		let is_device_barcode = match value.get("is_device_barcode") {
			Some(Value::Bool(b)) => Some(*b),
			_ => None,
		};

		let rotation = match value.get("rotation") {
			Some(Value::Null) | None => 0,
			Some(v) => int_field(v, "rotation")? as u16,
		};

		Ok(Self {
			idx: int_field(&value["idx"], "idx")? as u32,
			roi_type,
			coords: coords_field(&value["coords"])?,
			focus: int_field(&value["focus"], "focus")? as u32,
			exposure: int_field(&value["exposure"], "exposure")? as u32,
			ai_threshold,
			feature_method,
			rotation,
			device_location: small_int_field(&value["device_location"], "device_location")?,
			expected_text,
			is_device_barcode,
			color_config,
		})
	}

	/// Fill type-appropriate defaults and null out fields that do not apply
	/// to this ROI's type
	fn apply_type_defaults(&mut self) {
		match self.roi_type {
			RoiType::Barcode => {
				self.ai_threshold = None;
				self.feature_method = Some(FeatureMethod::Barcode);
				self.expected_text = None;
				self.color_config = None;
			}
			RoiType::Compare => {
				self.ai_threshold = Some(self.ai_threshold.unwrap_or(0.85));
				self.feature_method = Some(self.feature_method.unwrap_or(FeatureMethod::Mobilenet));
				self.expected_text = None;
				self.is_device_barcode = None;
				self.color_config = None;
			}
			RoiType::Ocr => {
				self.ai_threshold = None;
				self.feature_method = Some(FeatureMethod::Ocr);
				self.is_device_barcode = None;
				self.color_config = None;
			}
			RoiType::Color => {
				self.ai_threshold = None;
				self.feature_method = None;
				self.expected_text = None;
				self.is_device_barcode = None;
			}
		}
	}

	/// Field-bound and type/field-coupling checks
	fn validate(&self) -> Result<(), String> {
		if self.idx == 0 {
			return Err("idx must be a positive integer".to_string());
		}

		let [x1, y1, x2, y2] = self.coords;
		if x1 >= x2 || y1 >= y2 {
			return Err(format!(
				"coords must satisfy x1 < x2 and y1 < y2, got [{x1}, {y1}, {x2}, {y2}]"
			));
		}

		if self.focus == 0 {
			return Err("focus must be a positive integer".to_string());
		}
		if self.exposure == 0 {
			return Err("exposure must be a positive integer".to_string());
		}

		if !(1..=4).contains(&self.device_location) {
			return Err(format!(
				"device_location must be 1..=4, got {}",
				self.device_location
			));
		}

		if !matches!(self.rotation, 0 | 90 | 180 | 270) {
			return Err(format!(
				"rotation must be one of 0, 90, 180, 270, got {}",
				self.rotation
			));
		}

		if self.roi_type == RoiType::Compare {
			let threshold = self
				.ai_threshold
				.ok_or("Compare ROI must have an ai_threshold")?;
			if !(0.0..=1.0).contains(&threshold) {
				return Err(format!("ai_threshold must be within 0..=1, got {threshold}"));
			}
		}

		if self.roi_type == RoiType::Color {
			let config = self
				.color_config
				.as_ref()
				.ok_or("Color ROI (type 4) must have a color configuration")?;
			validate_color_config(config)?;
		}

		Ok(())
	}

	pub fn width(&self) -> u32 {
		self.coords[2] - self.coords[0]
	}

	pub fn height(&self) -> u32 {
		self.coords[3] - self.coords[1]
	}

	/// Display name used in result payloads ("barcode", "compare", ...)
	pub fn type_name(&self) -> String {
		self.roi_type.to_string()
	}
}

pub(crate) fn validate_color_config(config: &ColorConfig) -> Result<(), String> {
	match config {
		ColorConfig::Simple {
			expected_color,
			color_tolerance,
			min_pixel_percentage,
		} => {
			if expected_color.iter().any(|c| !(0..=255).contains(c)) {
				return Err("expected_color values must be between 0 and 255".to_string());
			}
			if *color_tolerance < 0 {
				return Err("color_tolerance must be non-negative".to_string());
			}
			if !(0.0..=100.0).contains(min_pixel_percentage) {
				return Err("min_pixel_percentage must be between 0 and 100".to_string());
			}
		}
		ColorConfig::Legacy { color_ranges } => {
			if color_ranges.is_empty() {
				return Err("color_ranges must not be empty".to_string());
			}
			for (i, range) in color_ranges.iter().enumerate() {
				if range.name.trim().is_empty() {
					return Err(format!("color range {i} must have a name"));
				}
				if !(0.0..=100.0).contains(&range.threshold) {
					return Err(format!(
						"color range {i} threshold must be between 0 and 100"
					));
				}
			}
		}
	}
	Ok(())
}

fn int_field(value: &Value, name: &str) -> Result<i64, String> {
	value
		.as_i64()
		.filter(|v| *v >= 0)
		.ok_or_else(|| format!("Invalid field value: {name} must be a non-negative integer"))
}

fn small_int_field(value: &Value, name: &str) -> Result<u8, String> {
	u8::try_from(int_field(value, name)?)
		.map_err(|_| format!("Invalid field value: {name} is out of range"))
}

fn float_field(value: &Value, name: &str) -> Result<f64, String> {
	value
		.as_f64()
		.ok_or_else(|| format!("Invalid field value: {name} must be a number"))
}

fn coords_field(value: &Value) -> Result<[u32; 4], String> {
	let arr = value
		.as_array()
		.filter(|a| a.len() == 4)
		.ok_or("'coords' must be an array of 4 values [x1, y1, x2, y2]")?;
	let mut coords = [0u32; 4];
	for (i, v) in arr.iter().enumerate() {
		coords[i] = int_field(v, "coords")? as u32;
	}
	Ok(coords)
}
