//! Inspection result model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type-specific portion of a ROI result, flattened into the JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoiPayload {
	Barcode {
		/// Raw decoded values; never replaced by the linked barcode
		barcode_values: Vec<String>,
	},
	Compare {
		match_result: String,
		ai_similarity: f64,
		threshold: f64,
	},
	Ocr {
		ocr_text: String,
	},
	Color {
		detected_color: String,
		match_percentage: f64,
		dominant_color: [u8; 3],
		threshold: f64,
	},
	/// Produced when an analyzer errored before yielding a payload
	Empty {},
}

/// Outcome of inspecting a single ROI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiResult {
	pub roi_id: u32,
	pub device_id: u8,
	pub roi_type_name: String,
	pub passed: bool,
	pub coordinates: [u32; 4],
	#[serde(skip_serializing_if = "Option::is_none")]
	pub roi_image_path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub golden_image_path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(flatten)]
	pub payload: RoiPayload,
}

impl RoiResult {
	/// A failed result carrying an analyzer error, so one broken ROI never
	/// takes the rest of the batch down with it
	pub fn errored(roi_id: u32, device_id: u8, type_name: &str, coords: [u32; 4], error: String) -> Self {
		Self {
			roi_id,
			device_id,
			roi_type_name: type_name.to_string(),
			passed: false,
			coordinates: coords,
			roi_image_path: None,
			golden_image_path: None,
			error: Some(error),
			payload: RoiPayload::Empty {},
		}
	}
}

/// Per-device rollup with the canonical (linked) barcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
	pub device_id: u8,
	pub total_rois: usize,
	pub passed_rois: usize,
	pub failed_rois: usize,
	pub device_passed: bool,
	/// Canonical barcode after the priority ladder and linking; "N/A" when
	/// no source produced one
	pub barcode: String,
	pub results: Vec<RoiResult>,
}

/// Whole-frame rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallResult {
	pub passed: bool,
	pub total_rois: usize,
	pub passed_rois: usize,
	pub failed_rois: usize,
}

/// Per-group status for grouped inspections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOutcome {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub focus: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub exposure: Option<u32>,
	pub roi_count: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Complete response for one inspection request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionReport {
	pub session_id: String,
	pub product_name: String,
	pub roi_results: Vec<RoiResult>,
	/// Keyed by device id; BTreeMap keeps the JSON deterministic
	pub device_summaries: BTreeMap<u8, DeviceSummary>,
	pub overall_result: OverallResult,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub group_results: Option<BTreeMap<String, GroupOutcome>>,
	/// Seconds spent processing this request
	pub processing_time: f64,
}
