//! Result aggregator
//!
//! Collates raw ROI results into per-device summaries, assigns each
//! device's canonical barcode through an explicit priority ladder and pushes
//! every chosen barcode through the linking service. Linking failures keep
//! the pre-link value; the raw decoded values always stay visible in
//! `roi_results[].barcode_values`.

use crate::domain::{DeviceSummary, OverallResult, Roi, RoiPayload, RoiResult};
use crate::linking::BarcodeLinker;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Barcode inputs that arrived with the inspection request
#[derive(Debug, Clone, Default)]
pub struct BarcodeRequest {
	/// Per-device manual barcodes
	pub device_barcodes: HashMap<u8, String>,
	/// Legacy single barcode applied to any device left unfilled
	pub legacy_barcode: Option<String>,
}

impl BarcodeRequest {
	/// Read both request forms: `device_barcodes` as a dict
	/// (`{"1": "..."}`), or as a list (`[{device_id, barcode}]`), plus the
	/// legacy single `device_barcode`
	pub fn from_request(data: &Value) -> Self {
		let mut device_barcodes = HashMap::new();
		match data.get("device_barcodes") {
			Some(Value::Object(map)) => {
				for (key, value) in map {
					if let (Ok(device), Some(code)) = (key.parse::<u8>(), value.as_str()) {
						if !code.trim().is_empty() {
							device_barcodes.insert(device, code.trim().to_string());
						}
					}
				}
			}
			Some(Value::Array(items)) => {
				for item in items {
					let device = item.get("device_id").and_then(Value::as_u64);
					let code = item.get("barcode").and_then(Value::as_str);
					if let (Some(device), Some(code)) = (device, code) {
						if !code.trim().is_empty() {
							device_barcodes.insert(device as u8, code.trim().to_string());
						}
					}
				}
			}
			Some(other) if !other.is_null() => {
				warn!("Unexpected device_barcodes format: {other:?}");
			}
			_ => {}
		}

		let legacy_barcode = data
			.get("device_barcode")
			.and_then(Value::as_str)
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string);

		Self {
			device_barcodes,
			legacy_barcode,
		}
	}
}

/// The ordered barcode sources; each one only fills devices still at "N/A"
#[derive(Debug, Clone, Copy)]
enum BarcodeSource {
	/// P0: a Barcode ROI flagged `is_device_barcode` decoded a value
	DeviceBarcodeRoi,
	/// P1: any Barcode ROI on the device decoded a value
	AnyBarcodeRoi,
	/// P2: the request's per-device manual map
	ManualMap,
	/// P3: the request's legacy single barcode
	ManualLegacy,
}

const PRIORITY_LADDER: [BarcodeSource; 4] = [
	BarcodeSource::DeviceBarcodeRoi,
	BarcodeSource::AnyBarcodeRoi,
	BarcodeSource::ManualMap,
	BarcodeSource::ManualLegacy,
];

const NO_BARCODE: &str = "N/A";

/// Aggregate raw ROI results into the response shape.
///
/// `rois` is the product configuration the results came from (needed for
/// the `is_device_barcode` flags).
pub async fn aggregate(
	raw_results: Vec<RoiResult>,
	rois: &[Roi],
	request: &BarcodeRequest,
	linker: &dyn BarcodeLinker,
) -> (Vec<RoiResult>, BTreeMap<u8, DeviceSummary>, OverallResult) {
	// Last write wins per (device, roi); duplicate submissions are folded
	let mut deduped: BTreeMap<(u8, u32), RoiResult> = BTreeMap::new();
	for result in raw_results {
		deduped.insert((result.device_id, result.roi_id), result);
	}
	let results: Vec<RoiResult> = deduped.into_values().collect();

	let mut summaries: BTreeMap<u8, DeviceSummary> = BTreeMap::new();
	for result in &results {
		let summary = summaries
			.entry(result.device_id)
			.or_insert_with(|| DeviceSummary {
				device_id: result.device_id,
				total_rois: 0,
				passed_rois: 0,
				failed_rois: 0,
				device_passed: false,
				barcode: NO_BARCODE.to_string(),
				results: Vec::new(),
			});
		summary.total_rois += 1;
		if result.passed {
			summary.passed_rois += 1;
		} else {
			summary.failed_rois += 1;
		}
		summary.results.push(result.clone());
	}
	for summary in summaries.values_mut() {
		summary.device_passed = summary.total_rois > 0 && summary.passed_rois == summary.total_rois;
	}

	// Walk the ladder; each priority only fills devices still unset
	for (priority, source) in PRIORITY_LADDER.iter().enumerate() {
		for summary in summaries.values_mut() {
			if summary.barcode != NO_BARCODE {
				continue;
			}
			if let Some(raw) = lookup(*source, summary, &results, rois, request) {
				info!(
					"[Priority {priority}] Using {source:?} barcode for device {}: {raw}",
					summary.device_id
				);
				summary.barcode = raw;
			}
		}
	}

	// Link every chosen barcode; failures silently keep the raw value
	for summary in summaries.values_mut() {
		if summary.barcode == NO_BARCODE {
			continue;
		}
		match linker.link(&summary.barcode).await {
			Ok(linked) => {
				if linked != summary.barcode {
					info!(
						"Linked barcode for device {}: {} -> {linked}",
						summary.device_id, summary.barcode
					);
				}
				summary.barcode = linked;
			}
			Err(e) => {
				warn!(
					"Barcode linking failed for device {}: {e}",
					summary.device_id
				);
			}
		}
	}

	let total_rois = results.len();
	let passed_rois = results.iter().filter(|r| r.passed).count();
	let overall = OverallResult {
		passed: total_rois > 0 && passed_rois == total_rois,
		total_rois,
		passed_rois,
		failed_rois: total_rois - passed_rois,
	};

	(results, summaries, overall)
}

fn lookup(
	source: BarcodeSource,
	summary: &DeviceSummary,
	results: &[RoiResult],
	rois: &[Roi],
	request: &BarcodeRequest,
) -> Option<String> {
	match source {
		BarcodeSource::DeviceBarcodeRoi => {
			first_decoded(results, summary.device_id, |roi_id| {
				rois.iter()
					.any(|r| r.idx == roi_id && r.is_device_barcode == Some(true))
			})
		}
		BarcodeSource::AnyBarcodeRoi => first_decoded(results, summary.device_id, |_| true),
		BarcodeSource::ManualMap => request.device_barcodes.get(&summary.device_id).cloned(),
		BarcodeSource::ManualLegacy => request.legacy_barcode.clone(),
	}
}

/// First non-empty decoded value among the device's barcode ROIs that pass
/// the given ROI predicate
fn first_decoded(
	results: &[RoiResult],
	device_id: u8,
	roi_matches: impl Fn(u32) -> bool,
) -> Option<String> {
	results
		.iter()
		.filter(|r| r.device_id == device_id && roi_matches(r.roi_id))
		.find_map(|r| match &r.payload {
			RoiPayload::Barcode { barcode_values } => barcode_values
				.first()
				.map(|v| v.trim().to_string())
				.filter(|v| !v.is_empty() && v != NO_BARCODE),
			_ => None,
		})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::Roi;
	use crate::error::{CoreError, CoreResult};
	use crate::linking::NoopLinker;
	use async_trait::async_trait;
	use serde_json::json;
	use std::sync::Mutex;

	/// Linker that records calls and prefixes results
	struct RecordingLinker {
		calls: Mutex<Vec<String>>,
		fail: bool,
	}

	impl RecordingLinker {
		fn new(fail: bool) -> Self {
			Self {
				calls: Mutex::new(Vec::new()),
				fail,
			}
		}
	}

	#[async_trait]
	impl BarcodeLinker for RecordingLinker {
		async fn link(&self, raw: &str) -> CoreResult<String> {
			self.calls.lock().unwrap().push(raw.to_string());
			if self.fail {
				Err(CoreError::External("link timeout".to_string()))
			} else {
				Ok(format!("LINKED-{raw}"))
			}
		}
	}

	fn barcode_roi(idx: u32, device: u8, is_device_barcode: bool) -> Roi {
		Roi::normalize(&json!({
			"idx": idx,
			"type": 1,
			"coords": [0, 0, 10, 10],
			"focus": 305,
			"exposure": 1200,
			"device_location": device,
			"is_device_barcode": is_device_barcode
		}))
		.unwrap()
	}

	fn barcode_result(roi_id: u32, device: u8, values: &[&str]) -> RoiResult {
		RoiResult {
			roi_id,
			device_id: device,
			roi_type_name: "barcode".to_string(),
			passed: !values.is_empty(),
			coordinates: [0, 0, 10, 10],
			roi_image_path: None,
			golden_image_path: None,
			error: None,
			payload: RoiPayload::Barcode {
				barcode_values: values.iter().map(|s| s.to_string()).collect(),
			},
		}
	}

	fn ocr_result(roi_id: u32, device: u8, passed: bool) -> RoiResult {
		RoiResult {
			roi_id,
			device_id: device,
			roi_type_name: "ocr".to_string(),
			passed,
			coordinates: [0, 0, 10, 10],
			roi_image_path: None,
			golden_image_path: None,
			error: None,
			payload: RoiPayload::Ocr {
				ocr_text: "x".to_string(),
			},
		}
	}

	fn manual(device: u8, code: &str) -> BarcodeRequest {
		BarcodeRequest {
			device_barcodes: HashMap::from([(device, code.to_string())]),
			legacy_barcode: None,
		}
	}

	#[tokio::test]
	async fn device_barcode_roi_beats_manual_input() {
		let rois = vec![barcode_roi(1, 1, true)];
		let results = vec![barcode_result(1, 1, &["ABC"]), ocr_result(2, 1, true)];
		let linker = RecordingLinker::new(false);

		let (results, summaries, overall) =
			aggregate(results, &rois, &manual(1, "MANUAL"), &linker).await;

		assert_eq!(summaries[&1].barcode, "LINKED-ABC");
		assert_eq!(linker.calls.lock().unwrap().as_slice(), ["ABC"]);
		// Raw decoded values stay visible
		let raw = results
			.iter()
			.find(|r| r.roi_id == 1)
			.map(|r| r.payload.clone());
		assert_eq!(
			raw,
			Some(RoiPayload::Barcode {
				barcode_values: vec!["ABC".to_string()]
			})
		);
		assert!(overall.passed);
	}

	#[tokio::test]
	async fn empty_decode_falls_back_to_manual() {
		let rois = vec![barcode_roi(1, 1, true)];
		let results = vec![barcode_result(1, 1, &[])];
		let linker = RecordingLinker::new(false);

		let (_, summaries, overall) =
			aggregate(results, &rois, &manual(1, "MANUAL"), &linker).await;

		assert_eq!(summaries[&1].barcode, "LINKED-MANUAL");
		assert_eq!(linker.calls.lock().unwrap().as_slice(), ["MANUAL"]);
		// The empty barcode ROI failed, so the device failed
		assert!(!overall.passed);
	}

	#[tokio::test]
	async fn any_barcode_roi_fills_before_manual() {
		let rois = vec![barcode_roi(1, 1, false)];
		let results = vec![barcode_result(1, 1, &["PLAIN"])];
		let (_, summaries, _) = aggregate(
			results,
			&rois,
			&manual(1, "MANUAL"),
			&RecordingLinker::new(false),
		)
		.await;
		assert_eq!(summaries[&1].barcode, "LINKED-PLAIN");
	}

	#[tokio::test]
	async fn legacy_single_barcode_is_last_resort() {
		let request = BarcodeRequest {
			device_barcodes: HashMap::from([(1, "MAP1".to_string())]),
			legacy_barcode: Some("LEGACY".to_string()),
		};
		let results = vec![ocr_result(1, 1, true), ocr_result(2, 2, true)];
		let (_, summaries, _) =
			aggregate(results, &[], &request, &RecordingLinker::new(false)).await;
		assert_eq!(summaries[&1].barcode, "LINKED-MAP1");
		assert_eq!(summaries[&2].barcode, "LINKED-LEGACY");
	}

	#[tokio::test]
	async fn device_without_any_source_stays_na_and_is_not_linked() {
		let results = vec![ocr_result(1, 3, true)];
		let linker = RecordingLinker::new(false);
		let (_, summaries, _) =
			aggregate(results, &[], &BarcodeRequest::default(), &linker).await;
		assert_eq!(summaries[&3].barcode, "N/A");
		assert!(linker.calls.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn linking_failure_keeps_the_raw_value() {
		let rois = vec![barcode_roi(1, 1, true)];
		let results = vec![barcode_result(1, 1, &["RAW"])];
		let (_, summaries, _) = aggregate(
			results,
			&rois,
			&BarcodeRequest::default(),
			&RecordingLinker::new(true),
		)
		.await;
		assert_eq!(summaries[&1].barcode, "RAW");
	}

	#[tokio::test]
	async fn duplicates_dedupe_last_wins_and_counts_are_consistent() {
		let results = vec![
			ocr_result(1, 1, false),
			ocr_result(2, 1, true),
			// Re-submission of ROI 1 that now passes
			ocr_result(1, 1, true),
			ocr_result(3, 2, true),
		];
		let (results, summaries, overall) =
			aggregate(results, &[], &BarcodeRequest::default(), &NoopLinker).await;

		assert_eq!(results.len(), 3);
		assert_eq!(overall.total_rois, 3);
		assert_eq!(overall.passed_rois, 3);
		assert!(overall.passed);

		let device_total: usize = summaries.values().map(|s| s.total_rois).sum();
		assert_eq!(device_total, overall.total_rois);
		assert!(summaries.values().all(|s| s.device_passed));
	}

	#[tokio::test]
	async fn empty_result_set_never_passes() {
		let (_, summaries, overall) =
			aggregate(Vec::new(), &[], &BarcodeRequest::default(), &NoopLinker).await;
		assert!(summaries.is_empty());
		assert!(!overall.passed);
		assert_eq!(overall.total_rois, 0);
	}

	#[tokio::test]
	async fn failed_roi_fails_its_device_only() {
		let results = vec![ocr_result(1, 1, false), ocr_result(2, 2, true)];
		let (_, summaries, overall) =
			aggregate(results, &[], &BarcodeRequest::default(), &NoopLinker).await;
		assert!(!summaries[&1].device_passed);
		assert_eq!(summaries[&1].failed_rois, 1);
		assert!(summaries[&2].device_passed);
		assert!(!overall.passed);
	}

	#[test]
	fn barcode_request_accepts_dict_and_list_forms() {
		let dict = BarcodeRequest::from_request(&json!({
			"device_barcodes": {"1": "A", "2": " B "},
			"device_barcode": "LEG"
		}));
		assert_eq!(dict.device_barcodes[&1], "A");
		assert_eq!(dict.device_barcodes[&2], "B");
		assert_eq!(dict.legacy_barcode.as_deref(), Some("LEG"));

		let list = BarcodeRequest::from_request(&json!({
			"device_barcodes": [
				{"device_id": 1, "barcode": "A"},
				{"device_id": 2, "barcode": ""}
			]
		}));
		assert_eq!(list.device_barcodes.len(), 1);
		assert_eq!(list.device_barcodes[&1], "A");
	}
}
