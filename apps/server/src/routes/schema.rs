//! Self-describing schema endpoints
//!
//! Clients discover the ROI and result formats here instead of hardcoding
//! their own copy of the field tables.

use axum::Json;
use serde_json::{json, Value};

const SCHEMA_VERSION: &str = "3.2";
const SCHEMA_FORMAT: &str = "12-field";

pub async fn version() -> Json<Value> {
	Json(json!({
		"version": SCHEMA_VERSION,
		"format": SCHEMA_FORMAT,
		"description": "ROI structure specification with simplified color checking",
		"backward_compatible": [
			{ "version": "3.0", "fields": 11, "migration": "Add color_config=null" },
			{ "version": "2.0", "fields": 10, "migration": "Add is_device_barcode=null, color_config=null" },
			{ "version": "1.0", "fields": 5, "migration": "Pad exposure, feature_method, rotation, device_location defaults" },
		],
	}))
}

pub async fn roi() -> Json<Value> {
	Json(json!({
		"version": SCHEMA_VERSION,
		"format": SCHEMA_FORMAT,
		"description": "ROI (Region of Interest) structure specification",
		"fields": [
			{
				"index": 0,
				"name": "idx",
				"type": "int",
				"required": true,
				"description": "ROI index (1-based)",
				"constraints": "Must be unique, positive integer",
			},
			{
				"index": 1,
				"name": "type",
				"type": "int",
				"required": true,
				"description": "ROI type",
				"constraints": "1=Barcode, 2=Compare, 3=OCR, 4=Color",
			},
			{
				"index": 2,
				"name": "coords",
				"type": "array[int, int, int, int]",
				"required": true,
				"description": "Coordinates (x1, y1, x2, y2)",
				"constraints": "x1 < x2, y1 < y2, all non-negative",
			},
			{
				"index": 3,
				"name": "focus",
				"type": "int",
				"required": true,
				"description": "Camera focus value",
				"constraints": "Positive integer",
				"default": 305,
			},
			{
				"index": 4,
				"name": "exposure",
				"type": "int",
				"required": true,
				"description": "Exposure time in microseconds",
				"constraints": "Positive integer",
				"default": 3000,
			},
			{
				"index": 5,
				"name": "ai_threshold",
				"type": "float | null",
				"required": false,
				"description": "AI similarity threshold (0.0-1.0)",
				"constraints": "Only for Compare ROIs, null otherwise",
				"default": 0.85,
			},
			{
				"index": 6,
				"name": "feature_method",
				"type": "string | null",
				"required": false,
				"description": "Feature extraction method",
				"constraints": "mobilenet, opencv, sift, orb, barcode, ocr",
				"default": "mobilenet (Compare), barcode (Barcode), ocr (OCR)",
			},
			{
				"index": 7,
				"name": "rotation",
				"type": "int",
				"required": false,
				"description": "Rotation angle in degrees",
				"constraints": "0, 90, 180, 270",
				"default": 0,
			},
			{
				"index": 8,
				"name": "device_location",
				"type": "int",
				"required": true,
				"description": "Device identifier",
				"constraints": "1..4",
				"default": 1,
			},
			{
				"index": 9,
				"name": "expected_text",
				"type": "string | null",
				"required": false,
				"description": "Expected text for OCR validation (substring match)",
				"constraints": "Only for OCR ROIs",
			},
			{
				"index": 10,
				"name": "is_device_barcode",
				"type": "bool | null",
				"required": false,
				"description": "Marks the ROI whose decoded value identifies the device",
				"constraints": "Only meaningful for Barcode ROIs",
			},
			{
				"index": 11,
				"name": "color_config",
				"type": "object | null",
				"required": false,
				"description": "Color configuration for Color ROIs",
				"constraints": "Only for Color ROIs. Simple or legacy format",
				"formats": {
					"simple": {
						"fields": {
							"expected_color": "array[int, int, int] - target RGB color",
							"color_tolerance": "int - per-channel deviation allowed (default 10)",
							"min_pixel_percentage": "float - minimum match percentage for pass (default 5.0)",
						},
						"logic": "Pixels within expected_color ± color_tolerance on every channel count as matches; pass when the match percentage reaches min_pixel_percentage.",
					},
					"legacy": {
						"fields": {
							"color_ranges": "array of {name, lower, upper, color_space, threshold}",
						},
						"note": "Ranges sharing a name are aggregated; the highest aggregate becomes detected_color.",
					},
				},
				"note": "Priority: embedded config > product-level colors_config file.",
			},
		],
		"priority_logic": {
			"description": "Canonical device barcode selection",
			"order": [
				"P0: Barcode ROI with is_device_barcode=true",
				"P1: any Barcode ROI on the device",
				"P2: request device_barcodes map",
				"P3: legacy single device_barcode",
				"P4: N/A",
			],
			"note": "Every selected barcode is passed through the external linking service; on failure the raw value is kept.",
		},
	}))
}

pub async fn result() -> Json<Value> {
	Json(json!({
		"version": SCHEMA_VERSION,
		"description": "Inspection response structure",
		"roi_result": {
			"common": {
				"roi_id": "int",
				"device_id": "int",
				"roi_type_name": "string - barcode | compare | ocr | color",
				"passed": "bool",
				"coordinates": "array[int, int, int, int]",
				"roi_image_path": "string | absent - client-mount path of the analyzed crop",
				"golden_image_path": "string | absent - client-mount path of the golden used (Compare)",
				"error": "string | absent - analyzer error; passed is false",
			},
			"barcode": { "barcode_values": "array[string] - raw decoded values, never linked" },
			"compare": {
				"match_result": "string - Match | Different",
				"ai_similarity": "float",
				"threshold": "float",
			},
			"ocr": { "ocr_text": "string - recognized text, with [PASS:..]/[FAIL:..] marker when validated" },
			"color": {
				"detected_color": "string",
				"match_percentage": "float",
				"dominant_color": "array[int, int, int]",
				"threshold": "float",
			},
		},
		"device_summary": {
			"device_id": "int",
			"total_rois": "int",
			"passed_rois": "int",
			"failed_rois": "int",
			"device_passed": "bool - passed_rois == total_rois and total_rois > 0",
			"barcode": "string - linked canonical barcode, or N/A",
			"results": "array[roi_result]",
		},
		"overall_result": {
			"passed": "bool - passed_rois == total_rois and total_rois > 0",
			"total_rois": "int",
			"passed_rois": "int",
			"failed_rois": "int",
		},
		"response": {
			"session_id": "string",
			"product_name": "string",
			"roi_results": "array[roi_result] - deduplicated by (device_id, roi_id)",
			"device_summaries": "object keyed by device id",
			"overall_result": "object",
			"group_results": "object keyed by 'focus,exposure' (grouped inspections only)",
			"processing_time": "float seconds",
		},
	}))
}
