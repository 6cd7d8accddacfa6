//! Product and ROI configuration endpoints

use super::{ApiResult, AppState};
use aoi_core::domain::ColorRange;
use aoi_core::error::CoreError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

pub async fn list(State(core): State<AppState>) -> ApiResult<Json<Value>> {
	let products = core.products.list().await?;
	Ok(Json(json!({
		"count": products.len(),
		"products": products,
	})))
}

#[derive(Deserialize)]
pub struct CreateProduct {
	product_name: String,
	#[serde(default = "default_num_devices")]
	num_devices: u8,
}

fn default_num_devices() -> u8 {
	1
}

pub async fn create(
	State(core): State<AppState>,
	Json(body): Json<CreateProduct>,
) -> ApiResult<Json<Value>> {
	if body.product_name.trim().is_empty() {
		return Err(CoreError::validation("Product name is required").into());
	}
	let rois = core
		.products
		.create(&body.product_name, body.num_devices)
		.await?;
	let name = aoi_core::store::ProductStore::sanitize_name(&body.product_name)?;
	Ok(Json(json!({
		"success": true,
		"message": format!(
			"Product {name} created successfully with {} device(s)",
			body.num_devices
		),
		"product_name": name,
		"num_devices": body.num_devices,
		"total_rois": rois.len(),
	})))
}

pub async fn get_rois(
	State(core): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
	let rois = core.products.load_or_empty(&name).await?;
	Ok(Json(json!({ "rois": rois })))
}

#[derive(Deserialize)]
pub struct SaveRois {
	#[serde(default)]
	rois: Vec<Value>,
}

pub async fn save_rois(
	State(core): State<AppState>,
	Path(name): Path<String>,
	Json(body): Json<SaveRois>,
) -> ApiResult<Json<Value>> {
	let outcome = core.products.save(&name, &body.rois).await?;
	let mut message = format!("Saved {} ROIs successfully (all validated)", outcome.saved);
	if !outcome.deleted_roi_folders.is_empty() {
		message.push_str(&format!(
			". Deleted {} golden ROI folder(s): {}",
			outcome.deleted_roi_folders.len(),
			outcome.deleted_roi_folders.join(", ")
		));
	}
	Ok(Json(json!({
		"message": message,
		"deleted_roi_folders": outcome.deleted_roi_folders,
		"deleted_roi_indices": outcome.deleted_roi_indices,
	})))
}

pub async fn get_colors(
	State(core): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
	let ranges = core.products.load_colors(&name).await?;
	Ok(Json(json!({
		"product_name": name,
		"color_ranges": ranges,
	})))
}

#[derive(Deserialize)]
pub struct SaveColors {
	color_ranges: Vec<ColorRange>,
}

pub async fn save_colors(
	State(core): State<AppState>,
	Path(name): Path<String>,
	Json(body): Json<SaveColors>,
) -> ApiResult<Json<Value>> {
	let count = core.products.save_colors(&name, body.color_ranges).await?;
	Ok(Json(json!({
		"message": format!("Saved {count} color ranges successfully"),
		"color_ranges_count": count,
	})))
}

pub async fn roi_groups(
	State(core): State<AppState>,
	Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
	let groups = core.roi_groups(&name).await?;
	if groups.is_empty() {
		return Err(CoreError::not_found(format!("ROIs for product {name}")).into());
	}

	let total_rois: usize = groups.values().map(Vec::len).sum();
	let mut payload = serde_json::Map::new();
	for ((focus, exposure), rois) in &groups {
		payload.insert(
			format!("{focus},{exposure}"),
			json!({
				"focus": focus,
				"exposure": exposure,
				"count": rois.len(),
				"rois": rois,
			}),
		);
	}

	Ok(Json(json!({
		"product_name": name,
		"roi_groups": payload,
		"total_groups": groups.len(),
		"total_rois": total_rois,
	})))
}
