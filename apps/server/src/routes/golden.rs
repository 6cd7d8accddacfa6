//! Golden sample library endpoints

use super::{ApiResult, AppState};
use aoi_core::error::CoreError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Deserialize)]
pub struct ListQuery {
	#[serde(default)]
	include_images: bool,
}

pub async fn list(
	State(core): State<AppState>,
	Path((product, roi_id)): Path<(String, u32)>,
	Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
	let samples = core
		.golden
		.list(&product, roi_id, query.include_images)
		.await?;
	Ok(Json(json!({ "golden_samples": samples })))
}

pub async fn metadata(
	State(core): State<AppState>,
	Path((product, roi_id)): Path<(String, u32)>,
) -> ApiResult<Json<Value>> {
	let samples = core.golden.list(&product, roi_id, false).await?;
	let total_size: u64 = samples.iter().map(|s| s.file_size).sum();
	Ok(Json(json!({
		"product_name": product,
		"roi_id": roi_id,
		"total_samples": samples.len(),
		"total_size": total_size,
		"golden_samples": samples,
	})))
}

pub async fn download(
	State(core): State<AppState>,
	Path((product, roi_id, filename)): Path<(String, u32, String)>,
) -> ApiResult<Response> {
	let path = core.golden.download_path(&product, roi_id, &filename).await?;
	let bytes = tokio::fs::read(&path).await.map_err(CoreError::Io)?;
	Ok((
		[
			(header::CONTENT_TYPE, "image/jpeg".to_string()),
			(
				header::CONTENT_DISPOSITION,
				format!("attachment; filename=\"{filename}\""),
			),
		],
		bytes,
	)
		.into_response())
}

/// Multipart upload: `product_name`, `roi_id` and the `golden_image` file
pub async fn save(
	State(core): State<AppState>,
	mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
	let mut product: Option<String> = None;
	let mut roi_id: Option<u32> = None;
	let mut image: Option<Vec<u8>> = None;

	while let Some(field) = multipart
		.next_field()
		.await
		.map_err(|e| CoreError::validation(format!("invalid multipart body: {e}")))?
	{
		let name = field.name().map(str::to_string);
		match name.as_deref() {
			Some("product_name") => {
				product = Some(
					field
						.text()
						.await
						.map_err(|e| CoreError::validation(e.to_string()))?,
				)
			}
			Some("roi_id") => {
				let text = field
					.text()
					.await
					.map_err(|e| CoreError::validation(e.to_string()))?;
				roi_id = Some(
					text.trim()
						.parse()
						.map_err(|_| CoreError::validation("roi_id must be an integer"))?,
				);
			}
			Some("golden_image") => {
				image = Some(
					field
						.bytes()
						.await
						.map_err(|e| CoreError::validation(e.to_string()))?
						.to_vec(),
				)
			}
			_ => {}
		}
	}

	let (Some(product), Some(roi_id)) = (product, roi_id) else {
		return Err(CoreError::validation("Product name and ROI ID are required").into());
	};
	let Some(image) = image.filter(|bytes| !bytes.is_empty()) else {
		return Err(CoreError::validation("No image file provided").into());
	};

	let backup = core.golden.save(&product, roi_id, &image).await?;
	let mut message = format!("Golden sample saved as 'best_golden.jpg' for ROI {roi_id}");
	let backup_info = backup
		.map(|name| format!("Old golden sample backed up as '{name}'"))
		.unwrap_or_default();
	if !backup_info.is_empty() {
		message.push_str(&format!(". {backup_info}"));
	}
	Ok(Json(json!({
		"message": message,
		"backup_info": backup_info,
	})))
}

#[derive(Deserialize)]
pub struct PromoteBody {
	product_name: String,
	roi_id: u32,
	sample_name: String,
}

pub async fn promote(
	State(core): State<AppState>,
	Json(body): Json<PromoteBody>,
) -> ApiResult<Json<Value>> {
	core.golden
		.promote(&body.product_name, body.roi_id, &body.sample_name)
		.await?;
	Ok(Json(json!({
		"message": format!("'{}' promoted to best golden sample", body.sample_name),
	})))
}

#[derive(Deserialize)]
pub struct RestoreBody {
	product_name: String,
	roi_id: u32,
	backup_filename: String,
}

pub async fn restore(
	State(core): State<AppState>,
	Json(body): Json<RestoreBody>,
) -> ApiResult<Json<Value>> {
	let displaced = core
		.golden
		.restore(&body.product_name, body.roi_id, &body.backup_filename)
		.await?;
	Ok(Json(json!({
		"message": format!(
			"Successfully restored '{}' to best golden sample",
			body.backup_filename
		),
		"restored_from": body.backup_filename,
		"backed_up_current": displaced
			.map(|name| format!("Current best golden backed up as '{name}'"))
			.unwrap_or_default(),
	})))
}

#[derive(Deserialize)]
pub struct DeleteBody {
	product_name: String,
	roi_id: u32,
	sample_name: String,
}

pub async fn delete(
	State(core): State<AppState>,
	Json(body): Json<DeleteBody>,
) -> ApiResult<Json<Value>> {
	core.golden
		.delete(&body.product_name, body.roi_id, &body.sample_name)
		.await?;
	Ok(Json(json!({
		"message": format!("Golden sample '{}' deleted successfully", body.sample_name),
	})))
}

#[derive(Deserialize)]
pub struct RenameBody {
	product_name: String,
	roi_mapping: HashMap<String, u32>,
}

pub async fn rename_folders(
	State(core): State<AppState>,
	Json(body): Json<RenameBody>,
) -> ApiResult<Json<Value>> {
	let mut mapping = HashMap::new();
	for (old, new) in body.roi_mapping {
		let old: u32 = old
			.trim()
			.parse()
			.map_err(|_| CoreError::validation(format!("invalid ROI id in mapping: {old}")))?;
		mapping.insert(old, new);
	}
	let renamed = core
		.rename_golden_folders(&body.product_name, &mapping)
		.await?;
	Ok(Json(json!({
		"message": format!("Renamed {renamed} golden sample folders"),
		"renamed_count": renamed,
	})))
}

pub async fn products(State(core): State<AppState>) -> ApiResult<Json<Value>> {
	let products = core.golden.product_summaries().await?;
	Ok(Json(json!({
		"total_products": products.len(),
		"products": products,
	})))
}
