//! Session lifecycle and inspection endpoints

use super::{ApiResult, AppState};
use aoi_core::domain::InspectionReport;
use aoi_core::error::CoreError;
use aoi_core::session::SessionSummary;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

pub async fn create(
	State(core): State<AppState>,
	Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
	let product = body
		.get("product_name")
		.and_then(Value::as_str)
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.ok_or_else(|| CoreError::validation("Product name is required"))?;
	let client_info = body.get("client_info").cloned().unwrap_or(json!({}));

	let session = core.create_session(product, client_info).await?;
	Ok(Json(json!({
		"session_id": session.id.clone(),
		"product_name": session.product_name.clone(),
		"created_at": session.created_at,
		"message": format!("Session created for product: {product}"),
	})))
}

pub async fn list(State(core): State<AppState>) -> Json<Value> {
	let sessions = core.sessions.list().await;
	Json(json!({
		"count": sessions.len(),
		"sessions": sessions,
	}))
}

pub async fn status(
	State(core): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
	let session = core.sessions.get(&id).await?;
	Ok(Json(session.summary().await))
}

pub async fn close(
	State(core): State<AppState>,
	Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
	let outcome = core.sessions.close(&id).await?;
	Ok(Json(json!({
		"message": format!("Session {id} closed"),
		"duration_seconds": outcome.duration_seconds,
		"inspection_count": outcome.inspection_count,
		"directory_cleaned": outcome.directory_cleaned,
	})))
}

pub async fn inspect(
	State(core): State<AppState>,
	Path(id): Path<String>,
	Json(body): Json<Value>,
) -> ApiResult<Json<InspectionReport>> {
	Ok(Json(core.inspect(&id, &body).await?))
}

pub async fn grouped_inspect(
	State(core): State<AppState>,
	Path(id): Path<String>,
	Json(body): Json<Value>,
) -> ApiResult<Json<InspectionReport>> {
	Ok(Json(core.inspect_grouped(&id, &body).await?))
}

/// Legacy entry point: the session id travels in the body
pub async fn process_grouped_inspection(
	State(core): State<AppState>,
	Json(body): Json<Value>,
) -> ApiResult<Json<InspectionReport>> {
	let session_id = body
		.get("session_id")
		.and_then(Value::as_str)
		.ok_or_else(|| CoreError::validation("Session ID required"))?;
	Ok(Json(core.inspect_grouped(session_id, &body).await?))
}
