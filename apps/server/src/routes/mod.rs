//! HTTP surface: route tree and error mapping

pub mod golden;
pub mod products;
pub mod schema;
pub mod sessions;

use aoi_core::error::CoreError;
use aoi_core::AoiCore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub type AppState = Arc<AoiCore>;

/// JSON error envelope: `{error}` plus `validation_errors` for batch
/// validation failures
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
	fn from(err: CoreError) -> Self {
		Self(err)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self.0 {
			CoreError::NotFound(_) => StatusCode::NOT_FOUND,
			CoreError::Validation { .. } | CoreError::Codec(_) => StatusCode::BAD_REQUEST,
			CoreError::Conflict(_) => StatusCode::CONFLICT,
			CoreError::Unavailable(_)
			| CoreError::Io(_)
			| CoreError::External(_)
			| CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};
		let body = match &self.0 {
			CoreError::Validation { message, details } if !details.is_empty() => json!({
				"error": message,
				"validation_errors": details,
			}),
			other => json!({ "error": other.to_string() }),
		};
		(status, Json(body)).into_response()
	}
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Build the complete route tree
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/", get(home))
		.route("/api", get(home))
		.route("/api/health", get(health))
		.route("/api/initialize", post(initialize))
		.route("/api/status", get(status))
		.route("/api/products", get(products::list))
		.route("/api/products/create", post(products::create))
		.route(
			"/api/products/:name/rois",
			get(products::get_rois).post(products::save_rois),
		)
		.route(
			"/api/products/:name/colors",
			get(products::get_colors).post(products::save_colors),
		)
		.route("/get_roi_groups/:name", get(products::roi_groups))
		.route("/api/session/create", post(sessions::create))
		.route("/api/sessions", get(sessions::list))
		.route("/api/session/:id/status", get(sessions::status))
		.route(
			"/api/session/:id/close",
			get(sessions::close).post(sessions::close),
		)
		.route("/api/session/:id/inspect", post(sessions::inspect))
		.route(
			"/api/session/:id/grouped_inspect",
			post(sessions::grouped_inspect),
		)
		.route(
			"/process_grouped_inspection",
			post(sessions::process_grouped_inspection),
		)
		.route("/api/golden-sample/save", post(golden::save))
		.route("/api/golden-sample/promote", post(golden::promote))
		.route("/api/golden-sample/restore", post(golden::restore))
		.route("/api/golden-sample/delete", delete(golden::delete))
		.route(
			"/api/golden-sample/rename-folders",
			post(golden::rename_folders),
		)
		.route("/api/golden-sample/products", get(golden::products))
		.route("/api/golden-sample/:product/:roi_id", get(golden::list))
		.route(
			"/api/golden-sample/:product/:roi_id/metadata",
			get(golden::metadata),
		)
		.route(
			"/api/golden-sample/:product/:roi_id/download/:filename",
			get(golden::download),
		)
		.route("/api/schema/roi", get(schema::roi))
		.route("/api/schema/result", get(schema::result))
		.route("/api/schema/version", get(schema::version))
		.fallback(|| async { ApiError(CoreError::not_found("Endpoint")) })
		.with_state(state)
}

/// Service banner with a compact endpoint index
async fn home() -> Json<serde_json::Value> {
	Json(json!({
		"service": "Visual AOI API Server",
		"version": env!("CARGO_PKG_VERSION"),
		"endpoints": {
			"health": "GET /api/health",
			"initialize": "POST /api/initialize",
			"products": "GET /api/products",
			"rois": "GET|POST /api/products/<name>/rois",
			"sessions": "POST /api/session/create",
			"inspect": "POST /api/session/<id>/inspect",
			"grouped_inspect": "POST /api/session/<id>/grouped_inspect",
			"golden_samples": "GET /api/golden-sample/<product>/<roi_id>",
			"schema": "GET /api/schema/version",
		}
	}))
}

async fn health(State(core): State<AppState>) -> Json<serde_json::Value> {
	Json(json!({
		"status": "healthy",
		"active_sessions": core.sessions.count().await,
		"timestamp": chrono::Utc::now(),
	}))
}

async fn initialize(State(core): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
	let message = core.initialize()?;
	Ok(Json(json!({
		"success": true,
		"message": message,
		"simulation": core.caps.simulation,
	})))
}

async fn status(State(core): State<AppState>) -> Json<aoi_core::ServerStatus> {
	Json(core.status().await)
}
