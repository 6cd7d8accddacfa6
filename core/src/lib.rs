//! Visual AOI inspection core
//!
//! Everything behind the HTTP surface: product/ROI configuration, the
//! golden sample library, the four-analyzer inspection pipeline, result
//! aggregation with barcode linking, and session lifecycle management.

pub mod analyzers;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod linking;
pub mod pipeline;
pub mod session;
pub mod store;

use crate::analyzers::Capabilities;
use crate::config::ServerConfig;
use crate::domain::result::GroupOutcome;
use crate::domain::{InspectionReport, Roi};
use crate::error::{CoreError, CoreResult};
use crate::infra::shared_fs::{ImageSource, SharedFolder};
use crate::linking::{BarcodeLinker, HttpBarcodeLinker, NoopLinker};
use crate::pipeline::aggregator::{self, BarcodeRequest};
use crate::pipeline::orchestrator::{CaptureGroupSpec, Orchestrator};
use crate::session::{Session, SessionManager};
use crate::store::{GoldenLibrary, ProductStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
	pub initialized: bool,
	pub current_product: Option<String>,
	pub inspection_in_progress: bool,
	pub active_sessions: usize,
	pub simulation: bool,
	pub uptime: f64,
}

/// The main context for all inspection operations
pub struct AoiCore {
	pub config: ServerConfig,
	pub shared: SharedFolder,
	pub products: Arc<ProductStore>,
	pub golden: Arc<GoldenLibrary>,
	pub sessions: Arc<SessionManager>,
	pub caps: Capabilities,
	pub linker: Arc<dyn BarcodeLinker>,
	orchestrator: Orchestrator,
	initialized: AtomicBool,
	current_product: RwLock<Option<String>>,
	started_at: Instant,
}

impl AoiCore {
	/// Wire the core up from config, using whatever analyzer engines the
	/// deployment provides (simulation stand-ins otherwise)
	pub fn new(config: ServerConfig, caps: Capabilities) -> CoreResult<Self> {
		info!("Initializing AOI core at {:?}", config.shared_root);
		config.ensure_directories()?;

		let shared = SharedFolder::new(config.shared_root.clone(), config.client_mount.clone());
		let products = Arc::new(ProductStore::new(shared.clone()));
		let golden = Arc::new(GoldenLibrary::new(shared.clone()));
		let sessions = Arc::new(SessionManager::new(
			shared.clone(),
			Duration::from_secs(config.session_idle_timeout_secs),
		));

		let linker: Arc<dyn BarcodeLinker> = match &config.link_base_url {
			Some(base) => Arc::new(HttpBarcodeLinker::new(
				base,
				Duration::from_secs(config.link_timeout_secs),
			)?),
			None => Arc::new(NoopLinker),
		};

		let orchestrator = Orchestrator::new(shared.clone(), golden.clone(), caps.clone());

		Ok(Self {
			config,
			shared,
			products,
			golden,
			sessions,
			caps,
			linker,
			orchestrator,
			initialized: AtomicBool::new(false),
			current_product: RwLock::new(None),
			started_at: Instant::now(),
		})
	}

	/// Start the background session sweeper
	pub fn start_background_tasks(&self) -> tokio::task::JoinHandle<()> {
		self.sessions
			.spawn_sweeper(Duration::from_secs(self.config.sweep_interval_secs))
	}

	/// Warm analyzer capabilities up (models, decoders)
	pub fn initialize(&self) -> CoreResult<String> {
		let message = self.caps.warm_up()?;
		self.initialized.store(true, Ordering::SeqCst);
		Ok(message)
	}

	pub async fn status(&self) -> ServerStatus {
		ServerStatus {
			initialized: self.initialized.load(Ordering::SeqCst),
			current_product: self.current_product.read().await.clone(),
			inspection_in_progress: self.sessions.active_inspections() > 0,
			active_sessions: self.sessions.count().await,
			simulation: self.caps.simulation,
			uptime: self.started_at.elapsed().as_secs_f64(),
		}
	}

	pub async fn create_session(&self, product: &str, client_info: Value) -> CoreResult<Arc<Session>> {
		let session = self.sessions.create(product, client_info).await?;
		*self.current_product.write().await = Some(product.to_string());
		Ok(session)
	}

	/// Single-image inspection: every configured ROI (optionally narrowed by
	/// an ad-hoc `focus`/`exposure` filter) runs against one frame
	pub async fn inspect(&self, session_id: &str, payload: &Value) -> CoreResult<InspectionReport> {
		let session = self.sessions.get(session_id).await?;
		session.touch().await;

		let source = ImageSource::from_request(payload).ok_or_else(|| {
			CoreError::validation("Image data is required (either image_path, image_filename or image)")
		})?;
		let groups = vec![CaptureGroupSpec {
			focus: payload.get("focus").and_then(Value::as_u64).map(|v| v as u32),
			exposure: payload
				.get("exposure")
				.and_then(Value::as_u64)
				.map(|v| v as u32),
			source,
			roi_filter: None,
		}];

		self.run_inspection(&session, payload, groups, false).await
	}

	/// Grouped inspection: each `(focus, exposure)` bucket pairs its own
	/// captured frame with the ROI subset configured for those settings
	pub async fn inspect_grouped(
		&self,
		session_id: &str,
		payload: &Value,
	) -> CoreResult<InspectionReport> {
		let session = self.sessions.get(session_id).await?;
		session.touch().await;

		let captured = payload
			.get("captured_images")
			.and_then(Value::as_object)
			.filter(|m| !m.is_empty())
			.ok_or_else(|| CoreError::validation("No captured images provided"))?;

		// A malformed group aborts that group only; the rest still run
		let mut groups = Vec::new();
		let mut rejected = BTreeMap::new();
		for (key, group_data) in captured {
			let focus = group_data.get("focus").and_then(Value::as_u64);
			let exposure = group_data.get("exposure").and_then(Value::as_u64);
			let source = ImageSource::from_request(group_data);
			let (Some(focus), Some(exposure), Some(source)) = (focus, exposure, source) else {
				warn!("Group {key} is missing focus, exposure or image data");
				rejected.insert(
					key.clone(),
					GroupOutcome {
						focus: focus.map(|v| v as u32),
						exposure: exposure.map(|v| v as u32),
						roi_count: 0,
						error: Some(
							"Group is missing focus, exposure or image data".to_string(),
						),
					},
				);
				continue;
			};
			groups.push(CaptureGroupSpec {
				focus: Some(focus as u32),
				exposure: Some(exposure as u32),
				source,
				roi_filter: parse_roi_filter(group_data.get("rois")),
			});
		}

		info!(
			"Processing grouped inspection for session {session_id}, product {} ({} groups)",
			session.product_name,
			groups.len()
		);
		let mut report = self.run_inspection(&session, payload, groups, true).await?;
		if let Some(group_results) = report.group_results.as_mut() {
			group_results.extend(rejected);
		}
		Ok(report)
	}

	async fn run_inspection(
		&self,
		session: &Arc<Session>,
		payload: &Value,
		groups: Vec<CaptureGroupSpec>,
		grouped: bool,
	) -> CoreResult<InspectionReport> {
		let _permit = self.sessions.begin_inspection(session)?;
		let started = Instant::now();

		let product = session.product_name.as_str();
		let rois = self.products.load(product).await?;
		let colors = self.products.load_colors(product).await?;
		let barcodes = BarcodeRequest::from_request(payload);

		let (raw_results, group_results) = self
			.orchestrator
			.run(
				&session.id,
				product,
				&rois,
				&colors,
				groups,
				CancellationToken::new(),
			)
			.await?;

		let (roi_results, device_summaries, overall_result) =
			aggregator::aggregate(raw_results, &rois, &barcodes, self.linker.as_ref()).await;

		let report = InspectionReport {
			session_id: session.id.clone(),
			product_name: product.to_string(),
			roi_results,
			device_summaries,
			overall_result,
			group_results: grouped.then_some(group_results),
			processing_time: started.elapsed().as_secs_f64(),
		};

		session.record_result(report.clone()).await;
		info!(
			"Inspection completed for session {} in {:.2}s ({}/{} ROIs passed)",
			session.id,
			report.processing_time,
			report.overall_result.passed_rois,
			report.overall_result.total_rois
		);
		Ok(report)
	}

	/// Apply a golden-folder renumbering. Refused while any inspection is in
	/// flight, since workers resolve golden directories by ROI index.
	pub async fn rename_golden_folders(
		&self,
		product: &str,
		mapping: &HashMap<u32, u32>,
	) -> CoreResult<usize> {
		if self.sessions.active_inspections() > 0 {
			return Err(CoreError::conflict(
				"Cannot rename golden folders while an inspection is in progress",
			));
		}
		self.golden.rename_folders(product, mapping).await
	}

	/// ROIs bucketed by capture settings, for the client's capture planner
	pub async fn roi_groups(&self, product: &str) -> CoreResult<BTreeMap<(u32, u32), Vec<Roi>>> {
		self.products.roi_groups(product).await
	}
}

fn parse_roi_filter(value: Option<&Value>) -> Option<Vec<u32>> {
	let items = value?.as_array()?;
	let ids: Vec<u32> = items
		.iter()
		.filter_map(|item| match item {
			Value::Number(n) => n.as_u64().map(|v| v as u32),
			Value::Object(_) => item.get("idx").and_then(Value::as_u64).map(|v| v as u32),
			_ => None,
		})
		.collect();
	if ids.is_empty() {
		None
	} else {
		Some(ids)
	}
}
