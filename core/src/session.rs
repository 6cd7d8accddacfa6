//! Inspection session manager
//!
//! Sessions are best-effort: created on request, destroyed on close or by
//! the idle sweeper. Each session owns a scratch workspace on the shared
//! folder and an inspect guard enforcing at most one inspection in flight
//! per session.

use crate::domain::InspectionReport;
use crate::error::{CoreError, CoreResult};
use crate::infra::shared_fs::SharedFolder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, info, warn};

/// Client-facing session snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
	pub session_id: String,
	pub product_name: String,
	pub client_info: Value,
	pub created_at: DateTime<Utc>,
	pub last_activity: DateTime<Utc>,
	pub inspection_count: u64,
}

/// What closing a session reported back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseOutcome {
	pub session_id: String,
	pub duration_seconds: f64,
	pub inspection_count: u64,
	pub directory_cleaned: bool,
}

#[derive(Debug)]
struct SessionState {
	last_activity: DateTime<Utc>,
	inspection_count: u64,
	last_result: Option<InspectionReport>,
}

/// One active inspection session
pub struct Session {
	pub id: String,
	pub product_name: String,
	pub client_info: Value,
	pub created_at: DateTime<Utc>,
	state: Mutex<SessionState>,
	inspect_guard: Arc<Mutex<()>>,
}

impl Session {
	fn new(id: String, product_name: String, client_info: Value) -> Self {
		let now = Utc::now();
		Self {
			id,
			product_name,
			client_info,
			created_at: now,
			state: Mutex::new(SessionState {
				last_activity: now,
				inspection_count: 0,
				last_result: None,
			}),
			inspect_guard: Arc::new(Mutex::new(())),
		}
	}

	pub async fn touch(&self) {
		self.state.lock().await.last_activity = Utc::now();
	}

	pub async fn record_result(&self, report: InspectionReport) {
		let mut state = self.state.lock().await;
		state.inspection_count += 1;
		state.last_activity = Utc::now();
		state.last_result = Some(report);
	}

	pub async fn last_result(&self) -> Option<InspectionReport> {
		self.state.lock().await.last_result.clone()
	}

	pub async fn summary(&self) -> SessionSummary {
		let state = self.state.lock().await;
		SessionSummary {
			session_id: self.id.clone(),
			product_name: self.product_name.clone(),
			client_info: self.client_info.clone(),
			created_at: self.created_at,
			last_activity: state.last_activity,
			inspection_count: state.inspection_count,
		}
	}

	async fn idle_for(&self) -> Duration {
		let last = self.state.lock().await.last_activity;
		(Utc::now() - last).to_std().unwrap_or_default()
	}
}

/// RAII token for one running inspection; holding it keeps the session's
/// inspect guard and the process-wide active counter
#[derive(Debug)]
pub struct InspectionPermit {
	_guard: OwnedMutexGuard<()>,
	counter: Arc<AtomicUsize>,
}

impl Drop for InspectionPermit {
	fn drop(&mut self) {
		self.counter.fetch_sub(1, Ordering::SeqCst);
	}
}

pub struct SessionManager {
	shared: SharedFolder,
	sessions: RwLock<HashMap<String, Arc<Session>>>,
	idle_timeout: Duration,
	active_inspections: Arc<AtomicUsize>,
}

impl SessionManager {
	pub fn new(shared: SharedFolder, idle_timeout: Duration) -> Self {
		Self {
			shared,
			sessions: RwLock::new(HashMap::new()),
			idle_timeout,
			active_inspections: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// Create a session with a fresh scratch workspace
	pub async fn create(&self, product_name: &str, client_info: Value) -> CoreResult<Arc<Session>> {
		let id = uuid::Uuid::new_v4().to_string();
		self.shared.create_session_workspace(&id)?;
		let session = Arc::new(Session::new(id.clone(), product_name.to_string(), client_info));
		self.sessions
			.write()
			.await
			.insert(id.clone(), session.clone());
		info!("Created session {id} for product {product_name}");
		Ok(session)
	}

	pub async fn get(&self, session_id: &str) -> CoreResult<Arc<Session>> {
		self.sessions
			.read()
			.await
			.get(session_id)
			.cloned()
			.ok_or_else(|| CoreError::not_found("Session"))
	}

	pub async fn list(&self) -> Vec<SessionSummary> {
		let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
		let mut summaries =
			futures::future::join_all(sessions.iter().map(|s| s.summary())).await;
		summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		summaries
	}

	pub async fn count(&self) -> usize {
		self.sessions.read().await.len()
	}

	/// Close a session. Idempotent: an already-closed id still gets its
	/// workspace removal attempted.
	pub async fn close(&self, session_id: &str) -> CoreResult<CloseOutcome> {
		let removed = self.sessions.write().await.remove(session_id);

		let (duration, inspections) = match &removed {
			Some(session) => {
				let duration = (Utc::now() - session.created_at)
					.to_std()
					.unwrap_or_default()
					.as_secs_f64();
				let count = session.state.lock().await.inspection_count;
				(duration, count)
			}
			None => (0.0, 0),
		};

		let cleaned = match self.shared.remove_session_workspace(session_id) {
			Ok(()) => true,
			Err(e) => {
				warn!("Failed to remove directory for session {session_id}: {e}");
				false
			}
		};
		if removed.is_some() {
			info!("Closed session {session_id} after {duration:.1} seconds");
		}

		Ok(CloseOutcome {
			session_id: session_id.to_string(),
			duration_seconds: duration,
			inspection_count: inspections,
			directory_cleaned: cleaned,
		})
	}

	/// Claim the session's inspect slot; a second in-flight inspection on
	/// the same session is a conflict
	pub fn begin_inspection(&self, session: &Session) -> CoreResult<InspectionPermit> {
		let guard = session
			.inspect_guard
			.clone()
			.try_lock_owned()
			.map_err(|_| CoreError::conflict("Another inspection is in progress"))?;
		self.active_inspections.fetch_add(1, Ordering::SeqCst);
		Ok(InspectionPermit {
			_guard: guard,
			counter: self.active_inspections.clone(),
		})
	}

	/// Inspections in flight across all sessions
	pub fn active_inspections(&self) -> usize {
		self.active_inspections.load(Ordering::SeqCst)
	}

	/// Close every session idle past the timeout
	pub async fn sweep_expired(&self) {
		let expired: Vec<String> = {
			let sessions = self.sessions.read().await;
			let mut expired = Vec::new();
			for (id, session) in sessions.iter() {
				if session.idle_for().await > self.idle_timeout {
					expired.push(id.clone());
				}
			}
			expired
		};

		for id in expired {
			info!("Cleaning up expired session {id}");
			if let Err(e) = self.close(&id).await {
				error!("Session cleanup error for {id}: {e}");
			}
		}
	}

	/// Background sweeper; runs until the process exits
	pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
		let manager = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			// The first tick fires immediately; skip it
			ticker.tick().await;
			loop {
				ticker.tick().await;
				manager.sweep_expired().await;
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn manager(idle: Duration) -> (tempfile::TempDir, Arc<SessionManager>) {
		let tmp = tempfile::tempdir().unwrap();
		let shared = SharedFolder::new(
			tmp.path().to_path_buf(),
			"/mnt/visual-aoi-shared/".to_string(),
		);
		(tmp, Arc::new(SessionManager::new(shared, idle)))
	}

	#[tokio::test]
	async fn create_get_list_close_lifecycle() {
		let (tmp, manager) = manager(Duration::from_secs(3600));
		let session = manager
			.create("demoA", json!({"host": "station-1"}))
			.await
			.unwrap();
		let dir = tmp.path().join("sessions").join(&session.id);
		assert!(dir.join("input").exists());
		assert!(dir.join("output").exists());

		assert_eq!(manager.count().await, 1);
		let fetched = manager.get(&session.id).await.unwrap();
		assert_eq!(fetched.product_name, "demoA");

		let outcome = manager.close(&session.id).await.unwrap();
		assert!(outcome.directory_cleaned);
		assert!(!dir.exists());
		assert!(manager.get(&session.id).await.is_err());

		// Close is idempotent
		let again = manager.close(&session.id).await.unwrap();
		assert_eq!(again.inspection_count, 0);
	}

	#[tokio::test]
	async fn second_inflight_inspection_conflicts() {
		let (_tmp, manager) = manager(Duration::from_secs(3600));
		let session = manager.create("p", json!({})).await.unwrap();

		let permit = manager.begin_inspection(&session).unwrap();
		assert_eq!(manager.active_inspections(), 1);

		let err = manager.begin_inspection(&session).unwrap_err();
		assert!(matches!(err, CoreError::Conflict(_)));

		drop(permit);
		assert_eq!(manager.active_inspections(), 0);
		// Slot is free again
		let _again = manager.begin_inspection(&session).unwrap();
	}

	#[tokio::test]
	async fn different_sessions_inspect_concurrently() {
		let (_tmp, manager) = manager(Duration::from_secs(3600));
		let a = manager.create("p", json!({})).await.unwrap();
		let b = manager.create("p", json!({})).await.unwrap();
		let _pa = manager.begin_inspection(&a).unwrap();
		let _pb = manager.begin_inspection(&b).unwrap();
		assert_eq!(manager.active_inspections(), 2);
	}

	#[tokio::test]
	async fn sweeper_only_closes_idle_sessions() {
		let (_tmp, manager) = manager(Duration::from_millis(50));
		let stale = manager.create("p", json!({})).await.unwrap();
		let fresh = manager.create("p", json!({})).await.unwrap();

		tokio::time::sleep(Duration::from_millis(80)).await;
		fresh.touch().await;
		manager.sweep_expired().await;

		assert!(manager.get(&stale.id).await.is_err());
		assert!(manager.get(&fresh.id).await.is_ok());
	}

	#[tokio::test]
	async fn record_result_bumps_activity_and_count() {
		let (_tmp, manager) = manager(Duration::from_secs(3600));
		let session = manager.create("p", json!({})).await.unwrap();
		assert!(session.last_result().await.is_none());

		let report = InspectionReport {
			session_id: session.id.clone(),
			product_name: "p".to_string(),
			roi_results: Vec::new(),
			device_summaries: Default::default(),
			overall_result: crate::domain::OverallResult {
				passed: false,
				total_rois: 0,
				passed_rois: 0,
				failed_rois: 0,
			},
			group_results: None,
			processing_time: 0.1,
		};
		session.record_result(report).await;

		let summary = session.summary().await;
		assert_eq!(summary.inspection_count, 1);
		assert!(session.last_result().await.is_some());
	}
}
