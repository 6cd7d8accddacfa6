//! Capture-group orchestrator
//!
//! Receives the per-request map of `(focus, exposure)` groups, loads each
//! group's image once and fans every `(image, ROI)` pair out onto one
//! shared worker pool sized `min(total_rois, CPU count)`. Groups never
//! serialize against each other; a group whose image cannot be loaded is
//! aborted alone and reported in `group_results`.

use crate::analyzers::Capabilities;
use crate::domain::result::GroupOutcome;
use crate::domain::{ColorRange, Roi, RoiResult, RoiType};
use crate::error::CoreResult;
use crate::infra::shared_fs::{ImageSource, SharedFolder};
use crate::store::GoldenLibrary;
use image::RgbImage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One capture group as submitted by the client. Grouped inspections carry
/// concrete `(focus, exposure)` settings; the single-image inspect path
/// leaves them `None` to match every ROI (or uses the request's ad-hoc
/// filter).
#[derive(Debug, Clone)]
pub struct CaptureGroupSpec {
	pub focus: Option<u32>,
	pub exposure: Option<u32>,
	pub source: ImageSource,
	/// Optional explicit ROI subset; the group's `(focus, exposure)` filter
	/// always applies on top
	pub roi_filter: Option<Vec<u32>>,
}

impl CaptureGroupSpec {
	fn key(&self) -> String {
		format!(
			"{},{}",
			self.focus.map_or_else(|| "*".to_string(), |f| f.to_string()),
			self.exposure
				.map_or_else(|| "*".to_string(), |e| e.to_string())
		)
	}
}

struct WorkItem {
	image: Arc<RgbImage>,
	roi: Roi,
	golden_files: Vec<PathBuf>,
}

pub struct Orchestrator {
	shared: SharedFolder,
	golden: Arc<GoldenLibrary>,
	caps: Capabilities,
}

impl Orchestrator {
	pub fn new(shared: SharedFolder, golden: Arc<GoldenLibrary>, caps: Capabilities) -> Self {
		Self {
			shared,
			golden,
			caps,
		}
	}

	/// Run every group's ROIs through the shared worker pool.
	///
	/// Returns the raw (pre-aggregation) results plus a per-group outcome
	/// map keyed `"focus,exposure"`.
	pub async fn run(
		&self,
		session_id: &str,
		product: &str,
		product_rois: &[Roi],
		product_colors: &[ColorRange],
		groups: Vec<CaptureGroupSpec>,
		cancel: CancellationToken,
	) -> CoreResult<(Vec<RoiResult>, BTreeMap<String, GroupOutcome>)> {
		let mut items = Vec::new();
		let mut group_results = BTreeMap::new();

		for group in groups {
			let key = group.key();
			let mut rois: Vec<Roi> = product_rois
				.iter()
				.filter(|r| {
					group.focus.map_or(true, |f| r.focus == f)
						&& group.exposure.map_or(true, |e| r.exposure == e)
				})
				.cloned()
				.collect();
			if let Some(filter) = &group.roi_filter {
				rois.retain(|r| filter.contains(&r.idx));
			}

			let image = match self.shared.load_image(session_id, &group.source) {
				Ok(image) => Arc::new(image),
				Err(e) => {
					// Image problems abort this group only
					warn!("Group {key}: failed to load image: {e}");
					group_results.insert(
						key,
						GroupOutcome {
							focus: group.focus,
							exposure: group.exposure,
							roi_count: 0,
							error: Some(e.to_string()),
						},
					);
					continue;
				}
			};

			group_results.insert(
				key,
				GroupOutcome {
					focus: group.focus,
					exposure: group.exposure,
					roi_count: rois.len(),
					error: None,
				},
			);

			for roi in rois {
				let golden_files = if roi.roi_type == RoiType::Compare {
					self.golden.ordered_files(product, roi.idx).await?
				} else {
					Vec::new()
				};
				items.push(WorkItem {
					image: image.clone(),
					roi,
					golden_files,
				});
			}
		}

		let results = self
			.process_items(session_id, product, product_colors, items, cancel)
			.await;
		Ok((results, group_results))
	}

	async fn process_items(
		&self,
		session_id: &str,
		product: &str,
		product_colors: &[ColorRange],
		items: Vec<WorkItem>,
		cancel: CancellationToken,
	) -> Vec<RoiResult> {
		if items.is_empty() {
			return Vec::new();
		}

		let workers = std::thread::available_parallelism()
			.map(|n| n.get())
			.unwrap_or(4)
			.min(items.len());
		info!("Using {workers} parallel workers for {} ROIs", items.len());

		let semaphore = Arc::new(Semaphore::new(workers));
		let mut set = JoinSet::new();

		for item in items {
			if cancel.is_cancelled() {
				debug!("Inspection cancelled; skipping remaining ROIs");
				break;
			}
			let semaphore = semaphore.clone();
			let caps = self.caps.clone();
			let colors = product_colors.to_vec();
			let cancel = cancel.clone();
			set.spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("pool never closes");
				if cancel.is_cancelled() {
					return None;
				}
				tokio::task::spawn_blocking(move || {
					super::processor::process_roi(
						&item.image,
						&item.roi,
						&caps,
						&item.golden_files,
						&colors,
					)
				})
				.await
				.ok()
			});
		}

		let mut results = Vec::new();
		while let Some(joined) = set.join_next().await {
			let Ok(Some(mut processed)) = joined else {
				continue;
			};

			// Self-tuning loop: successful alternatives rise to best
			if let Some(name) = processed.promote.take() {
				if let Err(e) = self
					.golden
					.promote(product, processed.result.roi_id, &name)
					.await
				{
					warn!(
						"Failed to promote golden '{name}' for ROI {}: {e}",
						processed.result.roi_id
					);
				}
			}

			// Crop/golden exports are best-effort; a failed write only
			// costs the client the preview path
			if let Some(crop) = &processed.crop {
				let filename = format!("roi_{}.jpg", processed.result.roi_id);
				match self.shared.save_output_image(session_id, &filename, crop) {
					Ok(client_path) => processed.result.roi_image_path = Some(client_path),
					Err(e) => warn!(
						"Failed to save ROI image for {}: {e}",
						processed.result.roi_id
					),
				}
			}
			if let Some(golden) = &processed.golden {
				let filename = format!("golden_{}.jpg", processed.result.roi_id);
				match self.shared.save_output_image(session_id, &filename, golden) {
					Ok(client_path) => processed.result.golden_image_path = Some(client_path),
					Err(e) => warn!(
						"Failed to save golden image for {}: {e}",
						processed.result.roi_id
					),
				}
			}

			results.push(processed.result);
		}
		results
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::infra::codec;
	use image::Rgb;
	use serde_json::json;
	use std::fs;

	fn setup() -> (tempfile::TempDir, SharedFolder, Orchestrator) {
		let tmp = tempfile::tempdir().unwrap();
		let shared = SharedFolder::new(
			tmp.path().to_path_buf(),
			"/mnt/visual-aoi-shared/".to_string(),
		);
		let golden = Arc::new(GoldenLibrary::new(shared.clone()));
		let orchestrator =
			Orchestrator::new(shared.clone(), golden, Capabilities::simulated());
		(tmp, shared, orchestrator)
	}

	fn write_frame(shared: &SharedFolder, session: &str, name: &str, color: [u8; 3]) {
		shared.create_session_workspace(session).unwrap();
		let img = RgbImage::from_pixel(60, 60, Rgb(color));
		fs::write(
			shared.session_input_dir(session).join(name),
			codec::encode_jpeg(&img).unwrap(),
		)
		.unwrap();
	}

	fn rois() -> Vec<Roi> {
		[
			json!({"idx": 1, "type": 1, "coords": [0, 0, 20, 20], "focus": 305, "exposure": 3000, "device_location": 1, "is_device_barcode": true}),
			json!({"idx": 2, "type": 3, "coords": [20, 0, 40, 20], "focus": 305, "exposure": 3000, "device_location": 1}),
			json!({"idx": 3, "type": 4, "coords": [0, 20, 20, 40], "focus": 400, "exposure": 5000, "device_location": 2,
				"expected_color": [250, 10, 10], "color_tolerance": 20, "min_pixel_percentage": 5.0}),
		]
		.iter()
		.map(|v| Roi::normalize(v).unwrap())
		.collect()
	}

	#[tokio::test]
	async fn groups_route_to_their_roi_subsets() {
		let (_tmp, shared, orchestrator) = setup();
		write_frame(&shared, "s1", "g1.jpg", [250, 10, 10]);
		write_frame(&shared, "s1", "g2.jpg", [250, 10, 10]);

		let groups = vec![
			CaptureGroupSpec {
				focus: Some(305),
				exposure: Some(3000),
				source: ImageSource::Filename("g1.jpg".to_string()),
				roi_filter: None,
			},
			CaptureGroupSpec {
				focus: Some(400),
				exposure: Some(5000),
				source: ImageSource::Filename("g2.jpg".to_string()),
				roi_filter: None,
			},
		];
		let (results, outcomes) = orchestrator
			.run("s1", "p", &rois(), &[], groups, CancellationToken::new())
			.await
			.unwrap();

		assert_eq!(results.len(), 3);
		assert_eq!(outcomes["305,3000"].roi_count, 2);
		assert_eq!(outcomes["400,5000"].roi_count, 1);
		assert!(outcomes.values().all(|o| o.error.is_none()));

		// Crops were exported with client-visible paths
		let color = results.iter().find(|r| r.roi_id == 3).unwrap();
		assert!(color.passed);
		assert_eq!(
			color.roi_image_path.as_deref(),
			Some("/mnt/visual-aoi-shared/sessions/s1/output/roi_3.jpg")
		);
		assert!(shared
			.session_output_dir("s1")
			.join("roi_3.jpg")
			.exists());
	}

	#[tokio::test]
	async fn missing_group_image_aborts_that_group_only() {
		let (_tmp, shared, orchestrator) = setup();
		write_frame(&shared, "s2", "ok.jpg", [250, 10, 10]);

		let groups = vec![
			CaptureGroupSpec {
				focus: Some(305),
				exposure: Some(3000),
				source: ImageSource::Filename("missing.jpg".to_string()),
				roi_filter: None,
			},
			CaptureGroupSpec {
				focus: Some(400),
				exposure: Some(5000),
				source: ImageSource::Filename("ok.jpg".to_string()),
				roi_filter: None,
			},
		];
		let (results, outcomes) = orchestrator
			.run("s2", "p", &rois(), &[], groups, CancellationToken::new())
			.await
			.unwrap();

		assert_eq!(results.len(), 1);
		assert_eq!(results[0].roi_id, 3);
		assert!(outcomes["305,3000"].error.is_some());
		assert!(outcomes["400,5000"].error.is_none());
	}

	#[tokio::test]
	async fn explicit_roi_filter_narrows_a_group() {
		let (_tmp, shared, orchestrator) = setup();
		write_frame(&shared, "s3", "g.jpg", [250, 10, 10]);

		let groups = vec![CaptureGroupSpec {
			focus: Some(305),
			exposure: Some(3000),
			source: ImageSource::Filename("g.jpg".to_string()),
			roi_filter: Some(vec![2]),
		}];
		let (results, _) = orchestrator
			.run("s3", "p", &rois(), &[], groups, CancellationToken::new())
			.await
			.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].roi_id, 2);
	}

	#[tokio::test]
	async fn cancelled_token_skips_work() {
		let (_tmp, shared, orchestrator) = setup();
		write_frame(&shared, "s4", "g.jpg", [250, 10, 10]);

		let cancel = CancellationToken::new();
		cancel.cancel();
		let groups = vec![CaptureGroupSpec {
			focus: Some(305),
			exposure: Some(3000),
			source: ImageSource::Filename("g.jpg".to_string()),
			roi_filter: None,
		}];
		let (results, _) = orchestrator
			.run("s4", "p", &rois(), &[], groups, cancel)
			.await
			.unwrap();
		assert!(results.is_empty());
	}
}
