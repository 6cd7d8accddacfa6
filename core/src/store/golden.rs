//! Golden sample library
//!
//! Versioned reference-image store for Compare ROIs. Every ROI owns one
//! directory holding at most one `best_golden.jpg` plus any number of
//! `original_<ts>[_old_best].jpg` alternatives. All mutations back the
//! current best up before touching it, so a crash mid-sequence leaves a
//! recoverable file rather than a missing best.
//!
//! Operations on the same ROI directory are serialized through a
//! per-directory mutex; different directories proceed in parallel.

use crate::error::{CoreError, CoreResult};
use crate::infra::shared_fs::SharedFolder;
use crate::store::ProductStore;
use base64::Engine;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const BEST_GOLDEN: &str = "best_golden.jpg";

/// Listing entry for one golden sample file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenSampleInfo {
	pub name: String,
	#[serde(rename = "type")]
	pub sample_type: String,
	pub is_best: bool,
	pub created_time: String,
	pub file_size: u64,
	pub file_path: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub image_data: Option<String>,
}

/// Per-product golden sample statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenProductSummary {
	pub product_name: String,
	pub total_rois: usize,
	pub total_samples: usize,
	pub total_size: u64,
	pub rois: Vec<u32>,
}

pub struct GoldenLibrary {
	shared: SharedFolder,
	dir_locks: Mutex<HashMap<(String, u32), Arc<Mutex<()>>>>,
	rename_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GoldenLibrary {
	pub fn new(shared: SharedFolder) -> Self {
		Self {
			shared,
			dir_locks: Mutex::new(HashMap::new()),
			rename_locks: Mutex::new(HashMap::new()),
		}
	}

	pub fn roi_dir(&self, product: &str, roi_id: u32) -> PathBuf {
		self.shared
			.product_dir(product)
			.join("golden_rois")
			.join(format!("roi_{roi_id}"))
	}

	async fn dir_lock(&self, product: &str, roi_id: u32) -> Arc<Mutex<()>> {
		self.dir_locks
			.lock()
			.await
			.entry((product.to_string(), roi_id))
			.or_default()
			.clone()
	}

	async fn rename_lock(&self, product: &str) -> Arc<Mutex<()>> {
		self.rename_locks
			.lock()
			.await
			.entry(product.to_string())
			.or_default()
			.clone()
	}

	/// Save new golden bytes as `best_golden.jpg`, backing up any current
	/// best first. Returns the backup name, if one was made.
	pub async fn save(&self, product: &str, roi_id: u32, bytes: &[u8]) -> CoreResult<Option<String>> {
		ProductStore::check_name(product)?;
		let lock = self.dir_lock(product, roi_id).await;
		let _guard = lock.lock().await;

		let dir = self.roi_dir(product, roi_id);
		fs::create_dir_all(&dir)?;

		let backup = backup_current_best(&dir)?;
		fs::write(dir.join(BEST_GOLDEN), bytes)?;

		info!("Saved golden sample for product {product}, ROI {roi_id}");
		Ok(backup)
	}

	/// All golden files for a ROI, best first, in the scan order Compare uses
	pub async fn ordered_files(&self, product: &str, roi_id: u32) -> CoreResult<Vec<PathBuf>> {
		let dir = self.roi_dir(product, roi_id);
		Ok(ordered_jpgs(&dir)?)
	}

	/// List golden samples best-first, optionally inlining base64 payloads
	pub async fn list(
		&self,
		product: &str,
		roi_id: u32,
		include_images: bool,
	) -> CoreResult<Vec<GoldenSampleInfo>> {
		ProductStore::check_name(product)?;
		let dir = self.roi_dir(product, roi_id);
		let mut samples = Vec::new();
		for path in ordered_jpgs(&dir)? {
			let name = file_name(&path);
			let meta = fs::metadata(&path)?;
			let created: DateTime<Local> = meta
				.created()
				.or_else(|_| meta.modified())
				.map(DateTime::from)
				.unwrap_or_else(|_| Local::now());
			let is_best = name == BEST_GOLDEN;

			let image_data = if include_images {
				match fs::read(&path) {
					Ok(bytes) => Some(format!(
						"data:image/jpeg;base64,{}",
						base64::engine::general_purpose::STANDARD.encode(bytes)
					)),
					Err(e) => {
						warn!("Failed to read golden sample image {name}: {e}");
						None
					}
				}
			} else {
				None
			};

			samples.push(GoldenSampleInfo {
				sample_type: if is_best { "best_golden" } else { "alternative" }.to_string(),
				is_best,
				created_time: created.format("%Y-%m-%d %H:%M:%S").to_string(),
				file_size: meta.len(),
				file_path: self.shared.golden_client_path(product, roi_id, &name),
				image_data,
				name,
			});
		}
		Ok(samples)
	}

	/// Resolve a download request to an on-disk file, refusing traversal
	pub async fn download_path(
		&self,
		product: &str,
		roi_id: u32,
		filename: &str,
	) -> CoreResult<PathBuf> {
		ProductStore::check_name(product)?;
		check_filename(filename)?;
		let path = self.roi_dir(product, roi_id).join(filename);
		if !path.exists() {
			return Err(CoreError::not_found("golden sample file"));
		}
		Ok(path)
	}

	/// Make a named alternative the new best: back up the current best,
	/// then copy the alternative over `best_golden.jpg`
	pub async fn promote(&self, product: &str, roi_id: u32, sample_name: &str) -> CoreResult<()> {
		ProductStore::check_name(product)?;
		check_filename(sample_name)?;
		let lock = self.dir_lock(product, roi_id).await;
		let _guard = lock.lock().await;

		let dir = self.roi_dir(product, roi_id);
		if !dir.exists() {
			return Err(CoreError::not_found("golden ROI directory"));
		}
		let sample = dir.join(sample_name);
		if !sample.exists() {
			return Err(CoreError::not_found("sample file"));
		}
		if sample_name == BEST_GOLDEN {
			// Already the best; nothing to do
			return Ok(());
		}

		backup_current_best(&dir)?;
		fs::copy(&sample, dir.join(BEST_GOLDEN))?;
		info!("Promoted {sample_name} to best golden for product {product}, ROI {roi_id}");
		Ok(())
	}

	/// Restore a backed-up best (`original_<ts>_old_best.jpg`) into
	/// `best_golden.jpg`, backing the current best up first
	pub async fn restore(&self, product: &str, roi_id: u32, backup_name: &str) -> CoreResult<Option<String>> {
		ProductStore::check_name(product)?;
		check_filename(backup_name)?;
		if !backup_name.starts_with("original_") || !backup_name.ends_with("_old_best.jpg") {
			return Err(CoreError::validation(
				"Invalid backup filename format. Must be original_*_old_best.jpg",
			));
		}

		let lock = self.dir_lock(product, roi_id).await;
		let _guard = lock.lock().await;

		let dir = self.roi_dir(product, roi_id);
		if !dir.exists() {
			return Err(CoreError::not_found("golden ROI directory"));
		}
		let backup = dir.join(backup_name);
		if !backup.exists() {
			return Err(CoreError::not_found(format!("backup file '{backup_name}'")));
		}

		let displaced = backup_current_best(&dir)?;
		fs::copy(&backup, dir.join(BEST_GOLDEN))?;
		info!("Restored {backup_name} to best golden for product {product}, ROI {roi_id}");
		Ok(displaced)
	}

	/// Delete one golden sample. Refused when it would leave the directory
	/// empty; every Compare ROI keeps at least one reference image.
	pub async fn delete(&self, product: &str, roi_id: u32, sample_name: &str) -> CoreResult<()> {
		ProductStore::check_name(product)?;
		check_filename(sample_name)?;
		let lock = self.dir_lock(product, roi_id).await;
		let _guard = lock.lock().await;

		let dir = self.roi_dir(product, roi_id);
		let files = ordered_jpgs(&dir)?;
		let target = dir.join(sample_name);
		if !target.exists() {
			return Err(CoreError::not_found("sample file"));
		}
		if files.len() <= 1 {
			return Err(CoreError::validation(
				"Cannot delete the only golden sample. Add alternatives first.",
			));
		}

		fs::remove_file(&target)?;
		info!("Deleted golden sample {sample_name} for product {product}, ROI {roi_id}");
		Ok(())
	}

	/// Apply an `{old_idx → new_idx}` folder mapping in two phases through a
	/// temporary suffix, so chains and swaps never collide
	pub async fn rename_folders(
		&self,
		product: &str,
		mapping: &HashMap<u32, u32>,
	) -> CoreResult<usize> {
		const TEMP_SUFFIX: &str = "_temp_rename";

		ProductStore::check_name(product)?;
		let lock = self.rename_lock(product).await;
		let _guard = lock.lock().await;

		let golden_dir = self.shared.product_dir(product).join("golden_rois");
		if !golden_dir.exists() {
			info!("No golden ROIs directory found for product {product}");
			return Ok(0);
		}

		// Phase one: move every source out of the way
		let mut staged: Vec<(PathBuf, u32)> = Vec::new();
		for (old_id, new_id) in mapping {
			if old_id == new_id {
				continue;
			}
			let source = golden_dir.join(format!("roi_{old_id}"));
			if source.exists() {
				let temp = golden_dir.join(format!("roi_{old_id}{TEMP_SUFFIX}"));
				fs::rename(&source, &temp)?;
				staged.push((temp, *new_id));
			}
		}

		// Phase two: land each staged folder on its final name
		let mut renamed = 0;
		for (temp, new_id) in staged {
			let target = golden_dir.join(format!("roi_{new_id}"));
			if target.exists() {
				fs::remove_dir_all(&target)?;
			}
			fs::rename(&temp, &target)?;
			renamed += 1;
		}

		info!("Renamed {renamed} golden sample folders for product {product}");
		Ok(renamed)
	}

	/// Summary of every product that has golden samples on disk
	pub async fn product_summaries(&self) -> CoreResult<Vec<GoldenProductSummary>> {
		let products_dir = self.shared.products_dir();
		let mut summaries = Vec::new();
		if !products_dir.exists() {
			return Ok(summaries);
		}
		for entry in fs::read_dir(&products_dir)? {
			let entry = entry?;
			if !entry.path().is_dir() {
				continue;
			}
			let product = entry.file_name().to_string_lossy().to_string();
			let golden_dir = entry.path().join("golden_rois");
			if !golden_dir.exists() {
				continue;
			}

			let mut rois = Vec::new();
			let mut total_samples = 0;
			let mut total_size = 0;
			for roi_entry in fs::read_dir(&golden_dir)? {
				let roi_entry = roi_entry?;
				let dir_name = roi_entry.file_name().to_string_lossy().to_string();
				let Some(id) = dir_name
					.strip_prefix("roi_")
					.and_then(|s| s.parse::<u32>().ok())
				else {
					continue;
				};
				let files = ordered_jpgs(&roi_entry.path())?;
				if files.is_empty() {
					continue;
				}
				rois.push(id);
				total_samples += files.len();
				for file in &files {
					total_size += fs::metadata(file).map(|m| m.len()).unwrap_or(0);
				}
			}
			if rois.is_empty() {
				continue;
			}
			rois.sort_unstable();
			summaries.push(GoldenProductSummary {
				product_name: product,
				total_rois: rois.len(),
				total_samples,
				total_size,
				rois,
			});
		}
		summaries.sort_by(|a, b| a.product_name.cmp(&b.product_name));
		Ok(summaries)
	}
}

/// Rename the current best (if any) to `original_<ts>_old_best.jpg`.
/// Bumps the timestamp when two backups land within the same second.
fn backup_current_best(dir: &Path) -> CoreResult<Option<String>> {
	let best = dir.join(BEST_GOLDEN);
	if !best.exists() {
		return Ok(None);
	}
	let mut ts = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map_err(|e| CoreError::internal(e))?
		.as_secs();
	let mut backup_name = format!("original_{ts}_old_best.jpg");
	while dir.join(&backup_name).exists() {
		ts += 1;
		backup_name = format!("original_{ts}_old_best.jpg");
	}
	fs::rename(&best, dir.join(&backup_name))?;
	info!("Backed up previous best golden as {backup_name}");
	Ok(Some(backup_name))
}

/// All `.jpg` files in a directory, best first, then by name
fn ordered_jpgs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
	let mut files = Vec::new();
	if !dir.exists() {
		return Ok(files);
	}
	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.extension().is_some_and(|ext| ext == "jpg") {
			files.push(path);
		}
	}
	files.sort_by_key(|p| {
		let name = file_name(p);
		(name != BEST_GOLDEN, name)
	});
	Ok(files)
}

fn file_name(path: &Path) -> String {
	path.file_name()
		.map(|n| n.to_string_lossy().to_string())
		.unwrap_or_default()
}

fn check_filename(filename: &str) -> CoreResult<()> {
	if filename.is_empty() || filename.contains("..") || filename.contains('/') || filename.contains('\\') {
		return Err(CoreError::validation("Invalid filename"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn library() -> (tempfile::TempDir, GoldenLibrary) {
		let tmp = tempfile::tempdir().unwrap();
		let shared = SharedFolder::new(
			tmp.path().to_path_buf(),
			"/mnt/visual-aoi-shared/".to_string(),
		);
		(tmp, GoldenLibrary::new(shared))
	}

	fn best_count(dir: &Path) -> usize {
		ordered_jpgs(dir)
			.unwrap()
			.iter()
			.filter(|p| file_name(p) == BEST_GOLDEN)
			.count()
	}

	#[tokio::test]
	async fn save_twice_keeps_new_best_and_one_backup() {
		let (_tmp, lib) = library();
		assert!(lib.save("demoA", 2, b"B1").await.unwrap().is_none());
		let backup = lib.save("demoA", 2, b"B2").await.unwrap().unwrap();
		assert!(backup.starts_with("original_") && backup.ends_with("_old_best.jpg"));

		let dir = lib.roi_dir("demoA", 2);
		assert_eq!(fs::read(dir.join(BEST_GOLDEN)).unwrap(), b"B2");
		assert_eq!(fs::read(dir.join(&backup)).unwrap(), b"B1");
		assert_eq!(ordered_jpgs(&dir).unwrap().len(), 2);
		assert_eq!(best_count(&dir), 1);
	}

	#[tokio::test]
	async fn list_is_best_first_with_client_paths() {
		let (_tmp, lib) = library();
		lib.save("p", 1, b"old").await.unwrap();
		lib.save("p", 1, b"new").await.unwrap();

		let samples = lib.list("p", 1, false).await.unwrap();
		assert_eq!(samples.len(), 2);
		assert!(samples[0].is_best);
		assert_eq!(samples[0].sample_type, "best_golden");
		assert_eq!(
			samples[0].file_path,
			"/mnt/visual-aoi-shared/golden/p/roi_1/best_golden.jpg"
		);
		assert!(samples[0].image_data.is_none());
		assert!(!samples[1].is_best);

		let with_images = lib.list("p", 1, true).await.unwrap();
		assert!(with_images[0]
			.image_data
			.as_deref()
			.unwrap()
			.starts_with("data:image/jpeg;base64,"));
	}

	#[tokio::test]
	async fn promote_then_restore_returns_original_best() {
		let (_tmp, lib) = library();
		lib.save("p", 3, b"first-best").await.unwrap();
		let backup = lib.save("p", 3, b"second-best").await.unwrap().unwrap();
		let dir = lib.roi_dir("p", 3);

		// Promote the backed-up first image
		lib.promote("p", 3, &backup).await.unwrap();
		assert_eq!(fs::read(dir.join(BEST_GOLDEN)).unwrap(), b"first-best");
		assert_eq!(best_count(&dir), 1);

		// The displaced best is itself recoverable
		let displaced = lib
			.list("p", 3, false)
			.await
			.unwrap()
			.into_iter()
			.find(|s| !s.is_best && s.name.ends_with("_old_best.jpg"))
			.map(|s| s.name)
			.unwrap();
		lib.restore("p", 3, &displaced).await.unwrap();
		assert_eq!(fs::read(dir.join(BEST_GOLDEN)).unwrap(), b"second-best");
		assert_eq!(best_count(&dir), 1);
	}

	#[tokio::test]
	async fn restore_rejects_non_backup_names() {
		let (_tmp, lib) = library();
		lib.save("p", 4, b"x").await.unwrap();
		assert!(lib.restore("p", 4, "best_golden.jpg").await.is_err());
		assert!(lib.restore("p", 4, "../evil.jpg").await.is_err());
	}

	#[tokio::test]
	async fn deleting_the_only_sample_fails() {
		let (_tmp, lib) = library();
		lib.save("p", 5, b"only").await.unwrap();
		let err = lib.delete("p", 5, BEST_GOLDEN).await.unwrap_err();
		assert!(matches!(err, CoreError::Validation { .. }));

		lib.save("p", 5, b"newer").await.unwrap();
		let alternative = lib
			.list("p", 5, false)
			.await
			.unwrap()
			.into_iter()
			.find(|s| !s.is_best)
			.unwrap();
		lib.delete("p", 5, &alternative.name).await.unwrap();
		assert_eq!(ordered_jpgs(&lib.roi_dir("p", 5)).unwrap().len(), 1);
	}

	#[tokio::test]
	async fn rename_folders_handles_shifted_chains() {
		let (_tmp, lib) = library();
		lib.save("p", 2, b"two").await.unwrap();
		lib.save("p", 3, b"three").await.unwrap();

		// ROI 1 was deleted; 2→1, 3→2
		let mapping = HashMap::from([(2, 1), (3, 2)]);
		let renamed = lib.rename_folders("p", &mapping).await.unwrap();
		assert_eq!(renamed, 2);

		let read_best =
			|id: u32| fs::read(lib.roi_dir("p", id).join(BEST_GOLDEN)).unwrap();
		assert_eq!(read_best(1), b"two");
		assert_eq!(read_best(2), b"three");
		assert!(!lib.roi_dir("p", 3).exists());
	}

	#[tokio::test]
	async fn rename_overwrites_stale_destinations() {
		let (_tmp, lib) = library();
		lib.save("p", 7, b"keep").await.unwrap();
		lib.save("p", 8, b"stale").await.unwrap();

		let renamed = lib
			.rename_folders("p", &HashMap::from([(7, 8)]))
			.await
			.unwrap();
		assert_eq!(renamed, 1);
		assert_eq!(
			fs::read(lib.roi_dir("p", 8).join(BEST_GOLDEN)).unwrap(),
			b"keep"
		);
		assert!(!lib.roi_dir("p", 7).exists());
	}

	#[tokio::test]
	async fn product_summaries_count_samples() {
		let (_tmp, lib) = library();
		lib.save("alpha", 1, b"a").await.unwrap();
		lib.save("alpha", 2, b"b").await.unwrap();
		lib.save("alpha", 2, b"c").await.unwrap();

		let summaries = lib.product_summaries().await.unwrap();
		assert_eq!(summaries.len(), 1);
		assert_eq!(summaries[0].product_name, "alpha");
		assert_eq!(summaries[0].total_rois, 2);
		assert_eq!(summaries[0].total_samples, 3);
		assert_eq!(summaries[0].rois, vec![1, 2]);
	}
}
