//! Product & ROI configuration store
//!
//! Owns `config/products/<name>/rois_config_<name>.json` and the optional
//! `colors_config_<name>.json` next to it. Inspections only ever read, so
//! every product carries a RW-lock: reads share it, `save`/`create` take it
//! exclusively.

use crate::domain::roi::validate_color_config;
use crate::domain::{ColorConfig, ColorRange, Roi};
use crate::error::{CoreError, CoreResult};
use crate::infra::shared_fs::SharedFolder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Listing entry for one configured product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
	pub product_name: String,
	pub config_file: String,
	pub description: String,
}

/// What a successful `save` did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
	pub saved: usize,
	pub deleted_roi_indices: Vec<u32>,
	pub deleted_roi_folders: Vec<String>,
}

pub struct ProductStore {
	shared: SharedFolder,
	locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ProductStore {
	pub fn new(shared: SharedFolder) -> Self {
		Self {
			shared,
			locks: Mutex::new(HashMap::new()),
		}
	}

	/// Keep only the characters a product name may carry
	pub fn sanitize_name(name: &str) -> CoreResult<String> {
		let cleaned: String = name
			.trim()
			.chars()
			.filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
			.collect();
		if cleaned.is_empty() {
			return Err(CoreError::validation("Invalid product name"));
		}
		Ok(cleaned)
	}

	/// Reject names that would escape the products directory. Names become
	/// path segments, so anything beyond the sanitized alphabet is refused
	/// rather than silently rewritten.
	pub(crate) fn check_name(product: &str) -> CoreResult<()> {
		match Self::sanitize_name(product) {
			Ok(clean) if clean == product => Ok(()),
			_ => Err(CoreError::validation(format!("Invalid product name: {product}"))),
		}
	}

	async fn lock_for(&self, product: &str) -> Arc<RwLock<()>> {
		self.locks
			.lock()
			.await
			.entry(product.to_string())
			.or_default()
			.clone()
	}

	fn config_path(&self, product: &str) -> PathBuf {
		self.shared
			.product_dir(product)
			.join(format!("rois_config_{product}.json"))
	}

	fn colors_path(&self, product: &str) -> PathBuf {
		self.shared
			.product_dir(product)
			.join(format!("colors_config_{product}.json"))
	}

	pub fn exists(&self, product: &str) -> bool {
		self.config_path(product).exists()
	}

	/// Load and normalize the ROI configuration for a product
	pub async fn load(&self, product: &str) -> CoreResult<Vec<Roi>> {
		Self::check_name(product)?;
		let lock = self.lock_for(product).await;
		let _guard = lock.read().await;
		self.load_unlocked(product)
	}

	fn load_unlocked(&self, product: &str) -> CoreResult<Vec<Roi>> {
		let path = self.config_path(product);
		if !path.exists() {
			return Err(CoreError::not_found(format!("product {product}")));
		}
		let raw: Vec<Value> = serde_json::from_str(&fs::read_to_string(&path)?)?;
		let mut rois = Vec::with_capacity(raw.len());
		for (i, value) in raw.iter().enumerate() {
			let roi = Roi::normalize(value).map_err(|e| {
				CoreError::validation(format!("ROI {i} in {product} config: {e}"))
			})?;
			rois.push(roi);
		}
		Ok(rois)
	}

	/// Like [`Self::load`], but a missing product yields an empty list
	pub async fn load_or_empty(&self, product: &str) -> CoreResult<Vec<Roi>> {
		match self.load(product).await {
			Ok(rois) => Ok(rois),
			Err(CoreError::NotFound(_)) => Ok(Vec::new()),
			Err(e) => Err(e),
		}
	}

	/// Validate first, write second, garbage-collect last.
	///
	/// Golden folders of ROIs that disappeared from the config are removed
	/// and reported back; folders of surviving ROIs are never touched.
	pub async fn save(&self, product: &str, new_rois: &[Value]) -> CoreResult<SaveOutcome> {
		Self::check_name(product)?;
		let lock = self.lock_for(product).await;
		let _guard = lock.write().await;

		let mut validated = Vec::with_capacity(new_rois.len());
		let mut errors = Vec::new();
		for (i, value) in new_rois.iter().enumerate() {
			match Roi::normalize(value) {
				Ok(roi) => validated.push(roi),
				Err(e) => {
					let idx = value
						.get("idx")
						.map(|v| v.to_string())
						.unwrap_or_else(|| "unknown".to_string());
					errors.push(format!("ROI {i} (idx={idx}): {e}"));
				}
			}
		}
		if !errors.is_empty() {
			return Err(CoreError::validation_batch("ROI validation failed", errors));
		}

		let mut seen = BTreeSet::new();
		for roi in &validated {
			if !seen.insert(roi.idx) {
				return Err(CoreError::validation(format!(
					"duplicate ROI idx {} in configuration",
					roi.idx
				)));
			}
		}

		let old_indices: BTreeSet<u32> = match self.load_unlocked(product) {
			Ok(old) => old.iter().map(|r| r.idx).collect(),
			Err(CoreError::NotFound(_)) => BTreeSet::new(),
			// A corrupt previous config only costs us the deletion diff
			Err(e) => {
				warn!("Could not load old ROI configuration for {product}: {e}");
				BTreeSet::new()
			}
		};

		let product_dir = self.shared.product_dir(product);
		fs::create_dir_all(&product_dir)?;
		fs::write(
			self.config_path(product),
			serde_json::to_string_pretty(&validated)?,
		)?;

		let deleted_indices: Vec<u32> = old_indices
			.difference(&seen)
			.copied()
			.collect();
		let mut deleted_folders = Vec::new();
		for idx in &deleted_indices {
			let folder = product_dir.join("golden_rois").join(format!("roi_{idx}"));
			if folder.exists() {
				match fs::remove_dir_all(&folder) {
					Ok(()) => {
						info!("Deleted golden ROI folder: {}", folder.display());
						deleted_folders.push(format!("roi_{idx}"));
					}
					Err(e) => warn!("Failed to delete golden ROI folder {}: {e}", folder.display()),
				}
			}
		}

		info!(
			"Saved {} ROIs for product {product}. Deleted ROIs: {deleted_indices:?}",
			validated.len()
		);

		Ok(SaveOutcome {
			saved: validated.len(),
			deleted_roi_indices: deleted_indices,
			deleted_roi_folders: deleted_folders,
		})
	}

	/// Scan `config/products/` for directories holding a matching config file
	pub async fn list(&self) -> CoreResult<Vec<ProductInfo>> {
		let products_dir = self.shared.products_dir();
		let mut products = Vec::new();
		if !products_dir.exists() {
			return Ok(products);
		}
		for entry in fs::read_dir(&products_dir)? {
			let entry = entry?;
			if !entry.path().is_dir() {
				continue;
			}
			let name = entry.file_name().to_string_lossy().to_string();
			let config_file = entry.path().join(format!("rois_config_{name}.json"));
			if config_file.exists() {
				products.push(ProductInfo {
					product_name: name.clone(),
					config_file: config_file.to_string_lossy().to_string(),
					description: format!("Product configuration for {name}"),
				});
			}
		}
		products.sort_by(|a, b| a.product_name.cmp(&b.product_name));
		Ok(products)
	}

	/// Create a product seeded with a Barcode + Compare + OCR ROI per device
	pub async fn create(&self, name: &str, num_devices: u8) -> CoreResult<Vec<Roi>> {
		let product = Self::sanitize_name(name)?;
		if !(1..=4).contains(&num_devices) {
			return Err(CoreError::validation("num_devices must be 1..=4"));
		}

		let lock = self.lock_for(&product).await;
		let _guard = lock.write().await;

		if self.exists(&product) {
			return Err(CoreError::conflict("Product already exists"));
		}

		let rois = default_rois(num_devices);

		let product_dir = self.shared.product_dir(&product);
		fs::create_dir_all(product_dir.join("golden_rois"))?;
		fs::write(
			self.config_path(&product),
			serde_json::to_string_pretty(&rois)?,
		)?;

		info!("Created new product configuration: {product} with {num_devices} device(s)");
		Ok(rois)
	}

	/// ROIs bucketed by their `(focus, exposure)` capture settings
	pub async fn roi_groups(&self, product: &str) -> CoreResult<BTreeMap<(u32, u32), Vec<Roi>>> {
		let rois = self.load(product).await?;
		let mut groups: BTreeMap<(u32, u32), Vec<Roi>> = BTreeMap::new();
		for roi in rois {
			groups.entry((roi.focus, roi.exposure)).or_default().push(roi);
		}
		Ok(groups)
	}

	/// Product-level color ranges; empty when the product has no color config
	pub async fn load_colors(&self, product: &str) -> CoreResult<Vec<ColorRange>> {
		Self::check_name(product)?;
		let lock = self.lock_for(product).await;
		let _guard = lock.read().await;
		let path = self.colors_path(product);
		if !path.exists() {
			return Ok(Vec::new());
		}
		let value: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
		let ranges = value
			.get("color_ranges")
			.cloned()
			.unwrap_or_else(|| Value::Array(Vec::new()));
		Ok(serde_json::from_value(ranges)?)
	}

	pub async fn save_colors(&self, product: &str, ranges: Vec<ColorRange>) -> CoreResult<usize> {
		Self::check_name(product)?;
		validate_color_config(&ColorConfig::Legacy {
			color_ranges: ranges.clone(),
		})
		.map_err(CoreError::validation)?;

		let lock = self.lock_for(product).await;
		let _guard = lock.write().await;

		let product_dir = self.shared.product_dir(product);
		fs::create_dir_all(&product_dir)?;
		let payload = serde_json::json!({
			"product_name": product,
			"color_ranges": ranges,
			"updated_at": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
		});
		fs::write(
			self.colors_path(product),
			serde_json::to_string_pretty(&payload)?,
		)?;
		info!("Saved {} color ranges for product {product}", ranges.len());
		Ok(ranges.len())
	}
}

/// Default seed configuration: Barcode + Compare + OCR per device, laid out
/// in columns like the original commissioning templates
fn default_rois(num_devices: u8) -> Vec<Roi> {
	let mut rois = Vec::new();
	for device in 1..=num_devices as u32 {
		let x = 100 * device;
		let base = serde_json::json!([
			{
				"idx": rois.len() + 1,
				"type": 1,
				"coords": [x, 50, x + 100, 100],
				"focus": 305,
				"exposure": 1200,
				"device_location": device,
				"is_device_barcode": true
			},
			{
				"idx": rois.len() + 2,
				"type": 2,
				"coords": [x, 150, x + 100, 250],
				"focus": 305,
				"exposure": 1200,
				"device_location": device,
				"ai_threshold": 0.93,
				"feature_method": "mobilenet"
			},
			{
				"idx": rois.len() + 3,
				"type": 3,
				"coords": [x, 300, x + 100, 350],
				"focus": 305,
				"exposure": 1200,
				"device_location": device,
				"expected_text": "SAMPLE"
			}
		]);
		for value in base.as_array().unwrap() {
			rois.push(Roi::normalize(value).expect("default ROI template is valid"));
		}
	}
	rois
}
