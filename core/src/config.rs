//! Server configuration
//!
//! Long-lived knobs are persisted as `aoi-server.json` under the shared
//! root so a restarted server comes back with the same layout. Transient
//! overrides (bind address, shared root itself) arrive from the CLI.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Current config schema version
const CONFIG_VERSION: u32 = 1;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	/// Config schema version
	pub version: u32,

	/// Root of the shared folder tree (sessions/, config/products/)
	pub shared_root: PathBuf,

	/// Prefix under which clients see the shared root
	pub client_mount: String,

	/// Base URL of the barcode-linking service; linking is disabled when unset
	pub link_base_url: Option<String>,

	/// Timeout for a single linking call, in seconds
	pub link_timeout_secs: u64,

	/// Sessions idle longer than this are swept away
	pub session_idle_timeout_secs: u64,

	/// How often the session sweeper wakes up
	pub sweep_interval_secs: u64,
}

impl ServerConfig {
	/// Load configuration from `<shared_root>/aoi-server.json`, creating a
	/// default file when none exists yet
	pub fn load_or_create(shared_root: &Path) -> CoreResult<Self> {
		let config_path = shared_root.join("aoi-server.json");

		if config_path.exists() {
			info!("Loading config from {config_path:?}");
			let json = fs::read_to_string(&config_path)?;
			let mut config: ServerConfig = serde_json::from_str(&json)?;
			// The file may have been copied from another host
			config.shared_root = shared_root.to_path_buf();
			Ok(config)
		} else {
			warn!("No config found, creating default at {config_path:?}");
			let config = Self::default_with_root(shared_root.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	pub fn default_with_root(shared_root: PathBuf) -> Self {
		Self {
			version: CONFIG_VERSION,
			shared_root,
			client_mount: "/mnt/visual-aoi-shared/".to_string(),
			link_base_url: None,
			link_timeout_secs: 5,
			session_idle_timeout_secs: 3600,
			sweep_interval_secs: 300,
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> CoreResult<()> {
		fs::create_dir_all(&self.shared_root)?;
		let config_path = self.shared_root.join("aoi-server.json");
		fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
		info!("Saved config to {config_path:?}");
		Ok(())
	}

	pub fn sessions_dir(&self) -> PathBuf {
		self.shared_root.join("sessions")
	}

	pub fn products_dir(&self) -> PathBuf {
		self.shared_root.join("config").join("products")
	}

	/// Ensure the shared tree exists
	pub fn ensure_directories(&self) -> CoreResult<()> {
		fs::create_dir_all(self.sessions_dir())?;
		fs::create_dir_all(self.products_dir())?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn load_or_create_persists_defaults_and_reloads() {
		let tmp = tempfile::tempdir().unwrap();
		let config = ServerConfig::load_or_create(tmp.path()).unwrap();
		assert_eq!(config.client_mount, "/mnt/visual-aoi-shared/");
		assert_eq!(config.session_idle_timeout_secs, 3600);
		assert_eq!(config.sweep_interval_secs, 300);
		assert_eq!(config.link_timeout_secs, 5);
		assert!(config.link_base_url.is_none());
		assert!(tmp.path().join("aoi-server.json").exists());

		// A reload sees saved changes
		let mut edited = config.clone();
		edited.link_base_url = Some("http://link.local".to_string());
		edited.save().unwrap();
		let reloaded = ServerConfig::load_or_create(tmp.path()).unwrap();
		assert_eq!(reloaded.link_base_url.as_deref(), Some("http://link.local"));
	}

	#[test]
	fn shared_root_follows_the_actual_location() {
		let tmp = tempfile::tempdir().unwrap();
		ServerConfig::load_or_create(tmp.path()).unwrap();

		// Same file read from a moved tree keeps pointing at the new root
		let moved = tempfile::tempdir().unwrap();
		fs::copy(
			tmp.path().join("aoi-server.json"),
			moved.path().join("aoi-server.json"),
		)
		.unwrap();
		let config = ServerConfig::load_or_create(moved.path()).unwrap();
		assert_eq!(config.shared_root, moved.path());
		assert_eq!(config.sessions_dir(), moved.path().join("sessions"));
		assert_eq!(
			config.products_dir(),
			moved.path().join("config").join("products")
		);
	}
}
