//! Shared-folder I/O
//!
//! Single mediator between process memory and the disk tree under the
//! configured shared root. The server sees absolute paths below the root;
//! clients see the same files under their mount prefix, so every path that
//! leaves the process goes through [`SharedFolder::to_client_path`].

use crate::error::{CoreError, CoreResult};
use crate::infra::codec;
use image::RgbImage;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where an inspection request's image comes from, in resolution priority
/// order: absolute path, then session-relative filename, then inline base64
#[derive(Debug, Clone)]
pub enum ImageSource {
	Path(String),
	Filename(String),
	Base64(String),
}

impl ImageSource {
	/// Pull the image source out of a request body
	pub fn from_request(data: &Value) -> Option<Self> {
		if let Some(path) = data.get("image_path").and_then(Value::as_str) {
			return Some(Self::Path(path.to_string()));
		}
		if let Some(name) = data.get("image_filename").and_then(Value::as_str) {
			return Some(Self::Filename(name.to_string()));
		}
		data.get("image")
			.and_then(Value::as_str)
			.map(|b64| Self::Base64(b64.to_string()))
	}
}

/// Handle on the shared folder tree
#[derive(Debug, Clone)]
pub struct SharedFolder {
	root: PathBuf,
	client_mount: String,
}

impl SharedFolder {
	pub fn new(root: PathBuf, client_mount: String) -> Self {
		let client_mount = if client_mount.ends_with('/') {
			client_mount
		} else {
			format!("{client_mount}/")
		};
		Self { root, client_mount }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn sessions_dir(&self) -> PathBuf {
		self.root.join("sessions")
	}

	pub fn session_dir(&self, session_id: &str) -> PathBuf {
		self.sessions_dir().join(session_id)
	}

	pub fn session_input_dir(&self, session_id: &str) -> PathBuf {
		self.session_dir(session_id).join("input")
	}

	pub fn session_output_dir(&self, session_id: &str) -> PathBuf {
		self.session_dir(session_id).join("output")
	}

	pub fn products_dir(&self) -> PathBuf {
		self.root.join("config").join("products")
	}

	pub fn product_dir(&self, product: &str) -> PathBuf {
		self.products_dir().join(product)
	}

	/// Session ids are path segments; only the uuid alphabet is allowed
	fn check_session_id(session_id: &str) -> CoreResult<()> {
		if session_id.is_empty()
			|| !session_id
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '-')
		{
			return Err(CoreError::validation(format!("invalid session id: {session_id}")));
		}
		Ok(())
	}

	/// Create a fresh `input/` + `output/` workspace, wiping any leftover
	/// directory from a recycled session id first
	pub fn create_session_workspace(&self, session_id: &str) -> CoreResult<()> {
		Self::check_session_id(session_id)?;
		let dir = self.session_dir(session_id);
		if dir.exists() {
			info!("Cleaning up existing session directory: {session_id}");
			fs::remove_dir_all(&dir)?;
		}
		fs::create_dir_all(dir.join("input"))?;
		fs::create_dir_all(dir.join("output"))?;
		debug!("Created fresh session directories for {session_id}");
		Ok(())
	}

	/// Remove a session workspace. Idempotent; a missing directory is fine.
	pub fn remove_session_workspace(&self, session_id: &str) -> CoreResult<()> {
		Self::check_session_id(session_id)?;
		let dir = self.session_dir(session_id);
		if dir.exists() {
			fs::remove_dir_all(&dir)?;
		}
		Ok(())
	}

	/// Rewrite an absolute server path into the client's view of the mount.
	/// Returns `None` for paths outside the shared root.
	pub fn to_client_path(&self, path: &Path) -> Option<String> {
		let relative = path.strip_prefix(&self.root).ok()?;
		Some(format!(
			"{}{}",
			self.client_mount,
			relative.to_string_lossy().replace('\\', "/")
		))
	}

	/// Rewrite a client-mount path into the server-side absolute path;
	/// other paths are taken as already server-absolute
	pub fn from_client_path(&self, path: &str) -> PathBuf {
		match path.strip_prefix(&self.client_mount) {
			Some(rest) => self.root.join(rest),
			None => PathBuf::from(path),
		}
	}

	/// Client-visible path of a golden sample file
	pub fn golden_client_path(&self, product: &str, roi_id: u32, filename: &str) -> String {
		format!(
			"{}golden/{product}/roi_{roi_id}/{filename}",
			self.client_mount
		)
	}

	/// Load an inspection input image, resolving the source in priority order
	pub fn load_image(&self, session_id: &str, source: &ImageSource) -> CoreResult<RgbImage> {
		match source {
			ImageSource::Path(path) => {
				let server_path = self.from_client_path(path);
				debug!("Loading input image from absolute path {server_path:?}");
				codec::decode_file(&server_path)
			}
			ImageSource::Filename(name) => {
				if name.contains("..") || name.contains('/') || name.contains('\\') {
					return Err(CoreError::validation(format!("invalid image filename: {name}")));
				}
				let path = self.session_input_dir(session_id).join(name);
				debug!("Loading input image from session file {path:?}");
				codec::decode_file(&path)
			}
			ImageSource::Base64(data) => {
				warn!("Loading input image from base64 data; prefer file paths");
				codec::decode_base64(data)
			}
		}
	}

	/// Persist an exported crop under `sessions/<id>/output/` and return the
	/// client-visible path. Callers treat failures as non-fatal.
	pub fn save_output_image(
		&self,
		session_id: &str,
		filename: &str,
		image: &RgbImage,
	) -> CoreResult<String> {
		let out_dir = self.session_output_dir(session_id);
		fs::create_dir_all(&out_dir)?;
		let path = out_dir.join(filename);
		fs::write(&path, codec::encode_jpeg(image)?)?;
		self.to_client_path(&path)
			.ok_or_else(|| CoreError::internal("output path escaped the shared root"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::RgbImage;
	use serde_json::json;

	fn shared() -> (tempfile::TempDir, SharedFolder) {
		let tmp = tempfile::tempdir().unwrap();
		let folder = SharedFolder::new(
			tmp.path().to_path_buf(),
			"/mnt/visual-aoi-shared/".to_string(),
		);
		(tmp, folder)
	}

	#[test]
	fn workspace_create_is_fresh_and_remove_is_idempotent() {
		let (_tmp, folder) = shared();
		folder.create_session_workspace("abc").unwrap();
		let stale = folder.session_input_dir("abc").join("old.jpg");
		fs::write(&stale, b"stale").unwrap();

		folder.create_session_workspace("abc").unwrap();
		assert!(!stale.exists());
		assert!(folder.session_output_dir("abc").exists());

		folder.remove_session_workspace("abc").unwrap();
		folder.remove_session_workspace("abc").unwrap();
		assert!(!folder.session_dir("abc").exists());
	}

	#[test]
	fn paths_round_trip_through_the_client_mount() {
		let (_tmp, folder) = shared();
		let server = folder.session_output_dir("s1").join("roi_3.jpg");
		let client = folder.to_client_path(&server).unwrap();
		assert_eq!(client, "/mnt/visual-aoi-shared/sessions/s1/output/roi_3.jpg");
		assert_eq!(folder.from_client_path(&client), server);

		// Paths outside the root never leak a mount prefix
		assert!(folder.to_client_path(Path::new("/etc/passwd")).is_none());
	}

	#[test]
	fn image_source_priority_is_path_then_filename_then_base64() {
		let body = json!({
			"image": "xxx",
			"image_filename": "f.jpg",
			"image_path": "/mnt/visual-aoi-shared/sessions/s/captures/c.jpg"
		});
		assert!(matches!(
			ImageSource::from_request(&body),
			Some(ImageSource::Path(_))
		));

		let body = json!({ "image": "xxx", "image_filename": "f.jpg" });
		assert!(matches!(
			ImageSource::from_request(&body),
			Some(ImageSource::Filename(_))
		));

		let body = json!({ "image": "xxx" });
		assert!(matches!(
			ImageSource::from_request(&body),
			Some(ImageSource::Base64(_))
		));

		assert!(ImageSource::from_request(&json!({})).is_none());
	}

	#[test]
	fn missing_input_file_is_not_found() {
		let (_tmp, folder) = shared();
		folder.create_session_workspace("s2").unwrap();
		let err = folder
			.load_image("s2", &ImageSource::Filename("nope.jpg".to_string()))
			.unwrap_err();
		assert!(err.is_client_error());
	}

	#[test]
	fn traversal_in_session_ids_is_rejected() {
		let (_tmp, folder) = shared();
		assert!(folder.create_session_workspace("../evil").is_err());
		assert!(folder.remove_session_workspace("..").is_err());
		assert!(folder
			.create_session_workspace("0a1b2c3d-aaaa-bbbb-cccc-000011112222")
			.is_ok());
	}

	#[test]
	fn traversal_in_image_filename_is_rejected() {
		let (_tmp, folder) = shared();
		let err = folder
			.load_image("s3", &ImageSource::Filename("../../etc/passwd".to_string()))
			.unwrap_err();
		assert!(matches!(err, CoreError::Validation { .. }));
	}

	#[test]
	fn output_image_lands_under_the_session_and_reports_client_path() {
		let (_tmp, folder) = shared();
		let img = RgbImage::new(4, 4);
		let client = folder.save_output_image("s4", "roi_1.jpg", &img).unwrap();
		assert_eq!(client, "/mnt/visual-aoi-shared/sessions/s4/output/roi_1.jpg");
		assert!(folder.session_output_dir("s4").join("roi_1.jpg").exists());
	}
}
