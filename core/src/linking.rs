//! Barcode linking client
//!
//! Every canonical device barcode is pushed through an external linking
//! service that maps raw scanned/entered values onto plant identifiers.
//! The call is strictly best-effort: timeouts and failures keep the
//! pre-link value and never fail an inspection.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait BarcodeLinker: Send + Sync {
	/// Transform a raw barcode into its linked identifier
	async fn link(&self, raw: &str) -> CoreResult<String>;
}

/// Linker used when no linking service is configured: every barcode links
/// to itself
pub struct NoopLinker;

#[async_trait]
impl BarcodeLinker for NoopLinker {
	async fn link(&self, raw: &str) -> CoreResult<String> {
		Ok(raw.to_string())
	}
}

/// HTTP client for the plant linking service
pub struct HttpBarcodeLinker {
	client: reqwest::Client,
	endpoint: String,
}

impl HttpBarcodeLinker {
	pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| CoreError::External(e.to_string()))?;
		Ok(Self {
			client,
			endpoint: format!(
				"{}/api/ProcessLock/FA/GetLinkData",
				base_url.trim_end_matches('/')
			),
		})
	}
}

#[async_trait]
impl BarcodeLinker for HttpBarcodeLinker {
	async fn link(&self, raw: &str) -> CoreResult<String> {
		let response = self
			.client
			.post(&self.endpoint)
			.json(&serde_json::json!({ "barcode": raw }))
			.send()
			.await
			.map_err(|e| CoreError::External(format!("linking request failed: {e}")))?
			.error_for_status()
			.map_err(|e| CoreError::External(format!("linking service rejected call: {e}")))?;

		let body = response
			.text()
			.await
			.map_err(|e| CoreError::External(format!("linking response unreadable: {e}")))?;

		// The service answers either with a bare string or a small JSON
		// envelope; accept both
		let linked = match serde_json::from_str::<Value>(&body) {
			Ok(Value::String(s)) => s,
			Ok(value) => value
				.get("linked_barcode")
				.or_else(|| value.get("data"))
				.and_then(Value::as_str)
				.map(str::to_string)
				.ok_or_else(|| {
					CoreError::External("linking response carried no barcode".to_string())
				})?,
			Err(_) => body.trim().trim_matches('"').to_string(),
		};

		if linked.is_empty() {
			return Err(CoreError::External("linking returned an empty value".to_string()));
		}
		debug!("Linked barcode {raw} -> {linked}");
		Ok(linked)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn noop_linker_is_identity() {
		assert_eq!(NoopLinker.link("RAW-123").await.unwrap(), "RAW-123");
	}

	#[test]
	fn endpoint_is_joined_without_double_slashes() {
		let timeout = Duration::from_secs(5);
		let linker = HttpBarcodeLinker::new("http://10.0.0.5:5000/", timeout).unwrap();
		assert_eq!(
			linker.endpoint,
			"http://10.0.0.5:5000/api/ProcessLock/FA/GetLinkData"
		);
		let linker = HttpBarcodeLinker::new("http://link.local", timeout).unwrap();
		assert_eq!(
			linker.endpoint,
			"http://link.local/api/ProcessLock/FA/GetLinkData"
		);
	}
}
