//! Error taxonomy shared across the inspection core

use std::fmt;
use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T = ()> = Result<T, CoreError>;

/// Errors that can occur inside the inspection core
#[derive(Debug, Error)]
pub enum CoreError {
	/// A session, product, ROI or file does not exist
	#[error("{0} not found")]
	NotFound(String),

	/// Schema, field-bound or type/field-coupling violation
	#[error("validation failed: {message}")]
	Validation {
		message: String,
		/// Per-item messages for batch validation (e.g. one per rejected ROI)
		details: Vec<String>,
	},

	/// Parallel inspection on the same session, duplicate product, or a
	/// rename attempted while inspections are in flight
	#[error("{0}")]
	Conflict(String),

	/// An analyzer capability is missing and simulation is disabled
	#[error("capability unavailable: {0}")]
	Unavailable(String),

	/// Shared-folder I/O failure
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Image decode/encode failure
	#[error("image codec error: {0}")]
	Codec(#[from] image::ImageError),

	/// Failure talking to an external service (linking, decoder backend)
	#[error("external service error: {0}")]
	External(String),

	/// Everything else
	#[error("internal error: {0}")]
	Internal(String),
}

impl CoreError {
	pub fn not_found<T: fmt::Display>(what: T) -> Self {
		Self::NotFound(what.to_string())
	}

	pub fn validation<T: fmt::Display>(message: T) -> Self {
		Self::Validation {
			message: message.to_string(),
			details: Vec::new(),
		}
	}

	pub fn validation_batch<T: fmt::Display>(message: T, details: Vec<String>) -> Self {
		Self::Validation {
			message: message.to_string(),
			details,
		}
	}

	pub fn conflict<T: fmt::Display>(message: T) -> Self {
		Self::Conflict(message.to_string())
	}

	pub fn internal<T: fmt::Display>(message: T) -> Self {
		Self::Internal(message.to_string())
	}

	/// Whether this error is the caller's fault (4xx territory)
	pub fn is_client_error(&self) -> bool {
		matches!(
			self,
			Self::NotFound(_) | Self::Validation { .. } | Self::Conflict(_)
		)
	}
}

impl From<serde_json::Error> for CoreError {
	fn from(err: serde_json::Error) -> Self {
		Self::validation(format!("invalid JSON: {err}"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_errors_are_distinguished_from_server_errors() {
		assert!(CoreError::not_found("Session").is_client_error());
		assert!(CoreError::validation("bad field").is_client_error());
		assert!(CoreError::conflict("busy").is_client_error());
		assert!(!CoreError::internal("boom").is_client_error());
		assert!(!CoreError::External("timeout".to_string()).is_client_error());
	}

	#[test]
	fn batch_validation_carries_per_item_details() {
		let err = CoreError::validation_batch(
			"ROI validation failed",
			vec!["ROI 0: bad".to_string(), "ROI 2: worse".to_string()],
		);
		match err {
			CoreError::Validation { message, details } => {
				assert_eq!(message, "ROI validation failed");
				assert_eq!(details.len(), 2);
			}
			other => panic!("unexpected error {other:?}"),
		}
	}
}
