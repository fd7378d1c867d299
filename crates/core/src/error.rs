use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
	#[error("{0} not found")]
	NotFound(String),

	#[error("collaborator unavailable: {0}")]
	Unavailable(String),

	#[error("collaborator rejected request: {0}")]
	Rejected(String),
}

impl CollaboratorError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, CollaboratorError::NotFound(_))
	}
}

#[derive(Debug, Error)]
pub enum Error {
	/// A precondition failed before any exchange with the device.
	#[error("{0}")]
	Validation(String),

	#[error("device {client_id}: unknown maintenance task '{task}'")]
	UnknownTask { client_id: String, task: String },

	#[error("{workflow} failed: {reason}")]
	Workflow { workflow: &'static str, reason: String },

	#[error(transparent)]
	Collaborator(#[from] CollaboratorError),

	#[error(transparent)]
	Runtime(#[from] rps_runtime::Error),

	#[error(transparent)]
	Protocol(#[from] rps_protocol::Error),
}

impl Error {
	pub fn validation(message: impl Into<String>) -> Self {
		Error::Validation(message.into())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
