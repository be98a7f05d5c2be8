use std::path::PathBuf;

use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("cannot load config {}: {source}", .path.display())]
	Config {
		path: PathBuf,
		#[source]
		source: anyhow::Error,
	},

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Uia(#[from] uia::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Convert this error to a CommandError for structured output
	pub fn to_command_error(&self) -> CommandError {
		let (code, details) = match self {
			CliError::Config { path, .. } => (ErrorCode::InvalidInput, Some(serde_json::json!({ "path": path }))),
			CliError::InvalidInput(_) => (ErrorCode::InvalidInput, None),
			CliError::Io(_) => (ErrorCode::IoError, None),
			CliError::Json(_) => (ErrorCode::InvalidInput, None),
			CliError::Uia(err) => classify(err),
			CliError::Anyhow(_) => (ErrorCode::InternalError, None),
		};

		CommandError {
			code,
			message: self.to_string(),
			details,
		}
	}
}

fn classify(err: &uia::Error) -> (ErrorCode, Option<serde_json::Value>) {
	use uia::Error;

	match err {
		Error::LaunchFailed(_) => (ErrorCode::LaunchFailed, None),
		Error::ConnectionFailed(_) | Error::TransportCrashed(_) => (ErrorCode::TransportError, None),
		Error::TransportTimeout { idle, partial } => (
			ErrorCode::Timeout,
			Some(serde_json::json!({ "idleMs": idle.as_millis() as u64, "partial": partial })),
		),
		Error::Remote { kind, .. } => (
			ErrorCode::RemoteError,
			Some(serde_json::json!({ "status": kind.code(), "kind": kind.to_string() })),
		),
		Error::UnexpectedShutdown(_) | Error::SessionTerminated(_) => (ErrorCode::SessionTerminated, None),
		Error::NoSuchContext(context) | Error::ProxyAlreadyActive(context) => {
			(ErrorCode::ContextError, Some(serde_json::json!({ "context": context })))
		}
		Error::UnlockFailed(_) => (ErrorCode::UnlockFailed, None),
		Error::Device(_) => (ErrorCode::DeviceError, None),
		Error::Engine(_) => (ErrorCode::EngineError, None),
		Error::InvalidArgument(_) => (ErrorCode::InvalidInput, None),
		Error::Timeout(_) => (ErrorCode::Timeout, None),
		Error::Io(_) => (ErrorCode::IoError, None),
		Error::InvalidState(_) | Error::Json(_) => (ErrorCode::InternalError, None),
	}
}
