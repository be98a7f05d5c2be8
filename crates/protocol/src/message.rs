//! Request and response documents exchanged with the device helper.
//!
//! Requests are a single JSON object followed by a newline. Responses carry no
//! request identifier; they are matched to requests by order only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::StatusKind;

/// Top-level command discriminator (`cmd` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
	/// Run a named helper action with parameters.
	Action,
	/// Ask the helper to exit its socket loop.
	Shutdown,
}

impl CommandKind {
	pub fn as_str(self) -> &'static str {
		match self {
			CommandKind::Action => "action",
			CommandKind::Shutdown => "shutdown",
		}
	}
}

/// Outbound command: `{"cmd": <kind>, ...extra}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperRequest {
	pub cmd: CommandKind,
	/// Extra top-level fields merged next to `cmd` (e.g. `action`, `params`).
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl HelperRequest {
	pub fn new(cmd: CommandKind) -> Self {
		Self { cmd, extra: Map::new() }
	}

	/// Builds an `action` request with its parameter object.
	pub fn action(action: &str, params: Value) -> Self {
		let mut extra = Map::new();
		extra.insert("action".to_string(), Value::String(action.to_string()));
		extra.insert("params".to_string(), params);
		Self { cmd: CommandKind::Action, extra }
	}

	pub fn shutdown() -> Self {
		Self::new(CommandKind::Shutdown)
	}

	/// Returns the action name if this is an action request.
	pub fn action_name(&self) -> Option<&str> {
		self.extra.get("action").and_then(Value::as_str)
	}

	/// Serializes the request as one protocol line, newline included.
	pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
		let mut line = serde_json::to_vec(self)?;
		line.push(b'\n');
		Ok(line)
	}
}

/// Inbound reply document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperResponse {
	pub status: i64,
	#[serde(default)]
	pub value: Value,
}

impl HelperResponse {
	/// Interprets an arbitrary parsed document as a response.
	///
	/// A document without an integer `status` is reported as
	/// [`StatusKind::UnknownError`].
	pub fn from_document(doc: Value) -> Self {
		let status = doc
			.get("status")
			.and_then(Value::as_i64)
			.unwrap_or(StatusKind::UnknownError.code());
		let value = match doc {
			Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
			other => other,
		};
		Self { status, value }
	}

	pub fn is_success(&self) -> bool {
		self.status == StatusKind::Success.code()
	}

	pub fn kind(&self) -> StatusKind {
		StatusKind::from_code(self.status)
	}

	/// Human readable message carried by a failed response.
	pub fn message(&self) -> String {
		match &self.value {
			Value::String(s) => s.clone(),
			Value::Object(map) => map
				.get("message")
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| self.value.to_string()),
			Value::Null => self.kind().default_message().to_string(),
			other => other.to_string(),
		}
	}
}
