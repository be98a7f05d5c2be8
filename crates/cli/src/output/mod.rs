//! Structured output envelope for all CLI commands.
//!
//! ## Output Contract
//!
//! Every command produces a result envelope on stdout:
//!
//! ```json
//! {
//!   "ok": true,
//!   "command": "run",
//!   "data": { ... },
//!   "timings": { "durationMs": 1234 }
//! }
//! ```
//!
//! On failure:
//!
//! ```json
//! {
//!   "ok": false,
//!   "command": "run",
//!   "error": {
//!     "code": "CONTEXT_ERROR",
//!     "message": "No such context found: WEBVIEW_io.example",
//!     "details": { ... }
//!   }
//! }
//! ```


use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bumped on breaking changes to the envelope.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// Pretty JSON
	#[default]
	Json,
	/// Newline-delimited JSON
	Ndjson,
	/// TOON output (token-efficient for LLMs)
	Toon,
	/// Human-readable text
	Text,
}

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,

	pub ok: bool,

	/// Command name (e.g., "devices", "run")
	pub command: String,

	/// Device the command ran against
	#[serde(skip_serializing_if = "Option::is_none")]
	pub device: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,

	pub message: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// adb or a device shell command failed
	DeviceError,
	/// The helper never came online
	LaunchFailed,
	/// The helper socket failed
	TransportError,
	/// The helper answered with a nonzero status
	RemoteError,
	/// The requested context does not exist or cannot be entered
	ContextError,
	/// The helper or the active engine died during the session
	SessionTerminated,
	/// The downstream web engine failed
	EngineError,
	/// The lock screen could not be dismissed
	UnlockFailed,
	Timeout,
	InvalidInput,
	IoError,
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match serde_json::to_value(self) {
			Ok(serde_json::Value::String(s)) => f.write_str(&s),
			_ => write!(f, "{self:?}"),
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,

	/// Time spent setting the session up
	#[serde(skip_serializing_if = "Option::is_none")]
	pub setup_ms: Option<u64>,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: duration.as_millis() as u64,
			setup_ms: None,
		}
	}
}

/// Builder for constructing command results
pub struct ResultBuilder<T: Serialize> {
	command: String,
	device: Option<String>,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
	setup_ms: Option<u64>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			device: None,
			data: None,
			error: None,
			start_time: Instant::now(),
			setup_ms: None,
		}
	}

	pub fn device(mut self, serial: impl Into<String>) -> Self {
		self.device = Some(serial.into());
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	pub fn setup_duration(mut self, duration: Duration) -> Self {
		self.setup_ms = Some(duration.as_millis() as u64);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		let mut timings = Timings::from(self.start_time.elapsed());
		timings.setup_ms = self.setup_ms;

		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok,
			command: self.command,
			device: self.device,
			data: self.data,
			error: self.error,
			timings: Some(timings),
		}
	}
}

/// Writes `result` to stdout in `format`.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	let rendered = match format {
		OutputFormat::Json => serde_json::to_string_pretty(result).ok(),
		OutputFormat::Ndjson => serde_json::to_string(result).ok(),
		OutputFormat::Toon => serde_json::to_value(result).ok().map(|v| toon::encode(&v, None)),
		OutputFormat::Text => serde_json::to_value(result).ok().map(|v| render_text(&v)),
	};
	if let Some(rendered) = rendered {
		let mut stdout = io::stdout().lock();
		let _ = writeln!(stdout, "{}", rendered.trim_end());
	}
}

/// Plain rendering for terminals. Errors are left to stderr.
fn render_text(envelope: &Value) -> String {
	let mut out = String::new();
	if envelope["ok"] != Value::Bool(true) {
		return out;
	}
	if let Some(device) = envelope["device"].as_str() {
		out.push_str(&format!("device: {device}\n"));
	}
	match &envelope["data"] {
		Value::Null => {}
		Value::String(s) => out.push_str(&format!("{s}\n")),
		Value::Array(items) => {
			for item in items {
				out.push_str(&format!("{}\n", plain(item)));
			}
		}
		Value::Object(map) => {
			for (key, value) in map {
				out.push_str(&format!("{key}: {}\n", plain(value)));
			}
		}
		other => out.push_str(&format!("{other}\n")),
	}
	let timings = &envelope["timings"];
	match (timings["durationMs"].as_u64(), timings["setupMs"].as_u64()) {
		(Some(total), Some(setup)) => out.push_str(&format!("took {total}ms (setup {setup}ms)\n")),
		(Some(total), None) => out.push_str(&format!("took {total}ms\n")),
		_ => {}
	}
	out
}

fn plain(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join(", "),
		Value::Object(map) => map
			.iter()
			.map(|(k, v)| format!("{k}={}", plain(v)))
			.collect::<Vec<_>>()
			.join(" "),
		other => other.to_string(),
	}
}

pub fn print_error_stderr(error: &CommandError) {
	eprintln!("error[{}]: {}", error.code, error.message);
}
