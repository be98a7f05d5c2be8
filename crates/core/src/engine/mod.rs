//! Downstream web engines.
//!
//! A web context is served by an [`Engine`]: a WebDriver-speaking process
//! (Chromedriver in practice) that the session forwards commands to while the
//! context is active. Engines are created through an [`EngineFactory`] so the
//! arbiter never depends on a concrete engine type.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use uia_protocol::ContextName;

use crate::Result;

mod chromedriver;

pub use chromedriver::{ChromedriverEngine, ChromedriverFactory};

/// Process state reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
	Starting,
	Online,
	Stopped,
}

/// Everything needed to bring up an engine for one context.
#[derive(Debug, Clone, Default)]
pub struct EngineLaunch {
	pub context: ContextName,
	pub device_serial: String,
	/// Package hosting the web view, when the context names one.
	pub package: Option<String>,
	/// Local port; a free one is picked when `None`.
	pub port: Option<u16>,
	pub executable: Option<PathBuf>,
	/// Extra `goog:chromeOptions` merged into the session capabilities.
	pub capabilities: Value,
}

#[async_trait]
pub trait Engine: Send + Sync {
	/// Liveness probe; false when the engine no longer answers.
	async fn is_alive(&self) -> bool;

	/// Stops and starts the engine, keeping its identity.
	async fn restart(&self) -> Result<()>;

	async fn stop(&self) -> Result<()>;

	/// State notifications. A transition to `Stopped` that was not requested
	/// through [`stop`](Self::stop) is a crash.
	fn state(&self) -> watch::Receiver<EngineState>;

	/// Forwards one command; the payload stays opaque to the caller.
	async fn proxy(&self, command: &str, params: Value) -> Result<Value>;
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
	async fn create(&self, launch: EngineLaunch) -> Result<std::sync::Arc<dyn Engine>>;
}
