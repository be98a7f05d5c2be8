//! Command dispatch table.
//!
//! Handler modules register the command names they own; the session looks a
//! command up here before falling back to a plain helper action.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uia_runtime::{CommandChannel, DeviceControl};

use crate::Result;
use crate::context::ContextArbiter;
use crate::options::SessionOptions;

mod commands;
#[cfg(test)]
mod tests;

pub(crate) use commands::set_compressed_layout;
pub use commands::{ContextCommands, ExecuteCommands, OrientationCommands, SettingsCommands};

/// Commands that always stay local, even while a web engine is active.
pub const NEVER_PROXIED: &[&str] = &[
	"getCurrentContext",
	"getContexts",
	"setContext",
	"getSettings",
	"updateSettings",
	"performTouch",
	"performMultiAction",
	"getOrientation",
	"setOrientation",
	"execute",
	"executeSync",
	"getNetworkConnection",
	"setNetworkConnection",
];

/// Session resources a handler may use.
pub struct CommandContext<'a> {
	pub arbiter: &'a ContextArbiter,
	pub channel: &'a CommandChannel,
	pub device: &'a Arc<dyn DeviceControl>,
	pub options: &'a SessionOptions,
	/// Current device settings (`getSettings` / `updateSettings`).
	pub settings: &'a mut Map<String, Value>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
	/// Command names this handler owns.
	fn commands(&self) -> &'static [&'static str];

	async fn handle(&self, cx: &mut CommandContext<'_>, command: &str, params: Value) -> Result<Value>;
}

/// Name-indexed set of command handlers.
#[derive(Clone, Default)]
pub struct Dispatcher {
	handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut names: Vec<_> = self.handlers.keys().collect();
		names.sort();
		f.debug_struct("Dispatcher").field("commands", &names).finish()
	}
}

impl Dispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Context, settings, orientation and execute handlers.
	pub fn with_defaults() -> Self {
		let mut dispatcher = Self::new();
		dispatcher.register(Arc::new(ContextCommands));
		dispatcher.register(Arc::new(SettingsCommands));
		dispatcher.register(Arc::new(OrientationCommands));
		dispatcher.register(Arc::new(ExecuteCommands));
		dispatcher
	}

	/// Registers every command of `handler`; later registrations win.
	pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
		for &name in handler.commands() {
			if self.handlers.insert(name, handler.clone()).is_some() {
				debug!(target = "uia.session", command = name, "command handler replaced");
			}
		}
	}

	pub fn handler(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
		self.handlers.get(command).cloned()
	}

	pub fn is_never_proxied(command: &str) -> bool {
		NEVER_PROXIED.contains(&command)
	}
}
