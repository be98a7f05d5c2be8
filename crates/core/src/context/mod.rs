//! Native/web context arbitration
//!
//! The arbiter decides where a command goes: to the helper (native context)
//! or to a downstream engine (web context). It owns the engine pool, keyed by
//! context name, and the proxy slot naming the engine currently receiving
//! commands.
//!
//! Invariants:
//! - the proxy slot is occupied iff the current context is a web context
//! - a pooled engine has exactly one crash watcher until it is evicted or torn down
//! - an engine stopping while its context is in the restarting set is ignored

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uia_protocol::{ContextName, WEBVIEW};
use uia_runtime::ShutdownSignal;

use crate::engine::{Engine, EngineFactory, EngineLaunch, EngineState};
use crate::probe::WebviewProbe;
use crate::{Error, Result};

#[cfg(test)]
mod tests;

/// Reason reported when the active engine dies.
pub const ENGINE_CRASH_REASON: &str = "Chromedriver quit unexpectedly during session";

/// Static inputs for engine launches and alias resolution.
#[derive(Debug, Clone, Default)]
pub struct ArbiterConfig {
	pub device_serial: String,
	pub app_package: Option<String>,
	/// Overrides the package used to resolve the `WEBVIEW` alias.
	pub auto_webview_name: Option<String>,
	/// Stop every engine when leaving a web context instead of keeping them pooled.
	pub recreate_engine_sessions: bool,
	pub engine_executable: Option<PathBuf>,
	pub engine_port: Option<u16>,
	pub engine_capabilities: Value,
}

struct PooledEngine {
	engine: Arc<dyn Engine>,
	watcher: JoinHandle<()>,
}

struct ArbiterState {
	current: ContextName,
	pool: IndexMap<ContextName, PooledEngine>,
	proxy: Option<(ContextName, Arc<dyn Engine>)>,
	restarting: HashSet<ContextName>,
}

struct ArbiterInner {
	config: ArbiterConfig,
	factory: Arc<dyn EngineFactory>,
	probe: Arc<dyn WebviewProbe>,
	signal: ShutdownSignal,
	state: Mutex<ArbiterState>,
}

/// Routes commands between the native surface and pooled web engines.
#[derive(Clone)]
pub struct ContextArbiter {
	inner: Arc<ArbiterInner>,
}

impl std::fmt::Debug for ContextArbiter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("ContextArbiter")
			.field("current", &state.current)
			.field("pool", &state.pool.keys().collect::<Vec<_>>())
			.field("proxy", &state.proxy.as_ref().map(|(c, _)| c))
			.finish()
	}
}

impl ContextArbiter {
	pub fn new(
		config: ArbiterConfig,
		factory: Arc<dyn EngineFactory>,
		probe: Arc<dyn WebviewProbe>,
		signal: ShutdownSignal,
	) -> Self {
		Self {
			inner: Arc::new(ArbiterInner {
				config,
				factory,
				probe,
				signal,
				state: Mutex::new(ArbiterState {
					current: ContextName::native(),
					pool: IndexMap::new(),
					proxy: None,
					restarting: HashSet::new(),
				}),
			}),
		}
	}

	pub fn current_context(&self) -> ContextName {
		self.inner.state.lock().current.clone()
	}

	/// The engine in the proxy slot, if any.
	pub fn proxy(&self) -> Option<Arc<dyn Engine>> {
		self.inner.state.lock().proxy.as_ref().map(|(_, e)| e.clone())
	}

	pub fn is_proxy_active(&self) -> bool {
		self.inner.state.lock().proxy.is_some()
	}

	/// Contexts currently pooled, in creation order.
	pub fn pooled_contexts(&self) -> Vec<ContextName> {
		self.inner.state.lock().pool.keys().cloned().collect()
	}

	/// `NATIVE_APP` followed by every discovered web surface.
	pub async fn get_contexts(&self) -> Result<Vec<ContextName>> {
		let mut contexts = vec![ContextName::native()];
		for webview in self.inner.probe.webviews().await? {
			if !contexts.contains(&webview) {
				contexts.push(webview);
			}
		}
		debug!(target = "uia.context", ?contexts, "available contexts");
		Ok(contexts)
	}

	/// Maps `None` to native and the bare `WEBVIEW` alias to the app's web view.
	pub fn resolve_alias(&self, name: Option<&str>) -> ContextName {
		match name {
			None => ContextName::native(),
			Some(WEBVIEW) => {
				let config = &self.inner.config;
				let package = config
					.auto_webview_name
					.as_deref()
					.or(config.app_package.as_deref())
					.unwrap_or_default();
				ContextName::webview_for(package)
			}
			Some(other) => ContextName::from(other),
		}
	}

	/// Switches the current context.
	///
	/// # Errors
	///
	/// `Error::NoSuchContext` when the target is not among
	/// [`get_contexts`](Self::get_contexts); engine start failures propagate.
	pub async fn set_context(&self, name: Option<&str>) -> Result<()> {
		let target = self.resolve_alias(name);
		let current = self.current_context();
		if target == current {
			debug!(target = "uia.context", context = %target, "already in context");
			return Ok(());
		}

		let contexts = self.get_contexts().await?;
		if !contexts.contains(&target) {
			return Err(Error::NoSuchContext(target.to_string()));
		}

		if target.is_web() {
			self.start_proxy(&target).await?;
		} else if current.is_web() {
			if self.inner.config.recreate_engine_sessions {
				debug!(target = "uia.context", "stopping engines before leaving web context");
				self.teardown_all().await;
			} else {
				self.suspend_proxy();
			}
		}

		self.inner.state.lock().current = target.clone();
		info!(target = "uia.context", context = %target, "switched context");
		Ok(())
	}

	/// Occupies the proxy slot with the engine for `context`.
	///
	/// Reuses a pooled engine (restarting it when it fails the liveness probe)
	/// or creates and pools a new one.
	pub async fn start_proxy(&self, context: &ContextName) -> Result<()> {
		let pooled = {
			let state = self.inner.state.lock();
			if let Some((active, _)) = &state.proxy {
				return Err(Error::ProxyAlreadyActive(active.to_string()));
			}
			state.pool.get(context).map(|p| p.engine.clone())
		};

		let engine = match pooled {
			Some(engine) => {
				debug!(target = "uia.context", %context, "found existing engine, checking liveness");
				if !engine.is_alive().await {
					warn!(target = "uia.context", %context, "engine is not responding, restarting it");
					self.inner.state.lock().restarting.insert(context.clone());
					let restarted = engine.restart().await;
					self.inner.state.lock().restarting.remove(context);
					restarted?;
				}
				engine
			}
			None => {
				debug!(target = "uia.context", %context, "starting engine");
				let engine = self.inner.factory.create(self.launch_for(context)).await?;
				let watcher = spawn_crash_watcher(Arc::downgrade(&self.inner), context.clone(), engine.clone());
				self.inner.state.lock().pool.insert(
					context.clone(),
					PooledEngine {
						engine: engine.clone(),
						watcher,
					},
				);
				engine
			}
		};

		self.inner.state.lock().proxy = Some((context.clone(), engine));
		Ok(())
	}

	/// Clears the proxy slot; the engine stays pooled.
	pub fn suspend_proxy(&self) {
		if let Some((context, _)) = self.inner.state.lock().proxy.take() {
			debug!(target = "uia.context", %context, "suspending proxy");
		}
	}

	/// Handles an engine stop that nobody asked for.
	///
	/// Returns true when the stop was acted on (session shutdown or eviction).
	pub fn on_engine_unexpected_stop(&self, context: &ContextName) -> bool {
		self.inner.on_engine_unexpected_stop(context)
	}

	/// Suspends the proxy and stops every pooled engine.
	pub async fn teardown_all(&self) {
		let pool: Vec<(ContextName, PooledEngine)> = {
			let mut state = self.inner.state.lock();
			state.proxy = None;
			state.pool.drain(..).collect()
		};
		for (context, pooled) in pool {
			pooled.watcher.abort();
			debug!(target = "uia.context", %context, "stopping engine");
			if let Err(e) = pooled.engine.stop().await {
				warn!(target = "uia.context", %context, error = %e, "error stopping engine");
			}
		}
	}

	fn launch_for(&self, context: &ContextName) -> EngineLaunch {
		let config = &self.inner.config;
		EngineLaunch {
			context: context.clone(),
			device_serial: config.device_serial.clone(),
			package: context
				.webview_package()
				.map(str::to_string)
				.or_else(|| config.app_package.clone()),
			port: config.engine_port,
			executable: config.engine_executable.clone(),
			capabilities: config.engine_capabilities.clone(),
		}
	}
}

impl ArbiterInner {
	fn on_engine_unexpected_stop(&self, context: &ContextName) -> bool {
		let mut state = self.state.lock();
		if state.restarting.contains(context) {
			debug!(target = "uia.context", %context, "engine stopped while restarting, ignoring");
			return false;
		}
		warn!(target = "uia.context", %context, "engine for context stopped unexpectedly");

		if state.current == *context {
			drop(state);
			self.signal.trigger(ENGINE_CRASH_REASON);
		} else {
			warn!(target = "uia.context", %context, "engine quit but it was not the active context, ignoring");
			state.pool.shift_remove(context);
		}
		true
	}
}

fn spawn_crash_watcher(arbiter: Weak<ArbiterInner>, context: ContextName, engine: Arc<dyn Engine>) -> JoinHandle<()> {
	let mut state = engine.state();
	drop(engine);
	tokio::spawn(async move {
		loop {
			if state.wait_for(|s| *s == EngineState::Stopped).await.is_err() {
				return;
			}
			let Some(arbiter) = arbiter.upgrade() else {
				return;
			};
			if arbiter.on_engine_unexpected_stop(&context) {
				return;
			}
			drop(arbiter);
			if state.wait_for(|s| *s != EngineState::Stopped).await.is_err() {
				return;
			}
		}
	})
}
