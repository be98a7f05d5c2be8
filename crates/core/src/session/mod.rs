//! Session orchestration.
//!
//! A [`Session`] assembles the device pieces in a fixed order (port forward,
//! helper process, command channel, context arbiter) and dismantles them in
//! reverse on close, on setup failure, or when the [`ShutdownSignal`] fires.
//!
//! Lifecycle: `New -> SettingUp -> Ready -> TearingDown -> Closed`, with
//! `SettingUp -> TearingDown` on setup failure.

mod builder;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uia_protocol::ContextName;
use uia_runtime::{CommandChannel, DeviceControl, HelperSupervisor, PortForward, ShutdownSignal};

pub use builder::SessionBuilder;

use crate::context::ContextArbiter;
use crate::dispatch::{CommandContext, Dispatcher};
use crate::logcat::LogcatCapture;
use crate::options::SessionOptions;
use crate::unlock::UNLOCK_PACKAGE;
use crate::{Error, Result};

/// Where a session is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionLifecycle {
	#[default]
	New,
	SettingUp,
	Ready,
	TearingDown,
	Closed,
}

/// Everything setup acquired and teardown must release.
#[derive(Default)]
struct SessionCore {
	logcat: Option<LogcatCapture>,
	forward: Option<PortForward>,
	channel: Option<CommandChannel>,
	helper_started: bool,
	unlock_attempted: bool,
	/// Animations were on before setup turned them off.
	restore_animation: bool,
	watchers: Vec<JoinHandle<()>>,
	settings: Map<String, Value>,
}

struct SessionInner {
	options: SessionOptions,
	device: Arc<dyn DeviceControl>,
	dispatcher: Dispatcher,
	arbiter: ContextArbiter,
	supervisor: HelperSupervisor,
	signal: ShutdownSignal,
	lifecycle: watch::Sender<SessionLifecycle>,
	core: Mutex<SessionCore>,
}

/// A live automation session against one device.
///
/// Commands are serialized: each holds the session for its whole duration,
/// so context switches and helper commands never interleave.
pub struct Session {
	inner: Arc<SessionInner>,
	monitor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("device", &self.inner.device.serial())
			.field("lifecycle", &self.lifecycle())
			.field("arbiter", &self.inner.arbiter)
			.finish()
	}
}

impl Session {
	pub fn builder(options: SessionOptions) -> SessionBuilder {
		SessionBuilder::new(options)
	}

	pub fn lifecycle(&self) -> SessionLifecycle {
		*self.inner.lifecycle.borrow()
	}

	pub fn subscribe_lifecycle(&self) -> watch::Receiver<SessionLifecycle> {
		self.inner.lifecycle.subscribe()
	}

	/// Fires once when the helper or the active engine dies unexpectedly.
	pub fn shutdown_signal(&self) -> ShutdownSignal {
		self.inner.signal.clone()
	}

	pub fn options(&self) -> &SessionOptions {
		&self.inner.options
	}

	pub fn device(&self) -> &Arc<dyn DeviceControl> {
		&self.inner.device
	}

	/// Runs one command through the dispatch point.
	///
	/// Registered handlers run locally; other commands go to the active web
	/// engine when one holds the proxy slot, else to the helper.
	///
	/// # Errors
	///
	/// `Error::SessionTerminated` once the session shut down unexpectedly,
	/// including for a command that is pending when that happens.
	pub async fn execute(&self, command: &str, params: Value) -> Result<Value> {
		let inner = &self.inner;
		let run = async {
			let mut core = inner.core.lock().await;
			let state = *inner.lifecycle.borrow();
			if state != SessionLifecycle::Ready {
				return Err(Error::SessionTerminated(format!("session is {state:?}")));
			}
			inner.dispatch(&mut core, command, params).await
		};

		tokio::select! {
			biased;
			reason = inner.signal.wait() => Err(Error::SessionTerminated(reason)),
			result = run => result,
		}
	}

	pub async fn current_context(&self) -> Result<ContextName> {
		let value = self.execute("getCurrentContext", Value::Null).await?;
		Ok(serde_json::from_value(value)?)
	}

	pub async fn get_contexts(&self) -> Result<Vec<ContextName>> {
		let value = self.execute("getContexts", Value::Null).await?;
		Ok(serde_json::from_value(value)?)
	}

	/// `None` selects the native context.
	pub async fn set_context(&self, name: Option<&str>) -> Result<()> {
		self.execute("setContext", json!({ "name": name })).await.map(drop)
	}

	/// Device log lines captured since the previous call.
	pub async fn logs(&self) -> Vec<String> {
		let core = self.inner.core.lock().await;
		core.logcat.as_ref().map(LogcatCapture::drain).unwrap_or_default()
	}

	/// Tears the session down. Calling it again, or after an unexpected
	/// shutdown, waits for the running teardown and returns.
	pub async fn close(&self) -> Result<()> {
		self.inner.teardown("session closed").await;
		if let Some(monitor) = self.monitor.lock().take() {
			monitor.abort();
		}
		Ok(())
	}

	fn spawn_monitor(&self) {
		let inner = self.inner.clone();
		let monitor = tokio::spawn(async move {
			let reason = inner.signal.wait().await;
			error!(target = "uia.session", %reason, "unexpected shutdown, tearing down session");
			inner.teardown(&reason).await;
		});
		*self.monitor.lock() = Some(monitor);
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Some(monitor) = self.monitor.get_mut().take() {
			monitor.abort();
		}
		if !matches!(self.lifecycle(), SessionLifecycle::Closed) {
			warn!(target = "uia.session", "session dropped without close");
		}
	}
}

impl SessionInner {
	async fn dispatch(&self, core: &mut SessionCore, command: &str, params: Value) -> Result<Value> {
		if !Dispatcher::is_never_proxied(command) {
			if let Some(engine) = self.arbiter.proxy() {
				debug!(target = "uia.session", command, context = %self.arbiter.current_context(), "proxying to engine");
				return engine.proxy(command, params).await;
			}
		}

		let SessionCore { channel, settings, .. } = core;
		let channel = channel
			.as_ref()
			.ok_or_else(|| Error::InvalidState("command channel is not open".into()))?;

		let result = match self.dispatcher.handler(command) {
			Some(handler) => {
				let mut cx = CommandContext {
					arbiter: &self.arbiter,
					channel,
					device: &self.device,
					options: &self.options,
					settings,
				};
				handler.handle(&mut cx, command, params).await
			}
			None => channel.send_action(command, params).await,
		};

		if let Err(Error::TransportCrashed(reason)) = &result {
			self.signal.trigger(format!("helper transport crashed: {reason}"));
		}
		result
	}

	/// Claims the teardown and runs it, or waits for the one in progress.
	async fn teardown(&self, reason: &str) {
		let claimed = self.lifecycle.send_if_modified(|state| match state {
			SessionLifecycle::Ready | SessionLifecycle::SettingUp => {
				*state = SessionLifecycle::TearingDown;
				true
			}
			_ => false,
		});
		if !claimed {
			let mut rx = self.lifecycle.subscribe();
			if *rx.borrow() == SessionLifecycle::New {
				self.lifecycle.send_replace(SessionLifecycle::Closed);
				return;
			}
			let _ = rx.wait_for(|s| *s == SessionLifecycle::Closed).await;
			return;
		}

		info!(target = "uia.session", reason, "tearing down session");
		let mut core = self.core.lock().await;
		self.teardown_locked(&mut core).await;
		self.lifecycle.send_replace(SessionLifecycle::Closed);
	}

	/// Releases everything in reverse setup order. Steps are best effort.
	async fn teardown_locked(&self, core: &mut SessionCore) {
		if let Some(mut logcat) = core.logcat.take() {
			logcat.stop();
		}
		for watcher in core.watchers.drain(..) {
			watcher.abort();
		}

		self.arbiter.teardown_all().await;

		if core.helper_started {
			if let Some(channel) = core.channel.take() {
				channel.set_closing(true);
				if self.supervisor.is_online() {
					debug!(target = "uia.session", "sending shutdown command");
					if let Err(e) = channel.shutdown().await {
						warn!(target = "uia.session", error = %e, "shutdown command failed");
					}
				}
			}
			if let Err(e) = self.supervisor.shutdown().await {
				warn!(target = "uia.session", error = %e, "helper shutdown failed");
			}
			core.helper_started = false;
		}

		match &self.options.app_package {
			Some(package) if !self.options.dont_stop_app_on_reset => {
				if let Err(e) = self.device.force_stop(package).await {
					warn!(target = "uia.session", %package, error = %e, "cannot stop app under test");
				}
			}
			_ => {}
		}

		if let Some(forward) = core.forward.take() {
			if let Err(e) = forward.remove().await {
				warn!(target = "uia.session", error = %e, "cannot remove port forward");
			}
		}

		if core.unlock_attempted {
			if let Err(e) = self.device.force_stop(UNLOCK_PACKAGE).await {
				warn!(target = "uia.session", error = %e, "cannot stop unlock helper");
			}
		}
		if core.restore_animation {
			if let Err(e) = self.device.set_animation_state(true).await {
				warn!(target = "uia.session", error = %e, "cannot restore window animation");
			}
			core.restore_animation = false;
		}
		core.unlock_attempted = false;
		debug!(target = "uia.session", "teardown finished");
	}
}
