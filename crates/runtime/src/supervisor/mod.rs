//! Helper process supervision
//!
//! Pushes the helper jar to the device, launches it through
//! `uiautomator runtest`, waits for the readiness marker on its output and
//! tracks the process until it exits.
//!
//! ```text
//! Stopped --start()--> Starting --marker--> Online --shutdown()--> Stopping --> Stopped
//!    ^                    |                   |
//!    +-- launch failure --+---- unexpected exit (HelperExit{expected: false}) --+
//! ```
//!
//! The supervisor is the only writer of [`HelperState`]. Exit notifications are
//! published once per launched process through a `watch` channel so any number
//! of observers can wait on them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceControl, ProcessExit};
use crate::error::{Error, Result};


/// Line printed by the helper once its socket server accepts connections.
pub const READY_MARKER: &str = "Appium Socket Server Ready";

/// Default bound on the readiness wait.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(90);

/// Device directory the jar is pushed to.
pub const DEVICE_TMP_DIR: &str = "/data/local/tmp/";

/// Process name used to clean up stray helper instances.
pub const HELPER_PROCESS_NAME: &str = "uiautomator";

const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);
const LOG_TAG_OPEN: &str = "[APPIUM-UIAUTO]";
const LOG_TAG_CLOSE: &str = "[/APPIUM-UIAUTO]";
const ALERT_NEEDLE: &str = "Emitting system alert message";

static JAR_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*(/|\\)(.*\.jar)").expect("valid jar name pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
	Starting,
	Online,
	Stopping,
	Stopped,
}

/// Exit notification, published once per launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperExit {
	pub code: Option<i32>,
	/// True when the exit followed a shutdown request.
	pub expected: bool,
}

/// A system alert reported by the helper while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperAlert {
	pub message: String,
}

/// Decides when the helper output means "ready".
#[derive(Clone)]
pub enum Readiness {
	/// Ready once the output contains this substring.
	Marker(String),
	/// Ready once the predicate accepts the current line buffer.
	Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Readiness {
	pub fn marker(text: impl Into<String>) -> Self {
		Self::Marker(text.into())
	}

	pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
		Self::Predicate(Arc::new(f))
	}

	fn matches(&self, buffer: &str) -> bool {
		match self {
			Readiness::Marker(marker) => buffer.contains(marker.as_str()),
			Readiness::Predicate(f) => f(buffer),
		}
	}
}

impl Default for Readiness {
	fn default() -> Self {
		Self::marker(READY_MARKER)
	}
}

impl std::fmt::Debug for Readiness {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Readiness::Marker(m) => f.debug_tuple("Marker").field(m).finish(),
			Readiness::Predicate(_) => f.write_str("Predicate(..)"),
		}
	}
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct HelperLaunch {
	/// Local path of the helper jar.
	pub jar_path: PathBuf,
	/// Test class handed to `uiautomator runtest -c`.
	pub class_name: String,
	/// `-e key value` pairs.
	pub extras: Vec<(String, String)>,
	pub ready_timeout: Duration,
}

impl HelperLaunch {
	pub fn new(jar_path: impl Into<PathBuf>, class_name: impl Into<String>) -> Self {
		Self {
			jar_path: jar_path.into(),
			class_name: class_name.into(),
			extras: Vec::new(),
			ready_timeout: DEFAULT_READY_TIMEOUT,
		}
	}

	pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extras.push((key.into(), value.into()));
		self
	}

	pub fn ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}

	fn runtest_args(&self, jar_name: &str) -> Vec<String> {
		let mut args: Vec<String> = ["shell", "uiautomator", "runtest", jar_name, "-c", self.class_name.as_str()]
			.into_iter()
			.map(str::to_string)
			.collect();
		for (key, value) in &self.extras {
			args.extend(["-e".to_string(), key.clone(), value.clone()]);
		}
		args
	}
}

/// Extracts the `*.jar` file name from a unix or windows path.
pub fn parse_jar_name(path: &Path) -> Result<String> {
	let text = path.to_string_lossy();
	JAR_NAME
		.captures(&text)
		.and_then(|caps| caps.get(2))
		.map(|m| m.as_str().to_string())
		.ok_or_else(|| Error::InvalidArgument(format!("Unable to parse jar name from {text}")))
}

/// Owns the helper process for one session.
pub struct HelperSupervisor {
	device: Arc<dyn DeviceControl>,
	state: watch::Sender<HelperState>,
	exit: watch::Sender<Option<HelperExit>>,
	alerts: broadcast::Sender<HelperAlert>,
	stop_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HelperSupervisor {
	pub fn new(device: Arc<dyn DeviceControl>) -> Self {
		let (state, _) = watch::channel(HelperState::Stopped);
		let (exit, _) = watch::channel(None);
		let (alerts, _) = broadcast::channel(64);
		Self {
			device,
			state,
			exit,
			alerts,
			stop_tx: Arc::new(Mutex::new(None)),
			tasks: Mutex::new(Vec::new()),
		}
	}

	pub fn state(&self) -> HelperState {
		*self.state.borrow()
	}

	pub fn is_online(&self) -> bool {
		self.state() == HelperState::Online
	}

	pub fn subscribe_state(&self) -> watch::Receiver<HelperState> {
		self.state.subscribe()
	}

	/// Exit notifications; the value is `Some` once the current process exited.
	pub fn subscribe_exit(&self) -> watch::Receiver<Option<HelperExit>> {
		self.exit.subscribe()
	}

	pub fn subscribe_alerts(&self) -> broadcast::Receiver<HelperAlert> {
		self.alerts.subscribe()
	}

	/// Launches the helper and waits until it reports readiness.
	///
	/// # Errors
	///
	/// Returns `Error::InvalidArgument` when the jar name cannot be parsed and
	/// `Error::LaunchFailed` when the helper exits or stays silent past
	/// `ready_timeout`. On failure the state ends at `Stopped`.
	pub async fn start(&self, launch: &HelperLaunch, readiness: Readiness) -> Result<()> {
		if self.state() != HelperState::Stopped {
			return Err(Error::InvalidState(format!("helper is {:?}", self.state())));
		}
		let jar_name = parse_jar_name(&launch.jar_path)?;

		self.exit.send_replace(None);
		self.state.send_replace(HelperState::Starting);

		match self.launch(launch, &jar_name, readiness).await {
			Ok(()) => {
				self.state.send_replace(HelperState::Online);
				info!(target = "uia.helper", jar = %jar_name, "helper online");
				Ok(())
			}
			Err(e) => {
				error!(target = "uia.helper", error = %e, "helper failed to start");
				if let Err(kill_err) = self.device.kill_processes_by_name(HELPER_PROCESS_NAME).await {
					debug!(target = "uia.helper", error = %kill_err, "cleanup kill failed");
				}
				if let Some(tx) = self.stop_tx.lock().take() {
					let _ = tx.send(());
				}
				self.abort_tasks();
				self.state.send_replace(HelperState::Stopped);
				Err(e)
			}
		}
	}

	async fn launch(&self, launch: &HelperLaunch, jar_name: &str, readiness: Readiness) -> Result<()> {
		debug!(target = "uia.helper", jar = %launch.jar_path.display(), "pushing helper jar");
		self.device.push(&launch.jar_path, DEVICE_TMP_DIR).await?;

		if let Err(e) = self.device.kill_processes_by_name(HELPER_PROCESS_NAME).await {
			warn!(target = "uia.helper", error = %e, "failed to kill stray helper processes");
		}

		let args = launch.runtest_args(jar_name);
		debug!(target = "uia.helper", command = %args.join(" "), "launching helper");
		let process = self.device.spawn(&args).await.map_err(|e| Error::LaunchFailed(e.to_string()))?;
		let (stdout, stop_tx, exit_rx) = process.into_parts();
		*self.stop_tx.lock() = Some(stop_tx);

		let (ready_tx, ready_rx) = oneshot::channel();
		let pump = tokio::spawn(pump_output(stdout, readiness, ready_tx, self.alerts.clone()));
		let watcher = tokio::spawn(watch_exit(
			exit_rx,
			self.state.clone(),
			self.exit.clone(),
			self.stop_tx.clone(),
		));
		self.tasks.lock().extend([pump, watcher]);

		let mut exit_rx = self.exit.subscribe();
		let exited = async move {
			let _ = exit_rx.wait_for(Option::is_some).await;
		};
		let outcome = tokio::time::timeout(launch.ready_timeout, async {
			tokio::select! {
				ready = ready_rx => ready.map_err(|_| Error::LaunchFailed("helper output closed before ready".into())),
				() = exited => Err(Error::LaunchFailed("helper exited before ready".into())),
			}
		})
		.await;

		match outcome {
			Ok(result) => result,
			Err(_) => Err(Error::LaunchFailed(format!(
				"helper did not report ready within {}ms",
				launch.ready_timeout.as_millis()
			))),
		}
	}

	/// Stops the helper: graceful stop, bounded wait, kill by name.
	pub async fn shutdown(&self) -> Result<()> {
		if self.state() == HelperState::Stopped {
			warn!(target = "uia.helper", "cannot shut down helper; it has already shut down");
			return Ok(());
		}
		self.state.send_replace(HelperState::Stopping);

		let stop = self.stop_tx.lock().take();
		if let Some(tx) = stop {
			let _ = tx.send(());
			let mut exit_rx = self.exit.subscribe();
			let timed_out = tokio::time::timeout(SHUTDOWN_WAIT, exit_rx.wait_for(Option::is_some))
				.await
				.is_err();
			if timed_out {
				warn!(target = "uia.helper", "helper did not exit within {}ms", SHUTDOWN_WAIT.as_millis());
			}
		}

		if let Err(e) = self.device.kill_processes_by_name(HELPER_PROCESS_NAME).await {
			warn!(target = "uia.helper", error = %e, "failed to kill helper processes");
		}
		self.abort_tasks();
		self.state.send_replace(HelperState::Stopped);
		Ok(())
	}

	fn abort_tasks(&self) {
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

impl Drop for HelperSupervisor {
	fn drop(&mut self) {
		self.abort_tasks();
	}
}

async fn watch_exit(
	exit_rx: oneshot::Receiver<ProcessExit>,
	state: watch::Sender<HelperState>,
	exit: watch::Sender<Option<HelperExit>>,
	stop_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
) {
	let code = exit_rx.await.ok().and_then(|e| e.code);
	let expected = matches!(*state.borrow(), HelperState::Stopping | HelperState::Stopped);
	if expected {
		debug!(target = "uia.helper", ?code, "helper exited");
	} else {
		error!(target = "uia.helper", ?code, "helper process ended unexpectedly");
	}
	stop_tx.lock().take();
	exit.send_replace(Some(HelperExit { code, expected }));
	if !expected {
		state.send_replace(HelperState::Stopped);
	}
}

async fn pump_output(
	mut stdout: Box<dyn AsyncRead + Send + Unpin>,
	readiness: Readiness,
	ready_tx: oneshot::Sender<()>,
	alerts: broadcast::Sender<HelperAlert>,
) {
	let mut ready_tx = Some(ready_tx);
	let mut pending: Vec<u8> = Vec::new();
	let mut buf = vec![0u8; 8192];

	loop {
		let n = match stdout.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => n,
			Err(e) => {
				debug!(target = "uia.helper", error = %e, "helper output closed");
				break;
			}
		};
		pending.extend_from_slice(&buf[..n]);

		if ready_tx.is_some() && readiness.matches(&String::from_utf8_lossy(&pending)) {
			if let Some(tx) = ready_tx.take() {
				let _ = tx.send(());
			}
		}

		while let Some(idx) = pending.iter().position(|b| *b == b'\n') {
			let line: Vec<u8> = pending.drain(..=idx).collect();
			route_line(String::from_utf8_lossy(&line).trim(), &alerts);
		}
	}

	if !pending.is_empty() {
		route_line(String::from_utf8_lossy(&pending).trim(), &alerts);
	}
}

fn route_line(line: &str, alerts: &broadcast::Sender<HelperAlert>) {
	if line.is_empty() {
		return;
	}
	if line.contains(ALERT_NEEDLE) {
		let _ = alerts.send(HelperAlert { message: line.to_string() });
	}
	match unwrap_log_tag(line) {
		Some(inner) if inner.contains("[debug]") => debug!(target = "uia.helper", "{inner}"),
		Some(inner) => info!(target = "uia.helper", "{inner}"),
		None => debug!(target = "uia.helper", "[UIAUTO STDOUT] {line}"),
	}
}

fn unwrap_log_tag(line: &str) -> Option<&str> {
	let start = line.find(LOG_TAG_OPEN)? + LOG_TAG_OPEN.len();
	let rest = &line[start..];
	let end = rest.find(LOG_TAG_CLOSE).unwrap_or(rest.len());
	Some(rest[..end].trim())
}
