//! Device control primitive.
//!
//! Everything this crate does on the device goes through [`DeviceControl`]:
//! an opaque "run a command, get stdout" call plus a few transport operations.
//! [`crate::adb::Adb`] implements it on top of the `adb` executable; tests use
//! the in-memory fake from [`crate::testing`].

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};

/// Intent flags used when launching helper activities.
pub const LAUNCH_FLAGS: &str = "0x10200000";

/// Exit report of a device-side subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
	pub code: Option<i32>,
}

/// A long-running subprocess started through [`DeviceControl::spawn`].
///
/// The process is owned by a waiter task; this handle only carries its
/// standard output, a stop request sender and the exit notification.
pub struct DeviceProcess {
	stdout: Box<dyn AsyncRead + Send + Unpin>,
	stop_tx: oneshot::Sender<()>,
	exit_rx: oneshot::Receiver<ProcessExit>,
}

impl std::fmt::Debug for DeviceProcess {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeviceProcess").finish_non_exhaustive()
	}
}

impl DeviceProcess {
	pub fn new(
		stdout: Box<dyn AsyncRead + Send + Unpin>,
		stop_tx: oneshot::Sender<()>,
		exit_rx: oneshot::Receiver<ProcessExit>,
	) -> Self {
		Self {
			stdout,
			stop_tx,
			exit_rx,
		}
	}

	/// Wraps a spawned child with piped stdout.
	///
	/// Stderr, when piped, is drained to debug logs.
	pub fn from_child(mut child: Child) -> Result<Self> {
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::LaunchFailed("subprocess stdout is not piped".to_string()))?;

		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(async move {
				let mut lines = BufReader::new(stderr).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					if !line.trim().is_empty() {
						debug!(target = "uia.helper", "[STDERR] {line}");
					}
				}
			});
		}

		let (stop_tx, stop_rx) = oneshot::channel::<()>();
		let (exit_tx, exit_rx) = oneshot::channel();

		tokio::spawn(async move {
			let status = tokio::select! {
				status = child.wait() => status,
				Ok(()) = stop_rx => {
					let _ = child.start_kill();
					child.wait().await
				}
			};
			let code = status.ok().and_then(|s| s.code());
			let _ = exit_tx.send(ProcessExit { code });
		});

		Ok(Self::new(Box::new(stdout), stop_tx, exit_rx))
	}

	pub fn into_parts(
		self,
	) -> (
		Box<dyn AsyncRead + Send + Unpin>,
		oneshot::Sender<()>,
		oneshot::Receiver<ProcessExit>,
	) {
		(self.stdout, self.stop_tx, self.exit_rx)
	}
}

/// Shell-level access to one device.
#[async_trait]
pub trait DeviceControl: Send + Sync {
	/// Device serial this handle is bound to.
	fn serial(&self) -> &str;

	/// Runs `shell <args>` and returns stdout.
	async fn shell(&self, args: &[&str]) -> Result<String>;

	/// Copies a local file to the device.
	async fn push(&self, local: &Path, remote: &str) -> Result<()>;

	/// Installs an application package.
	async fn install(&self, apk: &Path) -> Result<()>;

	/// Forwards `tcp:local` on the host to `tcp:remote` on the device.
	async fn forward_port(&self, local: u16, remote: u16) -> Result<()>;

	async fn remove_port_forward(&self, local: u16) -> Result<()>;

	/// Starts a long-running subprocess with the given transport arguments.
	async fn spawn(&self, args: &[String]) -> Result<DeviceProcess>;

	async fn kill_processes_by_name(&self, name: &str) -> Result<()> {
		let listing = self.shell(&["ps"]).await?;
		let pids = parse_pids_by_name(&listing, name);
		if pids.is_empty() {
			debug!(target = "uia.device", name, "no processes to kill");
			return Ok(());
		}
		let mut args = vec!["kill"];
		args.extend(pids.iter().map(String::as_str));
		self.shell(&args).await?;
		Ok(())
	}

	async fn is_package_installed(&self, package: &str) -> Result<bool> {
		let out = self.shell(&["pm", "list", "packages", package]).await?;
		let needle = format!("package:{package}");
		Ok(out.lines().any(|line| line.trim() == needle))
	}

	async fn force_stop(&self, package: &str) -> Result<()> {
		self.shell(&["am", "force-stop", package]).await.map(drop)
	}

	async fn start_activity(&self, package: &str, activity: &str) -> Result<()> {
		let component = format!("{package}/{activity}");
		let out = self
			.shell(&[
				"am",
				"start",
				"-W",
				"-n",
				&component,
				"-a",
				"android.intent.action.MAIN",
				"-c",
				"android.intent.category.LAUNCHER",
				"-f",
				LAUNCH_FLAGS,
			])
			.await?;
		if out.contains("Error:") {
			return Err(Error::Device(format!("cannot start {component}: {}", out.trim())));
		}
		Ok(())
	}

	async fn go_home(&self) -> Result<()> {
		self.shell(&["input", "keyevent", "3"]).await.map(drop)
	}

	async fn is_screen_locked(&self) -> Result<bool> {
		let out = self.shell(&["dumpsys", "window"]).await?;
		Ok(parse_screen_locked(&out))
	}

	/// True when any of the three animation scales is nonzero.
	async fn is_animation_on(&self) -> Result<bool> {
		for key in ANIMATION_SCALES {
			let out = self.shell(&["settings", "get", "global", key]).await?;
			let value: f64 = out.trim().parse().unwrap_or(1.0);
			if value != 0.0 {
				return Ok(true);
			}
		}
		Ok(false)
	}

	async fn set_animation_state(&self, on: bool) -> Result<()> {
		let value = if on { "1" } else { "0" };
		for key in ANIMATION_SCALES {
			self.shell(&["settings", "put", "global", key, value]).await?;
		}
		Ok(())
	}

	/// Raw `/proc/net/unix` listing used for web view discovery.
	async fn unix_sockets(&self) -> Result<String> {
		self.shell(&["cat", "/proc/net/unix"]).await
	}
}

const ANIMATION_SCALES: [&str; 3] = [
	"window_animation_scale",
	"transition_animation_scale",
	"animator_duration_scale",
];

/// Extracts pids whose process name matches `name` from `ps` output.
///
/// The pid is the second column and the name the last one.
pub fn parse_pids_by_name(ps_output: &str, name: &str) -> Vec<String> {
	ps_output
		.lines()
		.skip(1)
		.filter_map(|line| {
			let cols: Vec<&str> = line.split_whitespace().collect();
			let last = *cols.last()?;
			let pid = cols.get(1)?;
			(last == name && pid.chars().all(|c| c.is_ascii_digit())).then(|| pid.to_string())
		})
		.collect()
}

/// Reads the keyguard state out of `dumpsys window` output.
pub fn parse_screen_locked(dumpsys: &str) -> bool {
	["mShowingLockscreen=true", "mDreamingLockscreen=true", "isStatusBarKeyguard=true", "mScreenOnFully=false"]
		.iter()
		.any(|needle| dumpsys.contains(needle))
}

/// Builds the `Stdio` triple used for helper subprocesses.
pub(crate) fn piped() -> (Stdio, Stdio, Stdio) {
	(Stdio::null(), Stdio::piped(), Stdio::piped())
}
