//! `adb` backed [`DeviceControl`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::device::{DeviceControl, DeviceProcess, piped};
use crate::error::{Error, Result};

const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(20);

/// One line of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
	pub udid: String,
	pub state: String,
}

impl DeviceInfo {
	pub fn is_online(&self) -> bool {
		self.state == "device"
	}
}

/// Device handle that shells out to the `adb` executable.
#[derive(Debug, Clone)]
pub struct Adb {
	executable: PathBuf,
	serial: String,
	exec_timeout: Duration,
}

impl Adb {
	pub fn new(executable: impl Into<PathBuf>, serial: impl Into<String>) -> Self {
		Self {
			executable: executable.into(),
			serial: serial.into(),
			exec_timeout: DEFAULT_EXEC_TIMEOUT,
		}
	}

	pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
		self.exec_timeout = timeout;
		self
	}

	/// Finds the adb executable.
	///
	/// Looks at `$ADB`, then `$ANDROID_HOME/platform-tools/adb`, then `PATH`.
	pub fn locate() -> Result<PathBuf> {
		if let Some(path) = std::env::var_os("ADB").map(PathBuf::from).filter(|p| p.is_file()) {
			return Ok(path);
		}
		if let Some(home) = std::env::var_os("ANDROID_HOME") {
			let name = if cfg!(windows) { "adb.exe" } else { "adb" };
			let candidate = Path::new(&home).join("platform-tools").join(name);
			if candidate.is_file() {
				return Ok(candidate);
			}
		}
		which::which("adb").map_err(|_| {
			Error::Device("adb executable not found; set ADB or ANDROID_HOME, or add adb to PATH".into())
		})
	}

	/// Lists devices known to the adb server.
	pub async fn devices(executable: &Path) -> Result<Vec<DeviceInfo>> {
		let output = Command::new(executable)
			.arg("devices")
			.output()
			.await
			.map_err(|e| Error::Device(format!("failed to run adb devices: {e}")))?;
		if !output.status.success() {
			return Err(Error::Device(String::from_utf8_lossy(&output.stderr).trim().to_string()));
		}
		Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
	}

	/// Resolves the target serial: the requested one, else the first online device.
	pub async fn resolve(executable: &Path, udid: Option<&str>) -> Result<Self> {
		let devices = Self::devices(executable).await?;
		let chosen = match udid {
			Some(udid) => devices
				.iter()
				.find(|d| d.udid == udid && d.is_online())
				.ok_or_else(|| Error::Device(format!("device {udid} is not connected")))?,
			None => devices
				.iter()
				.find(|d| d.is_online())
				.ok_or_else(|| Error::Device("no connected devices".into()))?,
		};
		debug!(target = "uia.device", udid = %chosen.udid, "using device");
		Ok(Self::new(executable, chosen.udid.clone()))
	}

	async fn exec(&self, args: &[&str]) -> Result<String> {
		let mut cmd = Command::new(&self.executable);
		cmd.arg("-s").arg(&self.serial).args(args).kill_on_drop(true);

		let output = tokio::time::timeout(self.exec_timeout, cmd.output())
			.await
			.map_err(|_| Error::Timeout(format!("adb {} timed out", args.join(" "))))?
			.map_err(|e| Error::Device(format!("failed to run adb: {e}")))?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			let stdout = String::from_utf8_lossy(&output.stdout);
			let detail = if stderr.trim().is_empty() { stdout } else { stderr };
			return Err(Error::Device(format!("adb {} failed: {}", args.join(" "), detail.trim())));
		}
		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}
}

#[async_trait]
impl DeviceControl for Adb {
	fn serial(&self) -> &str {
		&self.serial
	}

	async fn shell(&self, args: &[&str]) -> Result<String> {
		let mut full = Vec::with_capacity(args.len() + 1);
		full.push("shell");
		full.extend_from_slice(args);
		self.exec(&full).await
	}

	async fn push(&self, local: &Path, remote: &str) -> Result<()> {
		let local = local.to_string_lossy();
		self.exec(&["push", &local, remote]).await.map(drop)
	}

	async fn install(&self, apk: &Path) -> Result<()> {
		let apk = apk.to_string_lossy();
		let out = self.exec(&["install", "-r", &apk]).await?;
		if out.contains("Failure") {
			return Err(Error::Device(format!("install failed: {}", out.trim())));
		}
		Ok(())
	}

	async fn forward_port(&self, local: u16, remote: u16) -> Result<()> {
		let (local, remote) = (format!("tcp:{local}"), format!("tcp:{remote}"));
		self.exec(&["forward", &local, &remote]).await.map(drop)
	}

	async fn remove_port_forward(&self, local: u16) -> Result<()> {
		let local = format!("tcp:{local}");
		self.exec(&["forward", "--remove", &local]).await.map(drop)
	}

	async fn spawn(&self, args: &[String]) -> Result<DeviceProcess> {
		let (stdin, stdout, stderr) = piped();
		let child = Command::new(&self.executable)
			.arg("-s")
			.arg(&self.serial)
			.args(args)
			.stdin(stdin)
			.stdout(stdout)
			.stderr(stderr)
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn adb: {e}")))?;
		DeviceProcess::from_child(child)
	}
}

/// Parses `adb devices` output.
pub fn parse_devices(output: &str) -> Vec<DeviceInfo> {
	output
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
		.filter_map(|line| {
			let mut cols = line.split_whitespace();
			let udid = cols.next()?;
			let state = cols.next()?;
			Some(DeviceInfo {
				udid: udid.to_string(),
				state: state.to_string(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_device_listing() {
		let out = "* daemon not running; starting now at tcp:5037\n\
			* daemon started successfully\n\
			List of devices attached\n\
			emulator-5554\tdevice\n\
			0123456789ABCDEF\tunauthorized\n\n";
		let devices = parse_devices(out);
		assert_eq!(devices.len(), 2);
		assert_eq!(devices[0].udid, "emulator-5554");
		assert!(devices[0].is_online());
		assert!(!devices[1].is_online());
	}

	#[test]
	fn empty_listing() {
		assert!(parse_devices("List of devices attached\n\n").is_empty());
	}
}
