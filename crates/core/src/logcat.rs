//! Passive device log capture for the lifetime of a session.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uia_runtime::DeviceControl;

use crate::Result;

/// Lines kept before the oldest ones are dropped.
pub const MAX_BUFFERED_LINES: usize = 10_000;

/// Buffers `adb logcat` output until the session drains it.
pub struct LogcatCapture {
	lines: Arc<Mutex<VecDeque<String>>>,
	stop_tx: Option<oneshot::Sender<()>>,
	pump: JoinHandle<()>,
}

impl LogcatCapture {
	pub async fn start(device: &dyn DeviceControl) -> Result<Self> {
		let args = ["logcat", "-v", "threadtime"].map(str::to_string);
		let (stdout, stop_tx, exit_rx) = device.spawn(&args).await?.into_parts();
		debug!(target = "uia.logcat", serial = device.serial(), "logcat capture started");

		let lines = Arc::new(Mutex::new(VecDeque::new()));
		let buffer = lines.clone();
		let pump = tokio::spawn(async move {
			let mut reader = BufReader::new(stdout).lines();
			while let Ok(Some(line)) = reader.next_line().await {
				if line.trim().is_empty() {
					continue;
				}
				let mut buffer = buffer.lock();
				if buffer.len() == MAX_BUFFERED_LINES {
					buffer.pop_front();
				}
				buffer.push_back(line);
			}
			if let Ok(exit) = exit_rx.await {
				debug!(target = "uia.logcat", code = ?exit.code, "logcat exited");
			}
		});

		Ok(Self {
			lines,
			stop_tx: Some(stop_tx),
			pump,
		})
	}

	/// Returns and clears the lines captured since the previous call.
	pub fn drain(&self) -> Vec<String> {
		self.lines.lock().drain(..).collect()
	}

	pub fn stop(&mut self) {
		match self.stop_tx.take() {
			Some(tx) => {
				if tx.send(()).is_err() {
					warn!(target = "uia.logcat", "logcat already exited");
				}
			}
			None => return,
		}
		self.pump.abort();
	}
}

impl Drop for LogcatCapture {
	fn drop(&mut self) {
		self.stop();
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use uia_runtime::testing::FakeDevice;

	use super::*;

	#[tokio::test]
	async fn buffers_and_drains_lines() {
		let device = FakeDevice::new("emulator-5554");
		let capture = LogcatCapture::start(&device).await.unwrap();
		let mut process = device.take_process().unwrap();

		process.emit("01-01 I/Tag: one\n\n01-01 I/Tag: two\n").await;
		tokio::time::sleep(Duration::from_millis(10)).await;

		assert!(device.was_called("logcat -v threadtime"));
		assert_eq!(capture.drain(), vec!["01-01 I/Tag: one", "01-01 I/Tag: two"]);
		assert!(capture.drain().is_empty());
	}

	#[tokio::test]
	async fn stop_kills_the_process() {
		let device = FakeDevice::new("emulator-5554");
		let mut capture = LogcatCapture::start(&device).await.unwrap();
		let process = device.take_process().unwrap();

		capture.stop();
		capture.stop();
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(process.was_stopped());
	}
}
