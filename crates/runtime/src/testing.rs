//! In-memory fakes for the device and the helper socket.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream test suites.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::device::{DeviceControl, DeviceProcess, ProcessExit};
use crate::error::{Error, Result};

type Scripted = std::result::Result<String, String>;

/// Scriptable [`DeviceControl`] that records every call.
///
/// Calls are recorded as flat strings (`shell am force-stop pkg`,
/// `forward tcp:4724 tcp:4724`, ...). Shell output is scripted per command
/// prefix; a rule with several queued outputs yields them in order and then
/// keeps repeating the last one.
pub struct FakeDevice {
	serial: String,
	calls: Mutex<Vec<String>>,
	rules: Mutex<Vec<(String, VecDeque<Scripted>)>>,
	spawn_output: Mutex<Option<String>>,
	processes: Mutex<VecDeque<FakeProcess>>,
}

impl FakeDevice {
	pub fn new(serial: &str) -> Self {
		Self {
			serial: serial.to_string(),
			calls: Mutex::new(Vec::new()),
			rules: Mutex::new(Vec::new()),
			spawn_output: Mutex::new(None),
			processes: Mutex::new(VecDeque::new()),
		}
	}

	/// Queues `output` for shell commands starting with `prefix` (without `shell`).
	pub fn on_shell(&self, prefix: &str, output: &str) -> &Self {
		self.push_rule(&format!("shell {prefix}"), Ok(output.to_string()));
		self
	}

	/// Queues a failure for recorded calls starting with `prefix` (`push`, `shell am`, ...).
	pub fn fail_on(&self, prefix: &str, message: &str) -> &Self {
		self.push_rule(prefix, Err(message.to_string()));
		self
	}

	/// Text written to every spawned process's stdout right after spawn.
	pub fn set_spawn_output(&self, output: &str) {
		*self.spawn_output.lock() = Some(output.to_string());
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}

	pub fn was_called(&self, prefix: &str) -> bool {
		self.calls.lock().iter().any(|c| c.starts_with(prefix))
	}

	pub fn count_calls(&self, prefix: &str) -> usize {
		self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
	}

	/// Takes the oldest spawned process handle.
	pub fn take_process(&self) -> Option<FakeProcess> {
		self.processes.lock().pop_front()
	}

	fn push_rule(&self, prefix: &str, entry: Scripted) {
		let mut rules = self.rules.lock();
		match rules.iter_mut().find(|(p, _)| p == prefix) {
			Some((_, queue)) => queue.push_back(entry),
			None => rules.push((prefix.to_string(), VecDeque::from([entry]))),
		}
	}

	fn record(&self, call: String) -> Result<String> {
		self.calls.lock().push(call.clone());
		let mut rules = self.rules.lock();
		let Some((_, queue)) = rules.iter_mut().find(|(p, _)| call.starts_with(p.as_str())) else {
			return Ok(String::new());
		};
		let entry = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
		match entry {
			Some(Ok(out)) => Ok(out),
			Some(Err(msg)) => Err(Error::Device(msg)),
			None => Ok(String::new()),
		}
	}
}

#[async_trait]
impl DeviceControl for FakeDevice {
	fn serial(&self) -> &str {
		&self.serial
	}

	async fn shell(&self, args: &[&str]) -> Result<String> {
		self.record(format!("shell {}", args.join(" ")))
	}

	async fn push(&self, local: &Path, remote: &str) -> Result<()> {
		self.record(format!("push {} {remote}", local.display())).map(drop)
	}

	async fn install(&self, apk: &Path) -> Result<()> {
		self.record(format!("install {}", apk.display())).map(drop)
	}

	async fn forward_port(&self, local: u16, remote: u16) -> Result<()> {
		self.record(format!("forward tcp:{local} tcp:{remote}")).map(drop)
	}

	async fn remove_port_forward(&self, local: u16) -> Result<()> {
		self.record(format!("forward --remove tcp:{local}")).map(drop)
	}

	async fn spawn(&self, args: &[String]) -> Result<DeviceProcess> {
		self.record(args.join(" "))?;

		let (reader, mut writer) = tokio::io::duplex(64 * 1024);
		let (stop_tx, stop_rx) = oneshot::channel::<()>();
		let (crash_tx, crash_rx) = oneshot::channel::<Option<i32>>();
		let (exit_tx, exit_rx) = oneshot::channel();
		let stopped = Arc::new(AtomicBool::new(false));

		let flag = stopped.clone();
		tokio::spawn(async move {
			let code = tokio::select! {
				Ok(()) = stop_rx => {
					flag.store(true, Ordering::SeqCst);
					Some(0)
				}
				Ok(code) = crash_rx => code,
				else => return,
			};
			let _ = exit_tx.send(ProcessExit { code });
		});

		let initial = self.spawn_output.lock().clone();
		if let Some(text) = initial {
			writer.write_all(text.as_bytes()).await?;
		}

		self.processes.lock().push_back(FakeProcess {
			stdout: writer,
			crash_tx: Some(crash_tx),
			stopped,
		});
		Ok(DeviceProcess::new(Box::new(reader), stop_tx, exit_rx))
	}
}

/// Test side of a process spawned by [`FakeDevice`].
pub struct FakeProcess {
	stdout: DuplexStream,
	crash_tx: Option<oneshot::Sender<Option<i32>>>,
	stopped: Arc<AtomicBool>,
}

impl FakeProcess {
	pub async fn emit(&mut self, text: &str) {
		let _ = self.stdout.write_all(text.as_bytes()).await;
	}

	/// Makes the process exit on its own.
	pub fn exit(&mut self, code: Option<i32>) {
		if let Some(tx) = self.crash_tx.take() {
			let _ = tx.send(code);
		}
	}

	/// True when the process exited because it was asked to stop.
	pub fn was_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}
}

/// Replies for [`FakeHelperServer`]; receives each request document.
/// Returning `Value::Null` leaves the request unanswered.
pub type Responder = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Loopback TCP server speaking the helper's line protocol.
pub struct FakeHelperServer {
	port: u16,
	requests: Arc<Mutex<Vec<Value>>>,
	task: JoinHandle<()>,
}

impl FakeHelperServer {
	/// Answers every action with `{"status":0,"value":null}`.
	pub async fn start() -> Self {
		Self::with_responder(Arc::new(|_| json!({"status": 0, "value": null}))).await
	}

	pub async fn with_responder(responder: Responder) -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
		let port = listener.local_addr().expect("local addr").port();
		let requests = Arc::new(Mutex::new(Vec::new()));

		let log = requests.clone();
		let task = tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				let (read, mut write) = stream.into_split();
				let mut lines = BufReader::new(read).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					let Ok(request) = serde_json::from_str::<Value>(line.trim()) else {
						continue;
					};
					log.lock().push(request.clone());
					let is_shutdown = request["cmd"] == "shutdown";
					let reply = if is_shutdown {
						json!({"status": 0, "value": "OK, shutting down"})
					} else {
						responder(&request)
					};
					if reply.is_null() {
						continue;
					}
					let mut bytes = serde_json::to_vec(&reply).expect("reply serializes");
					bytes.push(b'\n');
					if write.write_all(&bytes).await.is_err() || is_shutdown {
						break;
					}
				}
			}
		});

		Self { port, requests, task }
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	/// Drops the listener and every open connection, like a helper whose socket died.
	pub fn disconnect(&self) {
		self.task.abort();
	}

	pub fn requests(&self) -> Vec<Value> {
		self.requests.lock().clone()
	}

	/// Action names received so far, in order.
	pub fn actions(&self) -> Vec<String> {
		self.requests
			.lock()
			.iter()
			.filter_map(|r| r["action"].as_str().map(str::to_string))
			.collect()
	}
}

impl Drop for FakeHelperServer {
	fn drop(&mut self) {
		self.task.abort();
	}
}
