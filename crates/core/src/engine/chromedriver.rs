//! Chromedriver-backed engine.
//!
//! Spawns a chromedriver binary on a local port, opens one WebDriver session
//! bound to the device web view and forwards commands as raw WebDriver HTTP
//! requests.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, info, warn};
use uia_protocol::{CHROMIUM, StatusKind};

use super::{Engine, EngineFactory, EngineLaunch, EngineState};
use crate::{Error, Result};

const START_TIMEOUT: Duration = Duration::from_secs(20);
const STATUS_POLL: Duration = Duration::from_millis(200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(240);
const STOP_WAIT: Duration = Duration::from_secs(5);
const CHROME_PACKAGE: &str = "com.android.chrome";

/// Creates [`ChromedriverEngine`]s sharing one HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ChromedriverFactory {
	client: Client,
}

impl ChromedriverFactory {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl EngineFactory for ChromedriverFactory {
	async fn create(&self, launch: EngineLaunch) -> Result<Arc<dyn Engine>> {
		let engine = ChromedriverEngine::start(launch, self.client.clone()).await?;
		Ok(Arc::new(engine))
	}
}

struct Running {
	port: u16,
	session_id: String,
	stop_tx: oneshot::Sender<()>,
	exited: watch::Receiver<bool>,
}

pub struct ChromedriverEngine {
	launch: EngineLaunch,
	client: Client,
	state: watch::Sender<EngineState>,
	running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for ChromedriverEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChromedriverEngine")
			.field("context", &self.launch.context)
			.field("state", &*self.state.borrow())
			.finish_non_exhaustive()
	}
}

impl ChromedriverEngine {
	/// Spawns chromedriver and opens a WebDriver session.
	pub async fn start(launch: EngineLaunch, client: Client) -> Result<Self> {
		let (state, _) = watch::channel(EngineState::Stopped);
		let engine = Self {
			launch,
			client,
			state,
			running: Mutex::new(None),
		};
		let running = engine.spawn().await?;
		*engine.running.lock().await = Some(running);
		Ok(engine)
	}

	async fn spawn(&self) -> Result<Running> {
		self.state.send_replace(EngineState::Starting);
		match self.try_spawn().await {
			Ok(running) => {
				self.state.send_replace(EngineState::Online);
				Ok(running)
			}
			Err(e) => {
				self.state.send_replace(EngineState::Stopped);
				Err(e)
			}
		}
	}

	async fn try_spawn(&self) -> Result<Running> {
		let executable = locate_executable(self.launch.executable.as_ref())?;
		let port = match self.launch.port {
			Some(port) => port,
			None => free_port()?,
		};

		debug!(target = "uia.engine", context = %self.launch.context, port, "starting chromedriver");
		let mut child = Command::new(&executable)
			.arg(format!("--port={port}"))
			.arg("--verbose")
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::Engine(format!("failed to spawn {}: {e}", executable.display())))?;

		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(async move {
				let mut lines = BufReader::new(stderr).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					debug!(target = "uia.engine", "[CHROMEDRIVER] {line}");
				}
			});
		}

		let (stop_tx, stop_rx) = oneshot::channel::<()>();
		let (exited_tx, exited) = watch::channel(false);
		let state = self.state.clone();
		let context = self.launch.context.clone();
		tokio::spawn(async move {
			let status = tokio::select! {
				status = child.wait() => status,
				Ok(()) = stop_rx => {
					let _ = child.start_kill();
					child.wait().await
				}
			};
			debug!(target = "uia.engine", %context, ?status, "chromedriver exited");
			exited_tx.send_replace(true);
			state.send_replace(EngineState::Stopped);
		});

		let mut running = Running {
			port,
			session_id: String::new(),
			stop_tx,
			exited,
		};

		if let Err(e) = self.wait_for_status(port).await {
			let _ = running.stop_tx.send(());
			return Err(e);
		}
		match self.create_session(port).await {
			Ok(session_id) => running.session_id = session_id,
			Err(e) => {
				let _ = running.stop_tx.send(());
				return Err(e);
			}
		}
		info!(target = "uia.engine", context = %self.launch.context, port, session = %running.session_id, "chromedriver online");
		Ok(running)
	}

	async fn wait_for_status(&self, port: u16) -> Result<()> {
		let url = format!("http://127.0.0.1:{port}/status");
		let deadline = tokio::time::Instant::now() + START_TIMEOUT;
		loop {
			let ok = self
				.client
				.get(&url)
				.timeout(STATUS_POLL * 5)
				.send()
				.await
				.map(|r| r.status().is_success())
				.unwrap_or(false);
			if ok {
				return Ok(());
			}
			if tokio::time::Instant::now() >= deadline {
				return Err(Error::Engine(format!(
					"chromedriver did not answer on port {port} within {}ms",
					START_TIMEOUT.as_millis()
				)));
			}
			tokio::time::sleep(STATUS_POLL).await;
		}
	}

	async fn create_session(&self, port: u16) -> Result<String> {
		let caps = session_capabilities(&self.launch);
		let value = send(&self.client, Method::POST, &format!("http://127.0.0.1:{port}/session"), Some(caps)).await?;
		value
			.get("sessionId")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::Engine(format!("session response carried no sessionId: {value}")))
	}

	async fn shutdown_running(&self, running: Running) {
		let url = format!("http://127.0.0.1:{}/session/{}", running.port, running.session_id);
		if let Err(e) = send(&self.client, Method::DELETE, &url, None).await {
			debug!(target = "uia.engine", error = %e, "failed to delete chromedriver session");
		}
		let _ = running.stop_tx.send(());
		let mut exited = running.exited;
		if tokio::time::timeout(STOP_WAIT, exited.wait_for(|e| *e)).await.is_err() {
			warn!(target = "uia.engine", context = %self.launch.context, "chromedriver did not exit in time");
		}
		self.state.send_replace(EngineState::Stopped);
	}
}

#[async_trait]
impl Engine for ChromedriverEngine {
	async fn is_alive(&self) -> bool {
		let running = self.running.lock().await;
		let Some(running) = running.as_ref() else {
			return false;
		};
		let url = format!("http://127.0.0.1:{}/session/{}/url", running.port, running.session_id);
		send(&self.client, Method::GET, &url, None).await.is_ok()
	}

	async fn restart(&self) -> Result<()> {
		let mut slot = self.running.lock().await;
		if let Some(running) = slot.take() {
			self.shutdown_running(running).await;
		}
		*slot = Some(self.spawn().await?);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		let running = self.running.lock().await.take();
		if let Some(running) = running {
			self.shutdown_running(running).await;
		}
		Ok(())
	}

	fn state(&self) -> watch::Receiver<EngineState> {
		self.state.subscribe()
	}

	async fn proxy(&self, command: &str, params: Value) -> Result<Value> {
		let (method, path, body) = route(command, &params)?;
		let base = {
			let running = self.running.lock().await;
			let running = running
				.as_ref()
				.ok_or_else(|| Error::Engine("chromedriver is not running".into()))?;
			format!("http://127.0.0.1:{}/session/{}", running.port, running.session_id)
		};
		debug!(target = "uia.engine", command, %method, %path, "proxying to chromedriver");
		send(&self.client, method, &format!("{base}{path}"), body).await
	}
}

fn locate_executable(configured: Option<&PathBuf>) -> Result<PathBuf> {
	if let Some(path) = configured {
		return Ok(path.clone());
	}
	which::which("chromedriver").map_err(|_| Error::Engine("chromedriver executable not found".into()))
}

fn free_port() -> Result<u16> {
	let listener = TcpListener::bind(("127.0.0.1", 0))?;
	Ok(listener.local_addr()?.port())
}

fn session_capabilities(launch: &EngineLaunch) -> Value {
	let mut options = match &launch.capabilities {
		Value::Object(map) => map.clone(),
		_ => Map::new(),
	};
	options.insert("androidDeviceSerial".into(), json!(launch.device_serial));
	if launch.context == *CHROMIUM {
		options.entry("androidPackage").or_insert_with(|| json!(CHROME_PACKAGE));
	} else if let Some(package) = &launch.package {
		options.insert("androidPackage".into(), json!(package));
		options.insert("androidUseRunningApp".into(), json!(true));
	}
	json!({ "capabilities": { "alwaysMatch": { "goog:chromeOptions": options } } })
}

/// Maps a command name onto a WebDriver endpoint relative to the session.
fn route(command: &str, params: &Value) -> Result<(Method, String, Option<Value>)> {
	let element = || {
		params
			.get("elementId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::InvalidArgument(format!("{command} requires an elementId")))
	};
	let routed = match command {
		"setUrl" => (Method::POST, "/url".into(), Some(json!({ "url": params["url"] }))),
		"getUrl" => (Method::GET, "/url".into(), None),
		"title" => (Method::GET, "/title".into(), None),
		"getPageSource" => (Method::GET, "/source".into(), None),
		"back" => (Method::POST, "/back".into(), Some(json!({}))),
		"forward" => (Method::POST, "/forward".into(), Some(json!({}))),
		"refresh" => (Method::POST, "/refresh".into(), Some(json!({}))),
		"getWindowHandle" => (Method::GET, "/window".into(), None),
		"getWindowHandles" => (Method::GET, "/window/handles".into(), None),
		"findElement" => (Method::POST, "/element".into(), Some(locator(params))),
		"findElements" => (Method::POST, "/elements".into(), Some(locator(params))),
		"click" => (Method::POST, format!("/element/{}/click", element()?), Some(json!({}))),
		"clear" => (Method::POST, format!("/element/{}/clear", element()?), Some(json!({}))),
		"getText" => (Method::GET, format!("/element/{}/text", element()?), None),
		"setValue" => (
			Method::POST,
			format!("/element/{}/value", element()?),
			Some(json!({ "text": params["text"] })),
		),
		"execute" => (
			Method::POST,
			"/execute/sync".into(),
			Some(json!({ "script": params["script"], "args": params.get("args").cloned().unwrap_or(json!([])) })),
		),
		"proxyRequest" => {
			let method = params.get("method").and_then(Value::as_str).unwrap_or("GET");
			let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
				.map_err(|_| Error::InvalidArgument(format!("invalid HTTP method {method}")))?;
			let path = params
				.get("path")
				.and_then(Value::as_str)
				.ok_or_else(|| Error::InvalidArgument("proxyRequest requires a path".into()))?;
			(method, path.to_string(), params.get("body").cloned())
		}
		other => return Err(Error::Engine(format!("command '{other}' has no WebDriver route"))),
	};
	Ok(routed)
}

fn locator(params: &Value) -> Value {
	json!({ "using": params["using"], "value": params["value"] })
}

async fn send(client: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
	let mut request = client.request(method, url).timeout(REQUEST_TIMEOUT);
	if let Some(body) = body {
		request = request.json(&body);
	}
	let response = request
		.send()
		.await
		.map_err(|e| Error::Engine(format!("request to {url} failed: {e}")))?;
	let document: Value = response
		.json()
		.await
		.map_err(|e| Error::Engine(format!("invalid response from {url}: {e}")))?;
	let value = document.get("value").cloned().unwrap_or(Value::Null);

	if let Some(error) = value.get("error").and_then(Value::as_str) {
		let message = value.get("message").and_then(Value::as_str).unwrap_or(error).to_string();
		return Err(Error::Remote {
			kind: w3c_status(error),
			message,
		});
	}
	Ok(value)
}

fn w3c_status(error: &str) -> StatusKind {
	match error {
		"no such element" => StatusKind::NoSuchElement,
		"no such frame" => StatusKind::NoSuchFrame,
		"no such window" => StatusKind::NoSuchWindow,
		"stale element reference" => StatusKind::StaleElementReference,
		"element not interactable" => StatusKind::ElementNotVisible,
		"invalid element state" => StatusKind::InvalidElementState,
		"javascript error" => StatusKind::JavaScriptError,
		"timeout" => StatusKind::Timeout,
		"script timeout" => StatusKind::ScriptTimeout,
		"invalid selector" => StatusKind::InvalidSelector,
		"unknown command" | "unknown method" => StatusKind::UnknownCommand,
		"invalid session id" => StatusKind::NoSuchDriver,
		"no such alert" => StatusKind::NoAlertOpen,
		"unexpected alert open" => StatusKind::UnexpectedAlertOpen,
		"session not created" => StatusKind::SessionNotCreated,
		"move target out of bounds" => StatusKind::MoveTargetOutOfBounds,
		_ => StatusKind::UnknownError,
	}
}
