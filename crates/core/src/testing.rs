//! Fakes for engines and web view discovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;
use uia_protocol::ContextName;

use crate::engine::{Engine, EngineFactory, EngineLaunch, EngineState};
use crate::probe::WebviewProbe;
use crate::{Error, Result};

pub struct FakeEngine {
	pub launch: EngineLaunch,
	state: watch::Sender<EngineState>,
	alive: AtomicBool,
	restarts: AtomicUsize,
	stops: AtomicUsize,
	proxied: Mutex<Vec<(String, Value)>>,
}

impl FakeEngine {
	fn new(launch: EngineLaunch) -> Self {
		let (state, _) = watch::channel(EngineState::Online);
		Self {
			launch,
			state,
			alive: AtomicBool::new(true),
			restarts: AtomicUsize::new(0),
			stops: AtomicUsize::new(0),
			proxied: Mutex::new(Vec::new()),
		}
	}

	/// Simulates the engine process dying.
	pub fn crash(&self) {
		self.alive.store(false, Ordering::SeqCst);
		self.state.send_replace(EngineState::Stopped);
	}

	/// Makes the liveness probe fail while the process keeps running.
	pub fn hang(&self) {
		self.alive.store(false, Ordering::SeqCst);
	}

	pub fn restarts(&self) -> usize {
		self.restarts.load(Ordering::SeqCst)
	}

	pub fn stops(&self) -> usize {
		self.stops.load(Ordering::SeqCst)
	}

	pub fn proxied(&self) -> Vec<String> {
		self.proxied.lock().iter().map(|(c, _)| c.clone()).collect()
	}
}

#[async_trait]
impl Engine for FakeEngine {
	async fn is_alive(&self) -> bool {
		self.alive.load(Ordering::SeqCst)
	}

	async fn restart(&self) -> Result<()> {
		self.state.send_replace(EngineState::Stopped);
		// Let crash watchers observe the transient stop.
		tokio::task::yield_now().await;
		tokio::task::yield_now().await;
		self.restarts.fetch_add(1, Ordering::SeqCst);
		self.alive.store(true, Ordering::SeqCst);
		self.state.send_replace(EngineState::Online);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.stops.fetch_add(1, Ordering::SeqCst);
		self.alive.store(false, Ordering::SeqCst);
		self.state.send_replace(EngineState::Stopped);
		Ok(())
	}

	fn state(&self) -> watch::Receiver<EngineState> {
		self.state.subscribe()
	}

	async fn proxy(&self, command: &str, params: Value) -> Result<Value> {
		self.proxied.lock().push((command.to_string(), params));
		Ok(json!({ "proxied": command, "context": self.launch.context }))
	}
}

#[derive(Default)]
pub struct FakeEngineFactory {
	created: Mutex<Vec<Arc<FakeEngine>>>,
	fail: AtomicBool,
}

impl FakeEngineFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_next(&self) {
		self.fail.store(true, Ordering::SeqCst);
	}

	pub fn created(&self) -> Vec<Arc<FakeEngine>> {
		self.created.lock().clone()
	}

	pub fn last(&self) -> Option<Arc<FakeEngine>> {
		self.created.lock().last().cloned()
	}
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
	async fn create(&self, launch: EngineLaunch) -> Result<Arc<dyn Engine>> {
		if self.fail.swap(false, Ordering::SeqCst) {
			return Err(Error::Engine("chromedriver failed to start".into()));
		}
		let engine = Arc::new(FakeEngine::new(launch));
		self.created.lock().push(engine.clone());
		Ok(engine)
	}
}

/// Probe returning a fixed, mutable list.
#[derive(Default)]
pub struct StaticProbe {
	contexts: Mutex<Vec<ContextName>>,
}

impl StaticProbe {
	pub fn new(contexts: &[&str]) -> Self {
		Self {
			contexts: Mutex::new(contexts.iter().map(|c| ContextName::from(*c)).collect()),
		}
	}

	pub fn set(&self, contexts: &[&str]) {
		*self.contexts.lock() = contexts.iter().map(|c| ContextName::from(*c)).collect();
	}
}

#[async_trait]
impl WebviewProbe for StaticProbe {
	async fn webviews(&self) -> Result<Vec<ContextName>> {
		Ok(self.contexts.lock().clone())
	}
}
