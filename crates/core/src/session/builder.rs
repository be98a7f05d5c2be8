use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uia_protocol::WEBVIEW;
use uia_runtime::{
	Adb, CommandChannel, DeviceControl, HelperLaunch, HelperSupervisor, PortForward, Readiness, ShutdownSignal,
};

use super::{Session, SessionCore, SessionInner, SessionLifecycle};
use crate::context::{ArbiterConfig, ContextArbiter};
use crate::dispatch::{Dispatcher, set_compressed_layout};
use crate::engine::{ChromedriverFactory, EngineFactory};
use crate::logcat::LogcatCapture;
use crate::options::{DEVICE_PORT, SessionOptions};
use crate::probe::{SocketWebviewProbe, WebviewProbe};
use crate::unlock::unlock;
use crate::{Error, Result};

const AUTO_WEBVIEW_RETRY: Duration = Duration::from_millis(500);

/// Configures and starts a [`Session`].
///
/// Collaborators default to the real ones: `adb` for the device, chromedriver
/// for web contexts and `/proc/net/unix` for web view discovery.
pub struct SessionBuilder {
	options: SessionOptions,
	device: Option<Arc<dyn DeviceControl>>,
	engine_factory: Option<Arc<dyn EngineFactory>>,
	webview_probe: Option<Arc<dyn WebviewProbe>>,
	readiness: Readiness,
	dispatcher: Dispatcher,
	capture_logcat: bool,
}

impl SessionBuilder {
	pub fn new(options: SessionOptions) -> Self {
		Self {
			options,
			device: None,
			engine_factory: None,
			webview_probe: None,
			readiness: Readiness::default(),
			dispatcher: Dispatcher::with_defaults(),
			capture_logcat: true,
		}
	}

	/// Uses `device` instead of resolving one through `adb`.
	pub fn device(mut self, device: Arc<dyn DeviceControl>) -> Self {
		self.device = Some(device);
		self
	}

	pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
		self.engine_factory = Some(factory);
		self
	}

	pub fn webview_probe(mut self, probe: Arc<dyn WebviewProbe>) -> Self {
		self.webview_probe = Some(probe);
		self
	}

	pub fn readiness(mut self, readiness: Readiness) -> Self {
		self.readiness = readiness;
		self
	}

	pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
		self.dispatcher = dispatcher;
		self
	}

	pub fn capture_logcat(mut self, enabled: bool) -> Self {
		self.capture_logcat = enabled;
		self
	}

	/// Runs setup and returns a ready session.
	///
	/// # Errors
	///
	/// Returns the first setup failure after tearing down whatever was
	/// already acquired; teardown problems are only logged.
	pub async fn start(self) -> Result<Session> {
		let device = match self.device {
			Some(device) => device,
			None => {
				let executable = Adb::locate()?;
				let adb = Adb::resolve(&executable, self.options.udid.as_deref()).await?;
				Arc::new(adb) as Arc<dyn DeviceControl>
			}
		};
		info!(target = "uia.session", serial = device.serial(), "starting session");

		let signal = ShutdownSignal::new();
		let arbiter = ContextArbiter::new(
			ArbiterConfig {
				device_serial: device.serial().to_string(),
				app_package: self.options.app_package.clone(),
				auto_webview_name: self.options.auto_webview_name.clone(),
				recreate_engine_sessions: self.options.recreate_engine_sessions,
				engine_executable: self.options.chromedriver_executable.clone(),
				engine_port: self.options.chromedriver_port,
				engine_capabilities: self.options.chrome_options.clone().unwrap_or(Value::Null),
			},
			self.engine_factory
				.unwrap_or_else(|| Arc::new(ChromedriverFactory::new()) as Arc<dyn EngineFactory>),
			self.webview_probe
				.unwrap_or_else(|| Arc::new(SocketWebviewProbe::new(device.clone())) as Arc<dyn WebviewProbe>),
			signal.clone(),
		);

		let (lifecycle, _) = watch::channel(SessionLifecycle::New);
		let session = Session {
			inner: Arc::new(SessionInner {
				supervisor: HelperSupervisor::new(device.clone()),
				options: self.options,
				device,
				dispatcher: self.dispatcher,
				arbiter,
				signal,
				lifecycle,
				core: Mutex::new(SessionCore::default()),
			}),
			monitor: parking_lot::Mutex::new(None),
		};

		let inner = &session.inner;
		inner.lifecycle.send_replace(SessionLifecycle::SettingUp);
		{
			let mut core = inner.core.lock().await;
			let setup = Setup {
				inner,
				readiness: self.readiness,
				capture_logcat: self.capture_logcat,
			};
			if let Err(err) = setup.run(&mut core).await {
				warn!(target = "uia.session", error = %err, "session setup failed, tearing down");
				inner.lifecycle.send_replace(SessionLifecycle::TearingDown);
				inner.teardown_locked(&mut core).await;
				inner.lifecycle.send_replace(SessionLifecycle::Closed);
				return Err(err);
			}
			inner.lifecycle.send_replace(SessionLifecycle::Ready);
		}

		session.spawn_monitor();
		info!(target = "uia.session", "session ready");
		Ok(session)
	}
}

struct Setup<'a> {
	inner: &'a SessionInner,
	readiness: Readiness,
	capture_logcat: bool,
}

impl Setup<'_> {
	async fn run(self, core: &mut SessionCore) -> Result<()> {
		let inner = self.inner;
		let options = &inner.options;
		let device = &inner.device;

		if options.disable_window_animation && device.is_animation_on().await? {
			debug!(target = "uia.session", "disabling window animation");
			device.set_animation_state(false).await?;
			core.restore_animation = true;
		}

		if self.capture_logcat {
			core.logcat = Some(LogcatCapture::start(device.as_ref()).await?);
		}

		self.prepare_app().await?;

		core.forward = Some(PortForward::establish(device.clone(), options.system_port, DEVICE_PORT).await?);

		let jar = options
			.helper_jar
			.as_ref()
			.ok_or_else(|| Error::InvalidArgument("helperJar is required".into()))?;
		let launch = HelperLaunch::new(jar, options.helper_class.clone())
			.extra("disableAndroidWatchers", options.disable_android_watchers.to_string())
			.extra("acceptSslCerts", options.accept_ssl_certs.to_string())
			.ready_timeout(options.ready_timeout());
		inner.supervisor.start(&launch, self.readiness.clone()).await?;
		core.helper_started = true;

		let channel = CommandChannel::connect(options.system_port)
			.await?
			.with_idle_timeout(options.command_timeout());
		core.watchers.push(spawn_crash_watcher(&channel, inner.signal.clone()));
		core.channel = Some(channel);

		core.watchers.push(spawn_exit_watcher(&inner.supervisor, inner.signal.clone()));
		core.watchers.push(spawn_alert_logger(&inner.supervisor));

		if options.ignore_unimportant_views {
			if let Some(channel) = &core.channel {
				set_compressed_layout(channel, true).await?;
			}
			core.settings.insert("ignoreUnimportantViews".into(), Value::Bool(true));
		}

		if !options.skip_unlock {
			core.unlock_attempted = true;
			unlock(device.as_ref(), options.unlock_success_timeout()).await?;
		}

		if let (Some(package), Some(activity)) = (&options.app_package, &options.app_activity) {
			debug!(target = "uia.session", %package, %activity, "launching app under test");
			device.start_activity(package, activity).await?;
		}

		if options.auto_webview {
			self.enter_auto_webview().await?;
		}
		Ok(())
	}

	/// Installs the app under test when its package is missing.
	async fn prepare_app(&self) -> Result<()> {
		let options = &self.inner.options;
		let device = &self.inner.device;
		let installed = match &options.app_package {
			Some(package) => device.is_package_installed(package).await?,
			None => false,
		};
		match (&options.app, installed) {
			(_, true) => {
				debug!(target = "uia.session", package = ?options.app_package, "app under test already installed");
			}
			(Some(app), false) => {
				info!(target = "uia.session", app = %app.display(), "installing app under test");
				device.install(app).await?;
			}
			(None, false) => {
				if let Some(package) = &options.app_package {
					return Err(Error::Device(format!("package {package} is not installed and no app was given")));
				}
			}
		}
		Ok(())
	}

	/// Switches to the app's web view, retrying while it is not yet visible.
	async fn enter_auto_webview(&self) -> Result<()> {
		let arbiter = &self.inner.arbiter;
		let deadline = Instant::now() + self.inner.options.auto_webview_timeout();
		loop {
			match arbiter.set_context(Some(WEBVIEW)).await {
				Ok(()) => return Ok(()),
				Err(Error::NoSuchContext(name)) if Instant::now() < deadline => {
					debug!(target = "uia.session", context = %name, "web view not available yet, retrying");
					sleep(AUTO_WEBVIEW_RETRY).await;
				}
				Err(err) => return Err(err),
			}
		}
	}
}

/// Turns an unexpected helper exit into the session's shutdown signal.
fn spawn_exit_watcher(supervisor: &HelperSupervisor, signal: ShutdownSignal) -> JoinHandle<()> {
	let mut exits = supervisor.subscribe_exit();
	tokio::spawn(async move {
		loop {
			let exit = *exits.borrow_and_update();
			if let Some(exit) = exit {
				if !exit.expected {
					signal.trigger(format!("helper process exited unexpectedly (code {:?})", exit.code));
					return;
				}
			}
			if exits.changed().await.is_err() {
				return;
			}
		}
	})
}

/// Turns a helper socket failure into the shutdown signal, even between commands.
fn spawn_crash_watcher(channel: &CommandChannel, signal: ShutdownSignal) -> JoinHandle<()> {
	let mut crash = channel.subscribe_crash();
	tokio::spawn(async move {
		let reason = match crash.wait_for(Option::is_some).await {
			Ok(reason) => reason.clone().unwrap_or_default(),
			Err(_) => return,
		};
		signal.trigger(format!("helper transport crashed: {reason}"));
	})
}

fn spawn_alert_logger(supervisor: &HelperSupervisor) -> JoinHandle<()> {
	let mut alerts = supervisor.subscribe_alerts();
	tokio::spawn(async move {
		loop {
			match alerts.recv().await {
				Ok(alert) => info!(target = "uia.session", message = %alert.message, "helper emitted system alert"),
				Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
					warn!(target = "uia.session", skipped = n, "alert subscriber lagged");
				}
				Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
			}
		}
	})
}
