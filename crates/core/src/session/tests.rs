use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use uia_protocol::ContextName;
use uia_runtime::READY_MARKER;
use uia_runtime::testing::{FakeDevice, FakeHelperServer, FakeProcess};

use super::*;
use crate::context::ENGINE_CRASH_REASON;
use crate::testing::{FakeEngineFactory, StaticProbe};

const PACKAGE: &str = "io.example.app";
const WEB: &str = "WEBVIEW_io.example.app";

struct Harness {
	device: Arc<FakeDevice>,
	server: FakeHelperServer,
	factory: Arc<FakeEngineFactory>,
	probe: Arc<StaticProbe>,
	options: SessionOptions,
	capture_logcat: bool,
	app_installed: bool,
}

impl Harness {
	async fn new() -> Self {
		Self::with_server(FakeHelperServer::start().await).await
	}

	async fn with_server(server: FakeHelperServer) -> Self {
		let device = Arc::new(FakeDevice::new("emulator-5554"));
		device.set_spawn_output(&format!("INSTRUMENTATION_STATUS: ok\n{READY_MARKER}\n"));

		let options = SessionOptions {
			app_package: Some(PACKAGE.into()),
			helper_jar: Some("/opt/uia/AppiumBootstrap.jar".into()),
			system_port: server.port(),
			skip_unlock: true,
			ready_timeout_ms: 5_000,
			..Default::default()
		};
		Self {
			device,
			server,
			factory: Arc::new(FakeEngineFactory::new()),
			probe: Arc::new(StaticProbe::new(&[WEB])),
			options,
			capture_logcat: false,
			app_installed: true,
		}
	}

	async fn start(&self) -> Result<Session> {
		if self.app_installed {
			self.device.on_shell("pm list packages", &format!("package:{PACKAGE}\n"));
		}
		Session::builder(self.options.clone())
			.device(self.device.clone())
			.engine_factory(self.factory.clone())
			.webview_probe(self.probe.clone())
			.capture_logcat(self.capture_logcat)
			.start()
			.await
	}

	/// The helper process (after logcat when capture is on).
	fn helper_process(&self) -> FakeProcess {
		if self.capture_logcat {
			self.device.take_process().expect("logcat process");
		}
		self.device.take_process().expect("helper process")
	}
}

async fn wait_closed(session: &Session) {
	let mut rx = session.subscribe_lifecycle();
	tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == SessionLifecycle::Closed))
		.await
		.expect("session closes")
		.unwrap();
}

#[tokio::test]
async fn setup_brings_the_helper_online() {
	let h = Harness::new().await;
	let session = h.start().await.unwrap();

	assert_eq!(session.lifecycle(), SessionLifecycle::Ready);
	let calls = h.device.calls();
	let position = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix)).unwrap();
	assert!(position("shell pm list packages") < position("forward tcp:"));
	assert!(position("forward tcp:") < position("push /opt/uia/AppiumBootstrap.jar"));
	assert!(position("push") < position("shell uiautomator runtest AppiumBootstrap.jar"));
	assert!(!h.device.was_called("install"));

	assert_eq!(session.current_context().await.unwrap(), ContextName::native());
	assert_eq!(
		session.get_contexts().await.unwrap(),
		vec![ContextName::native(), ContextName::from(WEB)]
	);
	session.close().await.unwrap();
}

#[tokio::test]
async fn missing_package_is_installed() {
	let mut h = Harness::new().await;
	h.app_installed = false;
	h.options.app = Some("/tmp/app-debug.apk".into());

	let session = h.start().await.unwrap();
	assert!(h.device.was_called("install /tmp/app-debug.apk"));
	session.close().await.unwrap();
}

#[tokio::test]
async fn native_commands_reach_the_helper() {
	let server = FakeHelperServer::with_responder(Arc::new(|req| {
		json!({ "status": 0, "value": { "echo": req["action"] } })
	}))
	.await;
	let h = Harness::with_server(server).await;
	let session = h.start().await.unwrap();

	let value = session.execute("click", json!({ "elementId": "1" })).await.unwrap();
	assert_eq!(value, json!({ "echo": "click" }));
	assert_eq!(h.server.actions(), vec!["click"]);
	session.close().await.unwrap();
}

#[tokio::test]
async fn remote_errors_are_returned_without_ending_the_session() {
	let server =
		FakeHelperServer::with_responder(Arc::new(|_| json!({ "status": 7, "value": "no element" }))).await;
	let h = Harness::with_server(server).await;
	let session = h.start().await.unwrap();

	let err = session.execute("find", json!({})).await.unwrap_err();
	assert!(matches!(err, Error::Remote { .. }));
	assert_eq!(session.lifecycle(), SessionLifecycle::Ready);
	session.close().await.unwrap();
}

#[tokio::test]
async fn web_context_proxies_everything_but_local_commands() {
	let h = Harness::new().await;
	let session = h.start().await.unwrap();

	session.set_context(Some("WEBVIEW")).await.unwrap();
	assert_eq!(session.current_context().await.unwrap(), ContextName::from(WEB));

	let value = session.execute("getUrl", Value::Null).await.unwrap();
	assert_eq!(value["proxied"], "getUrl");
	session.execute("getOrientation", Value::Null).await.unwrap();

	assert_eq!(h.factory.last().unwrap().proxied(), vec!["getUrl"]);
	assert_eq!(h.server.actions(), vec!["orientation"]);

	session.set_context(None).await.unwrap();
	session.execute("click", json!({})).await.unwrap();
	assert_eq!(h.server.actions(), vec!["orientation", "click"]);
	session.close().await.unwrap();
}

#[tokio::test]
async fn close_tears_down_in_reverse_order() {
	let h = Harness::new().await;
	let session = h.start().await.unwrap();
	session.set_context(Some(WEB)).await.unwrap();
	let process = h.helper_process();

	session.close().await.unwrap();

	assert_eq!(session.lifecycle(), SessionLifecycle::Closed);
	assert_eq!(h.factory.last().unwrap().stops(), 1);
	assert!(process.was_stopped());
	let last_request = h.server.requests().pop().unwrap();
	assert_eq!(last_request["cmd"], "shutdown");

	let calls = h.device.calls();
	let position = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix)).unwrap();
	assert!(position(&format!("shell am force-stop {PACKAGE}")) < position("forward --remove"));
	assert!(!h.device.was_called("shell am force-stop io.appium.unlock"));
	assert!(!session.shutdown_signal().is_fired());

	// Idempotent.
	session.close().await.unwrap();
	assert_eq!(h.device.count_calls("forward --remove"), 1);

	let err = session.execute("click", json!({})).await.unwrap_err();
	assert!(matches!(err, Error::SessionTerminated(_)));
}

#[tokio::test]
async fn dont_stop_app_on_reset_keeps_the_app_running() {
	let mut h = Harness::new().await;
	h.options.dont_stop_app_on_reset = true;
	let session = h.start().await.unwrap();

	session.close().await.unwrap();
	assert!(!h.device.was_called(&format!("shell am force-stop {PACKAGE}")));
}

#[tokio::test]
async fn helper_crash_terminates_the_session() {
	let h = Harness::new().await;
	let session = h.start().await.unwrap();
	let mut process = h.helper_process();

	process.exit(Some(1));
	let reason = session.shutdown_signal().wait().await;
	assert!(reason.contains("exited unexpectedly"), "{reason}");
	wait_closed(&session).await;

	let err = session.execute("click", json!({})).await.unwrap_err();
	assert!(matches!(err, Error::SessionTerminated(_)));
	assert!(h.device.was_called("forward --remove"));
	// The helper is gone, so no shutdown command is sent.
	assert!(h.server.requests().iter().all(|r| r["cmd"] != "shutdown"));

	session.close().await.unwrap();
}

#[tokio::test]
async fn idle_socket_loss_terminates_the_session() {
	let h = Harness::new().await;
	let session = h.start().await.unwrap();

	// No command in flight when the socket goes away.
	h.server.disconnect();
	let reason = tokio::time::timeout(Duration::from_secs(5), session.shutdown_signal().wait())
		.await
		.expect("shutdown signalled");
	assert!(reason.contains("transport crashed"), "{reason}");
	wait_closed(&session).await;

	let err = session.execute("click", json!({})).await.unwrap_err();
	assert!(matches!(err, Error::SessionTerminated(_)));
	session.close().await.unwrap();
}

#[tokio::test]
async fn pending_command_is_released_by_an_unexpected_shutdown() {
	let server = FakeHelperServer::with_responder(Arc::new(|req| {
		if req["action"] == "hang" {
			Value::Null
		} else {
			json!({ "status": 0, "value": null })
		}
	}))
	.await;
	let h = Harness::with_server(server).await;
	let session = h.start().await.unwrap();
	let mut process = h.helper_process();

	let crash = async {
		tokio::time::sleep(Duration::from_millis(50)).await;
		process.exit(None);
	};
	let (result, ()) = tokio::join!(session.execute("hang", json!({})), crash);

	assert!(matches!(result, Err(Error::SessionTerminated(_))));
	wait_closed(&session).await;
}

#[tokio::test]
async fn active_engine_crash_terminates_the_session() {
	let h = Harness::new().await;
	let session = h.start().await.unwrap();
	session.set_context(Some(WEB)).await.unwrap();

	h.factory.last().unwrap().crash();
	assert_eq!(session.shutdown_signal().wait().await, ENGINE_CRASH_REASON);
	wait_closed(&session).await;

	let err = session.execute("getUrl", Value::Null).await.unwrap_err();
	assert!(matches!(err, Error::SessionTerminated(_)));
}

#[tokio::test]
async fn setup_failure_surfaces_the_root_cause() {
	let mut h = Harness::new().await;
	h.options.helper_jar = None;
	h.device.fail_on("forward --remove", "device offline");

	let err = h.start().await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(ref msg) if msg.contains("helperJar")), "{err}");

	// The forward was established before the failure and is released again.
	assert!(h.device.was_called("forward --remove"));
	assert!(!h.device.was_called("shell uiautomator"));
	assert!(h.device.was_called(&format!("shell am force-stop {PACKAGE}")));
}

#[tokio::test]
async fn readiness_failure_aborts_setup() {
	let mut h = Harness::new().await;
	h.device.set_spawn_output("nothing useful\n");
	h.options.ready_timeout_ms = 100;

	let err = h.start().await.unwrap_err();
	assert!(matches!(err, Error::LaunchFailed(_)), "{err}");
	assert!(h.device.was_called("forward --remove"));
	assert!(h.server.requests().is_empty());
}

#[tokio::test]
async fn ignore_unimportant_views_is_applied_at_setup() {
	let mut h = Harness::new().await;
	h.options.ignore_unimportant_views = true;
	let session = h.start().await.unwrap();

	assert_eq!(h.server.actions(), vec!["compressedLayoutHierarchy"]);
	let settings = session.execute("getSettings", Value::Null).await.unwrap();
	assert_eq!(settings, json!({ "ignoreUnimportantViews": true }));
	session.close().await.unwrap();
}

#[tokio::test]
async fn unlock_and_animation_state_are_restored() {
	let mut h = Harness::new().await;
	h.options.skip_unlock = false;
	h.options.disable_window_animation = true;
	h.device.on_shell("dumpsys window", "mShowingLockscreen=false");
	h.device.on_shell("settings get global", "1.0");

	let session = h.start().await.unwrap();
	assert!(h.device.was_called("shell settings put global window_animation_scale 0"));

	session.close().await.unwrap();
	assert!(h.device.was_called("shell am force-stop io.appium.unlock"));
	assert!(h.device.was_called("shell settings put global window_animation_scale 1"));
}

#[tokio::test]
async fn app_activity_is_launched_after_setup() {
	let mut h = Harness::new().await;
	h.options.app_activity = Some(".MainActivity".into());
	let session = h.start().await.unwrap();

	assert!(h.device.was_called(&format!("shell am start -W -n {PACKAGE}/.MainActivity")));
	session.close().await.unwrap();
}

#[tokio::test]
async fn auto_webview_waits_for_the_web_view() {
	let mut h = Harness::new().await;
	h.options.auto_webview = true;
	h.options.auto_webview_timeout_ms = 3_000;
	h.probe.set(&[]);

	let probe = h.probe.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(200)).await;
		probe.set(&[WEB]);
	});

	let session = h.start().await.unwrap();
	assert_eq!(session.current_context().await.unwrap(), ContextName::from(WEB));
	session.close().await.unwrap();
}

#[tokio::test]
async fn auto_webview_gives_up_after_its_timeout() {
	let mut h = Harness::new().await;
	h.options.auto_webview = true;
	h.options.auto_webview_timeout_ms = 600;
	h.probe.set(&[]);

	let err = h.start().await.unwrap_err();
	assert!(matches!(err, Error::NoSuchContext(ref name) if name == WEB));
}

#[tokio::test]
async fn logcat_is_captured_for_the_session() {
	let mut h = Harness::new().await;
	h.capture_logcat = true;
	let session = h.start().await.unwrap();

	let mut logcat = h.device.take_process().unwrap();
	logcat.emit("10-16 I/ActivityManager: Start proc\n").await;
	tokio::time::sleep(Duration::from_millis(20)).await;

	let logs = session.logs().await;
	assert!(logs.iter().any(|l| l.contains("ActivityManager")), "{logs:?}");

	session.close().await.unwrap();
	assert!(logcat.was_stopped());
}
