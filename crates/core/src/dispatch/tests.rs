use std::sync::Arc;

use serde_json::{Map, Value, json};
use uia_runtime::testing::{FakeDevice, FakeHelperServer};
use uia_runtime::{CommandChannel, DeviceControl, ShutdownSignal};

use super::*;
use crate::context::{ArbiterConfig, ContextArbiter};
use crate::options::SessionOptions;
use crate::testing::{FakeEngineFactory, StaticProbe};
use crate::Error;

const WEB: &str = "WEBVIEW_io.example.app";

struct Harness {
	server: FakeHelperServer,
	channel: CommandChannel,
	arbiter: ContextArbiter,
	device: Arc<dyn DeviceControl>,
	options: SessionOptions,
	settings: Map<String, Value>,
	dispatcher: Dispatcher,
}

impl Harness {
	async fn new() -> Self {
		Self::with_server(FakeHelperServer::start().await).await
	}

	async fn with_server(server: FakeHelperServer) -> Self {
		let channel = CommandChannel::connect(server.port()).await.unwrap();
		let arbiter = ContextArbiter::new(
			ArbiterConfig {
				device_serial: "emulator-5554".into(),
				app_package: Some("io.example.app".into()),
				..Default::default()
			},
			Arc::new(FakeEngineFactory::new()),
			Arc::new(StaticProbe::new(&[WEB])),
			ShutdownSignal::new(),
		);
		Self {
			server,
			channel,
			arbiter,
			device: Arc::new(FakeDevice::new("emulator-5554")),
			options: SessionOptions::default(),
			settings: Map::new(),
			dispatcher: Dispatcher::with_defaults(),
		}
	}

	async fn run(&mut self, command: &str, params: Value) -> crate::Result<Value> {
		let handler = self.dispatcher.handler(command).expect("handler registered");
		let mut cx = CommandContext {
			arbiter: &self.arbiter,
			channel: &self.channel,
			device: &self.device,
			options: &self.options,
			settings: &mut self.settings,
		};
		handler.handle(&mut cx, command, params).await
	}
}

#[test]
fn defaults_cover_local_commands() {
	let dispatcher = Dispatcher::with_defaults();
	for command in ["getContexts", "setContext", "updateSettings", "getOrientation", "execute"] {
		assert!(dispatcher.handler(command).is_some(), "{command} missing");
		assert!(Dispatcher::is_never_proxied(command));
	}
	assert!(dispatcher.handler("click").is_none());
	assert!(!Dispatcher::is_never_proxied("click"));
}

#[tokio::test]
async fn context_commands_round_trip() {
	let mut h = Harness::new().await;

	assert_eq!(h.run("getCurrentContext", json!({})).await.unwrap(), json!("NATIVE_APP"));
	assert_eq!(
		h.run("getContexts", json!({})).await.unwrap(),
		json!(["NATIVE_APP", WEB])
	);

	h.run("setContext", json!({ "name": "WEBVIEW" })).await.unwrap();
	assert_eq!(h.arbiter.current_context(), WEB);

	h.run("setContext", json!({ "name": null })).await.unwrap();
	assert!(h.arbiter.current_context().is_native());
}

#[tokio::test]
async fn set_context_rejects_non_string_names() {
	let mut h = Harness::new().await;
	let err = h.run("setContext", json!({ "name": 7 })).await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn ignore_unimportant_views_compresses_layout_once() {
	let mut h = Harness::new().await;

	h.run("updateSettings", json!({ "settings": { "ignoreUnimportantViews": true } }))
		.await
		.unwrap();
	// Unchanged value does not reach the helper again.
	h.run("updateSettings", json!({ "ignoreUnimportantViews": true, "other": 1 }))
		.await
		.unwrap();

	assert_eq!(h.server.actions(), vec!["compressedLayoutHierarchy"]);
	assert_eq!(h.server.requests()[0]["params"]["compressLayout"], true);
	assert_eq!(
		h.run("getSettings", json!({})).await.unwrap(),
		json!({ "ignoreUnimportantViews": true, "other": 1 })
	);
}

#[tokio::test]
async fn invalid_settings_update_applies_nothing() {
	let mut h = Harness::new().await;

	let err = h
		.run("updateSettings", json!({ "aaa": 1, "ignoreUnimportantViews": "yes", "zzz": 2 }))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
	assert!(h.server.requests().is_empty());
	assert_eq!(h.run("getSettings", json!({})).await.unwrap(), json!({}));
}

#[tokio::test]
async fn helper_failure_leaves_settings_unchanged() {
	let server = FakeHelperServer::with_responder(Arc::new(|_| {
		json!({ "status": 13, "value": "compression unavailable" })
	}))
	.await;
	let mut h = Harness::with_server(server).await;

	let err = h
		.run("updateSettings", json!({ "other": 1, "ignoreUnimportantViews": true }))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Remote { .. }));
	assert_eq!(h.run("getSettings", json!({})).await.unwrap(), json!({}));
}

#[tokio::test]
async fn orientation_is_uppercased_both_ways() {
	let server = FakeHelperServer::with_responder(Arc::new(|_| json!({ "status": 0, "value": "portrait" }))).await;
	let mut h = Harness::with_server(server).await;
	h.options.android_natural_orientation = true;

	assert_eq!(h.run("getOrientation", json!({})).await.unwrap(), json!("PORTRAIT"));
	h.run("setOrientation", json!({ "orientation": "landscape" })).await.unwrap();

	let requests = h.server.requests();
	assert_eq!(requests[0]["params"], json!({ "naturalOrientation": true }));
	assert_eq!(requests[1]["params"]["orientation"], "LANDSCAPE");
}

#[tokio::test]
async fn execute_needs_a_web_context() {
	let mut h = Harness::new().await;
	let err = h.run("execute", json!({ "script": "return 1" })).await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));

	h.run("setContext", json!({ "name": WEB })).await.unwrap();
	let value = h.run("execute", json!({ "script": "return 1" })).await.unwrap();
	assert_eq!(value["proxied"], "execute");
	assert!(h.server.actions().is_empty());
}
