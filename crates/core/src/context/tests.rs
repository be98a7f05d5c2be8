use std::time::Duration;

use serde_json::json;
use uia_protocol::{CHROMIUM, NATIVE_APP};

use super::*;
use crate::testing::{FakeEngineFactory, StaticProbe};

const WEB: &str = "WEBVIEW_io.example.app";

struct Harness {
	arbiter: ContextArbiter,
	factory: Arc<FakeEngineFactory>,
	probe: Arc<StaticProbe>,
	signal: ShutdownSignal,
}

fn harness(config: ArbiterConfig) -> Harness {
	let factory = Arc::new(FakeEngineFactory::new());
	let probe = Arc::new(StaticProbe::new(&[WEB, CHROMIUM]));
	let signal = ShutdownSignal::new();
	let arbiter = ContextArbiter::new(config, factory.clone(), probe.clone(), signal.clone());
	Harness {
		arbiter,
		factory,
		probe,
		signal,
	}
}

fn config() -> ArbiterConfig {
	ArbiterConfig {
		device_serial: "emulator-5554".into(),
		app_package: Some("io.example.app".into()),
		..Default::default()
	}
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn lists_native_first() {
	let h = harness(config());
	let contexts = h.arbiter.get_contexts().await.unwrap();
	assert_eq!(contexts, vec![ContextName::from(NATIVE_APP), ContextName::from(WEB), ContextName::from(CHROMIUM)]);
}

#[tokio::test]
async fn resolves_aliases() {
	let h = harness(config());
	assert_eq!(h.arbiter.resolve_alias(None), ContextName::native());
	assert_eq!(h.arbiter.resolve_alias(Some("WEBVIEW")), ContextName::from(WEB));

	let h = harness(ArbiterConfig {
		auto_webview_name: Some("io.other".into()),
		..config()
	});
	assert_eq!(h.arbiter.resolve_alias(Some("WEBVIEW")), ContextName::from("WEBVIEW_io.other"));
}

#[tokio::test]
async fn switching_to_web_starts_and_pools_an_engine() {
	let h = harness(config());
	h.arbiter.set_context(Some("WEBVIEW")).await.unwrap();

	assert_eq!(h.arbiter.current_context(), ContextName::from(WEB));
	assert!(h.arbiter.is_proxy_active());
	let engine = h.factory.last().unwrap();
	assert_eq!(engine.launch.package.as_deref(), Some("io.example.app"));
	assert_eq!(engine.launch.device_serial, "emulator-5554");

	let value = h.arbiter.proxy().unwrap().proxy("getUrl", json!({})).await.unwrap();
	assert_eq!(value["proxied"], "getUrl");
}

#[tokio::test]
async fn leaving_web_suspends_and_reuses_the_pooled_engine() {
	let h = harness(config());
	h.arbiter.set_context(Some(WEB)).await.unwrap();
	h.arbiter.set_context(None).await.unwrap();

	assert!(h.arbiter.current_context().is_native());
	assert!(!h.arbiter.is_proxy_active());
	assert_eq!(h.arbiter.pooled_contexts(), vec![ContextName::from(WEB)]);

	h.arbiter.set_context(Some(WEB)).await.unwrap();
	assert_eq!(h.factory.created().len(), 1);
	assert_eq!(h.factory.last().unwrap().stops(), 0);
}

#[tokio::test]
async fn recreate_stops_engines_when_leaving_web() {
	let h = harness(ArbiterConfig {
		recreate_engine_sessions: true,
		..config()
	});
	h.arbiter.set_context(Some(WEB)).await.unwrap();
	h.arbiter.set_context(Some(NATIVE_APP)).await.unwrap();

	assert!(h.arbiter.pooled_contexts().is_empty());
	assert_eq!(h.factory.last().unwrap().stops(), 1);
	settle().await;
	assert!(!h.signal.is_fired());
}

#[tokio::test]
async fn same_context_is_a_noop() {
	let h = harness(config());
	h.probe.set(&[]);
	h.arbiter.set_context(Some(NATIVE_APP)).await.unwrap();
	assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn unknown_context_is_rejected() {
	let h = harness(config());
	let err = h.arbiter.set_context(Some("WEBVIEW_missing")).await.unwrap_err();
	assert!(matches!(err, Error::NoSuchContext(ref name) if name == "WEBVIEW_missing"));
	assert!(h.arbiter.current_context().is_native());
}

#[tokio::test]
async fn second_proxy_is_rejected() {
	let h = harness(config());
	h.arbiter.set_context(Some(WEB)).await.unwrap();

	let err = h.arbiter.set_context(Some(CHROMIUM)).await.unwrap_err();
	assert!(matches!(err, Error::ProxyAlreadyActive(ref ctx) if ctx == WEB));
	assert_eq!(h.arbiter.current_context(), ContextName::from(WEB));
}

#[tokio::test]
async fn engine_start_failure_keeps_native() {
	let h = harness(config());
	h.factory.fail_next();
	let err = h.arbiter.set_context(Some(WEB)).await.unwrap_err();
	assert!(matches!(err, Error::Engine(_)));
	assert!(h.arbiter.current_context().is_native());
	assert!(!h.arbiter.is_proxy_active());
}

#[tokio::test]
async fn active_engine_crash_fires_shutdown_signal() {
	let h = harness(config());
	h.arbiter.set_context(Some(WEB)).await.unwrap();

	h.factory.last().unwrap().crash();
	assert_eq!(h.signal.wait().await, ENGINE_CRASH_REASON);
}

#[tokio::test]
async fn inactive_engine_crash_is_evicted_silently() {
	let h = harness(config());
	h.arbiter.set_context(Some(WEB)).await.unwrap();
	h.arbiter.set_context(None).await.unwrap();

	h.factory.last().unwrap().crash();
	settle().await;

	assert!(!h.signal.is_fired());
	assert!(h.arbiter.pooled_contexts().is_empty());

	// Next switch creates a fresh engine.
	h.arbiter.set_context(Some(WEB)).await.unwrap();
	assert_eq!(h.factory.created().len(), 2);
}

#[tokio::test]
async fn unresponsive_engine_is_restarted_without_eviction() {
	let h = harness(config());
	h.arbiter.set_context(Some(WEB)).await.unwrap();
	h.arbiter.set_context(None).await.unwrap();

	let engine = h.factory.last().unwrap();
	engine.hang();
	h.arbiter.set_context(Some(WEB)).await.unwrap();
	settle().await;

	assert_eq!(engine.restarts(), 1);
	assert_eq!(h.factory.created().len(), 1);
	assert_eq!(h.arbiter.pooled_contexts(), vec![ContextName::from(WEB)]);
	assert!(!h.signal.is_fired());

	// The watcher survives the restart and still reports real crashes.
	engine.crash();
	assert_eq!(h.signal.wait().await, ENGINE_CRASH_REASON);
}

#[tokio::test]
async fn teardown_stops_everything_without_signalling() {
	let h = harness(config());
	h.arbiter.set_context(Some(WEB)).await.unwrap();

	h.arbiter.teardown_all().await;
	settle().await;

	assert!(!h.arbiter.is_proxy_active());
	assert!(h.arbiter.pooled_contexts().is_empty());
	assert_eq!(h.factory.last().unwrap().stops(), 1);
	assert!(!h.signal.is_fired());
}
