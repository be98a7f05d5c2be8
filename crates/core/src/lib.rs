//! uia: UiAutomator sessions with transparent web view proxying
//!
//! This crate assembles an automation session on an Android device: it
//! launches the UiAutomator helper, opens the command channel to it and
//! routes every command either to the helper (native context) or to a
//! chromedriver engine (web view contexts).
//!
//! # Examples
//!
//! ```ignore
//! use serde_json::json;
//! use uia::{Session, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> uia::Result<()> {
//!     let options = SessionOptions {
//!         app_package: Some("io.example.app".into()),
//!         helper_jar: Some("AppiumBootstrap.jar".into()),
//!         ..Default::default()
//!     };
//!     let session = Session::builder(options).start().await?;
//!
//!     // Native: goes to the helper
//!     session.execute("click", json!({ "elementId": "1" })).await?;
//!
//!     // Web: goes to chromedriver until the context changes again
//!     session.set_context(Some("WEBVIEW")).await?;
//!     let url = session.execute("getUrl", json!({})).await?;
//!     println!("{url}");
//!
//!     session.close().await
//! }
//! ```

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod logcat;
pub mod options;
pub mod probe;
pub mod session;
pub mod unlock;

#[cfg(test)]
mod testing;

pub use context::{ArbiterConfig, ContextArbiter, ENGINE_CRASH_REASON};
pub use dispatch::{CommandContext, CommandHandler, Dispatcher, NEVER_PROXIED};
pub use engine::{ChromedriverEngine, ChromedriverFactory, Engine, EngineFactory, EngineLaunch, EngineState};
pub use logcat::LogcatCapture;
pub use options::{DEFAULT_HELPER_CLASS, DEVICE_PORT, SessionOptions};
pub use probe::{SocketWebviewProbe, WebviewProbe};
pub use session::{Session, SessionBuilder, SessionLifecycle};
pub use uia_protocol::{CHROMIUM, ContextName, NATIVE_APP, StatusKind, WEBVIEW};
pub use uia_runtime::{Adb, DeviceControl, DeviceInfo, Error, Readiness, Result, ShutdownSignal};
