//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Helper-side socket port inside the device.
pub const DEVICE_PORT: u16 = 4724;

/// Default test class of the bootstrap jar.
pub const DEFAULT_HELPER_CLASS: &str = "io.appium.android.bootstrap.Bootstrap";

/// Options for one session. Every field has a default, so a config file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
	/// Device serial; the first online device when absent.
	pub udid: Option<String>,
	/// Local path of the app under test, installed when missing.
	pub app: Option<PathBuf>,
	pub app_package: Option<String>,
	pub app_activity: Option<String>,
	/// Local port forwarded to the helper socket.
	pub system_port: u16,
	pub helper_jar: Option<PathBuf>,
	pub helper_class: String,
	pub disable_android_watchers: bool,
	pub accept_ssl_certs: bool,
	pub ready_timeout_ms: u64,
	/// Idle window between reply chunks.
	pub command_timeout_ms: u64,
	pub skip_unlock: bool,
	pub unlock_success_timeout_ms: u64,
	pub ignore_unimportant_views: bool,
	pub android_natural_orientation: bool,
	pub auto_webview: bool,
	pub auto_webview_name: Option<String>,
	pub auto_webview_timeout_ms: u64,
	pub recreate_engine_sessions: bool,
	pub disable_window_animation: bool,
	pub dont_stop_app_on_reset: bool,
	pub chromedriver_executable: Option<PathBuf>,
	pub chromedriver_port: Option<u16>,
	pub chrome_options: Option<Value>,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			udid: None,
			app: None,
			app_package: None,
			app_activity: None,
			system_port: DEVICE_PORT,
			helper_jar: None,
			helper_class: DEFAULT_HELPER_CLASS.to_string(),
			disable_android_watchers: false,
			accept_ssl_certs: false,
			ready_timeout_ms: 90_000,
			command_timeout_ms: 60_000,
			skip_unlock: false,
			unlock_success_timeout_ms: 2_000,
			ignore_unimportant_views: false,
			android_natural_orientation: false,
			auto_webview: false,
			auto_webview_name: None,
			auto_webview_timeout_ms: 2_000,
			recreate_engine_sessions: false,
			disable_window_animation: false,
			dont_stop_app_on_reset: false,
			chromedriver_executable: None,
			chromedriver_port: None,
			chrome_options: None,
		}
	}
}

impl SessionOptions {
	pub fn ready_timeout(&self) -> Duration {
		Duration::from_millis(self.ready_timeout_ms)
	}

	pub fn command_timeout(&self) -> Duration {
		Duration::from_millis(self.command_timeout_ms)
	}

	pub fn unlock_success_timeout(&self) -> Duration {
		Duration::from_millis(self.unlock_success_timeout_ms)
	}

	pub fn auto_webview_timeout(&self) -> Duration {
		Duration::from_millis(self.auto_webview_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn partial_documents_fill_defaults() {
		let opts: SessionOptions = serde_json::from_value(json!({
			"appPackage": "io.example.app",
			"helperJar": "/opt/AppiumBootstrap.jar",
			"autoWebview": true,
			"commandTimeoutMs": 5000
		}))
		.unwrap();

		assert_eq!(opts.app_package.as_deref(), Some("io.example.app"));
		assert!(opts.auto_webview);
		assert_eq!(opts.command_timeout(), Duration::from_secs(5));
		assert_eq!(opts.system_port, DEVICE_PORT);
		assert_eq!(opts.helper_class, DEFAULT_HELPER_CLASS);
		assert_eq!(opts.ready_timeout(), Duration::from_secs(90));
	}
}
