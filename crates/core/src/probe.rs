//! Web view discovery.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use uia_protocol::{CHROMIUM, ContextName};
use uia_runtime::DeviceControl;

use crate::Result;

const CHROME_SOCKET: &str = "@chrome_devtools_remote";

static DEVTOOLS_SOCKET: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^@[\w.]+_devtools_remote_?(\d+)?\b").expect("valid devtools socket pattern"));
static CROSSWALK_SOCKET: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^@([\w.]+)_devtools_remote\b").expect("valid crosswalk socket pattern"));

/// Lists the web surfaces currently available on the device.
#[async_trait]
pub trait WebviewProbe: Send + Sync {
	async fn webviews(&self) -> Result<Vec<ContextName>>;
}

/// Finds web views through listening devtools sockets in `/proc/net/unix`.
pub struct SocketWebviewProbe {
	device: Arc<dyn DeviceControl>,
}

impl SocketWebviewProbe {
	pub fn new(device: Arc<dyn DeviceControl>) -> Self {
		Self { device }
	}
}

#[async_trait]
impl WebviewProbe for SocketWebviewProbe {
	async fn webviews(&self) -> Result<Vec<ContextName>> {
		let sockets = parse_devtools_sockets(&self.device.unix_sockets().await?);
		if sockets.is_empty() {
			debug!(target = "uia.context", "found no active devtools sockets");
			return Ok(Vec::new());
		}
		debug!(target = "uia.context", ?sockets, "active devtools sockets");

		let needs_ps = sockets.iter().any(|s| matches!(s, DevtoolsSocket::Pid(_)));
		let names = if needs_ps {
			process_names(&self.device.shell(&["ps"]).await?)
		} else {
			HashMap::new()
		};

		let mut contexts: Vec<ContextName> = Vec::new();
		for socket in sockets {
			let context = match socket {
				DevtoolsSocket::Chrome => ContextName::from(CHROMIUM),
				DevtoolsSocket::Package(pkg) => ContextName::webview_for(&pkg),
				DevtoolsSocket::Pid(pid) => match names.get(&pid) {
					Some(pkg) => ContextName::webview_for(pkg),
					None => ContextName::webview_for(&pid),
				},
			};
			if !contexts.contains(&context) {
				contexts.push(context);
			}
		}
		Ok(contexts)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DevtoolsSocket {
	Chrome,
	Pid(String),
	Package(String),
}

/// Picks listening devtools sockets out of `/proc/net/unix`.
///
/// Columns: `Num RefCount Protocol Flags Type St Inode Path`.
fn parse_devtools_sockets(listing: &str) -> Vec<DevtoolsSocket> {
	let mut found = Vec::new();
	for line in listing.lines() {
		let cols: Vec<&str> = line.split_whitespace().collect();
		let (Some(flags), Some(st), Some(path)) = (cols.get(3), cols.get(5), cols.get(7)) else {
			continue;
		};
		if *flags != "00010000" || *st != "01" {
			continue;
		}
		let socket = if *path == CHROME_SOCKET {
			DevtoolsSocket::Chrome
		} else if let Some(pid) = DEVTOOLS_SOCKET.captures(path).and_then(|c| c.get(1)) {
			DevtoolsSocket::Pid(pid.as_str().to_string())
		} else if let Some(pkg) = CROSSWALK_SOCKET.captures(path).and_then(|c| c.get(1)) {
			DevtoolsSocket::Package(pkg.as_str().to_string())
		} else {
			continue;
		};
		if !found.contains(&socket) {
			found.push(socket);
		}
	}
	found
}

/// pid -> process name from `ps` output.
fn process_names(ps_output: &str) -> HashMap<String, String> {
	ps_output
		.lines()
		.skip(1)
		.filter_map(|line| {
			let cols: Vec<&str> = line.split_whitespace().collect();
			Some((cols.get(1)?.to_string(), cols.last()?.to_string()))
		})
		.collect()
}
