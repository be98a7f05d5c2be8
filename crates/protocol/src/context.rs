//! Context names for native and web surfaces.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The native UI surface.
pub const NATIVE_APP: &str = "NATIVE_APP";
/// Generic web alias; resolved to the app-scoped web view by the session.
pub const WEBVIEW: &str = "WEBVIEW";
/// Prefix of every concrete web view context.
pub const WEBVIEW_PREFIX: &str = "WEBVIEW_";
/// Chrome browser surface.
pub const CHROMIUM: &str = "CHROMIUM";

/// Opaque identifier of a UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextName(String);

impl ContextName {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn native() -> Self {
		Self(NATIVE_APP.to_string())
	}

	/// `WEBVIEW_<package>` for an app-scoped web view.
	pub fn webview_for(package: &str) -> Self {
		Self(format!("{WEBVIEW_PREFIX}{package}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_native(&self) -> bool {
		self.0 == NATIVE_APP
	}

	/// True for contexts that are served by a downstream web engine.
	pub fn is_web(&self) -> bool {
		self.0.contains(WEBVIEW) || self.0 == CHROMIUM
	}

	/// Package name encoded in a `WEBVIEW_<package>` context, if any.
	///
	/// Pid-style names (`WEBVIEW_1234`) carry no package.
	pub fn webview_package(&self) -> Option<&str> {
		let rest = self.0.strip_prefix(WEBVIEW_PREFIX)?;
		match rest.chars().next() {
			Some(c) if !c.is_ascii_digit() && !c.is_whitespace() => Some(rest),
			_ => None,
		}
	}
}

impl Default for ContextName {
	fn default() -> Self {
		Self::native()
	}
}

impl fmt::Display for ContextName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ContextName {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

impl From<String> for ContextName {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl PartialEq<str> for ContextName {
	fn eq(&self, other: &str) -> bool {
		self.0 == other
	}
}

impl PartialEq<&str> for ContextName {
	fn eq(&self, other: &&str) -> bool {
		self.0 == *other
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_surfaces() {
		assert!(ContextName::native().is_native());
		assert!(!ContextName::native().is_web());
		assert!(ContextName::from("WEBVIEW_com.example").is_web());
		assert!(ContextName::from(CHROMIUM).is_web());
	}

	#[test]
	fn extracts_webview_package() {
		assert_eq!(ContextName::webview_for("io.app").webview_package(), Some("io.app"));
		assert_eq!(ContextName::from("WEBVIEW_1234").webview_package(), None);
		assert_eq!(ContextName::native().webview_package(), None);
	}
}
