//! Wire types shared by the uia runtime and session crates.
//!
//! # Main Types
//!
//! - [`HelperRequest`] - One line-delimited command sent to the device helper
//! - [`HelperResponse`] - The `{status, value}` document the helper answers with
//! - [`StatusKind`] - Fixed status-code table of the helper protocol
//! - [`ContextName`] - Native or web surface identifier

pub mod context;
pub mod message;
pub mod status;

pub use context::{CHROMIUM, ContextName, NATIVE_APP, WEBVIEW, WEBVIEW_PREFIX};
pub use message::{CommandKind, HelperRequest, HelperResponse};
pub use status::StatusKind;
