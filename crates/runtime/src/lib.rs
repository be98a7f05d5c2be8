//! uia runtime - helper process supervision and the helper command channel
//!
//! This crate provides the low-level infrastructure for talking to the
//! UiAutomator helper that runs on the device:
//!
//! - **Device control**: the shell-command primitive and its `adb` implementation
//! - **Port forwarding**: local socket to device socket
//! - **Supervisor**: pushing, launching and watching the helper jar
//! - **Channel**: one-command-at-a-time JSON line protocol over the forwarded socket
//! - **Shutdown signal**: one-shot notification of an unexpected helper or engine exit
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │    uia-rs    │  Session, context arbiter, dispatcher
//! └──────┬───────┘
//!        │ DeviceControl / CommandChannel / HelperSupervisor
//! ┌──────▼───────┐
//! │ uia-runtime  │  This crate
//! │  ┌────────┐  │
//! │  │Channel │  │  {"cmd":..}\n  ->  {"status":..,"value":..}
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │Superv. │  │  uiautomator runtest + readiness marker
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │  Adb   │  │  Device shell primitive
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod adb;
pub mod channel;
pub mod device;
pub mod error;
pub mod forward;
pub mod signal;
pub mod supervisor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adb::{Adb, DeviceInfo};
pub use channel::{CommandChannel, DEFAULT_COMMAND_TIMEOUT};
pub use device::{DeviceControl, DeviceProcess, ProcessExit};
pub use error::{Error, Result};
pub use forward::PortForward;
pub use signal::ShutdownSignal;
pub use supervisor::{
	DEFAULT_READY_TIMEOUT, HelperAlert, HelperExit, HelperLaunch, HelperState, HelperSupervisor, READY_MARKER, Readiness,
};
