//! Screen unlock through the unlock helper app.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uia_runtime::DeviceControl;

use crate::{Error, Result};

pub const UNLOCK_PACKAGE: &str = "io.appium.unlock";
pub const UNLOCK_ACTIVITY: &str = ".Unlock";

const UNLOCK_ATTEMPTS: u32 = 10;
const ATTEMPT_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Unlocks the screen if the keyguard is showing.
///
/// Each attempt launches the unlock activity and polls the keyguard state for
/// up to `success_timeout`. Fails with [`Error::UnlockFailed`] once every
/// attempt is used up.
pub async fn unlock(device: &dyn DeviceControl, success_timeout: Duration) -> Result<()> {
	if !device.is_screen_locked().await? {
		debug!(target = "uia.session", "screen already unlocked");
		return Ok(());
	}

	info!(target = "uia.session", serial = device.serial(), "screen is locked, unlocking");
	for attempt in 1..=UNLOCK_ATTEMPTS {
		if attempt > 1 {
			sleep(ATTEMPT_INTERVAL).await;
		}
		if let Err(err) = device.start_activity(UNLOCK_PACKAGE, UNLOCK_ACTIVITY).await {
			warn!(target = "uia.session", attempt, error = %err, "cannot launch unlock activity");
			continue;
		}
		if wait_unlocked(device, success_timeout).await? {
			info!(target = "uia.session", attempt, "screen unlocked");
			return Ok(());
		}
		debug!(target = "uia.session", attempt, "screen still locked");
	}

	Err(Error::UnlockFailed(format!(
		"screen still locked after {UNLOCK_ATTEMPTS} attempts"
	)))
}

async fn wait_unlocked(device: &dyn DeviceControl, timeout: Duration) -> Result<bool> {
	let deadline = Instant::now() + timeout;
	loop {
		if !device.is_screen_locked().await? {
			return Ok(true);
		}
		if Instant::now() >= deadline {
			return Ok(false);
		}
		sleep(POLL_INTERVAL).await;
	}
}
