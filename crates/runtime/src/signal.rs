//! One-shot unexpected shutdown notification.

use tokio::sync::watch;
use tracing::debug;

/// Fires at most once with the reason of the first trigger.
///
/// Clones share the same signal. Any number of tasks may [`wait`](Self::wait);
/// waiters that subscribe after the signal fired resolve immediately.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
	tx: watch::Sender<Option<String>>,
}

impl Default for ShutdownSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl ShutdownSignal {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(None);
		Self { tx }
	}

	/// Fires the signal. Returns false when it had already fired.
	pub fn trigger(&self, reason: impl Into<String>) -> bool {
		let reason = reason.into();
		let fired = self.tx.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(reason.clone());
			true
		});
		if !fired {
			debug!(target = "uia.session", %reason, "shutdown signal already fired, ignoring");
		}
		fired
	}

	pub fn is_fired(&self) -> bool {
		self.tx.borrow().is_some()
	}

	pub fn reason(&self) -> Option<String> {
		self.tx.borrow().clone()
	}

	/// Resolves with the reason once the signal has fired.
	pub async fn wait(&self) -> String {
		let mut rx = self.tx.subscribe();
		match rx.wait_for(Option::is_some).await {
			Ok(reason) => reason.clone().unwrap_or_default(),
			// The sender lives in `self`, so the channel cannot close while we wait.
			Err(_) => String::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn first_trigger_wins() {
		let signal = ShutdownSignal::new();
		assert!(!signal.is_fired());
		assert!(signal.trigger("helper crashed"));
		assert!(!signal.trigger("engine crashed"));
		assert_eq!(signal.reason().as_deref(), Some("helper crashed"));
	}

	#[tokio::test]
	async fn all_waiters_observe_the_reason() {
		let signal = ShutdownSignal::new();
		let a = tokio::spawn({
			let s = signal.clone();
			async move { s.wait().await }
		});
		let b = tokio::spawn({
			let s = signal.clone();
			async move { s.wait().await }
		});
		tokio::time::sleep(Duration::from_millis(10)).await;
		signal.trigger("gone");

		assert_eq!(a.await.unwrap(), "gone");
		assert_eq!(b.await.unwrap(), "gone");
		// Late waiters resolve immediately.
		assert_eq!(signal.wait().await, "gone");
	}
}
