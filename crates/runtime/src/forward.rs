//! Local to device port forwarding.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::device::DeviceControl;
use crate::error::Result;

/// An established `tcp:local -> tcp:remote` forward.
///
/// Removal is explicit; the forward outlives this value if [`remove`](Self::remove)
/// is never called, matching how adb keeps forwards until the server restarts.
#[derive(Clone)]
pub struct PortForward {
	device: Arc<dyn DeviceControl>,
	local: u16,
	remote: u16,
}

impl std::fmt::Debug for PortForward {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PortForward")
			.field("serial", &self.device.serial())
			.field("local", &self.local)
			.field("remote", &self.remote)
			.finish()
	}
}

impl PortForward {
	pub async fn establish(device: Arc<dyn DeviceControl>, local: u16, remote: u16) -> Result<Self> {
		debug!(target = "uia.forward", local, remote, serial = device.serial(), "forwarding port");
		device.forward_port(local, remote).await?;
		Ok(Self { device, local, remote })
	}

	pub fn local_port(&self) -> u16 {
		self.local
	}

	pub fn remote_port(&self) -> u16 {
		self.remote
	}

	/// Removes the forward. Failures are logged and returned.
	pub async fn remove(&self) -> Result<()> {
		debug!(target = "uia.forward", local = self.local, "removing port forward");
		self.device.remove_port_forward(self.local).await.inspect_err(|e| {
			warn!(target = "uia.forward", local = self.local, error = %e, "failed to remove port forward");
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeDevice;

	#[tokio::test]
	async fn establish_and_remove() {
		let fake = Arc::new(FakeDevice::new("emulator-5554"));
		let forward = PortForward::establish(fake.clone(), 4724, 4724).await.unwrap();
		assert_eq!(forward.local_port(), 4724);
		forward.remove().await.unwrap();

		assert_eq!(fake.calls(), vec!["forward tcp:4724 tcp:4724", "forward --remove tcp:4724"]);
	}
}
