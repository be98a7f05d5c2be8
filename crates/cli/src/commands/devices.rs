use tracing::debug;
use uia::Adb;

use crate::cli::DevicesArgs;
use crate::error::Result;
use crate::output::{self, OutputFormat, ResultBuilder};

pub async fn execute(args: &DevicesArgs, format: OutputFormat) -> Result<()> {
	let adb = Adb::locate()?;
	debug!(target = "uia", adb = %adb.display(), "listing devices");

	let devices: Vec<_> = Adb::devices(&adb)
		.await?
		.into_iter()
		.filter(|d| args.all || d.is_online())
		.collect();

	let result = ResultBuilder::new("devices").data(devices).build();
	output::print_result(&result, format);
	Ok(())
}
