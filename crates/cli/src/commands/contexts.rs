use serde::Serialize;
use uia::ContextName;

use super::{finish, start_session};
use crate::cli::SessionArgs;
use crate::config::load_options;
use crate::error::Result;
use crate::output::{self, OutputFormat, ResultBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextsData {
	current: ContextName,
	contexts: Vec<ContextName>,
}

pub async fn execute(args: &SessionArgs, format: OutputFormat) -> Result<()> {
	let builder = ResultBuilder::new("contexts");
	let options = load_options(args)?;
	let (session, setup) = start_session(options).await?;
	let serial = session.device().serial().to_string();

	let listed: Result<ContextsData> = async {
		Ok(ContextsData {
			current: session.current_context().await?,
			contexts: session.get_contexts().await?,
		})
	}
	.await;
	let data = finish(session, listed).await?;

	let result = builder
		.device(serial)
		.setup_duration(setup)
		.data(data)
		.build();
	output::print_result(&result, format);
	Ok(())
}
