use serde_json::Value;
use tracing::info;

use super::{finish, start_session};
use crate::cli::RunArgs;
use crate::config::load_options;
use crate::error::{CliError, Result};
use crate::output::{self, OutputFormat, ResultBuilder};

pub async fn execute(args: &RunArgs, format: OutputFormat) -> Result<()> {
	let builder = ResultBuilder::new("run");
	let params = parse_params(args.params.as_deref())?;
	let options = load_options(&args.session)?;
	let (session, setup) = start_session(options).await?;
	let serial = session.device().serial().to_string();

	let outcome: Result<Value> = async {
		if let Some(context) = &args.context {
			session.set_context(Some(context.as_str())).await?;
		}
		info!(target = "uia", command = %args.command, context = ?args.context, "running command");
		Ok(session.execute(&args.command, params).await?)
	}
	.await;
	let value = finish(session, outcome).await?;

	let result = builder
		.device(serial)
		.setup_duration(setup)
		.data(value)
		.build();
	output::print_result(&result, format);
	Ok(())
}

/// Parses `--params`; absent means an empty object.
fn parse_params(raw: Option<&str>) -> Result<Value> {
	let Some(raw) = raw else {
		return Ok(Value::Object(Default::default()));
	};
	match serde_json::from_str(raw) {
		Ok(value @ Value::Object(_)) => Ok(value),
		Ok(other) => Err(CliError::InvalidInput(format!("--params must be a JSON object, got {other}"))),
		Err(e) => Err(CliError::InvalidInput(format!("--params is not valid JSON: {e}"))),
	}
}
