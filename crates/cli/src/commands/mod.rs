mod contexts;
mod devices;
mod run;

use std::time::{Duration, Instant};

use tracing::warn;
use uia::{Session, SessionOptions};

use crate::cli::{Cli, Commands};
use crate::error::Result;
use crate::output::OutputFormat;

pub async fn dispatch(cli: Cli, format: OutputFormat) -> Result<()> {
	match cli.command {
		Commands::Devices(args) => devices::execute(&args, format).await,
		Commands::Contexts(args) => contexts::execute(&args, format).await,
		Commands::Run(args) => run::execute(&args, format).await,
	}
}

/// Starts a session and reports how long setup took.
async fn start_session(options: SessionOptions) -> Result<(Session, Duration)> {
	let started = Instant::now();
	let session = Session::builder(options).start().await?;
	Ok((session, started.elapsed()))
}

/// Closes `session` and passes `result` through.
async fn finish<T>(session: Session, result: Result<T>) -> Result<T> {
	if let Err(e) = session.close().await {
		warn!(target = "uia", error = %e, "session close failed");
	}
	result
}
