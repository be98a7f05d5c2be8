use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::output::OutputFormat;

/// Filter for each `-v` count. `RUST_LOG` overrides it.
fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		// helper stdout and channel chatter stay quiet unless asked for
		0 => "error",
		1 => "info,uia.helper=warn,uia.channel=warn",
		2 => "debug,hyper_util=info,reqwest=info",
		_ => "trace",
	}
}

/// Installs the stderr subscriber. Colors only for text output on a terminal,
/// so machine-readable runs get plain log lines.
pub fn init_logging(verbosity: u8, format: OutputFormat) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
	let ansi = format == OutputFormat::Text && std::io::stderr().is_terminal();

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr.with_max_level(tracing::Level::TRACE))
		.with_ansi(ansi)
		.with_target(true)
		.compact()
		.init();
}
