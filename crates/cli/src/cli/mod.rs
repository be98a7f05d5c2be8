#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

/// Cargo-like help colors, with errors in red.
fn help_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default().bold())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
		.invalid(AnsiColor::Yellow.on_default().bold())
		.error(AnsiColor::Red.on_default().bold())
}

/// Root CLI for uia.
#[derive(Parser, Debug)]
#[command(name = "uia")]
#[command(about = "Drive UiAutomator helper sessions on Android devices")]
#[command(version)]
#[command(styles = help_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: json (default), ndjson, toon, or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// List devices known to adb.
	Devices(DevicesArgs),
	/// Start a session, print the available contexts, tear it down.
	Contexts(SessionArgs),
	/// Start a session, run one command through the dispatch point, tear it down.
	Run(RunArgs),
}

impl Commands {
	/// Name used in result envelopes.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Devices(_) => "devices",
			Commands::Contexts(_) => "contexts",
			Commands::Run(_) => "run",
		}
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct DevicesArgs {
	/// Include offline and unauthorized devices.
	#[arg(long)]
	pub all: bool,
}

/// Session options; flags override values from `--config`.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
	/// JSON file with session options (camelCase keys).
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Device serial.
	#[arg(long, value_name = "SERIAL")]
	pub udid: Option<String>,

	/// Package of the app under test.
	#[arg(long, value_name = "PACKAGE")]
	pub app_package: Option<String>,

	/// Local path of the helper jar.
	#[arg(long, value_name = "JAR")]
	pub helper_jar: Option<PathBuf>,

	/// Local port forwarded to the helper socket.
	#[arg(long, value_name = "PORT")]
	pub system_port: Option<u16>,

	/// Do not try to dismiss the lock screen.
	#[arg(long)]
	pub skip_unlock: bool,

	/// Switch to the app's web view after setup.
	#[arg(long)]
	pub auto_webview: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
	#[command(flatten)]
	pub session: SessionArgs,

	/// Context to switch to before running the command.
	#[arg(long, value_name = "NAME")]
	pub context: Option<String>,

	/// Command name (for example: click, getUrl, getOrientation).
	#[arg(value_name = "COMMAND")]
	pub command: String,

	/// JSON parameters for the command.
	#[arg(long, value_name = "JSON")]
	pub params: Option<String>,
}
