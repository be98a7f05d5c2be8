use clap::Parser;
use uia_cli::cli::Cli;
use uia_cli::commands;
use uia_cli::error::CliError;
use uia_cli::logging;
use uia_cli::output::{self, OutputFormat, ResultBuilder};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	let format = cli.format;
	logging::init_logging(cli.verbose, format);

	let command = cli.command.name();

	if let Err(err) = commands::dispatch(cli, format).await {
		handle_error(err, command, format);
		std::process::exit(1);
	}
}

fn handle_error(err: CliError, command: &str, format: OutputFormat) {
	let cmd_error = err.to_command_error();

	// stderr for humans
	output::print_error_stderr(&cmd_error);

	// stdout envelope with ok=false for scripts
	if format != OutputFormat::Text {
		let result: output::CommandResult<()> = ResultBuilder::new(command).error(cmd_error).build();
		output::print_result(&result, format);
	}
}
