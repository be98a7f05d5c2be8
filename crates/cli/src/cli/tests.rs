use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_devices_command() {
	let cli = Cli::try_parse_from(["uia", "devices", "--all"]).unwrap();
	match cli.command {
		Commands::Devices(args) => assert!(args.all),
		_ => panic!("Expected Devices command"),
	}
	assert_eq!(cli.format, OutputFormat::Json);
	assert_eq!(cli.verbose, 0);
}

#[test]
fn parse_contexts_with_config() {
	let cli = Cli::try_parse_from(["uia", "-vv", "contexts", "--config", "session.json", "--udid", "emulator-5554"]).unwrap();
	assert_eq!(cli.verbose, 2);
	match cli.command {
		Commands::Contexts(args) => {
			assert_eq!(args.config, Some(PathBuf::from("session.json")));
			assert_eq!(args.udid.as_deref(), Some("emulator-5554"));
			assert!(!args.skip_unlock);
		}
		_ => panic!("Expected Contexts command"),
	}
}

#[test]
fn parse_run_command() {
	let cli = Cli::try_parse_from([
		"uia",
		"run",
		"--context",
		"WEBVIEW",
		"getUrl",
		"--params",
		"{}",
		"--skip-unlock",
		"-f",
		"text",
	])
	.unwrap();
	assert_eq!(cli.format, OutputFormat::Text);
	match cli.command {
		Commands::Run(args) => {
			assert_eq!(args.command, "getUrl");
			assert_eq!(args.context.as_deref(), Some("WEBVIEW"));
			assert_eq!(args.params.as_deref(), Some("{}"));
			assert!(args.session.skip_unlock);
		}
		_ => panic!("Expected Run command"),
	}
}

#[test]
fn run_requires_a_command() {
	assert!(Cli::try_parse_from(["uia", "run"]).is_err());
}
