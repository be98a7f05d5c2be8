//! Session options from a JSON file plus command-line overrides.

use std::path::Path;

use anyhow::Context;
use tracing::debug;
use uia::SessionOptions;

use crate::cli::SessionArgs;
use crate::error::{CliError, Result};

/// Loads `--config` (if any) and applies the flag overrides on top.
pub fn load_options(args: &SessionArgs) -> Result<SessionOptions> {
	let mut options = match &args.config {
		Some(path) => read_options(path).map_err(|source| CliError::Config {
			path: path.clone(),
			source,
		})?,
		None => SessionOptions::default(),
	};

	if let Some(udid) = &args.udid {
		options.udid = Some(udid.clone());
	}
	if let Some(package) = &args.app_package {
		options.app_package = Some(package.clone());
	}
	if let Some(jar) = &args.helper_jar {
		options.helper_jar = Some(jar.clone());
	}
	if let Some(port) = args.system_port {
		options.system_port = port;
	}
	if args.skip_unlock {
		options.skip_unlock = true;
	}
	if args.auto_webview {
		options.auto_webview = true;
	}

	if options.helper_jar.is_none() {
		return Err(CliError::InvalidInput(
			"a helper jar is required (--helper-jar or \"helperJar\" in the config file)".into(),
		));
	}
	debug!(target = "uia", ?options, "session options");
	Ok(options)
}

fn read_options(path: &Path) -> anyhow::Result<SessionOptions> {
	let text = std::fs::read_to_string(path).context("cannot read file")?;
	serde_json::from_str(&text).context("invalid session options")
}
