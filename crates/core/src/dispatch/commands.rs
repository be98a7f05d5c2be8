//! Built-in command handlers.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};
use uia_runtime::CommandChannel;

use super::{CommandContext, CommandHandler};
use crate::{Error, Result};

/// Context listing and switching.
pub struct ContextCommands;

#[async_trait]
impl CommandHandler for ContextCommands {
	fn commands(&self) -> &'static [&'static str] {
		&["getCurrentContext", "getContexts", "setContext"]
	}

	async fn handle(&self, cx: &mut CommandContext<'_>, command: &str, params: Value) -> Result<Value> {
		match command {
			"getCurrentContext" => Ok(json!(cx.arbiter.current_context())),
			"getContexts" => Ok(json!(cx.arbiter.get_contexts().await?)),
			_ => {
				let name = match params.get("name") {
					None | Some(Value::Null) => None,
					Some(Value::String(name)) => Some(name.as_str()),
					Some(other) => return Err(Error::InvalidArgument(format!("context name must be a string, got {other}"))),
				};
				cx.arbiter.set_context(name).await?;
				Ok(Value::Null)
			}
		}
	}
}

/// Device settings; `ignoreUnimportantViews` toggles layout compression on the helper.
pub struct SettingsCommands;

#[async_trait]
impl CommandHandler for SettingsCommands {
	fn commands(&self) -> &'static [&'static str] {
		&["getSettings", "updateSettings"]
	}

	async fn handle(&self, cx: &mut CommandContext<'_>, command: &str, params: Value) -> Result<Value> {
		if command == "getSettings" {
			return Ok(Value::Object(cx.settings.clone()));
		}

		let update = match params.get("settings").cloned().unwrap_or(params) {
			Value::Object(map) => map,
			other => return Err(Error::InvalidArgument(format!("settings must be an object, got {other}"))),
		};
		let changed: Vec<(String, Value)> = update
			.into_iter()
			.filter(|(key, value)| cx.settings.get(key) != Some(value))
			.collect();

		// Validate everything before touching the helper or the stored settings.
		let mut compress = None;
		for (key, value) in &changed {
			if key == "ignoreUnimportantViews" {
				let flag = value
					.as_bool()
					.ok_or_else(|| Error::InvalidArgument("ignoreUnimportantViews must be a boolean".into()))?;
				compress = Some(flag);
			}
		}

		if let Some(compress) = compress {
			set_compressed_layout(cx.channel, compress).await?;
		}
		cx.settings.extend(changed);
		Ok(Value::Null)
	}
}

/// Sends `compressedLayoutHierarchy` to the helper.
pub(crate) async fn set_compressed_layout(channel: &CommandChannel, compress: bool) -> Result<()> {
	debug!(target = "uia.session", compress, "setting compressed layout hierarchy");
	channel
		.send_action("compressedLayoutHierarchy", json!({ "compressLayout": compress }))
		.await?;
	Ok(())
}

/// Screen orientation through the helper.
pub struct OrientationCommands;

#[async_trait]
impl CommandHandler for OrientationCommands {
	fn commands(&self) -> &'static [&'static str] {
		&["getOrientation", "setOrientation"]
	}

	async fn handle(&self, cx: &mut CommandContext<'_>, command: &str, params: Value) -> Result<Value> {
		let natural = cx.options.android_natural_orientation;
		if command == "getOrientation" {
			let value = cx
				.channel
				.send_action("orientation", json!({ "naturalOrientation": natural }))
				.await?;
			return Ok(match value {
				Value::String(s) => Value::String(s.to_uppercase()),
				other => other,
			});
		}

		let orientation = params
			.get("orientation")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::InvalidArgument("setOrientation requires an orientation".into()))?
			.to_uppercase();
		info!(target = "uia.session", %orientation, "setting orientation");
		cx.channel
			.send_action(
				"orientation",
				json!({ "orientation": orientation, "naturalOrientation": natural }),
			)
			.await
	}
}

/// Script execution. Only web contexts can run scripts; they go to the engine.
pub struct ExecuteCommands;

#[async_trait]
impl CommandHandler for ExecuteCommands {
	fn commands(&self) -> &'static [&'static str] {
		&["execute", "executeSync"]
	}

	async fn handle(&self, cx: &mut CommandContext<'_>, _command: &str, params: Value) -> Result<Value> {
		match cx.arbiter.proxy() {
			Some(engine) => engine.proxy("execute", params).await,
			None => Err(Error::InvalidArgument(format!(
				"script execution is not supported in the {} context",
				cx.arbiter.current_context()
			))),
		}
	}
}
