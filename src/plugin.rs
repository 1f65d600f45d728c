//! Plugin orchestrator (component F, §4.6, §4.7, scenario 4)
//!
//! Spawns an Application-API plugin binary for each phase (`support`,
//! `selfcheck`, `estimate`, `backup`, `restore`, ...), marshals disk-list
//! properties into `--property NAME=VALUE` arguments, and parses the
//! plugin's stdout protocol: `OK `/`ERROR ` status lines, `PROPERTY NAME
//! VALUE` output, and `MESSAGE JSON` blocks. Stdout and stderr are drained
//! concurrently (§5.1) so a plugin that fills its stderr pipe while we
//! wait on stdout cannot deadlock the orchestrator.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::dle::{DiskListEntry, PropertyValue};
use crate::message::{build_message, parse_json_messages, Message, Severity};
use crate::process_context::ProcessContext;

#[derive(Debug)]
pub enum PluginError {
	SpawnFailed { plugin: String, detail: String },
	ExitedNonZero { plugin: String, status: i32 },
	KilledBySignal { plugin: String, signal: i32 },
	MissingCapability { plugin: String, capability: String },
	ProtocolViolation { plugin: String, detail: String },
	Io(std::io::Error),
}

impl fmt::Display for PluginError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PluginError::SpawnFailed { plugin, detail } => write!(f, "failed to spawn plugin {}: {}", plugin, detail),
			PluginError::ExitedNonZero { plugin, status } => write!(f, "plugin {} exited with status {}", plugin, status),
			PluginError::KilledBySignal { plugin, signal } => write!(f, "plugin {} was killed by signal {}", plugin, signal),
			PluginError::MissingCapability { plugin, capability } => {
				write!(f, "plugin {} does not support {}", plugin, capability)
			}
			PluginError::ProtocolViolation { plugin, detail } => write!(f, "plugin {} protocol violation: {}", plugin, detail),
			PluginError::Io(e) => write!(f, "plugin I/O error: {}", e),
		}
	}
}

impl std::error::Error for PluginError {}

impl From<std::io::Error> for PluginError {
	fn from(e: std::io::Error) -> Self {
		PluginError::Io(e)
	}
}

/// Declared plugin capabilities from the `support` probe (the BSU:
/// backup-support-unit record, §4.6).
#[derive(Debug, Clone, Default)]
pub struct SupportCapabilities {
	pub config: bool,
	pub host: bool,
	pub disk: bool,
	pub max_level: Option<u32>,
	pub index_line: bool,
	pub message_line: bool,
	pub record: bool,
	pub include_file: bool,
	pub include_list: bool,
	pub include_list_glob: bool,
	pub exclude_file: bool,
	pub exclude_list: bool,
	pub exclude_list_glob: bool,
	pub collection: bool,
	pub multi_estimate: bool,
	pub calcsize: bool,
	pub client_estimate: bool,
	pub amfeatures: bool,
	pub securityfile: bool,
}

fn is_yes(value: &str) -> bool {
	value.eq_ignore_ascii_case("yes")
}

/// Parse a `support` subcommand's stdout (`KEY VALUE` lines) into a
/// `SupportCapabilities` record. Unrecognized keys are ignored rather than
/// rejected, since the plugin protocol is allowed to grow.
pub fn parse_support_output(output: &str) -> SupportCapabilities {
	let mut caps = SupportCapabilities::default();
	for line in output.lines() {
		let mut parts = line.split_whitespace();
		let (Some(key), Some(value)) = (parts.next(), parts.next()) else { continue };
		match key {
			"CONFIG" => caps.config = is_yes(value),
			"HOST" => caps.host = is_yes(value),
			"DISK" => caps.disk = is_yes(value),
			"MAX-LEVEL" => caps.max_level = value.parse().ok(),
			"INDEX-LINE" => caps.index_line = is_yes(value),
			"MESSAGE-LINE" => caps.message_line = is_yes(value),
			"RECORD" => caps.record = is_yes(value),
			"INCLUDE-FILE" => caps.include_file = is_yes(value),
			"INCLUDE-LIST" => caps.include_list = is_yes(value),
			"INCLUDE-LIST-GLOB" => caps.include_list_glob = is_yes(value),
			"EXCLUDE-FILE" => caps.exclude_file = is_yes(value),
			"EXCLUDE-LIST" => caps.exclude_list = is_yes(value),
			"EXCLUDE-LIST-GLOB" => caps.exclude_list_glob = is_yes(value),
			"COLLECTION" => caps.collection = is_yes(value),
			"MULTI-ESTIMATE" => caps.multi_estimate = is_yes(value),
			"CALCSIZE" => caps.calcsize = is_yes(value),
			"CLIENT-ESTIMATE" => caps.client_estimate = is_yes(value),
			"AMFEATURES" => caps.amfeatures = is_yes(value),
			"SECURITYFILE" => caps.securityfile = is_yes(value),
			_ => {}
		}
	}
	caps
}

/// Parsed output of one plugin invocation.
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
	pub properties: HashMap<String, Vec<String>>,
	pub messages: Vec<Message>,
	pub ok_lines: Vec<String>,
	pub error_lines: Vec<String>,
}

/// Spawns and talks to one Application-API plugin binary for a single
/// disk-list entry.
pub struct PluginOrchestrator {
	pub plugin_path: String,
	pub ctx: ProcessContext,
}

impl PluginOrchestrator {
	pub fn new(plugin_path: impl Into<String>, ctx: ProcessContext) -> Self {
		PluginOrchestrator { plugin_path: plugin_path.into(), ctx }
	}

	/// Marshal properties into `--<dashed-key> <value>` pairs (§4.5.2
	/// "Argument marshalling of properties"): the key is lowercased and
	/// `_` replaced with `-`, emitted as the flag itself rather than wrapped
	/// in a generic `--property`; one flag/value pair per entry of
	/// `values`, with all of one property's values kept contiguous.
	fn property_args(properties: &HashMap<String, PropertyValue>) -> Vec<String> {
		let mut args = Vec::new();
		for (name, value) in properties {
			let flag = format!("--{}", name.to_lowercase().replace('_', "-"));
			for v in &value.values {
				args.push(flag.clone());
				args.push(v.clone());
			}
		}
		args
	}

	/// Probe plugin capabilities via the `support` subcommand.
	pub async fn probe_support(&self, dle: &DiskListEntry) -> Result<SupportCapabilities, PluginError> {
		let output = self.run("support", dle, &[]).await?;
		if !output.error_lines.is_empty() {
			return Err(PluginError::ProtocolViolation {
				plugin: self.plugin_path.clone(),
				detail: output.error_lines.join("; "),
			});
		}
		Ok(parse_support_output(&output.ok_lines.join("\n")))
	}

	/// Run one phase (`selfcheck`, `estimate`, `backup`, `restore`, ...)
	/// against `dle`, with any phase-specific extra arguments. Argv order
	/// follows §4.5.2 step 1: phase name, `--execute-where client`,
	/// `--config`/`--host`/`--disk`/`--device`, one `--level` per requested
	/// level, then property flags. This core has no on-disk configuration
	/// dialect (§2 Non-goals), so `--config` carries the DLE's dumptype
	/// name, the closest thing to a configuration reference it tracks.
	pub async fn run(&self, subcommand: &str, dle: &DiskListEntry, extra_args: &[String]) -> Result<PluginOutput, PluginError> {
		let mut args = vec![subcommand.to_string(), "--execute-where".to_string(), "client".to_string()];
		args.push("--config".to_string());
		args.push(dle.dumptype.clone());
		args.push("--host".to_string());
		args.push(dle.hostname.clone());
		args.push("--disk".to_string());
		args.push(dle.disk.clone());
		if !dle.device.is_empty() {
			args.push("--device".to_string());
			args.push(dle.device.clone());
		}
		for level in &dle.levels {
			args.push("--level".to_string());
			args.push(level.to_string());
		}
		if let Some(app) = &dle.application {
			args.extend(Self::property_args(&app.properties));
		}
		args.extend(extra_args.iter().cloned());

		let mut child = Command::new(&self.plugin_path)
			.args(&args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|e| PluginError::SpawnFailed { plugin: self.plugin_path.clone(), detail: e.to_string() })?;

		let stdout = child.stdout.take().expect("piped stdout");
		let stderr = child.stderr.take().expect("piped stderr");

		let stdout_task = read_stdout(stdout, self.plugin_path.clone(), self.ctx.clone());
		let stderr_task = read_stderr(stderr);

		let (parsed, stderr_lines) = tokio::join!(stdout_task, stderr_task);
		let mut output = parsed?;

		let status = child.wait().await?;
		if let Some(signal) = status.signal() {
			return Err(PluginError::KilledBySignal { plugin: self.plugin_path.clone(), signal });
		}
		if !status.success() {
			output.error_lines.extend(stderr_lines);
			return Err(PluginError::ExitedNonZero {
				plugin: self.plugin_path.clone(),
				status: status.code().unwrap_or(-1),
			});
		}

		Ok(output)
	}
}

async fn read_stdout(
	stdout: tokio::process::ChildStdout,
	plugin: String,
	ctx: ProcessContext,
) -> Result<PluginOutput, PluginError> {
	let mut reader = BufReader::new(stdout).lines();
	let mut output = PluginOutput::default();
	while let Some(line) = reader.next_line().await? {
		if let Some(rest) = line.strip_prefix("OK ") {
			output.ok_lines.push(rest.to_string());
			output.messages.push(build_message(&ctx, "plugin.rs", 0, 3_600_056, Severity::Success, &[("text", rest)]));
		} else if let Some(rest) = line.strip_prefix("ERROR ") {
			output.error_lines.push(rest.to_string());
			output.messages.push(build_message(&ctx, "plugin.rs", 0, 3_600_057, Severity::Error, &[("text", rest)]));
		} else if let Some(rest) = line.strip_prefix("PROPERTY ") {
			let mut parts = rest.splitn(2, ' ');
			if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
				output.properties.entry(name.to_string()).or_default().push(value.to_string());
			}
		} else if line == "MESSAGE JSON" {
			// The remainder of stdout, not just the next line, is one JSON
			// blob (§4.5.2 step 3) — a plugin is free to pretty-print it.
			let mut blob = String::new();
			while let Some(next) = reader.next_line().await? {
				blob.push_str(&next);
				blob.push('\n');
			}
			if blob.trim().is_empty() {
				return Err(PluginError::ProtocolViolation { plugin, detail: "MESSAGE JSON with no payload".to_string() });
			}
			let parsed = parse_json_messages(blob.trim()).map_err(|e| PluginError::ProtocolViolation {
				plugin: plugin.clone(),
				detail: format!("malformed MESSAGE JSON payload: {}", e),
			})?;
			output.messages.extend(parsed);
			break;
		}
	}
	Ok(output)
}

async fn read_stderr(stderr: tokio::process::ChildStderr) -> Vec<String> {
	let mut reader = BufReader::new(stderr).lines();
	let mut lines = Vec::new();
	while let Ok(Some(line)) = reader.next_line().await {
		lines.push(line);
	}
	lines
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_support_capabilities() {
		let output = "CONFIG YES\nHOST NO\nMAX-LEVEL 9\nINDEX-LINE YES\nRECORD YES\n";
		let caps = parse_support_output(output);
		assert!(caps.config);
		assert!(!caps.host);
		assert_eq!(caps.max_level, Some(9));
		assert!(caps.index_line);
		assert!(caps.record);
	}

	#[test]
	fn unknown_keys_are_ignored() {
		let output = "SOME-FUTURE-KEY YES\nCONFIG YES\n";
		let caps = parse_support_output(output);
		assert!(caps.config);
	}

	#[test]
	fn property_args_emits_the_key_as_a_dashed_flag() {
		let mut props = HashMap::new();
		props.insert("compression".to_string(), PropertyValue::single("gzip"));
		let args = PluginOrchestrator::property_args(&props);
		assert_eq!(args, vec!["--compression".to_string(), "gzip".to_string()]);
	}

	#[test]
	fn property_args_lowercases_and_dashes_the_key() {
		let mut props = HashMap::new();
		props.insert("TAR_BLOCKSIZE".to_string(), PropertyValue::single("512"));
		let args = PluginOrchestrator::property_args(&props);
		assert_eq!(args, vec!["--tar-blocksize".to_string(), "512".to_string()]);
	}

	#[test]
	fn property_args_emits_one_pair_per_value_contiguously() {
		let mut props = HashMap::new();
		props.insert("include".to_string(), PropertyValue { values: vec!["./a".to_string(), "./b".to_string()], priority: false, append: false });
		let args = PluginOrchestrator::property_args(&props);
		assert_eq!(args, vec!["--include".to_string(), "./a".to_string(), "--include".to_string(), "./b".to_string()]);
	}
}

// vim: ts=4
