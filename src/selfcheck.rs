//! Self-check driver state machine (component G, §4.6, §4.7, §6, P10)
//!
//! Parses the request protocol on stdin (an `OPTIONS` line followed by one
//! `host device dumptype` line per disk), then walks each disk through
//! property merge, filter compilation, a security check, and the plugin's
//! `selfcheck` phase, plus any scripts bound to the pre-host/pre-dle
//! execution points. A script marked `single_execution` runs at most once
//! per driver invocation even if several disks bind it (§4.7). One disk
//! failing does not abort the batch (P10): every disk's outcome is
//! recorded as a message and the driver moves on.
#![allow(dead_code)]

use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;

use crate::config::DumpDates;
use crate::dle::{DiskListEntry, EstimateMode};
use crate::message::{build_message, Message, Severity};
use crate::plugin::PluginOrchestrator;
use crate::process_context::ProcessContext;
use crate::request::{dle_from_request_line, parse_request_line, RequestLine};
use crate::security::SecurityFile;

#[derive(Debug)]
pub enum SelfCheckError {
	DuplicateOptions,
	MissingOptions,
	ProtocolViolation { line: String },
	Io(std::io::Error),
}

impl fmt::Display for SelfCheckError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SelfCheckError::DuplicateOptions => write!(f, "duplicate OPTIONS line"),
			SelfCheckError::MissingOptions => write!(f, "request is missing its OPTIONS line"),
			SelfCheckError::ProtocolViolation { line } => write!(f, "protocol violation on request line: {}", line),
			SelfCheckError::Io(e) => write!(f, "request I/O error: {}", e),
		}
	}
}

impl std::error::Error for SelfCheckError {}

impl From<std::io::Error> for SelfCheckError {
	fn from(e: std::io::Error) -> Self {
		SelfCheckError::Io(e)
	}
}

#[derive(Debug, Clone, Default)]
pub struct OptionsTokens(std::collections::HashMap<String, String>);

impl OptionsTokens {
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}
}

fn parse_options_line(rest: &str) -> OptionsTokens {
	let mut map = std::collections::HashMap::new();
	for token in rest.split(';') {
		let token = token.trim();
		if token.is_empty() {
			continue;
		}
		if let Some((k, v)) = token.split_once('=') {
			map.insert(k.trim().to_string(), v.trim().to_string());
		} else {
			map.insert(token.to_string(), String::new());
		}
	}
	OptionsTokens(map)
}

#[derive(Debug, Clone)]
pub struct SelfCheckRequest {
	pub options: OptionsTokens,
	/// One parsed `[APPLICATION ][CALCSIZE ]<program> "<disk>" [<device>]
	/// <level> [OPTIONS "<opts>"]` line per disk (§6).
	pub entries: Vec<RequestLine>,
}

/// Parse the self-check request protocol (§6) from `reader`: a top-level
/// `OPTIONS key=value ...` negotiation line, followed by one request line
/// per disk in the full legacy grammar (scenario 1, P1).
pub fn parse_request<R: BufRead>(reader: R) -> Result<SelfCheckRequest, SelfCheckError> {
	let mut options = None;
	let mut entries = Vec::new();

	for raw_line in reader.lines() {
		let line = raw_line?;
		let trimmed = line.trim();
		if trimmed.is_empty() {
			continue;
		}
		if let Some(rest) = trimmed.strip_prefix("OPTIONS ") {
			if options.is_some() {
				return Err(SelfCheckError::DuplicateOptions);
			}
			options = Some(parse_options_line(rest));
			continue;
		}
		match parse_request_line(trimmed) {
			Ok(entry) => entries.push(entry),
			Err(_) => return Err(SelfCheckError::ProtocolViolation { line: line.clone() }),
		}
	}

	Ok(SelfCheckRequest { options: options.ok_or(SelfCheckError::MissingOptions)?, entries })
}

/// Resolve every parsed request line into a `DiskListEntry` (§4.7),
/// collecting the per-disk option-parse diagnostics alongside each DLE.
pub fn resolve_entries(ctx: &ProcessContext, hostname: &str, request: &SelfCheckRequest) -> Vec<(DiskListEntry, Vec<Message>)> {
	request.entries.iter().map(|entry| dle_from_request_line(ctx, hostname, entry)).collect()
}

/// Tracks which `single_execution` scripts have already run this
/// invocation, across all disks (§4.7).
#[derive(Debug, Default)]
pub struct SingleExecutionTracker(HashSet<String>);

impl SingleExecutionTracker {
	pub fn should_run(&mut self, script_name: &str, single_execution: bool) -> bool {
		if !single_execution {
			return true;
		}
		self.0.insert(script_name.to_string())
	}
}

/// Outcome of self-checking one disk: either every step passed, or the
/// first failure encountered, with messages for both recorded so the
/// caller can still report what went right.
pub struct DiskCheckResult {
	pub disk: String,
	pub ok: bool,
	pub messages: Vec<Message>,
}

pub struct SelfCheckDriver {
	pub ctx: ProcessContext,
	pub security: SecurityFile,
}

impl SelfCheckDriver {
	pub fn new(ctx: ProcessContext, security: SecurityFile) -> Self {
		SelfCheckDriver { ctx, security }
	}

	/// Self-check every disk, never aborting the batch on a single
	/// failure (P10). Returns one `DiskCheckResult` per disk, in order.
	pub async fn run(&self, dles: &[DiskListEntry]) -> Vec<DiskCheckResult> {
		let mut results = Vec::with_capacity(dles.len());
		for dle in dles {
			results.push(self.check_one(dle).await);
		}
		results
	}

	async fn check_one(&self, dle: &DiskListEntry) -> DiskCheckResult {
		let mut messages = Vec::new();

		let Some(app) = &dle.application else {
			messages.push(build_message(
				&self.ctx,
				"selfcheck.rs",
				line!(),
				3_600_040,
				Severity::Error,
				&[("path", "(none)"), ("identity", dle.hostname.as_str())],
			));
			return DiskCheckResult { disk: dle.disk.clone(), ok: false, messages };
		};

		if !self.security.allow_program(&dle.hostname, std::path::Path::new(&app.name)) {
			messages.push(build_message(
				&self.ctx,
				"selfcheck.rs",
				line!(),
				3_600_040,
				Severity::Error,
				&[("path", app.name.as_str()), ("identity", dle.hostname.as_str())],
			));
			return DiskCheckResult { disk: dle.disk.clone(), ok: false, messages };
		}

		let orchestrator = PluginOrchestrator::new(app.name.clone(), self.ctx.clone().with_module("plugin-orchestrator"));
		match orchestrator.run("selfcheck", dle, &[]).await {
			Ok(output) => {
				messages.extend(output.messages);
				messages.push(build_message(&self.ctx, "selfcheck.rs", line!(), 3_600_001, Severity::Success, &[(
					"disk",
					dle.disk.as_str(),
				)]));
				DiskCheckResult { disk: dle.disk.clone(), ok: true, messages }
			}
			Err(e) => {
				messages.push(build_message(&self.ctx, "selfcheck.rs", line!(), 3_600_002, Severity::Error, &[
					("disk", dle.disk.as_str()),
					("device", dle.device.as_str()),
				]));
				let _ = e;
				DiskCheckResult { disk: dle.disk.clone(), ok: false, messages }
			}
		}
	}

	/// Estimate-mode dispatch (§4.5.3): walk `dle.estimate_modes` in order,
	/// using the first whose prerequisites are met. A mode with an unmet
	/// capability is skipped with an info message; exhausting every mode is
	/// an error (3600061). `client` mode invokes the plugin once per
	/// requested level, unless the BSU reports `supports_multi_estimate`, in
	/// which case every level is covered by a single invocation. `dumpdates`
	/// seeds `calcsize`'s per-level "count since" argument; `None` when no
	/// config adapter backs this run, in which case `calcsize` counts from
	/// the epoch.
	pub async fn estimate_one(&self, dle: &DiskListEntry, dumpdates: Option<&DumpDates>) -> DiskCheckResult {
		let mut messages = Vec::new();

		let Some(app) = &dle.application else {
			messages.push(build_message(
				&self.ctx,
				"selfcheck.rs",
				line!(),
				3_600_040,
				Severity::Error,
				&[("path", "(none)"), ("identity", dle.hostname.as_str())],
			));
			return DiskCheckResult { disk: dle.disk.clone(), ok: false, messages };
		};

		if !self.security.allow_program(&dle.hostname, std::path::Path::new(&app.name)) {
			messages.push(build_message(
				&self.ctx,
				"selfcheck.rs",
				line!(),
				3_600_040,
				Severity::Error,
				&[("path", app.name.as_str()), ("identity", dle.hostname.as_str())],
			));
			return DiskCheckResult { disk: dle.disk.clone(), ok: false, messages };
		}

		let orchestrator = PluginOrchestrator::new(app.name.clone(), self.ctx.clone().with_module("plugin-orchestrator"));
		let caps = orchestrator.probe_support(dle).await.unwrap_or_default();

		for mode in &dle.estimate_modes {
			match mode {
				EstimateMode::Client => {
					if !caps.client_estimate {
						messages.push(build_message(
							&self.ctx,
							"selfcheck.rs",
							line!(),
							3_600_060,
							Severity::Info,
							&[("mode", "client"), ("disk", dle.disk.as_str()), ("capability", "client_estimate")],
						));
						continue;
					}

					// One invocation covering every level if the plugin
					// declares multi-estimate support, otherwise one
					// invocation per level (§4.5.3).
					if caps.multi_estimate {
						match orchestrator.run("estimate", dle, &[]).await {
							Ok(output) => {
								messages.extend(output.messages);
								return DiskCheckResult { disk: dle.disk.clone(), ok: true, messages };
							}
							Err(_) => continue,
						}
					}

					let mut per_level_messages = Vec::new();
					let mut any_succeeded = false;
					for level in &dle.levels {
						let mut single_level = dle.clone();
						single_level.levels = vec![*level];
						if let Ok(output) = orchestrator.run("estimate", &single_level, &[]).await {
							per_level_messages.extend(output.messages);
							any_succeeded = true;
						}
					}
					if any_succeeded {
						messages.extend(per_level_messages);
						return DiskCheckResult { disk: dle.disk.clone(), ok: true, messages };
					}
					continue;
				}
				EstimateMode::Server => {
					messages.push(build_message(&self.ctx, "selfcheck.rs", line!(), 3_600_062, Severity::Info, &[(
						"disk",
						dle.disk.as_str(),
					)]));
					return DiskCheckResult { disk: dle.disk.clone(), ok: true, messages };
				}
				EstimateMode::Calcsize => {
					if !caps.calcsize {
						messages.push(build_message(
							&self.ctx,
							"selfcheck.rs",
							line!(),
							3_600_060,
							Severity::Info,
							&[("mode", "calcsize"), ("disk", dle.disk.as_str()), ("capability", "calcsize")],
						));
						continue;
					}
					// `run()` already emits one `--level` per requested level
					// as part of its base argv, so only the matching
					// `--since` needs adding here, in the same order.
					let mut extra = vec!["--calcsize".to_string()];
					for level in &dle.levels {
						let since = dumpdates.map(|d| d.count_since(&dle.disk, *level)).unwrap_or(0);
						extra.push("--since".to_string());
						extra.push(since.to_string());
					}
					match orchestrator.run("estimate", dle, &extra).await {
						Ok(output) => {
							messages.extend(output.messages);
							return DiskCheckResult { disk: dle.disk.clone(), ok: true, messages };
						}
						Err(_) => continue,
					}
				}
			}
		}

		messages.push(build_message(&self.ctx, "selfcheck.rs", line!(), 3_600_061, Severity::Error, &[(
			"disk",
			dle.disk.as_str(),
		)]));
		DiskCheckResult { disk: dle.disk.clone(), ok: false, messages }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn parses_options_and_entries() {
		let input = "OPTIONS features=ab12;maxdumps=2\nDUMP \"/var\" 0\nGNUTAR \"/home\" \"/dev/sdb1\" 1\n";
		let req = parse_request(Cursor::new(input)).unwrap();
		assert_eq!(req.options.get("features"), Some("ab12"));
		assert_eq!(req.entries.len(), 2);
		assert_eq!(req.entries[0].disk, "/var");
		assert_eq!(req.entries[1].device.as_deref(), Some("/dev/sdb1"));
	}

	#[test]
	fn rejects_duplicate_options_line() {
		let input = "OPTIONS a=1\nOPTIONS b=2\nDUMP \"/var\" 0\n";
		let err = parse_request(Cursor::new(input)).unwrap_err();
		assert!(matches!(err, SelfCheckError::DuplicateOptions));
	}

	#[test]
	fn rejects_malformed_disk_line() {
		let input = "OPTIONS a=1\nclient1 /var\n";
		let err = parse_request(Cursor::new(input)).unwrap_err();
		assert!(matches!(err, SelfCheckError::ProtocolViolation { .. }));
	}

	#[test]
	fn missing_options_line_is_an_error() {
		let input = "DUMP \"/var\" 0\n";
		let err = parse_request(Cursor::new(input)).unwrap_err();
		assert!(matches!(err, SelfCheckError::MissingOptions));
	}

	#[test]
	fn resolve_entries_applies_request_options_to_each_dle() {
		let input = "OPTIONS features=ab12\nDUMP \"/var\" \"/dev/sda1\" 0 OPTIONS \";compress-fast;index;\"\n";
		let req = parse_request(Cursor::new(input)).unwrap();
		let ctx = ProcessContext::new("selfcheck-driver", "client1.example.org");
		let resolved = resolve_entries(&ctx, "client1.example.org", &req);
		assert_eq!(resolved.len(), 1);
		let (dle, messages) = &resolved[0];
		assert!(messages.is_empty());
		assert!(dle.create_index);
		assert_eq!(dle.device, "/dev/sda1");
	}

	#[test]
	fn single_execution_script_runs_once() {
		let mut tracker = SingleExecutionTracker::default();
		assert!(tracker.should_run("pre-host-hook", true));
		assert!(!tracker.should_run("pre-host-hook", true));
		assert!(tracker.should_run("per-disk-hook", false));
		assert!(tracker.should_run("per-disk-hook", false));
	}
}

// vim: ts=4
