//! Structured-message registry (component A, §4.1)
//!
//! Numbered, argument-parameterized, severity-tagged diagnostics. Every
//! other subcomponent reports through this registry rather than returning
//! ad-hoc strings; `CoreError` (src/error.rs) is the separate Rust-level
//! propagation channel for "this call failed".

use std::collections::HashMap;
use std::io::Write;
use std::sync::OnceLock;

use crate::errno_table::{errno_string, errno_symbol};
use crate::process_context::ProcessContext;

/// Message severity, ordered `Success < Info < Message < Warning < Error <
/// Critical` per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
	Success,
	Info,
	Message,
	Warning,
	Error,
	Critical,
}

impl Severity {
	pub fn as_str(&self) -> &'static str {
		match self {
			Severity::Success => "success",
			Severity::Info => "info",
			Severity::Message => "message",
			Severity::Warning => "warning",
			Severity::Error => "error",
			Severity::Critical => "critical",
		}
	}
}

/// The display-unit the `size:` format specifier divides by (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct DisplayUnit {
	pub divisor: i64,
	pub letter: char,
}

impl Default for DisplayUnit {
	fn default() -> Self {
		DisplayUnit { divisor: 1024, letter: 'K' }
	}
}

/// A fully-built diagnostic, ready for interpolation and emission.
///
/// `source_file`/`hint` are owned `String`s rather than `&'static str` so a
/// `Message` parsed back out of a plugin's `MESSAGE JSON` blob (§4.1, P8) is
/// a real value the rest of the core can hold and compare, not a lifetime
/// tied to the process that first built it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub source_file: String,
	pub source_line: u32,
	pub code: i32,
	pub severity: Severity,
	pub process: String,
	pub running_on: String,
	pub component: String,
	pub module: String,
	/// Named arguments in insertion order (order matters for JSON field
	/// ordering but never for interpolation, which is token-keyed).
	pub args: Vec<(String, String)>,
	pub hint: Option<String>,
	/// The errno active when this message was built, if any (drives the
	/// `errno`/`errnostr`/`errnocode` tokens).
	pub errno: Option<i32>,
}

impl Message {
	pub fn arg(&self, key: &str) -> Option<&str> {
		self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}
}

/// §4.1's severity names, as accepted back out of a `MESSAGE JSON` blob.
fn parse_severity(s: &str) -> Result<Severity, String> {
	match s {
		"success" => Ok(Severity::Success),
		"info" => Ok(Severity::Info),
		"message" => Ok(Severity::Message),
		"warning" => Ok(Severity::Warning),
		"error" => Ok(Severity::Error),
		"critical" => Ok(Severity::Critical),
		other => Err(format!("unknown severity {}", other)),
	}
}

/// Fields `fprint_message` always writes; anything else in the object is a
/// message argument.
const KNOWN_FIELDS: &[&str] =
	&["source_filename", "source_line", "severity", "process", "running_on", "component", "module", "code", "message", "hint"];

impl<'de> serde::de::Deserialize<'de> for Message {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::de::Deserializer<'de>,
	{
		use serde::de::Error as _;

		let value = serde_json::Value::deserialize(deserializer)?;
		let obj = value.as_object().ok_or_else(|| D::Error::custom("message is not a JSON object"))?;

		let field = |name: &str| -> Result<String, D::Error> {
			obj.get(name)
				.and_then(serde_json::Value::as_str)
				.map(str::to_string)
				.ok_or_else(|| D::Error::custom(format!("message is missing field {}", name)))
		};

		let source_file = field("source_filename")?;
		let source_line: u32 = field("source_line")?.parse().map_err(D::Error::custom)?;
		let severity = parse_severity(&field("severity")?).map_err(D::Error::custom)?;
		let process = field("process")?;
		let running_on = field("running_on")?;
		let component = field("component")?;
		let module = field("module")?;
		let code: i32 = field("code")?.parse().map_err(D::Error::custom)?;
		let hint = obj.get("hint").and_then(serde_json::Value::as_str).map(str::to_string);

		let mut args = Vec::new();
		for (k, v) in obj {
			if KNOWN_FIELDS.contains(&k.as_str()) {
				continue;
			}
			if let Some(s) = v.as_str() {
				args.push((k.clone(), s.to_string()));
			}
		}

		Ok(Message { source_file, source_line, code, severity, process, running_on, component, module, args, hint, errno: None })
	}
}

/// Parse one or more structured messages out of a plugin's `MESSAGE JSON`
/// payload (§4.1, §4.5.2): a JSON array of the same object shape
/// `fprint_message` emits.
pub fn parse_json_messages(json: &str) -> Result<Vec<Message>, serde_json::Error> {
	serde_json::from_str(json)
}

struct CodeDef {
	template: &'static str,
	hint: Option<&'static str>,
}

static CATALOG: OnceLock<HashMap<i32, CodeDef>> = OnceLock::new();

fn entry(template: &'static str, hint: Option<&'static str>) -> CodeDef {
	CodeDef { template, hint }
}

fn build_catalog() -> HashMap<i32, CodeDef> {
	let mut m = HashMap::new();
	// 3600xxx: self-check driver (component G)
	m.insert(
		3600001,
		entry("disk %{disk} on %{running_on} checked successfully", None),
	);
	m.insert(
		3600002,
		entry(
			"disk %{disk} on %{running_on}: could not access device %{device}: %{errnostr}",
			Some("check device permissions and that the path exists"),
		),
	);
	m.insert(
		3600010,
		entry(
			"property %{property} for disk %{disk}: conflicting priority values, using client value %{value}",
			None,
		),
	);
	m.insert(
		3600011,
		entry(
			"property %{property} for disk %{disk}: no priority declared by either side, using client value %{value}",
			None,
		),
	);
	m.insert(
		3600020,
		entry(
			"include pattern %{pattern} for disk %{disk} does not start with ./",
			Some("include patterns must be relative to the device, prefixed with ./"),
		),
	);
	m.insert(
		3600021,
		entry("no files matched any include pattern for disk %{disk}", None),
	);
	m.insert(
		3600022,
		entry("could not open filter file %{path} for disk %{disk}: %{errnostr}", None),
	);
	m.insert(
		3600030,
		entry("support probe for plugin %{plugin} failed: %{detail}", None),
	);
	m.insert(
		3600031,
		entry("plugin %{plugin} exited with status %{status}", None),
	);
	m.insert(
		3600032,
		entry("plugin %{plugin} was killed by signal %{signal}", None),
	);
	m.insert(
		3600033,
		entry("plugin %{plugin} does not support %{capability}", None),
	);
	m.insert(
		3600040,
		entry(
			"refusing to run %{path}: not listed in the security file for %{identity}",
			Some("add an entry to the security file or use a whitelisted binary"),
		),
	);
	m.insert(
		3600041,
		entry("security file %{path} has unsafe ownership or permissions", None),
	);
	m.insert(
		3600050,
		entry("protocol violation on request line: %{line}", None),
	);
	m.insert(3600051, entry("duplicate OPTIONS line", None));
	m.insert(3600056, entry("%{text}", None));
	m.insert(3600057, entry("%{text}", None));
	m.insert(3600058, entry("%{text}", None));
	m.insert(
		3600060,
		entry("estimate mode %{mode} unsupported for disk %{disk}: %{capability} missing", None),
	);
	m.insert(
		3600061,
		entry("no estimate mode succeeded for disk %{disk}", None),
	);
	m.insert(
		3600062,
		entry("estimate for disk %{disk} deferred to the server", None),
	);
	m.insert(
		3600070,
		entry("bind attempt on port %{port} failed (in use), retrying", None),
	);
	m.insert(
		3600071,
		entry("bind attempt on port %{port} failed permanently: %{detail}", None),
	);
	m.insert(
		3600080,
		entry("duplicate %{token} option for disk %{disk}", None),
	);
	m.insert(
		3600081,
		entry("unknown option token %{token} for disk %{disk}", None),
	);
	m.insert(
		3600082,
		entry("option %{token} for disk %{disk} is missing its value", None),
	);
	m
}

/// Build a `Message` for `code`, interpolating nothing yet — resolution
/// happens in `get_message`/`fprint_message` so the same `Message` can be
/// rendered multiple times (e.g. legacy text once, JSON once).
#[allow(clippy::too_many_arguments)]
pub fn build_message(
	ctx: &ProcessContext,
	source_file: &'static str,
	source_line: u32,
	code: i32,
	severity: Severity,
	args: &[(&str, &str)],
) -> Message {
	Message {
		source_file: source_file.to_string(),
		source_line,
		code,
		severity,
		process: ctx.pname.clone(),
		running_on: ctx.running_on.clone(),
		component: ctx.component.clone(),
		module: ctx.module.clone(),
		args: args.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
		hint: CATALOG.get_or_init(build_catalog).get(&code).and_then(|d| d.hint).map(str::to_string),
		errno: None,
	}
}

/// As `build_message`, but records the current errno for `errno`/`errnostr`/
/// `errnocode` interpolation.
#[allow(clippy::too_many_arguments)]
pub fn build_message_with_errno(
	ctx: &ProcessContext,
	source_file: &'static str,
	source_line: u32,
	code: i32,
	severity: Severity,
	args: &[(&str, &str)],
	errno: i32,
) -> Message {
	let mut msg = build_message(ctx, source_file, source_line, code, severity, args);
	msg.errno = Some(errno);
	msg
}

/// JSON-escape a string per §4.1: only `\` and `"` are escaped.
fn json_escape(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		if c == '\\' || c == '"' {
			out.push('\\');
		}
		out.push(c);
	}
	out
}

/// Resolve the `%{...}` template for `m.code` against `m`'s arguments.
pub fn get_message(m: &Message, unit: DisplayUnit) -> String {
	let template = CATALOG.get_or_init(build_catalog).get(&m.code).map(|d| d.template).unwrap_or("");
	interpolate(template, m, unit)
}

fn interpolate(template: &str, m: &Message, unit: DisplayUnit) -> String {
	let mut out = String::with_capacity(template.len());
	let chars: Vec<char> = template.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		if chars[i] == '%' && i + 1 < chars.len() && chars[i + 1] == '%' {
			out.push('%');
			i += 2;
			continue;
		}
		if chars[i] == '%' && i + 1 < chars.len() && chars[i + 1] == '{' {
			let mut j = i + 2;
			let mut token = String::new();
			while j < chars.len() && chars[j] != '}' {
				token.push(chars[j]);
				j += 1;
			}
			out.push_str(&resolve_token(&token, m, unit));
			i = j + 1;
			continue;
		}
		out.push(chars[i]);
		i += 1;
	}
	json_escape(&out)
}

fn resolve_token(token: &str, m: &Message, unit: DisplayUnit) -> String {
	match token {
		"file" => return m.source_file.to_string(),
		"line" => return m.source_line.to_string(),
		"code" => return m.code.to_string(),
		"severity" => return m.severity.as_str().to_string(),
		"errno" => return m.errno.map(|e| e.to_string()).unwrap_or_else(|| "NONE".to_string()),
		"errnostr" => {
			return m.errno.map(errno_string).unwrap_or_else(|| "NONE".to_string());
		}
		"errnocode" => {
			return m.errno.map(|e| errno_symbol(e).to_string()).unwrap_or_else(|| "NONE".to_string());
		}
		_ => {}
	}

	if let Some((format, name)) = token.split_once(':') {
		if format == "size" {
			return match m.arg(name) {
				Some(v) => match v.parse::<i64>() {
					Ok(n) => format!("{} {}B", n / unit.divisor.max(1), unit.letter),
					Err(_) => "NONE".to_string(),
				},
				None => "NONE".to_string(),
			};
		}
		return "BAD-FORMAT".to_string();
	}

	m.arg(token).map(|v| v.to_string()).unwrap_or_else(|| "NONE".to_string())
}

/// Emit one JSON object for `m` to `w` (§4.1); the caller frames the
/// surrounding array and commas between objects.
pub fn fprint_message<W: Write>(w: &mut W, m: &Message, unit: DisplayUnit) -> std::io::Result<()> {
	write!(w, "{{")?;
	write!(w, "\"source_filename\":\"{}\",", json_escape(&m.source_file))?;
	write!(w, "\"source_line\":\"{}\",", m.source_line)?;
	write!(w, "\"severity\":\"{}\",", m.severity.as_str())?;
	write!(w, "\"process\":\"{}\",", json_escape(&m.process))?;
	write!(w, "\"running_on\":\"{}\",", json_escape(&m.running_on))?;
	write!(w, "\"component\":\"{}\",", json_escape(&m.component))?;
	write!(w, "\"module\":\"{}\",", json_escape(&m.module))?;
	write!(w, "\"code\":\"{}\",", m.code)?;
	for (k, v) in &m.args {
		write!(w, "\"{}\":\"{}\",", json_escape(k), json_escape(v))?;
	}
	write!(w, "\"message\":\"{}\"", get_message(m, unit))?;
	if let Some(hint) = &m.hint {
		write!(w, ",\"hint\":\"{}\"", json_escape(hint))?;
	}
	write!(w, "}}")?;
	Ok(())
}

/// Write a full `MESSAGE JSON\n[...]` response for a slice of messages (§6).
pub fn fprint_messages_json<W: Write>(
	w: &mut W,
	messages: &[Message],
	unit: DisplayUnit,
) -> std::io::Result<()> {
	writeln!(w, "MESSAGE JSON")?;
	write!(w, "[")?;
	for (i, m) in messages.iter().enumerate() {
		if i > 0 {
			write!(w, ",")?;
		}
		fprint_message(w, m, unit)?;
	}
	writeln!(w, "]")?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ctx() -> ProcessContext {
		ProcessContext::new("selfcheck-driver", "client1.example.org")
	}

	#[test]
	fn severity_orders_as_specified() {
		assert!(Severity::Info < Severity::Message);
		assert!(Severity::Message < Severity::Warning);
		assert!(Severity::Warning < Severity::Error);
		assert!(Severity::Error < Severity::Critical);
		assert!(Severity::Success < Severity::Info);
	}

	#[test]
	fn interpolates_named_argument() {
		let m = build_message(
			&ctx(),
			"selfcheck.rs",
			10,
			3600001,
			Severity::Success,
			&[("disk", "/var")],
		);
		let text = get_message(&m, DisplayUnit::default());
		assert!(text.contains("/var"));
	}

	#[test]
	fn missing_argument_is_none_literal() {
		let m = build_message(&ctx(), "selfcheck.rs", 10, 3600001, Severity::Success, &[]);
		let text = get_message(&m, DisplayUnit::default());
		assert!(text.contains("NONE"));
	}

	#[test]
	fn errno_tokens_resolve() {
		let m = build_message_with_errno(
			&ctx(),
			"selfcheck.rs",
			20,
			3600002,
			Severity::Error,
			&[("disk", "/var"), ("device", "/dev/sda1")],
			libc::EACCES,
		);
		let text = get_message(&m, DisplayUnit::default());
		assert!(text.to_lowercase().contains("permission") || !text.is_empty());
	}

	#[test]
	fn double_percent_is_literal() {
		let ctx = ctx();
		let m = Message {
			source_file: "x.rs".to_string(),
			source_line: 1,
			code: 9_999_999,
			severity: Severity::Info,
			process: ctx.pname.clone(),
			running_on: ctx.running_on.clone(),
			component: ctx.component.clone(),
			module: ctx.module.clone(),
			args: vec![],
			hint: None,
			errno: None,
		};
		assert_eq!(interpolate("100%% done", &m, DisplayUnit::default()), "100% done");
	}

	#[test]
	fn size_format_divides_by_unit() {
		let ctx = ctx();
		let m = Message {
			source_file: "x.rs".to_string(),
			source_line: 1,
			code: 1,
			severity: Severity::Info,
			process: ctx.pname.clone(),
			running_on: ctx.running_on.clone(),
			component: ctx.component.clone(),
			module: ctx.module.clone(),
			args: vec![("bytes".to_string(), "2048".to_string())],
			hint: None,
			errno: None,
		};
		let resolved = interpolate("size is %{size:bytes}", &m, DisplayUnit { divisor: 1024, letter: 'K' });
		assert_eq!(resolved, "size is 2 KB");
	}

	#[test]
	fn unknown_format_is_bad_format_literal() {
		let ctx = ctx();
		let m = Message {
			source_file: "x.rs".to_string(),
			source_line: 1,
			code: 1,
			severity: Severity::Info,
			process: ctx.pname.clone(),
			running_on: ctx.running_on.clone(),
			component: ctx.component.clone(),
			module: ctx.module.clone(),
			args: vec![("x".to_string(), "1".to_string())],
			hint: None,
			errno: None,
		};
		let resolved = interpolate("%{bogus:x}", &m, DisplayUnit::default());
		assert_eq!(resolved, "BAD-FORMAT");
	}

	#[test]
	fn fprint_message_emits_json_object() {
		let m = build_message(
			&ctx(),
			"selfcheck.rs",
			10,
			3600001,
			Severity::Success,
			&[("disk", "/var")],
		);
		let mut buf = Vec::new();
		fprint_message(&mut buf, &m, DisplayUnit::default()).unwrap();
		let text = String::from_utf8(buf).unwrap();
		assert!(text.starts_with('{') && text.ends_with('}'));
		assert!(text.contains("\"severity\":\"success\""));
		assert!(text.contains("\"code\":\"3600001\""));
	}

	#[test]
	fn json_escape_handles_quotes_and_backslashes() {
		assert_eq!(json_escape("a\"b\\c"), "a\\\"b\\\\c");
	}

	/// P8: a message survives `fprint_message` then `parse_json_messages`
	/// with every field intact (modulo argument order, which the JSON
	/// object representation does not preserve).
	#[test]
	fn message_round_trips_through_json() {
		let original = build_message(
			&ctx(),
			"selfcheck.rs",
			77,
			3600002,
			Severity::Error,
			&[("disk", "/var"), ("device", "/dev/sda1")],
		);

		let mut buf = Vec::new();
		write!(buf, "[").unwrap();
		fprint_message(&mut buf, &original, DisplayUnit::default()).unwrap();
		write!(buf, "]").unwrap();
		let parsed = parse_json_messages(&String::from_utf8(buf).unwrap()).unwrap();

		assert_eq!(parsed.len(), 1);
		let round_tripped = &parsed[0];
		assert_eq!(round_tripped.source_file, original.source_file);
		assert_eq!(round_tripped.source_line, original.source_line);
		assert_eq!(round_tripped.code, original.code);
		assert_eq!(round_tripped.severity, original.severity);
		assert_eq!(round_tripped.process, original.process);
		assert_eq!(round_tripped.running_on, original.running_on);
		assert_eq!(round_tripped.component, original.component);
		assert_eq!(round_tripped.module, original.module);
		assert_eq!(round_tripped.hint, original.hint);

		let mut original_args = original.args.clone();
		let mut round_tripped_args = round_tripped.args.clone();
		original_args.sort();
		round_tripped_args.sort();
		assert_eq!(round_tripped_args, original_args);
	}
}

// vim: ts=4
