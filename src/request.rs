//! Self-check request line grammar and per-disk option syntax (§4.7, §6,
//! scenario 1, P1).
//!
//! Two distinct grammars live here: the legacy request *line* —
//! `[APPLICATION ][CALCSIZE ]<program> "<disk>" [<device>] <level> [OPTIONS
//! "<opts>"]`, C-quoted per §6 — and the semicolon-delimited *option
//! string* carried inside that line's trailing `OPTIONS "..."` clause
//! (§4.7), which mutates a freshly built `DiskListEntry` in place. Parsing
//! the same option string twice into two fresh DLEs must produce equal
//! DLEs (P1): this module has no hidden state, just a fold over tokens.
#![allow(dead_code)]

use std::fmt;

use std::collections::HashMap;

use crate::dle::{merge_property_maps, ApplicationBinding, Compression, DiskListEntry, Encryption, ProgramKind};
use crate::message::{build_message, Message, Severity};
use crate::process_context::ProcessContext;
use crate::util::unquote_c_string;

#[derive(Debug)]
pub enum RequestLineError {
	MissingProgram,
	MissingDisk,
	MissingLevel,
	InvalidLevel { token: String },
	TooManyFields,
	MissingOptionsValue,
}

impl fmt::Display for RequestLineError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RequestLineError::MissingProgram => write!(f, "request line is missing its program field"),
			RequestLineError::MissingDisk => write!(f, "request line is missing its disk field"),
			RequestLineError::MissingLevel => write!(f, "request line is missing its level field"),
			RequestLineError::InvalidLevel { token } => write!(f, "request line level field {} is not a number", token),
			RequestLineError::TooManyFields => write!(f, "request line has more fields than device/level allow"),
			RequestLineError::MissingOptionsValue => write!(f, "request line's OPTIONS token has no value"),
		}
	}
}

impl std::error::Error for RequestLineError {}

/// One parsed request line, before the embedded `OPTIONS "..."` string has
/// been applied to a DLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
	pub is_application_api: bool,
	pub is_calcsize: bool,
	pub program: String,
	pub disk: String,
	pub device: Option<String>,
	pub level: u32,
	pub options: Option<String>,
}

/// Tokenize a request line: whitespace-separated fields, except a `"`
/// opens a quoted field that runs (with C-style escapes intact) until the
/// next unescaped `"`. Quoted fields are unescaped per §6; bare fields are
/// not (there is nothing to unescape in `APPLICATION`, `0`, `OPTIONS`, ...).
fn tokenize(line: &str) -> Vec<String> {
	let chars: Vec<char> = line.chars().collect();
	let mut tokens = Vec::new();
	let mut i = 0;
	while i < chars.len() {
		while i < chars.len() && chars[i].is_whitespace() {
			i += 1;
		}
		if i >= chars.len() {
			break;
		}
		if chars[i] == '"' {
			i += 1;
			let mut raw = String::new();
			while i < chars.len() && chars[i] != '"' {
				if chars[i] == '\\' && i + 1 < chars.len() {
					raw.push(chars[i]);
					raw.push(chars[i + 1]);
					i += 2;
				} else {
					raw.push(chars[i]);
					i += 1;
				}
			}
			if i < chars.len() {
				i += 1; // closing quote
			}
			tokens.push(unquote_c_string(&raw));
		} else {
			let start = i;
			while i < chars.len() && !chars[i].is_whitespace() {
				i += 1;
			}
			tokens.push(chars[start..i].iter().collect());
		}
	}
	tokens
}

/// Parse one `[APPLICATION ][CALCSIZE ]<program> "<disk>" [<device>]
/// <level> [OPTIONS "<opts>"]` request line (§6).
pub fn parse_request_line(line: &str) -> Result<RequestLine, RequestLineError> {
	let tokens = tokenize(line);
	let mut idx = 0;

	let mut is_application_api = false;
	let mut is_calcsize = false;
	if tokens.get(idx).map(String::as_str) == Some("APPLICATION") {
		is_application_api = true;
		idx += 1;
	}
	if tokens.get(idx).map(String::as_str) == Some("CALCSIZE") {
		is_calcsize = true;
		idx += 1;
	}

	let program = tokens.get(idx).cloned().ok_or(RequestLineError::MissingProgram)?;
	idx += 1;
	let disk = tokens.get(idx).cloned().ok_or(RequestLineError::MissingDisk)?;
	idx += 1;

	let mut rest = tokens[idx..].to_vec();
	let mut options = None;
	if let Some(pos) = rest.iter().position(|t| t == "OPTIONS") {
		let value = rest.get(pos + 1).cloned().ok_or(RequestLineError::MissingOptionsValue)?;
		options = Some(value);
		rest.truncate(pos);
	}

	let (device, level_token) = match rest.len() {
		1 => (None, rest[0].clone()),
		2 => (Some(rest[0].clone()), rest[1].clone()),
		0 => return Err(RequestLineError::MissingLevel),
		_ => return Err(RequestLineError::TooManyFields),
	};
	let level: u32 = level_token.parse().map_err(|_| RequestLineError::InvalidLevel { token: level_token })?;

	Ok(RequestLine { is_application_api, is_calcsize, program, disk, device, level, options })
}

/// Build a fresh `DiskListEntry` from a parsed request line, applying its
/// `OPTIONS "..."` string if present (§4.7). Unknown/duplicate option
/// tokens are reported as messages but never abort the parse — the caller
/// gets back a best-effort DLE plus whatever diagnostics were raised.
///
/// A request line prefixed `APPLICATION` (§4.5/§6) names the Application-API
/// plugin directly as its program field, so `dle.application` is bound here
/// from `req.program` — this core has no on-disk dumptype/application
/// config to resolve the binding through otherwise (§4.9, out of scope for
/// a standalone build), and a request line is the only other place the
/// binding is expressed. The binding's properties still go through
/// `merge_property_maps` against whatever the client side (`dle.properties`,
/// populated below from the request's own `OPTIONS` string) declares, so a
/// dumptype/application config plugged in later has a real merge point to
/// hand its server-side declarations to (§4.3, P2).
pub fn dle_from_request_line(ctx: &ProcessContext, hostname: &str, req: &RequestLine) -> (DiskListEntry, Vec<Message>) {
	let device = req.device.clone().unwrap_or_else(|| req.disk.clone());
	let mut dle = DiskListEntry::new(hostname, device, req.program.clone());
	dle.program = ProgramKind::parse(&req.program);
	dle.disk = req.disk.clone();
	dle.levels = vec![req.level];

	let mut messages = Vec::new();
	if let Some(opts) = &req.options {
		messages.extend(apply_option_string(ctx, &mut dle, opts));
	}

	if req.is_application_api {
		let (properties, merge_messages) = merge_property_maps(ctx, &dle.disk, &HashMap::new(), &dle.properties);
		messages.extend(merge_messages);
		dle.application = Some(ApplicationBinding { name: req.program.clone(), properties });
	}

	(dle, messages)
}

/// Apply a semicolon-delimited option string (§4.7) to `dle` in place.
/// Parsing the same string twice into two fresh DLEs yields equal DLEs
/// (P1): this function reads only `opts` and mutates only `dle`.
pub fn apply_option_string(ctx: &ProcessContext, dle: &mut DiskListEntry, opts: &str) -> Vec<Message> {
	let mut messages = Vec::new();
	let mut seen_auth = false;
	let mut seen_compress = false;
	let mut seen_encrypt = false;

	for raw_token in opts.split(';') {
		let token = raw_token.trim();
		// The reference implementation silently tolerates a bare "|" as a
		// separator artifact left over from an older option-string encoder;
		// preserve that tolerance (§9 Open Questions) rather than flag it.
		if token.is_empty() || token == "|" {
			continue;
		}

		match token {
			"bsd-auth" => {
				if !mark_once(&mut seen_auth) {
					messages.push(dup_message(ctx, dle, "auth"));
				}
				dle.auth = Some("bsd".to_string());
				continue;
			}
			"compress-fast" => {
				if !mark_once(&mut seen_compress) {
					messages.push(dup_message(ctx, dle, "compress"));
				}
				dle.compression = Compression::ClientFast;
				continue;
			}
			"compress-best" => {
				if !mark_once(&mut seen_compress) {
					messages.push(dup_message(ctx, dle, "compress"));
				}
				dle.compression = Compression::ClientBest;
				continue;
			}
			"srvcomp-fast" => {
				if !mark_once(&mut seen_compress) {
					messages.push(dup_message(ctx, dle, "compress"));
				}
				dle.compression = Compression::ServerFast;
				continue;
			}
			"srvcomp-best" => {
				if !mark_once(&mut seen_compress) {
					messages.push(dup_message(ctx, dle, "compress"));
				}
				dle.compression = Compression::ServerBest;
				continue;
			}
			"no-record" => {
				dle.record = false;
				continue;
			}
			"index" => {
				dle.create_index = true;
				continue;
			}
			"exclude-optional" => {
				dle.exclude_optional = true;
				continue;
			}
			"include-optional" => {
				dle.include_optional = true;
				continue;
			}
			"kencrypt" => {
				dle.kencrypt = true;
				continue;
			}
			_ => {}
		}

		if let Some(v) = token.strip_prefix("auth=") {
			if !mark_once(&mut seen_auth) {
				messages.push(dup_message(ctx, dle, "auth"));
			}
			dle.auth = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("srvcomp-cust=") {
			if !mark_once(&mut seen_compress) {
				messages.push(dup_message(ctx, dle, "compress"));
			}
			dle.compression = Compression::ServerCustom;
			dle.compress_program = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("comp-cust=") {
			if !mark_once(&mut seen_compress) {
				messages.push(dup_message(ctx, dle, "compress"));
			}
			dle.compression = Compression::ClientCustom;
			dle.compress_program = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("encrypt-serv-cust=") {
			if !mark_once(&mut seen_encrypt) {
				messages.push(dup_message(ctx, dle, "encrypt"));
			}
			dle.encryption = Encryption::ServerCustom;
			dle.encrypt_program = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("encrypt-cust=") {
			if !mark_once(&mut seen_encrypt) {
				messages.push(dup_message(ctx, dle, "encrypt"));
			}
			dle.encryption = Encryption::ClientCustom;
			dle.encrypt_program = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("server-decrypt-option=") {
			dle.server_decrypt_option = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("client-decrypt-option=") {
			dle.client_decrypt_option = Some(v.to_string());
		} else if let Some(v) = token.strip_prefix("exclude-file=") {
			dle.exclude_file.push(v.to_string());
		} else if let Some(v) = token.strip_prefix("exclude-list=") {
			dle.exclude_list.push(v.to_string());
		} else if let Some(v) = token.strip_prefix("include-file=") {
			dle.include_file.push(v.to_string());
		} else if let Some(v) = token.strip_prefix("include-list=") {
			dle.include_list.push(v.to_string());
		} else {
			messages.push(build_message(ctx, "request.rs", line!(), 3_600_081, Severity::Error, &[
				("token", token),
				("disk", dle.disk.as_str()),
			]));
		}
	}

	messages
}

/// Returns `true` the first time it is called on a given flag, `false`
/// every time after (marking the flag `true` as a side effect either way).
fn mark_once(seen: &mut bool) -> bool {
	let first = !*seen;
	*seen = true;
	first
}

fn dup_message(ctx: &ProcessContext, dle: &DiskListEntry, token: &str) -> Message {
	build_message(ctx, "request.rs", line!(), 3_600_080, Severity::Error, &[("token", token), ("disk", dle.disk.as_str())])
}


// vim: ts=4
