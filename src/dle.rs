//! Disk-list entry model (component D, §4.2–§4.3)
//!
//! A `DiskListEntry` is the unit of work the self-check driver and plugin
//! orchestrator operate on: one host/device/dumptype triple, its merged
//! properties, and the application/script bindings that process it.
//! Property merging (P2: a `priority` flag on either side wins outright;
//! P3: absent a priority flag the two value lists combine under `append`,
//! otherwise the client value wins) is the one piece of business logic
//! this module owns — everything else is a plain record.
#![allow(dead_code)]

use std::collections::HashMap;

use crate::message::{build_message, Message, Severity};
use crate::process_context::ProcessContext;

/// A single property's value list plus the two flags that govern how a
/// client-side and server-side declaration combine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyValue {
	pub values: Vec<String>,
	pub priority: bool,
	pub append: bool,
}

impl PropertyValue {
	pub fn single(value: impl Into<String>) -> Self {
		PropertyValue { values: vec![value.into()], priority: false, append: false }
	}
}

/// Outcome of merging a client and server declaration of the same
/// property, distinguishing the §4.3 cases so the caller can log the
/// right message code (3600010/3600011).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
	/// Only one side declared the property.
	SingleSource(PropertyValue),
	/// Both sides declared it and exactly one carried `priority`.
	PriorityWins(PropertyValue),
	/// Both sides declared `priority = true`: a conflict (3600010), client
	/// value used anyway.
	PriorityConflict(PropertyValue),
	/// Neither side declared `priority` and neither set `append`: ambiguous
	/// (3600011), client value kept.
	NoPriorityEitherSide(PropertyValue),
	/// Both sides carry `priority = false` identically and at least one
	/// set `append`: value lists were combined.
	Combined(PropertyValue),
}

impl MergeOutcome {
	pub fn into_value(self) -> PropertyValue {
		match self {
			MergeOutcome::SingleSource(v)
			| MergeOutcome::PriorityWins(v)
			| MergeOutcome::PriorityConflict(v)
			| MergeOutcome::NoPriorityEitherSide(v)
			| MergeOutcome::Combined(v) => v,
		}
	}
}

/// Merge a server-declared and client-declared value for the same
/// property name (§4.3, P2/P3).
pub fn merge_property(server: Option<&PropertyValue>, client: Option<&PropertyValue>) -> MergeOutcome {
	match (server, client) {
		(None, None) => MergeOutcome::SingleSource(PropertyValue::default()),
		(Some(s), None) => MergeOutcome::SingleSource(s.clone()),
		(None, Some(c)) => MergeOutcome::SingleSource(c.clone()),
		(Some(s), Some(c)) => {
			if s.priority != c.priority {
				MergeOutcome::PriorityWins(if c.priority { c.clone() } else { s.clone() })
			} else if s.priority && c.priority {
				MergeOutcome::PriorityConflict(c.clone())
			} else if s.append || c.append {
				let mut values = c.values.clone();
				for v in &s.values {
					if !values.contains(v) {
						values.push(v.clone());
					}
				}
				MergeOutcome::Combined(PropertyValue { values, priority: c.priority, append: true })
			} else {
				MergeOutcome::NoPriorityEitherSide(c.clone())
			}
		}
	}
}

/// Merge a server-declared property map (e.g. from an application/dumptype
/// binding) against a client-declared one, producing the map a binding
/// should carry plus one diagnostic per key that hit 3600010 or 3600011
/// (§4.3, P2).
pub fn merge_property_maps(
	ctx: &ProcessContext,
	disk: &str,
	server: &HashMap<String, PropertyValue>,
	client: &HashMap<String, PropertyValue>,
) -> (HashMap<String, PropertyValue>, Vec<Message>) {
	let mut names: Vec<String> = server.keys().cloned().collect();
	for name in client.keys() {
		if !names.contains(name) {
			names.push(name.clone());
		}
	}

	let mut merged = HashMap::new();
	let mut messages = Vec::new();
	for name in names {
		let outcome = merge_property(server.get(&name), client.get(&name));
		match &outcome {
			MergeOutcome::PriorityConflict(v) => {
				let value = v.values.join(",");
				messages.push(build_message(
					ctx,
					"dle.rs",
					line!(),
					3_600_010,
					Severity::Error,
					&[("property", name.as_str()), ("disk", disk), ("value", value.as_str())],
				));
			}
			MergeOutcome::NoPriorityEitherSide(v) => {
				let value = v.values.join(",");
				messages.push(build_message(
					ctx,
					"dle.rs",
					line!(),
					3_600_011,
					Severity::Warning,
					&[("property", name.as_str()), ("disk", disk), ("value", value.as_str())],
				));
			}
			_ => {}
		}
		merged.insert(name, outcome.into_value());
	}
	(merged, messages)
}

/// An estimate method, tried in declared order until one succeeds
/// (§4.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateMode {
	Client,
	Server,
	Calcsize,
}

/// `dle.program` (§3): either an Application-API plugin or one of the two
/// built-in dumper keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramKind {
	Application,
	Dump,
	GnuTar,
}

impl ProgramKind {
	pub fn parse(token: &str) -> Self {
		match token {
			"DUMP" => ProgramKind::Dump,
			"GNUTAR" => ProgramKind::GnuTar,
			_ => ProgramKind::Application,
		}
	}
}

/// `dle.compression` (§3): client/server, fast/best/custom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
	#[default]
	None,
	ClientFast,
	ClientBest,
	ClientCustom,
	ServerFast,
	ServerBest,
	ServerCustom,
}

/// `dle.encryption` (§3): client/server custom, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
	#[default]
	None,
	ClientCustom,
	ServerCustom,
}

/// `dle.data_path` (§3): how bulk data travels off-host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataPath {
	#[default]
	Amanda,
	DirectTcp,
}

/// The plugin binding for a dumptype: which application runs the
/// dump/restore, and with what merged properties.
#[derive(Debug, Clone)]
pub struct ApplicationBinding {
	pub name: String,
	pub properties: HashMap<String, PropertyValue>,
}

/// One pre/post script binding and the execution points it fires on.
#[derive(Debug, Clone)]
pub struct ScriptBinding {
	pub name: String,
	pub execute_on: Vec<String>,
	pub properties: HashMap<String, PropertyValue>,
}

/// A fully-resolved disk-list entry: one line of the backup client's
/// disklist, after dumptype inheritance and property merging.
#[derive(Debug, Clone)]
pub struct DiskListEntry {
	pub hostname: String,
	pub device: String,
	/// Sanitized form of `device` safe for embedding in filenames (§4.4).
	pub disk: String,
	pub dumptype: String,
	pub priority: i64,
	pub properties: HashMap<String, PropertyValue>,
	pub application: Option<ApplicationBinding>,
	pub scripts: Vec<ScriptBinding>,
	pub estimate_modes: Vec<EstimateMode>,

	/// `"APPLICATION"`, `"DUMP"`, or `"GNUTAR"` (§3).
	pub program: ProgramKind,
	/// Dump levels requested for this run, in request order.
	pub levels: Vec<u32>,

	pub compression: Compression,
	pub compress_program: Option<String>,
	pub encryption: Encryption,
	pub encrypt_program: Option<String>,
	pub server_decrypt_option: Option<String>,
	pub client_decrypt_option: Option<String>,

	pub include_file: Vec<String>,
	pub include_list: Vec<String>,
	pub exclude_file: Vec<String>,
	pub exclude_list: Vec<String>,
	pub include_optional: bool,
	pub exclude_optional: bool,

	pub record: bool,
	pub create_index: bool,
	pub kencrypt: bool,
	pub data_path: DataPath,
	pub auth: Option<String>,
}

impl DiskListEntry {
	pub fn new(hostname: impl Into<String>, device: impl Into<String>, dumptype: impl Into<String>) -> Self {
		let device = device.into();
		let disk = crate::util::sanitize_disk_name(&device);
		DiskListEntry {
			hostname: hostname.into(),
			device,
			disk,
			dumptype: dumptype.into(),
			priority: 0,
			properties: HashMap::new(),
			application: None,
			scripts: Vec::new(),
			estimate_modes: vec![EstimateMode::Client, EstimateMode::Calcsize],
			program: ProgramKind::Application,
			levels: Vec::new(),
			compression: Compression::None,
			compress_program: None,
			encryption: Encryption::None,
			encrypt_program: None,
			server_decrypt_option: None,
			client_decrypt_option: None,
			include_file: Vec::new(),
			include_list: Vec::new(),
			exclude_file: Vec::new(),
			exclude_list: Vec::new(),
			include_optional: false,
			exclude_optional: false,
			record: true,
			create_index: false,
			kencrypt: false,
			data_path: DataPath::Amanda,
			auth: None,
		}
	}

	pub fn merge_property(&mut self, name: &str, server: Option<&PropertyValue>, client: Option<&PropertyValue>) -> MergeOutcome {
		let outcome = merge_property(server, client);
		self.properties.insert(name.to_string(), outcome.clone().into_value());
		outcome
	}

	pub fn scripts_for(&self, execute_point: &str) -> impl Iterator<Item = &ScriptBinding> {
		self.scripts.iter().filter(move |s| s.execute_on.iter().any(|e| e == execute_point))
	}
}


// vim: ts=4
