//! Configuration adapter (component I, §4.9)
//!
//! A minimal, already-parsed configuration tree plus the inheritance and
//! lookup rules the rest of the core depends on: dumptype inheritance
//! (child fields override parent fields, unset fields fall through),
//! name-indexed application/script definitions, and a handful of
//! environment/on-disk accessors. Parsing an on-disk config file dialect is
//! out of scope (§2 Non-goals) — callers hand us an already-built
//! `RawConfigTree`.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::message::DisplayUnit;
use crate::value::Value;

#[derive(Debug)]
pub enum ConfigError {
	InheritanceCycle { name: String },
	UnknownDumptype { name: String },
	UnknownApplication { name: String },
	UnknownScript { name: String },
	TypeMismatch { field: String },
	Io(std::io::Error),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::InheritanceCycle { name } => write!(f, "dumptype inheritance cycle at {}", name),
			ConfigError::UnknownDumptype { name } => write!(f, "unknown dumptype {}", name),
			ConfigError::UnknownApplication { name } => write!(f, "unknown application {}", name),
			ConfigError::UnknownScript { name } => write!(f, "unknown script {}", name),
			ConfigError::TypeMismatch { field } => write!(f, "type mismatch on field {}", field),
			ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
		}
	}
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
	fn from(e: std::io::Error) -> Self {
		ConfigError::Io(e)
	}
}

/// A single, unresolved dumptype/application/script record: a field map
/// plus an optional `inherit` pointing at a parent of the same kind.
pub type FieldMap = HashMap<String, Value>;

/// The caller-supplied, pre-parsed configuration. Keys are record names.
#[derive(Debug, Clone, Default)]
pub struct RawConfigTree {
	pub dumptypes: HashMap<String, FieldMap>,
	pub applications: HashMap<String, FieldMap>,
	pub scripts: HashMap<String, FieldMap>,
}

#[derive(Debug, Clone)]
pub struct ApplicationDef {
	pub name: String,
	pub plugin: String,
	pub property: FieldMap,
}

#[derive(Debug, Clone)]
pub struct ScriptDef {
	pub name: String,
	pub plugin: String,
	pub property: FieldMap,
	pub execute_on: Vec<String>,
}

/// Resolved configuration: dumptype inheritance chased out, applications
/// and scripts indexed by name, plus the handful of accessors the rest of
/// the core needs.
#[derive(Debug, Clone)]
pub struct ConfigAdapter {
	dumptypes: HashMap<String, FieldMap>,
	applications: HashMap<String, ApplicationDef>,
	scripts: HashMap<String, ScriptDef>,
	tmpdir: PathBuf,
	application_dir: PathBuf,
	display_unit: DisplayUnit,
}

impl ConfigAdapter {
	pub fn build(raw: &RawConfigTree, tmpdir: PathBuf, application_dir: PathBuf) -> Result<Self, ConfigError> {
		let mut resolved = HashMap::new();
		for name in raw.dumptypes.keys() {
			if !resolved.contains_key(name) {
				let mut visiting = HashSet::new();
				let fields = resolve_dumptype(name, raw, &mut visiting, &mut resolved)?;
				resolved.insert(name.clone(), fields);
			}
		}

		let mut applications = HashMap::new();
		for (name, fields) in &raw.applications {
			let plugin = fields
				.get("plugin")
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| name.clone());
			applications.insert(
				name.clone(),
				ApplicationDef { name: name.clone(), plugin, property: fields.clone() },
			);
		}

		let mut scripts = HashMap::new();
		for (name, fields) in &raw.scripts {
			let plugin = fields
				.get("plugin")
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| name.clone());
			let execute_on = fields
				.get("execute_on")
				.and_then(Value::as_list)
				.map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
				.unwrap_or_default();
			scripts.insert(name.clone(), ScriptDef { name: name.clone(), plugin, property: fields.clone(), execute_on });
		}

		Ok(ConfigAdapter {
			dumptypes: resolved,
			applications,
			scripts,
			tmpdir,
			application_dir,
			display_unit: DisplayUnit::default(),
		})
	}

	pub fn dumptype(&self, name: &str) -> Result<&FieldMap, ConfigError> {
		self.dumptypes.get(name).ok_or_else(|| ConfigError::UnknownDumptype { name: name.to_string() })
	}

	pub fn application(&self, name: &str) -> Result<&ApplicationDef, ConfigError> {
		self.applications.get(name).ok_or_else(|| ConfigError::UnknownApplication { name: name.to_string() })
	}

	pub fn script(&self, name: &str) -> Result<&ScriptDef, ConfigError> {
		self.scripts.get(name).ok_or_else(|| ConfigError::UnknownScript { name: name.to_string() })
	}

	pub fn tmpdir(&self) -> &Path {
		&self.tmpdir
	}

	pub fn application_dir(&self) -> &Path {
		&self.application_dir
	}

	pub fn display_unit(&self) -> DisplayUnit {
		self.display_unit
	}

	pub fn set_display_unit(&mut self, unit: DisplayUnit) {
		self.display_unit = unit;
	}

	/// Open the per-disk `amandates` dump-date registry under `tmpdir` for
	/// estimate-mode dispatch (§4.5.3). Creates it if absent.
	pub fn open_dumpdates(&self) -> Result<File, ConfigError> {
		let path = self.tmpdir.join("amandates");
		File::options().create(true).read(true).write(true).open(path).map_err(ConfigError::from)
	}

	/// `open_dumpdates()` plus parsing, for callers that just want the
	/// lookup table (§4.5.3's `calcsize` estimate mode).
	pub fn read_dumpdates(&self) -> Result<DumpDates, ConfigError> {
		let file = self.open_dumpdates()?;
		DumpDates::parse(std::io::BufReader::new(file)).map_err(ConfigError::from)
	}
}

/// Per-disk, per-level "last dumped" dates read from `amandates`: one line
/// per disk, the disk name followed by one epoch-day integer per level in
/// level order, 0 meaning never dumped at that level (§4.5.3).
#[derive(Debug, Clone, Default)]
pub struct DumpDates {
	by_disk: HashMap<String, Vec<i64>>,
}

impl DumpDates {
	pub fn parse<R: std::io::BufRead>(reader: R) -> std::io::Result<Self> {
		let mut by_disk = HashMap::new();
		for line in reader.lines() {
			let line = line?;
			let mut parts = line.split_whitespace();
			let Some(disk) = parts.next() else { continue };
			let dates: Vec<i64> = parts.filter_map(|p| p.parse().ok()).collect();
			by_disk.insert(disk.to_string(), dates);
		}
		Ok(DumpDates { by_disk })
	}

	/// The "count since" date `calcsize` is passed for `disk` at `level`:
	/// the most recent date any level below `level` was last dumped, 0 if
	/// none (mirrors the original's `amandates_lookup` scan).
	pub fn count_since(&self, disk: &str, level: u32) -> i64 {
		let Some(dates) = self.by_disk.get(disk) else { return 0 };
		dates.iter().take(level as usize).copied().max().unwrap_or(0)
	}
}

/// Environment accessor: `AMANDA_TMPDIR`, falling back to the system temp
/// directory when unset.
pub fn env_tmpdir() -> PathBuf {
	std::env::var_os("AMANDA_TMPDIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir)
}

fn resolve_dumptype(
	name: &str,
	raw: &RawConfigTree,
	visiting: &mut HashSet<String>,
	resolved: &mut HashMap<String, FieldMap>,
) -> Result<FieldMap, ConfigError> {
	if let Some(done) = resolved.get(name) {
		return Ok(done.clone());
	}
	if !visiting.insert(name.to_string()) {
		return Err(ConfigError::InheritanceCycle { name: name.to_string() });
	}
	let own = raw.dumptypes.get(name).ok_or_else(|| ConfigError::UnknownDumptype { name: name.to_string() })?;

	let merged = match own.get("inherit").and_then(Value::as_str) {
		Some(parent_name) => {
			let parent_name = parent_name.to_string();
			let parent = resolve_dumptype(&parent_name, raw, visiting, resolved)?;
			let mut merged = parent;
			for (k, v) in own {
				if k != "inherit" {
					merged.insert(k.clone(), v.clone());
				}
			}
			merged
		}
		None => own.clone(),
	};

	visiting.remove(name);
	resolved.insert(name.to_string(), merged.clone());
	Ok(merged)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tree_with_inheritance() -> RawConfigTree {
		let mut dumptypes = HashMap::new();
		let mut base = FieldMap::new();
		base.insert("compress".to_string(), Value::Str("client".to_string()));
		base.insert("priority".to_string(), Value::Int(1));
		dumptypes.insert("base".to_string(), base);

		let mut child = FieldMap::new();
		child.insert("inherit".to_string(), Value::Str("base".to_string()));
		child.insert("priority".to_string(), Value::Int(5));
		dumptypes.insert("nightly".to_string(), child);

		RawConfigTree { dumptypes, applications: HashMap::new(), scripts: HashMap::new() }
	}

	#[test]
	fn inherits_unset_fields_from_parent() {
		let raw = tree_with_inheritance();
		let cfg = ConfigAdapter::build(&raw, PathBuf::from("/tmp"), PathBuf::from("/usr/lib/amanda")).unwrap();
		let nightly = cfg.dumptype("nightly").unwrap();
		assert_eq!(nightly.get("compress").and_then(Value::as_str), Some("client"));
		assert_eq!(nightly.get("priority").and_then(Value::as_int), Some(5));
	}

	#[test]
	fn detects_inheritance_cycle() {
		let mut dumptypes = HashMap::new();
		let mut a = FieldMap::new();
		a.insert("inherit".to_string(), Value::Str("b".to_string()));
		dumptypes.insert("a".to_string(), a);
		let mut b = FieldMap::new();
		b.insert("inherit".to_string(), Value::Str("a".to_string()));
		dumptypes.insert("b".to_string(), b);
		let raw = RawConfigTree { dumptypes, applications: HashMap::new(), scripts: HashMap::new() };
		let err = ConfigAdapter::build(&raw, PathBuf::from("/tmp"), PathBuf::from("/usr/lib/amanda")).unwrap_err();
		assert!(matches!(err, ConfigError::InheritanceCycle { .. }));
	}

	#[test]
	fn application_lookup_by_name() {
		let mut applications = HashMap::new();
		let mut props = FieldMap::new();
		props.insert("plugin".to_string(), Value::Str("amgtar".to_string()));
		applications.insert("gnutar-app".to_string(), props);
		let raw = RawConfigTree { dumptypes: HashMap::new(), applications, scripts: HashMap::new() };
		let cfg = ConfigAdapter::build(&raw, PathBuf::from("/tmp"), PathBuf::from("/usr/lib/amanda")).unwrap();
		let app = cfg.application("gnutar-app").unwrap();
		assert_eq!(app.plugin, "amgtar");
		assert!(cfg.application("missing").is_err());
	}

	#[test]
	fn dumpdates_count_since_takes_the_latest_date_below_the_requested_level() {
		let text = "_var 0 100 200\n_home 50\n";
		let dates = DumpDates::parse(std::io::Cursor::new(text)).unwrap();
		assert_eq!(dates.count_since("_var", 2), 100);
		assert_eq!(dates.count_since("_var", 3), 200);
		assert_eq!(dates.count_since("_home", 1), 50);
	}

	#[test]
	fn dumpdates_unknown_disk_counts_since_the_epoch() {
		let dates = DumpDates::parse(std::io::Cursor::new("")).unwrap();
		assert_eq!(dates.count_since("_var", 1), 0);
	}
}

// vim: ts=4
