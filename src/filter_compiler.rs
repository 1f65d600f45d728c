//! Include/exclude filter compiler (component E, §4.4)
//!
//! Compiles a disk's include glob patterns into a concrete file list,
//! copies its exclude patterns verbatim, writes either list to a filter
//! file the backup application reads, and purges stale filter files left
//! behind by earlier runs (P4, scenario 3). Include glob expansion always
//! runs with privileges dropped to the real uid (`crate::privilege`) so an
//! include pattern cannot be used to probe paths the invoking user could
//! not otherwise see; excludes are never globbed (§4.4 step 2), so no
//! privilege drop is needed for them.
#![allow(dead_code)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::privilege::with_dropped_privileges;
use crate::util::{sanitize_disk_name, unquote_c_string};

#[derive(Debug)]
pub enum FilterError {
	PatternMustBeRelative { pattern: String },
	GlobError { pattern: String, detail: String },
	NoMatches { disk: String },
	NameExhausted { disk: String },
	Io(std::io::Error),
}

impl fmt::Display for FilterError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FilterError::PatternMustBeRelative { pattern } => {
				write!(f, "include pattern {} does not start with ./", pattern)
			}
			FilterError::GlobError { pattern, detail } => write!(f, "pattern {} is invalid: {}", pattern, detail),
			FilterError::NoMatches { disk } => write!(f, "no files matched any include pattern for disk {}", disk),
			FilterError::NameExhausted { disk } => {
				write!(f, "could not find a free filter-file name for disk {} after 1000 attempts", disk)
			}
			FilterError::Io(e) => write!(f, "filter file I/O error: {}", e),
		}
	}
}

impl std::error::Error for FilterError {}

impl From<std::io::Error> for FilterError {
	fn from(e: std::io::Error) -> Self {
		FilterError::Io(e)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
	Include,
	Exclude,
}

impl FilterKind {
	fn suffix(self) -> &'static str {
		match self {
			FilterKind::Include => "include",
			FilterKind::Exclude => "exclude",
		}
	}
}

/// Expand include patterns (each required to start with `./`, relative to
/// `root`) into a sorted, deduplicated list of matched paths. At least one
/// match across all patterns is required; an empty result is
/// `FilterError::NoMatches` (§4.4 step 4).
pub fn build_include(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, FilterError> {
	for p in patterns {
		if !p.starts_with("./") {
			return Err(FilterError::PatternMustBeRelative { pattern: p.clone() });
		}
	}
	let root_buf = root.to_path_buf();
	let patterns = patterns.to_vec();
	let expanded = with_dropped_privileges(move || -> Result<Vec<PathBuf>, FilterError> {
		let mut out = Vec::new();
		for pattern in &patterns {
			let full = root_buf.join(pattern.trim_start_matches("./"));
			let pattern_str = full.to_string_lossy().to_string();
			let paths = glob::glob(&pattern_str)
				.map_err(|e| FilterError::GlobError { pattern: pattern.clone(), detail: e.to_string() })?;
			for entry in paths.flatten() {
				out.push(entry);
			}
		}
		out.sort();
		out.dedup();
		Ok(out)
	})??;
	if expanded.is_empty() {
		return Err(FilterError::NoMatches { disk: root.display().to_string() });
	}
	Ok(expanded)
}

/// Copy exclude patterns verbatim, one per line (§4.4 step 2): no glob
/// expansion, no `./` requirement, any trailing newline in a pattern is
/// stripped, and each pattern is dequoted (`crate::util::unquote_c_string`)
/// before being written. An empty result is a legitimate outcome — no
/// exclusions is not an error.
pub fn build_exclude(patterns: &[String]) -> Vec<String> {
	patterns.iter().map(|p| unquote_c_string(p.trim_end_matches('\n'))).collect()
}

/// Choose a collision-free filter filename under `dir`:
/// `<pname>.<sanitized-disk>.<timestamp>NNN.<include|exclude>`, trying
/// `NNN` from `000` upward. Fails after 1000 attempts (§4.4).
fn next_free_filter_path(dir: &Path, pname: &str, disk: &str, timestamp: &str, kind: FilterKind) -> Result<PathBuf, FilterError> {
	let sanitized = sanitize_disk_name(disk);
	for n in 0..1000u32 {
		let candidate = dir.join(format!("{}.{}.{}{:03}.{}", pname, sanitized, timestamp, n, kind.suffix()));
		if !candidate.exists() {
			return Ok(candidate);
		}
	}
	Err(FilterError::NameExhausted { disk: disk.to_string() })
}

/// Write one path-per-line filter file for `disk` under `dir`, returning
/// its path. `pname` and `timestamp` (caller-formatted; timestamp
/// formatting itself is out of this core's scope, §2) feed the filename
/// scheme in `next_free_filter_path`.
pub fn write_filter_file(
	dir: &Path,
	pname: &str,
	disk: &str,
	timestamp: &str,
	kind: FilterKind,
	lines: &[String],
) -> Result<PathBuf, FilterError> {
	fs::create_dir_all(dir)?;
	let path = next_free_filter_path(dir, pname, disk, timestamp, kind)?;
	let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
	for line in lines {
		writeln!(file, "{}", line)?;
	}
	Ok(path)
}

/// Remove filter files under `dir` for `pname`/`disk` other than `keep`
/// whose mtime is older than `debug_days` days (§4.4 step 1; P4 scenario
/// 3). A file younger than the threshold is left alone even if stale —
/// only age, never identity, gates removal, mirroring
/// `shm_ring::sweep_stale_in`'s age-gated sweep.
pub fn purge_old_filter_files(
	dir: &Path,
	pname: &str,
	disk: &str,
	keep: &Path,
	debug_days: u64,
) -> Result<usize, FilterError> {
	let prefix = format!("{}.{}.", pname, sanitize_disk_name(disk));
	let max_age = Duration::from_secs(debug_days.saturating_mul(24 * 60 * 60));
	let now = SystemTime::now();
	let mut removed = 0;
	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let path = entry.path();
		if path == keep {
			continue;
		}
		let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
		if !name.starts_with(&prefix) || !(name.ends_with(".include") || name.ends_with(".exclude")) {
			continue;
		}
		let metadata = entry.metadata()?;
		let age = now.duration_since(metadata.modified()?).unwrap_or_default();
		if age < max_age {
			continue;
		}
		fs::remove_file(&path)?;
		removed += 1;
	}
	Ok(removed)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::{Duration as StdDuration, SystemTime};

	fn set_mtime(path: &Path, age: StdDuration) {
		let past = SystemTime::now() - age;
		filetime::set_file_mtime(path, filetime::FileTime::from_system_time(past)).unwrap();
	}

	#[test]
	fn rejects_pattern_without_dot_slash_prefix() {
		let dir = tempfile::tempdir().unwrap();
		let err = build_include(dir.path(), &["var/lib".to_string()]).unwrap_err();
		assert!(matches!(err, FilterError::PatternMustBeRelative { .. }));
	}

	#[test]
	fn expands_matching_files() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("a.txt"), b"x").unwrap();
		fs::write(dir.path().join("b.txt"), b"x").unwrap();
		let matches = build_include(dir.path(), &["./*.txt".to_string()]).unwrap();
		assert_eq!(matches.len(), 2);
	}

	#[test]
	fn empty_include_match_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let err = build_include(dir.path(), &["./nothing-*.missing".to_string()]).unwrap_err();
		assert!(matches!(err, FilterError::NoMatches { .. }));
	}

	#[test]
	fn exclude_patterns_are_copied_verbatim_without_globbing_or_dot_slash_requirement() {
		let lines = build_exclude(&["var/lib".to_string(), "./nothing-*.missing".to_string()]);
		assert_eq!(lines, vec!["var/lib".to_string(), "./nothing-*.missing".to_string()]);
	}

	#[test]
	fn exclude_patterns_are_dequoted_and_trailing_newline_stripped() {
		let lines = build_exclude(&["a\\tb\n".to_string()]);
		assert_eq!(lines, vec!["a\tb".to_string()]);
	}

	#[test]
	fn empty_exclude_list_is_fine() {
		let lines = build_exclude(&[]);
		assert!(lines.is_empty());
	}

	#[test]
	fn write_filter_file_resolves_name_collisions() {
		let dir = tempfile::tempdir().unwrap();
		let first = write_filter_file(dir.path(), "selfcheck-driver", "/var", "20260730", FilterKind::Include, &["a".to_string()]).unwrap();
		let second = write_filter_file(dir.path(), "selfcheck-driver", "/var", "20260730", FilterKind::Include, &["b".to_string()]).unwrap();
		assert_ne!(first, second);
		assert!(first.to_string_lossy().ends_with("selfcheck-driver._var.20260730000.include"));
		assert!(second.to_string_lossy().ends_with("selfcheck-driver._var.20260730001.include"));
	}

	#[test]
	fn purge_removes_only_stale_files_and_keeps_current() {
		let dir = tempfile::tempdir().unwrap();
		let current =
			write_filter_file(dir.path(), "selfcheck-driver", "/var", "20260730", FilterKind::Include, &["a".to_string()]).unwrap();
		let stale =
			write_filter_file(dir.path(), "selfcheck-driver", "/var", "20260729", FilterKind::Include, &["b".to_string()]).unwrap();
		set_mtime(&stale, StdDuration::from_secs(10 * 24 * 60 * 60));

		let removed = purge_old_filter_files(dir.path(), "selfcheck-driver", "/var", &current, 5).unwrap();
		assert_eq!(removed, 1);
		assert!(current.exists());
		assert!(!stale.exists());
	}

	#[test]
	fn purge_leaves_files_younger_than_the_threshold() {
		let dir = tempfile::tempdir().unwrap();
		let current =
			write_filter_file(dir.path(), "selfcheck-driver", "/var", "20260730", FilterKind::Include, &["a".to_string()]).unwrap();
		let recent =
			write_filter_file(dir.path(), "selfcheck-driver", "/var", "20260730", FilterKind::Include, &["b".to_string()]).unwrap();
		set_mtime(&recent, StdDuration::from_secs(60 * 60));

		let removed = purge_old_filter_files(dir.path(), "selfcheck-driver", "/var", &current, 5).unwrap();
		assert_eq!(removed, 0);
		assert!(recent.exists());
	}
}

// vim: ts=4
