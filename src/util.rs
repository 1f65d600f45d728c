//! Low-level utility functions
//!
//! Thin, safe wrappers around system calls that require unsafe blocks, plus
//! the string primitives the self-check request parser and filter compiler
//! need directly (§6 quoting, §4.4 filename sanitizing).
#![allow(dead_code)]

/// Get the real user ID of the current process.
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn get_real_uid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: getuid() reads process credentials, no side effects.
		unsafe { libc::getuid() }
	}
	#[cfg(not(unix))]
	{
		1000
	}
}

/// Get the effective user ID of the current process.
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn get_effective_uid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: geteuid() reads process credentials, no side effects.
		unsafe { libc::geteuid() }
	}
	#[cfg(not(unix))]
	{
		1000
	}
}

/// Get the effective group ID of the current process.
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn get_effective_gid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: getegid() reads process credentials, no side effects.
		unsafe { libc::getegid() }
	}
	#[cfg(not(unix))]
	{
		1000
	}
}

/// Decode C-style escapes used by the request line protocol (§6):
/// `\n \t \r \f \\` and `\ooo` octal. An unrecognized escape keeps the
/// backslash and the following character verbatim.
pub fn unquote_c_string(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let chars: Vec<char> = input.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		if chars[i] == '\\' && i + 1 < chars.len() {
			match chars[i + 1] {
				'n' => {
					out.push('\n');
					i += 2;
				}
				't' => {
					out.push('\t');
					i += 2;
				}
				'r' => {
					out.push('\r');
					i += 2;
				}
				'f' => {
					out.push('\u{0c}');
					i += 2;
				}
				'\\' => {
					out.push('\\');
					i += 2;
				}
				'0'..='7' => {
					let mut j = i + 1;
					let mut digits = String::new();
					while j < chars.len() && digits.len() < 3 && ('0'..='7').contains(&chars[j]) {
						digits.push(chars[j]);
						j += 1;
					}
					if let Ok(code) = u8::from_str_radix(&digits, 8) {
						out.push(code as char);
					}
					i = j;
				}
				other => {
					out.push('\\');
					out.push(other);
					i += 2;
				}
			}
		} else {
			out.push(chars[i]);
			i += 1;
		}
	}
	out
}

/// Sanitize a disk name for embedding in a filter-file name (§4.4): any
/// character other than alphanumerics, `-`, and `_` becomes `_`.
pub fn sanitize_disk_name(disk: &str) -> String {
	disk.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
		.collect()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn unquote_handles_common_escapes() {
		assert_eq!(unquote_c_string("a\\nb"), "a\nb");
		assert_eq!(unquote_c_string("a\\tb"), "a\tb");
		assert_eq!(unquote_c_string("a\\\\b"), "a\\b");
	}

	#[test]
	fn unquote_handles_octal_escapes() {
		// \101 is 'A'
		assert_eq!(unquote_c_string("\\101BC"), "ABC");
	}

	#[test]
	fn unquote_passes_through_plain_text() {
		assert_eq!(unquote_c_string("/var/lib/data"), "/var/lib/data");
	}

	#[test]
	fn sanitize_replaces_slashes() {
		assert_eq!(sanitize_disk_name("/var"), "_var");
		assert_eq!(sanitize_disk_name("//share/name"), "__share_name");
		assert_eq!(sanitize_disk_name("data-1_ok"), "data-1_ok");
	}
}

// vim: ts=4
