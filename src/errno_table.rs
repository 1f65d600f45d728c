//! Errno symbol table (§4.1, §5 "message-code-to-errno table")
//!
//! Built once, lazily, then read-only — mirrors the C source's
//! initialize-once-with-a-guard-flag convention (§5, "Shared-resource
//! policy"), expressed here with `std::sync::OnceLock` instead of a manual
//! flag and mutex.

use std::collections::HashMap;
use std::sync::OnceLock;

static ERRNO_TABLE: OnceLock<HashMap<i32, &'static str>> = OnceLock::new();

fn build_table() -> HashMap<i32, &'static str> {
	let mut m = HashMap::new();
	m.insert(libc::EPERM, "EPERM");
	m.insert(libc::ENOENT, "ENOENT");
	m.insert(libc::ESRCH, "ESRCH");
	m.insert(libc::EINTR, "EINTR");
	m.insert(libc::EIO, "EIO");
	m.insert(libc::ENXIO, "ENXIO");
	m.insert(libc::E2BIG, "E2BIG");
	m.insert(libc::ENOEXEC, "ENOEXEC");
	m.insert(libc::EBADF, "EBADF");
	m.insert(libc::ECHILD, "ECHILD");
	m.insert(libc::EAGAIN, "EAGAIN");
	m.insert(libc::ENOMEM, "ENOMEM");
	m.insert(libc::EACCES, "EACCES");
	m.insert(libc::EFAULT, "EFAULT");
	m.insert(libc::EBUSY, "EBUSY");
	m.insert(libc::EEXIST, "EEXIST");
	m.insert(libc::EXDEV, "EXDEV");
	m.insert(libc::ENODEV, "ENODEV");
	m.insert(libc::ENOTDIR, "ENOTDIR");
	m.insert(libc::EISDIR, "EISDIR");
	m.insert(libc::EINVAL, "EINVAL");
	m.insert(libc::ENFILE, "ENFILE");
	m.insert(libc::EMFILE, "EMFILE");
	m.insert(libc::ENOTTY, "ENOTTY");
	m.insert(libc::ETXTBSY, "ETXTBSY");
	m.insert(libc::EFBIG, "EFBIG");
	m.insert(libc::ENOSPC, "ENOSPC");
	m.insert(libc::ESPIPE, "ESPIPE");
	m.insert(libc::EROFS, "EROFS");
	m.insert(libc::EMLINK, "EMLINK");
	m.insert(libc::EPIPE, "EPIPE");
	m.insert(libc::EDOM, "EDOM");
	m.insert(libc::ERANGE, "ERANGE");
	m.insert(libc::EADDRINUSE, "EADDRINUSE");
	m.insert(libc::EADDRNOTAVAIL, "EADDRNOTAVAIL");
	m.insert(libc::ECONNREFUSED, "ECONNREFUSED");
	m.insert(libc::EHOSTUNREACH, "EHOSTUNREACH");
	m.insert(libc::ENETUNREACH, "ENETUNREACH");
	m.insert(libc::ETIMEDOUT, "ETIMEDOUT");
	m.insert(libc::ECONNRESET, "ECONNRESET");
	m.insert(libc::ENOTEMPTY, "ENOTEMPTY");
	m.insert(libc::ELOOP, "ELOOP");
	m.insert(libc::ENAMETOOLONG, "ENAMETOOLONG");
	m
}

/// Symbolic name for an errno value, e.g. `13 -> "EACCES"`. Unknown values
/// resolve to `"UNKNOWN"`.
pub fn errno_symbol(errno: i32) -> &'static str {
	ERRNO_TABLE.get_or_init(build_table).get(&errno).copied().unwrap_or("UNKNOWN")
}

/// `strerror(3)`-equivalent text for an errno value.
pub fn errno_string(errno: i32) -> String {
	// io::Error's Display renders the OS message for the given raw code.
	std::io::Error::from_raw_os_error(errno).to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_errno_resolves() {
		assert_eq!(errno_symbol(libc::EACCES), "EACCES");
		assert_eq!(errno_symbol(libc::EADDRINUSE), "EADDRINUSE");
	}

	#[test]
	fn unknown_errno_is_unknown() {
		assert_eq!(errno_symbol(999_999), "UNKNOWN");
	}

	#[test]
	fn errno_string_is_nonempty() {
		assert!(!errno_string(libc::ENOENT).is_empty());
	}
}

// vim: ts=4
