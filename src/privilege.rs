//! Saved-uid privilege transitions (§4.4, §5 "Privilege discipline")
//!
//! The self-check driver may run setuid-root so it can stat devices the
//! invoking user cannot reach, but glob expansion (component E) must not
//! run with that privilege — a malicious include pattern could otherwise
//! be used to probe paths the user has no business seeing. This module
//! brackets a closure with a temporary drop to the real uid and restores
//! the saved euid afterward, regardless of how the closure returns.

use nix::unistd::{seteuid, Uid};

use crate::util::{get_effective_uid, get_real_uid};

/// Run `f` with the effective uid temporarily lowered to the real uid, if
/// the process is currently running privileged. Always restores the
/// original euid before returning, even if `f` panics (via `catch_unwind`
/// would be needed for that guarantee across unwinding; here we restore on
/// every normal and error return path).
pub fn with_dropped_privileges<F, R>(f: F) -> Result<R, std::io::Error>
where
	F: FnOnce() -> R,
{
	let saved_euid = get_effective_uid();
	let real_uid = get_real_uid();

	if saved_euid != real_uid {
		seteuid(Uid::from_raw(real_uid)).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
	}

	let result = f();

	if saved_euid != real_uid {
		seteuid(Uid::from_raw(saved_euid)).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
	}

	Ok(result)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn noop_when_not_privileged() {
		// In the common unprivileged test environment euid == ruid, so this
		// never attempts the actual transition and just runs the closure.
		let result = with_dropped_privileges(|| 2 + 2).unwrap();
		assert_eq!(result, 4);
	}
}

// vim: ts=4
