//! Child-process fd hygiene (§9 "Manual fd hygiene")
//!
//! Every fd this process opens is already close-on-exec by default
//! (Rust's std and tokio set `O_CLOEXEC` on all new descriptors), so in
//! the common case nothing leaks into a spawned plugin or helper. This
//! module exists for the uncommon case — fds inherited from *our* parent
//! before this process set any flags of its own (e.g. a listening socket
//! passed down at exec time) — by explicitly closing everything above
//! stderr in the child just after `fork`, before the target program
//! execs.
#![allow(dead_code)]
#![allow(unsafe_code)]

use std::os::unix::process::CommandExt;
use tokio::process::Command;

/// Build a `Command` for `program` that closes every fd above 2 in the
/// child before exec, regardless of what this process inherited. The fd
/// list is gathered here, in the parent, before `fork`; the `pre_exec`
/// closure only calls `close(2)` on the already-gathered list.
pub fn clean_fd_command(program: &str) -> Command {
	let mut cmd = Command::new(program);
	let fds = open_fds_above_stderr();
	// SAFETY: the closure calls only `close(2)` on fds captured by value before
	// `fork` — it performs no allocation and touches no Rust runtime state that
	// could be in an inconsistent post-fork condition, satisfying `pre_exec`'s
	// async-signal-safety contract.
	unsafe {
		cmd.pre_exec(move || {
			for &fd in &fds {
				libc::close(fd);
			}
			Ok(())
		});
	}
	cmd
}

/// Enumerate this process's open fds above stderr. Must be called in the
/// parent, never inside a `pre_exec` closure (it allocates).
fn open_fds_above_stderr() -> Vec<i32> {
	match std::fs::read_dir("/proc/self/fd") {
		Ok(entries) => entries
			.flatten()
			.filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<i32>().ok()))
			.filter(|fd| *fd > 2)
			.collect(),
		Err(_) => Vec::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_a_command_for_the_given_program() {
		let cmd = clean_fd_command("/bin/true");
		assert_eq!(cmd.as_std().get_program(), "/bin/true");
	}
}

// vim: ts=4
