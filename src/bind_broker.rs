//! Privileged-bind broker, caller side (component B, §4.8, P9, scenario 6)
//!
//! Binding a port below 1024 requires privilege the self-check driver does
//! not otherwise need. Rather than run the whole driver setuid-root, a
//! small SUID helper (`src/bin/ambind.rs`) is spawned once, connected over
//! a `socketpair(2)`, and asked to bind specific port ranges on request.
//! The helper sends the bound listener back over the socket via
//! `SCM_RIGHTS`; this module is the unprivileged side of that protocol.
#![allow(dead_code)]
#![allow(unsafe_code)]

use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use nix::sys::uio::IoSliceMut;

use crate::error::BindBrokerError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The unprivileged-side handle to a spawned `ambind` helper.
pub struct BindBroker {
	child: Child,
	sock: UnixStream,
}

impl BindBroker {
	/// Spawn `ambind_path`, connected to this process over a freshly
	/// created socketpair. The socketpair's child end is passed as a
	/// bare fd number in argv\[1\] (CLOEXEC cleared beforehand) rather than
	/// as one of stdin/stdout/stderr, so the helper's own diagnostic
	/// output stays on the inherited stderr.
	pub fn spawn(ambind_path: &Path) -> Result<Self, BindBrokerError> {
		let (parent, child_sock) =
			UnixStream::pair().map_err(|e| BindBrokerError::SpawnFailed { message: e.to_string() })?;

		clear_cloexec(child_sock.as_raw_fd());

		let child = Command::new(ambind_path)
			.arg(child_sock.as_raw_fd().to_string())
			.spawn()
			.map_err(|e| BindBrokerError::SpawnFailed { message: e.to_string() })?;

		// The child has its own copy across fork(); the parent's handle to the
		// child-side fd would otherwise leak into anything the parent execs later.
		drop(child_sock);

		parent
			.set_read_timeout(Some(REQUEST_TIMEOUT))
			.map_err(|e| BindBrokerError::SpawnFailed { message: e.to_string() })?;

		Ok(BindBroker { child, sock: parent })
	}

	/// Ask the helper to bind a port in `[port_lo, port_hi]`, returning the
	/// bound listener fd and the port actually chosen. Retries on
	/// `EADDRINUSE` within the range (P9); exhausting the range without a
	/// free port is `RangeExhausted`.
	pub fn request_bind(&mut self, port_lo: u16, port_hi: u16) -> Result<(OwnedFd, u16), BindBrokerError> {
		writeln!(self.sock, "BIND {} {}", port_lo, port_hi).map_err(|_| BindBrokerError::Disconnected)?;

		let mut reader = BufReader::new(&self.sock);
		let mut line = String::new();
		match reader.read_line(&mut line) {
			Ok(0) => return Err(BindBrokerError::Disconnected),
			Ok(_) => {}
			Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
				return Err(BindBrokerError::Timeout)
			}
			Err(_) => return Err(BindBrokerError::Disconnected),
		}
		let line = line.trim();

		if let Some(rest) = line.strip_prefix("OK ") {
			let port: u16 = rest.trim().parse().map_err(|_| BindBrokerError::Disconnected)?;
			let fd = recv_fd(self.sock.as_raw_fd())?;
			Ok((fd, port))
		} else if let Some(reason) = line.strip_prefix("ERR ") {
			Err(classify_error(reason))
		} else {
			Err(BindBrokerError::Disconnected)
		}
	}

	pub fn shutdown(&mut self) -> std::io::Result<()> {
		self.child.kill().ok();
		self.child.wait().map(|_| ())
	}
}

impl Drop for BindBroker {
	fn drop(&mut self) {
		let _ = self.shutdown();
	}
}

fn classify_error(reason: &str) -> BindBrokerError {
	match reason.trim() {
		"port-not-allowed" => BindBrokerError::PortNotAllowed { port: 0 },
		"addr-in-use" => BindBrokerError::AddrInUse,
		"range-exhausted" => BindBrokerError::RangeExhausted,
		other => BindBrokerError::BindFailed { message: other.to_string() },
	}
}

fn clear_cloexec(fd: RawFd) {
	// SAFETY: fd is a valid, open descriptor owned by this process (the socketpair just
	// created); fcntl with F_SETFD only changes the close-on-exec flag.
	unsafe {
		let flags = libc::fcntl(fd, libc::F_GETFD);
		if flags >= 0 {
			libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
		}
	}
}

fn recv_fd(sock_fd: RawFd) -> Result<OwnedFd, BindBrokerError> {
	let mut buf = [0u8; 1];
	let mut iov = [IoSliceMut::new(&mut buf)];
	let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
	let msg = recvmsg::<()>(sock_fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
		.map_err(|e| BindBrokerError::BindFailed { message: e.to_string() })?;

	for cmsg in msg.cmsgs().map_err(|e| BindBrokerError::BindFailed { message: e.to_string() })? {
		if let ControlMessageOwned::ScmRights(fds) = cmsg {
			if let Some(&fd) = fds.first() {
				// SAFETY: fd was just received via SCM_RIGHTS and is uniquely owned by this
				// process; no other code holds or will close it.
				return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
			}
		}
	}
	Err(BindBrokerError::BindFailed { message: "no file descriptor in response".to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_known_error_reasons() {
		assert!(matches!(classify_error("addr-in-use"), BindBrokerError::AddrInUse));
		assert!(matches!(classify_error("range-exhausted"), BindBrokerError::RangeExhausted));
		assert!(matches!(classify_error("port-not-allowed"), BindBrokerError::PortNotAllowed { .. }));
	}

	#[test]
	fn unknown_reason_becomes_bind_failed() {
		let err = classify_error("disk on fire");
		assert!(matches!(err, BindBrokerError::BindFailed { .. }));
	}
}

// vim: ts=4
