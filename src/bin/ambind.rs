//! `ambind` — the privileged-bind broker's SUID-root helper (component B)
//!
//! Installed setuid-root, spawned once by the self-check driver with one
//! end of a socketpair passed as a bare fd number in argv\[1\]. Reads
//! newline-terminated `BIND <lo> <hi>` requests, tries to bind a port in
//! that range, and replies either `OK <port>\n` followed by the bound
//! listener fd over `SCM_RIGHTS`, or `ERR <reason>\n`. Holds root euid for
//! its whole (short, single-purpose) lifetime rather than juggling
//! per-request privilege transitions — its only capability is "bind a
//! socket", so there is nothing further to drop privilege around.
#![allow(unsafe_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use nix::sys::uio::IoSlice;

fn main() {
	dlecore::logging::init_tracing();

	let fd: RawFd = match std::env::args().nth(1).and_then(|s| s.parse().ok()) {
		Some(fd) => fd,
		None => {
			eprintln!("ambind: missing control socket fd argument");
			std::process::exit(2);
		}
	};

	// SAFETY: fd was passed by the parent as the child end of a socketpair, with
	// close-on-exec cleared specifically so it survives this exec.
	let sock = unsafe { UnixStream::from_raw_fd(fd) };
	let reader_sock = sock.try_clone().expect("clone control socket");
	let mut reader = BufReader::new(reader_sock);
	let mut writer = sock;

	let mut line = String::new();
	loop {
		line.clear();
		match reader.read_line(&mut line) {
			Ok(0) => break,
			Ok(_) => {}
			Err(_) => break,
		}
		let trimmed = line.trim();
		let Some(rest) = trimmed.strip_prefix("BIND ") else {
			let _ = writeln!(writer, "ERR malformed-request");
			continue;
		};
		let mut parts = rest.split_whitespace();
		let (lo, hi) = match (parts.next().and_then(|s| s.parse::<u16>().ok()), parts.next().and_then(|s| s.parse::<u16>().ok()))
		{
			(Some(lo), Some(hi)) => (lo, hi),
			_ => {
				let _ = writeln!(writer, "ERR malformed-request");
				continue;
			}
		};

		match bind_in_range(lo, hi) {
			Ok((listener, port)) => {
				if writeln!(writer, "OK {}", port).is_err() {
					break;
				}
				if send_fd(writer.as_raw_fd(), listener.as_raw_fd()).is_err() {
					break;
				}
			}
			Err(reason) => {
				let _ = writeln!(writer, "ERR {}", reason);
			}
		}
	}
}

fn bind_in_range(lo: u16, hi: u16) -> Result<(TcpListener, u16), &'static str> {
	if lo == 0 || hi < lo {
		return Err("port-not-allowed");
	}
	let mut last_was_in_use = false;
	for port in lo..=hi {
		match TcpListener::bind(("0.0.0.0", port)) {
			Ok(listener) => return Ok((listener, port)),
			Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
				last_was_in_use = true;
				continue;
			}
			Err(_) => continue,
		}
	}
	if last_was_in_use {
		Err("addr-in-use")
	} else {
		Err("range-exhausted")
	}
}

fn send_fd(sock_fd: RawFd, payload_fd: RawFd) -> std::io::Result<()> {
	let byte = [0u8];
	let iov = [IoSlice::new(&byte)];
	let fds = [payload_fd];
	let cmsg = [ControlMessage::ScmRights(&fds)];
	sendmsg::<()>(sock_fd, &iov, &cmsg, MsgFlags::empty(), None).map(|_| ()).map_err(|e| e.into())
}

// vim: ts=4
