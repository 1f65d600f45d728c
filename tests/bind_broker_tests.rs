//! Integration coverage for the privileged-bind broker (component B): P9
//! (retry/classification on `EADDRINUSE`) and scenario 6, exercised against
//! the real `ambind` binary over its socketpair/SCM_RIGHTS protocol.
//!
//! `ambind` is not installed setuid-root in this environment, so these
//! tests stick to high, unprivileged ports rather than assume anything
//! about the sandbox's uid.

use std::os::fd::AsRawFd;

use dlecore::bind_broker::BindBroker;
use dlecore::error::BindBrokerError;

fn ambind_path() -> std::path::PathBuf {
	std::path::PathBuf::from(env!("CARGO_BIN_EXE_ambind"))
}

#[test]
fn scenario_6_a_successful_bind_returns_a_usable_listener_fd() {
	let mut broker = BindBroker::spawn(&ambind_path()).unwrap();
	let (fd, port) = broker.request_bind(40000, 40100).unwrap();

	assert!((40000..=40100).contains(&port));
	assert!(fd.as_raw_fd() >= 0);

	// The fd handed back is a real bound listener: wrapping it and reading
	// its local address must reflect the port ambind reported.
	let listener: std::net::TcpListener = fd.into();
	let local_port = listener.local_addr().unwrap().port();
	assert_eq!(local_port, port);
}

#[test]
fn p9_a_second_broker_racing_for_the_same_single_port_sees_addr_in_use() {
	let mut first = BindBroker::spawn(&ambind_path()).unwrap();
	let (held_fd, port) = first.request_bind(40200, 40200).unwrap();
	let _listener: std::net::TcpListener = held_fd.into(); // keep the port held

	let mut second = BindBroker::spawn(&ambind_path()).unwrap();
	let err = second.request_bind(port, port).unwrap_err();

	assert!(matches!(err, BindBrokerError::AddrInUse));
}

#[test]
fn an_inverted_port_range_is_rejected_without_touching_the_network() {
	let mut broker = BindBroker::spawn(&ambind_path()).unwrap();
	let err = broker.request_bind(500, 100).unwrap_err();
	assert!(matches!(err, BindBrokerError::PortNotAllowed { .. }));
}

// vim: ts=4
