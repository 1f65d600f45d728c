//! `selfcheck-driver` — the self-check request/response entry point (§6)
//!
//! Reads a self-check request from stdin, walks every disk through the
//! state machine in `selfcheck.rs`, and writes the resulting messages to
//! stdout as a single `MESSAGE JSON` block. Operator-facing diagnostics
//! (spawn failures, timing, retries) go to stderr via `tracing`, never to
//! stdout, since stdout is the protocol response channel.

use std::io::{self, BufReader};
use std::path::Path;

use clap::{Arg, Command};

use dlecore::logging::{self, info};
use dlecore::message::{fprint_messages_json, DisplayUnit};
use dlecore::process_context::ProcessContext;
use dlecore::security::SecurityFile;
use dlecore::selfcheck::{parse_request, resolve_entries, SelfCheckDriver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	logging::init_tracing();

	let matches = Command::new("selfcheck-driver")
		.version("0.1.0")
		.author("Amanda Client Team <client-core@example.org>")
		.about("Client-side backup coordination self-check driver")
		.arg(
			Arg::new("host")
				.long("host")
				.value_name("HOST")
				.help("Host this process believes it runs on")
				.default_value("localhost"),
		)
		.arg(Arg::new("security-file").long("security-file").value_name("PATH").help("Path to the security policy file"))
		.get_matches();

	let running_on = matches.get_one::<String>("host").cloned().unwrap_or_else(|| "localhost".to_string());
	let ctx = ProcessContext::new("selfcheck-driver", running_on);

	let security = match matches.get_one::<String>("security-file") {
		Some(path) => SecurityFile::load(Path::new(path))?,
		None => SecurityFile::empty(),
	};

	let request = parse_request(BufReader::new(io::stdin().lock()))?;
	info!(disks = request.entries.len(), "parsed self-check request");

	// Dumptype inheritance and script binding need the configuration adapter
	// this binary doesn't build on its own (§4.9) — an embedder wires that up.
	// An `APPLICATION`-prefixed request line (§4.5/§6) already names its
	// plugin directly, though, so `resolve_entries` binds `application` from
	// that without needing a config tree. We also apply each line's own
	// OPTIONS string (§4.7) so the state machine has fully-populated disks to
	// check, and surface any option-parse diagnostics (unknown/duplicate
	// tokens) up front.
	let resolved = resolve_entries(&ctx, &ctx.running_on.clone(), &request);
	let mut option_messages = Vec::new();
	let mut dles = Vec::with_capacity(resolved.len());
	for (dle, messages) in resolved {
		option_messages.extend(messages);
		dles.push(dle);
	}

	let driver = SelfCheckDriver::new(ctx, security);
	let results = driver.run(&dles).await;

	let all_messages: Vec<_> =
		option_messages.into_iter().chain(results.iter().flat_map(|r| r.messages.clone())).collect();
	fprint_messages_json(&mut io::stdout(), &all_messages, DisplayUnit::default())?;

	if results.iter().any(|r| !r.ok) {
		std::process::exit(1);
	}
	Ok(())
}

// vim: ts=4
