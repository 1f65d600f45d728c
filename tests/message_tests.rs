//! Integration coverage for the message registry (component A): P8
//! (message round-trip through JSON) and severity/interpolation behavior
//! exercised the way a caller assembling a response actually would.

use dlecore::message::{build_message, fprint_messages_json, get_message, DisplayUnit, Severity};
use dlecore::process_context::ProcessContext;

fn ctx() -> ProcessContext {
	ProcessContext::new("selfcheck-driver", "client1.example.org")
}

#[test]
fn emitted_json_carries_every_field_of_the_source_message() {
	let m = build_message(
		&ctx(),
		"message_tests.rs",
		42,
		3_600_001,
		Severity::Success,
		&[("disk", "/var")],
	);

	let mut buf = Vec::new();
	fprint_messages_json(&mut buf, std::slice::from_ref(&m), DisplayUnit::default()).unwrap();
	let text = String::from_utf8(buf).unwrap();

	assert!(text.starts_with("MESSAGE JSON\n"));
	let parsed: serde_json::Value = serde_json::from_str(text.lines().nth(1).unwrap()).unwrap();
	let obj = &parsed[0];
	assert_eq!(obj["code"], "3600001");
	assert_eq!(obj["severity"], "success");
	assert_eq!(obj["disk"], "/var");
	assert_eq!(obj["source_line"], "42");
	assert_eq!(obj["message"], get_message(&m, DisplayUnit::default()));
}

#[test]
fn severities_rank_in_the_order_the_spec_requires() {
	let mut order = vec![Severity::Critical, Severity::Success, Severity::Warning, Severity::Error, Severity::Info, Severity::Message];
	order.sort();
	assert_eq!(
		order,
		vec![Severity::Success, Severity::Info, Severity::Message, Severity::Warning, Severity::Error, Severity::Critical]
	);
}

#[test]
fn a_batch_of_messages_serializes_as_one_json_array() {
	let messages = vec![
		build_message(&ctx(), "message_tests.rs", 1, 3_600_001, Severity::Success, &[("disk", "/var")]),
		build_message(&ctx(), "message_tests.rs", 2, 3_600_002, Severity::Error, &[("disk", "/home"), ("device", "/dev/sdb1")]),
	];
	let mut buf = Vec::new();
	fprint_messages_json(&mut buf, &messages, DisplayUnit::default()).unwrap();
	let text = String::from_utf8(buf).unwrap();
	let array: serde_json::Value = serde_json::from_str(text.lines().nth(1).unwrap()).unwrap();
	assert_eq!(array.as_array().unwrap().len(), 2);
	assert_eq!(array[1]["severity"], "error");
}

#[test]
fn a_code_with_a_hint_carries_it_through_to_json() {
	let m = build_message(&ctx(), "message_tests.rs", 1, 3_600_002, Severity::Error, &[("disk", "/var"), ("device", "/dev/sda1")]);
	assert!(m.hint.is_some());
	let mut buf = Vec::new();
	fprint_messages_json(&mut buf, std::slice::from_ref(&m), DisplayUnit::default()).unwrap();
	let text = String::from_utf8(buf).unwrap();
	let parsed: serde_json::Value = serde_json::from_str(text.lines().nth(1).unwrap()).unwrap();
	assert_eq!(parsed[0]["hint"], m.hint.unwrap());
}

// vim: ts=4
