//! Integration coverage for the DLE model and property merger (component D):
//! P2 (priority conflict winner), P3 (append commutativity on disjoint
//! keys), and scenario 2 (priority/priority conflict) from SPEC_FULL.md §8.

use std::collections::HashMap;

use dlecore::dle::{merge_property, merge_property_maps, DiskListEntry, MergeOutcome, PropertyValue};
use dlecore::process_context::ProcessContext;

fn ctx() -> ProcessContext {
	ProcessContext::new("selfcheck-driver", "client1.example.org")
}

#[test]
fn scenario_2_priority_conflict_keeps_the_client_value() {
	let server = PropertyValue { values: vec!["s".to_string()], priority: true, append: false };
	let client = PropertyValue { values: vec!["c".to_string()], priority: true, append: false };

	let outcome = merge_property(Some(&server), Some(&client));
	assert!(matches!(outcome, MergeOutcome::PriorityConflict(_)));
	assert_eq!(outcome.into_value().values, vec!["c".to_string()]);
}

#[test]
fn scenario_2_priority_conflict_is_distinct_from_a_single_sided_priority_win() {
	let conflict = merge_property(
		Some(&PropertyValue { values: vec!["s".into()], priority: true, append: false }),
		Some(&PropertyValue { values: vec!["c".into()], priority: true, append: false }),
	);
	let single_sided = merge_property(
		Some(&PropertyValue { values: vec!["s".into()], priority: true, append: false }),
		Some(&PropertyValue { values: vec!["c".into()], priority: false, append: false }),
	);
	assert!(matches!(conflict, MergeOutcome::PriorityConflict(_)));
	assert!(matches!(single_sided, MergeOutcome::PriorityWins(_)));
}

#[test]
fn merge_property_maps_reports_3600010_for_priority_conflicts_and_3600011_otherwise() {
	let mut server = HashMap::new();
	server.insert("comment".to_string(), PropertyValue { values: vec!["s".into()], priority: true, append: false });
	server.insert("owner".to_string(), PropertyValue { values: vec!["root".into()], priority: false, append: false });
	let mut client = HashMap::new();
	client.insert("comment".to_string(), PropertyValue { values: vec!["c".into()], priority: true, append: false });
	client.insert("owner".to_string(), PropertyValue { values: vec!["alice".into()], priority: false, append: false });

	let (merged, messages) = merge_property_maps(&ctx(), "_var", &server, &client);
	assert_eq!(merged.get("comment").unwrap().values, vec!["c".to_string()]);
	assert_eq!(merged.get("owner").unwrap().values, vec!["alice".to_string()]);

	let codes: Vec<i32> = {
		let mut c: Vec<i32> = messages.iter().map(|m| m.code).collect();
		c.sort();
		c
	};
	assert_eq!(codes, vec![3_600_010, 3_600_011]);
}

#[test]
fn p2_priority_flag_on_either_side_wins_regardless_of_which_side() {
	let priority_is_client = merge_property(
		Some(&PropertyValue { values: vec!["server".into()], priority: false, append: false }),
		Some(&PropertyValue { values: vec!["client".into()], priority: true, append: false }),
	);
	assert_eq!(priority_is_client.into_value().values, vec!["client".to_string()]);

	let priority_is_server = merge_property(
		Some(&PropertyValue { values: vec!["server".into()], priority: true, append: false }),
		Some(&PropertyValue { values: vec!["client".into()], priority: false, append: false }),
	);
	assert!(matches!(priority_is_server, MergeOutcome::PriorityWins(_)));
	assert_eq!(priority_is_server.into_value().values, vec!["server".to_string()]);
}

#[test]
fn p3_merging_disjoint_property_keys_is_order_independent() {
	let mut dle_a = DiskListEntry::new("client1", "/var", "nightly");
	dle_a.merge_property("compression", None, Some(&PropertyValue::single("gzip")));
	dle_a.merge_property("encryption", None, Some(&PropertyValue::single("none")));

	let mut dle_b = DiskListEntry::new("client1", "/var", "nightly");
	dle_b.merge_property("encryption", None, Some(&PropertyValue::single("none")));
	dle_b.merge_property("compression", None, Some(&PropertyValue::single("gzip")));

	assert_eq!(dle_a.properties.get("compression"), dle_b.properties.get("compression"));
	assert_eq!(dle_a.properties.get("encryption"), dle_b.properties.get("encryption"));
	assert_eq!(dle_a.properties.len(), dle_b.properties.len());
}

#[test]
fn append_combines_client_and_server_lists_without_losing_either() {
	let mut dle = DiskListEntry::new("client1", "/var", "nightly");
	let server = PropertyValue { values: vec!["exclude-a".into(), "exclude-b".into()], priority: false, append: true };
	let client = PropertyValue { values: vec!["exclude-c".into()], priority: false, append: false };
	let outcome = dle.merge_property("exclude", Some(&server), Some(&client));

	let merged = outcome.into_value();
	assert!(merged.values.contains(&"exclude-a".to_string()));
	assert!(merged.values.contains(&"exclude-b".to_string()));
	assert!(merged.values.contains(&"exclude-c".to_string()));
	assert_eq!(dle.properties.get("exclude").unwrap().values, merged.values);
}

#[test]
fn a_property_declared_by_only_one_side_passes_through_untouched() {
	let mut props = HashMap::new();
	props.insert("index".to_string(), PropertyValue::single("yes"));
	let only_client = merge_property(None, props.get("index"));
	assert!(matches!(only_client, MergeOutcome::SingleSource(_)));
	assert_eq!(only_client.into_value().values, vec!["yes".to_string()]);
}

#[test]
fn scripts_run_in_the_stable_order_of_their_binding_order_p10() {
	use dlecore::dle::ScriptBinding;

	let mut dle = DiskListEntry::new("client1", "/var", "nightly");
	for (name, point) in [("a", "pre-dle-backup"), ("b", "pre-dle-backup"), ("c", "pre-dle-backup")] {
		dle.scripts.push(ScriptBinding { name: name.to_string(), execute_on: vec![point.to_string()], properties: HashMap::new() });
	}
	let order: Vec<&str> = dle.scripts_for("pre-dle-backup").map(|s| s.name.as_str()).collect();
	assert_eq!(order, vec!["a", "b", "c"]);
}

// vim: ts=4
