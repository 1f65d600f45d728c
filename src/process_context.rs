//! Process identity context (§5 "Shared-resource policy", §9 "Global state")
//!
//! The C source keeps `pname`, `ptype`, `component`, and `module` as process
//! globals. We pass an explicit context value through the core instead; it is
//! cheap to clone (a handful of `String`s) and is threaded into every
//! `Message` built along the way.

#[derive(Debug, Clone)]
pub struct ProcessContext {
	/// Process name, e.g. "selfcheck-driver" or the plugin's own argv[0] basename.
	pub pname: String,

	/// Process type, e.g. "amcheck-client".
	pub ptype: String,

	/// Component, matching the §2 component table letters spelled out.
	pub component: String,

	/// Module (sub-area within the component), free-form.
	pub module: String,

	/// Host this process believes it runs on (for message tagging).
	pub running_on: String,

	/// Debug verbosity level; 0 disables extra tracing.
	pub debug_level: u32,
}

impl ProcessContext {
	pub fn new(pname: impl Into<String>, running_on: impl Into<String>) -> Self {
		ProcessContext {
			pname: pname.into(),
			ptype: "selfcheck".to_string(),
			component: "selfcheck-driver".to_string(),
			module: "selfcheck".to_string(),
			running_on: running_on.into(),
			debug_level: 0,
		}
	}

	pub fn with_module(mut self, module: impl Into<String>) -> Self {
		self.module = module.into();
		self
	}

	pub fn with_component(mut self, component: impl Into<String>) -> Self {
		self.component = component.into();
		self
	}
}


// vim: ts=4
