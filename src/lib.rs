//! A client-side backup coordination core: the pieces an Amanda-style
//! backup client needs between "the server asked us to check a disk" and
//! "a plugin actually ran against it" — message registry, privileged-bind
//! broker, shared-memory ring, disk-list model, include/exclude filter
//! compiler, plugin orchestrator, self-check driver, security-file policy,
//! and the configuration adapter that ties dumptypes, applications, and
//! scripts together.
//!
//! ## Self-check driver
//!
//! ```rust,ignore
//! use dlecore::selfcheck::{parse_request, SelfCheckDriver};
//! use dlecore::process_context::ProcessContext;
//! use dlecore::security::SecurityFile;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = parse_request(std::io::stdin().lock())?;
//!     let ctx = ProcessContext::new("selfcheck-driver", "client1.example.org");
//!     let security = SecurityFile::empty();
//!     let driver = SelfCheckDriver::new(ctx, security);
//!     let _results = driver.run(&[]).await;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod bind_broker;
pub mod config;
pub mod dle;
pub mod error;
pub mod errno_table;
pub mod features;
pub mod filter_compiler;
pub mod logging;
pub mod message;
pub mod plugin;
pub mod privilege;
pub mod process_context;
pub mod request;
pub mod security;
pub mod selfcheck;
pub mod shm_ring;
pub mod spawn;
pub mod util;
pub mod value;

pub use dle::{Compression, DataPath, DiskListEntry, Encryption, MergeOutcome, ProgramKind, PropertyValue};
pub use error::CoreError;
pub use message::{Message, Severity};
pub use process_context::ProcessContext;
pub use value::Value;

// vim: ts=4
