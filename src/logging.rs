//! Logging for the miniDFS processes
//!
//! Everything logs through `tracing`. This module re-exports the common
//! macros so call sites stay short, and owns subscriber setup for the
//! process roles (`master`, `chunkserver`, `format`): each role gets a
//! default filter focused on its own modules, so a chunkserver running
//! next to the master on one box does not drown it out.
//!
//! `RUST_LOG` overrides the role defaults entirely:
//!
//! ```bash
//! RUST_LOG=minidfs::master::cluster=trace minidfs master
//! RUST_LOG=debug minidfs chunkserver
//! ```

pub use tracing::{debug, error, info, trace, warn};

/// Default filter directives per process role.
fn role_filter(role: &str) -> &'static str {
	match role {
		// request handling and cluster control matter here; the
		// data-plane modules belong to other processes
		"master" => "warn,minidfs=info,minidfs::chunkserver=warn,minidfs::client=warn",
		// block traffic and the control loop; master internals are
		// only reachable through RPC anyway
		"chunkserver" => "warn,minidfs=info,minidfs::master=warn",
		_ => "warn,minidfs=info",
	}
}

/// Install the tracing subscriber for one process role, writing to
/// stderr. Call once, before any component starts.
pub fn init_tracing(role: &str) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(role_filter(role)));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
	debug!(role, "tracing initialized");
}


// vim: ts=4
