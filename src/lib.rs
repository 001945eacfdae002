pub mod core {
	pub mod error;
	pub mod gate;
	pub mod protocol;
	pub mod queue;
	pub mod reducer;
	pub mod renderer;
	pub mod session;
	pub mod timers;
}

pub mod client {
	pub mod connection;
	pub mod endpoint;
	pub mod session;
}

pub mod host {
	pub mod server;
	pub mod table;
}

pub mod cli;
pub mod config;
pub mod logging;
pub mod table;

// Re-export for convenience
pub use crate::client::session::{SessionSummary, TableSession, UiCommand};
pub use crate::core::renderer::{Scene, TableRenderer};
