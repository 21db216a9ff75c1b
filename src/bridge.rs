//! Bridge between the daemon, the browser extension, and the desktop tools.
//!
//! Two surfaces share one client hub: an HTTP API the extension polls and
//! posts captures to, and a newline-delimited JSON TCP relay for real-time
//! push to connected tools.

/// Submodule for the TCP relay server and the shared client hub.
pub mod relay;
/// Submodule for message and client types.
pub mod types;
/// Submodule for the extension-facing HTTP API.
pub mod web_server;

pub use relay::{Hub, Relay};
pub use types::{ClientKind, RelayMessage};
pub use web_server::BridgeServer;
