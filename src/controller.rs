//! Daemon lifecycle: subsystem wiring and desktop tool supervision.

/// Submodule assembling and running the daemon.
pub mod controller_handler;
/// Submodule supervising the desktop tool processes.
pub mod tool_supervisor;

pub use controller_handler::Controller;
pub use tool_supervisor::ToolSupervisor;
