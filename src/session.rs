//! The single long-lived session with the data-access child process.
//!
//! - `process` - starting the child (real or injected)
//! - `handshake` - `initialize` / `notifications/initialized` exchange
//! - `supervisor` - state machine, restart loop and the caller-facing handle

mod handshake;
mod process;
mod supervisor;

pub use handshake::{
    initialize_params, perform_handshake, InitializeResult, ServerInfo, CLIENT_NAME,
    PROTOCOL_VERSION,
};
pub use process::{spawn_stderr_logger, ChildIo, ChildLauncher, CommandLauncher, ExitFuture};
pub use supervisor::{
    SessionEvent, SessionHandle, SessionState, SessionStatus, Supervisor, SupervisorConfig,
    DEFAULT_RESTART_DELAY,
};
