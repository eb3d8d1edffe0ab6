//! Server startup: logging and application state assembly

pub mod logging;
pub mod state;

pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use state::{build_state, route_policies, start_permission_reload};
