//! Conditional logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! Each module that wants them defines its own flag and imports the macros
//! from the crate root:
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("capture installed for {}", class.as_str());
//! ```
//!
//! Chatty modules can be silenced at compile time by flipping their flag
//! without touching the global log level.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
