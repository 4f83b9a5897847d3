//! Crate to abstract out tracing so it never shows up in builds that do not ask for it.
//! See similar: <https://doc.rust-lang.org/src/std/macros.rs.html#138-145>.
//!
//! The `log_*` features are evaluated here, in this crate, and exposed as
//! constants so the macros honour the features `ewe_trace` was built with
//! rather than the features of whichever crate expands them.

pub use tracing;

#[cfg(feature = "subscriber")]
mod subscriber;

#[cfg(feature = "subscriber")]
pub use subscriber::{init_stderr_subscriber, SubscriberError};

pub const INFO_ENABLED: bool = cfg!(feature = "log_info");
pub const WARN_ENABLED: bool = cfg!(feature = "log_warnings");
pub const DEBUG_ENABLED: bool = cfg!(feature = "log_debug");
pub const ERROR_ENABLED: bool = cfg!(feature = "log_errors");

#[macro_export]
macro_rules! info {
    ($($t:tt)*) => {
        if $crate::INFO_ENABLED {
            $crate::tracing::info!($($t)*);
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => {
        if $crate::WARN_ENABLED {
            $crate::tracing::warn!($($t)*);
        }
    };
}

#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => {
        if $crate::DEBUG_ENABLED {
            $crate::tracing::debug!($($t)*);
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($t:tt)*) => {
        if $crate::ERROR_ENABLED {
            $crate::tracing::error!($($t)*);
        }
    };
}
