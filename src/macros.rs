//! Logging shims.
//!
//! Forward to `tracing` when the `tracing-support` feature is enabled and
//! compile down to argument type-checking otherwise. Only plain format
//! strings are accepted, no structured fields.

#[cfg(feature = "tracing-support")]
macro_rules! log_trace {
    ($($arg:tt)*) => { ::tracing::trace!($($arg)*) };
}

#[cfg(not(feature = "tracing-support"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(feature = "tracing-support")]
macro_rules! log_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing-support"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(feature = "tracing-support")]
macro_rules! log_info {
    ($($arg:tt)*) => { ::tracing::info!($($arg)*) };
}

#[cfg(not(feature = "tracing-support"))]
macro_rules! log_info {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(feature = "tracing-support")]
macro_rules! log_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) };
}

#[cfg(not(feature = "tracing-support"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_trace;
pub(crate) use log_warn;
