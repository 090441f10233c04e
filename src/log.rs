//! Logging macros which prefix records with the simulation clock.
//!
//! Records are emitted via the [`log`](https://crates.io/crates/log) facade, so any logger implementation can be
//! used. The first argument is anything implementing `Display` that identifies the clock, normally a
//! [`SimTime`](crate::SimTime).

/// Logs a message at the debug level.
#[macro_export]
macro_rules! log_debug {
    ($at:expr, $($arg:tt)+) => (
        $crate::__log::debug!(
            target: "distsim",
            "[{} {}] {}",
            $at, $crate::colored::Colorize::blue("DEBUG"), format_args!($($arg)+)
        )
    );
}

/// Logs a message at the info level.
#[macro_export]
macro_rules! log_info {
    ($at:expr, $($arg:tt)+) => (
        $crate::__log::info!(
            target: "distsim",
            "[{} {}] {}",
            $at, $crate::colored::Colorize::green("INFO "), format_args!($($arg)+)
        )
    );
}

/// Logs a message at the warn level.
#[macro_export]
macro_rules! log_warn {
    ($at:expr, $($arg:tt)+) => (
        $crate::__log::warn!(
            target: "distsim",
            "[{} {}] {}",
            $at, $crate::colored::Colorize::yellow("WARN "), format_args!($($arg)+)
        )
    );
}
