//! Logging facilities.
//!
//! The macros mirror the ones used by simulation components: every record is prefixed with the simulation time, the
//! colored level and the name of the component which emitted it. Component name is also used as the log target, so
//! records can be filtered via `RUST_LOG`, e.g. `RUST_LOG=planner=debug`.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

/// Logs a message at the info level.
///
/// # Examples
///
/// ```rust
/// use std::io::Write;
/// use env_logger::Builder;
/// use dslab_dfs_storage::log_info;
///
/// Builder::from_default_env()
///     .format(|buf, record| writeln!(buf, "{}", record.args()))
///     .init();
///
/// let time = 1.5;
/// log_info!(time, "driver", "started {} tasks", 3);
/// ```
#[macro_export]
macro_rules! log_info {
    ($time:expr, $component:expr, $msg:expr) => (
        log::info!(
            target: $component,
            "[{:.3} {}  {}] {}",
            $time, $crate::log::get_colored("INFO", $crate::colored::Color::Green), $component, $msg
        )
    );
    ($time:expr, $component:expr, $format:expr, $($arg:tt)+) => (
        log::info!(
            target: $component,
            concat!("[{:.3} {}  {}] ", $format),
            $time, $crate::log::get_colored("INFO", $crate::colored::Color::Green), $component, $($arg)+
        )
    );
}

/// Logs a message at the debug level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_debug {
    ($time:expr, $component:expr, $msg:expr) => (
        log::debug!(
            target: $component,
            "[{:.3} {} {}] {}",
            $time, $crate::log::get_colored("DEBUG", $crate::colored::Color::Blue), $component, $msg
        )
    );
    ($time:expr, $component:expr, $format:expr, $($arg:tt)+) => (
        log::debug!(
            target: $component,
            concat!("[{:.3} {} {}] ", $format),
            $time, $crate::log::get_colored("DEBUG", $crate::colored::Color::Blue), $component, $($arg)+
        )
    );
}

/// Logs a message at the trace level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_trace {
    ($time:expr, $component:expr, $msg:expr) => (
        log::trace!(
            target: $component,
            "[{:.3} {} {}] {}",
            $time, $crate::log::get_colored("TRACE", $crate::colored::Color::Cyan), $component, $msg
        )
    );
    ($time:expr, $component:expr, $format:expr, $($arg:tt)+) => (
        log::trace!(
            target: $component,
            concat!("[{:.3} {} {}] ", $format),
            $time, $crate::log::get_colored("TRACE", $crate::colored::Color::Cyan), $component, $($arg)+
        )
    );
}

/// Logs a message at the error level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_error {
    ($time:expr, $component:expr, $msg:expr) => (
        log::error!(
            target: $component,
            "[{:.3} {} {}] {}",
            $time, $crate::log::get_colored("ERROR", $crate::colored::Color::Red), $component, $msg
        )
    );
    ($time:expr, $component:expr, $format:expr, $($arg:tt)+) => (
        log::error!(
            target: $component,
            concat!("[{:.3} {} {}] ", $format),
            $time, $crate::log::get_colored("ERROR", $crate::colored::Color::Red), $component, $($arg)+
        )
    );
}

/// Logs a message at the warn level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_warn {
    ($time:expr, $component:expr, $msg:expr) => (
        log::warn!(
            target: $component,
            "[{:.3} {}  {}] {}",
            $time, $crate::log::get_colored("WARN", $crate::colored::Color::Yellow), $component, $msg
        )
    );
    ($time:expr, $component:expr, $format:expr, $($arg:tt)+) => (
        log::warn!(
            target: $component,
            concat!("[{:.3} {}  {}] ", $format),
            $time, $crate::log::get_colored("WARN", $crate::colored::Color::Yellow), $component, $($arg)+
        )
    );
}
