//! Tracing setup and payload-logging helpers.
//!
//! The crate logs through `tracing` macros with structured fields. Installing
//! a subscriber is the binary's (or test's) job; [`init`] is a convenience
//! that honours `RUST_LOG` and is safe to call more than once.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Maximum rendered length of a [`Trunc`] value.
pub const TRUNCATE_AT: usize = 128;

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Later calls are no-ops, so every test can call it.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Renders the `Debug` form of a value cut to [`TRUNCATE_AT`] characters.
///
/// Requests and responses can carry large payloads; log them as
/// `request = %Trunc(&request)`.
pub struct Trunc<'a, T: fmt::Debug>(pub &'a T);

impl<T: fmt::Debug> fmt::Display for Trunc<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = format!("{:?}", self.0);
        match rendered.char_indices().nth(TRUNCATE_AT) {
            Some((cut, _)) => write!(f, "{}...", &rendered[..cut]),
            None => f.write_str(&rendered),
        }
    }
}
