//! Telemetry initialization.
//!
//! Controlled by `HARLOWE_LOG_FORMAT`:
//! - unset or anything else → compact human-readable formatter to stderr
//! - `"json"` → structured JSON spans/events to stderr
//!
//! `RUST_LOG` (or `HARLOWE_LOG`, checked first) sets the `EnvFilter`;
//! defaults to `info`. This crate has no distributed-tracing requirement,
//! so there is no OTLP exporter here — see DESIGN.md.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Opaque guard returned by [`init`]. Holds no resources today — kept as a
/// type so call sites (`let _guard = telemetry::init();`) don't need to
/// change if a flushed exporter is added later.
pub struct TelemetryGuard(());

fn env_filter() -> EnvFilter {
    for var in ["HARLOWE_LOG", "RUST_LOG"] {
        if let Ok(value) = std::env::var(var) {
            if let Ok(filter) = EnvFilter::try_new(&value) {
                return filter;
            }
        }
    }
    EnvFilter::new("info")
}

/// Initialize the global `tracing` subscriber. Idempotent is not guaranteed
/// (a second call panics, matching `tracing_subscriber`'s own contract) —
/// call exactly once, from `main`.
#[must_use]
pub fn init() -> TelemetryGuard {
    let json = std::env::var("HARLOWE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let filter = env_filter();
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    TelemetryGuard(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_defaults_to_info_without_env() {
        // SAFETY (test-only): no other test in this process mutates these
        // two vars, and tests run single-threaded within this module's
        // assertions around the mutation.
        unsafe {
            std::env::remove_var("HARLOWE_LOG");
            std::env::remove_var("RUST_LOG");
        }
        let filter = env_filter();
        assert_eq!(filter.to_string(), "info");
    }
}
