//! Diagnostics for backup runs.
//!
//! Everything goes to stderr: stdout carries the run summary and the
//! restart questions, and an operator piping the summary into a file must
//! not get log lines mixed in. `RUST_LOG` replaces the default filter.

use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Default)]
pub struct LogConfig {
    /// One JSON object per event, with the enclosing backup span attached.
    pub json: bool,
    /// Show per-attempt and per-file detail.
    pub verbose: bool,
}

/// Filter used when `RUST_LOG` is unset. Only this crate's events pass;
/// dependencies stay quiet at any verbosity.
fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("robobak={}", level.as_str().to_lowercase())
}

/// Install the global subscriber. Must run once, before the first job
/// starts, or worker events are dropped.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    if config.json {
        // Closing the backup span reports how long the whole run took.
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// Lets one progress line through per `interval`. Owned by the single
/// reporter task, so a dozen robots fetching small files at once produce
/// a readable log instead of one line per file.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// `true` for the first line and whenever `interval` has elapsed since
    /// the last line that was let through.
    pub fn should_log(&mut self) -> bool {
        self.admit(Instant::now())
    }

    fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_follows_verbosity() {
        assert_eq!(default_directive(false), "robobak=info");
        assert_eq!(default_directive(true), "robobak=debug");
    }

    #[test]
    fn first_progress_line_always_shows() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }

    #[test]
    fn suppressed_lines_do_not_push_the_window() {
        let start = Instant::now();
        let mut throttle = LogThrottle::new(Duration::from_millis(500));

        assert!(throttle.admit(start));
        assert!(!throttle.admit(start + Duration::from_millis(300)));
        assert!(!throttle.admit(start + Duration::from_millis(499)));
        // Measured from the last admitted line, not the last attempt.
        assert!(throttle.admit(start + Duration::from_millis(500)));
        assert!(!throttle.admit(start + Duration::from_millis(900)));
    }
}
