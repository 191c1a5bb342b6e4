//! Sink for failures that are reported instead of returned.

use tracing::error;

use crate::error::HydrateError;

/// Receives every suppressed failure together with where it happened.
///
/// Implementations must not panic.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &HydrateError, context: &str);
}

/// Default reporter: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &HydrateError, context: &str) {
        error!(context, %error, "Suppressed hydration failure");
    }
}

impl<F> ErrorReporter for F
where
    F: Fn(&HydrateError, &str) + Send + Sync,
{
    fn report(&self, error: &HydrateError, context: &str) {
        self(error, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = move |error: &HydrateError, context: &str| {
            sink.lock().push(format!("{context}: {error}"));
        };

        reporter.report(&HydrateError::BackendClosed, "write");
        assert_eq!(seen.lock().as_slice(), ["write: storage is closed"]);
    }

    #[test]
    fn test_log_reporter_does_not_panic() {
        LogReporter.report(&HydrateError::BackendNotConfigured, "restore");
    }
}
