//! Progress reporting and cooperative cancellation for network operations
//!
//! Reports are produced on the thread running the git operation; callbacks
//! must be `Send + Sync` and marshal to other threads themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::types::{OperationKind, OperationProgress};

/// Callback receiving progress reports
pub type ProgressCallback = Arc<dyn Fn(OperationProgress) + Send + Sync>;

/// Shared cancellation flag, checked between progress ticks
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress sink for one operation
#[derive(Clone)]
pub struct ProgressReporter {
    operation: OperationKind,
    callback: Option<ProgressCallback>,
    cancel: CancelToken,
}

impl ProgressReporter {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            callback: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Emit a progress report. Returns `false` when the operation should stop.
    pub fn report(&self, current: usize, total: usize, message: impl Into<String>) -> bool {
        if let Some(callback) = &self.callback {
            callback(OperationProgress {
                operation: self.operation,
                current,
                total,
                message: message.into(),
            });
        }
        !self.cancel.is_cancelled()
    }

    /// Report from libgit2 transfer statistics
    pub(crate) fn transfer(&self, stats: &git2::Progress<'_>) -> bool {
        let total = stats.total_objects();
        let message = if total > 0 && stats.received_objects() == total {
            format!(
                "Resolving deltas {}/{}",
                stats.indexed_deltas(),
                stats.total_deltas()
            )
        } else {
            format!(
                "Receiving objects {}/{} ({} KiB)",
                stats.received_objects(),
                total,
                stats.received_bytes() / 1024
            )
        };
        self.report(stats.received_objects(), total, message)
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("operation", &self.operation)
            .field("has_callback", &self.callback.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_report_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(OperationKind::Push).with_callback(Arc::new(
            move |p: OperationProgress| sink.lock().unwrap().push(p),
        ));

        assert!(reporter.report(1, 4, "Writing objects"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].operation, OperationKind::Push);
        assert_eq!(seen[0].total, 4);
    }

    #[test]
    fn test_cancel_stops_reporting() {
        let cancel = CancelToken::new();
        let reporter = ProgressReporter::new(OperationKind::Fetch).with_cancel(cancel.clone());
        assert!(reporter.report(0, 0, ""));

        cancel.cancel();
        assert!(reporter.is_cancelled());
        assert!(!reporter.report(1, 2, ""));
    }
}
