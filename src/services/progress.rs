use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::models::plan::Plan;

/// Sink for engine progress. Implementations must be callable from any
/// thread; every method is fire-and-forget.
pub trait ProgressSink: Send + Sync {
    fn log(&self, msg: &str);

    fn set_progress(&self, percent: u8);

    /// Polled at every suspension point; `true` aborts the run at the next
    /// boundary with the cancelled exit code.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn close(&self) {}
}

/// Yes/no gate shown before a plan executes. The host can present the plan
/// in a dialog; the engine only needs the verdict.
pub trait PlanConfirmer: Send + Sync {
    fn confirm(&self, plan: &Plan) -> bool;
}

/// Forwards progress lines to the `log` crate.
#[derive(Default)]
pub struct LogSink {
    cancelled: AtomicBool,
    last_percent: AtomicU8,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl ProgressSink for LogSink {
    fn log(&self, msg: &str) {
        log::info!("{msg}");
    }

    fn set_progress(&self, percent: u8) {
        let previous = self.last_percent.swap(percent, Ordering::AcqRel);
        if percent != previous {
            log::debug!("progress: {percent}%");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Discards everything; used by tests and headless hosts.
#[derive(Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn log(&self, _msg: &str) {}

    fn set_progress(&self, _percent: u8) {}
}

/// Accepts every plan without asking.
#[derive(Default)]
pub struct AutoConfirm;

impl PlanConfirmer for AutoConfirm {
    fn confirm(&self, _plan: &Plan) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::version::Version;

    #[test]
    fn log_sink_cancellation_is_sticky() {
        let sink = LogSink::new();
        assert!(!sink.is_cancelled());
        sink.cancel();
        assert!(sink.is_cancelled());
        assert!(sink.is_cancelled());
    }

    #[test]
    fn auto_confirm_accepts_any_plan() {
        let plan = Plan::new(Version::parse("1.0.0"));
        assert!(AutoConfirm.confirm(&plan));
    }
}
