//! Outcome of a reconcile step

use std::time::Duration;

/// Fraction of the liveness probe window to wait before looking again
const PCT_OF_LIVENESS_PROBE_WAIT: f64 = 0.25;
/// Never requeue sooner than this when waiting on a probe
pub const MIN_PROBE_WAIT: Duration = Duration::from_secs(10);

/// Kubernetes defaults when the probe leaves these unset
const DEFAULT_PROBE_PERIOD_SECS: i32 = 10;
const DEFAULT_PROBE_FAILURE_THRESHOLD: i32 = 3;

/// What the caller should do after a step finished without error.
///
/// Anything other than `Done` stops the remaining steps of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    #[default]
    Done,
    /// Retry soon with the default backoff
    Requeue,
    /// Retry after an explicit delay
    RequeueAfter(Duration),
}

impl Verdict {
    pub fn is_aborted(&self) -> bool {
        !matches!(self, Verdict::Done)
    }

    /// Requeue when the condition holds, otherwise done
    pub fn requeue_if(cond: bool) -> Self {
        if cond {
            Verdict::Requeue
        } else {
            Verdict::Done
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Done => "done",
            Verdict::Requeue => "requeue",
            Verdict::RequeueAfter(_) => "requeue_after",
        }
    }
}

/// Time to wait for a liveness probe to act on a pod.
///
/// Waiting on the probe with exponential backoff can take far longer than
/// the probe itself, so use a slice of its window instead.
pub fn liveness_probe_wait(period_secs: Option<i32>, failure_threshold: Option<i32>) -> Duration {
    let period = period_secs.unwrap_or(DEFAULT_PROBE_PERIOD_SECS).max(0);
    let threshold = failure_threshold
        .unwrap_or(DEFAULT_PROBE_FAILURE_THRESHOLD)
        .max(0);
    let window = i64::from(period) * i64::from(threshold);
    let secs = (window as f64 * PCT_OF_LIVENESS_PROBE_WAIT) as u64;
    Duration::from_secs(secs).max(MIN_PROBE_WAIT)
}
