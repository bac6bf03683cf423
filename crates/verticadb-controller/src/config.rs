use rand::Rng;
use std::time::Duration;

/// Backoff used when an optimistic-concurrency write conflicts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub steps: u32,
    /// Delay before the first retry
    pub initial: Duration,
    /// Multiplier applied to the delay after every retry
    pub factor: f64,
    /// Random extra delay, as a fraction of the current delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            initial: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64(base * (1.0 + jitter))
    }
}

/// Tunables shared by every reconciler
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Floor for the probe-derived restart wait
    pub requeue_wait_min: Duration,
    /// Fraction of (liveness period * failure threshold) to wait for
    pub liveness_probe_wait_fraction: f64,
    /// Fixed wait when a per-node restart would break quorum
    pub quorum_requeue: Duration,
    pub conflict_retry: RetryPolicy,
    /// First requeue delay after a reconcile error
    pub error_requeue_base: Duration,
    /// Cap for the error requeue delay
    pub error_requeue_max: Duration,
    /// Wait between offline upgrade polls
    pub upgrade_requeue: Duration,
    /// Port the node management agent listens on
    pub nma_port: u16,
    /// Accept self-signed agent certificates
    pub nma_insecure: bool,
    /// Version stamped onto pods
    pub operator_version: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_wait_min: Duration::from_secs(10),
            liveness_probe_wait_fraction: 0.25,
            quorum_requeue: Duration::from_secs(10),
            conflict_retry: RetryPolicy::default(),
            error_requeue_base: Duration::from_secs(5),
            error_requeue_max: Duration::from_secs(300),
            upgrade_requeue: Duration::from_secs(30),
            nma_port: 5554,
            nma_insecure: false,
            operator_version: verticadb_core::meta::CUR_OPERATOR_VERSION.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Requeue delay for a probe with the given period and failure threshold
    pub fn probe_wait(&self, period_seconds: i32, failure_threshold: i32) -> Duration {
        // Whole seconds only
        let secs = (period_seconds.max(0) as f64)
            * (failure_threshold.max(0) as f64)
            * self.liveness_probe_wait_fraction;
        Duration::from_secs(secs as u64).max(self.requeue_wait_min)
    }

    /// Exponential error backoff for the `failures`-th consecutive error
    pub fn error_backoff(&self, failures: u32) -> Duration {
        let shift = failures.min(16);
        self.error_requeue_base
            .saturating_mul(1u32 << shift)
            .min(self.error_requeue_max)
    }
}
