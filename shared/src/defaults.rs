//! Default values for worker configuration parameters.
//!
//! Centralized the way the teacher's `shared::defaults` backs its
//! `#[serde(default = "...")]` fields, so every tunable has one place that
//! documents its default.

/// Retry delay while registration/sign-on hits Transport or 5xx (seconds).
pub fn default_register_retry_seconds() -> u64 {
    30
}

/// Reschedule delay after a failed `/task` fetch (seconds).
pub fn default_fetch_fail_seconds() -> u64 {
    10
}

/// Reschedule delay after `/task` returns 204 (seconds).
pub fn default_fetch_empty_seconds() -> u64 {
    5
}

/// Reschedule delay after a task completes and the worker stays AWAKE (seconds).
pub fn default_fetch_done_seconds() -> u64 {
    3
}

/// One-shot timer before ERROR recovers back to AWAKE (seconds).
pub fn default_error_recover_seconds() -> u64 {
    600
}

/// Delay before retrying the fetch loop after an uncaught exception (seconds).
pub fn default_uncaught_exception_seconds() -> u64 {
    60
}

/// Poll interval for the sleep/error status-change poll (seconds).
pub fn default_asleep_poll_seconds() -> u64 {
    30
}

/// Update queue length above which task fetching is deferred.
pub fn default_queue_threshold() -> usize {
    10
}

/// May-I-Run poll interval (seconds).
pub fn default_may_i_run_interval_seconds() -> u64 {
    5
}

/// Maximum interval between activity pushes (seconds).
pub fn default_push_act_max_interval_seconds() -> u64 {
    2
}

/// Maximum interval between log pushes (seconds).
pub fn default_push_log_max_interval_seconds() -> u64 {
    5
}

/// Log buffer entry count above which a push is triggered immediately.
pub fn default_push_log_max_entries() -> usize {
    100
}

/// Throttle window for `/output-produced` (seconds). Fixed by the
/// specification, not user-configurable, but named here for clarity.
pub const OUTPUT_PRODUCED_THROTTLE_SECONDS: u64 = 30;

/// Grace period between subprocess terminate and kill (seconds). Fixed by
/// the specification.
pub const ABORT_GRACE_SECONDS: u64 = 5;

/// Default subprocess stdout/stderr line-read timeout (seconds).
pub fn default_subprocess_line_timeout_seconds() -> u64 {
    3600
}

/// Default update-queue database busy timeout (seconds).
pub fn default_database_busy_timeout_seconds() -> u64 {
    5
}

/// Default WAL checkpoint interval for the update-queue database (seconds).
pub fn default_wal_checkpoint_interval_seconds() -> u64 {
    60
}

/// Default retention window for already-delivered queue entries before
/// local housekeeping deletes them (hours).
pub fn default_queue_sent_retention_hours() -> i64 {
    24
}

/// Default graceful-shutdown bound for the update-queue flush (seconds).
pub fn default_graceful_shutdown_timeout_seconds() -> u64 {
    30
}
