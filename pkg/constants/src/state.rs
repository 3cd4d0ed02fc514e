//! State store constants.

/// etcd-style key prefix for cluster-scoped resource quotas.
pub const QUOTA_PREFIX: &str = "/registry/resourcequotas/";

/// How many times a conflicting status write is retried before the
/// error is surfaced for re-queue.
pub const CONFLICT_RETRY_ATTEMPTS: u32 = 5;

/// Base sleep between conflict retries, in milliseconds. Doubles per
/// attempt.
pub const CONFLICT_RETRY_BASE_MS: u64 = 10;

/// Per-object reconcile deadline, in seconds. A reconcile that blocks
/// longer than this is cancelled and re-queued so it cannot starve the
/// worker pool.
pub const RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Base delay for work queue backoff re-queues, in milliseconds.
pub const REQUEUE_BASE_MS: u64 = 50;

/// Cap on the work queue backoff exponent (delay = base * 2^n).
pub const REQUEUE_MAX_EXPONENT: u32 = 7;

/// How often every known object is re-enqueued regardless of events,
/// in seconds. Heals any propagation missed between restarts.
pub const RESYNC_INTERVAL_SECS: u64 = 300;
