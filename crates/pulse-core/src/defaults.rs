//! Centralized default constants for the conversion worker.
//!
//! Every crate references these instead of defining its own magic numbers.
//! Organized by domain area.

// =============================================================================
// QUEUE
// =============================================================================

/// Default Redis address (`host:port`).
pub const REDIS_ADDR: &str = "redis:6379";

/// Default Redis logical database index for the conversion queues.
pub const REDIS_DB: i64 = 3;

/// Default pending list name (before prefixing).
pub const PENDING_QUEUE: &str = "conversion:pending";

/// Default processing list name (before prefixing).
pub const PROCESSING_QUEUE: &str = "conversion:processing";

/// Default failed list name (before prefixing).
pub const FAILED_QUEUE: &str = "conversion:failed";

/// Key prefix of the per-conversion status mirror hash.
pub const STATUS_HASH_PREFIX: &str = "conversion:status:";

/// Bounded wait of one blocking claim, in seconds.
pub const CLAIM_WAIT_SECS: u64 = 30;

/// Smallest accepted claim wait, sweep period or staleness threshold from the
/// environment, in seconds.
pub const MIN_PERIOD_SECS: u64 = 1;

// =============================================================================
// WORKER POOL
// =============================================================================

/// Default number of concurrent engine loops.
pub const WORKER_COUNT: usize = 3;

/// Pause after a transient queue error before the loop claims again.
pub const TRANSIENT_BACKOFF_SECS: u64 = 5;

/// Grace period granted to in-flight attempts on shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Upper bound on a single best-effort status write.
pub const STATUS_WRITE_TIMEOUT_SECS: u64 = 10;

/// Broadcast capacity of the worker event channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RETRY / RECOVERY
// =============================================================================

/// Base of the exponential backoff (seconds are `BASE^retry_count`).
pub const RETRY_BACKOFF_BASE: u64 = 2;

/// Cap on a single backoff delay in seconds.
pub const RETRY_BACKOFF_CAP_SECS: u64 = 30;

/// Period of the stale-job recovery sweep (5 minutes).
///
/// Must exceed the longest plausible single attempt, or slow but healthy jobs
/// get recovered underneath their worker.
pub const RECOVERY_INTERVAL_SECS: u64 = 300;

/// Age after which a job still in processing is considered abandoned.
pub const STALE_THRESHOLD_SECS: u64 = 300;

// =============================================================================
// PRODUCER DEFAULTS
// =============================================================================

/// Per-job timeout the producer stamps on new jobs, in seconds.
pub const CONVERSION_TIMEOUT_SECS: u64 = 120;

/// Ceiling on a job's own timeout (24 hours).
pub const MAX_ATTEMPT_TIMEOUT_SECS: u64 = 86_400;

/// Max retries the producer stamps on new jobs.
pub const CONVERSION_MAX_RETRIES: u32 = 3;

// =============================================================================
// CONVERSION SERVICE
// =============================================================================

/// Default Gotenberg base URL.
pub const GOTENBERG_URL: &str = "http://gotenberg:3000";

/// PDF/A conformance level requested from the LibreOffice route.
pub const PDFA_CONFORMANCE: &str = "PDF/A-2b";

/// Suffix appended to the input path for the converted output.
pub const CONVERTED_SUFFIX: &str = ".converted.pdf";

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Default bucket.
pub const S3_BUCKET: &str = "paperpulse";

/// Default region.
pub const S3_REGION: &str = "us-east-1";

/// Local scratch directory for downloaded and converted files.
pub const SCRATCH_DIR: &str = "/tmp/conversions";

/// Content type stamped on uploaded output.
pub const OUTPUT_CONTENT_TYPE: &str = "application/pdf";

// =============================================================================
// STATUS STORE
// =============================================================================

/// Default PostgreSQL host.
pub const DB_HOST: &str = "localhost";

/// Default PostgreSQL port.
pub const DB_PORT: u16 = 5432;

/// Default database name.
pub const DB_DATABASE: &str = "paperpulse";

/// Default database user.
pub const DB_USERNAME: &str = "paperpulse";

/// Default SSL mode.
pub const DB_SSLMODE: &str = "disable";
