//! Environment configuration for the conversion worker.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `REDIS_URL` | unset | Full Redis URL, overrides the three below |
//! | `REDIS_ADDR` | `redis:6379` | Redis `host:port` |
//! | `REDIS_PASSWORD` | empty | Redis password |
//! | `REDIS_CONVERSION_DB` | `3` | Redis database index |
//! | `REDIS_PREFIX` | empty | Prefix applied to every queue key |
//! | `CONVERSION_PENDING_QUEUE` | `conversion:pending` | Pending list |
//! | `CONVERSION_PROCESSING_QUEUE` | `conversion:processing` | Processing list |
//! | `CONVERSION_FAILED_QUEUE` | `conversion:failed` | Failed list |
//! | `CONVERSION_WORKER_COUNT` | `3` | Concurrent engine loops |
//! | `GOTENBERG_URL` | `http://gotenberg:3000` | Conversion service |
//! | `AWS_BUCKET` | `paperpulse` | Bucket |
//! | `S3_REGION` / `AWS_DEFAULT_REGION` | `us-east-1` | Region |
//! | `S3_KEY` / `AWS_ACCESS_KEY_ID` | empty | Access key |
//! | `S3_SECRET` / `AWS_SECRET_ACCESS_KEY` | empty | Secret key |
//! | `S3_ENDPOINT` | empty | Custom endpoint (MinIO etc.) |
//! | `S3_USE_PATH_STYLE_ENDPOINT` | `false` | Path-style addressing |
//! | `DATABASE_URL` | unset | Full PostgreSQL URL, overrides `DB_*` |
//! | `DB_HOST` `DB_PORT` `DB_DATABASE` `DB_USERNAME` `DB_PASSWORD` | see defaults | Status store |
//! | `DB_SSLMODE` `DB_SSLCERT` `DB_SSLKEY` `DB_SSLROOTCERT` | `disable` | Status store TLS |
//! | `CONVERSION_TIMEOUT` | `120` | Producer per-job timeout (informational) |
//! | `CONVERSION_MAX_RETRIES` | `3` | Producer max retries (informational) |
//! | `CONVERSION_SCRATCH_DIR` | `/tmp/conversions` | Local scratch space |
//! | `CONVERSION_CLAIM_WAIT_SECS` | `30` | Blocking claim wait |
//! | `CONVERSION_RECOVERY_INTERVAL_SECS` | `300` | Recovery sweep period |
//! | `CONVERSION_STALE_THRESHOLD_SECS` | `300` | Staleness threshold |
//! | `CONVERSION_SHUTDOWN_GRACE_SECS` | `30` | Shutdown grace period |
//!
//! Unparsable numeric or boolean values fall back to the default.

use std::path::PathBuf;
use std::time::Duration;

use crate::defaults;
use crate::models::QueueNames;

/// Queue store connection settings.
#[derive(Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub addr: String,
    pub password: String,
    pub db: i64,
    pub prefix: String,
}

impl RedisConfig {
    /// Connection URL, either given verbatim or assembled from the parts.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!(
                "redis://:{}@{}/{}",
                urlencoding::encode(&self.password),
                self.addr,
                self.db
            )
        }
    }
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url.as_deref().map(mask))
            .field("addr", &self.addr)
            .field("password", &mask(&self.password))
            .field("db", &self.db)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Object store settings.
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: Option<String>,
    pub use_path_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &mask(&self.access_key))
            .field("secret_key", &mask(&self.secret_key))
            .field("endpoint", &self.endpoint)
            .field("use_path_style", &self.use_path_style)
            .finish()
    }
}

/// Status store connection settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub ssl_mode: String,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub ssl_root_cert: Option<String>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_deref().map(mask))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("ssl_mode", &self.ssl_mode)
            .field("ssl_cert", &self.ssl_cert)
            .field("ssl_key", &self.ssl_key)
            .field("ssl_root_cert", &self.ssl_root_cert)
            .finish()
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub queues: QueueNames,
    pub worker_count: usize,
    pub gotenberg_url: String,
    pub s3: S3Config,
    pub database: DatabaseConfig,
    pub conversion_timeout: Duration,
    pub max_retries: u32,
    pub scratch_dir: PathBuf,
    pub claim_wait: Duration,
    pub recovery_interval: Duration,
    pub stale_threshold: Duration,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup (empty values count as
    /// unset).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let prefix = env.string("REDIS_PREFIX", "");
        let queues = QueueNames {
            pending: format!(
                "{prefix}{}",
                env.string("CONVERSION_PENDING_QUEUE", defaults::PENDING_QUEUE)
            ),
            processing: format!(
                "{prefix}{}",
                env.string("CONVERSION_PROCESSING_QUEUE", defaults::PROCESSING_QUEUE)
            ),
            failed: format!(
                "{prefix}{}",
                env.string("CONVERSION_FAILED_QUEUE", defaults::FAILED_QUEUE)
            ),
            status_prefix: defaults::STATUS_HASH_PREFIX.to_string(),
        };

        Self {
            redis: RedisConfig {
                url: env.get("REDIS_URL"),
                addr: env.string("REDIS_ADDR", defaults::REDIS_ADDR),
                password: env.string("REDIS_PASSWORD", ""),
                db: env.parsed("REDIS_CONVERSION_DB", defaults::REDIS_DB),
                prefix,
            },
            queues,
            worker_count: env
                .parsed("CONVERSION_WORKER_COUNT", defaults::WORKER_COUNT)
                .max(1),
            gotenberg_url: env
                .string("GOTENBERG_URL", defaults::GOTENBERG_URL)
                .trim_end_matches('/')
                .to_string(),
            s3: S3Config {
                bucket: env.string("AWS_BUCKET", defaults::S3_BUCKET),
                region: env.first_of(&["S3_REGION", "AWS_DEFAULT_REGION"], defaults::S3_REGION),
                access_key: env.first_of(&["S3_KEY", "AWS_ACCESS_KEY_ID"], ""),
                secret_key: env.first_of(&["S3_SECRET", "AWS_SECRET_ACCESS_KEY"], ""),
                endpoint: env.get("S3_ENDPOINT"),
                use_path_style: env.flag("S3_USE_PATH_STYLE_ENDPOINT", false),
            },
            database: DatabaseConfig {
                url: env.get("DATABASE_URL"),
                host: env.string("DB_HOST", defaults::DB_HOST),
                port: env.parsed("DB_PORT", defaults::DB_PORT),
                database: env.string("DB_DATABASE", defaults::DB_DATABASE),
                username: env.string("DB_USERNAME", defaults::DB_USERNAME),
                password: env.string("DB_PASSWORD", ""),
                ssl_mode: env.string("DB_SSLMODE", defaults::DB_SSLMODE),
                ssl_cert: env.get("DB_SSLCERT"),
                ssl_key: env.get("DB_SSLKEY"),
                ssl_root_cert: env.get("DB_SSLROOTCERT"),
            },
            conversion_timeout: env.secs("CONVERSION_TIMEOUT", defaults::CONVERSION_TIMEOUT_SECS),
            max_retries: env.parsed("CONVERSION_MAX_RETRIES", defaults::CONVERSION_MAX_RETRIES),
            scratch_dir: PathBuf::from(env.string("CONVERSION_SCRATCH_DIR", defaults::SCRATCH_DIR)),
            claim_wait: env.period("CONVERSION_CLAIM_WAIT_SECS", defaults::CLAIM_WAIT_SECS),
            recovery_interval: env.period(
                "CONVERSION_RECOVERY_INTERVAL_SECS",
                defaults::RECOVERY_INTERVAL_SECS,
            ),
            stale_threshold: env.period(
                "CONVERSION_STALE_THRESHOLD_SECS",
                defaults::STALE_THRESHOLD_SECS,
            ),
            shutdown_grace: env.secs(
                "CONVERSION_SHUTDOWN_GRACE_SECS",
                defaults::SHUTDOWN_GRACE_SECS,
            ),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, fallback: &str) -> String {
        self.get(key).unwrap_or_else(|| fallback.to_string())
    }

    fn first_of(&self, keys: &[&str], fallback: &str) -> String {
        keys.iter()
            .find_map(|key| self.get(key))
            .unwrap_or_else(|| fallback.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, fallback: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse::<T>().ok())
            .unwrap_or(fallback)
    }

    fn secs(&self, key: &str, fallback: u64) -> Duration {
        Duration::from_secs(self.parsed(key, fallback))
    }

    /// Like [`Env::secs`], but never below [`defaults::MIN_PERIOD_SECS`].
    fn period(&self, key: &str, fallback: u64) -> Duration {
        Duration::from_secs(self.parsed(key, fallback).max(defaults::MIN_PERIOD_SECS))
    }

    fn flag(&self, key: &str, fallback: bool) -> bool {
        match self.get(key).map(|v| v.to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => fallback,
        }
    }
}

/// Mask a secret for logging, keeping only whether it is set.
pub fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(unset)"
    } else {
        "****"
    }
}
