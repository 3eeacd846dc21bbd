use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Accounts processed when neither `USER_IDS` nor `--user-ids` is given.
pub const DEFAULT_USER_IDS: &[&str] = &[
    "56413349678",
    "1671387607",
    "11706414183",
    "60460786182",
    "2940087474",
    "50062729418",
    "27451965377",
    "45778329299",
    "64398516412",
    "45098556",
    "67467810580",
    "63504017887",
    "66846646498",
    "55349692730",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Metadata API
    pub api_key: String,
    pub api_base_url: String,
    pub http_timeout: Duration,

    // Accounts
    pub user_ids: Vec<String>,
    pub allowed_user_ids: Vec<String>,

    // Pagination
    pub lookback: Duration,
    pub max_pages: u32,

    // Database
    pub database_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout: Duration,
    pub db_busy_timeout: Duration,
    pub db_retry_attempts: u32,
    pub db_retry_delay: Duration,
    pub account_concurrency: usize,

    // S3 Storage
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_prefix: String,
    pub cdn_domain: Option<String>,

    // Raw page dumps
    pub audit_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let user_ids = optional_env("USER_IDS").map_or_else(
            || DEFAULT_USER_IDS.iter().map(ToString::to_string).collect(),
            |raw| split_ids(&raw),
        );
        let allowed_user_ids = optional_env("ALLOWED_USER_IDS")
            .map_or_else(|| user_ids.clone(), |raw| split_ids(&raw));

        let db_max_connections = parse_env_u32("DB_MAX_CONNECTIONS", 5)?;

        Ok(Self {
            // Metadata API
            api_key: required_env("HAPI_KEY")?,
            api_base_url: env_or_default("API_BASE_URL", "https://api.hikerapi.com"),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            // Accounts
            user_ids,
            allowed_user_ids,

            // Pagination
            lookback: Duration::from_secs(parse_env_u64("LOOKBACK_DAYS", 100)? * 86_400),
            max_pages: parse_env_u32("MAX_PAGES", 200)?,

            // Database
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/clips.sqlite")),
            db_max_connections,
            db_min_connections: parse_env_u32("DB_MIN_CONNECTIONS", 1)?,
            db_acquire_timeout: Duration::from_millis(parse_env_u64(
                "DB_ACQUIRE_TIMEOUT_MS",
                5000,
            )?),
            db_busy_timeout: Duration::from_millis(parse_env_u64("DB_BUSY_TIMEOUT_MS", 10_000)?),
            db_retry_attempts: parse_env_u32("DB_RETRY_ATTEMPTS", 3)?,
            db_retry_delay: Duration::from_millis(parse_env_u64("DB_RETRY_DELAY_MS", 2000)?),
            account_concurrency: parse_env_usize(
                "ACCOUNT_CONCURRENCY",
                db_max_connections as usize,
            )?,

            // S3 Storage
            s3_bucket: optional_env("S3_BUCKET"),
            s3_region: env_or_default("S3_REGION", "us-east-1"),
            s3_endpoint: optional_env("S3_ENDPOINT"),
            s3_prefix: env_or_default("S3_PREFIX", "clips/"),
            cdn_domain: optional_env("CDN_DOMAIN"),

            audit_dir: optional_env("AUDIT_DIR").map(PathBuf::from),
        })
    }

    /// Configuration with small local values for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            api_key: "test-key".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            http_timeout: Duration::from_secs(5),
            user_ids: vec!["1001".to_string()],
            allowed_user_ids: vec!["1001".to_string()],
            lookback: Duration::from_secs(100 * 86_400),
            max_pages: 50,
            database_path: PathBuf::from("test.sqlite"),
            db_max_connections: 3,
            db_min_connections: 0,
            db_acquire_timeout: Duration::from_millis(100),
            db_busy_timeout: Duration::from_secs(5),
            db_retry_attempts: 2,
            db_retry_delay: Duration::from_millis(10),
            account_concurrency: 3,
            s3_bucket: None,
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
            s3_prefix: "clips/".to_string(),
            cdn_domain: Some("cdn.example.test".to_string()),
            audit_dir: None,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(invalid("HAPI_KEY", "cannot be empty"));
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(invalid("API_BASE_URL", "must be an absolute URL"));
        }
        if self.allowed_user_ids.is_empty() {
            return Err(invalid("ALLOWED_USER_IDS", "must name at least one account"));
        }
        if self.db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be at least 1"));
        }
        if self.db_min_connections > self.db_max_connections {
            return Err(invalid(
                "DB_MIN_CONNECTIONS",
                "cannot exceed DB_MAX_CONNECTIONS",
            ));
        }
        if self.db_retry_attempts == 0 {
            return Err(invalid("DB_RETRY_ATTEMPTS", "must be at least 1"));
        }
        if self.account_concurrency == 0 {
            return Err(invalid("ACCOUNT_CONCURRENCY", "must be at least 1"));
        }
        // More permits than connections lets tasks queue on the pool forever.
        if self.account_concurrency > self.db_max_connections as usize {
            return Err(invalid(
                "ACCOUNT_CONCURRENCY",
                "cannot exceed DB_MAX_CONNECTIONS",
            ));
        }
        if self.max_pages == 0 {
            return Err(invalid("MAX_PAGES", "must be at least 1"));
        }
        if self.s3_bucket.is_some() && self.cdn_domain.is_none() {
            return Err(ConfigError::MissingEnvVar("CDN_DOMAIN".to_string()));
        }
        Ok(())
    }

    /// Whether media mirroring is configured.
    #[must_use]
    pub fn mirror_enabled(&self) -> bool {
        self.s3_bucket.is_some() && self.cdn_domain.is_some()
    }
}

/// Split a comma-separated id list, trimming entries and dropping blanks and repeats.
#[must_use]
pub fn split_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
