use thiserror::Error;

/// Failures that end or degrade processing of a single account.
///
/// None of these cross the account boundary: the orchestrator records them in
/// the account's report and keeps going with the other accounts.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The metadata API answered with something other than 200.
    #[error("API request failed with status {status}: {body}")]
    Fetch { status: u16, body: String },

    /// The request never produced a response (connect, timeout, bad JSON).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A 200 response whose body does not have the expected shape.
    #[error("unexpected API payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no database connection available after {attempts} attempts")]
    PoolExhausted { attempts: u32 },

    /// A connection-class failure that survived every write attempt.
    #[error("database write failed after {attempts} attempts: {source}")]
    TransientDb {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Download or upload failure for a single media item.
    #[error("media transfer failed for {what}: {message}")]
    MediaTransfer { what: String, message: String },

    #[error("failed to write audit dump: {0}")]
    Audit(#[from] std::io::Error),
}

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;
