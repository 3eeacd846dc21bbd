use std::time::Duration;

/// Fixed attempt count with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

// SQLITE_BUSY, SQLITE_LOCKED and their extended variants.
const TRANSIENT_SQLITE_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Whether an error is connection-class and worth retrying on a fresh connection.
#[must_use]
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| TRANSIENT_SQLITE_CODES.contains(&&*code)),
        _ => false,
    }
}
