use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

/// Writes raw API pages to disk for later inspection.
#[derive(Debug, Clone)]
pub struct AuditSink {
    dir: PathBuf,
}

impl AuditSink {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Dump `raw` to `{dir}/{account}/user_clips_{timestamp}_p{page}.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if `account` could escape the dump directory, or if
    /// the directory or file cannot be written.
    pub async fn record(&self, account: &str, page: u32, raw: &Value) -> std::io::Result<PathBuf> {
        if !is_plain_component(account) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("account id {account:?} is not usable as a directory name"),
            ));
        }
        let dir = self.dir.join(account);
        tokio::fs::create_dir_all(&dir).await?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let path = dir.join(format!("user_clips_{stamp}_p{page}.json"));
        let body = serde_json::to_vec_pretty(raw).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, body).await?;

        debug!(path = %path.display(), "Saved raw page");
        Ok(path)
    }
}

/// A single non-empty path segment of ASCII letters, digits, `_`, `-` or `.`,
/// other than `.` and `..`.
fn is_plain_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_writes_json() {
        let temp_dir = TempDir::new().unwrap();
        let sink = AuditSink::new(temp_dir.path());

        let path = sink
            .record("1001", 2, &json!({"next_page_id": "x"}))
            .await
            .unwrap();

        assert!(path.starts_with(temp_dir.path().join("1001")));
        assert!(path.to_string_lossy().ends_with("_p2.json"));
        let saved: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved["next_page_id"], "x");
    }

    #[tokio::test]
    async fn test_rejects_ids_that_leave_the_dump_dir() {
        let temp_dir = TempDir::new().unwrap();
        let sink = AuditSink::new(&temp_dir.path().join("dumps"));

        for account in ["../escape", "/tmp/abs", "a/b", "..", ""] {
            let err = sink.record(account, 1, &json!({})).await.unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput, "{account}");
        }
        assert!(!temp_dir.path().join("escape").exists());
    }
}
