//! Copies clip media from origin URLs into object storage.

use std::sync::Arc;

use anyhow::Context;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{get_unmirrored_posts, is_transient, set_mirrored_urls, Database, MirrorCandidate};
use crate::error::{HarvestError, Result};
use crate::s3::ObjectStore;

/// Totals for one account's mirror pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorReport {
    pub candidates: usize,
    pub videos_mirrored: usize,
    pub covers_mirrored: usize,
    pub failures: usize,
}

/// Downloads origin media, uploads it under deterministic keys and rewrites
/// the stored URLs to the CDN copy.
#[derive(Clone)]
pub struct MediaMirror {
    http: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    cdn_domain: String,
    key_prefix: String,
}

impl MediaMirror {
    /// Build a mirror from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `CDN_DOMAIN` is not configured or the HTTP client
    /// cannot be built.
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let cdn_domain = config
            .cdn_domain
            .clone()
            .context("CDN_DOMAIN not set")?;
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build media HTTP client")?;

        Ok(Self::with_client(http, store, &cdn_domain, &config.s3_prefix))
    }

    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        store: Arc<dyn ObjectStore>,
        cdn_domain: &str,
        key_prefix: &str,
    ) -> Self {
        Self {
            http,
            store,
            cdn_domain: cdn_domain.trim_end_matches('/').to_string(),
            key_prefix: key_prefix.to_string(),
        }
    }

    /// Prefix shared by every mirrored URL.
    #[must_use]
    pub fn mirror_prefix(&self) -> String {
        mirror_prefix(&self.cdn_domain)
    }

    #[must_use]
    pub fn is_mirrored(&self, url: &str) -> bool {
        url.starts_with(&self.mirror_prefix())
    }

    /// CDN URL for a storage key.
    #[must_use]
    pub fn mirror_url(&self, key: &str) -> String {
        format!("{}{key}", self.mirror_prefix())
    }

    #[must_use]
    pub fn video_key(&self, post_id: &str, user_id: &str) -> String {
        format!("{}videos/{post_id}_{user_id}.mp4", self.key_prefix)
    }

    #[must_use]
    pub fn cover_key(&self, post_id: &str, user_id: &str) -> String {
        format!("{}covers/{post_id}_{user_id}.jpg", self.key_prefix)
    }

    /// Mirror every clip of `user_id` that still references origin media.
    ///
    /// Failures for a single clip are logged and counted; only losing the
    /// database entirely ends the pass early.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be acquired or the candidate
    /// query fails.
    pub async fn mirror_account(&self, db: &Database, user_id: &str) -> Result<MirrorReport> {
        let prefix = self.mirror_prefix();
        let mut conn = db.acquire().await?;
        let candidates = get_unmirrored_posts(&mut *conn, user_id, &prefix).await?;

        let mut report = MirrorReport {
            candidates: candidates.len(),
            ..MirrorReport::default()
        };
        if candidates.is_empty() {
            debug!(account = %user_id, "No media to mirror");
            return Ok(report);
        }
        info!(account = %user_id, count = candidates.len(), "Mirroring media");

        for candidate in &candidates {
            let outcome = self.mirror_post(&mut conn, candidate).await;
            report.videos_mirrored += usize::from(outcome.video);
            report.covers_mirrored += usize::from(outcome.cover);
            report.failures += outcome.failures;

            if let Some(e) = outcome.db_error {
                warn!(
                    account = %user_id,
                    post_id = %candidate.post_id,
                    error = %e,
                    "Media URL update rolled back"
                );
                report.failures += 1;
                if is_transient(&e) {
                    conn.discard();
                    conn.release();
                    db.manager().report_connection_failure().await;
                    conn = db.acquire().await?;
                }
            }
        }

        info!(
            account = %user_id,
            videos = report.videos_mirrored,
            covers = report.covers_mirrored,
            failures = report.failures,
            "Media mirror pass complete"
        );
        Ok(report)
    }

    async fn mirror_post(
        &self,
        conn: &mut SqliteConnection,
        candidate: &MirrorCandidate,
    ) -> PostOutcome {
        let mut outcome = PostOutcome::default();

        let video = match candidate.video_url.as_deref().filter(|u| !self.is_mirrored(u)) {
            Some(url) => {
                let key = self.video_key(&candidate.post_id, &candidate.user_id);
                self.transfer_logged(url, &key, &mut outcome).await
            }
            None => None,
        };
        let cover = match candidate.cover_url.as_deref().filter(|u| !self.is_mirrored(u)) {
            Some(url) => {
                let key = self.cover_key(&candidate.post_id, &candidate.user_id);
                self.transfer_logged(url, &key, &mut outcome).await
            }
            None => None,
        };

        if video.is_none() && cover.is_none() {
            return outcome;
        }

        match update_urls(conn, &candidate.post_id, video.as_deref(), cover.as_deref()).await {
            Ok(()) => {
                outcome.video = video.is_some();
                outcome.cover = cover.is_some();
                debug!(
                    post_id = %candidate.post_id,
                    video = outcome.video,
                    cover = outcome.cover,
                    "Media URLs rewritten"
                );
            }
            Err(e) => outcome.db_error = Some(e),
        }
        outcome
    }

    async fn transfer_logged(
        &self,
        url: &str,
        key: &str,
        outcome: &mut PostOutcome,
    ) -> Option<String> {
        match self.transfer(url, key).await {
            Ok(mirrored) => Some(mirrored),
            Err(e) => {
                warn!(key = %key, error = %e, "Media transfer failed, skipping");
                outcome.failures += 1;
                None
            }
        }
    }

    /// Download `url` and store it under `key`, returning the CDN URL.
    async fn transfer(&self, url: &str, key: &str) -> Result<String> {
        let media_error = |message: String| HarvestError::MediaTransfer {
            what: key.to_string(),
            message,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| media_error(format!("download failed: {e}")))?;
        if !response.status().is_success() {
            return Err(media_error(format!("download returned {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| media_error(format!("download body failed: {e}")))?;

        let content_type = mime_guess::from_path(key).first_or_octet_stream().to_string();
        self.store
            .put(key, &bytes, &content_type)
            .await
            .map_err(|e| media_error(format!("upload failed: {e:#}")))?;

        Ok(self.mirror_url(key))
    }
}

impl std::fmt::Debug for MediaMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaMirror")
            .field("cdn_domain", &self.cdn_domain)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

/// `https://{domain}/`, the prefix every mirrored URL starts with.
#[must_use]
pub fn mirror_prefix(cdn_domain: &str) -> String {
    format!("https://{}/", cdn_domain.trim_end_matches('/'))
}

#[derive(Debug, Default)]
struct PostOutcome {
    video: bool,
    cover: bool,
    failures: usize,
    db_error: Option<sqlx::Error>,
}

/// Rewrite one clip's URLs in its own transaction.
async fn update_urls(
    conn: &mut SqliteConnection,
    post_id: &str,
    video: Option<&str>,
    cover: Option<&str>,
) -> std::result::Result<(), sqlx::Error> {
    use sqlx::Connection;

    let mut tx = conn.begin().await?;
    set_mirrored_urls(&mut *tx, post_id, video, cover).await?;
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStore;

    #[async_trait::async_trait]
    impl ObjectStore for NullStore {
        async fn put(&self, _key: &str, _data: &[u8], _content_type: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn mirror() -> MediaMirror {
        MediaMirror::with_client(
            reqwest::Client::new(),
            Arc::new(NullStore),
            "cdn.example.test/",
            "clips/",
        )
    }

    #[test]
    fn test_keys_are_namespaced() {
        let m = mirror();
        assert_eq!(m.video_key("9", "1001"), "clips/videos/9_1001.mp4");
        assert_eq!(m.cover_key("9", "1001"), "clips/covers/9_1001.jpg");
    }

    #[test]
    fn test_mirror_url() {
        let m = mirror();
        assert_eq!(
            m.mirror_url("clips/videos/9_1001.mp4"),
            "https://cdn.example.test/clips/videos/9_1001.mp4"
        );
        assert!(m.is_mirrored("https://cdn.example.test/clips/covers/1.jpg"));
        assert!(!m.is_mirrored("https://cdn.example.test.evil/x.jpg"));
        assert!(!m.is_mirrored("https://origin.example/x.jpg"));
    }
}
