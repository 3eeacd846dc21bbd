use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, error, info, warn};

use super::{AccountReport, Harvester};
use crate::db::{is_transient, upsert_post, NewPost};
use crate::error::{HarvestError, Result};
use crate::hiker::ClipsPage;
use crate::scanner::{find_old_timestamp, TIMESTAMP_FIELD};

/// Why pagination ended for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page contained a timestamp older than the lookback window.
    FoundOld,
    /// The last page carried no continuation token.
    Exhausted,
    /// The configured page ceiling was reached.
    PageLimit,
    /// The API returned an error or no response.
    FetchFailed,
}

enum State {
    Fetching(Option<String>),
    Evaluating(ClipsPage),
    Stop(StopReason),
}

impl Harvester {
    /// Run the full pipeline for one account.
    ///
    /// Never fails: any error is logged and recorded in the report.
    pub async fn process_account(&self, account: &str) -> AccountReport {
        let mut report = AccountReport::new(account);
        info!(account = %account, "Processing account");

        let posts = self.paginate(account, &mut report).await;

        // Only the database-touching part is gated, so slow API pages never
        // hold a connection.
        let Ok(_permit) = self.db_permits.acquire().await else {
            report.error = Some("database semaphore closed".to_string());
            return report;
        };

        match self.flush(&posts).await {
            Ok(written) => report.written = written,
            Err(e) => {
                error!(account = %account, error = %e, "Failed to store posts, aborting account");
                report.error = Some(e.to_string());
                return report;
            }
        }

        if let Some(mirror) = &self.mirror {
            match mirror.mirror_account(&self.db, account).await {
                Ok(mirror_report) => report.mirror = Some(mirror_report),
                Err(e) => {
                    error!(account = %account, error = %e, "Media mirror pass failed");
                    report.error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        info!(
            account = %account,
            pages = report.pages,
            stop = ?report.stop,
            kept = report.kept,
            dropped = report.dropped,
            written = report.written,
            "Account complete"
        );
        report
    }

    /// Walk the account's pages newest-first until an old post shows up, the
    /// tokens run out, the page ceiling is hit, or a fetch fails.
    ///
    /// Returns the posts from allowed owners collected so far; these are kept
    /// even when a later page fails.
    pub async fn paginate(&self, account: &str, report: &mut AccountReport) -> Vec<NewPost> {
        let mut posts = Vec::new();
        let mut state = State::Fetching(None);

        let reason = loop {
            state = match state {
                State::Fetching(_) if report.pages >= self.max_pages => {
                    warn!(account = %account, pages = report.pages, "Page limit reached");
                    State::Stop(StopReason::PageLimit)
                }
                State::Fetching(token) => {
                    match self.client.fetch_clips_page(account, token.as_deref()).await {
                        Ok(page) => {
                            report.pages += 1;
                            State::Evaluating(page)
                        }
                        Err(e) => {
                            error!(
                                account = %account,
                                page = report.pages + 1,
                                error = %e,
                                "Page fetch failed"
                            );
                            report.error = Some(e.to_string());
                            State::Stop(StopReason::FetchFailed)
                        }
                    }
                }
                State::Evaluating(page) => self.evaluate(account, page, &mut posts, report).await,
                State::Stop(reason) => break reason,
            };
        };

        debug!(account = %account, ?reason, pages = report.pages, "Pagination stopped");
        report.stop = Some(reason);
        posts
    }

    async fn evaluate(
        &self,
        account: &str,
        page: ClipsPage,
        posts: &mut Vec<NewPost>,
        report: &mut AccountReport,
    ) -> State {
        if let Some(sink) = &self.audit {
            if let Err(e) = sink.record(account, report.pages, &page.raw).await {
                warn!(account = %account, error = %e, "Failed to save raw page");
            }
        }

        let before = posts.len();
        for media in &page.media {
            match media.owner_id() {
                Some(owner) if self.is_allowed(owner) => posts.push(media.to_new_post(owner)),
                owner => {
                    debug!(
                        account = %account,
                        post_id = %media.pk,
                        ?owner,
                        "Dropping post from account outside allow-set"
                    );
                    report.dropped += 1;
                }
            }
        }
        report.kept += posts.len() - before;

        debug!(
            account = %account,
            page = report.pages,
            items = page.media.len(),
            kept = posts.len() - before,
            "Evaluated page"
        );

        if let Some(ts) = find_old_timestamp(&page.raw, TIMESTAMP_FIELD, &self.policy, Utc::now()) {
            info!(
                account = %account,
                page = report.pages,
                taken_at = %ts,
                "Reached posts older than the lookback window"
            );
            return State::Stop(StopReason::FoundOld);
        }

        match page.next_page_id {
            Some(token) => State::Fetching(Some(token)),
            None => State::Stop(StopReason::Exhausted),
        }
    }

    /// Upsert `posts`, retrying connection-class failures on a fresh
    /// connection with a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::TransientDb`] when a post keeps failing after
    /// the retry budget, or the first non-transient database error.
    pub async fn flush(&self, posts: &[NewPost]) -> Result<usize> {
        if posts.is_empty() {
            return Ok(0);
        }

        let policy = self.db.retry_policy();
        let prefix = self.mirror_prefix.as_deref();
        let mut conn = self.db.acquire().await?;
        let mut written = 0;

        for post in posts {
            let mut attempt = 1;
            loop {
                match write_post(&mut conn, post, prefix).await {
                    Ok(()) => {
                        written += 1;
                        break;
                    }
                    Err(e) if is_transient(&e) => {
                        if attempt >= policy.attempts {
                            return Err(HarvestError::TransientDb {
                                attempts: attempt,
                                source: e,
                            });
                        }
                        warn!(
                            post_id = %post.post_id,
                            attempt,
                            error = %e,
                            "Transient write failure, retrying"
                        );
                        conn.discard();
                        conn.release();
                        self.db.manager().report_connection_failure().await;
                        tokio::time::sleep(policy.delay).await;
                        conn = self.db.acquire().await?;
                        attempt += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(written)
    }
}

/// Upsert one post in its own transaction.
async fn write_post(
    conn: &mut SqliteConnection,
    post: &NewPost,
    mirror_prefix: Option<&str>,
) -> std::result::Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;
    upsert_post(&mut *tx, post, mirror_prefix).await?;
    tx.commit().await
}
