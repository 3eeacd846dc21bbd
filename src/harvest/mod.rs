//! Per-account harvesting: paginate, persist, then mirror media.

mod audit;
mod processor;

pub use audit::AuditSink;
pub use processor::StopReason;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::age::AgePolicy;
use crate::config::Config;
use crate::db::Database;
use crate::hiker::HikerClient;
use crate::mirror::{mirror_prefix, MediaMirror, MirrorReport};

/// Outcome of processing one account.
#[derive(Debug, Clone, Default)]
pub struct AccountReport {
    pub account: String,
    pub pages: u32,
    pub stop: Option<StopReason>,
    /// Posts from allowed accounts collected during pagination.
    pub kept: usize,
    /// Posts dropped because their owner is outside the allow-set.
    pub dropped: usize,
    pub written: usize,
    pub mirror: Option<MirrorReport>,
    pub error: Option<String>,
}

impl AccountReport {
    fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Shared state for every account task in a run.
#[derive(Debug)]
pub struct Harvester {
    client: HikerClient,
    db: Database,
    mirror: Option<MediaMirror>,
    audit: Option<AuditSink>,
    policy: AgePolicy,
    allowed: HashSet<String>,
    max_pages: u32,
    mirror_prefix: Option<String>,
    db_permits: Semaphore,
}

impl Harvester {
    /// Assemble a harvester. The database semaphore gets at most as many
    /// permits as the pool has connections.
    #[must_use]
    pub fn new(
        config: &Config,
        client: HikerClient,
        db: Database,
        mirror: Option<MediaMirror>,
    ) -> Self {
        let permits = config
            .account_concurrency
            .min(db.max_connections() as usize)
            .max(1);

        Self {
            client,
            db,
            mirror,
            audit: config.audit_dir.as_deref().map(AuditSink::new),
            policy: AgePolicy::new(config.lookback),
            allowed: config.allowed_user_ids.iter().cloned().collect(),
            max_pages: config.max_pages,
            mirror_prefix: config.cdn_domain.as_deref().map(mirror_prefix),
            db_permits: Semaphore::new(permits),
        }
    }

    #[must_use]
    pub fn is_allowed(&self, account: &str) -> bool {
        self.allowed.contains(account)
    }

    /// Process every account concurrently, one task each.
    ///
    /// Always returns one report per account, in input order; a failing or
    /// panicking account never affects the others.
    pub async fn run_accounts(self: &Arc<Self>, accounts: &[String]) -> Vec<AccountReport> {
        let handles: Vec<_> = accounts
            .iter()
            .map(|account| {
                let harvester = Arc::clone(self);
                let account = account.clone();
                tokio::spawn(async move { harvester.process_account(&account).await })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (handle, account) in handles.into_iter().zip(accounts) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(account = %account, "Account task panicked: {e}");
                    let mut report = AccountReport::new(account);
                    report.error = Some(format!("task failed: {e}"));
                    reports.push(report);
                }
            }
        }

        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!(
            accounts = reports.len(),
            failed,
            written = reports.iter().map(|r| r.written).sum::<usize>(),
            "Harvest run complete"
        );
        reports
    }
}
