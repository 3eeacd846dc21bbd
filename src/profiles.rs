//! Refreshes stored account profile snapshots.

use tracing::{error, info};

use crate::db::{upsert_profile, Database};
use crate::error::Result;
use crate::hiker::HikerClient;

/// Fetch and store the profile of every account concurrently.
///
/// Returns the accounts whose refresh failed; failures never stop the others.
pub async fn refresh_profiles(
    client: &HikerClient,
    db: &Database,
    accounts: &[String],
) -> Vec<String> {
    let handles: Vec<_> = accounts
        .iter()
        .map(|account| {
            let client = client.clone();
            let db = db.clone();
            let account = account.clone();
            tokio::spawn(async move { refresh_profile(&client, &db, &account).await })
        })
        .collect();

    let mut failed = Vec::new();
    for (handle, account) in handles.into_iter().zip(accounts) {
        let result = match handle.await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("task failed: {e}")),
        };
        if let Err(e) = result {
            error!(account = %account, error = %e, "Profile refresh failed");
            failed.push(account.clone());
        }
    }

    info!(
        accounts = accounts.len(),
        failed = failed.len(),
        "Profile refresh complete"
    );
    failed
}

/// Fetch and store one account's profile.
///
/// # Errors
///
/// Returns an error if the lookup fails or the row cannot be written.
pub async fn refresh_profile(client: &HikerClient, db: &Database, account: &str) -> Result<()> {
    let profile = client.fetch_profile(account).await?;
    let mut conn = db.acquire().await?;
    upsert_profile(&mut *conn, &profile.to_new_profile()).await?;
    info!(
        account = %account,
        username = profile.username.as_deref().unwrap_or(""),
        followers = profile.follower_count,
        "Stored profile"
    );
    Ok(())
}
