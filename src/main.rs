use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clip_harvester::config::{split_ids, Config};
use clip_harvester::db::{clear_posts, Database, PoolSettings};
use clip_harvester::harvest::Harvester;
use clip_harvester::hiker::HikerClient;
use clip_harvester::mirror::MediaMirror;
use clip_harvester::profiles::refresh_profiles;
use clip_harvester::s3::S3Client;

#[derive(Debug, Parser)]
#[command(version, about = "Collect clip metadata and mirror media to S3")]
struct Cli {
    /// Comma-separated account ids; defaults to the configured list.
    #[arg(long = "user-ids", alias = "user_ids", global = true)]
    user_ids: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Paginate, store and mirror clips (default).
    Harvest,
    /// Refresh stored account profiles.
    Profiles,
    /// Delete every stored clip.
    ClearPosts,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let accounts = cli
        .user_ids
        .as_deref()
        .map_or_else(|| config.user_ids.clone(), split_ids);
    if accounts.is_empty() {
        anyhow::bail!("No account ids to process");
    }

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::with_settings(PoolSettings::from_config(&config))
        .await
        .context("Failed to initialize database")?;
    info!(path = %config.database_path.display(), "Database initialized");

    let client = HikerClient::new(&config)?;

    match cli.command.unwrap_or(Command::Harvest) {
        Command::Harvest => harvest(&config, client, db.clone(), &accounts).await?,
        Command::Profiles => {
            refresh_profiles(&client, &db, &accounts).await;
        }
        Command::ClearPosts => {
            let removed = clear_posts(&db.pool())
                .await
                .context("Failed to clear posts")?;
            info!(removed, "Cleared stored clips");
        }
    }

    db.close().await;
    Ok(())
}

async fn harvest(
    config: &Config,
    client: HikerClient,
    db: Database,
    accounts: &[String],
) -> Result<()> {
    for account in accounts {
        if !config.allowed_user_ids.contains(account) {
            warn!(
                account = %account,
                "Account is outside the allow-set; its posts will not be stored"
            );
        }
    }

    let mirror = if config.mirror_enabled() {
        let s3 = S3Client::new(config).context("Failed to initialize S3 client")?;
        info!(bucket = %s3.bucket_name(), "Media mirroring enabled");
        Some(MediaMirror::new(config, Arc::new(s3))?)
    } else {
        info!("Media mirroring disabled (S3_BUCKET not set)");
        None
    };

    info!(
        accounts = accounts.len(),
        lookback_days = config.lookback.as_secs() / 86_400,
        "Starting harvest"
    );

    let harvester = Arc::new(Harvester::new(config, client, db, mirror));
    let reports = harvester.run_accounts(accounts).await;

    for report in reports.iter().filter(|r| !r.is_success()) {
        warn!(
            account = %report.account,
            error = report.error.as_deref().unwrap_or(""),
            "Account finished with errors"
        );
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,clip_harvester=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
