use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM _schema_version")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating clips table");

    // One table for every account; rows are partitioned by user_id.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS clips (
            post_id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            username TEXT,
            caption TEXT,
            play_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            save_count INTEGER NOT NULL DEFAULT 0,
            share_count INTEGER NOT NULL DEFAULT 0,
            video_url TEXT,
            cover_url TEXT,
            post_url TEXT,
            taken_at TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create clips table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_clips_user_id ON clips(user_id)")
        .execute(pool)
        .await
        .context("Failed to create clips user index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_clips_taken_at ON clips(taken_at)")
        .execute(pool)
        .await
        .context("Failed to create clips taken_at index")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: creating account_profiles table");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS account_profiles (
            user_id TEXT PRIMARY KEY NOT NULL,
            username TEXT,
            full_name TEXT,
            media_count INTEGER,
            follower_count INTEGER,
            following_count INTEGER,
            biography TEXT,
            external_url TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create account_profiles table")?;

    Ok(())
}
