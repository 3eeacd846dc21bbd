use sqlx::sqlite::SqliteExecutor;

use super::models::{AccountProfile, MirrorCandidate, NewPost, NewProfile, Post};

type DbResult<T> = Result<T, sqlx::Error>;

// ========== Clips ==========

/// Insert a clip or merge fresh values into the existing row.
///
/// Counters, caption, username and permalink always take the new values.
/// A stored `video_url`/`cover_url` that already starts with `mirror_prefix`
/// is kept as is; any other stored URL is replaced. `created_at` is only set
/// on insert.
pub async fn upsert_post<'e, E>(
    executor: E,
    post: &NewPost,
    mirror_prefix: Option<&str>,
) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r"
        INSERT INTO clips (
            post_id, user_id, username, caption,
            play_count, comment_count, like_count, save_count, share_count,
            video_url, cover_url, post_url, taken_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(post_id) DO UPDATE SET
            user_id = excluded.user_id,
            username = excluded.username,
            caption = excluded.caption,
            play_count = excluded.play_count,
            comment_count = excluded.comment_count,
            like_count = excluded.like_count,
            save_count = excluded.save_count,
            share_count = excluded.share_count,
            video_url = CASE
                WHEN ?14 IS NOT NULL AND substr(clips.video_url, 1, length(?14)) = ?14
                THEN clips.video_url
                ELSE excluded.video_url
            END,
            cover_url = CASE
                WHEN ?14 IS NOT NULL AND substr(clips.cover_url, 1, length(?14)) = ?14
                THEN clips.cover_url
                ELSE excluded.cover_url
            END,
            post_url = excluded.post_url,
            taken_at = COALESCE(excluded.taken_at, clips.taken_at),
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
        ",
    )
    .bind(&post.post_id)
    .bind(&post.user_id)
    .bind(&post.username)
    .bind(&post.caption)
    .bind(post.play_count)
    .bind(post.comment_count)
    .bind(post.like_count)
    .bind(post.save_count)
    .bind(post.share_count)
    .bind(&post.video_url)
    .bind(&post.cover_url)
    .bind(&post.post_url)
    .bind(&post.taken_at)
    .bind(mirror_prefix)
    .execute(executor)
    .await?;

    Ok(())
}

/// Get a clip by its post id.
pub async fn get_post<'e, E>(executor: E, post_id: &str) -> DbResult<Option<Post>>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as("SELECT * FROM clips WHERE post_id = ?")
        .bind(post_id)
        .fetch_optional(executor)
        .await
}

/// Number of stored clips for an account.
pub async fn count_posts_for_account<'e, E>(executor: E, user_id: &str) -> DbResult<i64>
where
    E: SqliteExecutor<'e>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clips WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Clips of an account with a video or cover URL not yet under `mirror_prefix`.
pub async fn get_unmirrored_posts<'e, E>(
    executor: E,
    user_id: &str,
    mirror_prefix: &str,
) -> DbResult<Vec<MirrorCandidate>>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as(
        r"
        SELECT post_id, user_id, video_url, cover_url
        FROM clips
        WHERE user_id = ?1
          AND (
            (video_url IS NOT NULL AND substr(video_url, 1, length(?2)) != ?2)
            OR (cover_url IS NOT NULL AND substr(cover_url, 1, length(?2)) != ?2)
          )
        ORDER BY post_id
        ",
    )
    .bind(user_id)
    .bind(mirror_prefix)
    .fetch_all(executor)
    .await
}

/// Point a clip's media columns at their mirrored copies.
///
/// `None` leaves that column untouched. Returns the number of rows updated.
pub async fn set_mirrored_urls<'e, E>(
    executor: E,
    post_id: &str,
    video_url: Option<&str>,
    cover_url: Option<&str>,
) -> DbResult<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r"
        UPDATE clips
        SET video_url = COALESCE(?1, video_url),
            cover_url = COALESCE(?2, cover_url),
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
        WHERE post_id = ?3
        ",
    )
    .bind(video_url)
    .bind(cover_url)
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Delete every stored clip, returning how many were removed.
pub async fn clear_posts<'e, E>(executor: E) -> DbResult<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM clips").execute(executor).await?;
    Ok(result.rows_affected())
}

// ========== Profiles ==========

/// Insert or refresh an account profile snapshot.
pub async fn upsert_profile<'e, E>(executor: E, profile: &NewProfile) -> DbResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r"
        INSERT INTO account_profiles (
            user_id, username, full_name, media_count,
            follower_count, following_count, biography, external_url
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            username = excluded.username,
            full_name = excluded.full_name,
            media_count = excluded.media_count,
            follower_count = excluded.follower_count,
            following_count = excluded.following_count,
            biography = excluded.biography,
            external_url = excluded.external_url,
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
        ",
    )
    .bind(&profile.user_id)
    .bind(&profile.username)
    .bind(&profile.full_name)
    .bind(profile.media_count)
    .bind(profile.follower_count)
    .bind(profile.following_count)
    .bind(&profile.biography)
    .bind(&profile.external_url)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn get_profile<'e, E>(executor: E, user_id: &str) -> DbResult<Option<AccountProfile>>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as("SELECT * FROM account_profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await
}
