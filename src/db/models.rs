use serde::{Deserialize, Serialize};

/// A stored clip row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub post_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub caption: Option<String>,
    pub play_count: i64,
    pub comment_count: i64,
    pub like_count: i64,
    pub save_count: i64,
    pub share_count: i64,
    pub video_url: Option<String>,
    pub cover_url: Option<String>,
    pub post_url: Option<String>,
    /// Capture time, RFC 3339 UTC.
    pub taken_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Freshly fetched values for a clip, as handed to the upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub post_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub caption: Option<String>,
    pub play_count: i64,
    pub comment_count: i64,
    pub like_count: i64,
    pub save_count: i64,
    pub share_count: i64,
    pub video_url: Option<String>,
    pub cover_url: Option<String>,
    pub post_url: Option<String>,
    pub taken_at: Option<String>,
}

/// A row with at least one media URL still pointing at its origin.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MirrorCandidate {
    pub post_id: String,
    pub user_id: String,
    pub video_url: Option<String>,
    pub cover_url: Option<String>,
}

/// A stored account profile snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountProfile {
    pub user_id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub media_count: Option<i64>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub biography: Option<String>,
    pub external_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub user_id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub media_count: Option<i64>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub biography: Option<String>,
    pub external_url: Option<String>,
}
