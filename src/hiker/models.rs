use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::age::epoch_to_utc;
use crate::db::{NewPost, NewProfile};

/// One response from the clips endpoint.
///
/// The raw payload is kept alongside the parsed media because the stop
/// decision scans the whole page, not just the fields we store.
#[derive(Debug, Clone)]
pub struct ClipsPage {
    pub raw: Value,
    pub media: Vec<ClipMedia>,
    pub next_page_id: Option<String>,
}

impl ClipsPage {
    /// Parse a page, skipping items that lack a usable post id.
    ///
    /// Items live at `response.items[]`, each wrapping its post under `media`.
    #[must_use]
    pub fn from_value(raw: Value) -> Self {
        let items = raw
            .pointer("/response/items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let media = items
            .iter()
            .filter_map(|item| {
                let node = item.get("media").unwrap_or(item);
                match ClipMedia::deserialize(node) {
                    Ok(media) => Some(media),
                    Err(e) => {
                        warn!(error = %e, "Skipping unparseable clip item");
                        None
                    }
                }
            })
            .collect();

        let next_page_id = match raw.get("next_page_id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Self {
            raw,
            media,
            next_page_id,
        }
    }
}

/// The subset of a clip's media object that gets persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct ClipMedia {
    #[serde(deserialize_with = "id_string")]
    pub pk: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub taken_at: Option<Value>,
    #[serde(default)]
    pub user: Option<ClipUser>,
    #[serde(default)]
    pub caption: Option<ClipCaption>,
    #[serde(default)]
    pub play_count: Option<i64>,
    #[serde(default)]
    pub comment_count: Option<i64>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub save_count: Option<i64>,
    #[serde(default, alias = "reshare_count")]
    pub share_count: Option<i64>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub video_versions: Vec<MediaVersion>,
    #[serde(default)]
    pub image_versions2: Option<ImageVersions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipUser {
    #[serde(deserialize_with = "id_string")]
    pub pk: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipCaption {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaVersion {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageVersions {
    #[serde(default)]
    pub candidates: Vec<MediaVersion>,
}

impl ClipMedia {
    /// Id of the account that posted this clip, if present.
    #[must_use]
    pub fn owner_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.pk.as_str())
    }

    /// Best video URL: the explicit field, else the first rendition.
    #[must_use]
    pub fn best_video_url(&self) -> Option<String> {
        self.video_url
            .clone()
            .or_else(|| self.video_versions.first().map(|v| v.url.clone()))
    }

    /// Best cover image URL: the explicit thumbnail, else the first candidate.
    #[must_use]
    pub fn best_cover_url(&self) -> Option<String> {
        self.thumbnail_url.clone().or_else(|| {
            self.image_versions2
                .as_ref()
                .and_then(|v| v.candidates.first())
                .map(|v| v.url.clone())
        })
    }

    /// Public permalink built from the shortcode.
    #[must_use]
    pub fn canonical_url(&self) -> Option<String> {
        self.code
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|code| format!("https://www.instagram.com/reel/{code}/"))
    }

    /// Build the row to upsert, attributing it to `user_id`.
    #[must_use]
    pub fn to_new_post(&self, user_id: &str) -> NewPost {
        NewPost {
            post_id: self.pk.clone(),
            user_id: user_id.to_string(),
            username: self.user.as_ref().and_then(|u| u.username.clone()),
            caption: self.caption.as_ref().and_then(|c| c.text.clone()),
            play_count: self.play_count.unwrap_or(0),
            comment_count: self.comment_count.unwrap_or(0),
            like_count: self.like_count.unwrap_or(0),
            save_count: self.save_count.unwrap_or(0),
            share_count: self.share_count.unwrap_or(0),
            video_url: self.best_video_url(),
            cover_url: self.best_cover_url(),
            post_url: self.canonical_url(),
            taken_at: self
                .taken_at
                .as_ref()
                .and_then(epoch_to_utc)
                .map(|t| t.to_rfc3339()),
        }
    }
}

/// Account profile as returned by the user lookup endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "id_string")]
    pub pk: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub media_count: Option<i64>,
    #[serde(default)]
    pub follower_count: Option<i64>,
    #[serde(default)]
    pub following_count: Option<i64>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
}

impl UserProfile {
    #[must_use]
    pub fn to_new_profile(&self) -> NewProfile {
        NewProfile {
            user_id: self.pk.clone(),
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            media_count: self.media_count,
            follower_count: self.follower_count,
            following_count: self.following_count,
            biography: self.biography.clone(),
            external_url: self.external_url.clone().filter(|u| !u.is_empty()),
        }
    }
}

/// Ids arrive as either JSON strings or integers depending on the endpoint.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Unsigned(n) => n.to_string(),
        Id::Signed(n) => n.to_string(),
    })
}
