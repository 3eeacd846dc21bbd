use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use super::models::{ClipsPage, UserProfile};
use crate::config::Config;
use crate::error::{HarvestError, Result};

pub const CLIPS_PATH: &str = "/v2/user/clips";
pub const PROFILE_PATH: &str = "/v1/user/by/id";

const ACCESS_KEY_HEADER: &str = "x-access-key";

/// Thin wrapper over the metadata API.
///
/// Every call is a single request; retrying a failed page is left to the
/// next run, which converges through the upsert.
#[derive(Debug, Clone)]
pub struct HikerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HikerClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("clip-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Fetch one page of an account's clips.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Fetch`] for any non-200 response and
    /// [`HarvestError::Http`] if no response could be read.
    pub async fn fetch_clips_page(
        &self,
        user_id: &str,
        page_id: Option<&str>,
    ) -> Result<ClipsPage> {
        let mut params = vec![("user_id", user_id)];
        if let Some(page_id) = page_id {
            params.push(("page_id", page_id));
        }

        let raw = self.get_json(CLIPS_PATH, &params).await?;
        Ok(ClipsPage::from_value(raw))
    }

    /// Look up an account's profile.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_clips_page`](Self::fetch_clips_page), plus
    /// [`HarvestError::Decode`] when the body is not a profile object.
    pub async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile> {
        let raw = self.get_json(PROFILE_PATH, &[("id", user_id)]).await?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, ?params, "Requesting API page");

        let response = self
            .http
            .get(&url)
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .header("accept", "application/json")
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
