//! 📡 The live feed: GitHub's public events endpoint, asked politely and often.
//!
//! Every request carries the last `ETag` we saw. If nothing changed GitHub answers
//! `304 Not Modified`, which costs us nothing against the rate limit and costs the
//! pipeline nothing at all. 🦆

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, ETAG, IF_NONE_MATCH, USER_AGENT};
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{trace, warn};

use crate::common::EventRecord;
use crate::decoder;

/// 🔧 Where the feed lives and how we identify ourselves to it.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// 🔑 Personal access token. Unauthenticated polling gets 60 requests an hour, which is
    /// roughly one poll every minute. Bring a token.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
    100
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            access_token: None,
            per_page: default_per_page(),
        }
    }
}

/// 📬 One answer from the feed.
#[derive(Debug)]
pub enum FeedPage {
    /// 💤 Same as last time. Keep the token, enqueue nothing.
    NotModified,
    /// 📦 Fresh events plus the validation token that describes them (if the server sent one).
    Page {
        records: Vec<EventRecord>,
        token: Option<String>,
    },
}

/// 📡 A conditional, incremental event feed.
#[async_trait]
pub trait LiveFeed: std::fmt::Debug + Send + Sync {
    async fn fetch(&self, token: Option<&str>) -> Result<FeedPage>;
}

/// 🐙 `GET {api_url}/events` with `If-None-Match`.
#[derive(Debug)]
pub struct GitHubEventsFeed {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

impl GitHubEventsFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The feed's HTTP client refused to be born")?;
        Ok(Self {
            client,
            url: format!(
                "{}/events?per_page={}&page=1",
                config.api_url.trim_end_matches('/'),
                config.per_page
            ),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl LiveFeed for GitHubEventsFeed {
    async fn fetch(&self, token: Option<&str>) -> Result<FeedPage> {
        let mut request = self.client.get(&self.url).header(USER_AGENT, "ghx");
        if let Some(access_token) = &self.access_token {
            request = request.header(AUTHORIZATION, format!("Bearer {access_token}"));
        }
        if let Some(etag) = token {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("💀 GET {} never came back", self.url))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            trace!("💤 feed not modified");
            return Ok(FeedPage::NotModified);
        }
        if !status.is_success() {
            anyhow::bail!("💀 GET {} answered {status}", self.url);
        }

        let token = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .with_context(|| format!("💀 GET {} died mid-body", self.url))?;

        let raw_events: Vec<Box<RawValue>> =
            serde_json::from_slice(&body).context("💀 the feed did not return a JSON array")?;
        let mut records = Vec::with_capacity(raw_events.len());
        for (position, raw) in raw_events.into_iter().enumerate() {
            match decoder::decode_raw(raw, position + 1) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "🧩 skipping a feed event that didn't decode"),
            }
        }
        Ok(FeedPage::Page { records, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_for(server: &MockServer, access_token: Option<&str>) -> GitHubEventsFeed {
        GitHubEventsFeed::new(&FeedConfig {
            api_url: server.uri(),
            access_token: access_token.map(str::to_string),
            per_page: 100,
        })
        .expect("💀 feed should build")
    }

    #[tokio::test]
    async fn the_one_where_a_fresh_page_brings_records_and_a_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("per_page", "100"))
            .and(header("user-agent", "ghx"))
            .and(header("authorization", "Bearer hunter2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .set_body_string(
                        r#"[{"id":"11","repo":{"id":1}},{"id":"oops"},{"id":"12","repo":{"id":2}}]"#,
                    ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = feed_for(&server, Some("hunter2"))
            .fetch(None)
            .await
            .expect("💀 200 should work");
        match page {
            FeedPage::Page { records, token } => {
                let ids: Vec<u64> = records.iter().map(|r| r.event_id).collect();
                assert_eq!(ids, vec![11, 12], "the broken one is skipped, not fatal");
                assert_eq!(token.as_deref(), Some("\"abc\""));
            }
            FeedPage::NotModified => panic!("💀 it was modified"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_etag_goes_back_and_304_means_nothing_new() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(header("if-none-match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let page = feed_for(&server, None)
            .fetch(Some("\"abc\""))
            .await
            .expect("💀 304 is not an error");
        assert!(matches!(page, FeedPage::NotModified));
    }

    #[tokio::test]
    async fn the_one_where_rate_limiting_is_an_error_not_a_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        assert!(feed_for(&server, None).fetch(None).await.is_err());
    }
}
