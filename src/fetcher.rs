//! Item retrieval from the forum's read API.
//!
//! [`ItemSource`] is the seam the harvester talks to; [`HttpItemFetcher`]
//! implements it against `GET {api_url}/item/{id}.json`. One call is one
//! request: retry and circuit breaking belong to the caller.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::ForumConfig;
use crate::error::FetchError;
use crate::models::{ItemId, RawItem};

/// Anything that can resolve an item ID to a [`RawItem`].
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch one item. Makes a single attempt.
    async fn fetch_item(&self, id: ItemId) -> Result<RawItem, FetchError>;
}

/// Fetches items from a Firebase-style item API over HTTP.
pub struct HttpItemFetcher {
    client: reqwest::Client,
    api_url: String,
}

impl HttpItemFetcher {
    pub fn new(config: &ForumConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn item_url(&self, id: ItemId) -> String {
        format!("{}/item/{}.json", self.api_url, id)
    }
}

#[async_trait]
impl ItemSource for HttpItemFetcher {
    async fn fetch_item(&self, id: ItemId) -> Result<RawItem, FetchError> {
        let url = self.item_url(id);
        debug!(%url, "fetching item");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Transport { id, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                id,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Transport { id, source })?;

        parse_item(id, &body)
    }
}

/// Decode an item API body. The API answers `null` for unknown IDs.
pub fn parse_item(id: ItemId, body: &str) -> Result<RawItem, FetchError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FetchError::Decode {
            id,
            message: e.to_string(),
        })?;

    if value.is_null() {
        return Err(FetchError::NotFound(id));
    }

    serde_json::from_value(value).map_err(|e| FetchError::Decode {
        id,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_body_is_not_found() {
        assert!(matches!(parse_item(5, "null"), Err(FetchError::NotFound(5))));
    }

    #[test]
    fn garbage_body_is_decode_error() {
        assert!(matches!(
            parse_item(5, "<html>"),
            Err(FetchError::Decode { id: 5, .. })
        ));
    }

    #[test]
    fn parses_story_with_kids() {
        let item = parse_item(
            100,
            r#"{"by":"whoishiring","id":100,"kids":[1,2,3],"type":"story","title":"Ask HN"}"#,
        )
        .unwrap();
        assert_eq!(item.kids, vec![1, 2, 3]);
        assert_eq!(item.by.as_deref(), Some("whoishiring"));
    }

    #[test]
    fn null_kids_decode_as_empty() {
        let item = parse_item(1, r#"{"id":1,"kids":null,"text":"hi"}"#).unwrap();
        assert!(item.kids.is_empty());
        assert_eq!(item.body(), Some("hi"));
    }

    #[test]
    fn item_url_has_no_double_slash() {
        let fetcher = HttpItemFetcher::new(&ForumConfig {
            api_url: "http://localhost:9/v0/".to_string(),
            ..ForumConfig::default()
        })
        .unwrap();
        assert_eq!(fetcher.item_url(42), "http://localhost:9/v0/item/42.json");
    }
}
