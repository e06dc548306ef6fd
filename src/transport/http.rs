//! Historical page fetcher over HTTP.
//!
//! Accepts the response shapes the sensor backends in use return:
//! - `{"items": [...], "nextToken": "..."}` (list query)
//! - `{"data": {"listSensorsData": {"items": [...], "nextToken": "..."}}}` (GraphQL envelope)
//! - `{"results": [...], "next_cursor": "..."}` (REST pipeline)
//!
//! A missing or null token ends the backfill.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::coordinator::{Page, PageSource};
use crate::error::TransportError;

// ---

const ITEM_KEYS: [&str; 2] = ["items", "results"];
const TOKEN_KEYS: [&str; 3] = ["nextToken", "next_token", "next_cursor"];

#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    base_url: String,
    token_param: String,
}

impl HttpPageSource {
    // ---
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token_param: "cursor".to_string(),
        }
    }

    /// Query parameter carrying the continuation token (default `cursor`).
    pub fn with_token_param(mut self, name: impl Into<String>) -> Self {
        self.token_param = name.into();
        self
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, continuation_token: Option<String>) -> Result<Page, TransportError> {
        // ---
        let mut request = self.client.get(&self.base_url);
        if let Some(token) = continuation_token.as_deref() {
            request = request.query(&[(self.token_param.as_str(), token)]);
        }

        let response: Value = request.send().await?.error_for_status()?.json().await?;

        let page = parse_page(&response)?;
        debug!(
            "Fetched {} items from {} (next token: {:?})",
            page.items.len(),
            self.base_url,
            page.next_token
        );
        Ok(page)
    }
}

/// Extract items and continuation token from any supported response shape.
pub(crate) fn parse_page(response: &Value) -> Result<Page, TransportError> {
    // ---
    let body = response
        .pointer("/data/listSensorsData")
        .filter(|v| v.is_object())
        .unwrap_or(response);

    let items = ITEM_KEYS
        .iter()
        .find_map(|key| body.get(*key))
        .ok_or_else(|| TransportError::Decode("response has no items array".to_string()))?;

    let items = match items {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        _ => {
            return Err(TransportError::Decode(
                "response items field is not an array".to_string(),
            ))
        }
    };

    let next_token = TOKEN_KEYS
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(String::from);

    Ok(Page { items, next_token })
}
