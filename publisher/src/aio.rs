//! Client for the feed service's REST API (Adafruit IO v2 shape).

use crate::config::{Credentials, ResolvedConfig};
use crate::errors::{Error, Result};
use crate::http::{endpoint, HttpClient};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const KEY_HEADER: &str = "x-aio-key";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Group {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Feed {
    pub name: String,
    pub key: String,
}

/// Acknowledgement of a stored value.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedData {
    pub id: String,
}

/// Body of a value submission. Location fields travel together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPayload {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ele: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AioClient {
    http: HttpClient,
    base: String,
}

impl AioClient {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, key_header(&config.credentials)?);
        let http = HttpClient::new(config.retry, config.http_timeout, headers)?;
        Ok(Self::new(http, &config.feed_base_url, &config.credentials.username))
    }

    /// `http` must already carry the key header.
    pub fn new(http: HttpClient, base_url: &str, username: &str) -> Self {
        Self {
            http,
            base: format!("{}/{}", base_url.trim_end_matches('/'), username),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        endpoint(&self.base, path, &[] as &[(&str, &str)])
    }

    pub async fn groups(&self) -> Result<Vec<Group>> {
        self.http.get(self.url("groups")?).await
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        self.http
            .post(self.url("groups")?, &json!({ "name": name }))
            .await
    }

    pub async fn group_feeds(&self, group_key: &str) -> Result<Vec<Feed>> {
        self.http
            .get(self.url(&format!("groups/{}/feeds", group_key))?)
            .await
    }

    pub async fn create_feed(&self, group_key: &str, name: &str) -> Result<Feed> {
        self.http
            .post(
                self.url(&format!("groups/{}/feeds", group_key))?,
                &json!({ "feed": { "name": name } }),
            )
            .await
    }

    pub async fn send_data(&self, feed_key: &str, payload: &DataPayload) -> Result<CreatedData> {
        self.http
            .post(self.url(&format!("feeds/{}/data", feed_key))?, payload)
            .await
    }
}

fn key_header(credentials: &Credentials) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&credentials.key).map_err(|_| {
        Error::Config("Adafruit IO key contains characters not allowed in a header".to_string())
    })?;
    value.set_sensitive(true);
    Ok(value)
}
