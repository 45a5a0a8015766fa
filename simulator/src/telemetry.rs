use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feed group as stored by the mock telemetry service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub key: String,
}

/// Feed belonging to a group. `key` is `<group key>.<feed slug>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    pub id: u64,
    pub name: String,
    pub key: String,
    pub group_key: String,
}

/// One submitted value, with the optional location metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub id: String,
    pub feed_key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ele: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Candidate location returned by the mock geocoder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
    pub country_code: String,
}

/// Derive a resource key from a display name the way the feed service does:
/// lowercase, anything that is not alphanumeric becomes `-`.
pub fn slug(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
