use chrono::{DateTime, Utc};

/// Location tagging attached to every reading of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoMetadata {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub captured_at: DateTime<Utc>,
}

/// Remote identifiers of the feed a metric is published to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedIdentity {
    pub group_key: String,
    pub feed_key: String,
}

/// A single sensor sample on its way to the feed service.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn now(metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Round `value` to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
