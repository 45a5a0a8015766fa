//! Settings file loading and validation.
//!
//! The file is TOML. Secrets may come from the environment instead
//! (`ADAFRUIT_IO_USERNAME`, `ADAFRUIT_IO_KEY`, `POSITIONSTACK_TOKEN`); a
//! non-empty environment value wins over the file. Everything is validated
//! here, before any component makes a network call.

use crate::errors::{Error, Result};
use crate::http::RetryPolicy;
use crate::sensors::SensorConfig;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_FEED_BASE_URL: &str = "https://io.adafruit.com/api/v2";
pub const DEFAULT_GEOCODING_BASE_URL: &str = "http://api.positionstack.com/v1";
pub const DEFAULT_ELEVATION_BASE_URL: &str = "https://api.opentopodata.org/v1";
pub const DEFAULT_DATASETS: [&str; 4] = ["nzdem8m", "ned10m", "eudem25m", "mapzen"];
pub const DEFAULT_FEED_GROUP: &str = "outdoor";

const ENV_USERNAME: &str = "ADAFRUIT_IO_USERNAME";
const ENV_KEY: &str = "ADAFRUIT_IO_KEY";
const ENV_TOKEN: &str = "POSITIONSTACK_TOKEN";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    adafruit: AdafruitSection,
    #[serde(default)]
    location: LocationSection,
    #[serde(default)]
    positionstack: PositionstackSection,
    #[serde(default)]
    opentopodata: OpenTopoDataSection,
    #[serde(default)]
    poll: PollSection,
    #[serde(default)]
    http: HttpSection,
    #[serde(default)]
    metrics: MetricsSection,
    #[serde(default)]
    sensors: Vec<SensorConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdafruitSection {
    username: Option<String>,
    key: Option<String>,
    group: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocationSection {
    send: Option<bool>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PositionstackSection {
    token: Option<String>,
    query: Option<String>,
    region: Option<String>,
    country: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpenTopoDataSection {
    base_url: Option<String>,
    datasets: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PollSection {
    interval_secs: Option<u64>,
    precision: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpSection {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricsSection {
    listen: Option<String>,
}

/// Feed service credentials. The key is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("key", &"***")
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct GeocodeQuery {
    pub token: String,
    pub query: String,
    pub region: Option<String>,
    pub country: Option<String>,
}

impl fmt::Debug for GeocodeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodeQuery")
            .field("token", &"***")
            .field("query", &self.query)
            .field("region", &self.region)
            .field("country", &self.country)
            .finish()
    }
}

/// Where the coordinates of the station come from.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationSource {
    Static { latitude: f64, longitude: f64 },
    Geocode(GeocodeQuery),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub feed_group: String,
    pub feed_base_url: String,
    pub send_location: bool,
    pub location: Option<LocationSource>,
    pub geocoding_base_url: String,
    pub elevation_base_url: String,
    pub elevation_datasets: Vec<String>,
    pub poll_interval: Duration,
    pub precision: u32,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub metrics_listen: Option<SocketAddr>,
    pub sensors: Vec<SensorConfig>,
}

/// Read and validate the settings file at `path`, consulting the process
/// environment for secrets.
pub fn load(path: &Path) -> Result<ResolvedConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Unable to read settings file {}: {}. Copy config.example.toml to create one.",
            path.display(),
            e
        ))
    })?;
    ResolvedConfig::from_toml(&text, |name| std::env::var(name).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_url(name: &str, value: String) -> Result<String> {
    Url::parse(&value)
        .map_err(|e| Error::Config(format!("{} {:?} is not a valid URL: {}", name, value, e)))?;
    Ok(value)
}

impl ResolvedConfig {
    /// Parse and validate `text`. `env` looks up secret overrides by name.
    pub fn from_toml<F>(text: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = toml::from_str(text).map_err(|e| {
            Error::Config(format!(
                "Invalid settings file: {}. Please use config.example.toml as a template.",
                e
            ))
        })?;

        let username = non_empty(env(ENV_USERNAME)).or_else(|| non_empty(file.adafruit.username));
        let key = non_empty(env(ENV_KEY)).or_else(|| non_empty(file.adafruit.key));
        let (Some(username), Some(key)) = (username, key) else {
            return Err(Error::Config(
                "You need to set your Adafruit IO key and username first. If you don't \
                 already have an account, you can register for free at https://io.adafruit.com/"
                    .to_string(),
            ));
        };

        let send_location = file.location.send.unwrap_or(true);
        let location = match (file.location.latitude, file.location.longitude) {
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) {
                    return Err(Error::Config(format!("latitude {} is out of range", latitude)));
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    return Err(Error::Config(format!("longitude {} is out of range", longitude)));
                }
                Some(LocationSource::Static { latitude, longitude })
            }
            (None, None) => {
                let token = non_empty(env(ENV_TOKEN)).or_else(|| non_empty(file.positionstack.token));
                let query = non_empty(file.positionstack.query);
                match (token, query) {
                    (Some(token), Some(query)) => Some(LocationSource::Geocode(GeocodeQuery {
                        token,
                        query,
                        region: non_empty(file.positionstack.region),
                        country: non_empty(file.positionstack.country),
                    })),
                    (None, _) if send_location => {
                        return Err(Error::Config(
                            "You need to set your positionstack token first, or give a static \
                             latitude and longitude. A free token is available at \
                             https://positionstack.com/signup/free"
                                .to_string(),
                        ))
                    }
                    (Some(_), None) if send_location => {
                        return Err(Error::Config(
                            "positionstack query is empty; set the place to look up".to_string(),
                        ))
                    }
                    _ => None,
                }
            }
            _ => {
                return Err(Error::Config(
                    "latitude and longitude must be given together".to_string(),
                ))
            }
        };

        let feed_group = non_empty(file.adafruit.group).unwrap_or_else(|| DEFAULT_FEED_GROUP.to_string());
        let feed_base_url = check_url(
            "adafruit.base_url",
            non_empty(file.adafruit.base_url).unwrap_or_else(|| DEFAULT_FEED_BASE_URL.to_string()),
        )?;
        let geocoding_base_url = check_url(
            "positionstack.base_url",
            non_empty(file.positionstack.base_url)
                .unwrap_or_else(|| DEFAULT_GEOCODING_BASE_URL.to_string()),
        )?;
        let elevation_base_url = check_url(
            "opentopodata.base_url",
            non_empty(file.opentopodata.base_url)
                .unwrap_or_else(|| DEFAULT_ELEVATION_BASE_URL.to_string()),
        )?;

        let elevation_datasets: Vec<String> = match file.opentopodata.datasets {
            Some(datasets) => datasets
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
            None => DEFAULT_DATASETS.iter().map(|d| d.to_string()).collect(),
        };
        if elevation_datasets.is_empty() {
            return Err(Error::Config("opentopodata.datasets must not be empty".to_string()));
        }

        let interval_secs = file.poll.interval_secs.unwrap_or(60);
        if interval_secs == 0 {
            return Err(Error::Config("poll.interval_secs must be at least 1".to_string()));
        }
        let precision = file.poll.precision.unwrap_or(1);
        if precision > 6 {
            return Err(Error::Config(format!("poll.precision {} is above 6", precision)));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: file.http.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: file
                .http
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: file
                .http
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        };
        if retry.max_attempts == 0 {
            return Err(Error::Config("http.max_attempts must be at least 1".to_string()));
        }
        if retry.max_backoff < retry.initial_backoff {
            return Err(Error::Config(
                "http.max_backoff_ms must not be below http.initial_backoff_ms".to_string(),
            ));
        }
        let timeout_secs = file.http.timeout_secs.unwrap_or(30);
        if timeout_secs == 0 {
            return Err(Error::Config("http.timeout_secs must be at least 1".to_string()));
        }

        let metrics_listen = non_empty(file.metrics.listen)
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|e| {
                    Error::Config(format!("metrics.listen {:?} is not a socket address: {}", addr, e))
                })
            })
            .transpose()?;

        if file.sensors.is_empty() {
            return Err(Error::Config(
                "No sensors configured; add at least one [[sensors]] entry".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for sensor in &file.sensors {
            sensor.validate()?;
            if !seen.insert(sensor.metric()) {
                return Err(Error::Config(format!(
                    "Sensor metric {:?} is configured more than once",
                    sensor.metric()
                )));
            }
        }

        Ok(Self {
            credentials: Credentials { username, key },
            feed_group,
            feed_base_url,
            send_location,
            location,
            geocoding_base_url,
            elevation_base_url,
            elevation_datasets,
            poll_interval: Duration::from_secs(interval_secs),
            precision,
            retry,
            http_timeout: Duration::from_secs(timeout_secs),
            metrics_listen,
            sensors: file.sensors,
        })
    }

    /// Log the parsed settings, without secrets.
    pub fn log_summary(&self) {
        info!("Parsed settings file");
        info!(
            "Feed service: {} as {}, group {:?}",
            self.feed_base_url, self.credentials.username, self.feed_group
        );
        match (&self.location, self.send_location) {
            (_, false) => info!("Location tagging disabled"),
            (Some(LocationSource::Static { latitude, longitude }), true) => {
                info!("Static location: {}, {}", latitude, longitude)
            }
            (Some(LocationSource::Geocode(query)), true) => info!(
                "Location to look up: {} (region {:?}, country {:?})",
                query.query, query.region, query.country
            ),
            (None, true) => info!("No location configured"),
        }
        info!(
            "Polling every {:?} at precision {}, sensors: {}",
            self.poll_interval,
            self.precision,
            self.sensors
                .iter()
                .map(|s| s.metric())
                .collect::<Vec<_>>()
                .join(", ")
        );
        info!(
            "HTTP retry budget: {} attempts, backoff {:?}..{:?}, timeout {:?}",
            self.retry.max_attempts,
            self.retry.initial_backoff,
            self.retry.max_backoff,
            self.http_timeout
        );
    }
}
