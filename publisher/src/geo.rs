//! Forward geocoding (positionstack) and elevation (OpenTopoData) lookups.

use crate::config::{GeocodeQuery, ResolvedConfig};
use crate::errors::{Error, Result};
use crate::http::{endpoint, HttpClient};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ForwardResponse {
    data: Vec<Place>,
}

/// First candidate of a forward geocoding query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Place {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    results: Vec<ElevationResult>,
}

#[derive(Debug, Deserialize)]
struct ElevationResult {
    elevation: Option<f64>,
    #[serde(default)]
    dataset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeoServices {
    http: HttpClient,
    geocoding_base_url: String,
    elevation_base_url: String,
    datasets: Vec<String>,
}

impl GeoServices {
    pub fn new(
        http: HttpClient,
        geocoding_base_url: impl Into<String>,
        elevation_base_url: impl Into<String>,
        datasets: Vec<String>,
    ) -> Self {
        Self {
            http,
            geocoding_base_url: geocoding_base_url.into(),
            elevation_base_url: elevation_base_url.into(),
            datasets,
        }
    }

    /// Build the lookups with their own connection pool.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let http = HttpClient::new(config.retry, config.http_timeout, HeaderMap::new())?;
        Ok(Self::new(
            http,
            config.geocoding_base_url.clone(),
            config.elevation_base_url.clone(),
            config.elevation_datasets.clone(),
        ))
    }

    /// Look up the coordinates of a free-text place description.
    pub async fn forward_geocode(&self, query: &GeocodeQuery) -> Result<Place> {
        let mut params = vec![
            ("access_key", query.token.as_str()),
            ("query", query.query.as_str()),
        ];
        if let Some(country) = &query.country {
            params.push(("country", country.as_str()));
        }
        if let Some(region) = &query.region {
            params.push(("region", region.as_str()));
        }
        let url = endpoint(&self.geocoding_base_url, "forward", &params)?;

        let response: ForwardResponse = self.http.get(url).await?;
        let place = response.data.into_iter().next().ok_or_else(|| {
            Error::Parse(format!("Geocoding found no results for {:?}", query.query))
        })?;

        info!("Geocoding lookup successful: {}", place.label);
        info!("Latitude: {} Longitude: {}", place.latitude, place.longitude);
        Ok(place)
    }

    /// Elevation in metres of the given coordinates.
    pub async fn get_elevation(&self, latitude: f64, longitude: f64) -> Result<f64> {
        let locations = format!("{},{}", latitude, longitude);
        let url = endpoint(
            &self.elevation_base_url,
            &self.datasets.join(","),
            &[("locations", locations.as_str())],
        )?;

        let response: ElevationResponse = self.http.get(url).await?;
        let result = response.results.into_iter().next().ok_or_else(|| {
            Error::Parse(format!("Elevation lookup returned no results for {}", locations))
        })?;
        let elevation = result.elevation.ok_or_else(|| {
            Error::Parse(format!(
                "No dataset covers {} (tried {})",
                locations,
                self.datasets.join(", ")
            ))
        })?;

        info!(
            "Elevation lookup successful: {} ({})",
            elevation,
            result.dataset.as_deref().unwrap_or("unknown dataset")
        );
        Ok(elevation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_policy, spawn_cloud};
    use simulator::MockCloud;
    use std::time::Duration;

    async fn services(cloud: &MockCloud) -> GeoServices {
        let base = spawn_cloud(cloud).await;
        let http = HttpClient::new(fast_policy(3), Duration::from_secs(5), HeaderMap::new()).unwrap();
        GeoServices::new(
            http,
            format!("{}/positionstack/v1", base),
            format!("{}/opentopodata/v1", base),
            vec!["ned10m".to_string(), "mapzen".to_string()],
        )
    }

    fn query(text: &str, country: Option<&str>) -> GeocodeQuery {
        GeocodeQuery {
            token: "token".to_string(),
            query: text.to_string(),
            region: None,
            country: country.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_forward_geocode_takes_first_result() {
        let cloud = MockCloud::new();
        let geo = services(&cloud).await;

        let place = geo.forward_geocode(&query("Denver", Some("USA"))).await.unwrap();
        assert_eq!(place.label, "Denver, CO, USA");
        assert_eq!(place.latitude, 39.7392);
        assert_eq!(cloud.counters().geocode_calls, 1);
    }

    #[tokio::test]
    async fn test_forward_geocode_without_results_is_parse_error() {
        let cloud = MockCloud::new();
        let geo = services(&cloud).await;

        let result = geo.forward_geocode(&query("Atlantis", None)).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_forward_geocode_rejected_token_is_http_error() {
        let cloud = MockCloud::new();
        let geo = services(&cloud).await;
        let mut q = query("Denver", None);
        q.token = String::new();

        let result = geo.forward_geocode(&q).await;
        assert!(matches!(result, Err(Error::Http { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_get_elevation() {
        let cloud = MockCloud::new();
        cloud.set_elevation(Some(1609.3));
        let geo = services(&cloud).await;

        assert_eq!(geo.get_elevation(39.7392, -104.9903).await.unwrap(), 1609.3);
        assert_eq!(cloud.counters().elevation_calls, 1);
    }

    #[tokio::test]
    async fn test_get_elevation_without_coverage_is_parse_error() {
        let cloud = MockCloud::new();
        cloud.set_elevation(None);
        let geo = services(&cloud).await;

        let result = geo.get_elevation(0.0, 0.0).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_get_elevation_propagates_exhausted_retries() {
        let cloud = MockCloud::new();
        cloud.fail_next(502, 3);
        let geo = services(&cloud).await;

        let result = geo.get_elevation(1.0, 2.0).await;
        assert!(matches!(result, Err(Error::Http { status: 502, .. })));
        assert_eq!(cloud.counters().elevation_calls, 0);
        assert_eq!(cloud.counters().requests, 3);
    }
}
