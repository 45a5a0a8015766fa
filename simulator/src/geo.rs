//! Geocoding and elevation endpoints.

use crate::MockCloud;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct ForwardQuery {
    pub access_key: Option<String>,
    pub query: String,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ElevationQuery {
    pub locations: String,
}

pub async fn forward(State(cloud): State<MockCloud>, Query(params): Query<ForwardQuery>) -> Response {
    cloud.lock().counters.geocode_calls += 1;

    if params.access_key.as_deref().map_or(true, str::is_empty) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": "missing_access_key" } })),
        )
            .into_response();
    }

    let places = cloud.places_matching(&params.query, params.country.as_deref());
    debug!(
        "Geocoding {:?} (region {:?}) matched {} place(s)",
        params.query,
        params.region,
        places.len()
    );
    Json(json!({ "data": places })).into_response()
}

pub async fn elevation(
    State(cloud): State<MockCloud>,
    Path(datasets): Path<String>,
    Query(params): Query<ElevationQuery>,
) -> Response {
    cloud.lock().counters.elevation_calls += 1;

    let coords: Vec<f64> = params
        .locations
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    let [lat, lng] = coords.as_slice() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid locations", "status": "INVALID_REQUEST" })),
        )
            .into_response();
    };

    let dataset = datasets.split(',').next().unwrap_or_default().to_string();
    Json(json!({
        "results": [{
            "dataset": dataset,
            "elevation": cloud.elevation(),
            "location": { "lat": lat, "lng": lng },
        }],
        "status": "OK",
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get(cloud: &MockCloud, uri: &str) -> (StatusCode, Value) {
        let request = axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = crate::router(cloud.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_forward_known_and_unknown_place() {
        let cloud = MockCloud::new();

        let (status, body) = get(&cloud, "/positionstack/v1/forward?access_key=t&query=wellington").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["label"], "Wellington, New Zealand");

        let (_, body) = get(&cloud, "/positionstack/v1/forward?access_key=t&query=atlantis").await;
        assert_eq!(body["data"], json!([]));

        let (_, body) = get(&cloud, "/positionstack/v1/forward?access_key=t&query=denver&country=NZL").await;
        assert_eq!(body["data"], json!([]));
        assert_eq!(cloud.counters().geocode_calls, 3);
    }

    #[tokio::test]
    async fn test_forward_requires_access_key() {
        let cloud = MockCloud::new();
        let (status, _) = get(&cloud, "/positionstack/v1/forward?query=wellington").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_elevation_reports_configured_value() {
        let cloud = MockCloud::new();
        cloud.set_elevation(Some(42.5));

        let (status, body) = get(&cloud, "/opentopodata/v1/ned10m,mapzen?locations=12.0,34.0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["elevation"], 42.5);
        assert_eq!(body["results"][0]["dataset"], "ned10m");

        cloud.set_elevation(None);
        let (_, body) = get(&cloud, "/opentopodata/v1/mapzen?locations=12.0,34.0").await;
        assert_eq!(body["results"][0]["elevation"], Value::Null);

        let (status, _) = get(&cloud, "/opentopodata/v1/mapzen?locations=oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
