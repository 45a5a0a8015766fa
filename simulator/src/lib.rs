//! In-memory stand-in for the cloud services the publisher talks to.
//!
//! One router serves three APIs:
//! - a feed service shaped like Adafruit IO v2 under `/api/v2/{user}`
//! - a forward geocoder shaped like positionstack under `/positionstack/v1`
//! - an elevation lookup shaped like OpenTopoData under `/opentopodata/v1`
//!
//! Every request passes through a fault injector first, so tests and local
//! runs can exercise the publisher's retry and drop paths.

pub mod aio;
pub mod geo;
pub mod telemetry;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rand::Rng;
use serde_json::json;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use telemetry::{DataPoint, Feed, Group, Place};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// A canned failure handed to the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
}

/// Request counters, readable from tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub requests: usize,
    pub group_creates: usize,
    pub feed_creates: usize,
    pub data_points: usize,
    pub geocode_calls: usize,
    pub elevation_calls: usize,
}

#[derive(Debug)]
struct Store {
    aio_key: Option<String>,
    groups: Vec<Group>,
    feeds: Vec<Feed>,
    data: Vec<DataPoint>,
    places: Vec<(String, Place)>,
    elevation: Option<f64>,
    faults: VecDeque<Fault>,
    failure_rate: f64,
    next_id: u64,
    counters: Counters,
}

/// Shared handle to the mock cloud. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MockCloud {
    inner: Arc<Mutex<Store>>,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    pub fn new() -> Self {
        let cloud = Self {
            inner: Arc::new(Mutex::new(Store {
                aio_key: None,
                groups: Vec::new(),
                feeds: Vec::new(),
                data: Vec::new(),
                places: Vec::new(),
                elevation: Some(100.0),
                faults: VecDeque::new(),
                failure_rate: 0.0,
                next_id: 1,
                counters: Counters::default(),
            })),
        };
        cloud.add_place("Wellington", -41.28664, 174.77557, "Wellington, New Zealand", "NZL");
        cloud.add_place("Denver", 39.7392, -104.9903, "Denver, CO, USA", "USA");
        cloud
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        // Poisoned by a panicking handler; the data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Require `X-AIO-Key` to equal `key` on feed service requests.
    pub fn with_aio_key(self, key: impl Into<String>) -> Self {
        self.lock().aio_key = Some(key.into());
        self
    }

    pub fn aio_key(&self) -> Option<String> {
        self.lock().aio_key.clone()
    }

    /// Elevation reported for every coordinate; `None` reports `null`.
    pub fn set_elevation(&self, elevation: Option<f64>) {
        self.lock().elevation = elevation;
    }

    pub fn elevation(&self) -> Option<f64> {
        self.lock().elevation
    }

    pub fn add_place(&self, query: &str, latitude: f64, longitude: f64, label: &str, country: &str) {
        self.lock().places.push((
            query.to_lowercase(),
            Place {
                latitude,
                longitude,
                label: label.to_string(),
                country_code: country.to_string(),
            },
        ));
    }

    pub fn places_matching(&self, query: &str, country: Option<&str>) -> Vec<Place> {
        let query = query.trim().to_lowercase();
        self.lock()
            .places
            .iter()
            .filter(|(q, _)| *q == query)
            .filter(|(_, p)| country.map_or(true, |c| p.country_code.eq_ignore_ascii_case(c)))
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Answer the next `count` requests with `status`.
    pub fn fail_next(&self, status: u16, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.faults.push_back(Fault {
                status,
                retry_after_secs: None,
            });
        }
    }

    pub fn push_fault(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Fraction of requests (0.0..=1.0) randomly answered with 503.
    pub fn set_failure_rate(&self, rate: f64) {
        self.lock().failure_rate = rate.clamp(0.0, 1.0);
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    pub fn groups(&self) -> Vec<Group> {
        self.lock().groups.clone()
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.lock().feeds.clone()
    }

    pub fn data_for(&self, feed_key: &str) -> Vec<DataPoint> {
        self.lock()
            .data
            .iter()
            .filter(|d| d.feed_key == feed_key)
            .cloned()
            .collect()
    }

    fn take_fault(&self) -> Option<Fault> {
        let mut state = self.lock();
        state.counters.requests += 1;
        if let Some(fault) = state.faults.pop_front() {
            return Some(fault);
        }
        if state.failure_rate > 0.0 && rand::thread_rng().gen_bool(state.failure_rate) {
            return Some(Fault {
                status: 503,
                retry_after_secs: None,
            });
        }
        None
    }

    fn next_id(state: &mut Store) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }
}

async fn inject_faults(State(cloud): State<MockCloud>, request: Request, next: Next) -> Response {
    let Some(fault) = cloud.take_fault() else {
        return next.run(request).await;
    };

    debug!("Injecting {} for {} {}", fault.status, request.method(), request.uri().path());
    let status = StatusCode::from_u16(fault.status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    let mut response = (status, Json(json!({ "error": "injected fault" }))).into_response();
    if let Some(secs) = fault.retry_after_secs {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Build the full mock router around `cloud`.
pub fn router(cloud: MockCloud) -> Router {
    let feeds = Router::new()
        .route(
            "/api/v2/:user/groups",
            get(aio::list_groups).post(aio::create_group),
        )
        .route(
            "/api/v2/:user/groups/:group/feeds",
            get(aio::list_group_feeds).post(aio::create_feed),
        )
        .route(
            "/api/v2/:user/feeds/:feed/data",
            get(aio::list_data).post(aio::create_data),
        )
        .route_layer(middleware::from_fn_with_state(cloud.clone(), aio::require_key));

    Router::new()
        .merge(feeds)
        .route("/positionstack/v1/forward", get(geo::forward))
        .route("/opentopodata/v1/:datasets", get(geo::elevation))
        .layer(middleware::from_fn_with_state(cloud.clone(), inject_faults))
        .with_state(cloud)
}

/// Serve `cloud` on an ephemeral localhost port and return its address.
pub async fn spawn(cloud: MockCloud) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(cloud);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Mock cloud server error: {}", e);
        }
    });

    info!("Mock cloud listening on {}", addr);
    Ok(addr)
}
