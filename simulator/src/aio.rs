//! Feed service endpoints (groups, feeds, data).

use crate::telemetry::{slug, DataPoint, Feed, Group};
use crate::MockCloud;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub const KEY_HEADER: &str = "x-aio-key";

#[derive(Debug, Deserialize)]
pub struct NewGroup {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewFeedBody {
    pub feed: NewFeed,
}

#[derive(Debug, Deserialize)]
pub struct NewFeed {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewData {
    pub value: Value,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub ele: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub async fn require_key(State(cloud): State<MockCloud>, request: Request, next: Next) -> Response {
    if let Some(expected) = cloud.aio_key() {
        let presented = request
            .headers()
            .get(KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!("Rejecting {} without a valid key", request.uri().path());
            return error(StatusCode::UNAUTHORIZED, "not authorized");
        }
    }
    next.run(request).await
}

pub async fn list_groups(State(cloud): State<MockCloud>, Path(_user): Path<String>) -> Json<Vec<Group>> {
    Json(cloud.groups())
}

pub async fn create_group(
    State(cloud): State<MockCloud>,
    Path(_user): Path<String>,
    Json(body): Json<NewGroup>,
) -> Response {
    let key = slug(&body.name);
    if key.is_empty() {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "name can't be blank");
    }

    let mut store = cloud.lock();
    if store.groups.iter().any(|g| g.key == key || g.name == body.name) {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "name has already been taken");
    }

    let group = Group {
        id: MockCloud::next_id(&mut store),
        name: body.name,
        key,
    };
    store.groups.push(group.clone());
    store.counters.group_creates += 1;
    info!("Created group {}", group.key);
    (StatusCode::CREATED, Json(group)).into_response()
}

pub async fn list_group_feeds(
    State(cloud): State<MockCloud>,
    Path((_user, group)): Path<(String, String)>,
) -> Response {
    let store = cloud.lock();
    if !store.groups.iter().any(|g| g.key == group) {
        return error(StatusCode::NOT_FOUND, format!("group {} not found", group));
    }
    let feeds: Vec<Feed> = store
        .feeds
        .iter()
        .filter(|f| f.group_key == group)
        .cloned()
        .collect();
    Json(feeds).into_response()
}

pub async fn create_feed(
    State(cloud): State<MockCloud>,
    Path((_user, group)): Path<(String, String)>,
    Json(body): Json<NewFeedBody>,
) -> Response {
    let name = body.feed.name;
    let feed_slug = slug(&name);
    if feed_slug.is_empty() {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "name can't be blank");
    }

    let mut store = cloud.lock();
    if !store.groups.iter().any(|g| g.key == group) {
        return error(StatusCode::NOT_FOUND, format!("group {} not found", group));
    }

    let key = format!("{}.{}", group, feed_slug);
    if store.feeds.iter().any(|f| f.key == key) {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "name has already been taken");
    }

    let feed = Feed {
        id: MockCloud::next_id(&mut store),
        name,
        key,
        group_key: group,
    };
    store.feeds.push(feed.clone());
    store.counters.feed_creates += 1;
    info!("Created feed {}", feed.key);
    (StatusCode::CREATED, Json(feed)).into_response()
}

pub async fn list_data(
    State(cloud): State<MockCloud>,
    Path((_user, feed)): Path<(String, String)>,
) -> Json<Vec<DataPoint>> {
    Json(cloud.data_for(&feed))
}

pub async fn create_data(
    State(cloud): State<MockCloud>,
    Path((_user, feed)): Path<(String, String)>,
    Json(body): Json<NewData>,
) -> Response {
    let value = match body.value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("unsupported value {}", other),
            )
        }
    };

    let mut store = cloud.lock();
    if !store.feeds.iter().any(|f| f.key == feed) {
        return error(StatusCode::NOT_FOUND, format!("feed {} not found", feed));
    }

    let point = DataPoint {
        id: uuid::Uuid::new_v4().to_string(),
        feed_key: feed,
        value,
        lat: body.lat,
        lon: body.lon,
        ele: body.ele,
        created_at: body.created_at.unwrap_or_else(Utc::now),
    };
    debug!("Stored {} = {}", point.feed_key, point.value);
    store.data.push(point.clone());
    store.counters.data_points += 1;
    (StatusCode::OK, Json(point)).into_response()
}
