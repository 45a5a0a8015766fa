//! Helpers shared by the unit tests: a local mock cloud and a log recorder.

use crate::config::{Credentials, ResolvedConfig};
use crate::http::RetryPolicy;
use crate::sensors::SensorConfig;
use simulator::MockCloud;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Serve `cloud` on localhost and return its base URL.
pub async fn spawn_cloud(cloud: &MockCloud) -> String {
    let addr = simulator::spawn(cloud.clone()).await.unwrap();
    format!("http://{}", addr)
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

/// Settings pointing every service at the mock cloud served from `base`.
/// Location tagging is off; tests switch it on as needed.
pub fn test_config(base: &str) -> ResolvedConfig {
    ResolvedConfig {
        credentials: Credentials {
            username: "tester".to_string(),
            key: "aio-key".to_string(),
        },
        feed_group: "outdoor".to_string(),
        feed_base_url: format!("{}/api/v2", base),
        send_location: false,
        location: None,
        geocoding_base_url: format!("{}/positionstack/v1", base),
        elevation_base_url: format!("{}/opentopodata/v1", base),
        elevation_datasets: vec!["ned10m".to_string(), "mapzen".to_string()],
        poll_interval: Duration::from_millis(50),
        precision: 1,
        retry: fast_policy(2),
        http_timeout: Duration::from_secs(5),
        metrics_listen: None,
        sensors: vec![SensorConfig::Simulated {
            metric: "temperature".to_string(),
            min: None,
            max: None,
            failure_rate: 0.0,
        }],
    }
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Records every event emitted on the current thread while installed.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl CapturedLogs {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// Warnings emitted from modules under `target`, e.g. `publisher::telemetry`.
    pub fn warnings(&self, target: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == Level::WARN && e.target.starts_with(target))
            .map(|e| e.message.clone())
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.0.insert_str(0, &format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.0,
        });
    }
}
