use crate::aio::{DataPayload, Group};
use crate::errors::Result;
use crate::feeds::FeedStore;
use crate::metrics::{READINGS_DROPPED_TOTAL, READINGS_PUBLISHED_TOTAL};
use crate::model::{GeoMetadata, Reading};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Dropped,
}

/// Sends readings to their feeds, tagged with the run's location if any.
#[derive(Debug)]
pub struct TelemetryPublisher {
    feeds: FeedStore,
    group: Group,
    metadata: Option<GeoMetadata>,
}

impl TelemetryPublisher {
    /// Resolve (or create) the feed group and get ready to publish into it.
    pub async fn connect(
        mut feeds: FeedStore,
        group_name: &str,
        metadata: Option<GeoMetadata>,
    ) -> Result<Self> {
        let group = feeds.get_or_create_group(group_name).await?;
        Ok(Self {
            feeds,
            group,
            metadata,
        })
    }

    /// Make sure the feed for `metric` exists before the first reading.
    pub async fn prepare(&mut self, metric: &str) -> Result<()> {
        let feed = self.feeds.get_or_create_feed(&self.group, metric).await?;
        debug!("{} publishes to {} in group {}", metric, feed.feed_key, feed.group_key);
        Ok(())
    }

    fn payload(&self, reading: &Reading) -> DataPayload {
        match &self.metadata {
            Some(meta) => DataPayload {
                value: reading.value,
                lat: Some(meta.latitude),
                lon: Some(meta.longitude),
                ele: Some(meta.elevation),
                created_at: Some(reading.timestamp),
            },
            None => DataPayload {
                value: reading.value,
                lat: None,
                lon: None,
                ele: None,
                created_at: None,
            },
        }
    }

    /// Publish one value. Delivery failures are logged and swallowed.
    pub async fn publish(&mut self, metric: &str, value: f64) -> PublishOutcome {
        let reading = Reading::now(metric, value);

        let feed = match self.feeds.get_or_create_feed(&self.group, metric).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(
                    "Unable to resolve feed for {}, dropping value ({}): {}",
                    reading.metric_name, reading.value, e
                );
                READINGS_DROPPED_TOTAL.inc();
                return PublishOutcome::Dropped;
            }
        };

        let payload = self.payload(&reading);
        match self.feeds.client().send_data(&feed.feed_key, &payload).await {
            Ok(created) => {
                debug!("Stored {} = {} as {}", feed.feed_key, reading.value, created.id);
                READINGS_PUBLISHED_TOTAL.inc();
                PublishOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    "Unable to transmit {} value ({}) to feed {}: {} - skipped",
                    reading.metric_name, reading.value, feed.feed_key, e
                );
                READINGS_DROPPED_TOTAL.inc();
                PublishOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aio::AioClient;
    use crate::test_support::{spawn_cloud, test_config, CapturedLogs};
    use chrono::Utc;
    use simulator::MockCloud;

    async fn publisher(cloud: &MockCloud, metadata: Option<GeoMetadata>) -> TelemetryPublisher {
        let base = spawn_cloud(cloud).await;
        let feeds = FeedStore::new(AioClient::from_config(&test_config(&base)).unwrap());
        TelemetryPublisher::connect(feeds, "outdoor", metadata).await.unwrap()
    }

    #[tokio::test]
    async fn test_publish_attaches_metadata() {
        let cloud = MockCloud::new();
        let metadata = GeoMetadata {
            latitude: 12.0,
            longitude: 34.0,
            elevation: 100.0,
            captured_at: Utc::now(),
        };
        let mut publisher = publisher(&cloud, Some(metadata)).await;

        let before = Utc::now();
        assert_eq!(publisher.publish("temperature", 21.4).await, PublishOutcome::Delivered);

        let stored = cloud.data_for("outdoor.temperature");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, "21.4");
        assert_eq!(stored[0].lat, Some(12.0));
        assert_eq!(stored[0].lon, Some(34.0));
        assert_eq!(stored[0].ele, Some(100.0));
        assert!(stored[0].created_at >= before);
    }

    #[tokio::test]
    async fn test_publish_without_metadata_sends_bare_value() {
        let cloud = MockCloud::new();
        let mut publisher = publisher(&cloud, None).await;

        assert_eq!(publisher.publish("humidity", 55.0).await, PublishOutcome::Delivered);

        let stored = cloud.data_for("outdoor.humidity");
        assert_eq!(stored.len(), 1);
        assert_eq!((stored[0].lat, stored[0].lon, stored[0].ele), (None, None, None));
    }

    #[tokio::test]
    async fn test_failed_submission_logs_one_warning() {
        let cloud = MockCloud::new();
        let mut publisher = publisher(&cloud, None).await;
        publisher.prepare("temperature").await.unwrap();

        let logs = CapturedLogs::default();
        let _guard = logs.install();

        cloud.fail_next(400, 1);
        assert_eq!(publisher.publish("temperature", 18.7).await, PublishOutcome::Dropped);

        let warnings = logs.warnings("publisher::telemetry");
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].contains("temperature"));
        assert!(warnings[0].contains("18.7"));
        assert!(cloud.data_for("outdoor.temperature").is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_the_reading() {
        let cloud = MockCloud::new();
        let mut publisher = publisher(&cloud, None).await;
        publisher.prepare("pressure").await.unwrap();

        let logs = CapturedLogs::default();
        let _guard = logs.install();

        cloud.fail_next(503, 2);
        assert_eq!(publisher.publish("pressure", 1013.2).await, PublishOutcome::Dropped);
        assert_eq!(logs.warnings("publisher::telemetry").len(), 1);

        assert_eq!(publisher.publish("pressure", 1013.3).await, PublishOutcome::Delivered);
        assert_eq!(cloud.data_for("outdoor.pressure").len(), 1);
    }
}
