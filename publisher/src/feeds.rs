//! Metric name to remote feed mapping.
//!
//! Lookups list what already exists remotely and only create what is
//! missing, so restarts reuse the same group and feeds. Results are cached
//! for the life of the process.

use crate::aio::{AioClient, Feed, Group};
use crate::errors::Result;
use crate::model::FeedIdentity;
use std::collections::HashMap;
use tracing::{debug, info};

/// Key the feed service derives from a display name.
pub fn key_for(name: &str) -> String {
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

fn find_group<'a>(groups: &'a [Group], name: &str) -> Option<&'a Group> {
    groups.iter().find(|g| g.name == name)
}

fn find_feed<'a>(feeds: &'a [Feed], group_key: &str, metric: &str) -> Option<&'a Feed> {
    let key = format!("{}.{}", group_key, key_for(metric));
    feeds.iter().find(|f| f.key == key || f.name == metric)
}

#[derive(Debug)]
pub struct FeedStore {
    client: AioClient,
    groups: HashMap<String, Group>,
    feeds: HashMap<(String, String), FeedIdentity>,
}

impl FeedStore {
    pub fn new(client: AioClient) -> Self {
        Self {
            client,
            groups: HashMap::new(),
            feeds: HashMap::new(),
        }
    }

    pub fn client(&self) -> &AioClient {
        &self.client
    }

    pub async fn get_or_create_group(&mut self, name: &str) -> Result<Group> {
        if let Some(group) = self.groups.get(name) {
            return Ok(group.clone());
        }

        let existing = self.client.groups().await?;
        let group = match find_group(&existing, name) {
            Some(group) => {
                debug!("Found feed group {}", group.key);
                group.clone()
            }
            None => {
                let group = self.client.create_group(name).await?;
                info!("Created feed group {}", group.key);
                group
            }
        };

        self.groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub async fn get_or_create_feed(&mut self, group: &Group, metric: &str) -> Result<FeedIdentity> {
        let cache_key = (group.key.clone(), metric.to_string());
        if let Some(identity) = self.feeds.get(&cache_key) {
            return Ok(identity.clone());
        }

        let existing = self.client.group_feeds(&group.key).await?;
        let feed = match find_feed(&existing, &group.key, metric) {
            Some(feed) => {
                debug!("Found feed {}", feed.key);
                feed.clone()
            }
            None => {
                let feed = self.client.create_feed(&group.key, metric).await?;
                info!("Created feed {}", feed.key);
                feed
            }
        };

        let identity = FeedIdentity {
            group_key: group.key.clone(),
            feed_key: feed.key,
        };
        self.feeds.insert(cache_key, identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::test_support::{spawn_cloud, test_config};
    use simulator::MockCloud;

    async fn store(cloud: &MockCloud) -> FeedStore {
        let base = spawn_cloud(cloud).await;
        FeedStore::new(AioClient::from_config(&test_config(&base)).unwrap())
    }

    #[test]
    fn test_key_for() {
        assert_eq!(key_for("Temperature"), "temperature");
        assert_eq!(key_for("wind speed"), "wind-speed");
    }

    #[test]
    fn test_find_feed_matches_key_or_name() {
        let feeds = vec![
            Feed {
                name: "Wind Speed".to_string(),
                key: "outdoor.wind-speed".to_string(),
            },
            Feed {
                name: "humidity".to_string(),
                key: "outdoor.rh".to_string(),
            },
        ];
        assert_eq!(find_feed(&feeds, "outdoor", "wind speed").unwrap().key, "outdoor.wind-speed");
        assert_eq!(find_feed(&feeds, "outdoor", "humidity").unwrap().key, "outdoor.rh");
        assert!(find_feed(&feeds, "outdoor", "pressure").is_none());
    }

    #[tokio::test]
    async fn test_feed_is_created_once() {
        let cloud = MockCloud::new();
        let mut feeds = store(&cloud).await;

        let group = feeds.get_or_create_group("outdoor").await.unwrap();
        let first = feeds.get_or_create_feed(&group, "temperature").await.unwrap();
        let second = feeds.get_or_create_feed(&group, "temperature").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            FeedIdentity {
                group_key: "outdoor".to_string(),
                feed_key: "outdoor.temperature".to_string(),
            }
        );
        assert_eq!(cloud.counters().feed_creates, 1);
        assert_eq!(cloud.counters().group_creates, 1);
    }

    #[tokio::test]
    async fn test_existing_resources_are_reused_across_restarts() {
        let cloud = MockCloud::new();

        let mut first_run = store(&cloud).await;
        let group = first_run.get_or_create_group("outdoor").await.unwrap();
        let before = first_run.get_or_create_feed(&group, "humidity").await.unwrap();

        let mut second_run = store(&cloud).await;
        let group = second_run.get_or_create_group("outdoor").await.unwrap();
        let after = second_run.get_or_create_feed(&group, "humidity").await.unwrap();

        assert_eq!(before, after);
        assert_eq!(cloud.counters().group_creates, 1);
        assert_eq!(cloud.counters().feed_creates, 1);
        assert_eq!(cloud.feeds().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cloud = MockCloud::new();
        let mut feeds = store(&cloud).await;
        let group = feeds.get_or_create_group("outdoor").await.unwrap();

        cloud.fail_next(500, 2);
        let result = feeds.get_or_create_feed(&group, "pressure").await;
        assert!(matches!(result, Err(Error::Http { status: 500, .. })));

        let identity = feeds.get_or_create_feed(&group, "pressure").await.unwrap();
        assert_eq!(identity.feed_key, "outdoor.pressure");
        assert_eq!(cloud.counters().feed_creates, 1);
    }
}
