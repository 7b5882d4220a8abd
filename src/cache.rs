//! Read-side cache invalidation
//!
//! The ranking read path caches per-protocol responses elsewhere. After a
//! partition is replaced the sync service notifies that cache through a
//! `CacheInvalidationHook`. Notification is fire-and-forget: a failed
//! invalidation is logged and never fails the sync.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait CacheInvalidationHook: Send + Sync {
    async fn invalidate(&self, partition_key: &str);
}

/// Hook for deployments without a read-side cache
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheHook;

#[async_trait]
impl CacheInvalidationHook for NoopCacheHook {
    async fn invalidate(&self, partition_key: &str) {
        log::debug!("Cache invalidation skipped for {} (no hook configured)", partition_key);
    }
}

/// POSTs `{"protocol": "<key>"}` to a configured URL
#[derive(Clone)]
pub struct WebhookCacheHook {
    client: reqwest::Client,
    url: String,
}

impl WebhookCacheHook {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CacheInvalidationHook for WebhookCacheHook {
    async fn invalidate(&self, partition_key: &str) {
        let result = self
            .client
            .post(&self.url)
            .json(&json!({ "protocol": partition_key }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                log::info!("🔄 Cache invalidated for {}", partition_key);
            }
            Ok(response) => {
                log::warn!(
                    "⚠️  Cache invalidation for {} returned HTTP {}",
                    partition_key,
                    response.status()
                );
            }
            Err(e) => {
                log::warn!("⚠️  Cache invalidation for {} failed: {}", partition_key, e);
            }
        }
    }
}
