//! Shared diagnosis cache keyed by document content and effort tier.
//!
//! Concurrent jobs that upload identical bytes at the same effort reuse one
//! diagnosis. Each job still records its own copy in its history.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{CacheConfig, Effort, Issue};

/// Cache key: content hash plus effort tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiagnosisCacheKey {
    pub content_hash: String,
    pub effort: Effort,
}

impl DiagnosisCacheKey {
    pub fn new(content_hash: impl Into<String>, effort: Effort) -> Self {
        Self {
            content_hash: content_hash.into(),
            effort,
        }
    }
}

/// TTL cache of merged issue lists. A disabled cache never hits.
#[derive(Clone)]
pub struct DiagnosisCache {
    entries: Option<Cache<DiagnosisCacheKey, Arc<Vec<Issue>>>>,
}

impl DiagnosisCache {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let entries = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self { entries: Some(entries) }
    }

    pub fn disabled() -> Self {
        Self { entries: None }
    }

    pub async fn get(&self, key: &DiagnosisCacheKey) -> Option<Arc<Vec<Issue>>> {
        match &self.entries {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    pub async fn insert(&self, key: DiagnosisCacheKey, issues: Vec<Issue>) {
        if let Some(cache) = &self.entries {
            cache.insert(key, Arc::new(issues)).await;
        }
    }

    pub async fn invalidate(&self, key: &DiagnosisCacheKey) {
        if let Some(cache) = &self.entries {
            cache.invalidate(key).await;
        }
    }
}

impl Default for DiagnosisCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
