//! Per-scope snapshot cache.
//!
//! Entries hold `Arc<SchemaSnapshot>`; a refresh inserts a new `Arc` in one
//! map operation, so readers either get the old snapshot or the new one and
//! never a partially built one.

use crate::error::{GatewayError, Result};
use crate::schema::snapshot::SchemaSnapshot;
use crate::scope::DatasetScope;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Introspection boundary to the relational store.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn introspect(&self, scope: &DatasetScope) -> Result<SchemaSnapshot>;
}

pub struct SchemaCatalog {
    source: Arc<dyn SchemaSource>,
    cache: DashMap<String, Arc<SchemaSnapshot>>,
    ttl: Duration,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn SchemaSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Cached snapshot for the scope, refreshing on first access or once the
    /// cached one is older than the TTL.
    pub async fn snapshot(&self, scope: &DatasetScope) -> Result<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.cached(scope) {
            if !self.is_stale(&snapshot) {
                debug!("Schema cache hit for {}", scope.cache_key());
                return Ok(snapshot);
            }
            debug!("Schema snapshot for {} expired", scope.cache_key());
        }
        self.refresh(scope).await
    }

    /// Introspect the store and swap in the new snapshot.
    pub async fn refresh(&self, scope: &DatasetScope) -> Result<Arc<SchemaSnapshot>> {
        let snapshot = match self.source.introspect(scope).await {
            Ok(s) => s,
            Err(GatewayError::SchemaUnavailable { dataset_id, reason }) => {
                warn!("Schema introspection failed for dataset {}: {}", dataset_id, reason);
                return Err(GatewayError::SchemaUnavailable { dataset_id, reason });
            }
            Err(e) => {
                warn!("Schema introspection failed for dataset {}: {}", scope.dataset_id, e);
                return Err(GatewayError::SchemaUnavailable {
                    dataset_id: scope.dataset_id,
                    reason: e.to_string(),
                });
            }
        };

        if snapshot.is_empty() {
            return Err(GatewayError::SchemaUnavailable {
                dataset_id: scope.dataset_id,
                reason: format!("no tables visible in schema '{}'", scope.schema_name),
            });
        }

        let snapshot = Arc::new(snapshot);
        self.cache.insert(scope.cache_key(), Arc::clone(&snapshot));
        info!(
            "Schema snapshot refreshed for {} ({} tables)",
            scope.cache_key(),
            snapshot.tables().len()
        );
        Ok(snapshot)
    }

    pub fn cached(&self, scope: &DatasetScope) -> Option<Arc<SchemaSnapshot>> {
        self.cache
            .get(&scope.cache_key())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn invalidate(&self, scope: &DatasetScope) {
        self.cache.remove(&scope.cache_key());
    }

    fn is_stale(&self, snapshot: &SchemaSnapshot) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() - snapshot.captured_at() > ttl,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::snapshot::TableShape;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn introspect(&self, scope: &DatasetScope) -> Result<SchemaSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::Config("connection lost".to_string()));
            }
            Ok(SchemaSnapshot::new(
                scope.dataset_id,
                scope.dataset_name.clone(),
                scope.schema_name.clone(),
                vec![TableShape::new("products", n as i64).with_column("name", "text")],
            ))
        }
    }

    fn scope() -> DatasetScope {
        DatasetScope::new(1, "Sales Analytics", "sales_data", vec!["products".to_string()])
    }

    #[tokio::test]
    async fn test_snapshot_is_cached() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: false });
        let catalog = SchemaCatalog::new(source.clone(), Duration::from_secs(300));

        let first = catalog.snapshot(&scope()).await.unwrap();
        let second = catalog.snapshot(&scope()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_swaps_without_touching_old_snapshot() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: false });
        let catalog = SchemaCatalog::new(source, Duration::from_secs(300));

        let old = catalog.snapshot(&scope()).await.unwrap();
        let new = catalog.refresh(&scope()).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(old.tables()[0].estimated_rows, 0);
        assert_eq!(new.tables()[0].estimated_rows, 1);
        assert!(Arc::ptr_eq(&catalog.cached(&scope()).unwrap(), &new));
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refreshes() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: false });
        let catalog = SchemaCatalog::new(source.clone(), Duration::ZERO);

        catalog.snapshot(&scope()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        catalog.snapshot(&scope()).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_introspection_failure_is_schema_unavailable() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0), fail: true });
        let catalog = SchemaCatalog::new(source, Duration::from_secs(300));

        let err = catalog.snapshot(&scope()).await.unwrap_err();
        assert!(matches!(err, GatewayError::SchemaUnavailable { dataset_id: 1, .. }));
        assert!(catalog.cached(&scope()).is_none());
    }
}
