use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use signalbox_core::{RecordKey, RecordKind, ScopeKey};
use signalbox_storage::{ScopedRecordRepository, StoragePool};
use thiserror::Error;
use tokio::{sync::RwLock, time::timeout};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Unavailable(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub body: serde_json::Value,
}

/// Append-only document store with per-scope read-after-write consistency.
///
/// `create_child` allocates a fresh key under `scope` and never replaces a
/// sibling. `list_children` returns every record of `kind` committed under
/// `scope` before the call began, oldest first. No guarantee spans scopes.
#[async_trait]
pub trait ScopedStore: Send + Sync {
    async fn create_child(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
        body: serde_json::Value,
    ) -> Result<RecordKey, StoreError>;

    async fn list_children(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}

#[async_trait]
impl ScopedStore for ScopedRecordRepository {
    async fn create_child(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
        body: serde_json::Value,
    ) -> Result<RecordKey, StoreError> {
        let row = self.insert(scope, kind, &body).await?;
        Ok(row.key()?)
    }

    async fn list_children(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.list(scope, kind)
            .await?
            .into_iter()
            .map(|row| -> Result<StoredRecord, StoreError> {
                Ok(StoredRecord {
                    key: row.key()?,
                    body: row.body,
                })
            })
            .collect()
    }
}

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct InMemoryScopedStore {
    scopes: RwLock<HashMap<(ScopeKey, RecordKind), Vec<StoredRecord>>>,
    sequence: AtomicI64,
}

impl InMemoryScopedStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn record_count(&self) -> usize {
        self.scopes.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ScopedStore for InMemoryScopedStore {
    async fn create_child(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
        body: serde_json::Value,
    ) -> Result<RecordKey, StoreError> {
        let mut scopes = self.scopes.write().await;
        // allocated under the lock so listing order matches sequence order
        let key = RecordKey {
            scope: scope.clone(),
            kind,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        };
        scopes
            .entry((scope.clone(), kind))
            .or_default()
            .push(StoredRecord {
                key: key.clone(),
                body,
            });
        Ok(key)
    }

    async fn list_children(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(&(scope.clone(), kind))
            .cloned()
            .unwrap_or_default())
    }
}

/// Bounds every store call by a deadline. An overrun is reported as the store
/// being unavailable; nothing is rolled back since each write is one record.
pub struct TimeoutStore {
    inner: Arc<dyn ScopedStore>,
    limit: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn ScopedStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    fn timed_out(&self) -> StoreError {
        StoreError::Unavailable(format!(
            "store operation timed out after {}ms",
            self.limit.as_millis()
        ))
    }
}

#[async_trait]
impl ScopedStore for TimeoutStore {
    async fn create_child(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
        body: serde_json::Value,
    ) -> Result<RecordKey, StoreError> {
        timeout(self.limit, self.inner.create_child(scope, kind, body))
            .await
            .map_err(|_| self.timed_out())?
    }

    async fn list_children(
        &self,
        scope: &ScopeKey,
        kind: RecordKind,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        timeout(self.limit, self.inner.list_children(scope, kind))
            .await
            .map_err(|_| self.timed_out())?
    }
}

/// Stands in for a configured database that could not be reached. Every call
/// fails with the recorded connection error.
pub struct UnreachableStore {
    reason: String,
}

impl UnreachableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ScopedStore for UnreachableStore {
    async fn create_child(
        &self,
        _scope: &ScopeKey,
        _kind: RecordKind,
        _body: serde_json::Value,
    ) -> Result<RecordKey, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }

    async fn list_children(
        &self,
        _scope: &ScopeKey,
        _kind: RecordKind,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}

pub enum StoreBackend {
    /// No database configured; records live in this process only.
    Memory,
    Postgres(StoragePool),
    /// A database is configured but the connection failed.
    Unreachable(String),
}

pub fn init_scoped_store(backend: StoreBackend, limit: Duration) -> Arc<dyn ScopedStore> {
    let inner: Arc<dyn ScopedStore> = match backend {
        StoreBackend::Memory => Arc::new(InMemoryScopedStore::new()),
        StoreBackend::Postgres(pool) => Arc::new(ScopedRecordRepository::new(pool)),
        StoreBackend::Unreachable(reason) => Arc::new(UnreachableStore::new(reason)),
    };
    Arc::new(TimeoutStore::new(inner, limit))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use signalbox_core::PeerId;
    use std::{collections::HashSet, sync::atomic::AtomicBool};

    /// Store whose every call fails, for exercising error propagation.
    pub(crate) struct FailingStore;

    #[async_trait]
    impl ScopedStore for FailingStore {
        async fn create_child(
            &self,
            _scope: &ScopeKey,
            _kind: RecordKind,
            _body: serde_json::Value,
        ) -> Result<RecordKey, StoreError> {
            Err(StoreError::Unavailable("datastore write refused".into()))
        }

        async fn list_children(
            &self,
            _scope: &ScopeKey,
            _kind: RecordKind,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("datastore query refused".into()))
        }
    }

    /// Store that never answers.
    pub(crate) struct StalledStore {
        pub(crate) touched: AtomicBool,
    }

    #[async_trait]
    impl ScopedStore for StalledStore {
        async fn create_child(
            &self,
            _scope: &ScopeKey,
            _kind: RecordKind,
            _body: serde_json::Value,
        ) -> Result<RecordKey, StoreError> {
            self.touched.store(true, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn list_children(
            &self,
            _scope: &ScopeKey,
            _kind: RecordKind,
        ) -> Result<Vec<StoredRecord>, StoreError> {
            self.touched.store(true, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn in_memory_store_lists_children_in_creation_order() {
        let store = InMemoryScopedStore::new();
        let scope = ScopeKey::channel("room1");

        let first = store
            .create_child(&scope, RecordKind::ChannelEntry, json!({"PeerID": "a"}))
            .await
            .unwrap();
        let second = store
            .create_child(&scope, RecordKind::ChannelEntry, json!({"PeerID": "b"}))
            .await
            .unwrap();
        assert!(second.sequence > first.sequence);

        let records = store
            .list_children(&scope, RecordKind::ChannelEntry)
            .await
            .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.body["PeerID"].clone()).collect();
        assert_eq!(ids, vec![json!("a"), json!("b")]);
        assert_eq!(records[0].key, first);
    }

    #[tokio::test]
    async fn in_memory_store_isolates_scopes_and_kinds() {
        let store = InMemoryScopedStore::new();
        let peer = ScopeKey::peer(&PeerId::from("p"));
        store
            .create_child(&peer, RecordKind::PeerOffer, json!({"Offer": "x"}))
            .await
            .unwrap();

        assert!(store
            .list_children(&peer, RecordKind::IceCandidate)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_children(&ScopeKey::channel("p"), RecordKind::PeerOffer)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_children(&ScopeKey::peer(&PeerId::from("q")), RecordKind::PeerOffer)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_creates_under_one_scope_are_all_kept() {
        let store = Arc::new(InMemoryScopedStore::new());
        let scope = ScopeKey::channel("busy");

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                let scope = scope.clone();
                tokio::spawn(async move {
                    store
                        .create_child(&scope, RecordKind::ChannelEntry, json!({ "PeerID": i }))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let records = store
            .list_children(&scope, RecordKind::ChannelEntry)
            .await
            .unwrap();
        assert_eq!(records.len(), 32);
        let sequences: HashSet<_> = records.iter().map(|r| r.key.sequence).collect();
        assert_eq!(sequences.len(), 32);
    }

    #[tokio::test]
    async fn timeout_store_reports_stalled_backend_as_unavailable() {
        let inner = Arc::new(StalledStore {
            touched: AtomicBool::new(false),
        });
        let store = TimeoutStore::new(inner.clone(), Duration::from_millis(50));

        let err = store
            .list_children(&ScopeKey::channel("slow"), RecordKind::ChannelEntry)
            .await
            .unwrap_err();
        assert!(inner.touched.load(Ordering::SeqCst));
        assert_eq!(err.to_string(), "store operation timed out after 50ms");
    }

    #[tokio::test]
    async fn timeout_store_passes_through_inner_errors_verbatim() {
        let store = TimeoutStore::new(Arc::new(FailingStore), Duration::from_secs(1));
        let err = store
            .create_child(&ScopeKey::channel("c"), RecordKind::ChannelEntry, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "datastore write refused");
    }

    #[tokio::test]
    async fn unreachable_backend_fails_every_call_with_connect_error() {
        let store = init_scoped_store(
            StoreBackend::Unreachable("pool timed out while waiting for an open connection".into()),
            Duration::from_secs(1),
        );
        let scope = ScopeKey::channel("room1");

        let err = store
            .create_child(&scope, RecordKind::ChannelEntry, json!({"PeerID": "a"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pool timed out while waiting for an open connection"
        );
        assert!(store
            .list_children(&scope, RecordKind::ChannelEntry)
            .await
            .is_err());
    }

    #[test]
    fn anyhow_errors_keep_their_context_chain() {
        let err: StoreError = anyhow::anyhow!("connection reset")
            .context("insert failed")
            .into();
        assert_eq!(err.to_string(), "insert failed: connection reset");
    }
}
