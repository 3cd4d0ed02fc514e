use chrono::Utc;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::watch::{EventLog, EventType};
use pkg_types::object::{HasStatus, Object};

/// Transactional object store backed by SlateDB on a local filesystem.
/// In production this would use S3/R2/MinIO via the `object_store` crate.
///
/// Every write is a compare-and-swap on the object's
/// `resource_version`: the store bumps the version on commit and fails
/// a write submitted against a stale version with
/// [`StoreError::Conflict`]. Deletion honors finalizers the Kubernetes
/// way — a delete of a finalized object only stamps
/// `deletion_timestamp`; the object is physically removed once the last
/// finalizer is gone.
#[derive(Clone)]
pub struct ObjectStore {
    db: Db,
    // Serializes read-check-write commits; reads stay lock-free.
    commit_lock: Arc<Mutex<()>>,
    events: EventLog,
}

impl ObjectStore {
    /// Open (or create) an object store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB object store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            commit_lock: Arc::new(Mutex::new(())),
            events: EventLog::new(1024),
        })
    }

    /// The watch event log fed by every committed write.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Fetch an object by name.
    pub async fn get<T: Object>(&self, name: &str) -> Result<T, StoreError> {
        let key = T::store_key(name);
        match self.raw_get(&key).await? {
            Some(bytes) => decode(&key, &bytes),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    /// List every object of a type. Undecodable entries are skipped.
    pub async fn list<T: Object>(&self) -> Result<Vec<T>, StoreError> {
        let entries = self.raw_scan(T::store_prefix()).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect())
    }

    /// Persist a new object, assigning uid, resource version 1 and the
    /// creation timestamp.
    pub async fn create<T: Object>(&self, obj: &T) -> Result<T, StoreError> {
        let name = obj.name().to_string();
        let key = T::store_key(&name);

        let _commit = self.commit_lock.lock().await;
        if self.raw_get(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists(name));
        }

        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = 1;
        meta.created_at = Some(Utc::now());
        meta.deletion_timestamp = None;

        let bytes = encode(&key, &stored)?;
        self.raw_put(&key, &bytes).await?;
        self.events
            .emit(EventType::Put, key, Some(bytes), None)
            .await;
        Ok(stored)
    }

    /// Replace an object. Fails with `Conflict` when the submitted
    /// resource version is stale. If the write leaves a
    /// deletion-stamped object with no finalizers, the object is
    /// physically removed instead.
    pub async fn update<T: Object>(&self, obj: &T) -> Result<T, StoreError> {
        let name = obj.name().to_string();
        let key = T::store_key(&name);

        let _commit = self.commit_lock.lock().await;
        let prev_bytes = self
            .raw_get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        let stored: T = decode(&key, &prev_bytes)?;

        let stored_version = stored.meta().resource_version;
        if stored_version != obj.meta().resource_version {
            return Err(StoreError::Conflict {
                name,
                submitted: obj.meta().resource_version,
                stored: stored_version,
            });
        }

        let mut next = obj.clone();
        {
            let meta = next.meta_mut();
            // Identity and deletion progress are store-owned.
            meta.uid = stored.meta().uid.clone();
            meta.created_at = stored.meta().created_at;
            if stored.meta().deletion_timestamp.is_some() {
                meta.deletion_timestamp = stored.meta().deletion_timestamp;
            }
            meta.resource_version = stored_version + 1;
        }

        if next.meta().deletion_timestamp.is_some() && next.meta().finalizers.is_empty() {
            self.raw_delete(&key).await?;
            info!("Object {} released its last finalizer, removed", key);
            self.events
                .emit(EventType::Delete, key, None, Some(prev_bytes))
                .await;
            return Ok(next);
        }

        let bytes = encode(&key, &next)?;
        self.raw_put(&key, &bytes).await?;
        self.events
            .emit(EventType::Put, key, Some(bytes), Some(prev_bytes))
            .await;
        Ok(next)
    }

    /// Write only the status subresource, leaving spec and metadata as
    /// stored. Conflict semantics match [`ObjectStore::update`].
    pub async fn update_status<T: HasStatus>(&self, obj: &T) -> Result<T, StoreError> {
        let name = obj.name().to_string();
        let key = T::store_key(&name);

        let _commit = self.commit_lock.lock().await;
        let prev_bytes = self
            .raw_get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        let stored: T = decode(&key, &prev_bytes)?;

        let stored_version = stored.meta().resource_version;
        if stored_version != obj.meta().resource_version {
            return Err(StoreError::Conflict {
                name,
                submitted: obj.meta().resource_version,
                stored: stored_version,
            });
        }

        let mut next = stored;
        next.set_status(obj.status().clone());
        next.meta_mut().resource_version = stored_version + 1;

        let bytes = encode(&key, &next)?;
        self.raw_put(&key, &bytes).await?;
        self.events
            .emit(EventType::Put, key, Some(bytes), Some(prev_bytes))
            .await;
        Ok(next)
    }

    /// Request deletion. Objects carrying finalizers are only stamped
    /// with `deletion_timestamp`; others are removed immediately.
    pub async fn delete<T: Object>(&self, name: &str) -> Result<(), StoreError> {
        let key = T::store_key(name);

        let _commit = self.commit_lock.lock().await;
        let prev_bytes = self
            .raw_get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let mut stored: T = decode(&key, &prev_bytes)?;

        if stored.meta().finalizers.is_empty() {
            self.raw_delete(&key).await?;
            self.events
                .emit(EventType::Delete, key, None, Some(prev_bytes))
                .await;
            return Ok(());
        }

        if stored.meta().deletion_timestamp.is_none() {
            let meta = stored.meta_mut();
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version += 1;
            let bytes = encode(&key, &stored)?;
            self.raw_put(&key, &bytes).await?;
            info!("Object {} has finalizers, marked for deletion", key);
            self.events
                .emit(EventType::Put, key, Some(bytes), Some(prev_bytes))
                .await;
        }
        Ok(())
    }

    /// Gracefully close the object store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB object store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }

    async fn raw_put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e).into())
    }

    async fn raw_get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e).into()),
        }
    }

    async fn raw_delete(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("SlateDB delete failed: {}", e).into())
    }

    async fn raw_scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }
}

fn encode<T: Object>(key: &str, obj: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(obj).map_err(|e| anyhow::anyhow!("encode {} failed: {}", key, e).into())
}

fn decode<T: Object>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| anyhow::anyhow!("decode {} failed: {}", key, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::quota::{ResourceQuota, ResourceQuotaSpec, TargetKind, TargetRef};

    async fn test_store(tag: &str) -> ObjectStore {
        let dir = std::env::temp_dir().join(format!("m8s-state-{}-{}", tag, Uuid::new_v4()));
        ObjectStore::new(dir.to_str().unwrap()).await.unwrap()
    }

    fn quota(name: &str) -> ResourceQuota {
        ResourceQuota::new(
            name,
            ResourceQuotaSpec {
                hard: Default::default(),
                parent_quota: None,
                target: TargetRef {
                    kind: TargetKind::Project,
                    name: name.to_string(),
                },
            },
        )
    }

    #[tokio::test]
    async fn create_assigns_identity() {
        let store = test_store("create").await;
        let created = store.create(&quota("proj-a")).await.unwrap();
        assert!(!created.meta.uid.is_empty());
        assert_eq!(created.meta.resource_version, 1);
        assert!(created.meta.created_at.is_some());

        let fetched: ResourceQuota = store.get("proj-a").await.unwrap();
        assert_eq!(fetched, created);

        let err = store.create(&quota("proj-a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = test_store("conflict").await;
        let created = store.create(&quota("proj-a")).await.unwrap();

        let mut first = created.clone();
        first.meta.add_finalizer("x");
        store.update(&first).await.unwrap();

        // Second writer still holds version 1.
        let mut second = created;
        second.meta.add_finalizer("y");
        let err = store.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_status_leaves_spec_alone() {
        let store = test_store("status").await;
        let created = store.create(&quota("proj-a")).await.unwrap();

        let mut staled = created.clone();
        staled.spec.parent_quota = Some("tenant-x".to_string());
        staled.status.sub_resource_quotas = Some(Default::default());
        let written = store.update_status(&staled).await.unwrap();

        assert!(written.spec.parent_quota.is_none());
        assert!(written.status.sub_resource_quotas.is_some());
        assert_eq!(written.meta.resource_version, 2);
    }

    #[tokio::test]
    async fn finalizer_gates_physical_deletion() {
        let store = test_store("finalizer").await;
        let mut q = quota("proj-a");
        q.meta.add_finalizer("quota.finalizers.m8s.io");
        store.create(&q).await.unwrap();

        store.delete::<ResourceQuota>("proj-a").await.unwrap();
        let marked: ResourceQuota = store.get("proj-a").await.unwrap();
        assert!(marked.meta.deletion_timestamp.is_some());

        // Removing the last finalizer releases the object.
        let mut done = marked;
        done.meta.remove_finalizer("quota.finalizers.m8s.io");
        store.update(&done).await.unwrap();
        let err = store.get::<ResourceQuota>("proj-a").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_without_finalizers_is_immediate() {
        let store = test_store("delete").await;
        store.create(&quota("proj-a")).await.unwrap();
        store.delete::<ResourceQuota>("proj-a").await.unwrap();
        assert!(
            store
                .get::<ResourceQuota>("proj-a")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
