use std::time::Duration;

use crate::client::ObjectStore;
use crate::error::StoreError;
use pkg_constants::state::{CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_BASE_MS};
use pkg_types::object::{HasStatus, Object};

/// Read-modify-retry loop for full-object writes.
///
/// `mutate` must be a pure function of the latest object — it is
/// re-applied to a fresh read on every conflict, so it must not capture
/// state mutated across attempts.
pub async fn retry_on_conflict<T, F>(
    store: &ObjectStore,
    name: &str,
    mut mutate: F,
) -> Result<T, StoreError>
where
    T: Object,
    F: FnMut(&mut T),
{
    let mut attempt: u32 = 0;
    loop {
        let mut latest: T = store.get(name).await?;
        mutate(&mut latest);
        match store.update(&latest).await {
            Err(e) if e.is_conflict() && attempt + 1 < CONFLICT_RETRY_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(backoff(attempt)).await;
            }
            other => return other,
        }
    }
}

/// Same as [`retry_on_conflict`] but writes only the status subresource.
pub async fn retry_status_on_conflict<T, F>(
    store: &ObjectStore,
    name: &str,
    mut mutate: F,
) -> Result<T, StoreError>
where
    T: HasStatus,
    F: FnMut(&mut T),
{
    let mut attempt: u32 = 0;
    loop {
        let mut latest: T = store.get(name).await?;
        mutate(&mut latest);
        match store.update_status(&latest).await {
            Err(e) if e.is_conflict() && attempt + 1 < CONFLICT_RETRY_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(backoff(attempt)).await;
            }
            other => return other,
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(CONFLICT_RETRY_BASE_MS << attempt.min(6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::quota::{ResourceQuota, ResourceQuotaSpec};
    use uuid::Uuid;

    async fn test_store(tag: &str) -> ObjectStore {
        let dir = std::env::temp_dir().join(format!("m8s-retry-{}-{}", tag, Uuid::new_v4()));
        ObjectStore::new(dir.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn concurrent_mutations_both_land() {
        let store = test_store("concurrent").await;
        store
            .create(&ResourceQuota::new("q", ResourceQuotaSpec::default()))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            retry_on_conflict::<ResourceQuota, _>(&store, "q", |q| {
                q.meta.add_finalizer("a");
            }),
            retry_on_conflict::<ResourceQuota, _>(&store, "q", |q| {
                q.meta.add_finalizer("b");
            }),
        );
        a.unwrap();
        b.unwrap();

        let latest: ResourceQuota = store.get("q").await.unwrap();
        assert!(latest.meta.contains_finalizer("a"));
        assert!(latest.meta.contains_finalizer("b"));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let store = test_store("nf").await;
        let err = retry_on_conflict::<ResourceQuota, _>(&store, "ghost", |_| {})
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
