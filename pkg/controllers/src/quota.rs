use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::queue::WorkQueue;
use pkg_constants::quota::QUOTA_FINALIZER;
use pkg_constants::state::{QUOTA_PREFIX, RECONCILE_TIMEOUT_SECS, RESYNC_INTERVAL_SECS};
use pkg_quota::operator::{QuotaOperator, init_status};
use pkg_state::client::ObjectStore;
use pkg_state::retry::{retry_on_conflict, retry_status_on_conflict};
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::quantity::Quantity;
use pkg_types::quota::{LifecyclePhase, ResourceQuota};

/// Controller that reconciles the resource-quota tree.
///
/// Watches quota events, drives the finalizer lifecycle, keeps each
/// quota's status consistent with its spec, and propagates every
/// change into the parent via [`QuotaOperator`]. Workers process
/// distinct quotas concurrently; the queue serializes per key.
pub struct QuotaController {
    store: ObjectStore,
    queue: Arc<WorkQueue>,
    workers: usize,
}

/// Registry entry point.
pub fn setup(ctx: &crate::ControllerContext) -> JoinHandle<()> {
    QuotaController::new(ctx.store.clone(), ctx.workers).start()
}

impl QuotaController {
    pub fn new(store: ObjectStore, workers: usize) -> Self {
        QuotaController {
            store,
            queue: WorkQueue::new(),
            workers: workers.max(1),
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("QuotaController started (workers={})", self.workers);
            let controller = Arc::new(self);

            let mut handles = Vec::new();
            {
                let c = Arc::clone(&controller);
                handles.push(tokio::spawn(async move { c.run_event_pump().await }));
            }
            {
                let c = Arc::clone(&controller);
                handles.push(tokio::spawn(async move { c.run_resync().await }));
            }
            for _ in 0..controller.workers {
                let c = Arc::clone(&controller);
                handles.push(tokio::spawn(async move { c.run_worker().await }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        })
    }

    /// Decide whether an event is worth reconciling. Creates and
    /// deletes always are; updates only when the deletion timestamp
    /// changed or the spec differs structurally. Status-only writes
    /// are dropped so the controller's own updates cannot re-trigger
    /// it.
    fn should_reconcile(event: &WatchEvent) -> bool {
        if event.event_type == EventType::Delete || event.is_create() {
            return true;
        }
        let (Some(new_bytes), Some(prev_bytes)) = (&event.value, &event.prev_value) else {
            return true;
        };
        let (Ok(new), Ok(old)) = (
            serde_json::from_slice::<ResourceQuota>(new_bytes),
            serde_json::from_slice::<ResourceQuota>(prev_bytes),
        ) else {
            return true;
        };
        if old.meta.deletion_timestamp != new.meta.deletion_timestamp {
            return true;
        }
        old.spec != new.spec
    }

    async fn run_event_pump(&self) {
        // Subscribe before the initial relist so no event can fall in
        // between.
        let mut rx = self.store.events().subscribe();
        self.enqueue_all().await;

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(name) = event.key.strip_prefix(QUOTA_PREFIX) else {
                        continue;
                    };
                    if Self::should_reconcile(&event) {
                        self.queue.add(name).await;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Quota event pump lagged by {}, relisting", missed);
                    self.enqueue_all().await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn run_resync(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(RESYNC_INTERVAL_SECS));
        // The immediate first tick duplicates the startup relist; the
        // queue deduplicates it.
        loop {
            interval.tick().await;
            self.enqueue_all().await;
        }
    }

    async fn enqueue_all(&self) {
        match self.store.list::<ResourceQuota>().await {
            Ok(quotas) => {
                for quota in quotas {
                    self.queue.add(&quota.meta.name).await;
                }
            }
            Err(e) => warn!("Quota relist failed: {}", e),
        }
    }

    async fn run_worker(&self) {
        loop {
            let key = self.queue.next().await;
            let deadline = Duration::from_secs(RECONCILE_TIMEOUT_SECS);
            match tokio::time::timeout(deadline, self.reconcile(&key)).await {
                Ok(Ok(())) => {
                    self.queue.forget(&key).await;
                }
                Ok(Err(e)) => {
                    warn!("Reconcile ResourceQuota {} failed: {}", key, e);
                    self.queue.requeue(&key).await;
                }
                Err(_) => {
                    warn!("Reconcile ResourceQuota {} timed out", key);
                    self.queue.requeue(&key).await;
                }
            }
            self.queue.done(&key).await;
        }
    }

    async fn reconcile(&self, name: &str) -> anyhow::Result<()> {
        let quota: ResourceQuota = match self.store.get(name).await {
            Ok(q) => q,
            // Already gone — terminal.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        info!("Reconcile ResourceQuota {}", name);
        match quota.phase() {
            LifecyclePhase::Active => self.reconcile_active(quota).await,
            LifecyclePhase::Finalizing => self.reconcile_finalizing(quota).await,
        }
    }

    async fn reconcile_active(&self, mut quota: ResourceQuota) -> anyhow::Result<()> {
        let name = quota.meta.name.clone();

        if !quota.has_quota_finalizer() {
            quota = retry_on_conflict(&self.store, &name, |q: &mut ResourceQuota| {
                q.meta.add_finalizer(QUOTA_FINALIZER);
            })
            .await?;
        }

        // Fresh object: seed status from spec. Re-checked against the
        // latest read so a retry cannot clobber a concurrent init.
        if quota.status.used.is_none() || quota.status.hard.is_none() {
            quota = retry_status_on_conflict(&self.store, &name, |q: &mut ResourceQuota| {
                if q.status.used.is_none() || q.status.hard.is_none() {
                    init_status(q);
                }
            })
            .await?;
        }

        // Self-heal drift between spec and status.
        if Self::status_drifted(&quota) {
            quota = retry_status_on_conflict(&self.store, &name, |q: &mut ResourceQuota| {
                let used = q.status.used.get_or_insert_with(Default::default);
                for resource in q.spec.hard.keys() {
                    used.entry(resource.clone()).or_insert_with(Quantity::zero);
                }
                q.status.hard = Some(q.spec.hard.clone());
            })
            .await?;
        }

        let operator = QuotaOperator::new(self.store.clone(), Some(quota), None);
        operator.update_parent_status(false).await?;
        Ok(())
    }

    async fn reconcile_finalizing(&self, quota: ResourceQuota) -> anyhow::Result<()> {
        if !quota.has_quota_finalizer() {
            return Ok(());
        }
        let name = quota.meta.name.clone();
        info!("Delete ResourceQuota {}", name);

        // Detach from the parent first; the finalizer stays until this
        // succeeds so a failure is retried.
        let operator = QuotaOperator::new(self.store.clone(), Some(quota), None);
        operator.update_parent_status(true).await?;

        match retry_on_conflict(&self.store, &name, |q: &mut ResourceQuota| {
            q.meta.remove_finalizer(QUOTA_FINALIZER);
        })
        .await
        {
            Ok(_) => Ok(()),
            // Another writer released it already.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn status_drifted(quota: &ResourceQuota) -> bool {
        let used_missing = quota.status.used.as_ref().is_none_or(|used| {
            quota
                .spec
                .hard
                .keys()
                .any(|resource| !used.contains_key(resource))
        });
        let hard_drifted = quota.status.hard.as_ref() != Some(&quota.spec.hard);
        used_missing || hard_drifted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::watch::EventLog;
    use pkg_types::quantity::get_or_zero;
    use pkg_types::quota::{ResourceQuotaSpec, TargetKind, TargetRef};
    use uuid::Uuid;

    async fn test_store(tag: &str) -> ObjectStore {
        let dir = std::env::temp_dir().join(format!("m8s-ctrl-{}-{}", tag, Uuid::new_v4()));
        ObjectStore::new(dir.to_str().unwrap()).await.unwrap()
    }

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    fn quota(name: &str, kind: TargetKind, parent: Option<&str>, cpu: &str) -> ResourceQuota {
        ResourceQuota::new(
            name,
            ResourceQuotaSpec {
                hard: [("cpu".to_string(), q(cpu))].into(),
                parent_quota: parent.map(String::from),
                target: TargetRef {
                    kind,
                    name: name.to_string(),
                },
            },
        )
    }

    /// Poll until `pred` holds or the deadline passes.
    async fn wait_for<F>(what: &str, mut pred: F)
    where
        F: AsyncFnMut() -> bool,
    {
        for _ in 0..100 {
            if pred().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn quota_tree_lifecycle() {
        let store = test_store("lifecycle").await;
        let _handle = QuotaController::new(store.clone(), 2).start();

        store
            .create(&quota("tenant-x", TargetKind::Tenant, None, "10"))
            .await
            .unwrap();
        store
            .create(&quota("proj-a", TargetKind::Project, Some("tenant-x"), "4"))
            .await
            .unwrap();

        // Create: child gains finalizer + initialized status, parent
        // picks up the claim and the membership entry.
        wait_for("create roll-up", async || {
            let Ok(parent) = store.get::<ResourceQuota>("tenant-x").await else {
                return false;
            };
            let Ok(child) = store.get::<ResourceQuota>("proj-a").await else {
                return false;
            };
            child.has_quota_finalizer()
                && child.status.hard.as_ref() == Some(&child.spec.hard)
                && parent
                    .status
                    .used
                    .as_ref()
                    .map(|u| get_or_zero(u, "cpu") == q("4"))
                    .unwrap_or(false)
                && parent
                    .status
                    .sub_resource_quotas
                    .as_ref()
                    .map(|s| s.contains("proj-a.quota"))
                    .unwrap_or(false)
        })
        .await;

        // Update: shrink the child's hard; parent usage follows.
        retry_on_conflict(&store, "proj-a", |child: &mut ResourceQuota| {
            child.spec.hard.insert("cpu".to_string(), q("2"));
        })
        .await
        .unwrap();
        wait_for("update roll-up", async || {
            let Ok(parent) = store.get::<ResourceQuota>("tenant-x").await else {
                return false;
            };
            parent
                .status
                .used
                .as_ref()
                .map(|u| get_or_zero(u, "cpu") == q("2"))
                .unwrap_or(false)
        })
        .await;

        // Delete: finalizer flushes the parent, then the object goes.
        store.delete::<ResourceQuota>("proj-a").await.unwrap();
        wait_for("deletion flush", async || {
            let gone = store
                .get::<ResourceQuota>("proj-a")
                .await
                .err()
                .map(|e| e.is_not_found())
                .unwrap_or(false);
            let Ok(parent) = store.get::<ResourceQuota>("tenant-x").await else {
                return false;
            };
            gone && parent
                .status
                .used
                .as_ref()
                .map(|u| get_or_zero(u, "cpu").is_zero())
                .unwrap_or(false)
                && parent
                    .status
                    .sub_resource_quotas
                    .as_ref()
                    .map(|s| s.is_empty())
                    .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_children_both_attach() {
        let store = test_store("siblings").await;
        let _handle = QuotaController::new(store.clone(), 4).start();

        store
            .create(&quota("tenant-x", TargetKind::Tenant, None, "10"))
            .await
            .unwrap();
        let quota_a = quota("proj-a", TargetKind::Project, Some("tenant-x"), "2");
        let quota_b = quota("proj-b", TargetKind::Project, Some("tenant-x"), "3");
        let (a, b) = tokio::join!(store.create(&quota_a), store.create(&quota_b),);
        a.unwrap();
        b.unwrap();

        wait_for("both siblings attached", async || {
            let Ok(parent) = store.get::<ResourceQuota>("tenant-x").await else {
                return false;
            };
            let members = parent.status.sub_resource_quotas.clone().unwrap_or_default();
            members.contains("proj-a.quota")
                && members.contains("proj-b.quota")
                && parent
                    .status
                    .used
                    .as_ref()
                    .map(|u| get_or_zero(u, "cpu") == q("5"))
                    .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test]
    async fn status_only_updates_are_filtered() {
        let log = EventLog::new(16);
        let mut rx = log.subscribe();

        let base = quota("proj-a", TargetKind::Project, None, "4");
        let mut status_changed = base.clone();
        status_changed.status.sub_resource_quotas = Some(Default::default());
        let mut spec_changed = base.clone();
        spec_changed.spec.hard.insert("cpu".to_string(), q("8"));
        let mut deleting = base.clone();
        deleting.meta.deletion_timestamp = Some(chrono::Utc::now());

        let key = format!("{}proj-a", QUOTA_PREFIX);
        let enc = |quota: &ResourceQuota| Some(serde_json::to_vec(quota).unwrap());

        log.emit(EventType::Put, key.clone(), enc(&base), None).await;
        log.emit(EventType::Put, key.clone(), enc(&status_changed), enc(&base))
            .await;
        log.emit(EventType::Put, key.clone(), enc(&spec_changed), enc(&base))
            .await;
        log.emit(EventType::Put, key.clone(), enc(&deleting), enc(&base))
            .await;
        log.emit(EventType::Delete, key.clone(), None, enc(&base)).await;

        let create = rx.recv().await.unwrap();
        let status_only = rx.recv().await.unwrap();
        let spec_change = rx.recv().await.unwrap();
        let deletion = rx.recv().await.unwrap();
        let delete = rx.recv().await.unwrap();

        assert!(QuotaController::should_reconcile(&create));
        assert!(!QuotaController::should_reconcile(&status_only));
        assert!(QuotaController::should_reconcile(&spec_change));
        assert!(QuotaController::should_reconcile(&deletion));
        assert!(QuotaController::should_reconcile(&delete));
    }
}
