use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

use pkg_constants::state::{CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_BASE_MS};
use pkg_state::client::ObjectStore;
use pkg_state::error::StoreError;
use pkg_types::quantity::{Quantity, ResourceList, add_list, get_or_zero};
use pkg_types::quota::ResourceQuota;

/// One invocation of the quota roll-up algorithm.
///
/// `current` is the post-change object (`None` when deleting), `old`
/// the pre-change object (`None` when creating). The operator resolves
/// the parent, detects overload against it, and keeps the parent's
/// `used` / `sub_resource_quotas` status consistent with the set of
/// live children.
pub struct QuotaOperator {
    store: ObjectStore,
    current: Option<ResourceQuota>,
    old: Option<ResourceQuota>,
}

impl QuotaOperator {
    pub fn new(store: ObjectStore, current: Option<ResourceQuota>, old: Option<ResourceQuota>) -> Self {
        QuotaOperator {
            store,
            current,
            old,
        }
    }

    /// Whichever of current/old is present, preferring current.
    fn subject(&self) -> Option<&ResourceQuota> {
        self.current.as_ref().or(self.old.as_ref())
    }

    /// Resolve the declared parent quota. `Ok(None)` when no parent is
    /// declared (tree root); `NotFound` when one is declared but gone.
    pub async fn parent(&self) -> Result<Option<ResourceQuota>, StoreError> {
        let Some(subject) = self.subject() else {
            return Ok(None);
        };
        let Some(parent_name) = subject.spec.parent_quota.as_deref() else {
            return Ok(None);
        };
        let parent = self.store.get(parent_name).await?;
        Ok(Some(parent))
    }

    /// Check whether the prospective demand exceeds the parent's
    /// headroom. Returns a human-readable reason naming the offending
    /// resource, or `None` when the quota fits.
    ///
    /// Tenant-target quotas are tree roots and are never checked, even
    /// if a parent happens to be declared.
    pub async fn overload(&self) -> Result<Option<String>, StoreError> {
        let tenant_kind = [self.current.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .any(|q| q.is_tenant_kind());
        if tenant_kind {
            return Ok(None);
        }

        let Some(current) = self.current.as_ref() else {
            // Deletion never increases demand.
            return Ok(None);
        };

        let Some(parent) = self.parent().await? else {
            return Ok(None);
        };

        // Committed demand of the siblings; self excluded so an update
        // is not double counted against its own prior claim.
        let (used_by_others, _) = self
            .aggregate_children(&parent, AggregateSelf::Exclude)
            .await?;

        for (resource, demand) in &current.spec.hard {
            let limit = get_or_zero(&parent.spec.hard, resource);
            let committed = get_or_zero(&used_by_others, resource);
            let available = limit - committed;
            if *demand > available {
                return Ok(Some(format!(
                    "hard limit of '{}' exceeds parent quota '{}': requested {}, available {}",
                    resource, parent.meta.name, demand, available
                )));
            }
        }

        Ok(None)
    }

    /// Propagate this child into (or out of) its parent's status.
    ///
    /// The parent's `used` and `sub_resource_quotas` are recomputed by
    /// full re-aggregation over the live children, so redelivery of the
    /// same event is a no-op and concurrent siblings converge through
    /// conflict retries. `flush` removes this child (deletion path).
    ///
    /// Only the currently declared parent is written. When an update
    /// re-parents a child, the former parent keeps its stale entry
    /// until the periodic resync (or any sibling event) re-aggregates
    /// it.
    pub async fn update_parent_status(&self, flush: bool) -> Result<(), StoreError> {
        let parent = match self.parent().await {
            Ok(Some(p)) => p,
            // No parent declared, or the parent is already gone —
            // nothing to roll up into.
            Ok(None) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let self_mode = if flush {
            AggregateSelf::Exclude
        } else {
            AggregateSelf::Include
        };

        let mut attempt: u32 = 0;
        loop {
            let mut latest: ResourceQuota = match self.store.get(&parent.meta.name).await {
                Ok(p) => p,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };

            let (used, members) = self.aggregate_children(&latest, self_mode).await?;
            latest.status.used = Some(used);
            latest.status.sub_resource_quotas = Some(members);

            match self.store.update_status(&latest).await {
                Ok(_) => {
                    debug!(
                        parent = %parent.meta.name,
                        flush,
                        "parent quota status propagated"
                    );
                    return Ok(());
                }
                Err(e) if e.is_conflict() && attempt + 1 < CONFLICT_RETRY_ATTEMPTS => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(
                        CONFLICT_RETRY_BASE_MS << attempt.min(6),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-derive the parent's `used` sum and membership set from the
    /// children currently in the store.
    ///
    /// Terminating children are skipped — their claim is released as
    /// soon as deletion is requested, matching what their own flush
    /// reconcile will converge to. The subject itself is spliced in
    /// from `self.current` (or dropped entirely) rather than read back,
    /// so the result reflects the state being committed.
    async fn aggregate_children(
        &self,
        parent: &ResourceQuota,
        self_mode: AggregateSelf,
    ) -> Result<(ResourceList, BTreeSet<String>), StoreError> {
        let subject_name = self.subject().map(|q| q.meta.name.clone());

        // Every hard-limited resource keeps a tracked entry, even at zero.
        let mut used: ResourceList = parent
            .spec
            .hard
            .keys()
            .map(|k| (k.clone(), Quantity::zero()))
            .collect();
        let mut members = BTreeSet::new();

        let children: Vec<ResourceQuota> = self.store.list().await?;
        for child in &children {
            if child.spec.parent_quota.as_deref() != Some(parent.meta.name.as_str()) {
                continue;
            }
            if Some(&child.meta.name) == subject_name.as_ref() {
                continue;
            }
            if child.meta.deletion_timestamp.is_some() {
                continue;
            }
            members.insert(child.sub_resource_id());
            add_list(&mut used, &child.spec.hard);
        }

        if self_mode == AggregateSelf::Include
            && let Some(current) = self.current.as_ref()
        {
            members.insert(current.sub_resource_id());
            add_list(&mut used, &current.spec.hard);
        }

        Ok((used, members))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateSelf {
    Include,
    Exclude,
}

/// Initialize the status of a freshly created quota: `hard` mirrors the
/// spec (structural copy, no aliasing), every hard resource gets a zero
/// usage counter, and the sub-quota set starts empty.
pub fn init_status(quota: &mut ResourceQuota) {
    quota.status.hard = Some(quota.spec.hard.clone());
    quota.status.used = Some(
        quota
            .spec
            .hard
            .keys()
            .map(|k| (k.clone(), Quantity::zero()))
            .collect(),
    );
    quota.status.sub_resource_quotas = Some(BTreeSet::new());
}
