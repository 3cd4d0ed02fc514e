use anyhow::bail;
use tracing::info;

use crate::operator::QuotaOperator;
use crate::policy::{allowed_del, allowed_update, is_rely_on_obj};
use pkg_state::client::ObjectStore;
use pkg_types::quota::ResourceQuota;
use pkg_types::validate::validate_quota;

/// Admission-time validator for quota writes.
///
/// Sits in front of the store: a write rejected here never reaches the
/// reconciler. All checks are pure decisions over the submitted objects
/// plus reads of the current tree; nothing is mutated.
pub struct QuotaValidator {
    store: ObjectStore,
}

impl QuotaValidator {
    pub fn new(store: ObjectStore) -> Self {
        QuotaValidator { store }
    }

    pub async fn validate_create(&self, quota: &ResourceQuota) -> anyhow::Result<()> {
        validate_quota(quota)?;

        let operator = QuotaOperator::new(self.store.clone(), Some(quota.clone()), None);
        if let Some(reason) = operator.overload().await? {
            bail!("quota '{}' rejected: {}", quota.meta.name, reason);
        }

        info!("quota {} admitted for create", quota.meta.name);
        Ok(())
    }

    pub async fn validate_update(
        &self,
        current: &ResourceQuota,
        old: &ResourceQuota,
    ) -> anyhow::Result<()> {
        validate_quota(current)?;

        if is_rely_on_obj([Some(old)]) && !allowed_update(current, old) {
            bail!(
                "quota '{}' rejected: hard limits may not drop below observed usage",
                current.meta.name
            );
        }

        let operator = QuotaOperator::new(
            self.store.clone(),
            Some(current.clone()),
            Some(old.clone()),
        );
        if let Some(reason) = operator.overload().await? {
            bail!("quota '{}' rejected: {}", current.meta.name, reason);
        }

        info!("quota {} admitted for update", current.meta.name);
        Ok(())
    }

    pub async fn validate_delete(&self, current: &ResourceQuota) -> anyhow::Result<()> {
        if !allowed_del(current) {
            let count = current
                .status
                .sub_resource_quotas
                .as_ref()
                .map(|s| s.len())
                .unwrap_or(0);
            bail!(
                "quota '{}' rejected: {} sub-resource quota(s) still attached",
                current.meta.name,
                count
            );
        }
        Ok(())
    }
}
