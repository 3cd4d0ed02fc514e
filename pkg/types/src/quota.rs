use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::object::{HasStatus, Object, ObjectMeta};
use crate::quantity::ResourceList;
use pkg_constants::quota::{QUOTA_FINALIZER, SUB_RESOURCE_SUFFIX};
use pkg_constants::state::QUOTA_PREFIX;

/// Hierarchical resource quota — limits what a tenant or project may
/// claim, rolled up into its parent quota's `used`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuota {
    pub meta: ObjectMeta,
    pub spec: ResourceQuotaSpec,
    #[serde(default)]
    pub status: ResourceQuotaStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuotaSpec {
    /// Declared ceiling, resource-name → quantity.
    #[serde(default)]
    pub hard: ResourceList,
    /// Name of the ancestor quota this one draws from. Unset for roots.
    #[serde(default)]
    pub parent_quota: Option<String>,
    /// What this quota constrains.
    #[serde(default)]
    pub target: TargetRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetRef {
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TargetKind {
    /// Tree root. Tenant quotas are exempt from the parent overload rule.
    Tenant,
    #[default]
    Project,
}

/// Status is written exclusively by the reconciler. `hard` mirrors
/// `spec.hard`; `used` is the sum of the children's hard limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuotaStatus {
    #[serde(default)]
    pub hard: Option<ResourceList>,
    #[serde(default)]
    pub used: Option<ResourceList>,
    /// Membership set of `{childName}.{suffix}` identifiers.
    #[serde(default)]
    pub sub_resource_quotas: Option<BTreeSet<String>>,
}

/// Lifecycle phase derived from the deletion marker. The wire format
/// stays the timestamp plus finalizer strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Active,
    Finalizing,
}

impl ResourceQuota {
    pub fn new(name: &str, spec: ResourceQuotaSpec) -> Self {
        ResourceQuota {
            meta: ObjectMeta::named(name),
            spec,
            status: ResourceQuotaStatus::default(),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        if self.meta.deletion_timestamp.is_some() {
            LifecyclePhase::Finalizing
        } else {
            LifecyclePhase::Active
        }
    }

    pub fn is_tenant_kind(&self) -> bool {
        self.spec.target.kind == TargetKind::Tenant
    }

    /// Identifier of this quota inside its parent's sub-resource set,
    /// e.g. `proj-a.quota`.
    pub fn sub_resource_id(&self) -> String {
        format!("{}.{}", self.meta.name, SUB_RESOURCE_SUFFIX)
    }

    pub fn has_quota_finalizer(&self) -> bool {
        self.meta.contains_finalizer(QUOTA_FINALIZER)
    }
}

impl Object for ResourceQuota {
    fn store_prefix() -> &'static str {
        QUOTA_PREFIX
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl HasStatus for ResourceQuota {
    type Status = ResourceQuotaStatus;

    fn status(&self) -> &ResourceQuotaStatus {
        &self.status
    }

    fn set_status(&mut self, status: ResourceQuotaStatus) {
        self.status = status;
    }
}
