use pkg_constants::quota::TRACKED_RESOURCES;
use pkg_types::quota::ResourceQuota;

/// Whether a spec change is admissible against the last observed usage.
///
/// For every tracked resource: dropping a hard entry that still has
/// recorded usage loses information and is rejected; shrinking a hard
/// limit below the observed usage is rejected (monotonic floor).
pub fn allowed_update(current: &ResourceQuota, old: &ResourceQuota) -> bool {
    for resource in TRACKED_RESOURCES {
        let current_hard = current.spec.hard.get(*resource);
        let old_used = old
            .status
            .used
            .as_ref()
            .and_then(|used| used.get(*resource));

        match (current_hard, old_used) {
            (None, Some(_)) => return false,
            (Some(hard), Some(used)) if hard < used => return false,
            _ => {}
        }
    }
    true
}

/// A quota may only be deleted once no child references it.
pub fn allowed_del(current: &ResourceQuota) -> bool {
    current
        .status
        .sub_resource_quotas
        .as_ref()
        .is_none_or(|subs| subs.is_empty())
}

/// True if any of the given quotas is a real persisted object (has a
/// store-assigned uid).
pub fn is_rely_on_obj<'a, I>(quotas: I) -> bool
where
    I: IntoIterator<Item = Option<&'a ResourceQuota>>,
{
    quotas
        .into_iter()
        .flatten()
        .any(|q| !q.meta.uid.is_empty())
}
