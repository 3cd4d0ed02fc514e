//! Resource quota constants.

/// Finalizer marker that blocks physical deletion of a quota until its
/// contribution has been flushed out of the parent.
pub const QUOTA_FINALIZER: &str = "quota.finalizers.m8s.io";

/// Suffix appended to a child quota name to form its entry in the
/// parent's `subResourceQuotas` set, e.g. `proj-a.quota`.
pub const SUB_RESOURCE_SUFFIX: &str = "quota";

/// Resource names tracked by the platform. Allowance policies iterate
/// this set; resources outside it are ignored by admission.
pub const TRACKED_RESOURCES: &[&str] = &[
    "cpu",
    "memory",
    "requests.cpu",
    "requests.memory",
    "limits.cpu",
    "limits.memory",
    "requests.gpu",
];
