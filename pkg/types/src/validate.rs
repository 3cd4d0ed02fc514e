use anyhow::{Result, bail};

use crate::quota::ResourceQuota;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Structural validation of a quota object, run before any store write.
pub fn validate_quota(quota: &ResourceQuota) -> Result<()> {
    validate_name(&quota.meta.name)?;

    if let Some(parent) = &quota.spec.parent_quota {
        validate_name(parent)?;
        if parent == &quota.meta.name {
            bail!("quota '{}' must not name itself as parent", quota.meta.name);
        }
    }

    if quota.spec.target.name.is_empty() {
        bail!("quota '{}' has an empty target name", quota.meta.name);
    }

    Ok(())
}
