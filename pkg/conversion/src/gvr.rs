use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API group + version, e.g. `apps/v1`. The core group is the empty
/// string and renders as just the version (`v1`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: &str, version: &str) -> Self {
        GroupVersion {
            group: group.to_string(),
            version: version.to_string(),
        }
    }

    /// The `apiVersion` field value carried by objects of this gv.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Parse an `apiVersion` value back into a group/version pair.
    pub fn parse(api_version: &str) -> anyhow::Result<Self> {
        match api_version.split_once('/') {
            Some((group, version)) if !group.is_empty() && !version.is_empty() => {
                Ok(GroupVersion::new(group, version))
            }
            None if !api_version.is_empty() => Ok(GroupVersion::new("", api_version)),
            _ => bail!("invalid apiVersion '{}'", api_version),
        }
    }

    pub fn with_resource(&self, resource: &str) -> GroupVersionResource {
        GroupVersionResource {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: resource.to_string(),
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// Fully qualified resource coordinate, e.g. `apps/v1, resource=deployments`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(&self.group, &self.version)
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, resource={}", self.group_version(), self.resource)
    }
}

/// Parse a Kubernetes api path into `(namespaced, gvr)`.
///
/// Recognized shapes: `/api/{v}/...` for the core group and
/// `/apis/{g}/{v}/...` for named groups, each with an optional
/// `namespaces/{ns}` scope segment.
pub fn parse_url(path: &str) -> anyhow::Result<(bool, GroupVersionResource)> {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        ["api", version, rest @ ..] => parse_scope("", version, rest, path),
        ["apis", group, version, rest @ ..] => parse_scope(group, version, rest, path),
        _ => bail!("unrecognized api path '{}'", path),
    }
}

fn parse_scope(
    group: &str,
    version: &str,
    rest: &[&str],
    path: &str,
) -> anyhow::Result<(bool, GroupVersionResource)> {
    let gvr = |resource: &str| GroupVersionResource {
        group: group.to_string(),
        version: version.to_string(),
        resource: resource.to_string(),
    };
    match rest {
        ["namespaces", _ns, resource, ..] => Ok((true, gvr(resource))),
        [resource, ..] => Ok((false, gvr(resource))),
        [] => bail!("api path '{}' names no resource", path),
    }
}

/// Rewrite the group/version segments of an api path to target a
/// different served version. The rest of the path is untouched.
pub fn convert_url(path: &str, target: &GroupVersionResource) -> anyhow::Result<String> {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let rest = match parts.as_slice() {
        ["api", _version, rest @ ..] => rest,
        ["apis", _group, _version, rest @ ..] => rest,
        _ => bail!("unrecognized api path '{}'", path),
    };

    let prefix = if target.group.is_empty() {
        format!("/api/{}", target.version)
    } else {
        format!("/apis/{}/{}", target.group, target.version)
    };

    if rest.is_empty() {
        Ok(prefix)
    } else {
        Ok(format!("{}/{}", prefix, rest.join("/")))
    }
}
