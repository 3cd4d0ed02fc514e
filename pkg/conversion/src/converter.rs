use anyhow::{Context, bail};
use serde_json::Value;
use std::collections::HashMap;

use crate::gvr::{GroupVersion, GroupVersionResource};

/// Outcome of greeting a cluster with a resource coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreetBack {
    /// The cluster serves the requested group-version as-is.
    PassThrough,
    /// The resource is served, but under a different group-version.
    NeedConvert,
    /// The cluster does not serve this resource at all.
    NotSupport,
}

/// Version-conversion decision logic for one member cluster.
///
/// Holds the table of group-versions the cluster serves per resource,
/// in preference order. The proxy asks `gvr_greeting` whether a request
/// can pass through or must be re-versioned, then uses
/// `decode`/`convert`/`encode` to rewrite request bodies.
#[derive(Debug, Clone, Default)]
pub struct VersionConverter {
    served: HashMap<String, Vec<GroupVersion>>,
}

impl VersionConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that the cluster serves `resource` at `gv`. Earlier
    /// registrations are preferred when recommending a conversion
    /// target.
    pub fn serve(mut self, resource: &str, gv: GroupVersion) -> Self {
        self.served.entry(resource.to_string()).or_default().push(gv);
        self
    }

    /// Decide how the cluster answers for a resource coordinate:
    /// pass-through, convert to a recommended group-version, or not
    /// supported.
    pub fn gvr_greeting(
        &self,
        gvr: &GroupVersionResource,
    ) -> (GreetBack, Option<GroupVersionResource>) {
        match self.served.get(&gvr.resource) {
            None => (GreetBack::NotSupport, None),
            Some(served) if served.contains(&gvr.group_version()) => {
                (GreetBack::PassThrough, None)
            }
            Some(served) => match served.first() {
                Some(preferred) => (
                    GreetBack::NeedConvert,
                    Some(preferred.with_resource(&gvr.resource)),
                ),
                None => (GreetBack::NotSupport, None),
            },
        }
    }

    /// Parse a request body into a JSON object plus the group-version
    /// it claims in `apiVersion`.
    pub fn decode(&self, data: &[u8]) -> anyhow::Result<(Value, GroupVersion)> {
        let obj: Value = serde_json::from_slice(data).context("request body is not json")?;
        let api_version = obj
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if api_version.is_empty() {
            bail!("object carries no apiVersion");
        }
        let gv = GroupVersion::parse(api_version)?;
        Ok((obj, gv))
    }

    /// Re-version an object to the target group-version.
    pub fn convert(&self, mut obj: Value, target: &GroupVersion) -> anyhow::Result<Value> {
        let Some(map) = obj.as_object_mut() else {
            bail!("cannot convert a non-object value");
        };
        map.insert(
            "apiVersion".to_string(),
            Value::String(target.api_version()),
        );
        Ok(obj)
    }

    pub fn encode(&self, obj: &Value) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(obj).context("encode converted object")
    }
}
