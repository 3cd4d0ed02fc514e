use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Common metadata carried by every persisted object.
///
/// `resource_version` is the optimistic-locking token: the store bumps
/// it on every write and rejects writes submitted against a stale one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    /// Empty until the object has been persisted.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Present once deletion has been requested; the object stays
    /// visible until all finalizers are removed.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        ObjectMeta {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn contains_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Idempotent add. Returns true if the finalizer was newly added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.contains_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Idempotent remove. Returns true if the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}

/// A persisted object type: serde-round-trippable, carries `ObjectMeta`,
/// and knows its etcd-style key prefix in the store.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Key prefix, e.g. `/registry/resourcequotas/`.
    fn store_prefix() -> &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn store_key(name: &str) -> String {
        format!("{}{}", Self::store_prefix(), name)
    }

    fn name(&self) -> &str {
        &self.meta().name
    }
}

/// Objects with a status subresource the store can write independently
/// of spec.
pub trait HasStatus: Object {
    type Status: Clone;

    fn status(&self) -> &Self::Status;
    fn set_status(&mut self, status: Self::Status);
}
