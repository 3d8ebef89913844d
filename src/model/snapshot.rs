//! In-memory inventory of a state document.
//!
//! Everything provider-specific (attributes, private blobs, sensitive
//! markers, unknown keys) is held as opaque JSON and written back unchanged.
//! The only parts the merge engine interprets are addresses and the
//! bookkeeping fields `serial`, `lineage` and `outputs`.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::address::{InstanceKey, ResourceAddress};

/// The only state format version this crate reads and writes.
pub const STATE_FORMAT_VERSION: u64 = 4;

// ---------------------------------------------------------------------------
// InstanceRecord
// ---------------------------------------------------------------------------

/// One materialized instance of a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    /// `count`/`for_each` key, `None` for single-instance resources.
    pub index_key: Option<InstanceKey>,
    /// Provider schema version the attributes were written with.
    pub schema_version: u64,
    /// Provider attributes (opaque).
    pub attributes: Option<Value>,
    /// Sensitive attribute paths (opaque).
    pub sensitive_attributes: Option<Value>,
    /// Provider private data, base64 (opaque).
    pub private: Option<String>,
    /// Resources this instance depends on.
    pub dependencies: Option<Vec<ResourceAddress>>,
    /// Every other instance key (`status`, `deposed`, `create_before_destroy`, ...).
    pub extra: BTreeMap<String, Value>,
}

impl InstanceRecord {
    /// Instance keys outside the typed fields that still describe the
    /// physical object: the legacy flatmap attributes of upgraded states,
    /// the `tainted` marker and the deposed-object key.
    pub const IDENTITY_EXTRA_KEYS: [&'static str; 3] = ["attributes_flat", "status", "deposed"];

    /// Canonical bytes of the identity-relevant instance data: instance key,
    /// attributes (structured and legacy flatmap), sensitive markers,
    /// private payload, status and deposed key.
    ///
    /// Two records with equal canonical bytes describe the same physical
    /// instance.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let key = match &self.index_key {
            None => Value::Null,
            Some(InstanceKey::Int(i)) => Value::from(*i),
            Some(InstanceKey::Str(s)) => Value::from(s.as_str()),
        };
        let mut doc = vec![
            key,
            self.attributes.clone().unwrap_or(Value::Null),
            self.sensitive_attributes.clone().unwrap_or(Value::Null),
            self.private.clone().map_or(Value::Null, Value::from),
        ];
        doc.extend(
            Self::IDENTITY_EXTRA_KEYS
                .iter()
                .map(|k| self.extra.get(*k).cloned().unwrap_or(Value::Null)),
        );
        // Value maps are sorted, so the encoding does not depend on the key
        // order of the source document.
        serde_json::to_vec(&Value::Array(doc)).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// ResourceEntry
// ---------------------------------------------------------------------------

/// A resource block: one address and all of its instances.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceEntry {
    /// Resource-level address (no instance key).
    pub address: ResourceAddress,
    /// `each` mode (`list` or `map`) for counted/`for_each` resources.
    pub each: Option<String>,
    /// Provider configuration reference, e.g. `provider["registry.terraform.io/hashicorp/null"]`.
    pub provider: String,
    /// Instances in document order.
    pub instances: Vec<InstanceRecord>,
}

impl ResourceEntry {
    /// Schema version of the first instance (all instances of a resource
    /// share one provider schema).
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.instances.first().map_or(0, |i| i.schema_version)
    }

    /// Whether `other` carries byte-identical instance data, element-wise,
    /// bound to the same provider configuration.
    #[must_use]
    pub fn same_instance_data(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.instances.len() == other.instances.len()
            && self
                .instances
                .iter()
                .zip(&other.instances)
                .all(|(a, b)| a.canonical_bytes() == b.canonical_bytes())
    }

    /// SHA-256 over the provider reference and the canonical bytes of every
    /// instance, lowercase hex.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.as_bytes());
        hasher.update(b"\n");
        for inst in &self.instances {
            hasher.update(inst.canonical_bytes());
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A decoded state document.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Revision counter (`serial`).
    pub serial: u64,
    /// Lineage identifier.
    pub lineage: String,
    /// Root module outputs (opaque values).
    pub outputs: BTreeMap<String, Value>,
    /// Resource blocks in document order.
    pub resources: Vec<ResourceEntry>,
    /// Other top-level keys (`terraform_version`, `check_results`, ...).
    pub extra: BTreeMap<String, Value>,
}

impl Snapshot {
    /// An empty state with the given lineage.
    #[must_use]
    pub fn empty(lineage: impl Into<String>) -> Self {
        Self {
            serial: 0,
            lineage: lineage.into(),
            outputs: BTreeMap::new(),
            resources: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Look up a resource block by its resource-level address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceEntry> {
        self.resources.iter().find(|r| &r.address == address)
    }

    /// Whether a resource block with this address exists.
    #[must_use]
    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.get(address).is_some()
    }

    /// Address → entry index for repeated lookups.
    #[must_use]
    pub fn index(&self) -> HashMap<&ResourceAddress, &ResourceEntry> {
        self.resources.iter().map(|r| (&r.address, r)).collect()
    }

    /// Resource-level addresses in document order.
    #[must_use]
    pub fn addresses(&self) -> Vec<&ResourceAddress> {
        self.resources.iter().map(|r| &r.address).collect()
    }

    /// Remove and return the resource block at `address`.
    pub fn take(&mut self, address: &ResourceAddress) -> Option<ResourceEntry> {
        let pos = self.resources.iter().position(|r| &r.address == address)?;
        Some(self.resources.remove(pos))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
