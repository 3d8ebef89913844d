//! Reading and writing Terraform state documents (format version 4).
//!
//! [`read`] turns a payload into a [`Snapshot`]; [`encode`] writes one back.
//! The wire structs below mirror the JSON layout and capture unknown keys
//! with `#[serde(flatten)]` so they survive a read/encode cycle.
//!
//! The state format stores the module path as a flat string on each
//! resource block (`"module": "module.a[0].module.b"`); [`read`] explodes it
//! into a [`ModulePath`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    AddressError, InstanceKey, InstanceRecord, Mode, ModulePath, ResourceAddress, ResourceEntry,
    STATE_FORMAT_VERSION, Snapshot,
};

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// A state payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not JSON, or does not have the state document shape.
    #[error("malformed state document: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level `version` field is absent.
    #[error("state document has no `version` field")]
    MissingVersion,

    /// The document uses a format version other than 4.
    #[error("unsupported state format version {found} (only version 4 is supported)")]
    UnsupportedVersion {
        /// The version as written in the document.
        found: Value,
    },

    /// A `module`, dependency, or derived resource address is malformed.
    #[error("resource #{index}: {source}")]
    Address {
        /// Position of the resource block in `resources`.
        index: usize,
        /// Parse failure.
        #[source]
        source: AddressError,
    },

    /// A resource block has an invalid field value.
    #[error("resource #{index}: {reason}")]
    InvalidResource {
        /// Position of the resource block in `resources`.
        index: usize,
        /// What is wrong.
        reason: String,
    },

    /// Two resource blocks in one document share an address.
    #[error("resource address {address} appears more than once in the same state")]
    DuplicateAddress {
        /// The repeated address.
        address: ResourceAddress,
    },
}

impl DecodeError {
    /// The address syntax error behind this failure, if that is what it is.
    #[must_use]
    pub const fn address_error(&self) -> Option<&AddressError> {
        match self {
            Self::Address { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct StateDoc {
    version: u64,
    #[serde(default)]
    serial: u64,
    #[serde(default)]
    lineage: String,
    #[serde(default)]
    outputs: BTreeMap<String, Value>,
    #[serde(default)]
    resources: Vec<ResourceDoc>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ResourceDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module: Option<String>,
    mode: String,
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    each: Option<String>,
    provider: String,
    instances: Vec<InstanceDoc>,
}

#[derive(Debug, Deserialize, Serialize)]
struct InstanceDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index_key: Option<Value>,
    #[serde(default)]
    schema_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sensitive_attributes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependencies: Option<Vec<String>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// read
// ---------------------------------------------------------------------------

/// Decode a state payload.
///
/// The format version is checked before anything else, so a document from a
/// different format generation fails with [`DecodeError::UnsupportedVersion`]
/// rather than a confusing shape error.
///
/// # Errors
/// Returns [`DecodeError`] on malformed JSON, an unsupported or missing
/// version, a malformed address, or an address repeated within the document.
pub fn read(payload: &[u8]) -> Result<Snapshot, DecodeError> {
    let raw: Value = serde_json::from_slice(payload)?;
    match raw.get("version") {
        None | Some(Value::Null) => return Err(DecodeError::MissingVersion),
        Some(v) if v.as_u64() == Some(STATE_FORMAT_VERSION) => {}
        Some(v) => return Err(DecodeError::UnsupportedVersion { found: v.clone() }),
    }

    let doc: StateDoc = serde_json::from_value(raw)?;
    let mut seen = HashSet::new();
    let mut resources = Vec::with_capacity(doc.resources.len());
    for (index, res) in doc.resources.into_iter().enumerate() {
        let entry = decode_resource(index, res)?;
        if !seen.insert(entry.address.clone()) {
            return Err(DecodeError::DuplicateAddress {
                address: entry.address,
            });
        }
        resources.push(entry);
    }

    Ok(Snapshot {
        serial: doc.serial,
        lineage: doc.lineage,
        outputs: doc.outputs,
        resources,
        extra: doc.extra,
    })
}

fn decode_resource(index: usize, res: ResourceDoc) -> Result<ResourceEntry, DecodeError> {
    let module = ModulePath::parse(res.module.as_deref().unwrap_or(""))
        .map_err(|source| DecodeError::Address { index, source })?;
    let mode: Mode = res
        .mode
        .parse()
        .map_err(|reason| DecodeError::InvalidResource { index, reason })?;
    let address = ResourceAddress::new(module, mode, res.resource_type, res.name);

    // Round-trip the assembled address through the parser so that type and
    // name are held to the same identifier rules as address strings.
    let rendered = address.to_string();
    ResourceAddress::parse(&rendered).map_err(|source| DecodeError::Address { index, source })?;

    let instances = res
        .instances
        .into_iter()
        .map(|inst| decode_instance(index, inst))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResourceEntry {
        address,
        each: res.each,
        provider: res.provider,
        instances,
    })
}

fn decode_instance(index: usize, inst: InstanceDoc) -> Result<InstanceRecord, DecodeError> {
    let index_key = match inst.index_key {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(InstanceKey::Str(s)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Some(InstanceKey::Int(i)),
            None => {
                return Err(DecodeError::InvalidResource {
                    index,
                    reason: format!("index_key {n} is not an integer"),
                });
            }
        },
        Some(other) => {
            return Err(DecodeError::InvalidResource {
                index,
                reason: format!("index_key must be a number or string, got {other}"),
            });
        }
    };

    let dependencies = inst
        .dependencies
        .map(|deps| {
            deps.iter()
                .map(|d| ResourceAddress::parse(d))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|source| DecodeError::Address { index, source })?;

    Ok(InstanceRecord {
        index_key,
        schema_version: inst.schema_version,
        attributes: inst.attributes,
        sensitive_attributes: inst.sensitive_attributes,
        private: inst.private,
        dependencies,
        extra: inst.extra,
    })
}

// ---------------------------------------------------------------------------
// encode
// ---------------------------------------------------------------------------

/// Encode a snapshot as a state document: two-space indented JSON with a
/// trailing newline, the layout terraform itself writes.
///
/// # Errors
/// Returns an error only if JSON serialization fails.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, serde_json::Error> {
    let doc = StateDoc {
        version: STATE_FORMAT_VERSION,
        serial: snapshot.serial,
        lineage: snapshot.lineage.clone(),
        outputs: snapshot.outputs.clone(),
        resources: snapshot.resources.iter().map(encode_resource).collect(),
        extra: snapshot.extra.clone(),
    };
    let mut out = serde_json::to_vec_pretty(&doc)?;
    out.push(b'\n');
    Ok(out)
}

fn encode_resource(entry: &ResourceEntry) -> ResourceDoc {
    let addr = &entry.address;
    ResourceDoc {
        module: (!addr.module.is_root()).then(|| addr.module.to_string()),
        mode: addr.mode.as_str().to_owned(),
        resource_type: addr.resource_type.clone(),
        name: addr.name.clone(),
        each: entry.each.clone(),
        provider: entry.provider.clone(),
        instances: entry.instances.iter().map(encode_instance).collect(),
    }
}

fn encode_instance(inst: &InstanceRecord) -> InstanceDoc {
    InstanceDoc {
        index_key: inst.index_key.as_ref().map(|k| match k {
            InstanceKey::Int(i) => Value::from(*i),
            InstanceKey::Str(s) => Value::from(s.as_str()),
        }),
        schema_version: inst.schema_version,
        attributes: inst.attributes.clone(),
        sensitive_attributes: inst.sensitive_attributes.clone(),
        private: inst.private.clone(),
        dependencies: inst
            .dependencies
            .as_ref()
            .map(|deps| deps.iter().map(ToString::to_string).collect()),
        extra: inst.extra.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
