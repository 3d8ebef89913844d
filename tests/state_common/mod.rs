//! Shared fixtures for merge integration tests.
#![allow(dead_code)]
//!
//! [`StateBuilder`] assembles version-4 state documents from resource
//! blocks built with [`null_resource`]; [`FlakyBackend`] wraps the in-memory
//! backend and fails on a chosen address.

use std::cell::Cell;

use serde_json::{Value, json};
use tfmerge::backend::StateBackend;
use tfmerge::backend::memory::{MemoryBackend, MemoryBackendError};
use tfmerge::merge::Source;
use tfmerge::model::{ResourceAddress, Snapshot};

pub const NULL_PROVIDER: &str = "provider[\"registry.terraform.io/hashicorp/null\"]";
pub const FIXED_LINEAGE: &str = "00000000-0000-0000-0000-000000000000";

// ---------------------------------------------------------------------------
// Resource blocks
// ---------------------------------------------------------------------------

/// A `null_resource` block with a single instance whose `id` is `id`.
pub fn null_resource(module: Option<&str>, name: &str, id: &str) -> Value {
    resource_block(
        module,
        name,
        vec![json!({
            "schema_version": 0,
            "attributes": {"id": id, "triggers": null},
            "sensitive_attributes": [],
            "private": "bnVsbA=="
        })],
    )
}

/// A `null_resource` block with the given instance objects.
pub fn resource_block(module: Option<&str>, name: &str, instances: Vec<Value>) -> Value {
    let mut block = json!({
        "mode": "managed",
        "type": "null_resource",
        "name": name,
        "provider": NULL_PROVIDER,
        "instances": instances,
    });
    if let Some(m) = module {
        block["module"] = json!(m);
    }
    block
}

// ---------------------------------------------------------------------------
// StateBuilder
// ---------------------------------------------------------------------------

/// Builds a state document.
#[derive(Clone, Debug)]
pub struct StateBuilder {
    serial: u64,
    lineage: String,
    outputs: Value,
    resources: Vec<Value>,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self {
            serial: 1,
            lineage: uuid_like(),
            outputs: json!({}),
            resources: Vec::new(),
        }
    }

    pub fn lineage(mut self, lineage: &str) -> Self {
        self.lineage = lineage.to_owned();
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    pub fn output(mut self, name: &str, value: Value) -> Self {
        self.outputs[name] = json!({"value": value, "type": "string"});
        self
    }

    pub fn resource(mut self, block: Value) -> Self {
        self.resources.push(block);
        self
    }

    pub fn to_value(&self) -> Value {
        json!({
            "version": 4,
            "terraform_version": "1.2.8",
            "serial": self.serial,
            "lineage": self.lineage,
            "outputs": self.outputs,
            "resources": self.resources,
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.to_value()).expect("encode fixture")
    }

    pub fn source(&self, label: &str) -> Source {
        Source::new(label, self.bytes())
    }
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("11111111-0000-4000-8000-{:012x}", NEXT.fetch_add(1, Ordering::Relaxed))
}

/// An empty base state with the fixed lineage and serial 1.
pub fn empty_base() -> Vec<u8> {
    StateBuilder::new().lineage(FIXED_LINEAGE).bytes()
}

// ---------------------------------------------------------------------------
// Inspecting results
// ---------------------------------------------------------------------------

/// Decode merged bytes.
pub fn decode(bytes: &[u8]) -> Snapshot {
    tfmerge::codec::read(bytes).expect("merged output decodes")
}

/// Resource-level addresses in a merged state, sorted.
pub fn addresses(bytes: &[u8]) -> Vec<String> {
    let mut out: Vec<String> = decode(bytes)
        .resources
        .iter()
        .map(|r| r.address.to_string())
        .collect();
    out.sort();
    out
}

pub fn addr(s: &str) -> ResourceAddress {
    ResourceAddress::parse(s).expect("valid address")
}

// ---------------------------------------------------------------------------
// FlakyBackend
// ---------------------------------------------------------------------------

/// In-memory backend that fails relocation of one address and counts calls.
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_on: ResourceAddress,
    pub relocations: Cell<usize>,
}

impl FlakyBackend {
    pub fn new(fail_on: ResourceAddress) -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_on,
            relocations: Cell::new(0),
        }
    }
}

impl StateBackend for FlakyBackend {
    type Container = Snapshot;
    type Error = MemoryBackendError;

    fn init_empty(&self) -> Result<Snapshot, MemoryBackendError> {
        self.inner.init_empty()
    }

    fn load(&self, payload: &[u8]) -> Result<Snapshot, MemoryBackendError> {
        self.inner.load(payload)
    }

    fn relocate(
        &self,
        address: &ResourceAddress,
        from: &mut Snapshot,
        to: &mut Snapshot,
    ) -> Result<(), MemoryBackendError> {
        self.relocations.set(self.relocations.get() + 1);
        if address == &self.fail_on {
            return Err(MemoryBackendError::NotFound {
                address: address.clone(),
            });
        }
        self.inner.relocate(address, from, to)
    }

    fn serialize(&self, container: &Snapshot) -> Result<Vec<u8>, MemoryBackendError> {
        self.inner.serialize(container)
    }
}
