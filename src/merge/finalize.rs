//! FINALIZE step: bookkeeping fields and the result bytes.
//!
//! - `serial` is the number of merged units: every source, plus the base
//!   when one was given.
//! - `lineage` is kept from the base, or freshly generated when there is no
//!   base, so two base-less merges never share a lineage.
//! - `outputs` come from the base only; sources' outputs are not merged.
//!
//! The result is built from what the backend actually holds (its
//! serialization of the target container), not from the engine's decoded
//! inventory, so anything the backend rewrote on the way is kept.

use std::collections::{BTreeMap, BTreeSet};

use crate::backend::StateBackend;
use crate::codec;
use crate::error::MergeError;
use crate::model::Snapshot;

use super::relocate::StagedState;

/// The finished result.
#[derive(Clone, Debug, PartialEq)]
pub struct Finalized {
    /// Encoded merged state.
    pub bytes: Vec<u8>,
    /// Revision counter written to the result.
    pub serial: u64,
    /// Lineage written to the result.
    pub lineage: String,
}

/// Serial of a merge of `merged_count` sources.
#[must_use]
pub const fn merged_serial(merged_count: u64, had_base: bool) -> u64 {
    if had_base {
        merged_count + 1
    } else {
        merged_count
    }
}

/// Assemble the merged state.
///
/// # Errors
/// [`MergeError::Backend`] if the backend cannot serialize the target, and
/// [`MergeError::Serialization`] if what it returns cannot be decoded,
/// disagrees with the accumulated inventory, or cannot be re-encoded.
pub fn finalize<B: StateBackend>(
    backend: &B,
    target: &StagedState<B::Container>,
    merged_count: u64,
    base: Option<&Snapshot>,
) -> Result<Finalized, MergeError> {
    let raw = backend
        .serialize(&target.container)
        .map_err(|e| MergeError::Backend {
            operation: "serialize the merged state".to_owned(),
            source: Box::new(e),
        })?;
    let mut merged = codec::read(&raw).map_err(|e| {
        MergeError::Serialization(format!("backend returned an unreadable state: {e}"))
    })?;

    let held: BTreeSet<_> = merged.addresses().into_iter().collect();
    let expected: BTreeSet<_> = target.snapshot.addresses().into_iter().collect();
    if held != expected {
        let missing: Vec<String> = expected.difference(&held).map(ToString::to_string).collect();
        let unexpected: Vec<String> = held.difference(&expected).map(ToString::to_string).collect();
        return Err(MergeError::Serialization(format!(
            "merged state diverged from the accumulated inventory (missing: [{}], unexpected: [{}])",
            missing.join(", "),
            unexpected.join(", ")
        )));
    }

    merged.serial = merged_serial(merged_count, base.is_some());
    merged.lineage = match base {
        Some(b) if !b.lineage.is_empty() => b.lineage.clone(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    merged.outputs = base.map_or_else(BTreeMap::new, |b| b.outputs.clone());

    let bytes = codec::encode(&merged)
        .map_err(|e| MergeError::Serialization(format!("cannot encode merged state: {e}")))?;

    Ok(Finalized {
        bytes,
        serial: merged.serial,
        lineage: merged.lineage,
    })
}
