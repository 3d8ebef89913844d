//! State merge engine.
//!
//! Implements the read → plan → relocate → finalize pipeline. Each phase is
//! a separate module:
//!
//! - **read**: decode each payload ([`crate::codec::read`]).
//! - **plan**: split an incoming state against the accumulation into
//!   relocate / skip / conflicting ([`plan`]).
//! - **relocate**: move accepted entries through the state backend ([`relocate`]).
//! - **finalize**: rewrite serial, lineage and outputs, and encode ([`finalize`]).
//!
//! # Ordering
//!
//! Sources are processed strictly in the order given. Each one is planned
//! against everything accumulated before it, so with three or more states
//! the order decides *where* a divergence is reported: given A, B, C where
//! B and C agree on an address but A does not, `[A, B, C]` fails at B and
//! `[B, C, A]` fails at A.
//!
//! # Failure
//!
//! Any error aborts the merge and no bytes are returned. Work already done
//! inside the backend's containers is not rolled back; the containers are
//! private to the merge, so re-running the whole merge is always safe.

pub mod finalize;
pub mod plan;
pub mod relocate;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::instrument;

use crate::backend::StateBackend;
use crate::codec;
use crate::error::MergeError;
use crate::model::{ResourceAddress, Snapshot};

pub use finalize::{Finalized, finalize, merged_serial};
pub use plan::{MergePlan, plan};
pub use relocate::{StagedState, apply};

/// Label used for the base state in errors and reports.
pub const BASE_LABEL: &str = "base";

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// One state to merge, with a label naming it in errors and reports
/// (typically its file path).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    /// Human-readable name.
    pub label: String,
    /// Raw state payload.
    pub payload: Vec<u8>,
}

impl Source {
    /// Create a source.
    pub fn new(label: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What one source contributed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// The source label.
    pub label: String,
    /// Addresses moved into the result.
    pub relocated: Vec<ResourceAddress>,
    /// Addresses absorbed as duplicates of already merged entries.
    pub skipped: Vec<ResourceAddress>,
}

impl SourceReport {
    /// Relocated address counts grouped by module family (module names
    /// without instance keys; the root module is `""`).
    #[must_use]
    pub fn by_module_family(&self) -> BTreeMap<String, usize> {
        let mut families = BTreeMap::new();
        for addr in &self.relocated {
            *families.entry(addr.module_family()).or_insert(0) += 1;
        }
        families
    }
}

/// Summary of a successful merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Serial of the merged state.
    pub serial: u64,
    /// Lineage of the merged state.
    pub lineage: String,
    /// Whether a base state seeded the merge.
    pub had_base: bool,
    /// Per-source contributions, in processing order.
    pub sources: Vec<SourceReport>,
}

/// Merged bytes plus the report describing them.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    /// Encoded merged state.
    pub state: Vec<u8>,
    /// What went into it.
    pub report: MergeReport,
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Merge `sources` (in order) on top of an optional `base` and return the
/// encoded result.
///
/// An absent, empty, or all-whitespace `base` means no base.
///
/// # Errors
/// See [`MergeError`]. No partial output is produced on failure.
pub fn merge<B: StateBackend>(
    backend: &B,
    base: Option<&[u8]>,
    sources: &[Source],
) -> Result<Vec<u8>, MergeError> {
    merge_with_report(backend, base, sources).map(|outcome| outcome.state)
}

/// Like [`merge`], also returning a [`MergeReport`].
///
/// # Errors
/// See [`MergeError`].
#[instrument(skip_all, fields(sources = sources.len()))]
pub fn merge_with_report<B: StateBackend>(
    backend: &B,
    base: Option<&[u8]>,
    sources: &[Source],
) -> Result<MergeOutcome, MergeError> {
    if sources.is_empty() {
        return Err(MergeError::NoSources);
    }

    let base = base.filter(|b| !b.trim_ascii().is_empty());
    let (mut target, base_snapshot) = init_target(backend, base)?;
    tracing::info!(had_base = base_snapshot.is_some(), "merge started");

    let mut reports = Vec::with_capacity(sources.len());
    for src in sources {
        reports.push(merge_source(backend, &mut target, src)?);
    }

    let merged_count = u64::try_from(sources.len()).unwrap_or(u64::MAX);
    let done = finalize(backend, &target, merged_count, base_snapshot.as_ref())?;
    tracing::info!(serial = done.serial, lineage = %done.lineage, "merge finished");

    Ok(MergeOutcome {
        state: done.bytes,
        report: MergeReport {
            serial: done.serial,
            lineage: done.lineage,
            had_base: base_snapshot.is_some(),
            sources: reports,
        },
    })
}

/// Set up the accumulation target: the base state when given, else empty.
fn init_target<B: StateBackend>(
    backend: &B,
    base: Option<&[u8]>,
) -> Result<(StagedState<B::Container>, Option<Snapshot>), MergeError> {
    let Some(payload) = base else {
        let container = backend.init_empty().map_err(|e| MergeError::Backend {
            operation: "initialize an empty target state".to_owned(),
            source: Box::new(e),
        })?;
        return Ok((StagedState::new(container, Snapshot::empty("")), None));
    };

    let snapshot = codec::read(payload).map_err(|e| MergeError::decode(BASE_LABEL, e))?;
    let container = backend.load(payload).map_err(|e| MergeError::Backend {
        operation: "load the base state".to_owned(),
        source: Box::new(e),
    })?;
    Ok((StagedState::new(container, snapshot.clone()), Some(snapshot)))
}

/// Read, plan and relocate one source into the target.
#[instrument(skip_all, fields(source = %src.label))]
fn merge_source<B: StateBackend>(
    backend: &B,
    target: &mut StagedState<B::Container>,
    src: &Source,
) -> Result<SourceReport, MergeError> {
    let snapshot = codec::read(&src.payload).map_err(|e| MergeError::decode(&src.label, e))?;

    let planned = plan(&target.snapshot, &snapshot);
    if !planned.is_clean() {
        return Err(MergeError::Conflict {
            label: src.label.clone(),
            conflicts: planned.conflicting,
        });
    }

    if !planned.to_relocate.is_empty() {
        let container = backend.load(&src.payload).map_err(|e| MergeError::Backend {
            operation: format!("load {}", src.label),
            source: Box::new(e),
        })?;
        let mut source = StagedState::new(container, snapshot);
        apply(backend, target, &mut source, &src.label, &planned)?;
    }

    tracing::info!(
        relocated = planned.to_relocate.len(),
        skipped = planned.to_skip.len(),
        "source merged"
    );
    Ok(SourceReport {
        label: src.label.clone(),
        relocated: planned.to_relocate,
        skipped: planned.to_skip,
    })
}
