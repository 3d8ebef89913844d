//! Merge error type.
//!
//! Every failure aborts the whole merge; [`MergeError`] says which input and
//! which address were involved so the message can be acted on without
//! re-running anything.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::codec::DecodeError;
use crate::model::{AddressError, ResourceAddress};

/// Boxed error from a [`StateBackend`](crate::backend::StateBackend).
pub type BackendError = Box<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// AddressConflict
// ---------------------------------------------------------------------------

/// One address defined by two states with diverging instance data.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AddressConflict {
    /// The colliding resource-level address.
    pub address: ResourceAddress,
    /// Fingerprint of the instances already accumulated.
    pub existing: String,
    /// Fingerprint of the incoming instances.
    pub incoming: String,
}

impl fmt::Display for AddressConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (accumulated {}, incoming {})",
            self.address,
            short(&self.existing),
            short(&self.incoming)
        )
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Why a merge failed.
#[derive(Debug, Error)]
pub enum MergeError {
    /// No source states were given.
    #[error("no source states to merge")]
    NoSources,

    /// A payload is malformed or uses an unsupported format version.
    #[error("cannot decode {label}: {source}")]
    Decode {
        /// Which input (`base` or the source label).
        label: String,
        /// Decode failure.
        #[source]
        source: DecodeError,
    },

    /// A payload contains a malformed address.
    #[error("malformed address in {label}: {source}")]
    AddressSyntax {
        /// Which input (`base` or the source label).
        label: String,
        /// Parse failure.
        #[source]
        source: AddressError,
    },

    /// A source defines addresses already accumulated with different
    /// instance data.
    #[error("{}", format_conflicts(label, conflicts))]
    Conflict {
        /// The source that conflicts with the accumulation.
        label: String,
        /// Every conflicting address of that source, in source order.
        conflicts: Vec<AddressConflict>,
    },

    /// The backend failed to move an accepted address.
    #[error("cannot relocate {address} from {label}: {source}")]
    Relocation {
        /// The source being relocated from.
        label: String,
        /// The address that failed to move.
        address: ResourceAddress,
        /// Backend failure.
        #[source]
        source: BackendError,
    },

    /// The backend failed outside a relocation.
    #[error("state backend failed to {operation}: {source}")]
    Backend {
        /// What was being done (`"initialize target state"`, ...).
        operation: String,
        /// Backend failure.
        #[source]
        source: BackendError,
    },

    /// The accumulated state could not be assembled into the result.
    #[error("cannot assemble merged state: {0}")]
    Serialization(String),
}

impl MergeError {
    /// Wrap a decode failure, lifting address syntax errors into
    /// [`MergeError::AddressSyntax`].
    pub(crate) fn decode(label: &str, source: DecodeError) -> Self {
        match source {
            DecodeError::Address { source, .. } => Self::AddressSyntax {
                label: label.to_owned(),
                source,
            },
            source => Self::Decode {
                label: label.to_owned(),
                source,
            },
        }
    }

    /// The addresses this error is about, if any.
    #[must_use]
    pub fn addresses(&self) -> Vec<&ResourceAddress> {
        match self {
            Self::Conflict { conflicts, .. } => conflicts.iter().map(|c| &c.address).collect(),
            Self::Relocation { address, .. } => vec![address],
            Self::Decode {
                source: DecodeError::DuplicateAddress { address },
                ..
            } => vec![address],
            _ => Vec::new(),
        }
    }

    /// Whether this is the routine "inputs disagree" failure rather than a
    /// broken input or environment.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

fn format_conflicts(label: &str, conflicts: &[AddressConflict]) -> String {
    let mut out = format!(
        "{label} conflicts with the merged state at {} address(es):",
        conflicts.len()
    );
    for c in conflicts {
        out.push_str("\n  - ");
        out.push_str(&c.to_string());
    }
    out.push_str(
        "\n  To fix: make sure each resource is tracked by only one of the states, or that every copy of it is identical.",
    );
    out
}
