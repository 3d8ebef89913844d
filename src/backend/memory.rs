//! In-process state backend.
//!
//! Containers are decoded [`Snapshot`]s; relocation moves the
//! [`ResourceEntry`](crate::model::ResourceEntry) between them. Useful for
//! tests and for callers that already trust the payloads they merge.

use thiserror::Error;

use super::StateBackend;
use crate::codec::{self, DecodeError};
use crate::model::{ResourceAddress, Snapshot};

/// Errors from the in-memory backend.
#[derive(Debug, Error)]
pub enum MemoryBackendError {
    /// The payload handed to `load` did not decode.
    #[error("cannot load state: {0}")]
    Decode(#[from] DecodeError),

    /// The address to move is not in the source container.
    #[error("{address} not found in source state")]
    NotFound {
        /// The missing address.
        address: ResourceAddress,
    },

    /// The destination already holds a block at this address.
    #[error("{address} already exists in destination state")]
    AlreadyExists {
        /// The occupied address.
        address: ResourceAddress,
    },

    /// Encoding the container failed.
    #[error("cannot encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A [`StateBackend`] whose containers live in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend;

impl MemoryBackend {
    /// Create a new in-memory backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StateBackend for MemoryBackend {
    type Container = Snapshot;
    type Error = MemoryBackendError;

    fn init_empty(&self) -> Result<Snapshot, MemoryBackendError> {
        Ok(Snapshot::empty(uuid::Uuid::new_v4().to_string()))
    }

    fn load(&self, payload: &[u8]) -> Result<Snapshot, MemoryBackendError> {
        Ok(codec::read(payload)?)
    }

    fn relocate(
        &self,
        address: &ResourceAddress,
        from: &mut Snapshot,
        to: &mut Snapshot,
    ) -> Result<(), MemoryBackendError> {
        if to.contains(address) {
            return Err(MemoryBackendError::AlreadyExists {
                address: address.clone(),
            });
        }
        let entry = from.take(address).ok_or_else(|| MemoryBackendError::NotFound {
            address: address.clone(),
        })?;
        to.resources.push(entry);
        Ok(())
    }

    fn serialize(&self, container: &Snapshot) -> Result<Vec<u8>, MemoryBackendError> {
        Ok(codec::encode(container)?)
    }
}
