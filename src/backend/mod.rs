//! State backend trait.
//!
//! A backend is the external capability that physically holds state
//! containers and moves resource blocks between them. The merge engine only
//! decides *what* to move; *how* a block is moved (and whatever
//! format-version or provider-version metadata has to be rewritten on the
//! way) belongs to the backend.
//!
//! Two implementations ship with the crate:
//!
//! - [`memory::MemoryBackend`]: containers are decoded snapshots held in
//!   process. No external tool involved.
//! - [`terraform::TerraformBackend`]: containers are state files in a scratch
//!   directory, relocation runs `terraform state mv`.

pub mod memory;
pub mod terraform;

use crate::model::ResourceAddress;

/// The four-operation capability the merge engine drives.
///
/// # Key Invariants
///
/// - **Address preservation**: `relocate` moves the block at `address` from
///   one container to the other under the same address. It never renames.
/// - **Atomic per entry**: a block moves with all of its instances, private
///   payloads and dependency edges, or not at all.
/// - **Container isolation**: containers created by one backend value are
///   not shared with any other backend value.
#[allow(clippy::missing_errors_doc)]
pub trait StateBackend {
    /// Handle to one state container.
    type Container;

    /// The error type returned by backend operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create an empty container to accumulate into.
    fn init_empty(&self) -> Result<Self::Container, Self::Error>;

    /// Create a container holding the given state payload.
    fn load(&self, payload: &[u8]) -> Result<Self::Container, Self::Error>;

    /// Move the resource block at `address` from `from` into `to`.
    ///
    /// # Invariants
    /// - On success the block is present in `to` and absent from `from`.
    /// - On failure neither container holds a partial copy of the block.
    fn relocate(
        &self,
        address: &ResourceAddress,
        from: &mut Self::Container,
        to: &mut Self::Container,
    ) -> Result<(), Self::Error>;

    /// Serialize a container to state bytes.
    fn serialize(&self, container: &Self::Container) -> Result<Vec<u8>, Self::Error>;
}
