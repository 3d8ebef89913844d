//! Core data model: addresses and decoded state inventories.

pub mod address;
pub mod snapshot;

pub use address::{
    AddressError, InstanceKey, Mode, ModulePath, ModuleStep, ResourceAddress, same_module_family,
};
pub use snapshot::{InstanceRecord, ResourceEntry, STATE_FORMAT_VERSION, Snapshot};
