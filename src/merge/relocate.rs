//! RELOCATE step: carry out a [`MergePlan`] through the state backend.
//!
//! Each address in `to_relocate` is handed to
//! [`StateBackend::relocate`] one at a time, in plan order. The backend call
//! is the only thing that touches the containers; the decoded inventories in
//! [`StagedState`] are updated afterwards so later plans see what was moved.
//!
//! Relocations are serialized. The terraform CLI does not support concurrent
//! writers to one state file.

use crate::backend::StateBackend;
use crate::error::MergeError;
use crate::model::Snapshot;

use super::plan::MergePlan;

/// A backend container paired with the decoded view of its contents.
#[derive(Debug)]
pub struct StagedState<C> {
    /// Backend handle.
    pub container: C,
    /// What the container holds, as far as the merge engine is concerned.
    pub snapshot: Snapshot,
}

impl<C> StagedState<C> {
    /// Pair a container with its decoded contents.
    pub const fn new(container: C, snapshot: Snapshot) -> Self {
        Self {
            container,
            snapshot,
        }
    }
}

/// Move every address in `plan.to_relocate` from `source` into `target`.
///
/// Skipped addresses stay where they are. The first backend failure aborts
/// the call; addresses already moved are not moved back.
///
/// # Errors
/// [`MergeError::Relocation`] naming the address the backend failed on.
pub fn apply<B: StateBackend>(
    backend: &B,
    target: &mut StagedState<B::Container>,
    source: &mut StagedState<B::Container>,
    label: &str,
    plan: &MergePlan,
) -> Result<(), MergeError> {
    debug_assert!(plan.is_clean(), "conflicting plans must not be applied");

    for address in &plan.to_relocate {
        backend
            .relocate(address, &mut source.container, &mut target.container)
            .map_err(|e| MergeError::Relocation {
                label: label.to_owned(),
                address: address.clone(),
                source: Box::new(e),
            })?;

        let entry = source.snapshot.take(address).ok_or_else(|| {
            MergeError::Serialization(format!(
                "plan for {label} names {address}, which the source does not hold"
            ))
        })?;
        target.snapshot.resources.push(entry);
        tracing::debug!(%address, source = label, "relocated");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::codec;
    use crate::model::ResourceAddress;

    const SOURCE: &str = r#"{
  "version": 4, "serial": 1, "lineage": "src",
  "resources": [
    {"mode": "managed", "type": "null_resource", "name": "a", "provider": "p",
     "instances": [{"attributes": {"id": "1"}, "private": "YQ=="}]},
    {"mode": "managed", "type": "null_resource", "name": "b", "provider": "p",
     "instances": [{"attributes": {"id": "2"}}]}
  ]
}"#;

    fn staged(backend: &MemoryBackend, payload: &str) -> StagedState<Snapshot> {
        StagedState::new(
            backend.load(payload.as_bytes()).unwrap(),
            codec::read(payload.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn relocates_only_planned_addresses() {
        let backend = MemoryBackend::new();
        let mut target = StagedState::new(backend.init_empty().unwrap(), Snapshot::empty("t"));
        let mut source = staged(&backend, SOURCE);
        let a = ResourceAddress::parse("null_resource.a").unwrap();
        let b = ResourceAddress::parse("null_resource.b").unwrap();
        let plan = MergePlan {
            to_relocate: vec![a.clone()],
            to_skip: vec![b.clone()],
            conflicting: Vec::new(),
        };

        apply(&backend, &mut target, &mut source, "src", &plan).unwrap();

        assert!(target.container.contains(&a));
        assert!(target.snapshot.contains(&a));
        assert!(!target.container.contains(&b));
        assert!(source.container.contains(&b));
        assert_eq!(
            target.snapshot.get(&a).unwrap().instances[0].private.as_deref(),
            Some("YQ==")
        );
    }

    #[test]
    fn backend_failure_names_the_address() {
        let backend = MemoryBackend::new();
        let mut target = StagedState::new(backend.init_empty().unwrap(), Snapshot::empty("t"));
        let mut source = staged(&backend, SOURCE);
        let missing = ResourceAddress::parse("null_resource.zzz").unwrap();
        let plan = MergePlan {
            to_relocate: vec![missing.clone()],
            ..MergePlan::default()
        };

        let err = apply(&backend, &mut target, &mut source, "src", &plan).unwrap_err();
        match err {
            MergeError::Relocation { label, address, .. } => {
                assert_eq!(label, "src");
                assert_eq!(address, missing);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
