//! PLAN step: split an incoming state against the accumulation.
//!
//! Every resource block of the incoming state lands in exactly one bucket:
//!
//! - **relocate**: address not yet accumulated, move it over.
//! - **skip**: address accumulated with byte-identical instance data; the
//!   same physical resource described twice, nothing to move.
//! - **conflicting**: address accumulated with different instance data.
//!
//! ```text
//! accumulated: null_resource.a {id=1}   null_resource.b {id=2}
//! incoming:    null_resource.a {id=1}   null_resource.b {id=9}   null_resource.c {id=3}
//!
//! plan:        skip [a]   conflicting [b]   relocate [c]
//! ```
//!
//! Treating every collision as fatal would make overlapping states (two
//! states cut from a shared base) unmergeable; treating every collision as
//! benign would silently drop diverged resources. Comparing instance data is
//! what separates the two.

use crate::error::AddressConflict;
use crate::model::{ResourceAddress, Snapshot};

/// What to do with each address of one incoming state.
///
/// All three lists are disjoint and in incoming document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// New addresses to move into the accumulation.
    pub to_relocate: Vec<ResourceAddress>,
    /// Duplicates of accumulated entries.
    pub to_skip: Vec<ResourceAddress>,
    /// Collisions with diverging instance data.
    pub conflicting: Vec<AddressConflict>,
}

impl MergePlan {
    /// Returns `true` if nothing conflicts and the plan may be applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicting.is_empty()
    }

    /// Number of addresses covered by the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_relocate.len() + self.to_skip.len() + self.conflicting.len()
    }

    /// Returns `true` if the incoming state had no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute the plan for merging `incoming` into `target`.
///
/// The scan does not stop at the first conflict: the plan lists every
/// conflicting address so the error can report all of them at once.
#[must_use]
pub fn plan(target: &Snapshot, incoming: &Snapshot) -> MergePlan {
    let accumulated = target.index();
    let mut plan = MergePlan::default();

    for entry in &incoming.resources {
        match accumulated.get(&entry.address) {
            None => plan.to_relocate.push(entry.address.clone()),
            Some(existing) if existing.same_instance_data(entry) => {
                tracing::debug!(address = %entry.address, "duplicate of accumulated entry");
                plan.to_skip.push(entry.address.clone());
            }
            Some(existing) => {
                tracing::warn!(address = %entry.address, "conflicting instance data");
                plan.conflicting.push(AddressConflict {
                    address: entry.address.clone(),
                    existing: existing.fingerprint(),
                    incoming: entry.fingerprint(),
                });
            }
        }
    }

    plan
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::codec;

    fn state(resources: Value) -> Snapshot {
        codec::read(
            &serde_json::to_vec(&json!({
                "version": 4,
                "serial": 1,
                "lineage": "l",
                "resources": resources,
            }))
            .unwrap(),
        )
        .unwrap()
    }

    fn res(module: Option<&str>, name: &str, id: &str) -> Value {
        let mut r = json!({
            "mode": "managed",
            "type": "null_resource",
            "name": name,
            "provider": "provider[\"registry.terraform.io/hashicorp/null\"]",
            "instances": [{
                "schema_version": 0,
                "attributes": {"id": id, "triggers": null},
                "sensitive_attributes": [],
                "private": "bnVsbA=="
            }]
        });
        if let Some(m) = module {
            r["module"] = json!(m);
        }
        r
    }

    fn names(addrs: &[ResourceAddress]) -> Vec<String> {
        addrs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_target_relocates_everything() {
        let target = state(json!([]));
        let incoming = state(json!([res(None, "a", "1"), res(None, "b", "2")]));
        let p = plan(&target, &incoming);
        assert_eq!(names(&p.to_relocate), ["null_resource.a", "null_resource.b"]);
        assert!(p.to_skip.is_empty());
        assert!(p.is_clean());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn three_way_split() {
        let target = state(json!([res(None, "a", "1"), res(None, "b", "2")]));
        let incoming = state(json!([
            res(None, "a", "1"),
            res(None, "b", "9"),
            res(None, "c", "3"),
        ]));
        let p = plan(&target, &incoming);
        assert_eq!(names(&p.to_relocate), ["null_resource.c"]);
        assert_eq!(names(&p.to_skip), ["null_resource.a"]);
        assert_eq!(p.conflicting.len(), 1);
        assert_eq!(p.conflicting[0].address.to_string(), "null_resource.b");
        assert_ne!(p.conflicting[0].existing, p.conflicting[0].incoming);
        assert!(!p.is_clean());
    }

    #[test]
    fn all_conflicts_are_reported_in_incoming_order() {
        let target = state(json!([res(None, "a", "1"), res(None, "b", "2")]));
        let incoming = state(json!([res(None, "b", "x"), res(None, "a", "y")]));
        let p = plan(&target, &incoming);
        let conflicted: Vec<String> = p.conflicting.iter().map(|c| c.address.to_string()).collect();
        assert_eq!(conflicted, ["null_resource.b", "null_resource.a"]);
    }

    #[test]
    fn module_instances_never_collide() {
        let target = state(json!([res(Some("module.m[0]"), "a", "1")]));
        let incoming = state(json!([res(Some("module.m[1]"), "a", "2")]));
        let p = plan(&target, &incoming);
        assert_eq!(names(&p.to_relocate), ["module.m[1].null_resource.a"]);
        assert!(p.is_clean());
    }

    #[test]
    fn same_module_path_collides() {
        let target = state(json!([res(Some("module.m"), "a", "1")]));
        let incoming = state(json!([res(Some("module.m"), "a", "2")]));
        let p = plan(&target, &incoming);
        assert_eq!(p.conflicting.len(), 1);
    }

    #[test]
    fn legacy_flat_attributes_decide_conflicts() {
        let legacy = |id: &str| {
            json!({
                "mode": "managed",
                "type": "null_resource",
                "name": "legacy",
                "provider": "provider[\"registry.terraform.io/hashicorp/null\"]",
                "instances": [{"schema_version": 0, "attributes_flat": {"id": id}}]
            })
        };
        let target = state(json!([legacy("1")]));

        let p = plan(&target, &state(json!([legacy("2")])));
        assert_eq!(p.conflicting.len(), 1);
        assert!(p.to_skip.is_empty());

        let p = plan(&target, &state(json!([legacy("1")])));
        assert_eq!(names(&p.to_skip), ["null_resource.legacy"]);
    }

    #[test]
    fn empty_incoming() {
        let target = state(json!([res(None, "a", "1")]));
        let p = plan(&target, &state(json!([])));
        assert!(p.is_empty());
        assert!(p.is_clean());
    }
}
