//! Change-set planning
//!
//! Compares the current declarations (validated attributes plus dependency
//! graph) against the prior state snapshot and emits a minimal, ordered
//! change set:
//!
//! - absent from prior state        -> Create
//! - absent from declarations       -> Delete
//! - force_replace attribute differs -> Replace (split into a Delete entry
//!   and a Create entry for the same instance)
//! - any other attribute differs    -> Update
//! - no difference                  -> omitted
//!
//! Ordering is a single constraint graph over change entries: creates and
//! updates come after the creates/updates of their dependencies, deletes
//! come before the deletes of their prior dependencies, and the delete
//! half of a replacement precedes its create half. Kahn's algorithm with
//! a min-heap keyed by declaration order makes identical input produce
//! identical output. A cycle in that graph (replacement interactions, or
//! prior runs that recorded conflicting dependency sets) is reported
//! instead of guessed around.

use crate::cancel::CancelToken;
use crate::diff::{AttributeDiff, creation_diff, deletion_diff, diff_attributes};
use crate::error::PlanError;
use crate::graph::DependencyGraph;
use crate::schema::SchemaRegistry;
use crate::scope::ValidatedScope;
use crate::state::StateSnapshot;
use crate::value::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What happens to one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// One ordered change-set entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ResourceId,
    pub op: Operation,
    /// Set on both halves of a replacement pair
    pub replace: bool,
    pub diff: AttributeDiff,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self.op {
            Operation::Create => "+",
            Operation::Update => "~",
            Operation::Delete => "-",
        };
        write!(f, "{symbol} {}", self.id)?;
        if self.replace {
            write!(f, " (replacement)")?;
        }
        Ok(())
    }
}

/// Ordered sequence of changes; dependencies are created/updated before
/// their dependents, deletions run dependents-first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match (change.op, change.replace) {
                (Operation::Create, false) => summary.create += 1,
                (Operation::Update, _) => summary.update += 1,
                (Operation::Delete, false) => summary.delete += 1,
                // Count each replacement once, on its create half.
                (Operation::Create, true) => summary.replace += 1,
                (Operation::Delete, true) => {}
            }
        }
        summary
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changes.is_empty() {
            return writeln!(f, "No changes.");
        }
        writeln!(f, "Planned changes:")?;
        writeln!(f)?;
        for change in &self.changes {
            writeln!(f, "  {change}")?;
            if change.op != Operation::Delete {
                for field in &change.diff.fields {
                    writeln!(f, "      {field}")?;
                }
            }
        }
        writeln!(f)?;
        write!(f, "{}", self.summary())
    }
}

/// Per-operation counts for a change set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub replace: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete + self.replace
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }

    pub fn merge(&mut self, other: &PlanSummary) {
        self.create += other.create;
        self.update += other.update;
        self.delete += other.delete;
        self.replace += other.replace;
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to delete.",
            self.create, self.update, self.replace, self.delete
        )
    }
}

/// A change entry plus its scheduling metadata
struct Pending {
    change: Change,
    /// Heap key: declaration index for current instances, prior-state
    /// position after them for pure deletes; the delete half of a
    /// replacement sorts before its create half at the same index.
    key: (usize, u8),
}

/// Compute the ordered change set for one declaration scope
///
/// The prior snapshot is read-only here; committing results is the
/// executor's job. Cancellation is checked between per-instance diffs and
/// before each ordering step; a cancelled plan returns an error and
/// discards all partial work.
pub fn plan(
    graph: &DependencyGraph,
    registry: &SchemaRegistry,
    current: &ValidatedScope,
    prior: &StateSnapshot,
    cancel: &CancelToken,
) -> Result<ChangeSet, PlanError> {
    let mut pending: Vec<Pending> = Vec::new();
    // Entry index of the create-like (create/update) change per instance
    let mut create_like: HashMap<ResourceId, usize> = HashMap::new();
    // Entry index of the delete-like change per instance
    let mut delete_like: HashMap<ResourceId, usize> = HashMap::new();

    for (index, (id, attrs)) in current.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PlanError::Cancelled);
        }
        match prior.get(id) {
            None => {
                create_like.insert(id.clone(), pending.len());
                pending.push(Pending {
                    change: Change {
                        id: id.clone(),
                        op: Operation::Create,
                        replace: false,
                        diff: creation_diff(attrs),
                    },
                    key: (index, 1),
                });
            }
            Some(record) => {
                let diff = diff_attributes(&record.attributes, attrs);
                if diff.is_empty() {
                    continue;
                }
                let schema = registry.lookup(&id.kind)?;
                if diff.forces_replace(schema) {
                    delete_like.insert(id.clone(), pending.len());
                    pending.push(Pending {
                        change: Change {
                            id: id.clone(),
                            op: Operation::Delete,
                            replace: true,
                            diff: deletion_diff(&record.attributes),
                        },
                        key: (index, 0),
                    });
                    create_like.insert(id.clone(), pending.len());
                    pending.push(Pending {
                        change: Change {
                            id: id.clone(),
                            op: Operation::Create,
                            replace: true,
                            diff: creation_diff(attrs),
                        },
                        key: (index, 1),
                    });
                } else {
                    create_like.insert(id.clone(), pending.len());
                    pending.push(Pending {
                        change: Change {
                            id: id.clone(),
                            op: Operation::Update,
                            replace: false,
                            diff,
                        },
                        key: (index, 1),
                    });
                }
            }
        }
    }

    // Instances with state but no declaration are deleted. Snapshot order
    // is sorted (kind, name), giving stable keys past the declarations.
    let mut delete_seq = current.len();
    for (id, record) in prior.iter() {
        if current.contains(id) {
            continue;
        }
        delete_like.insert(id.clone(), pending.len());
        pending.push(Pending {
            change: Change {
                id: id.clone(),
                op: Operation::Delete,
                replace: false,
                diff: deletion_diff(&record.attributes),
            },
            key: (delete_seq, 0),
        });
        delete_seq += 1;
    }

    let ordered = order_changes(pending, graph, prior, &create_like, &delete_like, cancel)?;
    let set = ChangeSet { changes: ordered };
    log::debug!("planned {} change(s): {}", set.len(), set.summary());
    Ok(set)
}

/// Topologically order pending entries under the three constraint rules.
fn order_changes(
    pending: Vec<Pending>,
    graph: &DependencyGraph,
    prior: &StateSnapshot,
    create_like: &HashMap<ResourceId, usize>,
    delete_like: &HashMap<ResourceId, usize>,
    cancel: &CancelToken,
) -> Result<Vec<Change>, PlanError> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    fn add_edge(
        successors: &mut [Vec<usize>],
        indegree: &mut [usize],
        before: usize,
        after: usize,
    ) {
        if before != after && !successors[before].contains(&after) {
            successors[before].push(after);
            indegree[after] += 1;
        }
    }

    let n = pending.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree: Vec<usize> = vec![0; n];

    // Creates/updates wait for their dependencies' creates/updates.
    for edge in graph.edges() {
        if let (Some(&source), Some(&target)) = (
            create_like.get(&edge.source),
            create_like.get(&edge.target),
        ) {
            add_edge(&mut successors, &mut indegree, target, source);
        }
    }

    // Deletes run dependents-first, using dependency sets recorded in
    // prior state at apply time.
    for (id, record) in prior.iter() {
        let Some(&dependent) = delete_like.get(id) else {
            continue;
        };
        for dependency in &record.depends_on {
            if let Some(&dep_entry) = delete_like.get(dependency) {
                add_edge(&mut successors, &mut indegree, dependent, dep_entry);
            }
        }
    }

    // The delete half of a replacement precedes its create half.
    for (id, &delete_entry) in delete_like {
        if pending[delete_entry].change.replace
            && let Some(&create_entry) = create_like.get(id)
        {
            add_edge(&mut successors, &mut indegree, delete_entry, create_entry);
        }
    }

    let mut ready: BinaryHeap<Reverse<((usize, u8), usize)>> = (0..n)
        .filter(|&i| indegree[i] == 0)
        .map(|i| Reverse((pending[i].key, i)))
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(n);
    while let Some(Reverse((_, entry))) = ready.pop() {
        if cancel.is_cancelled() {
            return Err(PlanError::Cancelled);
        }
        order.push(entry);
        for &next in &successors[entry] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse((pending[next].key, next)));
            }
        }
    }

    if order.len() < n {
        let (first, second) = conflicting_pair(&pending, &successors, &indegree);
        return Err(PlanError::UnresolvableReplaceOrder { first, second });
    }

    let mut changes: Vec<Option<Change>> = pending.into_iter().map(|p| Some(p.change)).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| changes[i].take())
        .collect())
}

/// Pick two distinct instances off the leftover cycle for diagnostics.
///
/// Every unordered entry still has an unordered predecessor, so walking
/// predecessor edges within the unordered set must revisit a node.
fn conflicting_pair(
    pending: &[Pending],
    successors: &[Vec<usize>],
    indegree: &[usize],
) -> (ResourceId, ResourceId) {
    let n = pending.len();
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (before, afters) in successors.iter().enumerate() {
        for &after in afters {
            predecessors[after].push(before);
        }
    }

    let mut cursor = (0..n).find(|&i| indegree[i] > 0).unwrap_or_default();
    let mut walked: Vec<usize> = Vec::new();
    while !walked.contains(&cursor) {
        walked.push(cursor);
        if let Some(&prev) = predecessors[cursor].iter().find(|&&p| indegree[p] > 0) {
            cursor = prev;
        } else {
            break;
        }
    }
    let first = pending[cursor].change.id.clone();
    let second = walked
        .iter()
        .map(|&i| pending[i].change.id.clone())
        .find(|id| *id != first)
        .unwrap_or_else(|| first.clone());
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttrSchema, Schema};
    use crate::scope::DeclarationScope;
    use crate::state::{CommitEntry, MemoryStateStore, StateRecord, StateStore};
    use crate::value::{AttrValue, SymbolicReference};
    use indexmap::IndexMap;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            "net",
            Schema::new().with_attribute("cidr", AttrSchema::string().required()),
        );
        registry.register(
            "instance",
            Schema::new()
                .with_attribute("net_id", AttrSchema::string())
                .with_attribute("class", AttrSchema::string().force_replace())
                .with_attribute("size", AttrSchema::int()),
        );
        registry
    }

    fn plan_for(
        registry: &SchemaRegistry,
        prior: &StateSnapshot,
        build: impl FnOnce(&mut DeclarationScope),
    ) -> Result<ChangeSet, PlanError> {
        let cancel = CancelToken::new();
        let mut scope = DeclarationScope::new(registry);
        build(&mut scope);
        let current = scope.validate(&cancel).unwrap();
        let graph = DependencyGraph::build(&current).unwrap();
        plan(&graph, registry, &current, prior, &cancel)
    }

    fn ops(set: &ChangeSet) -> Vec<(String, Operation, bool)> {
        set.iter()
            .map(|c| (c.id.to_string(), c.op, c.replace))
            .collect()
    }

    fn record(entries: Vec<(&str, AttrValue)>, depends_on: Vec<ResourceId>) -> StateRecord {
        StateRecord::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<IndexMap<_, _>>(),
            depends_on,
        )
    }

    #[test]
    fn empty_prior_state_creates_in_declaration_order() {
        let registry = registry();
        let set = plan_for(&registry, &StateSnapshot::new(), |s| {
            s.declare("net", "b", [("cidr", AttrValue::from("10.0.0.0/16"))])
                .unwrap();
            s.declare("net", "a", [("cidr", AttrValue::from("10.1.0.0/16"))])
                .unwrap();
        })
        .unwrap();
        assert_eq!(
            ops(&set),
            vec![
                ("net.b".to_string(), Operation::Create, false),
                ("net.a".to_string(), Operation::Create, false),
            ]
        );
    }

    #[test]
    fn identical_state_plans_nothing() {
        let registry = registry();
        let mut prior = StateSnapshot::new();
        prior.insert(
            ResourceId::new("net", "main"),
            record(vec![("cidr", AttrValue::from("10.0.0.0/16"))], vec![]),
        );
        let set = plan_for(&registry, &prior, |s| {
            s.declare("net", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])
                .unwrap();
        })
        .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn attribute_change_is_an_update_with_diff() {
        let registry = registry();
        let mut prior = StateSnapshot::new();
        prior.insert(
            ResourceId::new("instance", "web"),
            record(vec![("size", AttrValue::Int(2))], vec![]),
        );
        let set = plan_for(&registry, &prior, |s| {
            s.declare("instance", "web", [("size", AttrValue::Int(4))])
                .unwrap();
        })
        .unwrap();
        assert_eq!(ops(&set), vec![("instance.web".to_string(), Operation::Update, false)]);
        assert_eq!(set.changes()[0].diff.field_names(), vec!["size"]);
    }

    #[test]
    fn force_replace_change_splits_into_delete_then_create() {
        let registry = registry();
        let mut prior = StateSnapshot::new();
        prior.insert(
            ResourceId::new("instance", "web"),
            record(vec![("class", AttrValue::from("small"))], vec![]),
        );
        let set = plan_for(&registry, &prior, |s| {
            s.declare("instance", "web", [("class", AttrValue::from("large"))])
                .unwrap();
        })
        .unwrap();
        assert_eq!(
            ops(&set),
            vec![
                ("instance.web".to_string(), Operation::Delete, true),
                ("instance.web".to_string(), Operation::Create, true),
            ]
        );
        assert_eq!(set.summary().replace, 1);
        assert_eq!(set.summary().total(), 1);
    }

    #[test]
    fn undeclared_prior_instance_is_deleted() {
        let registry = registry();
        let mut prior = StateSnapshot::new();
        prior.insert(
            ResourceId::new("instance", "web"),
            record(vec![("size", AttrValue::Int(1))], vec![]),
        );
        let set = plan_for(&registry, &prior, |_| {}).unwrap();
        assert_eq!(ops(&set), vec![("instance.web".to_string(), Operation::Delete, false)]);
    }

    #[test]
    fn creates_respect_dependency_order() {
        let registry = registry();
        let set = plan_for(&registry, &StateSnapshot::new(), |s| {
            // Declared dependent-first; ordering must flip them.
            s.declare(
                "instance",
                "web",
                [(
                    "net_id",
                    AttrValue::Ref(SymbolicReference::new(ResourceId::new("net", "main"), "id")),
                )],
            )
            .unwrap();
            s.declare("net", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])
                .unwrap();
        })
        .unwrap();
        assert_eq!(
            ops(&set),
            vec![
                ("net.main".to_string(), Operation::Create, false),
                ("instance.web".to_string(), Operation::Create, false),
            ]
        );
    }

    #[test]
    fn deletes_run_dependents_first_from_recorded_state() {
        let registry = registry();
        // net.a is the dependency and sorts first; only the recorded
        // depends_on edge can push net.b ahead of it.
        let a = ResourceId::new("net", "a");
        let b = ResourceId::new("net", "b");
        let mut prior = StateSnapshot::new();
        prior.insert(
            a.clone(),
            record(vec![("cidr", AttrValue::from("10.0.0.0/16"))], vec![]),
        );
        prior.insert(
            b.clone(),
            record(vec![("cidr", AttrValue::from("10.1.0.0/16"))], vec![a.clone()]),
        );
        let set = plan_for(&registry, &prior, |_| {}).unwrap();
        assert_eq!(
            ops(&set),
            vec![
                ("net.b".to_string(), Operation::Delete, false),
                ("net.a".to_string(), Operation::Delete, false),
            ]
        );
    }

    #[test]
    fn conflicting_prior_dependencies_fail_instead_of_guessing() {
        let registry = registry();
        // Records committed by different runs can disagree; a mutual
        // depends_on between two doomed instances has no valid deletion
        // order under dependents-first.
        let a = ResourceId::new("net", "a");
        let b = ResourceId::new("net", "b");
        let mut prior = StateSnapshot::new();
        prior.insert(
            a.clone(),
            record(vec![("cidr", AttrValue::from("10.0.0.0/16"))], vec![b.clone()]),
        );
        prior.insert(
            b.clone(),
            record(vec![("cidr", AttrValue::from("10.1.0.0/16"))], vec![a.clone()]),
        );
        let err = plan_for(&registry, &prior, |_| {}).unwrap_err();
        let PlanError::UnresolvableReplaceOrder { first, second } = err else {
            panic!("expected unresolvable order");
        };
        assert_ne!(first, second);
        assert!([&a, &b].contains(&&first));
        assert!([&a, &b].contains(&&second));
    }

    #[test]
    fn replace_orders_around_dependents() {
        let registry = registry();
        let net = ResourceId::new("net", "main");
        let web = ResourceId::new("instance", "web");
        let mut prior = StateSnapshot::new();
        prior.insert(
            net.clone(),
            record(vec![("cidr", AttrValue::from("10.0.0.0/16"))], vec![]),
        );
        prior.insert(
            web.clone(),
            record(
                vec![("class", AttrValue::from("small")), ("size", AttrValue::Int(1))],
                vec![net.clone()],
            ),
        );
        let set = plan_for(&registry, &prior, |s| {
            let net_id = s
                .declare("net", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])
                .unwrap();
            let net_ref = s.output_ref(&net_id, "id");
            s.declare(
                "instance",
                "web",
                [
                    ("class", AttrValue::from("large")),
                    ("size", AttrValue::Int(1)),
                    ("net_id", net_ref),
                ],
            )
            .unwrap();
        })
        .unwrap();
        assert_eq!(
            ops(&set),
            vec![
                ("instance.web".to_string(), Operation::Delete, true),
                ("instance.web".to_string(), Operation::Create, true),
            ]
        );
    }

    #[test]
    fn round_trip_apply_then_replan_is_empty() {
        let registry = registry();
        let store = MemoryStateStore::new();
        let cancel = CancelToken::new();

        let declare = |scope: &mut DeclarationScope| {
            let net = scope
                .declare("net", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])
                .unwrap();
            let net_ref = scope.output_ref(&net, "id");
            scope
                .declare("instance", "web", [("net_id", net_ref)])
                .unwrap();
        };

        let mut scope = DeclarationScope::new(&registry);
        declare(&mut scope);
        let current = scope.validate(&cancel).unwrap();
        let graph = DependencyGraph::build(&current).unwrap();
        let prior = store.load().unwrap();
        let set = plan(&graph, &registry, &current, &prior, &cancel).unwrap();
        assert_eq!(set.summary().create, 2);

        // Executor applies the creates and reports results back.
        let batch: Vec<CommitEntry> = set
            .iter()
            .map(|change| {
                let attrs = current.get(&change.id).unwrap().raw().clone();
                CommitEntry::put(
                    change.id.clone(),
                    StateRecord::new(attrs, graph.dependencies_of(&change.id)),
                )
            })
            .collect();
        store.commit(&batch).unwrap();

        // Same declarations against the committed state: nothing to do.
        let mut scope = DeclarationScope::new(&registry);
        declare(&mut scope);
        let current = scope.validate(&cancel).unwrap();
        let graph = DependencyGraph::build(&current).unwrap();
        let prior = store.load().unwrap();
        let set = plan(&graph, &registry, &current, &prior, &cancel).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn cancelled_plan_returns_no_partial_change_set() {
        let registry = registry();
        let cancel = CancelToken::new();
        let mut scope = DeclarationScope::new(&registry);
        scope
            .declare("net", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])
            .unwrap();
        let current = scope.validate(&cancel).unwrap();
        let graph = DependencyGraph::build(&current).unwrap();

        cancel.cancel();
        let err = plan(&graph, &registry, &current, &StateSnapshot::new(), &cancel).unwrap_err();
        assert!(matches!(err, PlanError::Cancelled));
    }

    #[test]
    fn rendered_plan_lists_operations_and_summary() {
        let registry = registry();
        let set = plan_for(&registry, &StateSnapshot::new(), |s| {
            s.declare("net", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])
                .unwrap();
        })
        .unwrap();
        let text = set.to_string();
        assert!(text.contains("+ net.main"));
        assert!(text.contains("cidr: \"10.0.0.0/16\""));
        assert!(text.contains("Plan: 1 to create, 0 to update, 0 to replace, 0 to delete."));
    }
}
