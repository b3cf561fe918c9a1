//! Dependency graph construction and cycle detection
//!
//! Nodes are declared instances, edges are symbolic references: an edge
//! source -> target means the source depends on the target being resolved
//! first. The graph must be a DAG; `build` runs cycle detection before
//! anything downstream may plan against it.

use crate::error::GraphError;
use crate::scope::ValidatedScope;
use crate::value::ResourceId;
use std::collections::HashMap;

/// One reference edge: which attribute of which instance points at which
/// output of which other instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEdge {
    pub source: ResourceId,
    pub source_attribute: String,
    pub target: ResourceId,
    pub target_attribute: String,
}

/// Directed acyclic graph over a validated scope
///
/// Constructing one proves acyclicity; any `DependencyGraph` value is safe
/// to order topologically.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceId>,
    index: HashMap<ResourceId, usize>,
    edges: Vec<ReferenceEdge>,
    /// Deduplicated adjacency: node -> nodes it depends on
    deps: Vec<Vec<usize>>,
    /// Reverse adjacency: node -> nodes depending on it
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph from a validated scope and verify acyclicity
    ///
    /// Fails fast on a reference to an undeclared instance, and on any
    /// cycle — a cyclic declaration set is a user-visible configuration
    /// error, never silently broken.
    pub fn build(scope: &ValidatedScope) -> Result<Self, GraphError> {
        let nodes: Vec<ResourceId> = scope.ids().cloned().collect();
        let index: HashMap<ResourceId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = Vec::new();
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (source_idx, (source, attrs)) in scope.iter().enumerate() {
            for (attribute, reference) in attrs.references() {
                let Some(&target_idx) = index.get(&reference.target) else {
                    return Err(GraphError::UnknownTarget {
                        source_id: source.clone(),
                        attribute: attribute.to_string(),
                        target: reference.target.clone(),
                    });
                };
                edges.push(ReferenceEdge {
                    source: source.clone(),
                    source_attribute: attribute.to_string(),
                    target: reference.target.clone(),
                    target_attribute: reference.attribute.clone(),
                });
                if !deps[source_idx].contains(&target_idx) {
                    deps[source_idx].push(target_idx);
                    dependents[target_idx].push(source_idx);
                }
            }
        }

        let graph = Self {
            nodes,
            index,
            edges,
            deps,
            dependents,
        };

        if let Some(path) = graph.find_cycle() {
            return Err(GraphError::Cycle { path });
        }

        log::debug!(
            "dependency graph built: {} node(s), {} edge(s)",
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    /// Instances in declaration order
    pub fn nodes(&self) -> &[ResourceId] {
        &self.nodes
    }

    /// All reference edges, in declaration/attribute order
    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Position of an instance in declaration order
    pub fn declaration_index(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The distinct instances `id` depends on
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.index
            .get(id)
            .map(|&i| {
                self.deps[i]
                    .iter()
                    .map(|&t| self.nodes[t].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Topological order: dependencies before dependents, ties broken by
    /// declaration order
    pub fn topo_order(&self) -> Vec<ResourceId> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let n = self.nodes.len();
        let mut remaining: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node].clone());
            for &dependent in &self.dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        // build() proved the graph acyclic, so every node is emitted
        order
    }

    /// Iterative depth-first search with an explicit recursion stack; a
    /// back-edge to an on-stack node yields the full cycle path, first
    /// node repeated at the end.
    fn find_cycle(&self) -> Option<Vec<ResourceId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let n = self.nodes.len();
        let mut marks = vec![Mark::Unvisited; n];

        for start in 0..n {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::OnStack;

            while let Some(frame) = stack.last_mut() {
                let (node, child) = *frame;
                if child < self.deps[node].len() {
                    frame.1 += 1;
                    let next = self.deps[node][child];
                    match marks[next] {
                        Mark::OnStack => {
                            let from = stack
                                .iter()
                                .position(|&(i, _)| i == next)
                                .unwrap_or_default();
                            let mut path: Vec<ResourceId> = stack[from..]
                                .iter()
                                .map(|&(i, _)| self.nodes[i].clone())
                                .collect();
                            path.push(self.nodes[next].clone());
                            return Some(path);
                        }
                        Mark::Unvisited => {
                            marks[next] = Mark::OnStack;
                            stack.push((next, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        None
    }
}
