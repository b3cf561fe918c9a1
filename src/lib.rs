//! # Converge
//!
//! A declarative infrastructure planning engine.
//!
//! This crate validates resource declarations against typed schemas,
//! builds a dependency graph from the symbolic references between them,
//! and diffs the result against a previously committed state snapshot to
//! produce a deterministic, ordered change set. Applying the change set
//! is the job of an external executor; the engine performs no network
//! calls and never writes state on its own.
//!
//! ## Core Concepts
//!
//! - **SchemaRegistry**: per-kind attribute schemas, read-only after boot
//! - **DeclarationScope**: accumulates (kind, name, attributes) declarations
//! - **DependencyGraph**: reference edges between instances, proven acyclic
//! - **ChangeSet**: ordered create/update/replace/delete operations
//! - **StateStore**: last-applied snapshots, committed only by the executor
//!
//! ## Example
//!
//! ```
//! use converge::{
//!     AttrSchema, AttrValue, CancelToken, DeclarationScope, DependencyGraph,
//!     MemoryStateStore, Schema, SchemaRegistry, StateStore, plan,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = SchemaRegistry::new();
//! registry.register(
//!     "network",
//!     Schema::new().with_attribute("cidr", AttrSchema::string().required()),
//! );
//! registry.register(
//!     "instance",
//!     Schema::new()
//!         .with_attribute("network_id", AttrSchema::string())
//!         .with_attribute("class", AttrSchema::enumeration(["small", "large"])),
//! );
//!
//! let cancel = CancelToken::new();
//! let mut scope = DeclarationScope::new(&registry);
//! let net = scope.declare("network", "main", [("cidr", AttrValue::from("10.0.0.0/16"))])?;
//! let net_ref = scope.output_ref(&net, "id");
//! scope.declare(
//!     "instance",
//!     "web",
//!     [("network_id", net_ref), ("class", AttrValue::from("small"))],
//! )?;
//!
//! let current = scope.validate(&cancel)?;
//! let graph = DependencyGraph::build(&current)?;
//!
//! let store = MemoryStateStore::new();
//! let prior = store.load()?;
//! let change_set = plan(&graph, &registry, &current, &prior, &cancel)?;
//!
//! // network.main is created before instance.web, which references it.
//! assert_eq!(change_set.summary().create, 2);
//! println!("{change_set}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Boundaries
//!
//! Three call boundaries connect the engine to its collaborators: raw
//! declarations come in through [`DeclarationScope`] (front-end syntax is
//! someone else's concern), prior state comes from a [`StateStore`]
//! implementation (file, database, remote), and the ordered [`ChangeSet`]
//! goes out to an executor which reports confirmed results back via
//! [`StateStore::commit`].

pub mod cancel;
pub mod diff;
pub mod error;
pub mod graph;
pub mod planner;
pub mod schema;
pub mod scope;
pub mod state;
pub mod validator;
pub mod value;

// Re-export main types at crate root
pub use cancel::CancelToken;
pub use diff::{AttributeDiff, FieldChange, creation_diff, deletion_diff, diff_attributes};
pub use error::{
    DeclareError, GraphError, PlanError, ResourceFailure, SchemaError, StateError, ValidateError,
    ValidationIssue, ValidationReport,
};
pub use graph::{DependencyGraph, ReferenceEdge};
pub use planner::{Change, ChangeSet, Operation, PlanSummary, plan};
pub use schema::{AttrSchema, AttrType, IntRange, Schema, SchemaRegistry};
pub use scope::{Declaration, DeclarationScope, ValidatedScope};
pub use state::{
    CommitEntry, FileStateStore, MemoryStateStore, StateRecord, StateSnapshot, StateStore,
};
pub use validator::{ValidatedAttributes, validate};
pub use value::{AttrValue, ResourceId, SymbolicReference};
