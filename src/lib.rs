//! # pactgraph - Semantic Compliance Graph Core
//!
//! A versioned triple store with pattern queries, shape-rule validation,
//! cross-time drift detection and blast-radius analysis.
//!
//! ## Core Concepts
//!
//! - **Triple**: an immutable `(subject, predicate, object)` fact
//! - **Snapshot**: an immutable, timestamped copy of the facts one assessment run saw,
//!   together with the verdicts it produced
//! - **Shape rule**: a target selector plus property constraints and a message template
//! - **Verdict**: PASS or FAIL for one rule on one target in one run
//! - **Drift**: a verdict that flipped between snapshots
//! - **Blast radius**: the systems, processes, requirements and frameworks a failure touches
//!
//! ## Usage
//!
//! ```rust
//! use pactgraph::shape::{ConstraintKind, PropertyConstraint, RuleSet, ShapeRule, TargetSelector};
//! use pactgraph::{vocab, ComplianceEngine, Term, Triple, VerdictResult};
//!
//! let rules = RuleSet::new(vec![ShapeRule::new(
//!     "AC-3-file-ownership",
//!     TargetSelector::Class { class: vocab::SYSTEM.to_string() },
//!     "File is owned by {value} user",
//! )
//! .constraint(PropertyConstraint::new(
//!     ["pact:fileOwner"],
//!     ConstraintKind::NotEquals { value: Term::string("root") },
//! ))])?;
//!
//! let engine = ComplianceEngine::in_memory(rules);
//! let run = engine.ingest([
//!     Triple::link("sys:hr-portal", vocab::RDF_TYPE, vocab::SYSTEM),
//!     Triple::fact("sys:hr-portal", "pact:fileOwner", Term::string("root")),
//! ])?;
//! let snapshot = engine.validate(&run)?;
//!
//! let verdicts = engine.verdicts(snapshot)?;
//! assert_eq!(verdicts[0].result, VerdictResult::Fail);
//! assert_eq!(verdicts[0].message.as_deref(), Some("File is owned by root user"));
//! # Ok::<(), pactgraph::PactError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod snapshot;
pub mod term;
pub mod triple;
pub mod vocab;

// Storage and queries
pub mod query;
pub mod storage;

// Validation and recording
pub mod recorder;
pub mod shape;
pub mod validation;
pub mod verdict;

// Derived views
pub mod drift;
pub mod history;
pub mod impact;

// Facade
pub mod config;
pub mod engine;

pub use config::EngineConfig;
pub use drift::{DriftDirection, DriftRecord};
pub use engine::{ComplianceEngine, EngineStats, RunHandle};
pub use error::{ContractViolation, PactError, PactResult, QueryError, ValidationError};
pub use history::{ComplianceState, TimelineEntry, TimelineFilter};
pub use impact::{EntityKind, ImpactConfig, ImpactSet, ImpactedEntity};
pub use query::{var, Binding, CompareOp, Query, TriplePattern};
pub use shape::{RuleId, RuleSet, ShapeRule};
pub use snapshot::{Snapshot, SnapshotId, SnapshotInfo};
pub use storage::{FactStore, Partition, StorageError, StoreStats};
pub use term::Term;
pub use triple::Triple;
pub use validation::{RunState, ValidationScope};
pub use verdict::{RunId, Verdict, VerdictResult};
