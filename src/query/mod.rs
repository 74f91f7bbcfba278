//! Pattern matcher: conjunctive triple-pattern queries with variable bindings.

pub mod matcher;
mod pattern;

pub use matcher::evaluate;
pub use pattern::{var, Binding, CompareOp, Filter, Query, Slot, TriplePattern};
