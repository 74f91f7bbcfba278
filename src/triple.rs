//! The atomic fact: a subject–predicate–object statement.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::Term;

/// An immutable subject–predicate–object fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    /// The subject, usually an entity reference.
    pub subject: Term,
    /// The predicate, usually an entity reference from the vocabulary.
    pub predicate: Term,
    /// The object, an entity reference or literal.
    pub object: Term,
}

impl Triple {
    /// Creates a new triple.
    #[must_use]
    pub fn new(subject: impl Into<Term>, predicate: impl Into<Term>, object: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Shorthand for a triple whose subject and predicate are entity references.
    #[must_use]
    pub fn fact(subject: &str, predicate: &str, object: Term) -> Self {
        Self {
            subject: Term::entity(subject),
            predicate: Term::entity(predicate),
            object,
        }
    }

    /// Shorthand for an entity-to-entity edge.
    #[must_use]
    pub fn link(subject: &str, predicate: &str, object: &str) -> Self {
        Self::fact(subject, predicate, Term::entity(object))
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}
