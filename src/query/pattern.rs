//! Query types: triple patterns, filters and bindings.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::Term;

/// One slot of a triple pattern: a constant term or a named variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Slot {
    /// Unbound variable, written `?name`.
    Var(String),
    /// Constant that must match exactly.
    Const(Term),
}

/// Creates a variable slot.
#[must_use]
pub fn var(name: impl Into<String>) -> Slot {
    Slot::Var(name.into())
}

impl Slot {
    /// Returns the variable name, if this slot is a variable.
    #[must_use]
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Self::Var(name) => Some(name),
            Self::Const(_) => None,
        }
    }
}

impl From<Term> for Slot {
    fn from(t: Term) -> Self {
        Self::Const(t)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => write!(f, "?{name}"),
            Self::Const(t) => write!(f, "{t}"),
        }
    }
}

/// A triple with any slot possibly replaced by a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: Slot,
    pub predicate: Slot,
    pub object: Slot,
}

impl TriplePattern {
    #[must_use]
    pub fn new(subject: impl Into<Slot>, predicate: impl Into<Slot>, object: impl Into<Slot>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    pub(crate) fn slots(&self) -> [&Slot; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// Names of the variables this pattern mentions.
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.slots().into_iter().filter_map(Slot::var_name)
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.subject, self.predicate, self.object)
    }
}

/// Value comparison operator, shared by query filters and shape constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Applies `observed <op> expected`.
    ///
    /// Ordering operators never hold between terms of different datatypes.
    #[must_use]
    pub fn holds(self, observed: &Term, expected: &Term) -> bool {
        match self {
            Self::Eq => observed == expected,
            Self::Ne => observed != expected,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => {
                let Some(ord) = observed.compare_value(expected) else {
                    return false;
                };
                match self {
                    Self::Lt => ord == Ordering::Less,
                    Self::Le => ord != Ordering::Greater,
                    Self::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }
            }
        }
    }

    /// Operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Restricts the values a bound variable may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub var: String,
    pub op: CompareOp,
    pub value: Term,
}

/// A conjunctive query scoped to one partition.
///
/// # Examples
///
/// ```
/// use pactgraph::query::{var, Query};
/// use pactgraph::{vocab, Term};
///
/// let q = Query::new()
///     .pattern(var("c"), vocab::rdf_type(), Term::entity(vocab::CONTROL))
///     .pattern(var("c"), Term::entity("pact:violates"), var("r"))
///     .select(["c"]);
/// assert_eq!(q.patterns().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    patterns: Vec<TriplePattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    projection: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    filters: Vec<Filter>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a triple pattern to the conjunction.
    #[must_use]
    pub fn pattern(
        mut self,
        subject: impl Into<Slot>,
        predicate: impl Into<Slot>,
        object: impl Into<Slot>,
    ) -> Self {
        self.patterns.push(TriplePattern::new(subject, predicate, object));
        self
    }

    /// Adds a prebuilt pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TriplePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Restricts the returned bindings to the named variables.
    #[must_use]
    pub fn select<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(vars.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a value filter on a variable.
    #[must_use]
    pub fn filter(mut self, var: impl Into<String>, op: CompareOp, value: Term) -> Self {
        self.filters.push(Filter {
            var: var.into(),
            op,
            value,
        });
        self
    }

    pub fn patterns(&self) -> &[TriplePattern] {
        &self.patterns
    }

    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

/// One solution: variable name to bound term.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Binding(BTreeMap<String, Term>);

impl Binding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.0.get(var)
    }

    pub(crate) fn insert(&mut self, var: String, value: Term) {
        self.0.insert(var, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn project(&self, vars: &[String]) -> Self {
        Self(
            vars.iter()
                .filter_map(|v| self.0.get(v).map(|t| (v.clone(), t.clone())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab;

    #[test]
    fn test_compare_op_equality() {
        assert!(CompareOp::Eq.holds(&Term::int(3), &Term::int(3)));
        assert!(CompareOp::Ne.holds(&Term::int(3), &Term::string("3")));
    }

    #[test]
    fn test_compare_op_ordering() {
        assert!(CompareOp::Lt.holds(&Term::int(2), &Term::int(3)));
        assert!(CompareOp::Le.holds(&Term::int(3), &Term::int(3)));
        assert!(CompareOp::Gt.holds(&Term::int(4), &Term::int(3)));
        assert!(CompareOp::Ge.holds(&Term::int(3), &Term::int(3)));
        assert!(!CompareOp::Gt.holds(&Term::int(4), &Term::string("3")));
    }

    #[test]
    fn test_pattern_vars() {
        let p = TriplePattern::new(var("s"), vocab::rdf_type(), var("o"));
        assert_eq!(p.vars().collect::<Vec<_>>(), vec!["s", "o"]);
        assert_eq!(p.to_string(), "(?s <rdf:type> ?o)");
    }

    #[test]
    fn test_query_serialization() {
        let q = Query::new()
            .pattern(var("s"), vocab::rdf_type(), Term::entity(vocab::SYSTEM))
            .select(["s"]);
        let json = serde_json::to_string(&q).unwrap();
        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }

    #[test]
    fn test_binding_projection() {
        let mut b = Binding::new();
        b.insert("a".to_string(), Term::int(1));
        b.insert("b".to_string(), Term::int(2));
        let p = b.project(&["b".to_string()]);
        assert_eq!(p.len(), 1);
        assert_eq!(p.get("b"), Some(&Term::int(2)));
        assert!(p.get("a").is_none());
    }
}
