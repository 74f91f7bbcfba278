//! Shape rules: declarative policies evaluated against the graph.
//!
//! A rule selects target nodes and states property constraints every target
//! must satisfy. Rules are static configuration, loaded from JSON and never
//! modified by validation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::query::{CompareOp, TriplePattern};
use crate::term::Term;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

/// Compiles `pattern`, reusing earlier compilations.
pub(crate) fn cached_regex(pattern: &str) -> Result<regex::Regex, ValidationError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern).map_err(|e| ValidationError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    // A poisoned cache only costs recompilation.
    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
    }
    Ok(compiled)
}

/// Identifier of a shape rule, e.g. `AC-3-file-ownership`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How serious a violation of the rule is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Chooses the nodes a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "select", rename_all = "snake_case")]
pub enum TargetSelector {
    /// Every subject with `rdf:type <class>`.
    Class { class: String },
    /// Every subject carrying at least one value for `predicate`.
    HasPredicate { predicate: String },
    /// An explicit list of nodes.
    Nodes { nodes: Vec<String> },
    /// Every binding of `var` produced by a pattern query.
    Pattern {
        var: String,
        patterns: Vec<TriplePattern>,
    },
}

impl TargetSelector {
    fn check(&self, rule: &RuleId) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidSelector {
            rule: rule.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Class { class } if class.is_empty() => Err(invalid("class is empty")),
            Self::HasPredicate { predicate } if predicate.is_empty() => {
                Err(invalid("predicate is empty"))
            }
            Self::Nodes { nodes } if nodes.is_empty() => Err(invalid("node list is empty")),
            Self::Pattern { patterns, .. } if patterns.is_empty() => {
                Err(invalid("pattern list is empty"))
            }
            Self::Pattern { var, patterns }
                if !patterns.iter().any(|p| p.vars().any(|v| v == var.as_str())) =>
            {
                Err(invalid(&format!(
                    "target variable ?{var} is not bound by any pattern"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// The closed set of checks a property constraint can perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// At least one value exists.
    Exists,
    /// Every value equals `value`.
    Equals { value: Term },
    /// No value equals `value`.
    NotEquals { value: Term },
    /// Every value is one of `values`.
    In { values: Vec<Term> },
    /// No value is one of `values`.
    NotIn { values: Vec<Term> },
    /// Every value's lexical form matches the regex.
    Matches { pattern: String },
    /// No value's lexical form matches the regex.
    NotMatches { pattern: String },
    /// Every value satisfies `value <op> expected`.
    Compare { op: CompareOp, value: Term },
    /// At least `count` distinct values.
    MinCount { count: usize },
    /// At most `count` distinct values.
    MaxCount { count: usize },
}

impl ConstraintKind {
    /// Rendering of the expected side, for `{expected}` in messages.
    #[must_use]
    pub fn expected(&self) -> String {
        match self {
            Self::Exists => "a value".to_string(),
            Self::Equals { value } | Self::NotEquals { value } => value.lexical(),
            Self::In { values } | Self::NotIn { values } => values
                .iter()
                .map(Term::lexical)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Matches { pattern } | Self::NotMatches { pattern } => pattern.clone(),
            Self::Compare { op, value } => format!("{op} {}", value.lexical()),
            Self::MinCount { count } | Self::MaxCount { count } => count.to_string(),
        }
    }

    /// Name of the check, as written in rule files.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Equals { .. } => "equals",
            Self::NotEquals { .. } => "not_equals",
            Self::In { .. } => "in",
            Self::NotIn { .. } => "not_in",
            Self::Matches { .. } => "matches",
            Self::NotMatches { .. } => "not_matches",
            Self::Compare { .. } => "compare",
            Self::MinCount { .. } => "min_count",
            Self::MaxCount { .. } => "max_count",
        }
    }
}

/// One constraint on the values reached from a target by a predicate path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConstraint {
    /// Predicates followed from the target, in order.
    pub path: Vec<String>,
    #[serde(flatten)]
    pub kind: ConstraintKind,
    /// Overrides the rule's message template for this constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PropertyConstraint {
    #[must_use]
    pub fn new<I, S>(path: I, kind: ConstraintKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            kind,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The path rendered as `a/b/c`.
    #[must_use]
    pub fn path_display(&self) -> String {
        self.path.join("/")
    }
}

/// A declarative policy rule.
///
/// # Examples
///
/// ```
/// use pactgraph::shape::{ConstraintKind, PropertyConstraint, ShapeRule, TargetSelector};
/// use pactgraph::Term;
///
/// let rule = ShapeRule::new(
///     "AC-3-file-ownership",
///     TargetSelector::Class { class: "pact:System".into() },
///     "File is owned by root user",
/// )
/// .validates("ctl:AC-3")
/// .constraint(PropertyConstraint::new(
///     ["pact:fileOwner"],
///     ConstraintKind::NotEquals { value: Term::string("root") },
/// ));
/// assert_eq!(rule.constraints.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeRule {
    pub id: RuleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Control this rule provides evidence for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    pub target: TargetSelector,
    pub constraints: Vec<PropertyConstraint>,
    /// Violation message template.
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
}

impl ShapeRule {
    #[must_use]
    pub fn new(id: impl Into<String>, target: TargetSelector, message: impl Into<String>) -> Self {
        Self {
            id: RuleId::new(id),
            name: None,
            control: None,
            target,
            constraints: Vec::new(),
            message: message.into(),
            severity: Severity::default(),
        }
    }

    /// Names the control this rule validates.
    #[must_use]
    pub fn validates(mut self, control: impl Into<String>) -> Self {
        self.control = Some(control.into());
        self
    }

    #[must_use]
    pub fn constraint(mut self, constraint: PropertyConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The control as an entity term.
    pub fn control_term(&self) -> Option<Term> {
        self.control.as_deref().map(Term::entity)
    }

    /// Checks the rule is well formed.
    ///
    /// # Errors
    /// The first structural problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyRuleId);
        }
        self.target.check(&self.id)?;
        if self.constraints.is_empty() {
            return Err(ValidationError::NoConstraints {
                rule: self.id.to_string(),
            });
        }
        for c in &self.constraints {
            if c.path.is_empty() || c.path.iter().any(|p| p.is_empty()) {
                return Err(ValidationError::EmptyPath {
                    rule: self.id.to_string(),
                });
            }
            if let ConstraintKind::Matches { pattern } | ConstraintKind::NotMatches { pattern } =
                &c.kind
            {
                cached_regex(pattern)?;
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RuleFile {
    rules: Vec<ShapeRule>,
}

/// A validated, ordered collection of rules with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    rules: Vec<ShapeRule>,
}

impl RuleSet {
    /// Validates and collects rules, keeping their order.
    ///
    /// # Errors
    /// A malformed rule or a duplicate id.
    pub fn new(rules: Vec<ShapeRule>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.id.clone()) {
                return Err(ValidationError::DuplicateRule {
                    rule: rule.id.to_string(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// Parses `{"rules": [...]}`.
    ///
    /// # Errors
    /// Malformed JSON or an invalid rule.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let file: RuleFile = serde_json::from_str(json).map_err(|e| ValidationError::Parse {
            what: "rule set".to_string(),
            reason: e.to_string(),
        })?;
        Self::new(file.rules)
    }

    /// Reads and parses a rule file.
    ///
    /// # Errors
    /// Unreadable file, malformed JSON or an invalid rule.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ValidationError::Parse {
            what: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn get(&self, id: &RuleId) -> Option<&ShapeRule> {
        self.rules.iter().find(|r| &r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShapeRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
