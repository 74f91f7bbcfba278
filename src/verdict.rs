//! Verdicts: the PASS/FAIL outcome of one rule for one target in one run.
//!
//! Verdicts are recorded as ordinary triples about a verdict node, so every
//! snapshot carries the judgments of the run that produced it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::shape::RuleId;
use crate::storage::TripleSet;
use crate::term::Term;
use crate::triple::Triple;
use crate::vocab;

/// Identifier of one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Outcome of a rule for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictResult {
    Pass,
    Fail,
}

impl VerdictResult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }

    pub const fn is_fail(self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl fmt::Display for VerdictResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerdictResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            other => Err(format!("unknown verdict result '{other}'")),
        }
    }
}

/// One judgment produced by a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub target: Term,
    pub rule: RuleId,
    /// Control the rule validates, if it names one.
    pub control: Option<Term>,
    pub result: VerdictResult,
    /// Violation message; present only for FAIL.
    pub message: Option<String>,
    /// Node holding the evaluated evidence.
    pub evidence: Option<Term>,
    pub timestamp: DateTime<Utc>,
    pub run: RunId,
}

impl Verdict {
    pub const fn is_fail(&self) -> bool {
        self.result.is_fail()
    }

    /// Stable node id for this verdict: the same run, rule and target always
    /// map to the same node.
    #[must_use]
    pub fn node(&self) -> Term {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.run.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.rule.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.target.to_string().as_bytes());
        let hash = hasher.finalize().to_hex();
        Term::entity(format!("verdict/{}", &hash.as_str()[..32]))
    }

    /// The triples recording this verdict.
    #[must_use]
    pub fn to_triples(&self) -> Vec<Triple> {
        let node = self.node();
        let mut out = vec![
            Triple::new(node.clone(), vocab::rdf_type(), vocab::term(vocab::COMPLIANCE_ASSESSMENT)),
            Triple::new(node.clone(), vocab::term(vocab::TARGET), self.target.clone()),
            Triple::new(node.clone(), vocab::term(vocab::RULE), Term::string(self.rule.as_str())),
            Triple::new(
                node.clone(),
                vocab::term(vocab::HAS_VERDICT),
                Term::string(self.result.as_str()),
            ),
            Triple::new(
                node.clone(),
                vocab::term(vocab::GENERATED_AT),
                Term::datetime(self.timestamp),
            ),
            Triple::new(node.clone(), vocab::term(vocab::RUN_ID), Term::string(self.run.to_string())),
        ];
        if let Some(control) = &self.control {
            out.push(Triple::new(node.clone(), vocab::term(vocab::VALIDATES_CONTROL), control.clone()));
        }
        if let Some(message) = &self.message {
            out.push(Triple::new(
                node.clone(),
                vocab::term(vocab::VIOLATION_MESSAGE),
                Term::string(message.clone()),
            ));
        }
        if let Some(evidence) = &self.evidence {
            out.push(Triple::new(node, vocab::term(vocab::EVALUATED_EVIDENCE), evidence.clone()));
        }
        out
    }

    /// Rebuilds the verdict recorded under `node`, if it is complete.
    #[must_use]
    pub fn from_node(set: &TripleSet, node: &Term) -> Option<Self> {
        let one = |predicate: &str| set.objects(node, &vocab::term(predicate)).into_iter().next();

        let target = one(vocab::TARGET)?;
        let rule = RuleId::new(one(vocab::RULE)?.as_str()?);
        let result = one(vocab::HAS_VERDICT)?.as_str()?.parse().ok()?;
        let timestamp = one(vocab::GENERATED_AT)?.as_datetime()?;
        let run = one(vocab::RUN_ID)?.as_str()?.parse().ok()?;
        let message = one(vocab::VIOLATION_MESSAGE).and_then(|t| t.as_str().map(str::to_string));

        Some(Self {
            target,
            rule,
            control: one(vocab::VALIDATES_CONTROL),
            result,
            message,
            evidence: one(vocab::EVALUATED_EVIDENCE),
            timestamp,
            run,
        })
    }
}

fn verdict_nodes(set: &TripleSet) -> Vec<Term> {
    set.subjects(&vocab::rdf_type(), &vocab::term(vocab::COMPLIANCE_ASSESSMENT))
}

/// Every complete verdict recorded in `set`, ordered by rule then target.
#[must_use]
pub fn verdicts_in(set: &TripleSet) -> Vec<Verdict> {
    let mut out: Vec<Verdict> = verdict_nodes(set)
        .iter()
        .filter_map(|node| {
            let verdict = Verdict::from_node(set, node);
            if verdict.is_none() {
                debug!(node = %node, "skipping incomplete verdict node");
            }
            verdict
        })
        .collect();
    out.sort_by(|a, b| a.rule.cmp(&b.rule).then_with(|| a.target.cmp(&b.target)));
    out
}

/// The verdict for `(target, rule)` recorded in `set`.
///
/// If several runs judged the pair in this set, the newest one wins.
#[must_use]
pub fn verdict_for(set: &TripleSet, target: &Term, rule: &RuleId) -> Option<Verdict> {
    let rule_term = Term::string(rule.as_str());
    set.subjects(&vocab::term(vocab::TARGET), target)
        .iter()
        .filter(|node| {
            set.contains(&Triple::new(
                (*node).clone(),
                vocab::term(vocab::RULE),
                rule_term.clone(),
            ))
        })
        .filter_map(|node| Verdict::from_node(set, node))
        .max_by_key(|v| v.timestamp)
}
