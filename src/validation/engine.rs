//! Shape-rule evaluation.
//!
//! Targets are selected and property paths resolved through pattern queries,
//! so a rule sees the graph exactly as a query against the same partition
//! would.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PactResult, ValidationError};
use crate::query::{self, var, Query, Slot, TriplePattern};
use crate::shape::{cached_regex, ConstraintKind, PropertyConstraint, RuleId, RuleSet, ShapeRule, TargetSelector};
use crate::storage::TripleSet;
use crate::term::Term;
use crate::verdict::{Verdict, VerdictResult};
use crate::vocab;

use super::run::{RunState, ValidationRun};

/// Restricts a run to a subset of rules and/or targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rules: Option<BTreeSet<RuleId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targets: Option<BTreeSet<Term>>,
}

impl ValidationScope {
    /// Every rule against every selected target.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rules<I>(mut self, rules: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<RuleId>,
    {
        self.rules = Some(rules.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_targets<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = Term>,
    {
        self.targets = Some(targets.into_iter().collect());
        self
    }

    pub fn includes_rule(&self, rule: &RuleId) -> bool {
        self.rules.as_ref().map_or(true, |r| r.contains(rule))
    }

    pub fn includes_target(&self, target: &Term) -> bool {
        self.targets.as_ref().map_or(true, |t| t.contains(target))
    }
}

/// Values reached from a target along a predicate path.
struct PathValues {
    /// `(holder, value)` pairs; the holder is the subject of the last hop.
    pairs: Vec<(Term, Term)>,
}

impl PathValues {
    fn distinct_values(&self) -> BTreeSet<&Term> {
        self.pairs.iter().map(|(_, v)| v).collect()
    }

    fn holder_of(&self, value: &Term) -> Option<Term> {
        self.pairs
            .iter()
            .find(|(_, v)| v == value)
            .map(|(h, _)| h.clone())
    }

    fn first_holder(&self) -> Option<Term> {
        self.pairs.first().map(|(h, _)| h.clone())
    }
}

enum Outcome {
    Satisfied { evidence: Option<Term> },
    Violated { value: String, evidence: Option<Term> },
    Missing,
}

/// Evaluates shape rules against one triple set.
#[derive(Debug, Clone, Default)]
pub struct ConstraintEngine {
    rules: RuleSet,
}

impl ConstraintEngine {
    #[must_use]
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluates every in-scope rule against `set`, appending verdicts to `run`.
    ///
    /// Leaves the run in `EVALUATING`, ready to be recorded. On error the run
    /// is marked failed.
    ///
    /// # Errors
    /// Query or regex errors from a rule, or an illegal run transition.
    pub fn evaluate(
        &self,
        set: &TripleSet,
        scope: &ValidationScope,
        run: &mut ValidationRun,
    ) -> PactResult<()> {
        let result = self.evaluate_inner(set, scope, run);
        if result.is_err() {
            run.fail();
        }
        result
    }

    fn evaluate_inner(
        &self,
        set: &TripleSet,
        scope: &ValidationScope,
        run: &mut ValidationRun,
    ) -> PactResult<()> {
        run.advance(RunState::SelectingTargets)?;
        for rule in self.rules.iter().filter(|r| scope.includes_rule(&r.id)) {
            if run.state() == RunState::Evaluating {
                run.advance(RunState::SelectingTargets)?;
            }
            let targets: Vec<Term> = select_targets(set, &rule.target)?
                .into_iter()
                .filter(|t| scope.includes_target(t))
                .collect();

            run.advance(RunState::Evaluating)?;
            let mut failed = 0usize;
            for target in targets.iter() {
                let verdict = check_target(set, rule, target, run)?;
                if verdict.is_fail() {
                    failed += 1;
                }
                run.push(verdict);
            }
            debug!(rule = %rule.id, targets = targets.len(), failed, "rule evaluated");
        }
        if run.state() == RunState::SelectingTargets {
            run.advance(RunState::Evaluating)?;
        }

        let failed = run.verdicts().iter().filter(|v| v.is_fail()).count();
        info!(
            run = %run.id(),
            verdicts = run.verdicts().len(),
            failed,
            "validation run evaluated"
        );
        Ok(())
    }
}

/// Resolves a selector to its target nodes, in term order.
///
/// # Errors
/// Query errors from a pattern selector.
pub fn select_targets(set: &TripleSet, selector: &TargetSelector) -> PactResult<Vec<Term>> {
    let (query, var_name) = match selector {
        TargetSelector::Nodes { nodes } => {
            let unique: BTreeSet<Term> = nodes.iter().map(Term::entity).collect();
            return Ok(unique.into_iter().collect());
        }
        TargetSelector::Class { class } => (
            Query::new().pattern(var("target"), vocab::rdf_type(), Term::entity(class)),
            "target",
        ),
        TargetSelector::HasPredicate { predicate } => (
            Query::new().pattern(var("target"), Term::entity(predicate), var("value")),
            "target",
        ),
        TargetSelector::Pattern { var: v, patterns } => (
            patterns
                .iter()
                .cloned()
                .fold(Query::new(), Query::with_pattern),
            v.as_str(),
        ),
    };
    let rows = query::evaluate(set, &query.select([var_name]))?;
    let unique: BTreeSet<Term> = rows
        .into_iter()
        .filter_map(|b| b.get(var_name).cloned())
        .collect();
    Ok(unique.into_iter().collect())
}

fn path_values(set: &TripleSet, target: &Term, path: &[String]) -> PactResult<PathValues> {
    let node_var = |i: usize| format!("n{i}");
    let mut query = Query::new();
    for (i, predicate) in path.iter().enumerate() {
        let subject = if i == 0 {
            Slot::Const(target.clone())
        } else {
            var(node_var(i))
        };
        query = query.with_pattern(TriplePattern::new(
            subject,
            Term::entity(predicate),
            var(node_var(i + 1)),
        ));
    }
    let holder_var = node_var(path.len() - 1);
    let value_var = node_var(path.len());
    let rows = query::evaluate(set, &query)?;

    let pairs = rows
        .into_iter()
        .filter_map(|b| {
            let value = b.get(&value_var)?.clone();
            let holder = if path.len() == 1 {
                target.clone()
            } else {
                b.get(&holder_var)?.clone()
            };
            Some((holder, value))
        })
        .collect();
    Ok(PathValues { pairs })
}

fn first_violation<'a>(
    values: &'a PathValues,
    mut ok: impl FnMut(&Term) -> bool,
) -> Option<&'a Term> {
    values.pairs.iter().map(|(_, v)| v).find(|v| !ok(v))
}

fn check_constraint(
    set: &TripleSet,
    target: &Term,
    constraint: &PropertyConstraint,
) -> PactResult<Outcome> {
    let values = path_values(set, target, &constraint.path)?;
    let distinct = values.distinct_values().len();

    if values.pairs.is_empty() {
        return Ok(match constraint.kind {
            ConstraintKind::MaxCount { .. } | ConstraintKind::MinCount { count: 0 } => {
                Outcome::Satisfied { evidence: None }
            }
            _ => Outcome::Missing,
        });
    }

    let violation = match &constraint.kind {
        ConstraintKind::Exists => None,
        ConstraintKind::Equals { value } => first_violation(&values, |v| v == value),
        ConstraintKind::NotEquals { value } => first_violation(&values, |v| v != value),
        ConstraintKind::In { values: allowed } => first_violation(&values, |v| allowed.contains(v)),
        ConstraintKind::NotIn { values: denied } => {
            first_violation(&values, |v| !denied.contains(v))
        }
        ConstraintKind::Matches { pattern } => {
            let re = cached_regex(pattern)?;
            first_violation(&values, |v| re.is_match(&v.lexical()))
        }
        ConstraintKind::NotMatches { pattern } => {
            let re = cached_regex(pattern)?;
            first_violation(&values, |v| !re.is_match(&v.lexical()))
        }
        ConstraintKind::Compare { op, value } => first_violation(&values, |v| op.holds(v, value)),
        ConstraintKind::MinCount { count } | ConstraintKind::MaxCount { count } => {
            let holds = match constraint.kind {
                ConstraintKind::MinCount { .. } => distinct >= *count,
                _ => distinct <= *count,
            };
            if holds {
                return Ok(Outcome::Satisfied {
                    evidence: values.first_holder(),
                });
            }
            return Ok(Outcome::Violated {
                value: distinct.to_string(),
                evidence: values.first_holder(),
            });
        }
    };

    Ok(match violation {
        None => Outcome::Satisfied {
            evidence: values.first_holder(),
        },
        Some(value) => Outcome::Violated {
            value: value.lexical(),
            evidence: values.holder_of(value),
        },
    })
}

const PLACEHOLDER: &str = r"\{(value|target|path|expected|rule)\}";

/// Renders a message template.
///
/// Placeholders: `{value}`, `{target}`, `{path}`, `{expected}`, `{rule}`.
/// Substituted text is never rescanned, so an observed value that itself
/// contains braces appears literally.
///
/// # Errors
/// `InvalidRegex` only if the placeholder pattern fails to compile.
pub fn render_message(
    template: &str,
    rule: &RuleId,
    target: &Term,
    constraint: &PropertyConstraint,
    value: &str,
) -> Result<String, ValidationError> {
    let placeholders = cached_regex(PLACEHOLDER)?;
    let rendered = placeholders.replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
        "value" => value.to_string(),
        "target" => target.lexical(),
        "path" => constraint.path_display(),
        "expected" => constraint.kind.expected(),
        _ => rule.as_str().to_string(),
    });
    Ok(rendered.into_owned())
}

fn check_target(
    set: &TripleSet,
    rule: &ShapeRule,
    target: &Term,
    run: &ValidationRun,
) -> PactResult<Verdict> {
    let mut evidence = None;
    let mut failure = None;

    // The first violated constraint in declaration order decides the message.
    for constraint in &rule.constraints {
        match check_constraint(set, target, constraint)? {
            Outcome::Satisfied { evidence: e } => {
                if evidence.is_none() {
                    evidence = e;
                }
            }
            Outcome::Violated { value, evidence: e } => {
                let template = constraint.message.as_deref().unwrap_or(&rule.message);
                failure = Some((render_message(template, &rule.id, target, constraint, &value)?, e));
                break;
            }
            Outcome::Missing => {
                let message = format!(
                    "Missing evidence: no value for {} on {}",
                    constraint.path_display(),
                    target.lexical()
                );
                failure = Some((message, None));
                break;
            }
        }
    }

    let (result, message, evidence) = match failure {
        Some((message, e)) => (VerdictResult::Fail, Some(message), e),
        None => (VerdictResult::Pass, None, evidence),
    };
    Ok(Verdict {
        target: target.clone(),
        rule: rule.id.clone(),
        control: rule.control_term(),
        result,
        message,
        evidence,
        timestamp: run.timestamp(),
        run: run.id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompareOp;
    use crate::triple::Triple;
    use chrono::Utc;

    fn ownership_rule() -> ShapeRule {
        ShapeRule::new(
            "AC-3-file-ownership",
            TargetSelector::Class {
                class: vocab::SYSTEM.into(),
            },
            "File is owned by root user",
        )
        .validates("ctl:AC-3")
        .constraint(PropertyConstraint::new(
            ["pact:hasEvidence", "pact:fileOwner"],
            ConstraintKind::NotEquals {
                value: Term::string("root"),
            },
        ))
    }

    fn graph(owner: &str) -> TripleSet {
        [
            Triple::link("sys:hr-portal", vocab::RDF_TYPE, vocab::SYSTEM),
            Triple::link("sys:hr-portal", "pact:hasEvidence", "ev:scan-1"),
            Triple::fact("ev:scan-1", "pact:fileOwner", Term::string(owner)),
        ]
        .into_iter()
        .collect()
    }

    fn run_rules(set: &TripleSet, rules: Vec<ShapeRule>) -> ValidationRun {
        let engine = ConstraintEngine::new(RuleSet::new(rules).unwrap());
        let mut run = ValidationRun::new(Utc::now());
        engine.evaluate(set, &ValidationScope::all(), &mut run).unwrap();
        run
    }

    #[test]
    fn test_passing_target() {
        let run = run_rules(&graph("alice"), vec![ownership_rule()]);
        assert_eq!(run.verdicts().len(), 1);
        let v = &run.verdicts()[0];
        assert_eq!(v.result, VerdictResult::Pass);
        assert_eq!(v.message, None);
        assert_eq!(v.evidence, Some(Term::entity("ev:scan-1")));
        assert_eq!(run.state(), RunState::Evaluating);
    }

    #[test]
    fn test_failing_target_carries_evidence_and_message() {
        let run = run_rules(&graph("root"), vec![ownership_rule()]);
        let v = &run.verdicts()[0];
        assert_eq!(v.result, VerdictResult::Fail);
        assert_eq!(v.message.as_deref(), Some("File is owned by root user"));
        assert_eq!(v.evidence, Some(Term::entity("ev:scan-1")));
        assert_eq!(v.control, Some(Term::entity("ctl:AC-3")));
    }

    #[test]
    fn test_missing_evidence_is_fail() {
        let set: TripleSet = [Triple::link("sys:hr-portal", vocab::RDF_TYPE, vocab::SYSTEM)]
            .into_iter()
            .collect();
        let run = run_rules(&set, vec![ownership_rule()]);
        let v = &run.verdicts()[0];
        assert_eq!(v.result, VerdictResult::Fail);
        assert!(v.message.as_deref().unwrap().starts_with("Missing evidence"));
    }

    #[test]
    fn test_first_violated_constraint_supplies_message() {
        let rule = ShapeRule::new(
            "CM-7-ports",
            TargetSelector::HasPredicate {
                predicate: "pact:openPort".into(),
            },
            "rule-level message",
        )
        .constraint(
            PropertyConstraint::new(
                ["pact:openPort"],
                ConstraintKind::Compare {
                    op: CompareOp::Ge,
                    value: Term::int(1024),
                },
            )
            .with_message("Port {value} on {target} is below {expected}"),
        )
        .constraint(PropertyConstraint::new(
            ["pact:openPort"],
            ConstraintKind::MaxCount { count: 1 },
        ));
        let set: TripleSet = [
            Triple::fact("sys:gw", "pact:openPort", Term::int(22)),
            Triple::fact("sys:gw", "pact:openPort", Term::int(8080)),
        ]
        .into_iter()
        .collect();
        let run = run_rules(&set, vec![rule]);
        assert_eq!(
            run.verdicts()[0].message.as_deref(),
            Some("Port 22 on sys:gw is below >= 1024")
        );
    }

    #[test]
    fn test_count_constraints() {
        let rule = ShapeRule::new(
            "two-owners",
            TargetSelector::Nodes {
                nodes: vec!["sys:a".into()],
            },
            "{target} has {value} owners, needs {expected}",
        )
        .constraint(PropertyConstraint::new(
            ["pact:owner"],
            ConstraintKind::MinCount { count: 2 },
        ));
        let set: TripleSet = [Triple::fact("sys:a", "pact:owner", Term::string("bob"))]
            .into_iter()
            .collect();
        let run = run_rules(&set, vec![rule]);
        assert_eq!(
            run.verdicts()[0].message.as_deref(),
            Some("sys:a has 1 owners, needs 2")
        );
    }

    #[test]
    fn test_max_count_vacuous_without_values() {
        let rule = ShapeRule::new(
            "few-admins",
            TargetSelector::Nodes {
                nodes: vec!["sys:a".into()],
            },
            "too many admins",
        )
        .constraint(PropertyConstraint::new(
            ["pact:admin"],
            ConstraintKind::MaxCount { count: 2 },
        ));
        let run = run_rules(&TripleSet::new(), vec![rule]);
        assert_eq!(run.verdicts()[0].result, VerdictResult::Pass);
    }

    #[test]
    fn test_regex_constraints() {
        let rule = ShapeRule::new(
            "tls",
            TargetSelector::HasPredicate {
                predicate: "pact:protocol".into(),
            },
            "{value} does not match {expected}",
        )
        .constraint(PropertyConstraint::new(
            ["pact:protocol"],
            ConstraintKind::Matches {
                pattern: "^TLSv1\\.[23]$".into(),
            },
        ));
        let set: TripleSet = [
            Triple::fact("svc:a", "pact:protocol", Term::string("TLSv1.3")),
            Triple::fact("svc:b", "pact:protocol", Term::string("SSLv3")),
        ]
        .into_iter()
        .collect();
        let run = run_rules(&set, vec![rule]);
        let results: Vec<_> = run.verdicts().iter().map(|v| v.result).collect();
        assert_eq!(results, vec![VerdictResult::Pass, VerdictResult::Fail]);
    }

    #[test]
    fn test_scope_limits_rules_and_targets() {
        let mut set = graph("root");
        set.insert(Triple::link("sys:payroll", vocab::RDF_TYPE, vocab::SYSTEM));
        let engine = ConstraintEngine::new(RuleSet::new(vec![ownership_rule()]).unwrap());

        let mut run = ValidationRun::new(Utc::now());
        let scope = ValidationScope::all().with_targets([Term::entity("sys:payroll")]);
        engine.evaluate(&set, &scope, &mut run).unwrap();
        assert_eq!(run.verdicts().len(), 1);
        assert_eq!(run.verdicts()[0].target, Term::entity("sys:payroll"));

        let mut run = ValidationRun::new(Utc::now());
        let scope = ValidationScope::all().with_rules([RuleId::from("other")]);
        engine.evaluate(&set, &scope, &mut run).unwrap();
        assert!(run.verdicts().is_empty());
        assert_eq!(run.state(), RunState::Evaluating);
    }

    #[test]
    fn test_pattern_selector() {
        let selector = TargetSelector::Pattern {
            var: "s".into(),
            patterns: vec![
                TriplePattern::new(var("s"), vocab::rdf_type(), Term::entity(vocab::SYSTEM)),
                TriplePattern::new(var("s"), Term::entity("pact:hasEvidence"), var("e")),
            ],
        };
        let mut set = graph("root");
        set.insert(Triple::link("sys:bare", vocab::RDF_TYPE, vocab::SYSTEM));
        assert_eq!(
            select_targets(&set, &selector).unwrap(),
            vec![Term::entity("sys:hr-portal")]
        );
    }

    #[test]
    fn test_verdicts_share_run_timestamp() {
        let mut set = graph("root");
        set.insert(Triple::link("sys:payroll", vocab::RDF_TYPE, vocab::SYSTEM));
        let run = run_rules(&set, vec![ownership_rule()]);
        assert_eq!(run.verdicts().len(), 2);
        assert!(run
            .verdicts()
            .iter()
            .all(|v| v.timestamp == run.timestamp() && v.run == run.id()));
    }

    #[test]
    fn test_braces_in_observed_value_render_literally() {
        let constraint = PropertyConstraint::new(
            ["pact:fileName"],
            ConstraintKind::NotMatches {
                pattern: r"\{".into(),
            },
        );
        let message = render_message(
            "Bad file {value} on {target}",
            &RuleId::from("AC-3"),
            &Term::entity("sys:hr"),
            &constraint,
            "{target}-{rule}.txt",
        )
        .unwrap();
        assert_eq!(message, "Bad file {target}-{rule}.txt on sys:hr");

        let set: TripleSet = [
            Triple::link("sys:hr", vocab::RDF_TYPE, vocab::SYSTEM),
            Triple::fact("sys:hr", "pact:fileName", Term::string("{rule}.cfg")),
        ]
        .into_iter()
        .collect();
        let rule = ShapeRule::new(
            "no-braces",
            TargetSelector::Class {
                class: vocab::SYSTEM.into(),
            },
            "Unexpected name {value} for {rule}",
        )
        .constraint(constraint);
        let run = run_rules(&set, vec![rule]);
        assert_eq!(
            run.verdicts()[0].message.as_deref(),
            Some("Unexpected name {rule}.cfg for no-braces")
        );
    }
}
