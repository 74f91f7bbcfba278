//! Drift detection: how a `(target, rule)` verdict changed across snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PactResult;
use crate::shape::RuleId;
use crate::snapshot::{Snapshot, SnapshotId};
use crate::storage::FactStore;
use crate::term::Term;
use crate::verdict::{verdict_for, verdicts_in, Verdict, VerdictResult};
use crate::vocab;

/// Which way a verdict flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    /// PASS → FAIL.
    Regression,
    /// FAIL → PASS.
    Remediation,
}

impl fmt::Display for DriftDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Regression => "PASS -> FAIL",
            Self::Remediation => "FAIL -> PASS",
        })
    }
}

/// The most recent verdict flip for one `(target, rule)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub target: Term,
    pub rule: RuleId,
    pub direction: DriftDirection,
    pub prior_result: VerdictResult,
    pub new_result: VerdictResult,
    /// Last snapshot that still held the prior result.
    pub prior_snapshot: SnapshotId,
    pub prior_timestamp: DateTime<Utc>,
    /// Snapshot where the new result first appeared.
    pub new_snapshot: SnapshotId,
    pub new_timestamp: DateTime<Utc>,
    /// Newest snapshot judging the pair; the new result has held since `new_snapshot`.
    pub latest_snapshot: SnapshotId,
    /// Who caused the change, if the evidence records it.
    pub actor: Option<String>,
    /// Stored violation message of the new verdict, verbatim; FAIL only.
    pub message: Option<String>,
}

/// Verdicts for one pair, newest snapshot first.
pub(crate) type PairHistory = Vec<(Arc<Snapshot>, Verdict)>;

pub(crate) fn pair_history(
    store: &FactStore,
    target: &Term,
    rule: &RuleId,
) -> PactResult<PairHistory> {
    Ok(store
        .snapshots_newest_first()?
        .into_iter()
        .filter_map(|s| verdict_for(s.triples(), target, rule).map(|v| (s, v)))
        .collect())
}

fn actor_of(snapshot: &Snapshot, verdict: &Verdict) -> Option<String> {
    let set = snapshot.triples();
    let lookup = |node: &Term| {
        [vocab::ACTOR, vocab::ACTOR_NAME]
            .into_iter()
            .find_map(|p| set.objects(node, &vocab::term(p)).into_iter().next())
    };
    verdict
        .evidence
        .as_ref()
        .and_then(|e| lookup(e))
        .or_else(|| lookup(&verdict.target))
        .map(|t| t.lexical())
}

/// Finds the most recent flip in a newest-first history.
pub(crate) fn drift_in(history: &[(Arc<Snapshot>, Verdict)]) -> Option<DriftRecord> {
    let (latest_snapshot, latest) = history.first()?;
    let streak = history
        .iter()
        .take_while(|(_, v)| v.result == latest.result)
        .count();
    let (new_snapshot, new) = &history[streak - 1];
    let (prior_snapshot, prior) = history.get(streak)?;

    let direction = match (prior.result, new.result) {
        (VerdictResult::Pass, VerdictResult::Fail) => DriftDirection::Regression,
        (VerdictResult::Fail, VerdictResult::Pass) => DriftDirection::Remediation,
        _ => return None,
    };

    Some(DriftRecord {
        target: new.target.clone(),
        rule: new.rule.clone(),
        direction,
        prior_result: prior.result,
        new_result: new.result,
        prior_snapshot: prior_snapshot.id(),
        prior_timestamp: prior.timestamp,
        new_snapshot: new_snapshot.id(),
        new_timestamp: new.timestamp,
        latest_snapshot: latest_snapshot.id(),
        actor: actor_of(new_snapshot, new),
        message: if new.is_fail() { new.message.clone() } else { None },
    })
}

/// Reports the most recent verdict flip for `(target, rule)`.
///
/// Returns `None` when fewer than two snapshots judged the pair or the result
/// never changed.
///
/// # Errors
/// Only lock failures; missing data is never an error.
pub fn detect_drift(
    store: &FactStore,
    target: &Term,
    rule: &RuleId,
) -> PactResult<Option<DriftRecord>> {
    let history = pair_history(store, target, rule)?;
    let record = drift_in(&history);
    debug!(
        target = %target,
        rule = %rule,
        judged_in = history.len(),
        drifted = record.is_some(),
        "drift checked"
    );
    Ok(record)
}

/// Drift records for every pair judged in the newest snapshot.
///
/// # Errors
/// Only lock failures.
pub fn detect_all(store: &FactStore) -> PactResult<Vec<DriftRecord>> {
    let snapshots = store.snapshots_newest_first()?;
    let Some(latest) = snapshots.first() else {
        return Ok(Vec::new());
    };

    let mut histories: BTreeMap<(RuleId, Term), PairHistory> = verdicts_in(latest.triples())
        .into_iter()
        .map(|v| ((v.rule.clone(), v.target.clone()), Vec::new()))
        .collect();

    for snapshot in &snapshots {
        for verdict in verdicts_in(snapshot.triples()) {
            if let Some(history) = histories.get_mut(&(verdict.rule.clone(), verdict.target.clone())) {
                // One verdict per pair per snapshot; keep the newest run's.
                if history.last().map_or(true, |(s, _)| s.id() != snapshot.id()) {
                    history.push((Arc::clone(snapshot), verdict));
                }
            }
        }
    }

    Ok(histories.values().filter_map(|h| drift_in(h)).collect())
}
