//! Point-in-time compliance state and verdict timelines.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PactResult;
use crate::shape::RuleId;
use crate::snapshot::SnapshotId;
use crate::storage::FactStore;
use crate::term::Term;
use crate::verdict::{verdicts_in, Verdict, VerdictResult};

/// Pass/fail tally for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub target: Term,
    pub passed: usize,
    pub failed: usize,
}

/// Compliance posture as recorded by the newest snapshot at or before `as_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceState {
    pub as_of: DateTime<Utc>,
    /// Snapshot the state was read from; `None` when nothing was recorded yet.
    pub snapshot: Option<SnapshotId>,
    pub passed: usize,
    pub failed: usize,
    /// Percentage of passing verdicts, rounded to two decimals. `0.0` when empty.
    pub compliance_rate: f64,
    /// Ordered by target.
    pub by_target: Vec<TargetSummary>,
    pub failures: Vec<Verdict>,
}

impl ComplianceState {
    fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            snapshot: None,
            passed: 0,
            failed: 0,
            compliance_rate: 0.0,
            by_target: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.passed + self.failed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Tally for `target`, if it was judged.
    #[must_use]
    pub fn target(&self, target: &Term) -> Option<&TargetSummary> {
        self.by_target.iter().find(|s| s.target == *target)
    }
}

fn rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = passed as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Summarizes the verdicts of the newest snapshot taken at or before `as_of`.
///
/// # Errors
/// Only lock failures; an empty history yields an empty state.
pub fn compliance_at(store: &FactStore, as_of: DateTime<Utc>) -> PactResult<ComplianceState> {
    let Some(snapshot) = store.snapshot_at_or_before(as_of)? else {
        debug!(as_of = %as_of, "no snapshot at or before requested time");
        return Ok(ComplianceState::empty(as_of));
    };

    let mut state = ComplianceState::empty(as_of);
    state.snapshot = Some(snapshot.id());
    let mut tallies: BTreeMap<Term, (usize, usize)> = BTreeMap::new();
    for verdict in verdicts_in(snapshot.triples()) {
        let tally = tallies.entry(verdict.target.clone()).or_default();
        match verdict.result {
            VerdictResult::Pass => {
                tally.0 += 1;
                state.passed += 1;
            }
            VerdictResult::Fail => {
                tally.1 += 1;
                state.failed += 1;
                state.failures.push(verdict);
            }
        }
    }
    state.by_target = tallies
        .into_iter()
        .map(|(target, (passed, failed))| TargetSummary {
            target,
            passed,
            failed,
        })
        .collect();
    state.compliance_rate = rate(state.passed, state.total());
    Ok(state)
}

/// Restricts a timeline. Every unset field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineFilter {
    pub target: Option<Term>,
    pub rule: Option<RuleId>,
    /// Inclusive lower bound on the verdict timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the verdict timestamp.
    pub to: Option<DateTime<Utc>>,
}

impl TimelineFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn target(mut self, target: Term) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: impl Into<RuleId>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    #[must_use]
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    fn accepts(&self, verdict: &Verdict) -> bool {
        self.target.as_ref().map_or(true, |t| *t == verdict.target)
            && self.rule.as_ref().map_or(true, |r| *r == verdict.rule)
            && self.from.map_or(true, |from| verdict.timestamp >= from)
            && self.to.map_or(true, |to| verdict.timestamp <= to)
    }
}

/// One verdict as it appeared in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub snapshot: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub target: Term,
    pub rule: RuleId,
    pub result: VerdictResult,
    pub message: Option<String>,
}

/// Verdict history across all snapshots, oldest first.
///
/// Within a snapshot entries are ordered by rule, then target.
///
/// # Errors
/// Only lock failures.
pub fn timeline(store: &FactStore, filter: &TimelineFilter) -> PactResult<Vec<TimelineEntry>> {
    let mut entries = Vec::new();
    for id in store.snapshot_ids()? {
        let snapshot = store.snapshot(id)?;
        entries.extend(
            verdicts_in(snapshot.triples())
                .into_iter()
                .filter(|v| filter.accepts(v))
                .map(|v| TimelineEntry {
                    snapshot: id,
                    timestamp: v.timestamp,
                    target: v.target,
                    rule: v.rule,
                    result: v.result,
                    message: v.message,
                }),
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::RunId;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, 9, 0, 0).unwrap()
    }

    fn verdict(run: RunId, target: &str, rule: &str, result: VerdictResult, at: DateTime<Utc>) -> Verdict {
        Verdict {
            target: Term::entity(target),
            rule: RuleId::from(rule),
            control: None,
            result,
            message: result.is_fail().then(|| "violation".to_string()),
            evidence: None,
            timestamp: at,
            run,
        }
    }

    fn seed(store: &FactStore) {
        let run = RunId::new();
        let first = vec![
            verdict(run, "sys:a", "AC-3", VerdictResult::Pass, day(1)),
            verdict(run, "sys:b", "AC-3", VerdictResult::Pass, day(1)),
            verdict(run, "sys:c", "AC-3", VerdictResult::Fail, day(1)),
        ];
        crate::recorder::record_verdicts(store.begin_write().unwrap(), run, &first, day(1)).unwrap();

        let run = RunId::new();
        let second = vec![
            verdict(run, "sys:a", "AC-3", VerdictResult::Fail, day(3)),
            verdict(run, "sys:b", "AC-3", VerdictResult::Pass, day(3)),
            verdict(run, "sys:c", "AC-3", VerdictResult::Fail, day(3)),
        ];
        crate::recorder::record_verdicts(store.begin_write().unwrap(), run, &second, day(3)).unwrap();
    }

    #[test]
    fn test_compliance_at_reads_snapshot_in_effect() {
        let store = FactStore::in_memory();
        seed(&store);

        let state = compliance_at(&store, day(2)).unwrap();
        assert_eq!(state.passed, 2);
        assert_eq!(state.failed, 1);
        assert!((state.compliance_rate - 66.67).abs() < f64::EPSILON);
        assert_eq!(state.failures.len(), 1);

        let state = compliance_at(&store, day(3)).unwrap();
        assert_eq!(state.failed, 2);
        let a = state.target(&Term::entity("sys:a")).unwrap();
        assert_eq!((a.passed, a.failed), (0, 1));
        assert_eq!(state.by_target.len(), 3);
    }

    #[test]
    fn test_compliance_before_any_snapshot_is_empty() {
        let store = FactStore::in_memory();
        seed(&store);
        let state = compliance_at(&store, day(1) - Duration::hours(1)).unwrap();
        assert!(state.is_empty());
        assert!(state.snapshot.is_none());
        assert!(state.compliance_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_timeline_is_chronological_and_filtered() {
        let store = FactStore::in_memory();
        seed(&store);

        let all = timeline(&store, &TimelineFilter::new()).unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let only_a = timeline(&store, &TimelineFilter::new().target(Term::entity("sys:a"))).unwrap();
        let results: Vec<_> = only_a.iter().map(|e| e.result).collect();
        assert_eq!(results, vec![VerdictResult::Pass, VerdictResult::Fail]);

        let late = timeline(&store, &TimelineFilter::new().between(day(2), day(4))).unwrap();
        assert_eq!(late.len(), 3);

        let none = timeline(&store, &TimelineFilter::new().rule("CM-7")).unwrap();
        assert!(none.is_empty());
    }
}
