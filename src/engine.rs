//! The compliance engine: ingestion, validation runs and derived views.
//!
//! [`ComplianceEngine`] ties the fact store, the constraint engine and the
//! recorder together. A run is opened by [`ComplianceEngine::ingest`] and closed
//! by exactly one successful `validate*` call, which evaluates, records and
//! freezes inside one writer section.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::drift::{self, DriftRecord};
use crate::error::{ContractViolation, PactError, PactResult};
use crate::history::{self, ComplianceState, TimelineEntry, TimelineFilter};
use crate::impact::{self, ImpactConfig, ImpactSet};
use crate::query::{Binding, Query};
use crate::recorder;
use crate::shape::{RuleId, RuleSet};
use crate::snapshot::{truncate_to_micros, SnapshotId};
use crate::storage::{FactStore, Partition, StoreStats};
use crate::term::Term;
use crate::triple::Triple;
use crate::validation::{ConstraintEngine, ValidationRun, ValidationScope};
use crate::verdict::{verdicts_in, RunId, Verdict};

/// Handle to an open validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    run: RunId,
    ingested: usize,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.run
    }

    /// Facts that were new to current when the run was opened.
    pub fn ingested(&self) -> usize {
        self.ingested
    }
}

/// Engine-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub rules: usize,
    pub open_runs: usize,
    pub recorded_runs: usize,
}

#[derive(Debug, Default)]
struct RunLedger {
    open: HashSet<RunId>,
    recorded: HashMap<RunId, SnapshotId>,
}

/// Semantic compliance engine over a versioned fact store.
#[derive(Debug)]
pub struct ComplianceEngine {
    store: FactStore,
    constraints: ConstraintEngine,
    impact: ImpactConfig,
    runs: Mutex<RunLedger>,
}

impl ComplianceEngine {
    /// Creates an engine over `store` evaluating `rules`.
    #[must_use]
    pub fn new(store: FactStore, rules: RuleSet) -> Self {
        Self {
            store,
            constraints: ConstraintEngine::new(rules),
            impact: ImpactConfig::default(),
            runs: Mutex::new(RunLedger::default()),
        }
    }

    /// Creates an engine over a fresh in-memory store.
    #[must_use]
    pub fn in_memory(rules: RuleSet) -> Self {
        Self::new(FactStore::in_memory(), rules)
    }

    /// Replaces the blast-radius configuration.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration does not validate.
    pub fn with_impact_config(mut self, config: ImpactConfig) -> PactResult<Self> {
        self.impact = config.validate()?;
        Ok(self)
    }

    /// Builds an engine from configuration.
    ///
    /// `rules` takes precedence over `config.rules_path`; with neither, the
    /// engine starts with an empty rule set.
    ///
    /// # Errors
    /// Invalid configuration, an unreadable rule file, or a store that cannot
    /// be opened.
    pub fn from_config(config: EngineConfig, rules: Option<RuleSet>) -> PactResult<Self> {
        let config = config.validate()?;
        let rules = match (rules, &config.rules_path) {
            (Some(rules), _) => rules,
            (None, Some(path)) => RuleSet::from_path(path)?,
            (None, None) => RuleSet::default(),
        };
        let store = match &config.data_dir {
            #[cfg(feature = "persistent")]
            Some(dir) => FactStore::open(dir, Some(config.storage.clone()))?,
            #[cfg(not(feature = "persistent"))]
            Some(_) => {
                return Err(PactError::internal(
                    "durable storage requires the `persistent` feature",
                ))
            }
            None => FactStore::in_memory(),
        };
        info!(
            rules = rules.len(),
            durable = config.data_dir.is_some(),
            "compliance engine ready"
        );
        Ok(Self {
            store,
            constraints: ConstraintEngine::new(rules),
            impact: config.impact,
            runs: Mutex::new(RunLedger::default()),
        })
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    pub fn rules(&self) -> &RuleSet {
        self.constraints.rules()
    }

    pub fn impact_config(&self) -> &ImpactConfig {
        &self.impact
    }

    fn ledger(&self) -> PactResult<MutexGuard<'_, RunLedger>> {
        self.runs
            .lock()
            .map_err(|_| PactError::internal("run ledger lock poisoned"))
    }

    /// Asserts pre-normalized facts into current and opens a run.
    ///
    /// # Errors
    /// Journal errors; facts asserted before the failure stay asserted and no
    /// run is opened.
    pub fn ingest(&self, facts: impl IntoIterator<Item = Triple>) -> PactResult<RunHandle> {
        let ingested = self.store.assert_all(facts)?;
        let handle = RunHandle {
            run: RunId::new(),
            ingested,
        };
        self.ledger()?.open.insert(handle.run);
        debug!(run = %handle.run, ingested, "facts ingested");
        Ok(handle)
    }

    /// Validates current facts against every rule and records the verdicts.
    ///
    /// The run is stamped now, or one microsecond after the newest snapshot if
    /// the clock has not moved past it.
    ///
    /// # Errors
    /// See [`Self::validate_scoped`].
    pub fn validate(&self, handle: &RunHandle) -> PactResult<SnapshotId> {
        self.run(handle, &ValidationScope::all(), None)
    }

    /// Like [`Self::validate`], with an explicit run timestamp.
    ///
    /// # Errors
    /// See [`Self::validate_scoped`]; additionally `SnapshotOutOfOrder` if `at`
    /// does not follow the newest snapshot.
    pub fn validate_at(&self, handle: &RunHandle, at: DateTime<Utc>) -> PactResult<SnapshotId> {
        self.run(handle, &ValidationScope::all(), Some(at))
    }

    /// Validates only the rules and targets in `scope`.
    ///
    /// # Errors
    /// - `UnknownRun` / `RunAlreadyValidated` for a stale handle
    /// - Query or regex errors from a rule
    /// - Persistence errors; the store is left as it was and the run stays open
    pub fn validate_scoped(
        &self,
        handle: &RunHandle,
        scope: &ValidationScope,
    ) -> PactResult<SnapshotId> {
        self.run(handle, scope, None)
    }

    fn run(
        &self,
        handle: &RunHandle,
        scope: &ValidationScope,
        at: Option<DateTime<Utc>>,
    ) -> PactResult<SnapshotId> {
        let session = self.store.begin_write()?;
        {
            let ledger = self.ledger()?;
            if ledger.recorded.contains_key(&handle.run) {
                return Err(ContractViolation::RunAlreadyValidated {
                    run: handle.run.to_string(),
                }
                .into());
            }
            if !ledger.open.contains(&handle.run) {
                return Err(ContractViolation::UnknownRun {
                    run: handle.run.to_string(),
                }
                .into());
            }
        }

        let at = match at {
            Some(at) => truncate_to_micros(at),
            None => self.next_run_timestamp()?,
        };
        let mut run = ValidationRun::with_id(handle.run, at);
        self.store
            .with_partition(Partition::Current, |set| {
                self.constraints.evaluate(set, scope, &mut run)
            })??;
        let id = recorder::record_in(session, &mut run)?;

        let mut ledger = self.ledger()?;
        ledger.open.remove(&handle.run);
        ledger.recorded.insert(handle.run, id);
        Ok(id)
    }

    // Caller must hold the writer section.
    fn next_run_timestamp(&self) -> PactResult<DateTime<Utc>> {
        let now = truncate_to_micros(Utc::now());
        Ok(match self.store.latest_snapshot()? {
            Some(latest) if latest.created_at() >= now => {
                latest.created_at() + Duration::microseconds(1)
            }
            _ => now,
        })
    }

    /// Snapshot recorded by a run, if it was validated.
    ///
    /// # Errors
    /// Only a poisoned ledger lock.
    pub fn snapshot_of(&self, handle: &RunHandle) -> PactResult<Option<SnapshotId>> {
        Ok(self.ledger()?.recorded.get(&handle.run).copied())
    }

    /// Runs a pattern query against current (`None`) or a snapshot.
    ///
    /// # Errors
    /// Query planning errors or `UnknownSnapshot`.
    pub fn query(&self, query: &Query, snapshot: Option<SnapshotId>) -> PactResult<Vec<Binding>> {
        self.store.query(query, Partition::from(snapshot))
    }

    /// Most recent verdict flip for `(target, rule)`.
    ///
    /// # Errors
    /// Only lock failures.
    pub fn drift(&self, target: &Term, rule: &RuleId) -> PactResult<Option<DriftRecord>> {
        drift::detect_drift(&self.store, target, rule)
    }

    /// Drift records for every pair judged in the newest snapshot.
    ///
    /// # Errors
    /// Only lock failures.
    pub fn drift_report(&self) -> PactResult<Vec<DriftRecord>> {
        drift::detect_all(&self.store)
    }

    /// Everything a failing verdict puts at risk.
    ///
    /// # Errors
    /// `NotAFailingVerdict` for a PASS verdict.
    pub fn blast_radius(&self, verdict: &Verdict) -> PactResult<ImpactSet> {
        impact::resolve(&self.store, verdict, &self.impact)
    }

    /// Compliance posture as of `as_of`.
    ///
    /// # Errors
    /// Only lock failures.
    pub fn compliance_at(&self, as_of: DateTime<Utc>) -> PactResult<ComplianceState> {
        history::compliance_at(&self.store, as_of)
    }

    /// Verdict history, oldest first.
    ///
    /// # Errors
    /// Only lock failures.
    pub fn timeline(&self, filter: &TimelineFilter) -> PactResult<Vec<TimelineEntry>> {
        history::timeline(&self.store, filter)
    }

    /// Verdicts recorded in one snapshot, ordered by rule then target.
    ///
    /// # Errors
    /// `UnknownSnapshot`.
    pub fn verdicts(&self, snapshot: SnapshotId) -> PactResult<Vec<Verdict>> {
        self.store
            .with_partition(Partition::Snapshot(snapshot), verdicts_in)
    }

    /// # Errors
    /// Only lock failures.
    pub fn stats(&self) -> PactResult<EngineStats> {
        let store = self.store.stats()?;
        let ledger = self.ledger()?;
        Ok(EngineStats {
            store,
            rules: self.rules().len(),
            open_runs: ledger.open.len(),
            recorded_runs: ledger.recorded.len(),
        })
    }
}
