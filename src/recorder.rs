//! Assessment recorder: turns one run's verdicts into a frozen snapshot.
//!
//! Verdict triples are staged on a write session and frozen together with the
//! committed current facts. Nothing is staged into committed current, so a
//! failed freeze leaves current exactly as it was.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{ContractViolation, PactError, PactResult};
use crate::snapshot::{truncate_to_micros, SnapshotId};
use crate::storage::{FactStore, WriteSession};
use crate::validation::{RunState, ValidationRun};
use crate::verdict::{RunId, Verdict};

/// Label of the snapshot recording run `run`.
#[must_use]
pub fn snapshot_label(run: RunId) -> String {
    format!("assessment-{run}")
}

/// Stages `verdicts` and freezes them at `at`.
///
/// # Errors
/// - `MixedRunTimestamps` if any verdict is not stamped `at`; nothing is staged
/// - Any freeze error; the staged verdicts are discarded
pub fn record_verdicts(
    mut session: WriteSession<'_>,
    run: RunId,
    verdicts: &[Verdict],
    at: DateTime<Utc>,
) -> PactResult<SnapshotId> {
    let at = truncate_to_micros(at);
    if let Some(odd) = verdicts.iter().find(|v| v.timestamp != at) {
        return Err(ContractViolation::MixedRunTimestamps {
            expected: at,
            found: odd.timestamp,
        }
        .into());
    }

    for verdict in verdicts {
        for triple in verdict.to_triples() {
            session.stage(triple);
        }
    }
    let staged = session.staged_len();
    let id = session.freeze(snapshot_label(run), at)?;
    info!(
        run = %run,
        snapshot = %id,
        verdicts = verdicts.len(),
        triples = staged,
        "assessment recorded"
    );
    Ok(id)
}

/// Records an evaluated run inside an already open write session.
///
/// Moves the run to `RECORDED` on success and `FAILED_RUN` otherwise.
///
/// # Errors
/// Same as [`record_verdicts`], plus an illegal run transition.
pub fn record_in(session: WriteSession<'_>, run: &mut ValidationRun) -> PactResult<SnapshotId> {
    let state = run.state();
    if state != RunState::Evaluating {
        run.fail();
        return Err(PactError::internal(format!(
            "cannot record a run in state {state}"
        )));
    }
    match record_verdicts(session, run.id(), run.verdicts(), run.timestamp()) {
        Ok(id) => {
            run.advance(RunState::Recorded)?;
            Ok(id)
        }
        Err(e) => {
            warn!(run = %run.id(), error = %e, "recording failed; run discarded");
            run.fail();
            Err(e)
        }
    }
}

/// Records an evaluated run in its own write session.
///
/// # Errors
/// Same as [`record_in`].
pub fn record(store: &FactStore, run: &mut ValidationRun) -> PactResult<SnapshotId> {
    let session = store.begin_write()?;
    record_in(session, run)
}
