//! Blast-radius resolution for failing verdicts.
//!
//! Two bounded breadth-first walks: one from the failing target over asset
//! edges (which systems and business processes are affected), one from the
//! violated control over cross-walk edges (which requirements and frameworks
//! it maps to). Discovered entities live in an arena keyed by term, so each
//! entity is reported once no matter how many paths reach it.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ContractViolation, PactError, PactResult, QueryError, ValidationError};
use crate::snapshot::SnapshotId;
use crate::storage::{FactStore, Partition, TripleSet};
use crate::term::Term;
use crate::triple::Triple;
use crate::verdict::Verdict;
use crate::vocab;

/// Upper bound accepted for [`ImpactConfig::max_depth`].
pub const MAX_DEPTH_LIMIT: usize = 32;

/// Which edges the resolver follows and how far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Hop limit, applied separately to each root.
    pub max_depth: usize,
    /// Asset edges followed subject → object.
    pub asset_forward: Vec<String>,
    /// Asset edges followed object → subject.
    pub asset_inverse: Vec<String>,
    /// Edges followed subject → object from the violated control only.
    pub control_forward: Vec<String>,
    /// Requirement ↔ requirement cross-walk edges, followed in both directions.
    pub crosswalk_both: Vec<String>,
    /// Cross-walk edges followed subject → object.
    pub crosswalk_forward: Vec<String>,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            asset_forward: vec![vocab::PART_OF.to_string(), vocab::SUPPORTS.to_string()],
            asset_inverse: vec![vocab::HAS_COMPONENT.to_string()],
            control_forward: vec![
                vocab::MAPS_TO.to_string(),
                vocab::SATISFIES_REQUIREMENT.to_string(),
            ],
            crosswalk_both: vec![vocab::CROSSWALK.to_string()],
            crosswalk_forward: vec![vocab::IN_FRAMEWORK.to_string()],
        }
    }
}

impl ImpactConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// `InvalidConfig` for a depth outside `1..=MAX_DEPTH_LIMIT`, a blank
    /// predicate, or no edges at all.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "impact max_depth must be between 1 and {MAX_DEPTH_LIMIT}, got {}",
                    self.max_depth
                ),
            });
        }
        let all = || {
            self.asset_forward
                .iter()
                .chain(&self.asset_inverse)
                .chain(&self.control_forward)
                .chain(&self.crosswalk_both)
                .chain(&self.crosswalk_forward)
        };
        if all().next().is_none() {
            return Err(ValidationError::InvalidConfig {
                reason: "impact config follows no edges".to_string(),
            });
        }
        if all().any(|p| p.trim().is_empty()) {
            return Err(ValidationError::InvalidConfig {
                reason: "impact edge predicates cannot be blank".to_string(),
            });
        }
        Ok(self)
    }

    fn asset_edges(&self) -> Edges {
        Edges::new(&[], &self.asset_forward, &self.asset_inverse)
    }

    // Controls that share a requirement are never reached: `mapsTo` leaves
    // the violated control and is not followed back.
    fn crosswalk_edges(&self) -> Edges {
        let forward: Vec<String> = self
            .crosswalk_both
            .iter()
            .chain(&self.crosswalk_forward)
            .cloned()
            .collect();
        Edges::new(&self.control_forward, &forward, &self.crosswalk_both)
    }
}

struct Edges {
    from_root: Vec<Term>,
    forward: Vec<Term>,
    inverse: Vec<Term>,
}

impl Edges {
    fn new(from_root: &[String], forward: &[String], inverse: &[String]) -> Self {
        let terms = |preds: &[String]| -> Vec<Term> { preds.iter().map(|p| vocab::term(p)).collect() };
        Self {
            from_root: terms(from_root),
            forward: terms(forward),
            inverse: terms(inverse),
        }
    }

    fn neighbors(&self, set: &TripleSet, node: &Term, at_root: bool) -> Vec<Term> {
        let root: &[Term] = if at_root { &self.from_root } else { &[] };
        let out = root
            .iter()
            .chain(&self.forward)
            .flat_map(|p| set.objects(node, p));
        let back = self.inverse.iter().flat_map(|p| set.subjects(p, node));
        out.chain(back).filter(Term::is_entity).collect()
    }
}

/// How an impacted entity is classified, from its `rdf:type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    System,
    BusinessProcess,
    /// Requirements and mapped controls.
    Requirement,
    Framework,
    Other,
}

impl EntityKind {
    fn classify(set: &TripleSet, entity: &Term) -> Self {
        let types = set.objects(entity, &vocab::rdf_type());
        let has = |class: &str| types.iter().any(|t| t.as_entity() == Some(class));
        if has(vocab::SYSTEM) {
            Self::System
        } else if has(vocab::BUSINESS_PROCESS) {
            Self::BusinessProcess
        } else if has(vocab::REQUIREMENT) || has(vocab::CONTROL) {
            Self::Requirement
        } else if has(vocab::FRAMEWORK) {
            Self::Framework
        } else {
            Self::Other
        }
    }
}

/// One entity reached by the traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactedEntity {
    pub entity: Term,
    pub kind: EntityKind,
    /// `rdfs:label`, when present.
    pub label: Option<String>,
    /// Hops from the root that first reached it.
    pub depth: usize,
    /// The entity it was reached from.
    pub via: Term,
}

/// Everything a failing verdict puts at risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactSet {
    pub target: Term,
    pub control: Option<Term>,
    /// Snapshot traversed; `None` when current facts were used.
    pub snapshot: Option<SnapshotId>,
    pub systems: Vec<ImpactedEntity>,
    pub processes: Vec<ImpactedEntity>,
    pub requirements: Vec<ImpactedEntity>,
    pub frameworks: Vec<ImpactedEntity>,
    pub other: Vec<ImpactedEntity>,
    /// True if the depth bound cut off unexplored edges.
    pub truncated: bool,
}

impl ImpactSet {
    /// Every impacted entity, in class order.
    pub fn entities(&self) -> impl Iterator<Item = &ImpactedEntity> {
        self.systems
            .iter()
            .chain(&self.processes)
            .chain(&self.requirements)
            .chain(&self.frameworks)
            .chain(&self.other)
    }

    #[must_use]
    pub fn contains(&self, entity: &Term) -> bool {
        self.entities().any(|e| e.entity == *entity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Discovered entities, each stored once.
#[derive(Default)]
struct Arena {
    nodes: Vec<(Term, usize, Term)>,
    index: HashMap<Term, usize>,
}

impl Arena {
    fn discover(&mut self, entity: &Term, depth: usize, via: &Term) {
        if !self.index.contains_key(entity) {
            self.index.insert(entity.clone(), self.nodes.len());
            self.nodes.push((entity.clone(), depth, via.clone()));
        }
    }
}

/// Bounded BFS from `root`. Returns true if the bound cut anything off.
fn walk(
    set: &TripleSet,
    root: &Term,
    edges: &Edges,
    max_depth: usize,
    roots: &HashSet<&Term>,
    arena: &mut Arena,
) -> bool {
    let mut visited: HashSet<Term> = HashSet::from([root.clone()]);
    let mut queue = VecDeque::from([(root.clone(), 0usize)]);
    let mut truncated = false;

    while let Some((node, depth)) = queue.pop_front() {
        for next in edges.neighbors(set, &node, depth == 0) {
            if visited.contains(&next) {
                continue;
            }
            if depth == max_depth {
                // Roots and entities the other walk found are not lost.
                if !roots.contains(&next) && !arena.index.contains_key(&next) {
                    truncated = true;
                }
                continue;
            }
            visited.insert(next.clone());
            if !roots.contains(&next) {
                arena.discover(&next, depth + 1, &node);
            }
            queue.push_back((next, depth + 1));
        }
    }
    truncated
}

/// Resolves the blast radius of `verdict` against one set of facts.
#[must_use]
pub fn traverse(set: &TripleSet, verdict: &Verdict, config: &ImpactConfig) -> ImpactSet {
    let roots: HashSet<&Term> = std::iter::once(&verdict.target)
        .chain(verdict.control.as_ref())
        .collect();
    let mut arena = Arena::default();

    let mut truncated = walk(
        set,
        &verdict.target,
        &config.asset_edges(),
        config.max_depth,
        &roots,
        &mut arena,
    );
    if let Some(control) = &verdict.control {
        truncated |= walk(
            set,
            control,
            &config.crosswalk_edges(),
            config.max_depth,
            &roots,
            &mut arena,
        );
    }

    let mut impact = ImpactSet {
        target: verdict.target.clone(),
        control: verdict.control.clone(),
        snapshot: None,
        systems: Vec::new(),
        processes: Vec::new(),
        requirements: Vec::new(),
        frameworks: Vec::new(),
        other: Vec::new(),
        truncated,
    };
    let label = vocab::term(vocab::RDFS_LABEL);
    for (entity, depth, via) in arena.nodes {
        let kind = EntityKind::classify(set, &entity);
        let found = ImpactedEntity {
            label: set
                .objects(&entity, &label)
                .into_iter()
                .find_map(|t| t.as_str().map(str::to_string)),
            entity,
            kind,
            depth,
            via,
        };
        match kind {
            EntityKind::System => impact.systems.push(found),
            EntityKind::BusinessProcess => impact.processes.push(found),
            EntityKind::Requirement => impact.requirements.push(found),
            EntityKind::Framework => impact.frameworks.push(found),
            EntityKind::Other => impact.other.push(found),
        }
    }
    impact
}

/// Resolves the blast radius of a failing verdict.
///
/// The traversal runs against the snapshot that recorded the verdict, or
/// against current facts if no snapshot holds it.
///
/// # Errors
/// - `NotAFailingVerdict` for a PASS verdict
/// - Lock failures
pub fn resolve(store: &FactStore, verdict: &Verdict, config: &ImpactConfig) -> PactResult<ImpactSet> {
    if !verdict.is_fail() {
        return Err(ContractViolation::NotAFailingVerdict {
            rule: verdict.rule.to_string(),
            target: verdict.target.to_string(),
        }
        .into());
    }

    let id = SnapshotId::from_timestamp(verdict.timestamp);
    let marker = Triple::new(
        verdict.node(),
        vocab::term(vocab::RUN_ID),
        Term::string(verdict.run.to_string()),
    );
    let recorded = match store.snapshot(id) {
        Ok(snapshot) if snapshot.triples().contains(&marker) => Some(snapshot),
        Ok(_) | Err(PactError::Query(QueryError::UnknownSnapshot { .. })) => None,
        Err(e) => return Err(e),
    };

    let impact = match recorded {
        Some(snapshot) => {
            let mut impact = traverse(snapshot.triples(), verdict, config);
            impact.snapshot = Some(snapshot.id());
            impact
        }
        None => {
            debug!(target = %verdict.target, rule = %verdict.rule, "verdict not recorded; using current facts");
            store.with_partition(Partition::Current, |set| traverse(set, verdict, config))?
        }
    };
    debug!(
        target = %verdict.target,
        rule = %verdict.rule,
        impacted = impact.len(),
        truncated = impact.truncated,
        "blast radius resolved"
    );
    Ok(impact)
}
