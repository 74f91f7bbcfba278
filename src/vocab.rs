//! Vocabulary of predicates and classes used by the core.
//!
//! Source facts may use any predicates; these are the ones the engine itself
//! writes (verdicts) or follows (attribution, blast radius).

use crate::term::Term;

pub const RDF_TYPE: &str = "rdf:type";
pub const RDFS_LABEL: &str = "rdfs:label";

// Entity classes
pub const SYSTEM: &str = "pact:System";
pub const CONTROL: &str = "pact:Control";
pub const REQUIREMENT: &str = "pact:Requirement";
pub const EVIDENCE: &str = "pact:Evidence";
pub const BUSINESS_PROCESS: &str = "pact:BusinessProcess";
pub const FRAMEWORK: &str = "pact:Framework";
pub const COMPLIANCE_ASSESSMENT: &str = "pact:ComplianceAssessment";

// Verdict predicates
pub const TARGET: &str = "pact:target";
pub const RULE: &str = "pact:rule";
pub const VALIDATES_CONTROL: &str = "pact:validatesControl";
pub const HAS_VERDICT: &str = "pact:hasVerdict";
pub const VIOLATION_MESSAGE: &str = "pact:violationMessage";
pub const EVALUATED_EVIDENCE: &str = "pact:evaluatedEvidence";
pub const GENERATED_AT: &str = "pact:generatedAt";
pub const RUN_ID: &str = "pact:runId";

// Attribution
pub const ACTOR: &str = "pact:actor";
pub const ACTOR_NAME: &str = "pact:actorName";

// Relationship edges
pub const PART_OF: &str = "pact:partOf";
pub const HAS_COMPONENT: &str = "pact:hasComponent";
pub const SUPPORTS: &str = "pact:supports";
pub const MAPS_TO: &str = "pact:mapsTo";
pub const CROSSWALK: &str = "pact:crosswalk";
pub const IN_FRAMEWORK: &str = "pact:inFramework";
pub const SATISFIES_REQUIREMENT: &str = "pact:satisfiesRequirement";

/// Returns the `rdf:type` predicate as a term.
#[must_use]
pub fn rdf_type() -> Term {
    Term::entity(RDF_TYPE)
}

/// Returns an entity term for a vocabulary constant.
#[must_use]
pub fn term(iri: &str) -> Term {
    Term::entity(iri)
}
