use std::hint::black_box;

use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use pactgraph::shape::{ConstraintKind, PropertyConstraint, TargetSelector};
use pactgraph::{
    var, vocab, ComplianceEngine, FactStore, ImpactConfig, Partition, Query, RuleSet, RunId,
    ShapeRule, Term, Triple, Verdict, VerdictResult,
};

const SYSTEMS: usize = 512;

/// 512 systems, each with one evidence node and a process it supports.
fn landscape() -> Vec<Triple> {
    let mut facts = Vec::with_capacity(SYSTEMS * 6);
    for i in 0..SYSTEMS {
        let sys = format!("sys:host-{i}");
        let ev = format!("ev:scan-{i}");
        let bp = format!("bp:process-{}", i % 16);
        facts.push(Triple::link(&sys, vocab::RDF_TYPE, vocab::SYSTEM));
        facts.push(Triple::link(&sys, vocab::HAS_COMPONENT, &ev));
        facts.push(Triple::link(&sys, vocab::SUPPORTS, &bp));
        facts.push(Triple::link(&bp, vocab::RDF_TYPE, vocab::BUSINESS_PROCESS));
        facts.push(Triple::fact(&ev, "pact:openPort", Term::int(if i % 7 == 0 { 23 } else { 443 })));
        facts.push(Triple::fact(&ev, "pact:fileOwner", Term::string(if i % 5 == 0 { "root" } else { "svc" })));
    }
    facts
}

fn bench_join_query(c: &mut Criterion) {
    let store = FactStore::in_memory();
    store.assert_all(landscape()).unwrap();
    let query = Query::new()
        .pattern(var("s"), vocab::rdf_type(), vocab::term(vocab::SYSTEM))
        .pattern(var("s"), vocab::term(vocab::HAS_COMPONENT), var("e"))
        .pattern(var("e"), Term::entity("pact:openPort"), Term::int(23))
        .select(["s"]);

    let mut group = c.benchmark_group("matcher");
    group.throughput(Throughput::Elements(SYSTEMS as u64));
    group.bench_function("three_pattern_join", |b| {
        b.iter(|| black_box(store.query(&query, Partition::Current).unwrap()));
    });
    group.finish();
}

fn rules() -> RuleSet {
    RuleSet::new(vec![ShapeRule::new(
        "AC-3",
        TargetSelector::Class {
            class: vocab::SYSTEM.to_string(),
        },
        "File is owned by {value} user",
    )
    .constraint(PropertyConstraint::new(
        [vocab::HAS_COMPONENT, "pact:fileOwner"],
        ConstraintKind::NotEquals {
            value: Term::string("root"),
        },
    ))])
    .unwrap()
}

fn bench_validation_run(c: &mut Criterion) {
    c.bench_function("engine/validate_512_systems", |b| {
        b.iter_batched(
            || {
                let engine = ComplianceEngine::in_memory(rules());
                let run = engine.ingest(landscape()).unwrap();
                (engine, run)
            },
            |(engine, run)| black_box(engine.validate(&run).unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_blast_radius(c: &mut Criterion) {
    let engine = ComplianceEngine::in_memory(rules());
    engine.ingest(landscape()).unwrap();
    let verdict = Verdict {
        target: Term::entity("ev:scan-0"),
        rule: "CM-7".into(),
        control: None,
        result: VerdictResult::Fail,
        message: Some("Port 23 must be closed".to_string()),
        evidence: None,
        timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        run: RunId::new(),
    };
    assert_eq!(engine.impact_config(), &ImpactConfig::default());

    c.bench_function("impact/blast_radius", |b| {
        b.iter(|| black_box(engine.blast_radius(&verdict).unwrap()));
    });
}

criterion_group!(benches, bench_join_query, bench_validation_run, bench_blast_radius);
criterion_main!(benches);
