//! Conjunctive pattern evaluation.
//!
//! Patterns are joined by incremental binding. The plan is greedy: at each
//! step, pick the remaining pattern with the fewest slots left unbound given
//! what earlier steps bound (ties go to declaration order), substitute current
//! bindings into it, and look candidates up through the triple indexes.
//! Partial bindings with no candidates are dropped immediately.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::error::QueryError;
use crate::storage::TripleSet;
use crate::term::Term;
use crate::triple::Triple;

use super::pattern::{Binding, Query, Slot, TriplePattern};

fn unbound_slots(pattern: &TriplePattern, bound: &HashSet<&str>) -> usize {
    pattern
        .slots()
        .into_iter()
        .filter(|s| s.var_name().is_some_and(|v| !bound.contains(v)))
        .count()
}

/// Orders patterns so each step binds as much as possible as early as possible.
pub(crate) fn plan(patterns: &[TriplePattern]) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..patterns.len()).collect();
    let mut bound: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(patterns.len());

    while !remaining.is_empty() {
        let pos = remaining
            .iter()
            .enumerate()
            .min_by_key(|&(_, &idx)| unbound_slots(&patterns[idx], &bound))
            .map_or(0, |(pos, _)| pos);
        let idx = remaining.remove(pos);
        bound.extend(patterns[idx].vars());
        order.push(idx);
    }
    order
}

fn check(query: &Query) -> Result<(), QueryError> {
    if query.patterns().is_empty() {
        return Err(QueryError::EmptyQuery);
    }
    let declared: HashSet<&str> = query.patterns().iter().flat_map(TriplePattern::vars).collect();
    let referenced = query
        .projection()
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .chain(query.filters().iter().map(|f| f.var.as_str()));
    for name in referenced {
        if !declared.contains(name) {
            return Err(QueryError::UnboundVariable {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn resolve<'a>(slot: &'a Slot, binding: &'a Binding) -> Option<&'a Term> {
    match slot {
        Slot::Const(t) => Some(t),
        Slot::Var(name) => binding.get(name),
    }
}

fn extend(binding: &Binding, pattern: &TriplePattern, triple: &Triple) -> Option<Binding> {
    let mut out = binding.clone();
    let values = [&triple.subject, &triple.predicate, &triple.object];
    for (slot, value) in pattern.slots().into_iter().zip(values) {
        let Slot::Var(name) = slot else { continue };
        match out.get(name) {
            // Repeated variable, e.g. (?x p ?x), must bind consistently.
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => out.insert(name.clone(), value.clone()),
        }
    }
    Some(out)
}

/// Evaluates `query` against one triple set.
///
/// Returns the distinct solutions (after projection) in a deterministic order.
///
/// # Errors
/// - `EmptyQuery` if the query has no patterns
/// - `UnboundVariable` if a projected or filtered variable appears in no pattern
pub fn evaluate(set: &TripleSet, query: &Query) -> Result<Vec<Binding>, QueryError> {
    check(query)?;

    let order = plan(query.patterns());
    debug!(patterns = query.patterns().len(), ?order, "evaluating pattern query");

    let mut applied = vec![false; query.filters().len()];
    let mut partials = vec![Binding::new()];

    for idx in order {
        let pattern = &query.patterns()[idx];
        let mut next = Vec::new();
        for binding in &partials {
            let s = resolve(&pattern.subject, binding);
            let p = resolve(&pattern.predicate, binding);
            let o = resolve(&pattern.object, binding);
            for triple in set.matching(s, p, o) {
                if let Some(extended) = extend(binding, pattern, &triple) {
                    next.push(extended);
                }
            }
        }

        // Prune as soon as a filtered variable becomes bound.
        let bound_now: HashSet<&str> = pattern.vars().collect();
        for (i, filter) in query.filters().iter().enumerate() {
            if applied[i] || !bound_now.contains(filter.var.as_str()) {
                continue;
            }
            applied[i] = true;
            next.retain(|b| {
                b.get(&filter.var)
                    .is_some_and(|v| filter.op.holds(v, &filter.value))
            });
        }

        partials = next;
        if partials.is_empty() {
            break;
        }
    }

    let solutions: BTreeSet<Binding> = match query.projection() {
        Some(vars) => partials.iter().map(|b| b.project(vars)).collect(),
        None => partials.into_iter().collect(),
    };
    Ok(solutions.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::pattern::{var, CompareOp};
    use crate::vocab;

    fn e(s: &str) -> Term {
        Term::entity(s)
    }

    fn controls() -> TripleSet {
        [
            Triple::link("ctl:AC-3", vocab::RDF_TYPE, vocab::CONTROL),
            Triple::link("ctl:CM-7", vocab::RDF_TYPE, vocab::CONTROL),
            Triple::link("ctl:IA-2", vocab::RDF_TYPE, vocab::CONTROL),
            Triple::link("ctl:AC-3", "pact:violates", "req:pci-7.1"),
            Triple::link("ctl:CM-7", "pact:violates", "req:pci-1.3"),
            Triple::link("ctl:IA-2", "pact:violates", "req:iso-a.9.2"),
            Triple::fact("req:pci-7.1", "pact:framework", Term::string("PCI-DSS")),
            Triple::fact("req:pci-1.3", "pact:framework", Term::string("PCI-DSS")),
            Triple::fact("req:iso-a.9.2", "pact:framework", Term::string("ISO 27001")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_join_semantics() {
        let q = Query::new()
            .pattern(var("c"), vocab::rdf_type(), e(vocab::CONTROL))
            .pattern(var("c"), e("pact:violates"), var("r"))
            .pattern(var("r"), e("pact:framework"), Term::string("PCI-DSS"))
            .select(["c"]);
        let rows = evaluate(&controls(), &q).unwrap();
        let got: Vec<_> = rows.iter().map(|b| b.get("c").unwrap().clone()).collect();
        assert_eq!(got, vec![e("ctl:AC-3"), e("ctl:CM-7")]);
    }

    #[test]
    fn test_plan_prefers_most_bound_pattern() {
        let q = Query::new()
            .pattern(var("c"), vocab::rdf_type(), e(vocab::CONTROL))
            .pattern(var("c"), e("pact:violates"), var("r"))
            .pattern(var("r"), e("pact:framework"), Term::string("PCI-DSS"));
        // Patterns 0 and 2 both have one unbound slot; declaration order wins,
        // then pattern 1 has a single unbound slot left (?r).
        assert_eq!(plan(q.patterns()), vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = evaluate(&controls(), &Query::new()).unwrap_err();
        assert!(matches!(err, QueryError::EmptyQuery));
    }

    #[test]
    fn test_unbound_projection_rejected() {
        let q = Query::new()
            .pattern(var("c"), vocab::rdf_type(), e(vocab::CONTROL))
            .select(["nope"]);
        let err = evaluate(&controls(), &q).unwrap_err();
        assert!(matches!(err, QueryError::UnboundVariable { name } if name == "nope"));
    }

    #[test]
    fn test_repeated_variable_binds_consistently() {
        let set: TripleSet = [
            Triple::link("a", "p", "a"),
            Triple::link("a", "p", "b"),
        ]
        .into_iter()
        .collect();
        let q = Query::new().pattern(var("x"), e("p"), var("x"));
        let rows = evaluate(&set, &q).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("x"), Some(&e("a")));
    }

    #[test]
    fn test_no_match_returns_empty() {
        let q = Query::new().pattern(var("c"), vocab::rdf_type(), e("pact:Nothing"));
        assert!(evaluate(&controls(), &q).unwrap().is_empty());
    }

    #[test]
    fn test_filters_prune_bindings() {
        let set: TripleSet = [
            Triple::fact("svc:a", "pact:port", Term::int(22)),
            Triple::fact("svc:b", "pact:port", Term::int(443)),
            Triple::fact("svc:c", "pact:port", Term::int(8080)),
        ]
        .into_iter()
        .collect();
        let q = Query::new()
            .pattern(var("s"), e("pact:port"), var("p"))
            .filter("p", CompareOp::Gt, Term::int(100))
            .select(["s"]);
        let rows = evaluate(&set, &q).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_projection_deduplicates() {
        let q = Query::new()
            .pattern(var("r"), e("pact:framework"), var("f"))
            .select(["f"]);
        let rows = evaluate(&controls(), &q).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
