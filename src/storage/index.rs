//! Indexed triple set.
//!
//! Triples are kept in three nested ordered indexes (SPO, POS, OSP) so that any
//! combination of bound slots resolves with a single map walk instead of a full
//! scan.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::term::Term;
use crate::triple::Triple;

type Index = BTreeMap<Term, BTreeMap<Term, BTreeSet<Term>>>;

/// A set of triples with set semantics and slot indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripleSet {
    spo: Index,
    pos: Index,
    osp: Index,
    len: usize,
}

fn index_insert(index: &mut Index, a: &Term, b: &Term, c: &Term) -> bool {
    index
        .entry(a.clone())
        .or_default()
        .entry(b.clone())
        .or_default()
        .insert(c.clone())
}

impl TripleSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a triple. Returns false if it was already present.
    pub fn insert(&mut self, triple: Triple) -> bool {
        let Triple {
            subject: s,
            predicate: p,
            object: o,
        } = triple;
        if !index_insert(&mut self.spo, &s, &p, &o) {
            return false;
        }
        index_insert(&mut self.pos, &p, &o, &s);
        index_insert(&mut self.osp, &o, &s, &p);
        self.len += 1;
        true
    }

    /// Inserts every triple of `other`.
    pub fn extend_from(&mut self, other: &Self) {
        for t in other.iter() {
            self.insert(t);
        }
    }

    #[must_use]
    pub fn contains(&self, triple: &Triple) -> bool {
        self.spo
            .get(&triple.subject)
            .and_then(|m| m.get(&triple.predicate))
            .is_some_and(|objs| objs.contains(&triple.object))
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates all triples in subject order.
    pub fn iter(&self) -> impl Iterator<Item = Triple> + '_ {
        self.spo.iter().flat_map(|(s, by_p)| {
            by_p.iter().flat_map(move |(p, objs)| {
                objs.iter().map(move |o| Triple {
                    subject: s.clone(),
                    predicate: p.clone(),
                    object: o.clone(),
                })
            })
        })
    }

    /// Returns every triple matching the bound slots (`None` = wildcard).
    #[must_use]
    pub fn matching(&self, s: Option<&Term>, p: Option<&Term>, o: Option<&Term>) -> Vec<Triple> {
        let mk = |s: &Term, p: &Term, o: &Term| Triple {
            subject: s.clone(),
            predicate: p.clone(),
            object: o.clone(),
        };

        match (s, p, o) {
            (Some(s), Some(p), Some(o)) => {
                let t = mk(s, p, o);
                if self.contains(&t) {
                    vec![t]
                } else {
                    Vec::new()
                }
            }
            (Some(s), Some(p), None) => self
                .spo
                .get(s)
                .and_then(|m| m.get(p))
                .map(|objs| objs.iter().map(|o| mk(s, p, o)).collect())
                .unwrap_or_default(),
            (Some(s), None, Some(o)) => self
                .osp
                .get(o)
                .and_then(|m| m.get(s))
                .map(|preds| preds.iter().map(|p| mk(s, p, o)).collect())
                .unwrap_or_default(),
            (None, Some(p), Some(o)) => self
                .pos
                .get(p)
                .and_then(|m| m.get(o))
                .map(|subs| subs.iter().map(|s| mk(s, p, o)).collect())
                .unwrap_or_default(),
            (Some(s), None, None) => self
                .spo
                .get(s)
                .map(|by_p| {
                    by_p.iter()
                        .flat_map(|(p, objs)| objs.iter().map(move |o| mk(s, p, o)))
                        .collect()
                })
                .unwrap_or_default(),
            (None, Some(p), None) => self
                .pos
                .get(p)
                .map(|by_o| {
                    by_o.iter()
                        .flat_map(|(o, subs)| subs.iter().map(move |s| mk(s, p, o)))
                        .collect()
                })
                .unwrap_or_default(),
            (None, None, Some(o)) => self
                .osp
                .get(o)
                .map(|by_s| {
                    by_s.iter()
                        .flat_map(|(s, preds)| preds.iter().map(move |p| mk(s, p, o)))
                        .collect()
                })
                .unwrap_or_default(),
            (None, None, None) => self.iter().collect(),
        }
    }

    /// Objects of `(s, p, ?)`.
    #[must_use]
    pub fn objects(&self, s: &Term, p: &Term) -> Vec<Term> {
        self.spo
            .get(s)
            .and_then(|m| m.get(p))
            .map(|objs| objs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subjects of `(?, p, o)`.
    #[must_use]
    pub fn subjects(&self, p: &Term, o: &Term) -> Vec<Term> {
        self.pos
            .get(p)
            .and_then(|m| m.get(o))
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl FromIterator<Triple> for TripleSet {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut set = Self::new();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

// Persisted as a flat list; the indexes are rebuilt on load.
impl Serialize for TripleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for TripleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let triples = Vec::<Triple>::deserialize(deserializer)?;
        Ok(triples.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TripleSet {
        [
            Triple::link("a", "type", "System"),
            Triple::link("b", "type", "System"),
            Triple::link("a", "supports", "p1"),
            Triple::fact("a", "label", Term::string("A")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = TripleSet::new();
        assert!(set.insert(Triple::link("a", "b", "c")));
        assert!(!set.insert(Triple::link("a", "b", "c")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_matching_every_slot_combination() {
        let set = sample();
        let a = Term::entity("a");
        let ty = Term::entity("type");
        let sys = Term::entity("System");

        assert_eq!(set.matching(Some(&a), Some(&ty), Some(&sys)).len(), 1);
        assert_eq!(set.matching(Some(&a), Some(&ty), None).len(), 1);
        assert_eq!(set.matching(Some(&a), None, Some(&sys)).len(), 1);
        assert_eq!(set.matching(None, Some(&ty), Some(&sys)).len(), 2);
        assert_eq!(set.matching(Some(&a), None, None).len(), 3);
        assert_eq!(set.matching(None, Some(&ty), None).len(), 2);
        assert_eq!(set.matching(None, None, Some(&sys)).len(), 2);
        assert_eq!(set.matching(None, None, None).len(), 4);
    }

    #[test]
    fn test_matching_absent_terms() {
        let set = sample();
        let z = Term::entity("z");
        assert!(set.matching(Some(&z), None, None).is_empty());
        assert!(set.matching(None, Some(&z), None).is_empty());
        assert!(set.matching(None, None, Some(&z)).is_empty());
    }

    #[test]
    fn test_serde_roundtrip_rebuilds_indexes() {
        let set = sample();
        let json = serde_json::to_string(&set).unwrap();
        let back: TripleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
        assert_eq!(
            back.subjects(&Term::entity("type"), &Term::entity("System")).len(),
            2
        );
    }
}
