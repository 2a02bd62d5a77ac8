//! Version vectors
//!
//! A version vector tracks, per origin, the greatest event value seen
//! from that origin. Vectors summarize causal context compactly as long
//! as delivery per origin is contiguous; the replica layer handles gaps
//! separately with back-references.

use ron_wire::uuid::{cmp_word, Uuid};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Map from origin to the greatest event value word seen from it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    entries: BTreeMap<String, String>,
}

impl VersionVector {
    pub fn new() -> VersionVector {
        VersionVector::default()
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, String)>,
    ) -> VersionVector {
        VersionVector {
            entries: entries.into_iter().collect(),
        }
    }

    /// The greatest value word seen from an origin; the zero word when
    /// the origin is unknown.
    pub fn get(&self, origin: &str) -> &str {
        self.entries.get(origin).map(String::as_str).unwrap_or("0")
    }

    /// Record an observed identifier; never regresses an entry.
    pub fn see(&mut self, id: &Uuid) {
        if !id.is_time() || id.is_error() {
            return;
        }
        let current = self.get(id.origin());
        if cmp_word(id.value(), current) == Ordering::Greater {
            self.entries
                .insert(id.origin().to_string(), id.value().to_string());
        }
    }

    /// Whether the vector covers an identifier (the origin's entry is at
    /// or past it).
    pub fn covers(&self, id: &Uuid) -> bool {
        cmp_word(id.value(), self.get(id.origin())) != Ordering::Greater
    }

    /// Component-wise max with another vector.
    pub fn merge(&mut self, other: &VersionVector) {
        for (origin, value) in &other.entries {
            let current = self.get(origin);
            if cmp_word(value, current) == Ordering::Greater {
                self.entries.insert(origin.clone(), value.clone());
            }
        }
    }

    /// True if every entry of `other` is covered by this vector.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other
            .entries
            .iter()
            .all(|(origin, value)| cmp_word(value, self.get(origin)) != Ordering::Greater)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    /// Serialize as a run of `@value-origin` tokens, origins in sorted
    /// order.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (origin, value) in &self.entries {
            out.push('@');
            out.push_str(value);
            out.push('-');
            out.push_str(origin);
        }
        out
    }

    /// Parse the `@value-origin` run syntax. Unknown tokens are skipped;
    /// an empty string is the empty vector.
    pub fn parse_text(text: &str) -> VersionVector {
        let mut vv = VersionVector::new();
        for token in text.split('@').filter(|t| !t.is_empty()) {
            let id = Uuid::parse_str(token);
            if !id.is_error() {
                vv.see(&id);
            }
        }
        vv
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_see_and_covers() {
        let mut vv = VersionVector::new();
        vv.see(&Uuid::event("time5", "a"));

        assert!(vv.covers(&Uuid::event("time5", "a")));
        assert!(vv.covers(&Uuid::event("time1", "a")));
        assert!(!vv.covers(&Uuid::event("time6", "a")));
        assert!(!vv.covers(&Uuid::event("time1", "b")));
    }

    #[test]
    fn test_see_never_regresses() {
        let mut vv = VersionVector::new();
        vv.see(&Uuid::event("time5", "a"));
        vv.see(&Uuid::event("time2", "a"));
        assert_eq!(vv.get("a"), "time5");
    }

    #[test]
    fn test_merge() {
        let mut a = VersionVector::new();
        a.see(&Uuid::event("time5", "x"));
        a.see(&Uuid::event("time1", "y"));

        let mut b = VersionVector::new();
        b.see(&Uuid::event("time3", "x"));
        b.see(&Uuid::event("time7", "y"));

        a.merge(&b);
        assert_eq!(a.get("x"), "time5");
        assert_eq!(a.get("y"), "time7");
    }

    #[test]
    fn test_dominates() {
        let mut big = VersionVector::new();
        big.see(&Uuid::event("time5", "x"));
        big.see(&Uuid::event("time5", "y"));

        let mut small = VersionVector::new();
        small.see(&Uuid::event("time3", "x"));

        assert!(big.dominates(&small));
        assert!(!small.dominates(&big));
        assert!(big.dominates(&VersionVector::new()));
    }

    #[test]
    fn test_text_roundtrip() {
        let mut vv = VersionVector::new();
        vv.see(&Uuid::event("time5", "alice"));
        vv.see(&Uuid::event("time3", "bob"));

        let text = vv.to_text();
        assert_eq!(text, "@time5-alice@time3-bob");
        assert_eq!(VersionVector::parse_text(&text), vv);
    }

    #[test]
    fn test_parse_empty() {
        assert!(VersionVector::parse_text("").is_empty());
    }
}
