//! Anchored version vectors
//!
//! A plain version vector grows with replica-set churn: every origin that
//! ever wrote keeps an entry forever. The anchored form bounds that
//! growth by a time window: one scalar anchor timestamp stands in for
//! every source that has been silent longer than the sync window, and a
//! sparse exceptions map keeps exact entries only for sources newer than
//! the cutoff.
//!
//! The compaction is a conservative approximation. `covers` never claims
//! an identifier the vector cannot prove: the anchor is the *minimum* of
//! the dropped entries, so a long-silent source may get already-known ops
//! re-sent, but nothing unseen is ever skipped.

use crate::calendar::encode_ms;
use crate::vv::VersionVector;
use ron_wire::uuid::{cmp_word, Uuid};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A version vector compacted into an anchor plus recent exceptions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredVv {
    /// Everything with a value word at or below this is assumed covered.
    anchor: String,
    /// Exact entries for sources newer than the compaction cutoff.
    exceptions: BTreeMap<String, String>,
}

impl AnchoredVv {
    pub fn new(anchor: impl Into<String>) -> AnchoredVv {
        AnchoredVv {
            anchor: anchor.into(),
            exceptions: BTreeMap::new(),
        }
    }

    /// Compact a full vector against a wall-clock cutoff: sources whose
    /// latest-known stamp is newer than `now_ms - max_sync_ms` keep exact
    /// entries; everything older collapses into the anchor.
    pub fn compact(vv: &VersionVector, now_ms: i64, max_sync_ms: i64) -> AnchoredVv {
        let cutoff = encode_ms(now_ms - max_sync_ms);
        let mut anchor: Option<String> = None;
        let mut exceptions = BTreeMap::new();
        for (origin, value) in vv.iter() {
            if cmp_word(value, &cutoff) == Ordering::Greater {
                exceptions.insert(origin.clone(), value.clone());
            } else {
                // Dropped source: the anchor can claim no more than the
                // weakest one.
                anchor = Some(match anchor {
                    None => value.clone(),
                    Some(a) if cmp_word(value, &a) == Ordering::Less => value.clone(),
                    Some(a) => a,
                });
            }
        }
        AnchoredVv {
            anchor: anchor.unwrap_or_else(|| "0".to_string()),
            exceptions,
        }
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn exceptions(&self) -> &BTreeMap<String, String> {
        &self.exceptions
    }

    /// Whether the compacted vector covers an identifier: at or below the
    /// anchor, or at or below the origin's exception entry.
    pub fn covers(&self, id: &Uuid) -> bool {
        if cmp_word(id.value(), &self.anchor) != Ordering::Greater {
            return true;
        }
        match self.exceptions.get(id.origin()) {
            Some(entry) => cmp_word(id.value(), entry) != Ordering::Greater,
            None => false,
        }
    }

    /// Record an observed identifier into the exceptions map.
    pub fn see(&mut self, id: &Uuid) {
        if !id.is_time() || id.is_error() {
            return;
        }
        let current = self
            .exceptions
            .get(id.origin())
            .map(String::as_str)
            .unwrap_or("0");
        if cmp_word(id.value(), current) == Ordering::Greater {
            self.exceptions
                .insert(id.origin().to_string(), id.value().to_string());
        }
    }

    /// Serialize: the anchor as a bare `@anchor-` run head, then the
    /// exception entries.
    pub fn to_text(&self) -> String {
        let mut out = format!("@{}-", self.anchor);
        for (origin, value) in &self.exceptions {
            out.push('@');
            out.push_str(value);
            out.push('-');
            out.push_str(origin);
        }
        out
    }

    /// Parse the textual form produced by [`AnchoredVv::to_text`].
    pub fn parse_text(text: &str) -> AnchoredVv {
        let mut tokens = text.split('@').filter(|t| !t.is_empty());
        let anchor = match tokens.next() {
            Some(head) => {
                let id = Uuid::parse_str(head);
                if id.is_error() {
                    "0".to_string()
                } else {
                    id.value().to_string()
                }
            }
            None => "0".to_string(),
        };
        let mut avv = AnchoredVv::new(anchor);
        for token in tokens {
            let id = Uuid::parse_str(token);
            if !id.is_error() {
                avv.see(&id);
            }
        }
        avv
    }
}

impl fmt::Display for AnchoredVv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}
