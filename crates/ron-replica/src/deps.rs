//! Query dependency sets
//!
//! A long-lived query tracks which identifiers its last evaluation
//! depended on, and how: reactively (re-evaluate on change) or
//! statically (read once), each optionally weak. A key belongs to
//! exactly one kind at a time — recording it again overwrites the prior
//! kind. Between evaluations, `diff` yields the subscribe/unsubscribe
//! delta that keeps the switch registrations in step with what the query
//! actually read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a query depends on an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepKind {
    Reactive,
    ReactiveWeak,
    Static,
    StaticWeak,
}

impl DepKind {
    /// Only reactive dependencies need live subscriptions.
    pub fn is_reactive(self) -> bool {
        matches!(self, DepKind::Reactive | DepKind::ReactiveWeak)
    }
}

/// Identifier-string → dependency kind, last write wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    entries: BTreeMap<String, DepKind>,
}

/// The subscription delta between two evaluations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepDiff {
    /// Keys that became reactive and need subscriptions.
    pub subscribe: Vec<String>,
    /// Keys that stopped being reactive and should be unsubscribed.
    pub unsubscribe: Vec<String>,
}

impl Dependencies {
    pub fn new() -> Dependencies {
        Dependencies::default()
    }

    /// Record a dependency, overwriting any prior kind for the key.
    pub fn record(&mut self, key: impl Into<String>, kind: DepKind) {
        self.entries.insert(key.into(), kind);
    }

    pub fn kind(&self, key: &str) -> Option<DepKind> {
        self.entries.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DepKind)> {
        self.entries.iter()
    }

    /// The subscribe/unsubscribe delta from `previous` to `self`.
    pub fn diff(&self, previous: &Dependencies) -> DepDiff {
        let mut delta = DepDiff::default();
        for (key, kind) in &self.entries {
            let was_reactive = previous
                .kind(key)
                .map(DepKind::is_reactive)
                .unwrap_or(false);
            if kind.is_reactive() && !was_reactive {
                delta.subscribe.push(key.clone());
            }
        }
        for (key, kind) in &previous.entries {
            let now_reactive = self.kind(key).map(DepKind::is_reactive).unwrap_or(false);
            if kind.is_reactive() && !now_reactive {
                delta.unsubscribe.push(key.clone());
            }
        }
        delta
    }
}
