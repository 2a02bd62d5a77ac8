//! Per-object replica metadata
//!
//! One tagged record per object, persisted in the same write batch as
//! the op that changes it. Explicit fields replace the string-keyed meta
//! bags of older designs: every consumer sees the same shape, and
//! serialization is exhaustive by construction.

use ron_clock::AnchoredVv;
use ron_wire::uuid::Uuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An opaque log-position reference for cheap tail reads: the padded key
/// position of the last op a downstream has been sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Padded event word + origin, matching the op-key layout.
    pub position: String,
}

impl Bookmark {
    pub fn at(event: &Uuid) -> Bookmark {
        Bookmark {
            position: format!("{}-{}", crate::keys::pad_event(event.value()), event.origin()),
        }
    }
}

/// The per-object record: arrival-order tip, the version id of the last
/// reduced state, the anchored vector acknowledged against upstream, and
/// per-downstream bookmarks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The maximum arrival-order identifier ever accepted, as text; empty
    /// until the first accepted op.
    pub tip: String,

    /// Version id of the last reduced state snapshot, as text.
    pub state_vid: String,

    /// What has been acknowledged to/from the upstream.
    pub up_avv: AnchoredVv,

    /// Per-downstream-source log bookmarks.
    pub bookmarks: BTreeMap<String, Bookmark>,
}

impl ObjectMeta {
    pub fn new() -> ObjectMeta {
        ObjectMeta::default()
    }

    /// The tip as an identifier; the zero identifier before any accept.
    pub fn tip_id(&self) -> Uuid {
        if self.tip.is_empty() {
            Uuid::zero()
        } else {
            Uuid::parse_str(&self.tip)
        }
    }

    pub fn set_tip(&mut self, event: &Uuid) {
        self.tip = event.to_string();
    }

    /// Serialize for the store.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize a stored record; a missing or corrupt record starts
    /// fresh (the op log remains the source of truth).
    pub fn from_json(text: &str) -> ObjectMeta {
        serde_json::from_str(text).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_roundtrip() {
        let mut meta = ObjectMeta::new();
        assert!(meta.tip_id().is_zero());

        meta.set_tip(&Uuid::event("time5", "orig"));
        assert_eq!(meta.tip_id(), Uuid::event("time5", "orig"));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut meta = ObjectMeta::new();
        meta.set_tip(&Uuid::event("time5", "orig"));
        meta.up_avv.see(&Uuid::event("time3", "up"));
        meta.bookmarks.insert(
            "peer1".to_string(),
            Bookmark::at(&Uuid::event("time2", "orig")),
        );

        let json = meta.to_json();
        let back = ObjectMeta::from_json(&json);
        assert_eq!(back, meta);
    }

    #[test]
    fn test_corrupt_record_starts_fresh() {
        let meta = ObjectMeta::from_json("not json");
        assert_eq!(meta, ObjectMeta::new());
    }

    #[test]
    fn test_bookmark_matches_key_layout() {
        let bookmark = Bookmark::at(&Uuid::event("time2", "orig"));
        assert_eq!(bookmark.position, "time200000-orig");
    }
}
