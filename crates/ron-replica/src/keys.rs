//! Structured storage keys
//!
//! Keys follow `<db>*<type>#<object>!<event>.<marker>`. Event value words
//! are zero-padded to a fixed width inside keys so that the store's
//! lexicographic key order equals the event order — tail scans depend on
//! that equality.

use ron_wire::base64::ZERO_CHAR;
use ron_wire::uuid::Uuid;

/// Fixed event-word width inside keys.
const EVENT_PAD: usize = 10;

/// Marker suffix for op records.
pub const OP_MARKER: &str = "op";

/// Marker suffix for back-reference records.
pub const BACKREF_MARKER: &str = "br";

/// Marker suffix for per-object metadata.
pub const META_MARKER: &str = "meta";

/// Pad an event value word to the fixed key width.
pub fn pad_event(value: &str) -> String {
    let mut out = value.to_string();
    while out.len() < EVENT_PAD {
        out.push(ZERO_CHAR);
    }
    out
}

/// `<db>*<type>#<object>` — the per-object key prefix.
pub fn object_prefix(db: &str, ty: &Uuid, object: &Uuid) -> String {
    format!("{}*{}#{}", db, ty, object)
}

/// The key of one op record.
pub fn op_key(db: &str, ty: &Uuid, object: &Uuid, event: &Uuid) -> String {
    format!(
        "{}!{}-{}.{}",
        object_prefix(db, ty, object),
        pad_event(event.value()),
        event.origin(),
        OP_MARKER
    )
}

/// The key of a back-reference record for a reordered op.
pub fn backref_key(db: &str, ty: &Uuid, object: &Uuid, event: &Uuid) -> String {
    format!(
        "{}!{}-{}.{}",
        object_prefix(db, ty, object),
        pad_event(event.value()),
        event.origin(),
        BACKREF_MARKER
    )
}

/// The key of the object's metadata record.
pub fn meta_key(db: &str, ty: &Uuid, object: &Uuid) -> String {
    format!("{}.{}", object_prefix(db, ty, object), META_MARKER)
}

/// Scan bounds covering every op record of an object.
pub fn op_scan_all(db: &str, ty: &Uuid, object: &Uuid) -> (String, String) {
    let prefix = object_prefix(db, ty, object);
    (format!("{}!", prefix), format!("{}\"", prefix))
}

/// Scan bounds covering op records strictly after `event`.
pub fn op_scan_after(db: &str, ty: &Uuid, object: &Uuid, event: &Uuid) -> (String, String) {
    let prefix = object_prefix(db, ty, object);
    (
        format!(
            "{}!{}-{}.{}\u{0}",
            prefix,
            pad_event(event.value()),
            event.origin(),
            OP_MARKER
        ),
        format!("{}\"", prefix),
    )
}

/// True when a key names an op record (as opposed to a back-reference or
/// metadata in the same range).
pub fn is_op_key(key: &str) -> bool {
    key.ends_with(&format!(".{}", OP_MARKER))
}
