//! Frames: ordered op sequences with a shared compression context
//!
//! A frame is an append-only builder over a body string. Every pushed op
//! is serialized relative to the previously pushed op, so the body carries
//! the delta-compressed wire form while the ops themselves stay absolute.
//! Iteration is a stateful cursor that decompresses lazily, one op at a
//! time; a cursor cannot be rewound mid-stream, but creating a fresh
//! cursor over the same text restarts cleanly.

use crate::op::{Op, Term};
use crate::uuid::Uuid;
use std::fmt;

/// An ordered, append-only sequence of ops sharing one serialization
/// context. Re-serializing a parsed frame yields byte-identical text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    body: String,
    last: Option<Op>,
    ops: usize,
}

impl Frame {
    /// An empty frame.
    pub fn new() -> Frame {
        Frame::default()
    }

    /// Wrap existing wire text. The text is scanned once so later pushes
    /// compress against the correct trailing context.
    pub fn from_text(text: &str) -> Frame {
        let mut last = None;
        let mut ops = 0;
        for op in Cursor::new(text) {
            last = Some(op);
            ops += 1;
        }
        Frame {
            body: text.to_string(),
            last,
            ops,
        }
    }

    /// Build a frame from a sequence of ops.
    pub fn from_ops<'a>(ops: impl IntoIterator<Item = &'a Op>) -> Frame {
        let mut frame = Frame::new();
        for op in ops {
            frame.push(op);
        }
        frame
    }

    /// Append an op, serialized relative to the previously pushed op.
    pub fn push(&mut self, op: &Op) {
        let context = self.last.clone().unwrap_or_else(Op::zero);
        self.body.push_str(&op.relative(&context));
        self.last = Some(op.clone());
        self.ops += 1;
    }

    /// The serialized wire text.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }

    /// Number of ops pushed or scanned into this frame.
    pub fn op_count(&self) -> usize {
        self.ops
    }

    /// The last op in the frame, i.e. the live compression context.
    pub fn last_op(&self) -> Option<&Op> {
        self.last.as_ref()
    }

    /// A fresh decompressing cursor over the frame body.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.body)
    }

    /// The first op, fully decompressed.
    pub fn first_op(&self) -> Option<Op> {
        self.cursor().next()
    }

    /// True when every op in the frame is an error op, and the frame is
    /// non-empty.
    pub fn is_error(&self) -> bool {
        let mut any = false;
        for op in self.cursor() {
            if !op.is_error() {
                return false;
            }
            any = true;
        }
        any
    }

    /// A single-op frame.
    pub fn of(op: &Op) -> Frame {
        let mut frame = Frame::new();
        frame.push(op);
        frame
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body)
    }
}

/// A stateful forward-only iterator over frame text. Each op re-parses
/// relative to the previous one; cloning duplicates the position and
/// context for lookahead.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    body: &'a str,
    offset: usize,
    context: Op,
}

impl<'a> Cursor<'a> {
    pub fn new(body: &'a str) -> Cursor<'a> {
        Cursor {
            body,
            offset: 0,
            context: Op::zero(),
        }
    }

    /// Byte offset of the next unparsed op.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The op most recently returned (the live decompression context).
    pub fn context(&self) -> &Op {
        &self.context
    }

    /// Whether the cursor has consumed the whole body.
    pub fn at_end(&self) -> bool {
        self.body[self.offset..]
            .bytes()
            .all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.body[self.offset..];
        let trimmed = rest.trim_start_matches([' ', '\t', '\r', '\n']);
        self.offset += rest.len() - trimmed.len();
    }

    /// Extract a self-contained sub-frame from the current position up to
    /// `till` (exclusive; the end of the body when `None`). The first op
    /// of the slice is re-serialized in absolute form so the result does
    /// not depend on anything outside itself; the rest is copied verbatim
    /// since it only references ops already inside the slice.
    pub fn slice(&self, till: Option<&Cursor<'_>>) -> Option<String> {
        let mut probe = self.clone();
        let first = probe.next()?;
        let end = till.map(|c| c.offset).unwrap_or(self.body.len());
        if probe.offset > end {
            return None;
        }
        let mut out = first.relative(&Op::zero());
        out.push_str(&self.body[probe.offset..end]);
        Some(out)
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Op;

    fn next(&mut self) -> Option<Op> {
        self.skip_whitespace();
        if self.offset >= self.body.len() {
            return None;
        }
        let (op, used) = Op::parse_at(self.body, &self.context, self.offset)?;
        if used == 0 {
            return None;
        }
        self.offset += used;
        self.context = op.clone();
        Some(op)
    }
}

/// Convenience: parse frame text into a vector of absolute ops.
pub fn parse_frame(text: &str) -> Vec<Op> {
    Cursor::new(text).collect()
}

/// Build an unsubscribe query frame for an object: the terminal op carries
/// the NEVER event.
pub fn unsubscribe_query(ty: &Uuid, object: &Uuid) -> Frame {
    Frame::of(&Op::with_raw_atoms(
        ty.clone(),
        object.clone(),
        Uuid::never(),
        Uuid::zero(),
        String::new(),
        Term::Query,
    ))
}

/// True when the frame is a query whose terminal op carries the NEVER
/// event, i.e. an unsubscribe request.
pub fn is_unsubscribe(frame: &Frame) -> bool {
    match frame.last_op() {
        Some(op) => op.is_query() && op.event().is_never(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;

    const SEED: &str = "*lww#test@time-orig!:int=1:str'2'";

    #[test]
    fn test_seed_frame_roundtrip() {
        // Reconstructing a frame by iterating and re-pushing every op
        // yields byte-identical text.
        let mut rebuilt = Frame::new();
        for op in Cursor::new(SEED) {
            rebuilt.push(&op);
        }
        assert_eq!(rebuilt.body(), SEED);
        assert_eq!(rebuilt.op_count(), 3);
    }

    #[test]
    fn test_cursor_decompresses() {
        let ops = parse_frame(SEED);
        assert_eq!(ops.len(), 3);
        assert!(ops[0].is_header());
        assert_eq!(ops[1].event(), ops[0].event());
        assert_eq!(ops[1].location(), &Uuid::name("int"));
        assert_eq!(ops[1].value(0), Some(&Atom::Int(1)));
        assert_eq!(ops[2].location(), &Uuid::name("str"));
        assert_eq!(
            ops[2].value(0),
            Some(&Atom::String("2".to_string()))
        );
    }

    #[test]
    fn test_cursor_clone_lookahead() {
        let mut cursor = Cursor::new(SEED);
        cursor.next().unwrap();
        let mut ahead = cursor.clone();
        let peeked = ahead.next().unwrap();
        let stepped = cursor.next().unwrap();
        assert_eq!(peeked, stepped);
    }

    #[test]
    fn test_slice_is_self_contained() {
        let mut cursor = Cursor::new(SEED);
        cursor.next().unwrap(); // move past the header
        let sliced = cursor.slice(None).unwrap();
        // The sliced text parses on its own and starts with an absolute op
        let ops = parse_frame(&sliced);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].location(), &Uuid::name("int"));
        assert_eq!(ops[0].event(), &Uuid::event("time", "orig"));
        assert_eq!(ops[1].location(), &Uuid::name("str"));
    }

    #[test]
    fn test_slice_bounded() {
        let mut from = Cursor::new(SEED);
        from.next().unwrap();
        let mut till = from.clone();
        till.next().unwrap();
        let sliced = from.slice(Some(&till)).unwrap();
        let ops = parse_frame(&sliced);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].location(), &Uuid::name("int"));
    }

    #[test]
    fn test_from_text_preserves_context() {
        let mut frame = Frame::from_text(SEED);
        let last = frame.last_op().unwrap().clone();
        let op = Op::new(
            last.ty().clone(),
            last.object().clone(),
            last.event().clone(),
            Uuid::name("third"),
            &[Atom::Int(3)],
            Term::Raw,
        );
        frame.push(&op);
        assert_eq!(frame.body(), format!("{}:third=3", SEED));
    }

    #[test]
    fn test_unsubscribe_marker() {
        let frame = unsubscribe_query(&Uuid::name("lww"), &Uuid::name("test"));
        assert!(is_unsubscribe(&frame));

        let on = Frame::of(&Op::with_raw_atoms(
            Uuid::name("lww"),
            Uuid::name("test"),
            Uuid::zero(),
            Uuid::zero(),
            String::new(),
            Term::Query,
        ));
        assert!(!is_unsubscribe(&on));
    }

    #[test]
    fn test_reordered_payload_is_valid() {
        // Frames need not be monotonic in identifier order
        let a = Op::with_raw_atoms(
            Uuid::name("lww"),
            Uuid::name("test"),
            Uuid::event("time2", "orig"),
            Uuid::zero(),
            "=2".to_string(),
            Term::Raw,
        );
        let b = Op::with_raw_atoms(
            Uuid::name("lww"),
            Uuid::name("test"),
            Uuid::event("time1", "orig"),
            Uuid::zero(),
            "=1".to_string(),
            Term::Raw,
        );
        let frame = Frame::from_ops([&a, &b]);
        let ops = parse_frame(frame.body());
        assert_eq!(ops[0].event(), &Uuid::event("time2", "orig"));
        assert_eq!(ops[1].event(), &Uuid::event("time1", "orig"));
    }
}
