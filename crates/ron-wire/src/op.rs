//! The operation record
//!
//! An op names four identifiers (type, object, event, location), a tail of
//! atom values, and a one-character terminator. `!` marks a header op (a
//! state snapshot or subscription-on marker), `?` marks a query; plain ops
//! end with `;`, which serialization omits. Ops are immutable values: the
//! identifiers are stored in absolute form, so an op can be re-serialized
//! against any context without loss.

use crate::atom::{self, Atom, AtomError};
use crate::grammar;
use crate::uuid::Uuid;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::fmt;

/// Op terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    /// `;` — a regular op; omitted in serialized form when unambiguous.
    Raw,
    /// `!` — a header op.
    Header,
    /// `?` — a query op.
    Query,
}

impl Term {
    pub fn as_char(self) -> char {
        match self {
            Term::Raw => ';',
            Term::Header => '!',
            Term::Query => '?',
        }
    }

    pub fn from_char(ch: char) -> Option<Term> {
        match ch {
            ';' => Some(Term::Raw),
            '!' => Some(Term::Header),
            '?' => Some(Term::Query),
            _ => None,
        }
    }
}

/// A single operation. Identifier fields are absolute; compression happens
/// only at serialization time, relative to a context op.
#[derive(Clone, Debug)]
pub struct Op {
    ty: Uuid,
    object: Uuid,
    event: Uuid,
    location: Uuid,
    atoms_raw: String,
    term: Term,
    parsed_atoms: OnceCell<Option<Vec<Atom>>>,
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.object == other.object
            && self.event == other.event
            && self.location == other.location
            && self.atoms_raw == other.atoms_raw
            && self.term == other.term
    }
}

impl Eq for Op {}

static RE_OP: Lazy<Regex> = Lazy::new(|| {
    let uuid = grammar::flat_pattern("UUID").expect("grammar rule UUID");
    let atoms = grammar::flat_pattern("ATOMS").expect("grammar rule ATOMS");
    Regex::new(&format!(
        r"(?:\*({uuid}))?(?:#({uuid}))?(?:@({uuid}))?(?::({uuid}))?({atoms})?([;!?])?"
    ))
    .expect("OP regex")
});

impl Op {
    /// Construct an op from absolute parts.
    pub fn new(
        ty: Uuid,
        object: Uuid,
        event: Uuid,
        location: Uuid,
        atoms: &[Atom],
        term: Term,
    ) -> Op {
        Op {
            ty,
            object,
            event,
            location,
            atoms_raw: atom::format_atoms(atoms),
            term,
            parsed_atoms: OnceCell::new(),
        }
    }

    /// Construct an op carrying an already-serialized atom tail.
    pub fn with_raw_atoms(
        ty: Uuid,
        object: Uuid,
        event: Uuid,
        location: Uuid,
        atoms_raw: String,
        term: Term,
    ) -> Op {
        Op {
            ty,
            object,
            event,
            location,
            atoms_raw,
            term,
            parsed_atoms: OnceCell::new(),
        }
    }

    /// The all-zero op: the default serialization context.
    pub fn zero() -> Op {
        Op::with_raw_atoms(
            Uuid::zero(),
            Uuid::zero(),
            Uuid::zero(),
            Uuid::zero(),
            String::new(),
            Term::Raw,
        )
    }

    pub fn ty(&self) -> &Uuid {
        &self.ty
    }

    pub fn object(&self) -> &Uuid {
        &self.object
    }

    pub fn event(&self) -> &Uuid {
        &self.event
    }

    pub fn location(&self) -> &Uuid {
        &self.location
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn atoms_raw(&self) -> &str {
        &self.atoms_raw
    }

    pub fn is_header(&self) -> bool {
        self.term == Term::Header
    }

    pub fn is_query(&self) -> bool {
        self.term == Term::Query
    }

    /// An op represents an error iff its event is the error sentinel.
    pub fn is_error(&self) -> bool {
        self.event.is_error()
    }

    /// `*type#object` in absolute form; the routing key for per-object
    /// bookkeeping.
    pub fn object_key(&self) -> String {
        format!("*{}#{}", self.ty, self.object)
    }

    /// The parsed atom tail. Parsing happens once and is memoized;
    /// repeated calls are O(1). A malformed tail memoizes as `None`.
    pub fn atoms(&self) -> Option<&[Atom]> {
        self.parsed_atoms
            .get_or_init(|| atom::parse_atoms(&self.atoms_raw).ok())
            .as_deref()
    }

    /// The i-th atom, if the tail parses and has one.
    pub fn value(&self, i: usize) -> Option<&Atom> {
        self.atoms().and_then(|a| a.get(i))
    }

    /// Parse the atom tail, surfacing the parse error.
    pub fn parse_atom_tail(&self) -> Result<Vec<Atom>, AtomError> {
        atom::parse_atoms(&self.atoms_raw)
    }

    /// Parse one op at `offset`, each identifier field relative to the
    /// corresponding field of `context`. Returns `None` when no op starts
    /// at exactly that offset.
    pub fn parse_at(text: &str, context: &Op, offset: usize) -> Option<(Op, usize)> {
        let caps = RE_OP.captures_at(text, offset)?;
        let whole = caps.get(0)?;
        if whole.start() != offset || whole.as_str().is_empty() {
            return None;
        }

        let field = |i: usize, ctx: &Uuid| -> Option<Uuid> {
            match caps.get(i) {
                None => Some(ctx.clone()),
                Some(m) => {
                    let (id, used) = Uuid::parse_at(text, ctx, m.start())?;
                    if used != m.len() {
                        return None;
                    }
                    Some(id)
                }
            }
        };

        let ty = field(1, &context.ty)?;
        let object = field(2, &context.object)?;
        let event = field(3, &context.event)?;
        let location = field(4, &context.location)?;
        let atoms_raw = caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default();
        let term = caps
            .get(6)
            .and_then(|m| m.as_str().chars().next())
            .and_then(Term::from_char)
            .unwrap_or(Term::Raw);

        if ty.is_error() || object.is_error() || location.is_error() {
            return None;
        }

        Some((
            Op::with_raw_atoms(ty, object, event, location, atoms_raw, term),
            whole.end() - offset,
        ))
    }

    /// Parse a whole string as exactly one op.
    pub fn parse(text: &str, context: &Op) -> Option<Op> {
        match Op::parse_at(text, context, 0) {
            Some((op, used)) if used == text.len() => Some(op),
            _ => None,
        }
    }

    /// Serialize relative to a context op. Each identifier field compares
    /// against the context's *same* field independently (not chained) and
    /// is omitted when equal; the raw atom tail follows; the terminator is
    /// omitted when it is the default `;` and the op is otherwise
    /// non-empty.
    pub fn relative(&self, context: &Op) -> String {
        let mut out = String::new();
        if self.ty != context.ty {
            out.push('*');
            out.push_str(&self.ty.relative(&context.ty));
        }
        if self.object != context.object {
            out.push('#');
            out.push_str(&self.object.relative(&context.object));
        }
        if self.event != context.event {
            out.push('@');
            out.push_str(&self.event.relative(&context.event));
        }
        if self.location != context.location {
            out.push(':');
            out.push_str(&self.location.relative(&context.location));
        }
        out.push_str(&self.atoms_raw);
        match self.term {
            Term::Raw => {
                if out.is_empty() {
                    out.push(';');
                }
            }
            term => out.push(term.as_char()),
        }
        out
    }

    /// A copy of this op with a different terminator.
    pub fn with_term(&self, term: Term) -> Op {
        Op::with_raw_atoms(
            self.ty.clone(),
            self.object.clone(),
            self.event.clone(),
            self.location.clone(),
            self.atoms_raw.clone(),
            term,
        )
    }

    /// The error op for this op's object: type and object preserved, the
    /// event replaced by the error sentinel, the reason carried as a
    /// string atom.
    pub fn error_op(&self, reason: &str) -> Op {
        Op::new(
            self.ty.clone(),
            self.object.clone(),
            Uuid::error(),
            Uuid::zero(),
            &[Atom::String(reason.to_string())],
            Term::Raw,
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative(&Op::zero()))
    }
}
