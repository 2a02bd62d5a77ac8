//! Context-relative identifiers
//!
//! An identifier is a `{value, origin, separator}` triple over the base64
//! alphabet. The separator encodes the identifier's kind: `-` event, `+`
//! derived, `$` name, `%` hash. Identifiers compare as right-zero-padded
//! words: the value decides, and on a tie the *smaller* origin wins — that
//! reversed tie-break totally orders same-instant events from different
//! sources and must never be flipped.
//!
//! Serialization is relative to a context identifier: shared prefixes of
//! value and origin are elided behind a one-character bracket marker
//! (`zip64`), and fields equal to the context can be omitted entirely.
//! Parse failures are reported as the [`Uuid::error`] sentinel, never as a
//! panic or error type, so a scanner can keep going and isolate one bad
//! token.

use crate::base64;
use crate::grammar;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier kind, encoded by the separator character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sep {
    /// `-`: an event id, globally unique and time-like.
    Event,
    /// `+`: a derived/version id.
    Derived,
    /// `$`: a name, a global constant with implicit origin `"0"`.
    Name,
    /// `%`: a hash.
    Hash,
}

impl Sep {
    pub fn as_char(self) -> char {
        match self {
            Sep::Event => '-',
            Sep::Derived => '+',
            Sep::Name => '$',
            Sep::Hash => '%',
        }
    }

    pub fn from_char(ch: char) -> Option<Sep> {
        match ch {
            '-' => Some(Sep::Event),
            '+' => Some(Sep::Derived),
            '$' => Some(Sep::Name),
            '%' => Some(Sep::Hash),
            _ => None,
        }
    }
}

/// Bracket markers for prefix compression. Table index `i` encodes
/// "reuse `4 + i` characters of context".
pub const PREFIXES: [char; 4] = ['(', '[', '{', '}'];

/// Shortest shared prefix worth compressing.
const MIN_ZIP: usize = 4;

/// Longest prefix skip a single marker can encode.
const MAX_ZIP: usize = MIN_ZIP + PREFIXES.len() - 1;

fn prefix_marker(skip: usize) -> char {
    PREFIXES[skip - MIN_ZIP]
}

fn marker_skip(ch: char) -> Option<usize> {
    PREFIXES.iter().position(|&p| p == ch).map(|i| MIN_ZIP + i)
}

/// A context-relative identifier. Immutable once constructed; every
/// derived identifier is a new instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uuid {
    value: String,
    origin: String,
    sep: Sep,
}

static RE_UUID: Lazy<Regex> = Lazy::new(|| {
    // Composed from the grammar's ZIP rule: (value)(sep (origin))?
    let zip = grammar::flat_pattern("ZIP").expect("grammar rule ZIP");
    Regex::new(&format!("({zip})(?:([-+$%])({zip}))?")).expect("UUID regex")
});

impl Uuid {
    /// The universal default/root identifier, `0`.
    pub fn zero() -> Uuid {
        Uuid {
            value: "0".to_string(),
            origin: "0".to_string(),
            sep: Sep::Name,
        }
    }

    /// The "end of time" marker used by unsubscribe queries, `~`. Like
    /// the zero identifier it is a global constant, so it carries the
    /// name separator and serializes to the bare symbol.
    pub fn never() -> Uuid {
        Uuid {
            value: "~".to_string(),
            origin: "0".to_string(),
            sep: Sep::Name,
        }
    }

    /// The parse-failure / causal-violation sentinel.
    pub fn error() -> Uuid {
        Uuid {
            value: "~~~~~~~~~~".to_string(),
            origin: "0".to_string(),
            sep: Sep::Event,
        }
    }

    /// Boolean `true` sentinel name.
    pub fn truth() -> Uuid {
        Uuid::name("true")
    }

    /// Boolean `false` sentinel name.
    pub fn falsehood() -> Uuid {
        Uuid::name("false")
    }

    /// Construct an identifier from raw parts. Parts are canonicalized
    /// (trailing zero symbols trimmed); invalid parts yield the error
    /// sentinel.
    pub fn new(value: &str, origin: &str, sep: Sep) -> Uuid {
        let value = trim_zeros(value);
        let origin = trim_zeros(origin);
        if !base64::is_base64(&value) || !base64::is_base64(&origin) {
            return Uuid::error();
        }
        if value.len() > 80 || origin.len() > 80 {
            return Uuid::error();
        }
        // The error word is reserved: any identifier carrying it collapses
        // to the canonical sentinel.
        if value == "~~~~~~~~~~" {
            return Uuid::error();
        }
        Uuid { value, origin, sep }
    }

    /// A name constant (`$`, origin `"0"`).
    pub fn name(value: &str) -> Uuid {
        Uuid::new(value, "0", Sep::Name)
    }

    /// An event identifier.
    pub fn event(value: &str, origin: &str) -> Uuid {
        Uuid::new(value, origin, Sep::Event)
    }

    /// A derived identifier sharing this identifier's value and origin.
    pub fn derived(&self) -> Uuid {
        Uuid {
            value: self.value.clone(),
            origin: self.origin.clone(),
            sep: Sep::Derived,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn sep(&self) -> Sep {
        self.sep
    }

    pub fn is_zero(&self) -> bool {
        self.value == "0" && self.origin == "0" && self.sep == Sep::Name
    }

    /// True when the value word is zero, regardless of origin. A zero
    /// stamp with a real origin is how a peer signals "I have no identity
    /// yet" during the handshake.
    pub fn has_zero_value(&self) -> bool {
        self.value == "0"
    }

    pub fn is_error(&self) -> bool {
        self.value == "~~~~~~~~~~"
    }

    pub fn is_never(&self) -> bool {
        self.value == "~" && self.origin == "0" && self.sep == Sep::Name
    }

    /// Time-like: an event or derived identifier.
    pub fn is_time(&self) -> bool {
        matches!(self.sep, Sep::Event | Sep::Derived)
    }

    pub fn is_event(&self) -> bool {
        self.sep == Sep::Event
    }

    pub fn is_derived(&self) -> bool {
        self.sep == Sep::Derived
    }

    pub fn is_name(&self) -> bool {
        self.sep == Sep::Name
    }

    pub fn is_hash(&self) -> bool {
        self.sep == Sep::Hash
    }

    /// Parse one identifier token from the whole of `text`. Trailing
    /// garbage yields the error sentinel.
    pub fn parse(text: &str, context: &Uuid) -> Uuid {
        match Uuid::parse_at(text, context, 0) {
            Some((uuid, consumed)) if consumed == text.len() => uuid,
            _ => Uuid::error(),
        }
    }

    /// Parse a standalone identifier string (context-free).
    pub fn parse_str(text: &str) -> Uuid {
        Uuid::parse(text, &Uuid::zero())
    }

    /// Parse one identifier token at `offset`, expanding compressed
    /// prefixes against `context`. Returns the identifier and the number
    /// of bytes consumed, or `None` when the grammar does not match at
    /// exactly that offset.
    pub fn parse_at(text: &str, context: &Uuid, offset: usize) -> Option<(Uuid, usize)> {
        let caps = RE_UUID.captures_at(text, offset)?;
        let whole = caps.get(0)?;
        if whole.start() != offset {
            return None;
        }
        let vpart = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let sep_ch = caps.get(2).map(|m| m.as_str().chars().next());
        let opart = caps.get(3).map(|m| m.as_str());

        let uuid = match sep_ch {
            None => {
                if whole.as_str().is_empty() {
                    context.clone()
                } else {
                    Uuid::expand_bare(vpart, context)?
                }
            }
            Some(Some(sep_ch)) => {
                let sep = Sep::from_char(sep_ch)?;
                let value = if vpart.is_empty() {
                    context.value.clone()
                } else {
                    unzip64(vpart, &context.value)?
                };
                let origin = match opart {
                    None | Some("") => "0".to_string(),
                    Some(opart) => unzip64(opart, &context.origin)?,
                };
                Uuid {
                    value,
                    origin,
                    sep,
                }
            }
            Some(None) => return None,
        };
        Some((uuid, whole.end() - offset))
    }

    /// A bare token with no separator: either a well-known shortcut, a
    /// compressed continuation of the context, or a plain name.
    fn expand_bare(vpart: &str, context: &Uuid) -> Option<Uuid> {
        match vpart {
            "0" => return Some(Uuid::zero()),
            "~" => return Some(Uuid::never()),
            "~~~~~~~~~~" => return Some(Uuid::error()),
            _ => {}
        }
        let first = vpart.chars().next()?;
        if marker_skip(first).is_some() {
            let value = unzip64(vpart, &context.value)?;
            Some(Uuid {
                value,
                origin: context.origin.clone(),
                sep: context.sep,
            })
        } else {
            Some(Uuid::name(vpart))
        }
    }

    /// Serialize relative to a context identifier: prefix elision via
    /// `zip64` on both fields, whole-field omission where the context
    /// already carries the same data, and bare-symbol shortcuts for the
    /// well-known identifiers.
    pub fn relative(&self, context: &Uuid) -> String {
        if self == context {
            return String::new();
        }
        if self.is_zero() {
            return "0".to_string();
        }
        if self.is_never() {
            return "~".to_string();
        }
        if self.is_error() {
            return "~~~~~~~~~~".to_string();
        }
        if self.origin == "0" {
            return match self.sep {
                Sep::Name => self.value.clone(),
                sep => format!("{}{}", self.value, sep.as_char()),
            };
        }
        let vz = zip64(&self.value, &context.value);
        if self.sep == context.sep && self.origin == context.origin {
            if let Some(first) = vz.chars().next() {
                if marker_skip(first).is_some() {
                    return vz;
                }
            }
        }
        let oz = if self.origin == context.origin {
            forced_zip(&self.origin)
        } else {
            zip64(&self.origin, &context.origin)
        };
        format!("{}{}{}", vz, self.sep.as_char(), oz)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.relative(&Uuid::zero());
        if text.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", text)
        }
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Uuid::zero()
    }
}

/// Compare two base64 words as right-zero-padded strings.
pub fn cmp_word(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars();
    let mut bi = b.chars();
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return Ordering::Equal,
            (a_ch, b_ch) => {
                let a_ch = a_ch.unwrap_or(base64::ZERO_CHAR);
                let b_ch = b_ch.unwrap_or(base64::ZERO_CHAR);
                match a_ch.cmp(&b_ch) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

impl Ord for Uuid {
    /// Value decides; on a tie the origin comparison is reversed, so the
    /// smaller origin string makes the greater identifier.
    fn cmp(&self, other: &Self) -> Ordering {
        match cmp_word(&self.value, &other.value) {
            Ordering::Equal => cmp_word(&other.origin, &self.origin),
            other => other,
        }
    }
}

impl PartialOrd for Uuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn trim_zeros(part: &str) -> String {
    let trimmed = part.trim_end_matches(base64::ZERO_CHAR);
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Compress `candidate` against `context`: find the shared prefix length
/// `p` (treating the context as right-zero-padded), elide entirely on
/// equality, leave alone when `p < 4`, otherwise emit a bracket marker for
/// `min(p, 7)` skipped characters followed by the remaining suffix,
/// trailing zero symbols stripped.
pub fn zip64(candidate: &str, context: &str) -> String {
    if candidate == context {
        return String::new();
    }
    let cand: Vec<char> = candidate.chars().collect();
    let ctx: Vec<char> = context.chars().collect();
    let mut p = 0;
    while p < cand.len() {
        let ctx_ch = ctx.get(p).copied().unwrap_or(base64::ZERO_CHAR);
        if cand[p] != ctx_ch {
            break;
        }
        p += 1;
    }
    if p < MIN_ZIP {
        return candidate.to_string();
    }
    let skip = p.min(MAX_ZIP);
    let suffix: String = cand[skip..].iter().collect();
    let suffix = suffix.trim_end_matches(base64::ZERO_CHAR);
    format!("{}{}", prefix_marker(skip), suffix)
}

/// Compress a part against itself: used when a field equals the context
/// but cannot be omitted. Falls back to the full text for short parts.
fn forced_zip(part: &str) -> String {
    if part.chars().count() < MIN_ZIP {
        return part.to_string();
    }
    let skip = part.chars().count().min(MAX_ZIP);
    let suffix: String = part.chars().skip(skip).collect();
    let suffix = suffix.trim_end_matches(base64::ZERO_CHAR);
    format!("{}{}", prefix_marker(skip), suffix)
}

/// Exact inverse of [`zip64`]: a leading marker reconstructs the first `p`
/// characters from the context (zero-padded when the context is shorter),
/// and the result is right-trimmed to canonical form. `None` when the text
/// is not a valid zipped token.
pub fn unzip64(text: &str, context: &str) -> Option<String> {
    if text.is_empty() {
        return Some(context.to_string());
    }
    let mut chars = text.chars();
    let first = chars.next()?;
    let expanded = match marker_skip(first) {
        Some(skip) => {
            let ctx: Vec<char> = context.chars().collect();
            let mut out = String::new();
            for i in 0..skip {
                out.push(ctx.get(i).copied().unwrap_or(base64::ZERO_CHAR));
            }
            out.extend(chars);
            out
        }
        None => text.to_string(),
    };
    let canonical = trim_zeros(&expanded);
    if !base64::is_base64(&canonical) {
        return None;
    }
    Some(canonical)
}
