//! Atom values
//!
//! An op carries a tail of typed atoms: signed integers (`=N`), floats
//! (`^F`), quoted strings (single or double, JSON-escaped interior), and
//! identifier atoms (`>UUID`). Booleans and null are spelled as the
//! well-known name identifiers `>true`, `>false`, `>0`.

use crate::grammar::{self, Token};
use crate::uuid::Uuid;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from atom (de)serialization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AtomError {
    #[error("malformed atom at {0:?}")]
    Malformed(String),

    #[error("bad escape in string atom: {0:?}")]
    BadEscape(String),

    #[error("atom tail has trailing garbage: {0:?}")]
    TrailingGarbage(String),
}

/// One parsed atom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    Int(i64),
    Float(f64),
    String(String),
    Uuid(Uuid),
}

impl Atom {
    /// The boolean sentinel spelled as an identifier atom.
    pub fn bool(value: bool) -> Atom {
        if value {
            Atom::Uuid(Uuid::truth())
        } else {
            Atom::Uuid(Uuid::falsehood())
        }
    }

    /// The null sentinel (`>0`).
    pub fn null() -> Atom {
        Atom::Uuid(Uuid::zero())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Atom::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Atom::Uuid(u) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Int(i) => write!(f, "={}", i),
            Atom::Float(x) => write!(f, "^{}", x),
            Atom::String(s) => write!(f, "'{}'", escape(s, '\'')),
            Atom::Uuid(u) => write!(f, ">{}", u),
        }
    }
}

/// Parse a raw atom tail into typed atoms. The raw text must consist of
/// back-to-back atom tokens with nothing in between.
pub fn parse_atoms(raw: &str) -> Result<Vec<Atom>, AtomError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let tokens = grammar::split(raw, "ATOMS")
        .map_err(|_| AtomError::Malformed(raw.to_string()))?;
    let group = match tokens.first() {
        Some(Token::Group(group)) => group,
        _ => return Err(AtomError::Malformed(raw.to_string())),
    };
    let mut atoms = Vec::new();
    let mut consumed = 0;
    for token in group {
        let text = match token {
            Token::Scalar(s) => s,
            Token::Group(_) => return Err(AtomError::Malformed(raw.to_string())),
        };
        consumed += text.len();
        atoms.push(parse_one(text)?);
    }
    if consumed != raw.len() {
        return Err(AtomError::TrailingGarbage(raw[consumed..].to_string()));
    }
    Ok(atoms)
}

fn parse_one(text: &str) -> Result<Atom, AtomError> {
    let mut chars = text.chars();
    match chars.next() {
        Some('=') => chars
            .as_str()
            .parse::<i64>()
            .map(Atom::Int)
            .map_err(|_| AtomError::Malformed(text.to_string())),
        Some('^') => chars
            .as_str()
            .parse::<f64>()
            .map(Atom::Float)
            .map_err(|_| AtomError::Malformed(text.to_string())),
        Some(quote @ ('\'' | '"')) => {
            let inner = chars.as_str();
            let inner = inner
                .strip_suffix(quote)
                .ok_or_else(|| AtomError::Malformed(text.to_string()))?;
            Ok(Atom::String(unescape(inner)?))
        }
        Some('>') => {
            let id = Uuid::parse_str(chars.as_str());
            if id.is_error() && chars.as_str() != "~~~~~~~~~~" {
                return Err(AtomError::Malformed(text.to_string()));
            }
            Ok(Atom::Uuid(id))
        }
        _ => Err(AtomError::Malformed(text.to_string())),
    }
}

/// Serialize atoms back into a raw tail.
pub fn format_atoms(atoms: &[Atom]) -> String {
    atoms.iter().map(|a| a.to_string()).collect()
}

/// Rewrite a string atom's quoting style, re-escaping as needed. Used when
/// embedding a single-quoted value into a double-quoted context or vice
/// versa; text already in the target style passes through unchanged.
pub fn flip_quotes(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some('\'') => match chars.as_str().strip_suffix('\'') {
            Some(inner) => match unescape(inner) {
                Ok(plain) => format!("\"{}\"", escape(&plain, '"')),
                Err(_) => token.to_string(),
            },
            None => token.to_string(),
        },
        Some('"') => match chars.as_str().strip_suffix('"') {
            Some(inner) => match unescape(inner) {
                Ok(plain) => format!("'{}'", escape(&plain, '\'')),
                Err(_) => token.to_string(),
            },
            None => token.to_string(),
        },
        _ => token.to_string(),
    }
}

fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> Result<String, AtomError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| AtomError::BadEscape(hex.clone()))?;
                out.push(
                    char::from_u32(code).ok_or_else(|| AtomError::BadEscape(hex.clone()))?,
                );
            }
            Some(c @ ('\\' | '\'' | '"' | '/')) => out.push(c),
            other => {
                return Err(AtomError::BadEscape(
                    other.map(String::from).unwrap_or_default(),
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_atoms("=1").unwrap(), vec![Atom::Int(1)]);
        assert_eq!(parse_atoms("=-42").unwrap(), vec![Atom::Int(-42)]);
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_atoms("^3.5").unwrap(), vec![Atom::Float(3.5)]);
        assert_eq!(parse_atoms("^1e3").unwrap(), vec![Atom::Float(1000.0)]);
    }

    #[test]
    fn test_parse_strings() {
        assert_eq!(
            parse_atoms("'hi'").unwrap(),
            vec![Atom::String("hi".to_string())]
        );
        assert_eq!(
            parse_atoms(r#""a\"b""#).unwrap(),
            vec![Atom::String("a\"b".to_string())]
        );
        assert_eq!(
            parse_atoms(r"'line\nbreak'").unwrap(),
            vec![Atom::String("line\nbreak".to_string())]
        );
    }

    #[test]
    fn test_parse_uuid_atom() {
        let atoms = parse_atoms(">time-orig").unwrap();
        assert_eq!(atoms, vec![Atom::Uuid(Uuid::event("time", "orig"))]);
    }

    #[test]
    fn test_bool_and_null_sentinels() {
        assert_eq!(parse_atoms(">true").unwrap(), vec![Atom::bool(true)]);
        assert_eq!(parse_atoms(">false").unwrap(), vec![Atom::bool(false)]);
        assert_eq!(parse_atoms(">0").unwrap(), vec![Atom::null()]);
    }

    #[test]
    fn test_parse_mixed_tail() {
        let atoms = parse_atoms("=1'two'^3.5").unwrap();
        assert_eq!(
            atoms,
            vec![
                Atom::Int(1),
                Atom::String("two".to_string()),
                Atom::Float(3.5)
            ]
        );
    }

    #[test]
    fn test_malformed() {
        assert!(parse_atoms("=").is_err());
        assert!(parse_atoms("'unterminated").is_err());
        assert!(parse_atoms("=1 garbage").is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        let atoms = vec![
            Atom::Int(-7),
            Atom::String("hi 'there'".to_string()),
            Atom::Uuid(Uuid::event("time", "orig")),
        ];
        let raw = format_atoms(&atoms);
        assert_eq!(parse_atoms(&raw).unwrap(), atoms);
    }

    #[test]
    fn test_flip_quotes() {
        assert_eq!(flip_quotes("'hi'"), "\"hi\"");
        assert_eq!(flip_quotes("\"hi\""), "'hi'");
        assert_eq!(flip_quotes(r#"'it\'s'"#), r#""it's""#);
        assert_eq!(flip_quotes("=1"), "=1");
    }
}
