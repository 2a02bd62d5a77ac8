//! Declarative token grammar
//!
//! The wire format is described by a small set of named rules. A rule is
//! either a literal pattern or a sequence of triplets (prefix marker,
//! sub-rule, quantifier). Rules compile lazily into composed regular
//! expressions; compiled forms are memoized per rule, so the cost is paid
//! once per process.
//!
//! The identifier and op parsers are built from these rules rather than
//! from hand-written recursive descent: they fetch a rule's pattern text
//! and anchor it at the position they are scanning.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from the grammar engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("unknown grammar rule: {0}")]
    UnknownRule(String),

    #[error("rule {0} failed to compile: {1}")]
    BadRule(&'static str, String),
}

/// Quantifier applied to a sub-rule inside a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quant {
    /// Exactly one.
    One,
    /// Zero or one.
    Opt,
    /// Zero or more (a repeated group; `split` returns it nested).
    Star,
}

/// One element of a sequence rule: an optional literal prefix (a regex
/// character class or escaped literal), the name of the sub-rule, and a
/// quantifier governing the `(prefix, sub-rule)` pair as a whole.
#[derive(Clone, Copy, Debug)]
pub struct Triplet {
    pub prefix: &'static str,
    pub rule: &'static str,
    pub quant: Quant,
}

/// The body of a rule.
#[derive(Clone, Copy, Debug)]
pub enum RuleForm {
    /// A raw regex fragment.
    Literal(&'static str),
    /// A sequence of triplets, concatenated.
    Sequence(&'static [Triplet]),
    /// An ordered alternation of other rules.
    Choice(&'static [&'static str]),
}

/// A named rule plus its lazily compiled artifacts.
pub struct Rule {
    pub name: &'static str,
    pub form: RuleForm,
    compiled: OnceCell<CompiledRule>,
}

struct CompiledRule {
    /// Pattern text with capture groups, for embedding into parsers.
    pattern: String,
    /// Pattern text without capture groups, for embedding into parents.
    flat: String,
    /// Anchored whole-string matcher.
    full: Regex,
    /// Splitter: the capturing pattern anchored at the start.
    splitter: Regex,
}

/// The rule table. Order matters only for `matching_rules` output.
static RULES: &[Rule] = &[
    Rule::new("BASE64", RuleForm::Literal(r"[0-9A-Za-z_~]{1,80}")),
    Rule::new(
        "ZIP",
        RuleForm::Literal(r"[(\[{}]?[0-9A-Za-z_~]{0,80}"),
    ),
    Rule::new(
        "UUID",
        RuleForm::Sequence(&[
            Triplet { prefix: "", rule: "ZIP", quant: Quant::One },
            Triplet { prefix: r"[-+$%]", rule: "ZIP", quant: Quant::Opt },
        ]),
    ),
    Rule::new("INT", RuleForm::Literal(r"=[+-]?[0-9]{1,17}")),
    Rule::new(
        "FLOAT",
        RuleForm::Literal(r"\^[+-]?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]{1,3})?"),
    ),
    Rule::new(
        "STRING",
        RuleForm::Literal(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#),
    ),
    Rule::new(
        "UUID_ATOM",
        RuleForm::Sequence(&[Triplet { prefix: ">", rule: "UUID", quant: Quant::One }]),
    ),
    Rule::new(
        "ATOM",
        RuleForm::Choice(&["INT", "STRING", "FLOAT", "UUID_ATOM"]),
    ),
    Rule::new(
        "ATOMS",
        RuleForm::Sequence(&[Triplet { prefix: "", rule: "ATOM", quant: Quant::Star }]),
    ),
    Rule::new("TERM", RuleForm::Literal(r"[;!?]")),
    Rule::new(
        "OP",
        RuleForm::Sequence(&[
            Triplet { prefix: r"\*", rule: "UUID", quant: Quant::Opt },
            Triplet { prefix: "#", rule: "UUID", quant: Quant::Opt },
            Triplet { prefix: "@", rule: "UUID", quant: Quant::Opt },
            Triplet { prefix: ":", rule: "UUID", quant: Quant::Opt },
            Triplet { prefix: "", rule: "ATOMS", quant: Quant::Opt },
            Triplet { prefix: "", rule: "TERM", quant: Quant::Opt },
        ]),
    ),
    Rule::new(
        "FRAME",
        RuleForm::Sequence(&[Triplet { prefix: "", rule: "OP", quant: Quant::Star }]),
    ),
];

impl Rule {
    const fn new(name: &'static str, form: RuleForm) -> Self {
        Rule {
            name,
            form,
            compiled: OnceCell::new(),
        }
    }

    fn compiled(&self) -> Result<&CompiledRule, GrammarError> {
        self.compiled.get_or_try_init(|| {
            let pattern = render(self, true)?;
            let flat = render(self, false)?;
            let full = Regex::new(&format!("^(?:{})$", flat))
                .map_err(|e| GrammarError::BadRule(self.name, e.to_string()))?;
            let splitter = Regex::new(&format!("^{}", pattern))
                .map_err(|e| GrammarError::BadRule(self.name, e.to_string()))?;
            Ok(CompiledRule {
                pattern,
                flat,
                full,
                splitter,
            })
        })
    }
}

fn lookup(name: &str) -> Result<&'static Rule, GrammarError> {
    static INDEX: OnceCell<HashMap<&'static str, &'static Rule>> = OnceCell::new();
    let index = INDEX.get_or_init(|| RULES.iter().map(|r| (r.name, r)).collect());
    index
        .get(name)
        .copied()
        .ok_or_else(|| GrammarError::UnknownRule(name.to_string()))
}

/// Render a rule into regex text. With `capture` set, each sub-rule of a
/// sequence becomes a capture group; referenced rules always flatten to
/// non-capturing form so group indices stay predictable.
fn render(rule: &Rule, capture: bool) -> Result<String, GrammarError> {
    match rule.form {
        RuleForm::Literal(text) => Ok(if capture {
            format!("({})", text)
        } else {
            format!("(?:{})", text)
        }),
        RuleForm::Sequence(triplets) => {
            let mut out = String::new();
            for t in triplets {
                let sub = lookup(t.rule)?;
                let inner = render(sub, false)?;
                let body = if capture {
                    format!("{}({})", t.prefix, inner)
                } else {
                    format!("{}(?:{})", t.prefix, inner)
                };
                match t.quant {
                    Quant::One => out.push_str(&body),
                    Quant::Opt => out.push_str(&format!("(?:{})?", body)),
                    Quant::Star => out.push_str(&format!("(?:{})*", body)),
                }
            }
            Ok(out)
        }
        RuleForm::Choice(names) => {
            let mut parts = Vec::new();
            for name in names {
                let sub = lookup(name)?;
                parts.push(render(sub, false)?);
            }
            let body = parts.join("|");
            Ok(if capture {
                format!("({})", body)
            } else {
                format!("(?:{})", body)
            })
        }
    }
}

/// A piece of a split: either a scalar capture or a nested group from a
/// repeated sub-rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Scalar(String),
    Group(Vec<Token>),
}

/// Exact full-string match against a named rule.
pub fn is(text: &str, rule: &str) -> Result<bool, GrammarError> {
    Ok(lookup(rule)?.compiled()?.full.is_match(text))
}

/// Split `text` by a rule's capture structure. Repeated groups (`Star`)
/// come back as nested [`Token::Group`]s, one element per repetition.
pub fn split(text: &str, rule: &str) -> Result<Vec<Token>, GrammarError> {
    let rule = lookup(rule)?;
    match rule.form {
        RuleForm::Sequence(triplets)
            if triplets.iter().any(|t| t.quant == Quant::Star) =>
        {
            split_repeated(text, triplets)
        }
        _ => {
            let compiled = rule.compiled()?;
            let caps = match compiled.splitter.captures(text) {
                Some(c) => c,
                None => return Ok(Vec::new()),
            };
            Ok(caps
                .iter()
                .skip(1)
                .map(|m| Token::Scalar(m.map(|m| m.as_str().to_string()).unwrap_or_default()))
                .collect())
        }
    }
}

/// Split a sequence containing repeated groups by scanning each repetition
/// in turn.
fn split_repeated(text: &str, triplets: &[Triplet]) -> Result<Vec<Token>, GrammarError> {
    let mut out = Vec::new();
    let mut rest = text;
    for t in triplets {
        let sub = lookup(t.rule)?;
        let compiled = sub.compiled()?;
        match t.quant {
            Quant::Star => {
                let mut group = Vec::new();
                loop {
                    let with_prefix = strip_prefix(rest, t.prefix, compiled);
                    match with_prefix {
                        Some((piece, remainder)) if !piece.is_empty() => {
                            group.push(Token::Scalar(piece.to_string()));
                            rest = remainder;
                        }
                        _ => break,
                    }
                }
                out.push(Token::Group(group));
            }
            Quant::One | Quant::Opt => {
                if let Some((piece, remainder)) = strip_prefix(rest, t.prefix, compiled) {
                    out.push(Token::Scalar(piece.to_string()));
                    rest = remainder;
                } else if t.quant == Quant::One {
                    return Ok(Vec::new());
                } else {
                    out.push(Token::Scalar(String::new()));
                }
            }
        }
    }
    Ok(out)
}

fn strip_prefix<'a>(
    text: &'a str,
    prefix: &str,
    compiled: &CompiledRule,
) -> Option<(&'a str, &'a str)> {
    let body = if prefix.is_empty() {
        text
    } else {
        // The prefix is either an escaped literal or a one-char class;
        // both match exactly one character here.
        let prefix_re = Regex::new(&format!("^{}", prefix)).ok()?;
        let m = prefix_re.find(text)?;
        &text[m.end()..]
    };
    let m = compiled.splitter.find(body)?;
    if m.start() != 0 {
        return None;
    }
    let consumed_prefix = text.len() - body.len();
    Some((
        &text[consumed_prefix..consumed_prefix + m.end()],
        &body[m.end()..],
    ))
}

/// All rule names the text fully matches.
pub fn matching_rules(text: &str) -> Vec<&'static str> {
    RULES
        .iter()
        .filter(|r| {
            r.compiled()
                .map(|c| c.full.is_match(text))
                .unwrap_or(false)
        })
        .map(|r| r.name)
        .collect()
}

/// The capturing pattern text of a rule, for composing parsers.
pub fn pattern(rule: &str) -> Result<String, GrammarError> {
    Ok(lookup(rule)?.compiled()?.pattern.clone())
}

/// The non-capturing pattern text of a rule.
pub fn flat_pattern(rule: &str) -> Result<String, GrammarError> {
    Ok(lookup(rule)?.compiled()?.flat.clone())
}
