//! Logical (Lamport) clock
//!
//! Issues event identifiers that are strictly greater than anything this
//! clock has issued or seen before. The counter is not a fixed-width
//! wraparound integer: it is an open-ended, lexicographically increasing
//! base64 string. Incrementing works like long-hand addition over the
//! alphabet — bump the lowest non-saturated position, clear everything
//! after it — and the string only grows when every position is saturated
//! at the maximum symbol.

use ron_wire::base64::{MAX_CHAR, ZERO_CHAR};
use ron_wire::uuid::{cmp_word, Uuid};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default counter width in base64 symbols.
pub const DEFAULT_WIDTH: usize = 5;

/// A per-origin Lamport clock. One instance per replica session; the
/// `last` word is persisted across restarts with the handshake record so
/// monotonicity survives the process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalClock {
    origin: String,
    last: String,
    width: usize,
}

impl LogicalClock {
    pub fn new(origin: impl Into<String>) -> LogicalClock {
        LogicalClock {
            origin: origin.into(),
            last: "0".to_string(),
            width: DEFAULT_WIDTH,
        }
    }

    pub fn with_width(origin: impl Into<String>, width: usize) -> LogicalClock {
        LogicalClock {
            origin: origin.into(),
            last: "0".to_string(),
            width: width.max(1),
        }
    }

    /// Resume from a persisted last-issued timestamp.
    pub fn resume(origin: impl Into<String>, last_seen: &Uuid) -> LogicalClock {
        let mut clock = LogicalClock::new(origin);
        clock.see(last_seen);
        clock
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The most recently issued (or seen) timestamp.
    pub fn time(&self) -> Uuid {
        Uuid::event(&self.last, &self.origin)
    }

    /// Issue a timestamp strictly greater than anything issued or seen.
    pub fn issue(&mut self) -> Uuid {
        self.last = increment(&self.last, self.width);
        Uuid::event(&self.last, &self.origin)
    }

    /// Advance the clock past an observed identifier. Never regresses:
    /// identifiers at or below the current position are ignored.
    pub fn see(&mut self, observed: &Uuid) {
        if !observed.is_time() || observed.is_error() {
            return;
        }
        if cmp_word(observed.value(), &self.last) == Ordering::Greater {
            self.last = observed.value().to_string();
        }
    }
}

/// Increment a base64 word in place, long-hand style: pad to `width`,
/// bump the lowest position that is not the maximum symbol, clear the
/// saturated tail, and extend the word only when every position is
/// saturated.
pub fn increment(word: &str, width: usize) -> String {
    let mut chars: Vec<char> = word.trim_end_matches(ZERO_CHAR).chars().collect();
    while chars.len() < width {
        chars.push(ZERO_CHAR);
    }
    // Find the lowest-order position that can still be bumped.
    for i in (0..chars.len()).rev() {
        if chars[i] != MAX_CHAR {
            chars[i] = next_symbol(chars[i]);
            chars.truncate(i + 1);
            let out: String = chars.into_iter().collect();
            let trimmed = out.trim_end_matches(ZERO_CHAR);
            return if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            };
        }
    }
    // Every position saturated: extend.
    chars.push('1');
    chars.into_iter().collect()
}

fn next_symbol(ch: char) -> char {
    const ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";
    let mut iter = ALPHABET.chars().skip_while(|&c| c != ch);
    iter.next();
    iter.next().unwrap_or(MAX_CHAR)
}
