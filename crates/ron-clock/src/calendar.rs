//! Calendar clock
//!
//! A Lamport clock whose counter prefix is derived from the wall clock,
//! so issued stamps approximate real time while staying strictly
//! monotonic. The value word packs calendar fields into base64:
//!
//! ```text
//! MM D H m S ss cc
//! ^^ months since 2010-01   (2 symbols)
//!    ^ day of month, 0-based (1 symbol)
//!      ^ hour                 (1 symbol)
//!        ^ minute             (1 symbol)
//!          ^ second           (1 symbol)
//!            ^^ millisecond   (2 symbols)
//!               ^^ sequence   (2 symbols, same-millisecond ties)
//! ```
//!
//! When a peer's stamp runs ahead of local wall time the clock keeps
//! issuing past it and remembers the skew as an offset; `adjust` walks
//! the offset back toward zero in bounded steps so consumers deriving
//! wall-clock estimates never see a jump backwards.

use crate::logical;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use ron_wire::base64::{base2int, int2base};
use ron_wire::uuid::{cmp_word, Uuid};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Calendar epoch: 2010-01-01T00:00:00Z, as Unix milliseconds.
const EPOCH_MS: i64 = 1_262_304_000_000;

/// A wall-clock-approximating monotone clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarClock {
    origin: String,
    last: String,
    offset_ms: i64,
}

impl CalendarClock {
    pub fn new(origin: impl Into<String>) -> CalendarClock {
        CalendarClock {
            origin: origin.into(),
            last: "0".to_string(),
            offset_ms: 0,
        }
    }

    /// Resume from a persisted last-issued timestamp.
    pub fn resume(origin: impl Into<String>, last_seen: &Uuid) -> CalendarClock {
        let mut clock = CalendarClock::new(origin);
        clock.see(last_seen);
        clock
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The current offset between issued stamps and the wall clock.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// The most recently issued (or seen) timestamp.
    pub fn time(&self) -> Uuid {
        Uuid::event(&self.last, &self.origin)
    }

    /// Issue a fresh timestamp, strictly greater than anything issued or
    /// seen, tracking the wall clock as closely as monotonicity allows.
    pub fn issue(&mut self) -> Uuid {
        self.issue_at(Utc::now().timestamp_millis())
    }

    /// Issue against an explicit wall-clock reading (test seam; `issue`
    /// is the production entry point).
    pub fn issue_at(&mut self, wall_ms: i64) -> Uuid {
        let candidate = encode_ms(wall_ms + self.offset_ms);
        if cmp_word(&candidate, &self.last) == Ordering::Greater {
            self.last = candidate;
        } else {
            // Wall clock is behind the stream: keep counting forward and
            // remember how far ahead of real time we are.
            self.last = logical::increment(&self.last, 10);
            if let Some(last_ms) = decode_ms(&self.last) {
                self.offset_ms = (last_ms - wall_ms).max(self.offset_ms);
            }
        }
        Uuid::event(&self.last, &self.origin)
    }

    /// Advance past an observed identifier; never regresses.
    pub fn see(&mut self, observed: &Uuid) {
        if !observed.is_time() || observed.is_error() {
            return;
        }
        if cmp_word(observed.value(), &self.last) == Ordering::Greater {
            self.last = observed.value().to_string();
        }
    }

    /// Nudge the offset toward zero by at most `max_step_ms`. Called
    /// periodically; bounded steps keep derived wall-clock estimates from
    /// visibly jumping.
    pub fn adjust(&mut self, max_step_ms: i64) {
        let step = self.offset_ms.abs().min(max_step_ms.abs());
        if self.offset_ms > 0 {
            self.offset_ms -= step;
        } else {
            self.offset_ms += step;
        }
    }
}

/// Encode Unix milliseconds into the 10-symbol calendar word, trailing
/// zeros trimmed to canonical form.
pub fn encode_ms(unix_ms: i64) -> String {
    let unix_ms = unix_ms.max(EPOCH_MS);
    let dt = match Utc.timestamp_millis_opt(unix_ms).single() {
        Some(dt) => dt,
        None => return "0".to_string(),
    };
    let months = (dt.year() - 2010) as u64 * 12 + u64::from(dt.month0());
    let mut word = String::new();
    word.push_str(&int2base(months, 2).unwrap_or_default());
    word.push_str(&int2base(u64::from(dt.day0()), 1).unwrap_or_default());
    word.push_str(&int2base(u64::from(dt.hour()), 1).unwrap_or_default());
    word.push_str(&int2base(u64::from(dt.minute()), 1).unwrap_or_default());
    word.push_str(&int2base(u64::from(dt.second()), 1).unwrap_or_default());
    word.push_str(&int2base(u64::from(dt.timestamp_subsec_millis().min(999)), 2).unwrap_or_default());
    let trimmed = word.trim_end_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Decode a calendar word back into approximate Unix milliseconds.
/// Ignores the sequence symbols; `None` for words that do not decode.
pub fn decode_ms(word: &str) -> Option<i64> {
    let padded: Vec<char> = {
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() < 10 {
            chars.push('0');
        }
        chars
    };
    let field = |range: std::ops::Range<usize>| -> Option<u64> {
        let text: String = padded.get(range)?.iter().collect();
        base2int(&text).ok()
    };
    let months = field(0..2)?;
    let day0 = field(2..3)?;
    let hour = field(3..4)?;
    let minute = field(4..5)?;
    let second = field(5..6)?;
    let millis = field(6..8)?;
    let year = 2010 + (months / 12) as i32;
    let month = (months % 12) as u32 + 1;
    let dt = Utc
        .with_ymd_and_hms(year, month, day0 as u32 + 1, hour as u32, minute as u32, second as u32)
        .single()?;
    Some(dt.timestamp_millis() + millis as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-06-15T12:30:45.500Z
    const WALL: i64 = 1_623_760_245_500;

    #[test]
    fn test_encode_decode_roundtrip() {
        let word = encode_ms(WALL);
        let back = decode_ms(&word).unwrap();
        assert_eq!(back, WALL);
    }

    #[test]
    fn test_encode_is_monotone_in_time() {
        let a = encode_ms(WALL);
        let b = encode_ms(WALL + 1);
        let c = encode_ms(WALL + 60_000);
        assert_eq!(cmp_word(&a, &b), Ordering::Less);
        assert_eq!(cmp_word(&b, &c), Ordering::Less);
    }

    #[test]
    fn test_issue_strictly_increasing_same_millisecond() {
        let mut clock = CalendarClock::new("orig");
        let mut prev = clock.issue_at(WALL);
        for _ in 0..100 {
            let next = clock.issue_at(WALL);
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_issue_tracks_wall_clock() {
        let mut clock = CalendarClock::new("orig");
        let early = clock.issue_at(WALL);
        let late = clock.issue_at(WALL + 5_000);
        assert!(late > early);
        let decoded = decode_ms(late.value()).unwrap();
        assert_eq!(decoded, WALL + 5_000);
    }

    #[test]
    fn test_offset_builds_when_stream_runs_ahead() {
        let mut clock = CalendarClock::new("orig");
        // A peer stamp one minute in our future
        clock.see(&Uuid::event(&encode_ms(WALL + 60_000), "peer"));
        clock.issue_at(WALL);
        assert!(clock.offset_ms() > 0);
        // Issued stamps stay monotone despite the skew
        let a = clock.issue_at(WALL);
        let b = clock.issue_at(WALL + 1);
        assert!(b > a);
    }

    #[test]
    fn test_adjust_is_bounded() {
        let mut clock = CalendarClock::new("orig");
        clock.see(&Uuid::event(&encode_ms(WALL + 60_000), "peer"));
        clock.issue_at(WALL);
        let before = clock.offset_ms();
        clock.adjust(1_000);
        let after = clock.offset_ms();
        assert!(before - after <= 1_000);
        assert!(after < before);
        // Repeated adjustment converges to zero and stops
        for _ in 0..100 {
            clock.adjust(1_000);
        }
        assert_eq!(clock.offset_ms(), 0);
        clock.adjust(1_000);
        assert_eq!(clock.offset_ms(), 0);
    }

    #[test]
    fn test_see_never_regresses() {
        let mut clock = CalendarClock::new("orig");
        let stamp = clock.issue_at(WALL);
        clock.see(&Uuid::event("0", "peer"));
        assert_eq!(clock.time(), stamp);
    }
}
