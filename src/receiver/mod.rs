// src/receiver/mod.rs  —  Timestamped key edges → characters, with adaptive speed tracking
//
// State machine:
//   Idle ─start→ InMark ─end→ AfterMark ─start (ims)→ InMark …
//   AfterMark ─poll, space ≥ 2u→ AfterChar ─poll, space ≥ (5+gap)u→ AfterWord
//   InMark ─end, mark too long→ Error   (then behaves like AfterMark, flagged)
//
// Timestamps are offsets from the receiver's epoch; `None` means "now".
pub mod stats;

pub use stats::{StatKind, Statistics, TimingSpread, STATISTICS_CAPACITY};

use crate::error::{CwError, Result};
use crate::generator::SPEED_LIMITS;
use crate::keyer::Element;
use crate::morse::table::{self, MAX_REPRESENTATION_LEN};
use crate::morse::timing::DOT_CALIBRATION_US;
use stats::Averager;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

pub const DEFAULT_NOISE_THRESHOLD_US: u32 = 10_000;
pub const DEFAULT_TOLERANCE_PCT:      u32 = 50;
pub const DEFAULT_RECEIVE_SPEED:      u32 = 12;

pub const TOLERANCE_LIMITS: RangeInclusive<u32> = 0..=90;
pub const GAP_LIMITS:       RangeInclusive<u32> = 0..=60;

const UNIT_MIN_US: i64 = DOT_CALIBRATION_US / *SPEED_LIMITS.end() as i64;
const UNIT_MAX_US: i64 = DOT_CALIBRATION_US / *SPEED_LIMITS.start() as i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    InMark,
    /// Inside a character, between marks
    AfterMark,
    /// A character has ended; it may or may not have been polled
    AfterChar,
    AfterWord,
    /// A mark could not be classified
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledRepresentation {
    pub representation: String,
    /// At least one inter-word space has passed since the last mark
    pub is_iws:         bool,
    pub is_error:       bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolledCharacter {
    pub character: char,
    pub is_iws:    bool,
    pub is_error:  bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    InterMark,
    InterCharacter,
    InterWord,
}

fn check(name: &str, value: u32, limits: &RangeInclusive<u32>) -> Result<()> {
    if limits.contains(&value) {
        Ok(())
    } else {
        Err(CwError::invalid(format!(
            "{name} {value} outside {}..={}", limits.start(), limits.end()
        )))
    }
}

/// Single-owner; wrap it in a mutex to feed it from a generator callback
pub struct Receiver {
    state:           ReceiverState,
    /// Restored when a mark turns out to be noise
    before_mark:     ReceiverState,
    /// The mark in progress opens a new character; the old one is dropped
    /// once the mark passes the noise filter
    clear_on_accept: bool,
    /// Space before the mark in progress, recorded once the mark is accepted
    pending_space:   Option<(StatKind, i64)>,
    unit:            i64,
    adaptive:        bool,
    tolerance_pct:   u32,
    noise_threshold: i64,
    gap:             u32,
    epoch:           Instant,
    mark_start:      i64,
    mark_end:        i64,
    representation:  String,
    errored:         bool,
    /// The character ending at AfterChar was handed out already
    consumed:        bool,
    dots:            Averager,
    dashes:          Averager,
    stats:           Statistics,
}

impl Default for Receiver {
    fn default() -> Self { Self::new() }
}

impl Receiver {
    pub fn new() -> Self {
        let unit = DOT_CALIBRATION_US / DEFAULT_RECEIVE_SPEED as i64;
        Self {
            state:           ReceiverState::Idle,
            before_mark:     ReceiverState::Idle,
            clear_on_accept: false,
            pending_space:   None,
            unit,
            adaptive:        false,
            tolerance_pct:   DEFAULT_TOLERANCE_PCT,
            noise_threshold: DEFAULT_NOISE_THRESHOLD_US as i64,
            gap:             0,
            epoch:           Instant::now(),
            mark_start:      0,
            mark_end:        0,
            representation:  String::with_capacity(MAX_REPRESENTATION_LEN),
            errored:         false,
            consumed:        false,
            dots:            Averager::seeded(unit),
            dashes:          Averager::seeded(3 * unit),
            stats:           Statistics::default(),
        }
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    /// Fixes the unit; in adaptive mode this is the new starting point
    pub fn set_speed(&mut self, wpm: u32) -> Result<()> {
        check("receive speed", wpm, &SPEED_LIMITS)?;
        self.unit = DOT_CALIBRATION_US / wpm as i64;
        self.reseed();
        log::debug!("[rec] speed {} wpm", wpm);
        Ok(())
    }

    /// Current speed; follows the sender in adaptive mode
    pub fn speed(&self) -> f64 { DOT_CALIBRATION_US as f64 / self.unit as f64 }

    pub fn enable_adaptive(&mut self, on: bool) {
        if on && !self.adaptive {
            self.reseed();
        }
        self.adaptive = on;
        log::debug!("[rec] adaptive {}", on);
    }

    pub fn is_adaptive(&self) -> bool { self.adaptive }

    /// How far one adaptive step may move the unit, in percent
    pub fn set_tolerance_pct(&mut self, pct: u32) -> Result<()> {
        check("tolerance", pct, &TOLERANCE_LIMITS)?;
        self.tolerance_pct = pct;
        Ok(())
    }

    pub fn tolerance_pct(&self) -> u32 { self.tolerance_pct }

    /// Marks shorter than this are dropped.  0 disables the filter.
    pub fn set_noise_threshold_us(&mut self, us: u32) {
        self.noise_threshold = us as i64;
    }

    pub fn noise_threshold_us(&self) -> u32 { self.noise_threshold as u32 }

    /// Extra units the sender leaves between characters
    pub fn set_gap(&mut self, units: u32) -> Result<()> {
        check("receive gap", units, &GAP_LIMITS)?;
        self.gap = units;
        Ok(())
    }

    pub fn gap(&self) -> u32 { self.gap }

    pub fn state(&self) -> ReceiverState { self.state }

    /// Marks received so far for the current character
    pub fn representation(&self) -> &str {
        if self.clear_on_accept { "" } else { &self.representation }
    }

    pub fn statistics(&self) -> TimingSpread { self.stats.spread() }

    pub fn reset_statistics(&mut self) { self.stats.clear(); }

    /// Drop the character in progress.  Parameters and statistics stay.
    pub fn clear(&mut self) {
        self.state = ReceiverState::Idle;
        self.before_mark = ReceiverState::Idle;
        self.clear_on_accept = false;
        self.pending_space = None;
        self.representation.clear();
        self.errored = false;
        self.consumed = false;
    }

    // ── Edges ────────────────────────────────────────────────────────────────

    pub fn start_tone(&mut self, timestamp: Option<Duration>) -> Result<()> {
        let t = self.resolve(timestamp)?;
        let space = t - self.mark_end;
        let (clear, pending_space) = match self.state {
            ReceiverState::InMark | ReceiverState::AfterWord => return Err(CwError::OutOfOrder),
            ReceiverState::AfterChar if !self.consumed => return Err(CwError::OutOfOrder),
            ReceiverState::AfterChar => {
                let stat = (self.classify_space(space) == Space::InterCharacter)
                    .then(|| (StatKind::InterCharacterSpace, space - 3 * self.unit));
                (true, stat)
            }
            ReceiverState::AfterMark | ReceiverState::Error => {
                if self.classify_space(space) != Space::InterMark {
                    // a character ended and nobody polled it
                    return Err(CwError::OutOfOrder);
                }
                (false, Some((StatKind::InterMarkSpace, space - self.unit)))
            }
            ReceiverState::Idle => (false, None),
        };
        self.clear_on_accept = clear;
        self.pending_space = pending_space;
        self.before_mark = self.state;
        self.mark_start = t;
        self.state = ReceiverState::InMark;
        Ok(())
    }

    /// Classifies the mark that just ended.  A mark under the noise
    /// threshold is forgotten and reported as `WouldBlock`.
    pub fn end_tone(&mut self, timestamp: Option<Duration>) -> Result<Element> {
        if self.state != ReceiverState::InMark {
            return Err(CwError::OutOfOrder);
        }
        let t = self.resolve(timestamp)?;
        let length = t - self.mark_start;

        if self.noise_threshold > 0 && length < self.noise_threshold {
            log::trace!("[rec] {} us mark dropped as noise", length);
            self.state = self.before_mark;
            self.clear_on_accept = false;
            self.pending_space = None;
            return Err(CwError::WouldBlock);
        }
        self.accept_mark();

        let element = if length < 2 * self.unit {
            Element::Dot
        } else if length <= 5 * self.unit {
            Element::Dash
        } else {
            return Err(self.fail(t, format!("mark of {length} us at unit {} us", self.unit)));
        };
        self.push_element(element, t)?;

        match element {
            Element::Dot  => self.stats.record(StatKind::Dot, length - self.unit),
            Element::Dash => self.stats.record(StatKind::Dash, length - 3 * self.unit),
        }
        if self.adaptive {
            match element {
                Element::Dot  => self.dots.push(length),
                Element::Dash => self.dashes.push(length),
            }
            self.adapt();
        }
        Ok(element)
    }

    /// Append an element whose mark ended at `timestamp`, skipping
    /// classification (a keyer that knows what it sent can use this).
    pub fn add_mark(&mut self, element: Element, timestamp: Option<Duration>) -> Result<()> {
        let t = self.resolve(timestamp)?;
        match self.state {
            ReceiverState::Idle | ReceiverState::AfterMark | ReceiverState::Error => {
                self.push_element(element, t)
            }
            _ => Err(CwError::OutOfOrder),
        }
    }

    /// The mark in progress is real: settle what `start_tone` left pending
    fn accept_mark(&mut self) {
        if self.clear_on_accept {
            self.clear();
        }
        if let Some((kind, delta)) = self.pending_space.take() {
            self.stats.record(kind, delta);
        }
    }

    fn push_element(&mut self, element: Element, t: i64) -> Result<()> {
        if self.representation.len() >= MAX_REPRESENTATION_LEN {
            return Err(self.fail(t, format!("more than {MAX_REPRESENTATION_LEN} marks")));
        }
        self.representation.push(element.symbol());
        self.mark_end = t;
        self.state = if self.errored { ReceiverState::Error } else { ReceiverState::AfterMark };
        Ok(())
    }

    fn fail(&mut self, t: i64, what: String) -> CwError {
        log::debug!("[rec] error: {}", what);
        self.mark_end = t;
        self.errored = true;
        self.state = ReceiverState::Error;
        CwError::InvalidRepresentation(what)
    }

    // ── Polling ──────────────────────────────────────────────────────────────

    /// The marks of the current character, once a character space has
    /// passed.  Does not consume them.
    pub fn poll_representation(&mut self, now: Option<Duration>) -> Result<PolledRepresentation> {
        let now = self.resolve(now)?;
        let space = self.classify_space(now - self.mark_end);
        match self.state {
            ReceiverState::Idle   => return Err(CwError::WouldBlock),
            ReceiverState::InMark => return Err(CwError::OutOfOrder),
            ReceiverState::AfterMark | ReceiverState::Error => match space {
                Space::InterMark      => return Err(CwError::WouldBlock),
                Space::InterCharacter => self.state = ReceiverState::AfterChar,
                Space::InterWord      => self.state = ReceiverState::AfterWord,
            },
            ReceiverState::AfterChar => {
                if space == Space::InterWord {
                    self.state = ReceiverState::AfterWord;
                }
            }
            ReceiverState::AfterWord => {}
        }
        Ok(PolledRepresentation {
            representation: self.representation.clone(),
            is_iws:         self.state == ReceiverState::AfterWord,
            is_error:       self.errored,
        })
    }

    /// The current character, once a character space has passed.  A
    /// character polled before the word space ends is followed by one
    /// more poll result, `' '` with `is_iws`, once the word space is over.
    pub fn poll_character(&mut self, now: Option<Duration>) -> Result<PolledCharacter> {
        let polled = self.poll_representation(now)?;
        if self.consumed {
            if !polled.is_iws {
                return Err(CwError::WouldBlock);
            }
            self.clear();
            return Ok(PolledCharacter { character: ' ', is_iws: true, is_error: false });
        }

        let character = match table::lookup_representation(&polled.representation) {
            Ok(ch) => ch,
            Err(e) => {
                self.clear();
                return Err(e);
            }
        };
        if polled.is_iws {
            self.clear();
        } else {
            self.consumed = true;
        }
        log::trace!("[rec] {:?} → {:?}", polled.representation, character);
        Ok(PolledCharacter { character, is_iws: polled.is_iws, is_error: polled.is_error })
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn resolve(&self, timestamp: Option<Duration>) -> Result<i64> {
        let t = timestamp.unwrap_or_else(|| self.epoch.elapsed());
        let t = i64::try_from(t.as_micros()).map_err(|_| CwError::TimestampInvalid)?;
        let last_edge = if self.state == ReceiverState::InMark { self.mark_start } else { self.mark_end };
        if t < last_edge {
            return Err(CwError::TimestampInvalid);
        }
        Ok(t)
    }

    fn classify_space(&self, space: i64) -> Space {
        if space < 2 * self.unit {
            Space::InterMark
        } else if space < (5 + self.gap as i64) * self.unit {
            Space::InterCharacter
        } else {
            Space::InterWord
        }
    }

    fn reseed(&mut self) {
        self.dots = Averager::seeded(self.unit);
        self.dashes = Averager::seeded(3 * self.unit);
    }

    /// Unit from the recent dots and dashes, moved at most by the tolerance
    fn adapt(&mut self) {
        let estimate = (self.dots.median() + self.dashes.median() / 3) / 2;
        let reach = self.unit * self.tolerance_pct as i64 / 100;
        let unit = estimate
            .clamp(self.unit - reach, self.unit + reach)
            .clamp(UNIT_MIN_US, UNIT_MAX_US);
        if unit != self.unit {
            log::trace!("[rec] unit {} → {} us", self.unit, unit);
            self.unit = unit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const U: u64 = 100_000; // 12 wpm

    fn at(us: u64) -> Option<Duration> { Some(Duration::from_micros(us)) }

    fn mark(r: &mut Receiver, start: u64, len: u64) -> Result<Element> {
        r.start_tone(at(start))?;
        r.end_tone(at(start + len))
    }

    #[test]
    fn marks_are_classified_by_length() {
        let mut r = Receiver::new();
        assert_eq!(mark(&mut r, 0, U), Ok(Element::Dot));
        assert_eq!(mark(&mut r, 2 * U, 3 * U), Ok(Element::Dash));
        assert_eq!(r.representation(), ".-");
        assert_eq!(r.state(), ReceiverState::AfterMark);
    }

    #[test]
    fn noise_is_dropped_and_state_restored() {
        let mut r = Receiver::new();
        mark(&mut r, 0, U).unwrap();
        assert_eq!(mark(&mut r, 2 * U - 10, 5_000), Err(CwError::WouldBlock));
        assert_eq!(r.state(), ReceiverState::AfterMark);
        assert_eq!(r.representation(), ".");
    }

    #[test]
    fn noise_leaves_the_statistics_alone() {
        let mut r = Receiver::new();
        mark(&mut r, 0, U).unwrap();
        // half a unit after the dot: a real mark here would be early
        assert_eq!(mark(&mut r, U + U / 2, 3_000), Err(CwError::WouldBlock));
        assert_eq!(r.statistics().inter_mark_space, 0.0);

        assert_eq!(mark(&mut r, 2 * U, U), Ok(Element::Dot));
        assert_eq!(r.statistics().inter_mark_space, 0.0);
        assert_eq!(r.representation(), "..");
    }

    #[test]
    fn noise_after_a_polled_character_keeps_it_closed() {
        let mut r = Receiver::new();
        mark(&mut r, 0, U).unwrap();
        assert_eq!(r.poll_character(at(4 * U)).unwrap().character, 'E');

        r.start_tone(at(5 * U)).unwrap();
        assert_eq!(r.representation(), "");
        assert_eq!(r.end_tone(at(5 * U + 3_000)), Err(CwError::WouldBlock));
        assert_eq!(r.state(), ReceiverState::AfterChar);
        assert_eq!(r.statistics().inter_character_space, 0.0);
        let space = r.poll_character(at(8 * U)).unwrap();
        assert_eq!((space.character, space.is_iws), (' ', true));
    }

    #[test]
    fn overlong_mark_flags_the_character() {
        let mut r = Receiver::new();
        mark(&mut r, 0, U).unwrap();
        assert!(matches!(mark(&mut r, 2 * U, 6 * U), Err(CwError::InvalidRepresentation(_))));
        assert_eq!(r.state(), ReceiverState::Error);
        mark(&mut r, 9 * U, U).unwrap();
        let polled = r.poll_representation(at(13 * U)).unwrap();
        assert_eq!(polled.representation, "..");
        assert!(polled.is_error);
        let ch = r.poll_character(at(13 * U)).unwrap();
        assert_eq!(ch, PolledCharacter { character: 'I', is_iws: false, is_error: true });
    }

    #[test]
    fn polls_follow_the_space() {
        let mut r = Receiver::new();
        assert_eq!(r.poll_character(at(0)), Err(CwError::WouldBlock));
        r.start_tone(at(0)).unwrap();
        assert_eq!(r.poll_character(at(U / 2)), Err(CwError::OutOfOrder));
        r.end_tone(at(U)).unwrap();
        assert_eq!(r.poll_character(at(2 * U)), Err(CwError::WouldBlock));

        let e = r.poll_character(at(4 * U)).unwrap();
        assert_eq!(e, PolledCharacter { character: 'E', is_iws: false, is_error: false });
        assert_eq!(r.poll_character(at(5 * U)), Err(CwError::WouldBlock));
        let space = r.poll_character(at(6 * U)).unwrap();
        assert_eq!(space, PolledCharacter { character: ' ', is_iws: true, is_error: false });
        assert_eq!(r.state(), ReceiverState::Idle);
    }

    #[test]
    fn representation_poll_does_not_consume() {
        let mut r = Receiver::new();
        mark(&mut r, 0, 3 * U).unwrap();
        for _ in 0..3 {
            let p = r.poll_representation(at(5 * U)).unwrap();
            assert_eq!(p.representation, "-");
            assert!(!p.is_iws);
        }
        assert_eq!(r.poll_character(at(5 * U)).unwrap().character, 'T');
    }

    #[test]
    fn word_space_reports_character_and_iws_together() {
        let mut r = Receiver::new();
        mark(&mut r, 0, 3 * U).unwrap();
        let t = r.poll_character(at(10 * U)).unwrap();
        assert_eq!(t, PolledCharacter { character: 'T', is_iws: true, is_error: false });
        assert_eq!(r.state(), ReceiverState::Idle);
    }

    #[test]
    fn unpolled_character_blocks_the_next_mark() {
        let mut r = Receiver::new();
        mark(&mut r, 0, U).unwrap();
        assert_eq!(r.start_tone(at(4 * U)), Err(CwError::OutOfOrder));
        r.poll_character(at(4 * U)).unwrap();
        r.start_tone(at(4 * U)).unwrap();
        assert_eq!(r.start_tone(at(4 * U)), Err(CwError::OutOfOrder));
    }

    #[test]
    fn timestamps_may_not_go_back() {
        let mut r = Receiver::new();
        r.start_tone(at(5 * U)).unwrap();
        assert_eq!(r.end_tone(at(4 * U)), Err(CwError::TimestampInvalid));
        r.end_tone(at(6 * U)).unwrap();
        assert_eq!(r.poll_representation(at(5 * U)), Err(CwError::TimestampInvalid));
    }

    #[test]
    fn unmappable_representation_is_reported_and_cleared() {
        let mut r = Receiver::new();
        for i in 0..6 {
            r.add_mark(Element::Dot, at(i * U)).unwrap();
        }
        r.add_mark(Element::Dash, at(6 * U)).unwrap();
        assert!(matches!(r.poll_character(at(20 * U)), Err(CwError::InvalidRepresentation(_))));
        assert_eq!(r.state(), ReceiverState::Idle);
    }

    #[test]
    fn gap_widens_the_character_space() {
        let mut r = Receiver::new();
        r.set_gap(3).unwrap();
        mark(&mut r, 0, U).unwrap();
        let p = r.poll_representation(at(U + 6 * U)).unwrap();
        assert!(!p.is_iws);
        let p = r.poll_representation(at(U + 8 * U)).unwrap();
        assert!(p.is_iws);
    }

    #[test]
    fn adaptive_unit_moves_within_tolerance() {
        let mut r = Receiver::new();
        r.set_tolerance_pct(10).unwrap();
        r.enable_adaptive(true);
        let mut t = 0;
        // 24 wpm dots: 50 ms
        for _ in 0..4 {
            mark(&mut r, t, 50_000).unwrap();
            t += 100_000;
        }
        // one step may move the unit by 10 % at most
        assert!(r.speed() < 12.0 * 1.1 * 1.1 * 1.1 * 1.1 + 0.01);
        assert!(r.speed() > 12.0);
    }

    #[test]
    fn bounds_are_checked() {
        let mut r = Receiver::new();
        assert!(r.set_speed(3).is_err());
        assert!(r.set_tolerance_pct(91).is_err());
        assert!(r.set_gap(61).is_err());
        r.set_speed(25).unwrap();
        assert!((r.speed() - 25.0).abs() < 1e-9);
    }
}
