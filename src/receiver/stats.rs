// src/receiver/stats.rs  —  Speed averaging and timing-accuracy statistics
use std::collections::VecDeque;

/// Entries kept by [`Statistics`]; older ones are dropped
pub const STATISTICS_CAPACITY: usize = 256;

pub(crate) const AVERAGING_LEN: usize = 4;

/// Last few durations of one element kind, for the adaptive speed estimate
#[derive(Debug, Clone)]
pub(crate) struct Averager {
    samples: [i64; AVERAGING_LEN],
    cursor:  usize,
}

impl Averager {
    pub fn seeded(value: i64) -> Self {
        Self { samples: [value; AVERAGING_LEN], cursor: 0 }
    }

    pub fn push(&mut self, value: i64) {
        self.samples[self.cursor] = value;
        self.cursor = (self.cursor + 1) % AVERAGING_LEN;
    }

    /// Mean of the two middle values
    pub fn median(&self) -> i64 {
        let mut sorted = self.samples;
        sorted.sort_unstable();
        let mid = AVERAGING_LEN / 2;
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Dot,
    Dash,
    InterMarkSpace,
    InterCharacterSpace,
}

/// Root-mean-square deviation from the ideal duration, in microseconds,
/// per element kind.  0.0 when nothing of that kind was seen.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSpread {
    pub dot: f64,
    pub dash: f64,
    pub inter_mark_space: f64,
    pub inter_character_space: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// (kind, actual − ideal)
    entries: VecDeque<(StatKind, i64)>,
}

impl Statistics {
    pub fn record(&mut self, kind: StatKind, delta_us: i64) {
        if self.entries.len() == STATISTICS_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((kind, delta_us));
    }

    pub fn clear(&mut self) { self.entries.clear(); }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn spread_of(&self, kind: StatKind) -> f64 {
        let (sum, n) = self
            .entries
            .iter()
            .filter(|(k, _)| *k == kind)
            .fold((0.0, 0usize), |(sum, n), (_, d)| (sum + (*d as f64).powi(2), n + 1));
        if n == 0 { 0.0 } else { (sum / n as f64).sqrt() }
    }

    pub fn spread(&self) -> TimingSpread {
        TimingSpread {
            dot:                   self.spread_of(StatKind::Dot),
            dash:                  self.spread_of(StatKind::Dash),
            inter_mark_space:      self.spread_of(StatKind::InterMarkSpace),
            inter_character_space: self.spread_of(StatKind::InterCharacterSpace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_ignores_one_outlier() {
        let mut a = Averager::seeded(100);
        a.push(400);
        assert_eq!(a.median(), 100);
        a.push(120);
        assert_eq!(a.median(), 110);
    }

    #[test]
    fn spread_is_rms_per_kind() {
        let mut s = Statistics::default();
        s.record(StatKind::Dot, 3);
        s.record(StatKind::Dot, -4);
        s.record(StatKind::Dash, 10);
        let spread = s.spread();
        assert!((spread.dot - 12.5f64.sqrt()).abs() < 1e-9);
        assert_eq!(spread.dash, 10.0);
        assert_eq!(spread.inter_mark_space, 0.0);
    }

    #[test]
    fn oldest_entries_fall_off() {
        let mut s = Statistics::default();
        s.record(StatKind::Dash, 1_000);
        for _ in 0..STATISTICS_CAPACITY {
            s.record(StatKind::Dot, 0);
        }
        assert_eq!(s.len(), STATISTICS_CAPACITY);
        assert_eq!(s.spread().dash, 0.0);
    }
}
