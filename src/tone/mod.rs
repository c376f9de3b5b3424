// src/tone/mod.rs  —  Tone: one audible (or silent) unit of work
pub mod queue;

pub use queue::{DequeueState, ToneQueue, QUEUE_CAPACITY};

use crate::error::{CwError, Result};

/// Duration of a "forever" tone.  The generator renders it in quanta and
/// keeps re-reading it until something is enqueued behind it.
pub const FOREVER_QUANTUM_US: i64 = 100;

/// Which ends of a tone get the amplitude envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlopeMode {
    NoSlopes,
    Rising,
    Falling,
    #[default]
    Standard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tone {
    /// 0 = silence
    pub frequency_hz: u32,
    pub duration_us:  i64,
    pub slope_mode:   SlopeMode,
    pub is_forever:   bool,
    /// Head of the tone group that forms one character
    pub is_first:     bool,

    // Render counters, filled in by the generator thread only
    pub n_samples:               usize,
    pub rising_slope_n_samples:  usize,
    pub falling_slope_n_samples: usize,
    pub sample_iterator:         usize,
}

impl Tone {
    pub fn new(frequency_hz: u32, duration_us: i64, slope_mode: SlopeMode) -> Result<Self> {
        if duration_us < 0 {
            return Err(CwError::invalid(format!("tone duration {duration_us} us")));
        }
        Ok(Self::empty(frequency_hz, duration_us, slope_mode))
    }

    /// Silent tone without slopes
    pub fn silence(duration_us: i64) -> Result<Self> {
        Self::new(0, duration_us, SlopeMode::NoSlopes)
    }

    /// Held until another tone is enqueued behind it
    pub fn forever(frequency_hz: u32) -> Self {
        Self {
            is_forever: true,
            ..Self::empty(frequency_hz, FOREVER_QUANTUM_US, SlopeMode::NoSlopes)
        }
    }

    fn empty(frequency_hz: u32, duration_us: i64, slope_mode: SlopeMode) -> Self {
        Self {
            frequency_hz,
            duration_us,
            slope_mode,
            is_forever: false,
            is_first: false,
            n_samples: 0,
            rising_slope_n_samples: 0,
            falling_slope_n_samples: 0,
            sample_iterator: 0,
        }
    }

    pub fn first(mut self) -> Self {
        self.is_first = true;
        self
    }

    pub fn is_silent(&self) -> bool { self.frequency_hz == 0 }

    /// Fill in the render counters for sample rate `rate`.  A standard-slope
    /// tone too short for both slopes gets half its length for each.
    pub(crate) fn prepare(&mut self, rate: u32, slope_n_samples: usize) {
        self.n_samples = ((rate as i64 * self.duration_us) / 1_000_000) as usize;
        self.sample_iterator = 0;

        let slope = if self.is_silent() { 0 } else { slope_n_samples };
        let (rising, falling) = match self.slope_mode {
            SlopeMode::NoSlopes => (0, 0),
            SlopeMode::Rising   => (slope.min(self.n_samples), 0),
            SlopeMode::Falling  => (0, slope.min(self.n_samples)),
            SlopeMode::Standard => {
                if 2 * slope > self.n_samples {
                    (self.n_samples / 2, self.n_samples / 2)
                } else {
                    (slope, slope)
                }
            }
        };
        self.rising_slope_n_samples  = rising;
        self.falling_slope_n_samples = falling;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_duration_is_rejected() {
        assert!(matches!(Tone::new(600, -1, SlopeMode::Standard), Err(CwError::InvalidArgument(_))));
        assert!(Tone::silence(0).is_ok());
    }

    #[test]
    fn forever_tone_has_a_quantum() {
        let t = Tone::forever(700);
        assert!(t.is_forever);
        assert_eq!(t.duration_us, FOREVER_QUANTUM_US);
        assert!(t.duration_us > 0);
    }

    #[test]
    fn prepare_counts_samples_and_slopes() {
        let mut t = Tone::new(600, 100_000, SlopeMode::Standard).unwrap();
        t.prepare(44_100, 220);
        assert_eq!(t.n_samples, 4_410);
        assert_eq!(t.rising_slope_n_samples, 220);
        assert_eq!(t.falling_slope_n_samples, 220);

        let mut short = Tone::new(600, 5_000, SlopeMode::Standard).unwrap();
        short.prepare(44_100, 220);
        assert_eq!(short.rising_slope_n_samples, short.n_samples / 2);
    }

    #[test]
    fn silent_and_rectangular_tones_have_no_slopes() {
        let mut s = Tone::new(0, 10_000, SlopeMode::Standard).unwrap();
        s.prepare(8_000, 40);
        assert_eq!((s.rising_slope_n_samples, s.falling_slope_n_samples), (0, 0));

        // rectangular shape → slope table of length 0
        let mut r = Tone::new(600, 10_000, SlopeMode::Standard).unwrap();
        r.prepare(8_000, 0);
        assert_eq!((r.rising_slope_n_samples, r.falling_slope_n_samples), (0, 0));
    }
}
