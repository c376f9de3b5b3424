// src/morse/timing.rs  —  WPM / gap / weighting → element durations (PARIS standard)

/// One unit at 1 WPM, in microseconds.  PARIS is 50 units, so S WPM gives
/// 50·S units per minute and a unit of 1.2 s / S.
pub const DOT_CALIBRATION_US: i64 = 1_200_000;

/// All durations in microseconds, derived from speed, gap and weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub unit:       i64,  // nominal dot length at this speed
    pub dot:        i64,  // 1 unit + weighting adjustment
    pub dash:       i64,  // 3 dots
    pub ims:        i64,  // inter-mark space, after every mark
    pub ics:        i64,  // completes ims to 3 units after a character
    pub iws:        i64,  // completes ims + ics to 7 units after a word
    pub additional: i64,  // extra space after each character (gap)
    pub adjustment: i64,  // extra space after each word (gap)
}

impl Timing {
    /// Standard timing: no gap, 50 % weighting
    pub fn from_wpm(wpm: u32) -> Self {
        Self::new(wpm, 0, 50)
    }

    /// `weighting` shifts time between marks and the following ims while
    /// keeping dot + ims constant; `gap` adds whole units between characters.
    pub fn new(wpm: u32, gap: u32, weighting: u32) -> Self {
        let wpm = wpm.max(1) as i64;
        let unit = DOT_CALIBRATION_US / wpm;
        let weighting_adjust = (2 * (weighting as i64 - 50) * unit) / 100;

        let dot  = unit + weighting_adjust;
        let ims  = unit - (28 * weighting_adjust) / 22;
        let ics  = 3 * unit - ims;
        let iws  = 7 * unit - ics - ims;
        let additional = gap as i64 * unit;

        Self {
            unit,
            dot,
            dash: 3 * dot,
            ims,
            ics,
            iws,
            additional,
            adjustment: (7 * additional) / 3,
        }
    }

    /// Silence appended after the last mark's ims to close a character
    pub fn end_of_character(&self) -> i64 { self.ics + self.additional }
}
