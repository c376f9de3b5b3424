// src/generator/slope.rs  —  Precomputed amplitude envelope for mark edges
use crate::error::{CwError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const DEFAULT_SLOPE_US: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SlopeShape {
    Linear,
    #[default]
    RaisedCosine,
    Sine,
    /// No envelope at all; clicks on every edge
    Rectangular,
}

/// Full-scale amplitude for a volume percentage
pub fn volume_abs(volume_pct: u32) -> i32 {
    (volume_pct.min(100) as i32 * 32_768) / 100
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlopeTable {
    shape:       SlopeShape,
    duration_us: u32,
    volume_abs:  i32,
    amplitudes:  Vec<f64>,
}

impl SlopeTable {
    pub fn new(shape: SlopeShape, duration_us: u32, sample_rate: u32, volume_pct: u32) -> Result<Self> {
        if shape == SlopeShape::Rectangular && duration_us != 0 {
            return Err(CwError::invalid("rectangular slope with non-zero duration"));
        }
        let mut table = Self {
            shape,
            duration_us,
            volume_abs: volume_abs(volume_pct),
            amplitudes: Vec::new(),
        };
        table.compute(sample_rate);
        Ok(table)
    }

    /// `None` leaves a field unchanged.  Passing `Rectangular` forces the
    /// duration to 0; asking for both rectangular and a non-zero duration
    /// is an error.
    pub fn reshaped(
        &self,
        shape: Option<SlopeShape>,
        duration_us: Option<u32>,
        sample_rate: u32,
        volume_pct: u32,
    ) -> Result<Self> {
        let new_shape = shape.unwrap_or(self.shape);
        if new_shape == SlopeShape::Rectangular && duration_us.is_some_and(|d| d != 0) {
            return Err(CwError::invalid("rectangular slope with non-zero duration"));
        }
        let new_duration = if new_shape == SlopeShape::Rectangular {
            0
        } else {
            duration_us.unwrap_or(self.duration_us)
        };
        Self::new(new_shape, new_duration, sample_rate, volume_pct)
    }

    fn compute(&mut self, sample_rate: u32) {
        let n = ((sample_rate as u64 * self.duration_us as u64) / 1_000_000) as usize;
        let v = self.volume_abs as f64;
        self.amplitudes = match self.shape {
            SlopeShape::Rectangular => Vec::new(),
            SlopeShape::Linear => (0..n).map(|i| (i as f64 * v) / n as f64).collect(),
            SlopeShape::Sine => (0..n)
                .map(|i| v * (i as f64 * PI / (2.0 * n as f64)).sin())
                .collect(),
            SlopeShape::RaisedCosine => (0..n)
                .map(|i| v * (1.0 - (1.0 + (i as f64 * PI / n as f64).cos()) / 2.0))
                .collect(),
        };
    }

    pub fn shape(&self) -> SlopeShape { self.shape }
    pub fn duration_us(&self) -> u32 { self.duration_us }
    pub fn volume_abs(&self) -> i32 { self.volume_abs }
    pub fn n_samples(&self) -> usize { self.amplitudes.len() }

    #[inline]
    pub fn amplitude(&self, i: usize) -> f64 {
        self.amplitudes.get(i).copied().unwrap_or(self.volume_abs as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_length_follows_rate_and_duration() {
        let t = SlopeTable::new(SlopeShape::Linear, 5_000, 44_100, 70).unwrap();
        assert_eq!(t.n_samples(), 220);
        let t = SlopeTable::new(SlopeShape::Linear, 5_000, 8_000, 70).unwrap();
        assert_eq!(t.n_samples(), 40);
    }

    #[test]
    fn every_shape_stays_below_full_scale() {
        for shape in [SlopeShape::Linear, SlopeShape::RaisedCosine, SlopeShape::Sine] {
            let t = SlopeTable::new(shape, 5_000, 48_000, 55).unwrap();
            let v = volume_abs(55) as f64;
            assert_eq!(t.amplitude(0), 0.0, "{shape:?}");
            for i in 0..t.n_samples() {
                assert!(t.amplitude(i) >= 0.0 && t.amplitude(i) < v, "{shape:?}[{i}]");
            }
            // monotonic rise
            for i in 1..t.n_samples() {
                assert!(t.amplitude(i) >= t.amplitude(i - 1));
            }
        }
    }

    #[test]
    fn rectangular_rules() {
        assert!(SlopeTable::new(SlopeShape::Rectangular, 100, 44_100, 50).is_err());
        let t = SlopeTable::new(SlopeShape::RaisedCosine, 5_000, 44_100, 50).unwrap();

        let rect = t.reshaped(Some(SlopeShape::Rectangular), None, 44_100, 50).unwrap();
        assert_eq!(rect.duration_us(), 0);
        assert_eq!(rect.n_samples(), 0);

        assert!(t.reshaped(Some(SlopeShape::Rectangular), Some(3_000), 44_100, 50).is_err());
        assert!(rect.reshaped(None, Some(3_000), 44_100, 50).is_err());
        let back = rect.reshaped(Some(SlopeShape::Sine), Some(3_000), 44_100, 50).unwrap();
        assert_eq!(back.n_samples(), 132);
    }

    #[test]
    fn none_keeps_fields() {
        let t = SlopeTable::new(SlopeShape::Sine, 2_000, 16_000, 50).unwrap();
        let same = t.reshaped(None, None, 16_000, 50).unwrap();
        assert_eq!(same, t);
    }

    #[test]
    fn volume_change_rescales_amplitudes() {
        let quiet = SlopeTable::new(SlopeShape::Linear, 5_000, 8_000, 10).unwrap();
        let loud  = quiet.reshaped(None, None, 8_000, 100).unwrap();
        assert_eq!(loud.n_samples(), quiet.n_samples());
        assert!(loud.amplitude(20) > quiet.amplitude(20) * 9.0);
        assert_eq!(loud.volume_abs(), 32_768);
    }
}
