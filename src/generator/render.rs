// src/generator/render.rs  —  Tone → PCM, phase-continuous across tones and buffers
use super::slope::SlopeTable;
use crate::audio::SoundSink;
use crate::error::Result;
use crate::tone::Tone;
use std::f64::consts::TAU;

/// Owned by the generator thread; never shared
pub(crate) struct Renderer {
    buffer:       Vec<i16>,
    /// First unfilled slot of `buffer`
    sub_start:    usize,
    /// Phase of the next sample, in [0, 2π)
    phase_offset: f64,
}

impl Renderer {
    pub fn new(buffer_n_samples: usize) -> Self {
        Self {
            buffer:       vec![0; buffer_n_samples.max(1)],
            sub_start:    0,
            phase_offset: 0.0,
        }
    }

    /// Render the whole of `tone`, writing every buffer that fills up.
    /// A failed write does not stop rendering; the first error is returned.
    pub fn render(
        &mut self,
        tone: &mut Tone,
        slope: &SlopeTable,
        rate: u32,
        sink: &mut dyn SoundSink,
    ) -> Result<()> {
        let mut result = Ok(());
        while tone.sample_iterator < tone.n_samples {
            let space = self.buffer.len() - self.sub_start;
            let count = (tone.n_samples - tone.sample_iterator).min(space);
            self.calculate(tone, slope, rate, count);

            if self.sub_start + count == self.buffer.len() {
                if let Err(e) = sink.write_samples(&self.buffer) {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                self.sub_start = 0;
            } else {
                self.sub_start += count;
            }
        }
        result
    }

    /// Fill the unwritten tail with silence and hand it over.  Called when
    /// the queue runs dry so the last mark is not stuck in the buffer.
    pub fn pad(&mut self, sink: &mut dyn SoundSink) -> Result<()> {
        if self.sub_start == 0 {
            return Ok(());
        }
        self.buffer[self.sub_start..].fill(0);
        self.sub_start = 0;
        sink.write_samples(&self.buffer)
    }

    fn calculate(&mut self, tone: &mut Tone, slope: &SlopeTable, rate: u32, count: usize) {
        let step = TAU * tone.frequency_hz as f64 / rate as f64;
        let plateau = slope.volume_abs() as f64;
        let start = self.sub_start;

        for t in 0..count {
            let amp = amplitude(tone, slope, tone.sample_iterator + t, plateau);
            let phase = step * t as f64 + self.phase_offset;
            // truncation keeps slope samples strictly below the plateau
            let v = (amp * phase.sin()) as i32;
            self.buffer[start + t] = v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }

        self.phase_offset = (step * count as f64 + self.phase_offset) % TAU;
        tone.sample_iterator += count;
    }
}

fn amplitude(tone: &Tone, slope: &SlopeTable, i: usize, plateau: f64) -> f64 {
    if tone.is_silent() {
        0.0
    } else if i < tone.rising_slope_n_samples {
        slope.amplitude(i)
    } else if i >= tone.n_samples - tone.falling_slope_n_samples {
        slope.amplitude(tone.n_samples - i - 1)
    } else {
        plateau
    }
}
