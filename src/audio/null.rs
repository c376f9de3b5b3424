// src/audio/null.rs  —  No sound; sleeps through each tone so timing stays real
use super::{SinkKind, SoundSink};
use crate::error::Result;
use crate::tone::Tone;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self { Self }
}

impl SoundSink for NullSink {
    fn name(&self) -> &str { "null" }

    fn kind(&self) -> SinkKind { SinkKind::Tones }

    fn set_sample_rate(&mut self, _rate: u32) -> Result<()> { Ok(()) }

    fn write_tone(&mut self, tone: &Tone) -> Result<()> {
        if tone.duration_us > 0 {
            std::thread::sleep(Duration::from_micros(tone.duration_us as u64));
        }
        Ok(())
    }
}
