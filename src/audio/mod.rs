// src/audio/mod.rs  —  SoundSink trait + backend registry
//
// The generator needs exactly one of two things from a backend:
//   write_tone     →  null / console: the sink itself waits out the tone
//   write_samples  →  OSS / ALSA / PulseAudio: blocking PCM writes pace the
//                    generator thread in real time
use crate::error::{CwError, Result};
use crate::tone::Tone;
use serde::{Deserialize, Serialize};

mod null;
pub use null::NullSink;

#[cfg(target_os = "linux")]
mod console;
#[cfg(target_os = "linux")]
pub use console::ConsoleSink;

#[cfg(target_os = "linux")]
mod oss;
#[cfg(target_os = "linux")]
pub use oss::OssSink;

// ── cpal backend ─────────────────────────────────────────────────────────────
#[cfg(feature = "audio-cpal")]
mod cpal_backend;
#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalSink;

/// Probed in this order; the first one the sink accepts wins
pub const SAMPLE_RATES: [u32; 7] = [44_100, 48_000, 32_000, 22_050, 16_000, 11_025, 8_000];

/// Default PCM chunk handed to `write_samples`
pub const DEFAULT_BUFFER_N_SAMPLES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SoundSystem {
    /// No output; tones are timed with sleeps
    #[default]
    Null,
    /// PC speaker via the Linux console
    Console,
    /// Open Sound System (/dev/dsp)
    Oss,
    Alsa,
    #[value(name = "pulseaudio")]
    #[serde(rename = "pulseaudio")]
    PulseAudio,
    /// Try PulseAudio, then OSS, then ALSA
    Soundcard,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub sound_system: SoundSystem,
    /// Backend-specific device: a path for console/OSS, a device name for
    /// ALSA/PulseAudio.  None picks the backend's default.
    pub device:       Option<String>,
}

impl SinkConfig {
    pub fn new(sound_system: SoundSystem) -> Self {
        Self { sound_system, device: None }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Tones,
    Samples,
}

/// Platform-agnostic audio output interface
pub trait SoundSink: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> SinkKind;

    /// Configure `rate` or refuse it with an error
    fn set_sample_rate(&mut self, rate: u32) -> Result<()>;

    fn buffer_n_samples(&self) -> usize { DEFAULT_BUFFER_N_SAMPLES }

    /// Blocks for the tone's duration
    fn write_tone(&mut self, _tone: &Tone) -> Result<()> {
        Err(CwError::SinkUnavailable(format!("{} does not take tones", self.name())))
    }

    /// Blocks until the device has taken the samples
    fn write_samples(&mut self, _samples: &[i16]) -> Result<()> {
        Err(CwError::SinkUnavailable(format!("{} does not take samples", self.name())))
    }

    fn close(&mut self) {}
}

/// Factory: open the backend named in `config`
pub fn open_sink(config: &SinkConfig) -> Result<Box<dyn SoundSink>> {
    let device = config.device.as_deref();
    match config.sound_system {
        SoundSystem::Null       => Ok(Box::new(NullSink::new())),
        SoundSystem::Console    => open_console(device),
        SoundSystem::Oss        => open_oss(device),
        SoundSystem::Alsa       => open_alsa(device),
        SoundSystem::PulseAudio => open_pulseaudio(device),
        SoundSystem::Soundcard  => {
            let attempts: [fn(Option<&str>) -> Result<Box<dyn SoundSink>>; 3] =
                [open_pulseaudio, open_oss, open_alsa];
            let mut last_err = CwError::SinkUnavailable("no sound card backend".into());
            for open in attempts {
                match open(device) {
                    Ok(sink) => {
                        log::info!("[sink] soundcard → {}", sink.name());
                        return Ok(sink);
                    }
                    Err(e) => {
                        log::debug!("[sink] soundcard candidate failed: {e}");
                        last_err = e;
                    }
                }
            }
            Err(last_err)
        }
    }
}

fn open_console(device: Option<&str>) -> Result<Box<dyn SoundSink>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(ConsoleSink::open(device.unwrap_or(console::DEFAULT_DEVICE))?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = device;
        Err(CwError::SinkUnavailable("console buzzer needs Linux".into()))
    }
}

fn open_oss(device: Option<&str>) -> Result<Box<dyn SoundSink>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(OssSink::open(device.unwrap_or(oss::DEFAULT_DEVICE))?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = device;
        Err(CwError::SinkUnavailable("OSS needs Linux".into()))
    }
}

fn open_alsa(device: Option<&str>) -> Result<Box<dyn SoundSink>> {
    #[cfg(feature = "audio-cpal")]
    {
        Ok(Box::new(CpalSink::open(device, "ALSA")?))
    }
    #[cfg(not(feature = "audio-cpal"))]
    {
        let _ = device;
        Err(CwError::SinkUnavailable("built without audio-cpal".into()))
    }
}

/// PulseAudio is reached through its ALSA plugin device ("pulse")
fn open_pulseaudio(device: Option<&str>) -> Result<Box<dyn SoundSink>> {
    #[cfg(feature = "audio-cpal")]
    {
        Ok(Box::new(CpalSink::open(Some(device.unwrap_or("pulse")), "PulseAudio")?))
    }
    #[cfg(not(feature = "audio-cpal"))]
    {
        let _ = device;
        Err(CwError::SinkUnavailable("built without audio-cpal".into()))
    }
}
