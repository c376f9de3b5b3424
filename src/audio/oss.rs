// src/audio/oss.rs  —  Open Sound System: mono S16LE PCM written to /dev/dsp
use super::{SinkKind, SoundSink};
use crate::error::{CwError, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;

pub const DEFAULT_DEVICE: &str = "/dev/dsp";

// _IOWR('P', n, int)
const SNDCTL_DSP_SPEED:    u64 = 0xC004_5002;
const SNDCTL_DSP_SETFMT:   u64 = 0xC004_5005;
const SNDCTL_DSP_CHANNELS: u64 = 0xC004_5006;
const AFMT_S16_LE:         i32 = 0x10;

pub struct OssSink {
    file:  File,
    path:  String,
    bytes: Vec<u8>,
}

impl OssSink {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| CwError::SinkUnavailable(format!("OSS {path}: {e}")))?;
        let sink = Self { file, path: path.to_string(), bytes: Vec::new() };
        let mut fmt = AFMT_S16_LE;
        sink.ioctl(SNDCTL_DSP_SETFMT, &mut fmt, "SETFMT")?;
        if fmt != AFMT_S16_LE {
            return Err(CwError::SinkUnavailable(format!("{path}: no S16_LE support")));
        }
        let mut channels = 1;
        sink.ioctl(SNDCTL_DSP_CHANNELS, &mut channels, "CHANNELS")?;
        if channels != 1 {
            return Err(CwError::SinkUnavailable(format!("{path}: no mono support")));
        }
        log::info!("[sink] OSS on {}", path);
        Ok(sink)
    }

    fn ioctl(&self, request: u64, value: &mut i32, what: &str) -> Result<()> {
        // SAFETY: every request used here reads and writes one int through the pointer
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, value as *mut i32) };
        if rc < 0 {
            return Err(CwError::SinkUnavailable(format!(
                "SNDCTL_DSP_{what} on {}: {}", self.path, std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl SoundSink for OssSink {
    fn name(&self) -> &str { "oss" }

    fn kind(&self) -> SinkKind { SinkKind::Samples }

    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        let mut speed = rate as i32;
        self.ioctl(SNDCTL_DSP_SPEED, &mut speed, "SPEED")?;
        // the driver answers with the rate it picked
        if speed != rate as i32 {
            return Err(CwError::SinkUnavailable(format!("{} runs at {speed}, not {rate}", self.path)));
        }
        Ok(())
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        self.bytes.clear();
        self.bytes.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
        self.file
            .write_all(&self.bytes)
            .map_err(|e| CwError::SinkUnavailable(format!("write {}: {e}", self.path)))
    }
}
