// src/audio/console.rs  —  PC-speaker buzzer through the Linux console (KIOCSOUND)
//
// The console takes a divisor of the 8254 timer clock rather than a
// frequency, and holds the tone until told otherwise, so the sink sets the
// tone and then sleeps for its duration.  Needs write access to the console
// device (usually root, or a tty the user owns).

use super::{SinkKind, SoundSink};
use crate::error::{CwError, Result};
use crate::tone::Tone;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "/dev/console";

const KIOCSOUND: u64 = 0x4B2F;
const CLOCK_TICK_RATE: u32 = 1_193_180;

pub struct ConsoleSink {
    file:    File,
    path:    String,
    current: u32,
}

impl ConsoleSink {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| CwError::SinkUnavailable(format!("console {path}: {e}")))?;
        let mut sink = Self { file, path: path.to_string(), current: 0 };
        // fails on anything that is not a virtual console
        sink.buzz(0)?;
        log::info!("[sink] console buzzer on {}", path);
        Ok(sink)
    }

    fn buzz(&mut self, frequency_hz: u32) -> Result<()> {
        let divisor = if frequency_hz == 0 { 0 } else { CLOCK_TICK_RATE / frequency_hz };
        // SAFETY: KIOCSOUND takes its argument by value; the fd is owned by self.file
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), KIOCSOUND as _, divisor as libc::c_ulong)
        };
        if rc < 0 {
            return Err(CwError::SinkUnavailable(format!(
                "KIOCSOUND on {}: {}", self.path, std::io::Error::last_os_error()
            )));
        }
        self.current = frequency_hz;
        Ok(())
    }
}

impl SoundSink for ConsoleSink {
    fn name(&self) -> &str { "console" }

    fn kind(&self) -> SinkKind { SinkKind::Tones }

    fn set_sample_rate(&mut self, _rate: u32) -> Result<()> { Ok(()) }

    fn write_tone(&mut self, tone: &Tone) -> Result<()> {
        if tone.frequency_hz != self.current {
            self.buzz(tone.frequency_hz)?;
        }
        if tone.duration_us > 0 {
            std::thread::sleep(Duration::from_micros(tone.duration_us as u64));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.current != 0 {
            let _ = self.buzz(0);
        }
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) { self.close(); }
}
