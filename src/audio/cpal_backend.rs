// src/audio/cpal_backend.rs  —  cpal output fed through a bounded PCM ring
//
// cpal pulls samples from its own callback; the generator pushes them.  The
// ring between the two is small, so write_samples blocks until the device
// has drained enough.  That back-pressure paces the generator.
use super::{SinkKind, SoundSink, DEFAULT_BUFFER_N_SAMPLES};
use crate::error::{CwError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// No drain for this long means the device is gone
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

struct Pcm {
    samples:  VecDeque<i16>,
    capacity: usize,
    failed:   Option<String>,
}

type SharedPcm = Arc<(Mutex<Pcm>, Condvar)>;

pub struct CpalSink {
    device: cpal::Device,
    name:   String,
    pcm:    SharedPcm,
    stream: Option<Stream>,
}

// Stream is !Send on some platforms; it is only touched from the thread that owns the sink
unsafe impl Send for CpalSink {}

fn unavailable(what: &str, e: impl std::fmt::Display) -> CwError {
    CwError::SinkUnavailable(format!("{what}: {e}"))
}

impl CpalSink {
    /// `label` names the sound system in logs ("ALSA", "PulseAudio")
    pub fn open(device_name: Option<&str>, label: &str) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .output_devices()
                .map_err(|e| unavailable(label, e))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| CwError::SinkUnavailable(format!("{label}: no output device {wanted:?}")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| CwError::SinkUnavailable(format!("{label}: no output device")))?,
        };
        let device_label = device.name().unwrap_or_else(|_| "?".into());
        log::info!("[sink] {} output on {:?}", label, device_label);

        Ok(Self {
            device,
            name: format!("{}:{}", label.to_lowercase(), device_label),
            pcm: Arc::new((
                Mutex::new(Pcm {
                    samples:  VecDeque::with_capacity(DEFAULT_BUFFER_N_SAMPLES * 4),
                    capacity: DEFAULT_BUFFER_N_SAMPLES * 4,
                    failed:   None,
                }),
                Condvar::new(),
            )),
            stream: None,
        })
    }
}

fn build_stream<S>(device: &cpal::Device, config: &cpal::StreamConfig, pcm: SharedPcm) -> Result<Stream>
where
    S: cpal::SizedSample + cpal::FromSample<i16>,
{
    let ch = config.channels as usize;
    let err_pcm = Arc::clone(&pcm);
    device
        .build_output_stream(
            config,
            move |data: &mut [S], _: &cpal::OutputCallbackInfo| {
                let (lock, drained) = &*pcm;
                let mut p = lock.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(ch) {
                    // underrun plays silence
                    let out = S::from_sample(p.samples.pop_front().unwrap_or(0));
                    for smp in frame.iter_mut() { *smp = out; }
                }
                drop(p);
                drained.notify_all();
            },
            move |e| {
                log::error!("[sink] audio stream error: {e}");
                let (lock, drained) = &*err_pcm;
                lock.lock().unwrap_or_else(PoisonError::into_inner).failed = Some(e.to_string());
                drained.notify_all();
            },
            None,
        )
        .map_err(|e| unavailable("build output stream", e))
}

impl SoundSink for CpalSink {
    fn name(&self) -> &str { &self.name }

    fn kind(&self) -> SinkKind { SinkKind::Samples }

    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        let range = self
            .device
            .supported_output_configs()
            .map_err(|e| unavailable(&self.name, e))?
            .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16))
            .find(|c| c.min_sample_rate().0 <= rate && rate <= c.max_sample_rate().0)
            .ok_or_else(|| CwError::SinkUnavailable(format!("{}: {rate} Hz not supported", self.name)))?;

        let supported = range.with_sample_rate(cpal::SampleRate(rate));
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let pcm = Arc::clone(&self.pcm);
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&self.device, &config, pcm)?,
            SampleFormat::I16 => build_stream::<i16>(&self.device, &config, pcm)?,
            SampleFormat::U16 => build_stream::<u16>(&self.device, &config, pcm)?,
            other => return Err(CwError::SinkUnavailable(format!("sample format {other:?}"))),
        };
        stream.play().map_err(|e| unavailable("start stream", e))?;
        self.stream = Some(stream);
        log::debug!("[sink] {} running at {} Hz, {} channel(s)", self.name, rate, config.channels);
        Ok(())
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        if self.stream.is_none() {
            return Err(CwError::SinkUnavailable(format!("{}: stream not started", self.name)));
        }
        let (lock, drained) = &*self.pcm;
        let mut p = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rest = samples;
        while !rest.is_empty() {
            if let Some(e) = &p.failed {
                return Err(CwError::SinkUnavailable(e.clone()));
            }
            let room = p.capacity - p.samples.len();
            if room == 0 {
                let (guard, wait) = drained
                    .wait_timeout(p, STALL_TIMEOUT)
                    .unwrap_or_else(PoisonError::into_inner);
                p = guard;
                if wait.timed_out() && p.samples.len() == p.capacity {
                    return Err(CwError::SinkUnavailable(format!("{}: device stalled", self.name)));
                }
                continue;
            }
            let n = room.min(rest.len());
            p.samples.extend(&rest[..n]);
            rest = &rest[n..];
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
