// src/generator/mod.rs  —  Generator: parameters, enqueue paths, dequeue-and-generate thread
//
// Threads:
//   clients        →  setters, enqueue_*, wait_* (any number, through GeneratorHandle)
//   cw-generator   →  dequeue → key tracker → sink → tone_done → keyer tick
//
// The generator thread owns the sink for as long as it runs and snapshots
// the slope table per tone, so setters never have to quiesce rendering.
pub mod slope;
mod render;
mod tracker;

pub use slope::{SlopeShape, SlopeTable, DEFAULT_SLOPE_US};
pub use tracker::KeyValue;

use crate::audio::{self, SinkConfig, SinkKind, SoundSink, SAMPLE_RATES};
use crate::error::{CwError, Result};
use crate::morse::{self, Timing};
use crate::tone::{DequeueState, SlopeMode, Tone, ToneQueue, FOREVER_QUANTUM_US};
use render::Renderer;
use std::ops::{Deref, RangeInclusive};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracker::{KeyTracker, ValueCallback};

// ── Parameter limits ─────────────────────────────────────────────────────────

pub const SPEED_LIMITS:     RangeInclusive<u32> = 4..=60;
pub const FREQUENCY_LIMITS: RangeInclusive<u32> = 0..=4_000;
pub const VOLUME_LIMITS:    RangeInclusive<u32> = 0..=100;
pub const GAP_LIMITS:       RangeInclusive<u32> = 0..=60;
pub const WEIGHTING_LIMITS: RangeInclusive<u32> = 20..=80;

pub const DEFAULT_SPEED:     u32 = 12;
pub const DEFAULT_FREQUENCY: u32 = 800;
pub const DEFAULT_VOLUME:    u32 = 70;
pub const DEFAULT_GAP:       u32 = 0;
pub const DEFAULT_WEIGHTING: u32 = 50;

/// Consecutive failed writes after which the sink counts as gone
const SINK_FAILURE_LIMIT: u32 = 16;

/// What the generator thread reports to a hooked keyer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// A tone finished playing
    ToneDone,
    /// The queue ran dry after playing something
    QueueEmptied,
    /// `Generator::stop` has joined the thread
    Stopped,
}

pub(crate) type TickHook = Arc<dyn Fn(Tick) + Send + Sync>;

fn check(name: &str, value: u32, limits: &RangeInclusive<u32>) -> Result<()> {
    if limits.contains(&value) {
        Ok(())
    } else {
        Err(CwError::invalid(format!(
            "{name} {value} outside {}..={}", limits.start(), limits.end()
        )))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Parameters ────────────────────────────────────────────────────────────────

struct Params {
    speed:       u32,
    frequency:   u32,
    volume:      u32,
    gap:         u32,
    weighting:   u32,
    sample_rate: u32,
    timing:      Timing,
    in_sync:     bool,
    slope:       Arc<SlopeTable>,
}

impl Params {
    /// Recompute the timing if a setter invalidated it
    fn sync(&mut self) -> Timing {
        if !self.in_sync {
            self.timing = Timing::new(self.speed, self.gap, self.weighting);
            self.in_sync = true;
            log::debug!(
                "[gen] sync: {} wpm gap {} weighting {} → dot {} dash {} ims {} ics {} iws {} us",
                self.speed, self.gap, self.weighting,
                self.timing.dot, self.timing.dash, self.timing.ims, self.timing.ics, self.timing.iws
            );
        }
        self.timing
    }
}

pub(crate) struct Shared {
    queue:      ToneQueue,
    params:     Mutex<Params>,
    tracker:    KeyTracker,
    sink:       Mutex<Box<dyn SoundSink>>,
    sink_name:  String,
    sink_kind:  SinkKind,
    sink_error: Mutex<Option<String>>,
    do_dequeue: AtomicBool,
    running:    AtomicBool,
    /// Set by `stop`; ticks are held back so keyers stop refilling the queue
    stopping:   AtomicBool,
    tick_hook:  Mutex<Option<TickHook>>,
}

impl Shared {
    fn fire_tick(&self, tick: Tick) {
        let hook = lock(&self.tick_hook).clone();
        if let Some(hook) = hook {
            hook(tick);
        }
    }
}

// ── GeneratorHandle ───────────────────────────────────────────────────────────

/// Cheap clone of a generator's shared half.  Everything except the thread
/// lifecycle is reachable from here; keyers hold one of these.
#[derive(Clone)]
pub struct GeneratorHandle {
    shared: Arc<Shared>,
}

impl GeneratorHandle {
    fn check_sink(&self) -> Result<()> {
        match lock(&self.shared.sink_error).as_ref() {
            Some(e) => Err(CwError::SinkUnavailable(e.clone())),
            None => Ok(()),
        }
    }

    fn params(&self) -> MutexGuard<'_, Params> {
        lock(&self.shared.params)
    }

    // ── Setters ──────────────────────────────────────────────────────────────

    pub fn set_speed(&self, wpm: u32) -> Result<()> {
        self.check_sink()?;
        check("speed", wpm, &SPEED_LIMITS)?;
        let mut p = self.params();
        p.speed = wpm;
        p.in_sync = false;
        log::debug!("[gen] speed {} wpm", wpm);
        Ok(())
    }

    pub fn set_frequency(&self, hz: u32) -> Result<()> {
        self.check_sink()?;
        check("frequency", hz, &FREQUENCY_LIMITS)?;
        self.params().frequency = hz;
        log::debug!("[gen] frequency {} Hz", hz);
        Ok(())
    }

    /// Rebuilds the slope table, whose amplitudes scale with the volume
    pub fn set_volume(&self, pct: u32) -> Result<()> {
        self.check_sink()?;
        check("volume", pct, &VOLUME_LIMITS)?;
        let mut p = self.params();
        let table = p.slope.reshaped(None, None, p.sample_rate, pct)?;
        p.volume = pct;
        p.slope = Arc::new(table);
        log::debug!("[gen] volume {} %", pct);
        Ok(())
    }

    pub fn set_gap(&self, units: u32) -> Result<()> {
        self.check_sink()?;
        check("gap", units, &GAP_LIMITS)?;
        let mut p = self.params();
        p.gap = units;
        p.in_sync = false;
        Ok(())
    }

    pub fn set_weighting(&self, pct: u32) -> Result<()> {
        self.check_sink()?;
        check("weighting", pct, &WEIGHTING_LIMITS)?;
        let mut p = self.params();
        p.weighting = pct;
        p.in_sync = false;
        Ok(())
    }

    /// `None` leaves that half of the slope as it is.  The new table takes
    /// effect from the next tone the generator picks up.
    pub fn set_tone_slope(&self, shape: Option<SlopeShape>, duration_us: Option<u32>) -> Result<()> {
        self.check_sink()?;
        let mut p = self.params();
        let table = p.slope.reshaped(shape, duration_us, p.sample_rate, p.volume)?;
        log::debug!("[gen] slope {:?} {} us", table.shape(), table.duration_us());
        p.slope = Arc::new(table);
        Ok(())
    }

    // ── Getters ──────────────────────────────────────────────────────────────

    pub fn speed(&self) -> u32 { self.params().speed }
    pub fn frequency(&self) -> u32 { self.params().frequency }
    pub fn volume(&self) -> u32 { self.params().volume }
    pub fn gap(&self) -> u32 { self.params().gap }
    pub fn weighting(&self) -> u32 { self.params().weighting }
    pub fn sample_rate(&self) -> u32 { self.params().sample_rate }

    pub fn tone_slope(&self) -> (SlopeShape, u32) {
        let p = self.params();
        (p.slope.shape(), p.slope.duration_us())
    }

    /// Element durations for the current parameters
    pub fn timing(&self) -> Timing { self.params().sync() }

    pub fn sink_name(&self) -> &str { &self.shared.sink_name }

    /// The dequeue thread is alive
    pub fn is_running(&self) -> bool { self.shared.running.load(Ordering::Acquire) }

    // ── Enqueueing ───────────────────────────────────────────────────────────

    fn timing_and_frequency(&self) -> (Timing, u32) {
        let mut p = self.params();
        (p.sync(), p.frequency)
    }

    fn representation_tones(&self, repr: &str, with_ics: bool) -> Result<Vec<Tone>> {
        let (timing, freq) = self.timing_and_frequency();
        let mut tones = Vec::with_capacity(2 * repr.len() + 1);
        for (i, symbol) in repr.bytes().enumerate() {
            let duration = if symbol == morse::table::DOT { timing.dot } else { timing.dash };
            let mark = Tone::new(freq, duration, SlopeMode::Standard)?;
            tones.push(if i == 0 { mark.first() } else { mark });
            tones.push(Tone::silence(timing.ims)?);
        }
        if with_ics {
            tones.push(Tone::silence(timing.end_of_character())?);
        }
        Ok(tones)
    }

    /// Two halves of the word space and the gap adjustment, as separate
    /// tones so that a low-water mark can be crossed inside a word space.
    fn word_space_tones(&self) -> Result<Vec<Tone>> {
        let timing = self.timing();
        let half = timing.iws / 2;
        Ok(vec![
            Tone::silence(half)?.first(),
            Tone::silence(timing.iws - half)?,
            Tone::silence(timing.adjustment)?,
        ])
    }

    /// `' '` enqueues a word space.  The character's tones go in as a unit.
    pub fn enqueue_character(&self, ch: char) -> Result<()> {
        self.check_sink()?;
        let tones = if ch == ' ' {
            self.word_space_tones()?
        } else {
            let repr = morse::lookup_character(ch)?;
            self.representation_tones(repr, true)?
        };
        self.shared.queue.enqueue_all(tones)
    }

    /// The whole string is validated first.  On `Full` the characters before
    /// the failing one stay queued.
    pub fn enqueue_string(&self, text: &str) -> Result<()> {
        self.check_sink()?;
        if let Some(bad) = text.chars().find(|&c| !morse::is_character_valid(c)) {
            return Err(CwError::NoSuchCharacter(bad));
        }
        for ch in text.chars() {
            self.enqueue_character(ch)?;
        }
        Ok(())
    }

    pub fn enqueue_representation(&self, repr: &str) -> Result<()> {
        self.enqueue_representation_inner(repr, true)
    }

    /// Like [`enqueue_representation`](Self::enqueue_representation) but with
    /// no inter-character space, so the next character runs on (prosigns).
    pub fn enqueue_representation_no_ics(&self, repr: &str) -> Result<()> {
        self.enqueue_representation_inner(repr, false)
    }

    fn enqueue_representation_inner(&self, repr: &str, with_ics: bool) -> Result<()> {
        self.check_sink()?;
        if !morse::is_representation_valid(repr) {
            return Err(CwError::InvalidRepresentation(repr.to_string()));
        }
        let tones = self.representation_tones(repr, with_ics)?;
        self.shared.queue.enqueue_all(tones)
    }

    /// Key down: rising edge, then a tone that lasts until the next enqueue
    pub fn enqueue_begin_mark(&self) -> Result<()> {
        self.check_sink()?;
        let (freq, slope_us) = {
            let p = self.params();
            (p.frequency, p.slope.duration_us() as i64)
        };
        self.shared.queue.enqueue_all(vec![
            Tone::new(freq, slope_us, SlopeMode::Rising)?,
            Tone::forever(freq),
        ])
    }

    /// Key up: falling edge, then silence until the next enqueue
    pub fn enqueue_begin_space(&self) -> Result<()> {
        self.check_sink()?;
        if self.sink_name() == "console" {
            return self.shared.queue.enqueue(Tone::silence(FOREVER_QUANTUM_US)?);
        }
        let (freq, slope_us) = {
            let p = self.params();
            (p.frequency, p.slope.duration_us() as i64)
        };
        self.shared.queue.enqueue_all(vec![
            Tone::new(freq, slope_us, SlopeMode::Falling)?,
            Tone::forever(0),
        ])
    }

    /// One keyer element: a mark and its trailing ims, queued together
    pub(crate) fn enqueue_element(&self, dash: bool) -> Result<()> {
        self.check_sink()?;
        let (timing, freq) = self.timing_and_frequency();
        let duration = if dash { timing.dash } else { timing.dot };
        self.shared.queue.enqueue_all(vec![
            Tone::new(freq, duration, SlopeMode::Standard)?,
            Tone::silence(timing.ims)?,
        ])
    }

    // ── Queue ────────────────────────────────────────────────────────────────

    fn ensure_drainable(&self) -> Result<()> {
        if !self.is_running() && !self.shared.queue.is_idle() {
            return Err(CwError::NotRunning);
        }
        Ok(())
    }

    /// Block until at most `level` tones are queued; 0 also waits for the
    /// last tone to finish playing.
    pub fn wait_for_queue_level(&self, level: usize) -> Result<()> {
        self.ensure_drainable()?;
        self.shared.queue.wait_for_level(level);
        Ok(())
    }

    pub fn wait_for_end_of_current_tone(&self) -> Result<()> {
        self.ensure_drainable()?;
        self.shared.queue.wait_for_end_of_current_tone();
        Ok(())
    }

    pub fn is_queue_full(&self) -> bool { self.shared.queue.is_full() }
    pub fn queue_length(&self) -> usize { self.shared.queue.length() }
    pub fn queue_capacity(&self) -> usize { self.shared.queue.capacity() }
    pub fn flush_queue(&self) { self.shared.queue.flush() }

    pub(crate) fn is_queue_idle(&self) -> bool { self.shared.queue.is_idle() }

    /// Number of tones removed
    pub fn remove_last_character(&self) -> Result<usize> {
        self.shared.queue.remove_last_character()
    }

    /// `callback` runs on the generator thread when a dequeue takes the
    /// queue length from above `level` to `level` or below.
    pub fn register_low_water_callback<F>(&self, level: usize, callback: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.queue.register_low_water_callback(level, callback)
    }

    pub fn unregister_low_water_callback(&self) {
        self.shared.queue.unregister_low_water_callback()
    }

    // ── Key value ────────────────────────────────────────────────────────────

    /// `callback` sees every open/closed change, on the generator thread,
    /// between the dequeue of a tone and the dequeue of the next one.
    pub fn register_value_tracking_callback<F>(&self, callback: F)
    where
        F: Fn(KeyValue) + Send + Sync + 'static,
    {
        let callback: ValueCallback = Arc::new(callback);
        self.shared.tracker.register(Some(callback));
    }

    pub fn unregister_value_tracking_callback(&self) {
        self.shared.tracker.register(None);
    }

    pub(crate) fn set_tick_hook(&self, hook: Option<TickHook>) {
        *lock(&self.shared.tick_hook) = hook;
    }
}

// ── Generator ─────────────────────────────────────────────────────────────────

pub struct Generator {
    handle: GeneratorHandle,
    thread: Option<JoinHandle<()>>,
}

impl Deref for Generator {
    type Target = GeneratorHandle;
    fn deref(&self) -> &GeneratorHandle { &self.handle }
}

impl Generator {
    /// Open the sink named in `config`
    pub fn new(config: &SinkConfig) -> Result<Self> {
        Self::with_sink(audio::open_sink(config)?)
    }

    /// Wrap an already opened sink.  Fails when the sink takes none of
    /// [`SAMPLE_RATES`].
    pub fn with_sink(mut sink: Box<dyn SoundSink>) -> Result<Self> {
        let sample_rate = SAMPLE_RATES
            .iter()
            .copied()
            .find(|&rate| match sink.set_sample_rate(rate) {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("[gen] {} refuses {} Hz: {}", sink.name(), rate, e);
                    false
                }
            })
            .ok_or_else(|| CwError::SinkUnavailable(format!("{}: no usable sample rate", sink.name())))?;

        let slope = SlopeTable::new(SlopeShape::default(), DEFAULT_SLOPE_US, sample_rate, DEFAULT_VOLUME)?;
        let sink_name = sink.name().to_string();
        let sink_kind = sink.kind();
        log::info!("[gen] sink {} ({:?}) at {} Hz", sink_name, sink_kind, sample_rate);

        let shared = Arc::new(Shared {
            queue:      ToneQueue::new(),
            params:     Mutex::new(Params {
                speed:       DEFAULT_SPEED,
                frequency:   DEFAULT_FREQUENCY,
                volume:      DEFAULT_VOLUME,
                gap:         DEFAULT_GAP,
                weighting:   DEFAULT_WEIGHTING,
                sample_rate,
                timing:      Timing::new(DEFAULT_SPEED, DEFAULT_GAP, DEFAULT_WEIGHTING),
                in_sync:     true,
                slope:       Arc::new(slope),
            }),
            tracker:    KeyTracker::new(),
            sink:       Mutex::new(sink),
            sink_name,
            sink_kind,
            sink_error: Mutex::new(None),
            do_dequeue: AtomicBool::new(false),
            running:    AtomicBool::new(false),
            stopping:   AtomicBool::new(false),
            tick_hook:  Mutex::new(None),
        });
        Ok(Self { handle: GeneratorHandle { shared }, thread: None })
    }

    pub fn handle(&self) -> GeneratorHandle { self.handle.clone() }

    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(CwError::AlreadyRunning);
        }
        self.check_sink()?;
        let shared = Arc::clone(&self.handle.shared);
        shared.stopping.store(false, Ordering::Release);
        shared.do_dequeue.store(true, Ordering::Release);
        shared.running.store(true, Ordering::Release);
        let thread = thread::Builder::new()
            .name("cw-generator".into())
            .spawn(move || dequeue_and_generate(shared))
            .map_err(|e| {
                self.handle.shared.running.store(false, Ordering::Release);
                CwError::SinkUnavailable(format!("generator thread: {e}"))
            })?;
        self.thread = Some(thread);
        log::info!("[gen] started");
        Ok(())
    }

    /// Silence, then join the thread.  Tones still queued are dropped and
    /// a hooked keyer is reset.
    pub fn stop(&mut self) -> Result<()> {
        let thread = self.thread.take().ok_or(CwError::NotRunning)?;
        let shared = &self.handle.shared;

        shared.stopping.store(true, Ordering::Release);
        shared.queue.flush();
        // leaves the key open whatever was playing
        match Tone::silence(FOREVER_QUANTUM_US).and_then(|t| shared.queue.enqueue(t)) {
            Ok(()) if shared.running.load(Ordering::Acquire) => shared.queue.wait_for_level(0),
            Ok(()) => {}
            Err(e) => log::warn!("[gen] closing silence not queued: {}", e),
        }

        shared.do_dequeue.store(false, Ordering::Release);
        shared.queue.wake_consumer();
        if thread.join().is_err() {
            log::error!("[gen] generator thread panicked");
        }
        shared.queue.flush();
        shared.fire_tick(Tick::Stopped);
        log::info!("[gen] stopped");
        Ok(())
    }

    /// Stop if running and close the sink
    pub fn delete(self) {
        drop(self);
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
        self.handle.set_tick_hook(None);
        lock(&self.handle.shared.sink).close();
    }
}

// ── Dequeue-and-generate thread ──────────────────────────────────────────────

/// Marks the thread gone and releases waiters however the loop ends
struct ExitGuard<'a>(&'a Shared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
        self.0.queue.release_waiters();
    }
}

fn dequeue_and_generate(shared: Arc<Shared>) {
    let _exit = ExitGuard(&shared);
    let mut sink = lock(&shared.sink);
    let mut renderer = Renderer::new(sink.buffer_n_samples());
    let mut failures = 0u32;

    while shared.do_dequeue.load(Ordering::Acquire) {
        let (state, tone) = shared.queue.dequeue();
        let mut tone = match (state, tone) {
            (DequeueState::NonEmpty, Some(tone)) => tone,
            (DequeueState::JustEmptied, _) => {
                if shared.sink_kind == SinkKind::Samples {
                    let result = renderer.pad(&mut **sink);
                    note_write(&shared, result, &mut failures);
                }
                shared.tracker.update(KeyValue::Open);
                if !shared.stopping.load(Ordering::Acquire) {
                    shared.fire_tick(Tick::QueueEmptied);
                }
                continue;
            }
            _ => {
                shared.queue.wait_for_tone(&shared.do_dequeue);
                continue;
            }
        };

        let (rate, slope) = {
            let mut p = lock(&shared.params);
            p.sync();
            (p.sample_rate, Arc::clone(&p.slope))
        };
        tone.prepare(rate, slope.n_samples());
        shared.tracker.update(KeyValue::from_frequency(tone.frequency_hz));

        let result = match shared.sink_kind {
            SinkKind::Tones   => sink.write_tone(&tone),
            SinkKind::Samples => renderer.render(&mut tone, &slope, rate, &mut **sink),
        };
        if !note_write(&shared, result, &mut failures) && tone.duration_us > 0 {
            // keep real-time pacing for waiters and keyers
            thread::sleep(Duration::from_micros(tone.duration_us as u64));
        }

        shared.queue.tone_done();
        if !shared.stopping.load(Ordering::Acquire) {
            shared.fire_tick(Tick::ToneDone);
        }
    }
    shared.tracker.update(KeyValue::Open);
    log::debug!("[gen] dequeue thread exiting");
}

/// Returns whether the write went through
fn note_write(shared: &Shared, result: Result<()>, failures: &mut u32) -> bool {
    match result {
        Ok(()) => {
            *failures = 0;
            true
        }
        Err(e) => {
            *failures += 1;
            if *failures == 1 {
                log::error!("[gen] sink write failed: {}", e);
            }
            if *failures == SINK_FAILURE_LIMIT {
                log::error!("[gen] {} failed {} writes in a row, giving up on it", shared.sink_name, *failures);
                *lock(&shared.sink_error) = Some(e.to_string());
            }
            false
        }
    }
}
