// tests/generator_tests.rs
// Generator end to end against in-memory sinks.  The recording sink does not
// sleep, so the tone durations it sees act as a virtual clock.

use cw_engine::{CwError, Generator, Result, SinkKind, SoundSink, Tone};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Played {
    frequency_hz: u32,
    duration_us:  i64,
    is_first:     bool,
}

#[derive(Clone, Default)]
struct RecordingSink {
    played: Arc<Mutex<Vec<Played>>>,
}

impl RecordingSink {
    fn played(&self) -> Vec<Played> { self.played.lock().unwrap().clone() }
}

impl SoundSink for RecordingSink {
    fn name(&self) -> &str { "recording" }
    fn kind(&self) -> SinkKind { SinkKind::Tones }
    fn set_sample_rate(&mut self, _rate: u32) -> Result<()> { Ok(()) }
    fn write_tone(&mut self, tone: &Tone) -> Result<()> {
        if !tone.is_forever {
            self.played.lock().unwrap().push(Played {
                frequency_hz: tone.frequency_hz,
                duration_us:  tone.duration_us,
                is_first:     tone.is_first,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SampleSink {
    samples: Arc<Mutex<Vec<i16>>>,
}

impl SoundSink for SampleSink {
    fn name(&self) -> &str { "samples" }
    fn kind(&self) -> SinkKind { SinkKind::Samples }
    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        if rate == 8_000 { Ok(()) } else { Err(CwError::InvalidArgument("rate".into())) }
    }
    fn buffer_n_samples(&self) -> usize { 128 }
    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        self.samples.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }
}

fn recording_generator() -> (Generator, RecordingSink) {
    let sink = RecordingSink::default();
    let gen = Generator::with_sink(Box::new(sink.clone())).unwrap();
    (gen, sink)
}

/// Dots and dashes back out of a tone trace
fn marks(played: &[Played], dash_min_us: i64) -> String {
    played
        .iter()
        .filter(|p| p.frequency_hz != 0)
        .map(|p| if p.duration_us >= dash_min_us { '-' } else { '.' })
        .collect()
}

#[test]
fn paris_takes_fifty_units() {
    let (mut gen, sink) = recording_generator();
    gen.set_speed(12).unwrap();
    let unit = gen.timing().unit;
    assert_eq!(unit, 100_000);

    gen.enqueue_string("PARIS ").unwrap();
    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    gen.stop().unwrap();

    let played = sink.played();
    let total: i64 = played.iter().map(|p| p.duration_us).sum();
    assert_eq!(total, 50 * unit);
    assert_eq!(marks(&played, 2 * unit), ".--..-.-...");

    // one group per character, one more for the word space
    assert_eq!(played.iter().filter(|p| p.is_first).count(), 6);
    assert!(played[0].is_first && played[0].frequency_hz == gen.frequency());
}

#[test]
fn weighting_and_gap_shift_the_trace() {
    let (mut gen, sink) = recording_generator();
    gen.set_speed(20).unwrap();
    gen.set_weighting(60).unwrap();
    gen.set_gap(2).unwrap();
    let t = gen.timing();

    gen.enqueue_character('E').unwrap();
    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    gen.stop().unwrap();

    let played = sink.played();
    assert_eq!(played.len(), 3);
    assert_eq!(played[0].duration_us, t.dot);
    assert!(t.dot > t.unit);
    assert_eq!(played[1].duration_us, t.ims);
    assert_eq!(played[2].duration_us, t.ics + 2 * t.unit);
}

#[test]
fn low_water_fires_once_per_crossing() {
    let (mut gen, _sink) = recording_generator();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    gen.register_low_water_callback(1, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    gen.set_speed(20).unwrap();
    gen.enqueue_character('E').unwrap();
    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    gen.stop().unwrap();
}

#[test]
fn low_water_callback_can_refill_the_queue() {
    let (mut gen, sink) = recording_generator();
    let refills = Arc::new(AtomicUsize::new(0));
    let (r, handle) = (Arc::clone(&refills), gen.handle());
    gen.register_low_water_callback(2, move || {
        if r.load(Ordering::SeqCst) < 5 {
            r.fetch_add(1, Ordering::SeqCst);
            handle.enqueue_character(' ').unwrap();
        }
    })
    .unwrap();

    gen.enqueue_character(' ').unwrap();
    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    gen.unregister_low_water_callback();
    gen.stop().unwrap();

    assert_eq!(refills.load(Ordering::SeqCst), 5);
    let played = sink.played();
    assert_eq!(played.len(), 6 * 3);
    assert!(played.iter().all(|p| p.frequency_hz == 0));
}

#[test]
fn removed_characters_are_never_played() {
    let (mut gen, sink) = recording_generator();
    gen.enqueue_string("oooossss").unwrap();
    for _ in 0..4 {
        assert_eq!(gen.remove_last_character(), Ok(7));
    }
    assert_eq!(gen.queue_length(), 4 * 7);

    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    gen.stop().unwrap();

    let unit = gen.timing().unit;
    assert_eq!(marks(&sink.played(), 2 * unit), "------------");
}

#[test]
fn samples_respect_the_volume() {
    let sink = SampleSink::default();
    let mut gen = Generator::with_sink(Box::new(sink.clone())).unwrap();
    assert_eq!(gen.sample_rate(), 8_000);
    gen.set_volume(50).unwrap();

    gen.enqueue_character('T').unwrap();
    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    gen.stop().unwrap();

    let samples = sink.samples.lock().unwrap();
    let peak = samples.iter().map(|s| (*s as i32).abs()).max().unwrap_or(0);
    assert!(peak > 10_000, "peak {peak}");
    assert!(peak <= 32_768 / 2, "peak {peak}");
    assert_eq!(samples.len() % 128, 0);
}

#[test]
fn value_tracking_sees_each_edge() {
    let (mut gen, _sink) = recording_generator();
    let edges = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&edges);
    gen.register_value_tracking_callback(move |v| e.lock().unwrap().push(v.is_closed()));

    gen.enqueue_string("EE").unwrap();
    gen.start().unwrap();
    gen.wait_for_queue_level(0).unwrap();
    gen.stop().unwrap();

    assert_eq!(*edges.lock().unwrap(), vec![true, false, true, false]);
}
