// src/tone/queue.rs  —  Bounded FIFO of tones shared by producers and the generator thread
//
// One mutex protects the ring; two condvars hang off it:
//   dequeue_wakeup  →  the consumer, signalled by enqueue / flush / stop
//   level_wakeup    →  everyone waiting on a level or on the end of a tone,
//                      broadcast after each rendered tone and on flush
//
// A forever tone at the head is peeked, not popped, while it is the only tone
// in the queue.  The next dequeue after something lands behind it drops it.

use super::Tone;
use crate::error::{CwError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

pub const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueState {
    /// Nothing queued, and that was already reported
    Empty,
    /// First dequeue to find the queue empty after it was busy
    JustEmptied,
    NonEmpty,
}

type LowWaterCallback = Arc<dyn Fn() + Send + Sync>;

struct Ring {
    tones:          Vec<Option<Tone>>,
    head:           usize,
    tail:           usize,
    len:            usize,
    /// A dequeue has returned a tone since the last JustEmptied
    busy:           bool,
    /// The consumer is rendering a dequeued tone right now
    rendering:      bool,
    /// Bumped on every level_wakeup broadcast
    generation:     u64,
    low_water_mark: usize,
    low_water_cb:   Option<LowWaterCallback>,
}

impl Ring {
    fn pop_head(&mut self) -> Option<Tone> {
        let tone = self.tones[self.head].take();
        self.head = (self.head + 1) % self.tones.len();
        self.len -= 1;
        tone
    }

    fn pop_tail(&mut self) -> Option<Tone> {
        let cap = self.tones.len();
        self.tail = (self.tail + cap - 1) % cap;
        self.len -= 1;
        self.tones[self.tail].take()
    }

    fn push_tail(&mut self, tone: Tone) {
        let tail = self.tail;
        self.tones[tail] = Some(tone);
        self.tail = (tail + 1) % self.tones.len();
        self.len += 1;
    }

    fn index_from_head(&self, i: usize) -> usize {
        (self.head + i) % self.tones.len()
    }
}

pub struct ToneQueue {
    ring:           Mutex<Ring>,
    dequeue_wakeup: Condvar,
    level_wakeup:   Condvar,
}

impl Default for ToneQueue {
    fn default() -> Self { Self::new() }
}

impl ToneQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    /// `capacity` of 0 is bumped to 1
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                tones:          (0..capacity).map(|_| None).collect(),
                head:           0,
                tail:           0,
                len:            0,
                busy:           false,
                rendering:      false,
                generation:     0,
                low_water_mark: 0,
                low_water_cb:   None,
            }),
            dequeue_wakeup: Condvar::new(),
            level_wakeup:   Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A panicking callback must not wedge every producer
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Producer side ─────────────────────────────────────────────────────────

    pub fn enqueue(&self, tone: Tone) -> Result<()> {
        let mut ring = self.lock();
        if ring.len == ring.tones.len() {
            return Err(CwError::Full);
        }
        ring.push_tail(tone);
        drop(ring);
        self.dequeue_wakeup.notify_all();
        Ok(())
    }

    /// All of `tones` or none of them, with no other producer interleaved
    pub fn enqueue_all(&self, tones: Vec<Tone>) -> Result<()> {
        let mut ring = self.lock();
        if ring.tones.len() - ring.len < tones.len() {
            return Err(CwError::Full);
        }
        for tone in tones {
            ring.push_tail(tone);
        }
        drop(ring);
        self.dequeue_wakeup.notify_all();
        Ok(())
    }

    /// Drop every queued tone and wake all waiters.  The tone being
    /// rendered, if any, is not affected.
    pub fn flush(&self) {
        let mut ring = self.lock();
        while ring.len > 0 {
            ring.pop_head();
        }
        ring.head = 0;
        ring.tail = 0;
        ring.generation += 1;
        drop(ring);
        log::debug!("[tq] flushed");
        self.level_wakeup.notify_all();
        self.dequeue_wakeup.notify_all();
    }

    /// Remove the tones of the most recently enqueued character that are
    /// still queued: everything from the tail back to the newest `is_first`
    /// tone.  With no `is_first` tone left, the whole queue belongs to the
    /// character being played and is removed.  Tones already handed to the
    /// sink are never touched.
    pub fn remove_last_character(&self) -> Result<usize> {
        let mut ring = self.lock();
        if ring.len == 0 {
            return Err(CwError::Empty);
        }
        let group_len = (0..ring.len)
            .rev()
            .find(|&i| {
                let idx = ring.index_from_head(i);
                ring.tones[idx].as_ref().is_some_and(|t| t.is_first)
            })
            .map_or(ring.len, |first| ring.len - first);

        for _ in 0..group_len {
            ring.pop_tail();
        }
        drop(ring);
        self.level_wakeup.notify_all();
        Ok(group_len)
    }

    /// Replace any earlier registration.  `level == 0` unregisters.
    /// The callback runs on the consumer thread with the queue unlocked, so
    /// it may enqueue; it must not block on the queue level itself.
    pub fn register_low_water_callback<F>(&self, level: usize, callback: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut ring = self.lock();
        if level > ring.tones.len() {
            return Err(CwError::invalid(format!(
                "low-water level {level} above capacity {}", ring.tones.len()
            )));
        }
        ring.low_water_mark = level;
        ring.low_water_cb = if level == 0 { None } else { Some(Arc::new(callback)) };
        Ok(())
    }

    pub fn unregister_low_water_callback(&self) {
        let mut ring = self.lock();
        ring.low_water_mark = 0;
        ring.low_water_cb = None;
    }

    // ── Consumer side ─────────────────────────────────────────────────────────

    pub fn dequeue(&self) -> (DequeueState, Option<Tone>) {
        let mut ring = self.lock();

        if ring.len == 0 {
            if ring.busy {
                ring.busy = false;
                return (DequeueState::JustEmptied, None);
            }
            return (DequeueState::Empty, None);
        }

        ring.busy = true;
        ring.rendering = true;

        let head = ring.head;
        let head_is_forever = ring.tones[head].as_ref().is_some_and(|t| t.is_forever);
        if head_is_forever && ring.len == 1 {
            return (DequeueState::NonEmpty, ring.tones[head].clone());
        }

        let len_before = ring.len;
        if head_is_forever {
            ring.pop_head();
        }
        let tone = ring.pop_head();

        let level = ring.low_water_mark;
        let callback = match &ring.low_water_cb {
            Some(cb) if len_before > level && ring.len <= level => Some(Arc::clone(cb)),
            _ => None,
        };
        drop(ring);

        if let Some(cb) = callback {
            cb();
        }
        (DequeueState::NonEmpty, tone)
    }

    /// Block the consumer until there is something to dequeue or `running`
    /// goes false.  Callers clearing `running` follow up with [`wake_consumer`].
    ///
    /// [`wake_consumer`]: ToneQueue::wake_consumer
    pub(crate) fn wait_for_tone(&self, running: &AtomicBool) {
        let mut ring = self.lock();
        while ring.len == 0 && running.load(Ordering::Acquire) {
            ring = self.dequeue_wakeup.wait(ring).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn wake_consumer(&self) {
        let _ring = self.lock();
        self.dequeue_wakeup.notify_all();
    }

    /// The consumer finished writing the last dequeued tone to the sink
    pub(crate) fn tone_done(&self) {
        let mut ring = self.lock();
        ring.rendering = false;
        ring.generation += 1;
        drop(ring);
        self.level_wakeup.notify_all();
    }

    // ── Waiting ───────────────────────────────────────────────────────────────

    /// Block until at most `level` tones are queued.  For `level == 0` this
    /// also waits for the last tone to finish rendering.
    pub fn wait_for_level(&self, level: usize) {
        let mut ring = self.lock();
        while ring.len > level || (level == 0 && ring.rendering) {
            ring = self.level_wakeup.wait(ring).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the tone being rendered is finished.  Returns at once
    /// when nothing is queued or playing.
    pub fn wait_for_end_of_current_tone(&self) {
        let mut ring = self.lock();
        if ring.len == 0 && !ring.rendering {
            return;
        }
        let generation = ring.generation;
        while ring.generation == generation {
            ring = self.level_wakeup.wait(ring).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wake every waiter; used when the consumer exits
    pub(crate) fn release_waiters(&self) {
        let mut ring = self.lock();
        ring.rendering = false;
        ring.generation += 1;
        drop(ring);
        self.level_wakeup.notify_all();
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn length(&self) -> usize { self.lock().len }

    pub fn capacity(&self) -> usize { self.lock().tones.len() }

    pub fn is_full(&self) -> bool {
        let ring = self.lock();
        ring.len == ring.tones.len()
    }

    pub fn is_empty(&self) -> bool { self.lock().len == 0 }

    pub fn low_water_mark(&self) -> usize { self.lock().low_water_mark }

    /// Nothing queued and nothing being rendered
    pub fn is_idle(&self) -> bool {
        let ring = self.lock();
        ring.len == 0 && !ring.rendering
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::SlopeMode;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn tone(freq: u32) -> Tone {
        Tone::new(freq, 1_000, SlopeMode::Standard).unwrap()
    }

    #[test]
    fn fifo_order_and_capacity() {
        let q = ToneQueue::with_capacity(3);
        for f in [100, 200, 300] {
            q.enqueue(tone(f)).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.enqueue(tone(400)), Err(CwError::Full));

        for f in [100, 200, 300] {
            let (state, t) = q.dequeue();
            assert_eq!(state, DequeueState::NonEmpty);
            assert_eq!(t.unwrap().frequency_hz, f);
        }
        assert_eq!(q.length(), 0);
    }

    #[test]
    fn enqueue_all_is_all_or_nothing() {
        let q = ToneQueue::with_capacity(4);
        q.enqueue(tone(1)).unwrap();
        assert_eq!(q.enqueue_all(vec![tone(2), tone(3), tone(4), tone(5)]), Err(CwError::Full));
        assert_eq!(q.length(), 1);
        q.enqueue_all(vec![tone(2), tone(3), tone(4)]).unwrap();
        assert!(q.is_full());
    }

    #[test]
    fn ring_wraps_around() {
        let q = ToneQueue::with_capacity(2);
        for f in 1..=7 {
            q.enqueue(tone(f)).unwrap();
            assert_eq!(q.dequeue().1.unwrap().frequency_hz, f);
        }
    }

    #[test]
    fn just_emptied_is_reported_once() {
        let q = ToneQueue::new();
        assert_eq!(q.dequeue().0, DequeueState::Empty);
        q.enqueue(tone(600)).unwrap();
        assert_eq!(q.dequeue().0, DequeueState::NonEmpty);
        assert_eq!(q.dequeue(), (DequeueState::JustEmptied, None));
        assert_eq!(q.dequeue(), (DequeueState::Empty, None));
        assert_eq!(q.dequeue(), (DequeueState::Empty, None));
    }

    #[test]
    fn forever_tone_is_peeked_until_followed() {
        let q = ToneQueue::new();
        q.enqueue(Tone::forever(600)).unwrap();
        for _ in 0..3 {
            let (_, t) = q.dequeue();
            assert!(t.unwrap().is_forever);
            assert_eq!(q.length(), 1);
        }
        q.enqueue(tone(0)).unwrap();
        let (_, t) = q.dequeue();
        let t = t.unwrap();
        assert!(!t.is_forever);
        assert_eq!(t.frequency_hz, 0);
        assert_eq!(q.length(), 0);
    }

    #[test]
    fn low_water_fires_once_per_downward_crossing() {
        let q = ToneQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        q.register_low_water_callback(2, move || { h.fetch_add(1, Ordering::SeqCst); }).unwrap();

        for _ in 0..5 { q.enqueue(tone(600)).unwrap(); }
        for _ in 0..5 { q.dequeue(); }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // re-crossing upward re-arms it
        for _ in 0..3 { q.enqueue(tone(600)).unwrap(); }
        q.dequeue();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // staying below the mark does not fire again
        q.enqueue(tone(600)).unwrap();
        q.dequeue();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn low_water_level_zero_unregisters() {
        let q = ToneQueue::new();
        q.register_low_water_callback(1, || panic!("unregistered")).unwrap();
        q.register_low_water_callback(0, || {}).unwrap();
        assert_eq!(q.low_water_mark(), 0);
        q.enqueue(tone(1)).unwrap();
        q.enqueue(tone(1)).unwrap();
        q.dequeue();
        q.dequeue();
        assert!(q.register_low_water_callback(QUEUE_CAPACITY + 1, || {}).is_err());
    }

    #[test]
    fn callback_may_enqueue() {
        let q = Arc::new(ToneQueue::new());
        let q2 = Arc::clone(&q);
        let refills = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&refills);
        q.register_low_water_callback(1, move || {
            if r.fetch_add(1, Ordering::SeqCst) < 3 {
                q2.enqueue(tone(0)).unwrap();
                q2.enqueue(tone(0)).unwrap();
            }
        }).unwrap();
        q.enqueue(tone(0)).unwrap();
        q.enqueue(tone(0)).unwrap();
        while q.dequeue().0 == DequeueState::NonEmpty {}
        assert_eq!(refills.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn remove_last_character_stops_at_first_marker() {
        let q = ToneQueue::new();
        q.enqueue(tone(1).first()).unwrap();
        q.enqueue(tone(0)).unwrap();
        q.enqueue(tone(2).first()).unwrap();
        q.enqueue(tone(0)).unwrap();
        q.enqueue(tone(0)).unwrap();

        assert_eq!(q.remove_last_character(), Ok(3));
        assert_eq!(q.length(), 2);
        assert_eq!(q.dequeue().1.unwrap().frequency_hz, 1);

        // head of the group already dequeued: the remainder goes
        assert_eq!(q.remove_last_character(), Ok(1));
        assert_eq!(q.remove_last_character(), Err(CwError::Empty));
    }

    #[test]
    fn wait_for_level_returns_after_rendering() {
        let q = Arc::new(ToneQueue::new());
        for _ in 0..4 { q.enqueue(tone(600)).unwrap(); }

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                while let (DequeueState::NonEmpty, Some(_)) = q.dequeue() {
                    thread::sleep(Duration::from_millis(5));
                    q.tone_done();
                }
            })
        };
        q.wait_for_level(0);
        assert!(q.is_idle());
        consumer.join().unwrap();
    }

    #[test]
    fn flush_releases_level_waiters() {
        let q = Arc::new(ToneQueue::new());
        for _ in 0..10 { q.enqueue(tone(600)).unwrap(); }
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_for_level(2))
        };
        thread::sleep(Duration::from_millis(20));
        q.flush();
        waiter.join().unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn consumer_wait_ends_on_enqueue_or_stop() {
        let q = Arc::new(ToneQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let consumer = {
            let (q, running) = (Arc::clone(&q), Arc::clone(&running));
            thread::spawn(move || q.wait_for_tone(&running))
        };
        thread::sleep(Duration::from_millis(10));
        running.store(false, Ordering::Release);
        q.wake_consumer();
        consumer.join().unwrap();
    }
}
