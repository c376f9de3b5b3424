// src/keyer/iambic.rs  —  Iambic paddle keyer driven by generator ticks
//
// Each element goes onto the queue as a mark plus its ims.  The generator
// ticks the keyer after every tone, so an element takes two ticks:
//   InDot  ─tick→ InDotIms  ─tick→ next element, or Idle
//   InDash ─tick→ InDashIms ─tick→ next element, or Idle
// The next element is decided at the end of the ims, from the paddles held
// at that moment and the memory latches armed while the element played.
// A queue that runs dry under a busy keyer had its element flushed; the
// keyer then finishes that element at once.
//
// Mode A stops after the current element once the paddles are released.
// Curtis mode B adds one more, opposite element if a squeeze was seen during
// the element being played.

use super::Element;
use crate::error::{CwError, Result};
use crate::generator::{GeneratorHandle, Tick, TickHook};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Waiters re-check that the generator is still alive this often
const WAIT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum IambicMode {
    #[default]
    A,
    /// Curtis mode B: squeeze release completes one more element
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyerState {
    Idle,
    InDot,
    InDotIms,
    InDash,
    InDashIms,
}

// ── State machine (no I/O) ───────────────────────────────────────────────────

#[derive(Debug)]
struct Fsm {
    state:        KeyerState,
    mode:         IambicMode,
    dot_paddle:   bool,
    dash_paddle:  bool,
    dot_latch:    bool,
    dash_latch:   bool,
    /// Both paddles were down at some point of the current element
    squeeze_seen: bool,
    /// Decides squeezes; `Dash` while idle so a squeeze starts with a dot
    last:         Element,
    /// Completed elements (mark + ims)
    elements:     u64,
}

impl Fsm {
    fn new() -> Self {
        Self {
            state:        KeyerState::Idle,
            mode:         IambicMode::A,
            dot_paddle:   false,
            dash_paddle:  false,
            dot_latch:    false,
            dash_latch:   false,
            squeeze_seen: false,
            last:         Element::Dash,
            elements:     0,
        }
    }

    /// New paddle levels.  Returns the element to send when this starts one.
    fn paddles(&mut self, dot: bool, dash: bool) -> Option<Element> {
        let dot_pressed  = dot && !self.dot_paddle;
        let dash_pressed = dash && !self.dash_paddle;
        self.dot_paddle  = dot;
        self.dash_paddle = dash;

        if self.state == KeyerState::Idle {
            let next = self.next_element();
            if let Some(e) = next {
                self.start(e);
            }
            return next;
        }

        self.dot_latch  |= dot_pressed;
        self.dash_latch |= dash_pressed;
        self.squeeze_seen |= dot && dash;
        None
    }

    /// One tone has finished.  Returns the element to send next, if any.
    fn tick(&mut self) -> Option<Element> {
        match self.state {
            KeyerState::Idle => None,
            KeyerState::InDot => {
                self.state = KeyerState::InDotIms;
                None
            }
            KeyerState::InDash => {
                self.state = KeyerState::InDashIms;
                None
            }
            KeyerState::InDotIms | KeyerState::InDashIms => {
                self.elements += 1;
                let next = self.next_element();
                match next {
                    Some(e) => self.start(e),
                    None => self.go_idle(),
                }
                next
            }
        }
    }

    /// The queue ran dry under the current element.  Finish it now.
    fn settle(&mut self) -> Option<Element> {
        match self.state {
            KeyerState::InDot => self.state = KeyerState::InDotIms,
            KeyerState::InDash => self.state = KeyerState::InDashIms,
            _ => {}
        }
        self.tick()
    }

    fn next_element(&self) -> Option<Element> {
        let opposite = self.last.opposite();
        if self.dot_paddle && self.dash_paddle {
            return Some(opposite);
        }
        if self.mode == IambicMode::B && self.squeeze_seen {
            return Some(opposite);
        }
        let opposite_latched = match opposite {
            Element::Dot  => self.dot_latch,
            Element::Dash => self.dash_latch,
        };
        if opposite_latched {
            Some(opposite)
        } else if self.dot_paddle {
            Some(Element::Dot)
        } else if self.dash_paddle {
            Some(Element::Dash)
        } else if self.dot_latch {
            Some(Element::Dot)
        } else if self.dash_latch {
            Some(Element::Dash)
        } else {
            None
        }
    }

    fn start(&mut self, e: Element) {
        self.last = e;
        match e {
            Element::Dot => {
                self.state = KeyerState::InDot;
                self.dot_latch = false;
            }
            Element::Dash => {
                self.state = KeyerState::InDash;
                self.dash_latch = false;
            }
        }
        self.squeeze_seen = self.dot_paddle && self.dash_paddle;
    }

    fn go_idle(&mut self) {
        self.state = KeyerState::Idle;
        self.dot_latch = false;
        self.dash_latch = false;
        self.squeeze_seen = false;
        self.last = Element::Dash;
    }

    fn release(&mut self) {
        self.dot_paddle = false;
        self.dash_paddle = false;
        self.go_idle();
    }
}

// ── Keyer ────────────────────────────────────────────────────────────────────

struct Inner {
    gen:     GeneratorHandle,
    fsm:     Mutex<Fsm>,
    changed: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Fsm> {
        self.fsm.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs on the generator thread, or in `Generator::stop` for `Stopped`
    fn on_tick(&self, tick: Tick) {
        let mut fsm = self.lock();
        let next = match tick {
            Tick::ToneDone => fsm.tick(),
            // a paddle press may have queued an element since the queue ran dry
            Tick::QueueEmptied if self.gen.is_queue_idle() => fsm.settle(),
            Tick::QueueEmptied => None,
            Tick::Stopped => {
                fsm.release();
                None
            }
        };
        if let Some(e) = next {
            if let Err(err) = self.gen.enqueue_element(e.is_dash()) {
                log::warn!("[keyer] cannot enqueue {:?}: {}", e, err);
                fsm.go_idle();
            }
        }
        log::trace!("[keyer] {:?} → {:?}", tick, fsm.state);
        drop(fsm);
        self.changed.notify_all();
    }

    fn wait_while<F>(&self, mut busy: F) -> Result<()>
    where
        F: FnMut(&Fsm) -> bool,
    {
        let mut fsm = self.lock();
        while busy(&fsm) {
            if !self.gen.is_running() {
                return Err(CwError::NotRunning);
            }
            fsm = self
                .changed
                .wait_timeout(fsm, WAIT_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(())
    }
}

/// Drop unhooks the keyer from the generator
pub struct IambicKeyer {
    inner: Arc<Inner>,
}

impl IambicKeyer {
    /// Hooks into `gen`'s tick; one keyer per generator.  Stopping the
    /// generator releases both paddles.
    pub fn new(gen: GeneratorHandle) -> Self {
        let inner = Arc::new(Inner {
            gen,
            fsm:     Mutex::new(Fsm::new()),
            changed: Condvar::new(),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let hook: TickHook = Arc::new(move |tick| {
            if let Some(inner) = weak.upgrade() {
                inner.on_tick(tick);
            }
        });
        inner.gen.set_tick_hook(Some(hook));
        Self { inner }
    }

    pub fn set_mode(&self, mode: IambicMode) {
        self.inner.lock().mode = mode;
        log::debug!("[keyer] iambic mode {:?}", mode);
    }

    pub fn mode(&self) -> IambicMode { self.inner.lock().mode }

    pub fn state(&self) -> KeyerState { self.inner.lock().state }

    pub fn is_busy(&self) -> bool { self.state() != KeyerState::Idle }

    /// `(dot, dash)` as last reported
    pub fn paddles(&self) -> (bool, bool) {
        let fsm = self.inner.lock();
        (fsm.dot_paddle, fsm.dash_paddle)
    }

    /// Both paddle levels at once.  From idle this starts an element
    /// straight away; otherwise it only arms latches for the next tick.
    pub fn notify_paddle_event(&self, dot: bool, dash: bool) -> Result<()> {
        let mut fsm = self.inner.lock();
        if let Some(e) = fsm.paddles(dot, dash) {
            log::debug!("[keyer] start {:?}", e);
            if let Err(err) = self.inner.gen.enqueue_element(e.is_dash()) {
                fsm.go_idle();
                return Err(err);
            }
        }
        drop(fsm);
        self.inner.changed.notify_all();
        Ok(())
    }

    pub fn notify_dot_paddle_event(&self, down: bool) -> Result<()> {
        let (_, dash) = self.paddles();
        self.notify_paddle_event(down, dash)
    }

    pub fn notify_dash_paddle_event(&self, down: bool) -> Result<()> {
        let (dot, _) = self.paddles();
        self.notify_paddle_event(dot, down)
    }

    /// Block until the element being played has finished.  An element is
    /// its mark and the ims after it, so this spans two generator ticks.
    pub fn wait_for_end_of_current_element(&self) -> Result<()> {
        let done = {
            let fsm = self.inner.lock();
            if fsm.state == KeyerState::Idle {
                return Ok(());
            }
            fsm.elements
        };
        self.inner
            .wait_while(|fsm| fsm.elements == done && fsm.state != KeyerState::Idle)
    }

    /// Block until the keyer is idle.  Never returns while a paddle is held.
    pub fn wait_for_keyer(&self) -> Result<()> {
        self.inner.wait_while(|fsm| fsm.state != KeyerState::Idle)
    }

    /// Forget paddles and latches.  Tones already queued still play.
    pub fn reset(&self) {
        self.inner.lock().release();
        self.inner.changed.notify_all();
    }
}

impl Drop for IambicKeyer {
    fn drop(&mut self) {
        self.inner.gen.set_tick_hook(None);
    }
}
