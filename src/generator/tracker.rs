// src/generator/tracker.rs  —  Key value (mark / space) fan-out to one registered observer
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyValue {
    /// Space: no tone
    #[default]
    Open,
    /// Mark: tone sounding
    Closed,
}

impl KeyValue {
    pub fn from_frequency(frequency_hz: u32) -> Self {
        if frequency_hz > 0 { KeyValue::Closed } else { KeyValue::Open }
    }

    pub fn is_closed(self) -> bool { self == KeyValue::Closed }
}

pub(crate) type ValueCallback = Arc<dyn Fn(KeyValue) + Send + Sync>;

struct Tracked {
    value:    KeyValue,
    callback: Option<ValueCallback>,
}

/// Lives inside the generator; updated only from the generator thread
pub(crate) struct KeyTracker {
    tracked: Mutex<Tracked>,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(Tracked { value: KeyValue::Open, callback: None }),
        }
    }

    pub fn register(&self, callback: Option<ValueCallback>) {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner).callback = callback;
    }

    /// Store `value`; on a change, call the observer with the lock released
    pub fn update(&self, value: KeyValue) {
        let callback = {
            let mut t = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            if t.value == value {
                return;
            }
            t.value = value;
            t.callback.clone()
        };
        log::trace!("[gen] key {:?}", value);
        if let Some(cb) = callback {
            cb(value);
        }
    }

    #[cfg(test)]
    pub fn value(&self) -> KeyValue {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner).value
    }
}
