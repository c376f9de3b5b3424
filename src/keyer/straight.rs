// src/keyer/straight.rs  —  Straight key: every closure is a mark of open-ended length
use crate::error::Result;
use crate::generator::{GeneratorHandle, KeyValue};
use std::sync::{Mutex, PoisonError};

pub struct StraightKey {
    gen:   GeneratorHandle,
    value: Mutex<KeyValue>,
}

impl StraightKey {
    pub fn new(gen: GeneratorHandle) -> Self {
        Self { gen, value: Mutex::new(KeyValue::Open) }
    }

    /// Key closed or opened.  Repeating the current value does nothing.
    pub fn notify_event(&self, closed: bool) -> Result<()> {
        let value = if closed { KeyValue::Closed } else { KeyValue::Open };
        let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == value {
            return Ok(());
        }
        match value {
            KeyValue::Closed => self.gen.enqueue_begin_mark()?,
            KeyValue::Open   => self.gen.enqueue_begin_space()?,
        }
        *current = value;
        log::trace!("[keyer] straight key {:?}", value);
        Ok(())
    }

    pub fn value(&self) -> KeyValue {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool { self.value().is_closed() }

    /// Open the key if it is closed
    pub fn reset(&self) -> Result<()> {
        self.notify_event(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use crate::generator::Generator;

    #[test]
    fn repeated_events_enqueue_once() {
        let gen = Generator::with_sink(Box::new(NullSink::new())).unwrap();
        let key = StraightKey::new(gen.handle());

        key.notify_event(false).unwrap();
        assert_eq!(gen.queue_length(), 0);

        key.notify_event(true).unwrap();
        assert!(key.is_busy());
        // rising slope + forever tone
        assert_eq!(gen.queue_length(), 2);
        key.notify_event(true).unwrap();
        assert_eq!(gen.queue_length(), 2);

        key.reset().unwrap();
        assert_eq!(key.value(), KeyValue::Open);
        assert_eq!(gen.queue_length(), 4);
    }
}
