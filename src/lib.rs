// src/lib.rs  —  cw-engine: tone queue, CW generator, keyers, adaptive receiver
//
//   text ─→ morse ─→ Generator::enqueue_* ─→ ToneQueue ─→ cw-generator thread ─→ SoundSink
//                                                              │
//   IambicKeyer / StraightKey ─→ enqueue ──────────────────────┤ tick, key value
//                                                              ▼
//                                       value callback ─→ Receiver ─→ characters
pub mod audio;
pub mod error;
pub mod generator;
pub mod keyer;
pub mod morse;
pub mod receiver;
pub mod tone;

pub use audio::{open_sink, SinkConfig, SinkKind, SoundSink, SoundSystem, SAMPLE_RATES};
pub use error::{CwError, Result};
pub use generator::{
    Generator, GeneratorHandle, KeyValue, SlopeShape, FREQUENCY_LIMITS, GAP_LIMITS, SPEED_LIMITS,
    VOLUME_LIMITS, WEIGHTING_LIMITS,
};
pub use keyer::{Element, IambicKeyer, IambicMode, KeyerState, StraightKey};
pub use morse::Timing;
pub use receiver::{PolledCharacter, PolledRepresentation, Receiver, ReceiverState};
pub use tone::{SlopeMode, Tone, ToneQueue};
