// src/keyer/mod.rs  —  Keyers: alternative producers feeding the generator's queue
//
//   IambicKeyer  →  paddle events + generator ticks → timed dots / dashes
//   StraightKey  →  key down / up → open-ended marks and spaces
pub mod iambic;
pub mod straight;

pub use iambic::{IambicKeyer, IambicMode, KeyerState};
pub use straight::StraightKey;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Element {
    Dot,
    Dash,
}

impl Element {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Element::Dot  => Element::Dash,
            Element::Dash => Element::Dot,
        }
    }

    pub fn is_dash(self) -> bool { self == Element::Dash }

    /// `'.'` or `'-'`
    pub fn symbol(self) -> char {
        match self {
            Element::Dot  => '.',
            Element::Dash => '-',
        }
    }
}
