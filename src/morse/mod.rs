// src/morse/mod.rs  —  Lookup table, Timing
pub mod table;
pub mod timing;

pub use table::{
    from_representation, is_character_valid, is_representation_valid, list_characters,
    lookup_character, lookup_representation, max_representation_len, to_representation,
};
pub use timing::Timing;
