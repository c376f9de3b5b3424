// src/morse/table.rs  —  Character ↔ dot/dash representation lookup
use crate::error::{CwError, Result};
use std::sync::OnceLock;

/// Longest representation in the table (`'$'` and `'>'`)
pub const MAX_REPRESENTATION_LEN: usize = 7;

pub const DOT:  u8 = b'.';
pub const DASH: u8 = b'-';

/// ITU Morse code table, plus the common non-standard procedural signals
/// mapped onto otherwise unused ASCII punctuation.
static CHARACTERS: &[(char, &str)] = &[
    ('A', ".-"),      ('B', "-..."),    ('C', "-.-."),    ('D', "-.."),
    ('E', "."),       ('F', "..-."),    ('G', "--."),     ('H', "...."),
    ('I', ".."),      ('J', ".---"),    ('K', "-.-"),     ('L', ".-.."),
    ('M', "--"),      ('N', "-."),      ('O', "---"),     ('P', ".--."),
    ('Q', "--.-"),    ('R', ".-."),     ('S', "..."),     ('T', "-"),
    ('U', "..-"),     ('V', "...-"),    ('W', ".--"),     ('X', "-..-"),
    ('Y', "-.--"),    ('Z', "--.."),
    ('0', "-----"),   ('1', ".----"),   ('2', "..---"),   ('3', "...--"),
    ('4', "....-"),   ('5', "....."),   ('6', "-...."),   ('7', "--..."),
    ('8', "---.."),   ('9', "----."),
    ('.', ".-.-.-"),  (',', "--..--"),  (':', "---..."),  (';', "-.-.-."),
    ('\'', ".----."), ('"', ".-..-."),  ('$', "...-..-"), ('(', "-.--."),
    (')', "-.--.-"),  ('+', ".-.-."),   ('-', "-....-"),  ('/', "-..-."),
    ('=', "-...-"),   ('?', "..--.."),  ('_', "..--.-"),  ('@', ".--.-."),
    // Procedural signals without a standard character
    ('<', "...-.-"),  // VA / SK, end of work
    ('>', "-...-.-"), // BK, break
    ('!', "...-."),   // SN, understood
    ('&', ".-..."),   // AS, wait
    ('^', "-.-.-"),   // KA, starting signal
    ('~', ".-.-.."),  // AL, paragraph
];

/// Procedural signal → the letters sent run together, and whether the
/// expansion is what an operator usually sees written down.
static PROCEDURALS: &[(char, &str, bool)] = &[
    ('"', "AF", false),  ('\'', "WG", false), ('$', "SX", false),
    ('(', "KN", false),  (')', "KK", false),  ('+', "AR", false),
    (',', "MIM", false), ('-', "DU", false),  ('.', "AAA", false),
    ('/', "DN", false),  (':', "OS", false),  (';', "KR", false),
    ('=', "BT", false),  ('?', "IMI", false), ('_', "IQ", false),
    ('@', "AC", false),
    ('<', "VA", true),   ('>', "BK", true),   ('!', "SN", true),
    ('&', "AS", true),   ('^', "KA", true),   ('~', "AL", true),
];

static PHONETICS: [&str; 26] = [
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel",
    "India", "Juliett", "Kilo", "Lima", "Mike", "November", "Oscar", "Papa",
    "Quebec", "Romeo", "Sierra", "Tango", "Uniform", "Victor", "Whiskey",
    "X-ray", "Yankee", "Zulu",
];

// ── Reverse lookup ────────────────────────────────────────────────────────────
//
// A representation of length L maps to (1 << L) | bits, dash = 1.  The leading
// 1 keeps ".." and "..." apart, and with L ≤ 7 every key fits in one byte, so
// the reverse table is a dense 256-entry array.

fn representation_key(repr: &str) -> Option<usize> {
    let bytes = repr.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_REPRESENTATION_LEN {
        return None;
    }
    let mut key = 1usize;
    for &b in bytes {
        key = match b {
            DOT  => key << 1,
            DASH => (key << 1) | 1,
            _    => return None,
        };
    }
    Some(key)
}

fn reverse_table() -> &'static [Option<char>; 256] {
    static TABLE: OnceLock<[Option<char>; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [None; 256];
        for &(ch, repr) in CHARACTERS {
            if let Some(key) = representation_key(repr) {
                t[key] = Some(ch);
            }
        }
        t
    })
}

// ── Public lookups ────────────────────────────────────────────────────────────

/// Case-insensitive: `'a'` and `'A'` share a representation
pub fn to_representation(ch: char) -> Option<&'static str> {
    let ch = ch.to_ascii_uppercase();
    CHARACTERS.iter().find(|(c, _)| *c == ch).map(|(_, r)| *r)
}

pub fn from_representation(repr: &str) -> Option<char> {
    representation_key(repr).and_then(|key| reverse_table()[key])
}

pub fn lookup_character(ch: char) -> Result<&'static str> {
    to_representation(ch).ok_or(CwError::NoSuchCharacter(ch))
}

pub fn lookup_representation(repr: &str) -> Result<char> {
    from_representation(repr).ok_or_else(|| CwError::InvalidRepresentation(repr.to_string()))
}

/// Every character the table can send, in table order
pub fn list_characters() -> &'static str {
    static LIST: OnceLock<String> = OnceLock::new();
    LIST.get_or_init(|| CHARACTERS.iter().map(|(c, _)| *c).collect())
}

pub fn character_count() -> usize { CHARACTERS.len() }

/// Space is valid: it sends an inter-word space rather than a mark
pub fn is_character_valid(ch: char) -> bool {
    ch == ' ' || to_representation(ch).is_some()
}

pub fn is_string_valid(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_character_valid)
}

/// Only dots and dashes, at least one, and no longer than the longest entry.
/// A valid representation need not map to a character.
pub fn is_representation_valid(repr: &str) -> bool {
    representation_key(repr).is_some()
}

pub fn max_representation_len() -> usize { MAX_REPRESENTATION_LEN }

// ── Procedural signals / phonetics ────────────────────────────────────────────

pub fn procedural_expansion(ch: char) -> Option<(&'static str, bool)> {
    PROCEDURALS.iter()
        .find(|(c, _, _)| *c == ch)
        .map(|(_, exp, usual)| (*exp, *usual))
}

pub fn list_procedural_characters() -> &'static str {
    static LIST: OnceLock<String> = OnceLock::new();
    LIST.get_or_init(|| PROCEDURALS.iter().map(|(c, _, _)| *c).collect())
}

pub fn max_procedural_expansion_len() -> usize {
    PROCEDURALS.iter().map(|(_, e, _)| e.len()).max().unwrap_or(0)
}

pub fn phonetic(ch: char) -> Option<&'static str> {
    let ch = ch.to_ascii_uppercase();
    if ch.is_ascii_uppercase() {
        Some(PHONETICS[(ch as u8 - b'A') as usize])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_character_round_trips() {
        for ch in list_characters().chars() {
            let repr = to_representation(ch).unwrap();
            assert_eq!(from_representation(repr), Some(ch), "char {ch:?}");
        }
    }

    #[test]
    fn representations_are_unique_and_bounded() {
        let mut seen = std::collections::HashSet::new();
        for &(_, repr) in CHARACTERS {
            assert!(seen.insert(repr), "duplicate {repr}");
            assert!(repr.len() <= MAX_REPRESENTATION_LEN);
        }
        let longest = CHARACTERS.iter().map(|(_, r)| r.len()).max().unwrap();
        assert_eq!(longest, max_representation_len());
    }

    #[test]
    fn lowercase_is_accepted() {
        assert_eq!(to_representation('q'), Some("--.-"));
        assert_eq!(lookup_character('#'), Err(CwError::NoSuchCharacter('#')));
    }

    #[test]
    fn representation_validation() {
        assert!(is_representation_valid(".-.-.-"));
        assert!(is_representation_valid("......."));
        assert!(!is_representation_valid(""));
        assert!(!is_representation_valid("........"));
        assert!(!is_representation_valid(".x-"));
        // valid shape, nothing mapped to it
        assert_eq!(from_representation("......."), None);
        assert!(matches!(
            lookup_representation("-----."),
            Err(CwError::InvalidRepresentation(_))
        ));
    }

    #[test]
    fn space_is_a_valid_character_without_representation() {
        assert!(is_character_valid(' '));
        assert_eq!(to_representation(' '), None);
        assert!(is_string_valid("CQ DE DD6DS"));
        assert!(!is_string_valid("CQ#"));
    }

    #[test]
    fn procedurals_and_phonetics() {
        assert_eq!(procedural_expansion('<'), Some(("VA", true)));
        assert_eq!(procedural_expansion('+'), Some(("AR", false)));
        assert_eq!(procedural_expansion('A'), None);
        assert_eq!(max_procedural_expansion_len(), 3);
        for ch in list_procedural_characters().chars() {
            assert!(to_representation(ch).is_some(), "{ch:?} not sendable");
        }
        assert_eq!(phonetic('x'), Some("X-ray"));
        assert_eq!(phonetic('7'), None);
    }
}
