//! ULID identifiers
//!
//! 26-character Crockford-base32 identifiers: 48 bits of millisecond
//! timestamp followed by 80 bits of entropy. Lexicographic order of the
//! encoded form matches creation order, which is what makes event ids and
//! entity ids sortable without a separate sequence column.

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use rand::RngCore;

use crate::error::{Error, Result};

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 26;

/// Decode table: byte value of a Crockford character, 0xFF for invalid.
fn decode_char(c: u8) -> Option<u128> {
    let v: u8 = match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'H' => c - b'A' + 10,
        b'J' | b'K' => c - b'J' + 18,
        b'M' | b'N' => c - b'M' + 20,
        b'P'..=b'T' => c - b'P' + 22,
        b'V'..=b'Z' => c - b'V' + 27,
        b'a'..=b'z' => return decode_char(c.to_ascii_uppercase()),
        _ => return None,
    };
    Some(v as u128)
}

/// A 128-bit ULID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ulid(u128);

impl Ulid {
    /// Build from raw parts: 48-bit millisecond timestamp + 80-bit entropy.
    pub fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        let ts = (timestamp_ms as u128 & 0xFFFF_FFFF_FFFF) << 80;
        Self(ts | (random & ((1u128 << 80) - 1)))
    }

    /// Millisecond timestamp component.
    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> 80) as u64
    }

    /// Entropy component (80 bits).
    pub fn random(&self) -> u128 {
        self.0 & ((1u128 << 80) - 1)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// The zero ULID, smaller than every generated id.
    pub const NIL: Ulid = Ulid(0);
}

impl fmt::Display for Ulid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [0u8; ENCODED_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let shift = 5 * (ENCODED_LEN - 1 - i);
            *slot = ALPHABET[((self.0 >> shift) & 0x1F) as usize];
        }
        // Safety: alphabet is ASCII
        f.write_str(std::str::from_utf8(&out).expect("ascii"))
    }
}

impl FromStr for Ulid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != ENCODED_LEN {
            return Err(Error::InvalidInput(format!(
                "ULID must be {ENCODED_LEN} characters, got {}",
                bytes.len()
            )));
        }
        // First character encodes the top 3 of the 130 output bits; values
        // above '7' would overflow 128 bits.
        if decode_char(bytes[0]).map_or(true, |v| v > 7) {
            return Err(Error::InvalidInput(format!("ULID overflows 128 bits: {s}")));
        }
        let mut value: u128 = 0;
        for &c in bytes {
            let v = decode_char(c)
                .ok_or_else(|| Error::InvalidInput(format!("invalid ULID character: {}", c as char)))?;
            value = (value << 5) | v;
        }
        Ok(Self(value))
    }
}

impl serde::Serialize for Ulid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Ulid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Monotonic ULID generator
///
/// Within a single millisecond, entropy is incremented instead of redrawn so
/// that ids generated back-to-back still sort in generation order.
pub struct UlidGenerator {
    state: Mutex<GeneratorState>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

struct GeneratorState {
    last_ms: u64,
    last_random: u128,
}

impl fmt::Debug for UlidGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UlidGenerator").finish_non_exhaustive()
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self::with_rng(Box::new(rand::rngs::OsRng))
    }

    /// Create a generator with the provided entropy source (tests use a
    /// deterministic rng).
    pub fn with_rng(rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                last_random: 0,
            }),
            rng: Mutex::new(rng),
        }
    }

    /// Generate the next ULID for the given wall-clock milliseconds.
    pub fn generate(&self, now_ms: u64) -> Ulid {
        let mut state = self.state.lock();
        if now_ms <= state.last_ms {
            // Same (or rewound) millisecond: bump entropy to stay monotonic.
            state.last_random = (state.last_random + 1) & ((1u128 << 80) - 1);
            if state.last_random == 0 {
                state.last_ms += 1;
            }
        } else {
            let mut buf = [0u8; 16];
            self.rng.lock().fill_bytes(&mut buf[..10]);
            state.last_ms = now_ms;
            state.last_random = u128::from_le_bytes(buf) & ((1u128 << 80) - 1);
        }
        Ulid::from_parts(state.last_ms, state.last_random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn roundtrip() {
        let id = Ulid::from_parts(1_700_000_000_000, 0x1234_5678_9ABC_DEF0_11);
        let text = id.to_string();
        assert_eq!(text.len(), 26);
        let parsed: Ulid = text.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn lexicographic_order_matches_numeric() {
        let a = Ulid::from_parts(1000, 5);
        let b = Ulid::from_parts(1000, 6);
        let c = Ulid::from_parts(1001, 0);
        assert!(a.to_string() < b.to_string());
        assert!(b.to_string() < c.to_string());
    }

    #[test]
    fn monotonic_within_millisecond() {
        let generator = UlidGenerator::with_rng(Box::new(StepRng::new(42, 7)));
        let a = generator.generate(1000);
        let b = generator.generate(1000);
        let c = generator.generate(1000);
        assert!(a < b && b < c);
        assert_eq!(a.timestamp_ms(), 1000);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("not-a-ulid".parse::<Ulid>().is_err());
        // 'I', 'L', 'O', 'U' are not in the Crockford alphabet
        assert!("01ARZ3NDEKTSV4RRFFQ69G5FAI".parse::<Ulid>().is_err());
        // first char above '7' overflows 128 bits
        assert!("8ZZZZZZZZZZZZZZZZZZZZZZZZZ".parse::<Ulid>().is_err());
    }

    #[test]
    fn lowercase_accepted() {
        let id = Ulid::from_parts(123, 456);
        let lower = id.to_string().to_ascii_lowercase();
        assert_eq!(lower.parse::<Ulid>().unwrap(), id);
    }
}
