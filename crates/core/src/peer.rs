use std::fmt;

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Symbols a generated peer identifier may contain. Exactly 64 entries so a
/// 6-bit draw indexes it without bias.
pub const PEER_ID_ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789./";
/// Length of every generated peer identifier.
pub const PEER_ID_LEN: usize = 64;

/// Opaque peer identifier handed out on join.
///
/// Identifiers received from clients are not checked against the generator
/// alphabet; the broker treats them as opaque scope names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Draw a fresh identifier from the operating system's CSPRNG.
    ///
    /// `OsRng` holds no state of its own, so concurrent callers never share
    /// or re-seed a stream.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let id = (0..PEER_ID_LEN)
            .map(|_| PEER_ID_ALPHABET[(rng.next_u32() & 0x3f) as usize] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<PeerId> for String {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::SmallRng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn generated_ids_have_fixed_length_and_alphabet() {
        let id = PeerId::generate();
        assert_eq!(id.as_str().len(), PEER_ID_LEN);
        assert!(id
            .as_str()
            .bytes()
            .all(|byte| PEER_ID_ALPHABET.contains(&byte)));
    }

    #[test]
    fn alphabet_has_no_duplicate_symbols() {
        let unique: HashSet<_> = PEER_ID_ALPHABET.iter().collect();
        assert_eq!(unique.len(), 64);
    }

    #[test]
    fn concurrent_generation_does_not_collide() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| (0..256).map(|_| PeerId::generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("generator thread") {
                assert!(seen.insert(id), "duplicate peer id generated");
            }
        }
        assert_eq!(seen.len(), 8 * 256);
    }

    #[test]
    fn low_six_bits_select_the_symbol() {
        struct Fixed(u32);

        impl RngCore for Fixed {
            fn next_u32(&mut self) -> u32 {
                self.0
            }
            fn next_u64(&mut self) -> u64 {
                self.0 as u64
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(self.0 as u8);
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                self.fill_bytes(dest);
                Ok(())
            }
        }

        // 0x7f & 0x3f == 63, the final '/'
        let id = PeerId::generate_with(&mut Fixed(0x7f));
        assert_eq!(id.as_str(), "/".repeat(PEER_ID_LEN));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PeerId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    proptest! {
        #[test]
        fn seeded_generation_stays_in_alphabet(seed in any::<u64>()) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let id = PeerId::generate_with(&mut rng);
            prop_assert_eq!(id.as_str().len(), PEER_ID_LEN);
            prop_assert!(id.as_str().bytes().all(|byte| PEER_ID_ALPHABET.contains(&byte)));
        }
    }
}
