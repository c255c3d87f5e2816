//! Stable identifiers for threads and messages: a random 128-bit value,
//! displayed and serialized as lowercase hex, with a deterministic
//! constructor for tests.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! hex_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(u128);

        impl $name {
            /// Construct an id from a raw value. Primarily for tests and
            /// deterministic fixtures; production code should prefer
            /// [`Self::random`].
            #[must_use]
            pub const fn new(value: u128) -> Self {
                Self(value)
            }

            /// Generate a fresh random id using the thread-local PRNG.
            #[must_use]
            pub fn random() -> Self {
                Self(rand::random::<u128>())
            }

            /// Parse an id from a 32-character lowercase hex string.
            ///
            /// # Errors
            /// Returns an error if the string is not exactly 32 lowercase hex
            /// digits.
            pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
                if s.len() != 32 {
                    return Err(IdParseError {
                        value: s.to_owned(),
                        reason: format!("expected 32 hex characters, got {}", s.len()),
                    });
                }
                if !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
                    return Err(IdParseError {
                        value: s.to_owned(),
                        reason: "must contain only lowercase hex characters".to_owned(),
                    });
                }
                let n = u128::from_str_radix(s, 16).map_err(|e| IdParseError {
                    value: s.to_owned(),
                    reason: e.to_string(),
                })?;
                Ok(Self(n))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:032x}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::from_hex(&s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                format!("{:032x}", id.0)
            }
        }
    };
}

hex_id!(ThreadId, "Stable identifier for a [`crate::model::Thread`].");
hex_id!(MessageId, "Stable identifier for a message within a thread.");

/// Error returned when an id string is malformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdParseError {
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid id {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for IdParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = ThreadId::new(0x1234_5678);
        let hex = id.to_string();
        assert_eq!(ThreadId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn rejects_short_string() {
        assert!(ThreadId::from_hex("abc").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        let hex = "A".repeat(32);
        assert!(ThreadId::from_hex(&hex).is_err());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(ThreadId::random(), ThreadId::random());
    }
}
