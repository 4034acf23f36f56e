//! Content-addressed identifiers used as primary keys and object-store keys
//! throughout the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters in a 256-bit hash encoded as URL-safe base64 without padding.
const HASH_ID_LEN: usize = 43;

fn is_url_safe_base64(s: &str) -> bool {
    s.len() == HASH_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// The 43-character URL-safe base64 hash identifying a signed data item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataItemId(String);

/// The 43-character URL-safe base64 hash of a signed bundle transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundleId(String);

/// A UUIDv4 assigned when data items are grouped; the correlation id across
/// every subsequent queue message and object-store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

/// Error returned when a string does not look like a 43-character hash id.
#[derive(Debug, thiserror::Error)]
#[error("invalid hash id: expected {HASH_ID_LEN} URL-safe base64 characters, got {0:?}")]
pub struct InvalidIdError(String);

macro_rules! hash_id {
    ($ty:ident) => {
        impl $ty {
            /// Wraps a string as an id, validating its shape.
            pub fn new(s: impl Into<String>) -> Result<Self, InvalidIdError> {
                let s = s.into();
                if is_url_safe_base64(&s) {
                    Ok(Self(s))
                } else {
                    Err(InvalidIdError(s))
                }
            }

            /// Borrows the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = InvalidIdError;
            fn try_from(value: String) -> Result<Self, Self::Error> {
                $ty::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

hash_id!(DataItemId);
hash_id!(BundleId);

impl PlanId {
    /// Generates a fresh random plan id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PlanId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_hash_id() {
        let id = "a".repeat(43);
        assert!(DataItemId::new(id).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(DataItemId::new("too-short").is_err());
    }

    #[test]
    fn rejects_non_url_safe_chars() {
        let mut id = "a".repeat(42);
        id.push('+');
        assert!(BundleId::new(id).is_err());
    }

    #[test]
    fn plan_id_roundtrips_through_string() {
        let id = PlanId::generate();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
