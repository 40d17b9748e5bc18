//! Identifier value objects
//!
//! Credit numbers and NFS-e numbers share one shape: trimmed, non-empty,
//! at most 50 characters.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::InvalidValueError;

/// Maximum identifier length, matching the `VARCHAR(50)` columns.
pub const MAX_IDENTIFIER_LEN: usize = 50;

fn parse_identifier(field: &'static str, raw: &str) -> Result<String, InvalidValueError> {
    if raw.trim().is_empty() {
        return Err(InvalidValueError::Empty { field });
    }

    let actual = raw.chars().count();
    if actual > MAX_IDENTIFIER_LEN {
        return Err(InvalidValueError::TooLong {
            field,
            max: MAX_IDENTIFIER_LEN,
            actual,
        });
    }

    Ok(raw.trim().to_string())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Field name reported in validation errors.
            pub const FIELD: &'static str = $field;

            pub fn new(raw: &str) -> Result<Self, InvalidValueError> {
                parse_identifier(Self::FIELD, raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidValueError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// Unique number of a constituted credit.
    CreditNumber,
    "numeroCredito"
);

identifier!(
    /// Number of the electronic service invoice (NFS-e) a credit refers to.
    NfseNumber,
    "numeroNfse"
);
