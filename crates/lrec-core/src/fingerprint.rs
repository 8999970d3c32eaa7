//! Content digest over the mutable listing attributes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Attribute, ListingPayload};

/// Attributes whose change makes a listing an UPDATE, in hashing order.
pub const FINGERPRINT_FIELDS: [Attribute; 6] = [
    Attribute::Price,
    Attribute::AppraisalValue,
    Attribute::Discount,
    Attribute::SaleModality,
    Attribute::City,
    Attribute::Neighborhood,
];

/// ASCII unit separator. The normalizer strips control characters from every
/// cell, so a normalized value cannot contain it.
pub const FIELD_DELIMITER: char = '\u{1f}';

/// Lower-case hex SHA-256 digest of a listing's fingerprint fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a digest read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes the trimmed [`FINGERPRINT_FIELDS`] values; a missing value hashes
/// like an empty string.
pub fn fingerprint(payload: &ListingPayload) -> Fingerprint {
    let mut delimiter = [0u8; 4];
    let delimiter = FIELD_DELIMITER.encode_utf8(&mut delimiter).as_bytes();

    let mut hasher = Sha256::new();
    for (idx, attribute) in FINGERPRINT_FIELDS.iter().enumerate() {
        if idx > 0 {
            hasher.update(delimiter);
        }
        hasher.update(payload.get(*attribute).map(str::trim).unwrap_or("").as_bytes());
    }
    Fingerprint(hex::encode(hasher.finalize()))
}
