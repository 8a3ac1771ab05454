//! SHA-256 digests.

use crate::{UuidError, UuidResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// A SHA-256 digest in lowercase hexadecimal form (64 characters).
///
/// Used as the integrity tag of an activation: the digest of the exact serialised manifest
/// bytes stored alongside it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Computes the digest of `bytes`.
    pub fn digest(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        let hash_array: [u8; 32] = hasher.finalize().into();
        Self::from_bytes(&hash_array)
    }

    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Validates a hex digest supplied from outside.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if input.len() == 64
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Ok(Self(input.to_owned()));
        }
        Err(UuidError::InvalidInput(format!(
            "SHA-256 digest must be 64 lowercase hex characters, got: '{}'",
            input
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this digest matches `bytes`.
    pub fn verify(&self, bytes: impl AsRef<[u8]>) -> bool {
        Self::digest(bytes) == *self
    }

    /// Returns `parent_dir/<h[0..2]>/<h[2..4]>/` for this digest.
    ///
    /// Two-level sharding keeps directory fan-out small no matter how many records exist.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        parent_dir.join(&self.0[0..2]).join(&self.0[2..4])
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Sha256Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Sha256Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::parse(&s).map_err(serde::de::Error::custom)
    }
}
