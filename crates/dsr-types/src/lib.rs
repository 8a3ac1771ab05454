//! Validated text types shared across the DSR crates.
//!
//! These types are deliberately small. Once constructed they guarantee their invariant, so
//! downstream code never has to re-check for blank release keys or empty descriptions.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is too long to be used as a release key
    #[error("Release key must be at most {max} characters, got {len}")]
    TooLong { len: usize, max: usize },

    /// The input contains characters outside the release key alphabet
    #[error("Release key may only contain ASCII letters, digits, '-' and '_': '{0}'")]
    InvalidCharacters(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// The externally visible identifier of a release (for example `R-2024-007`).
///
/// Release keys appear in URLs, file names and audit records, so they are restricted to a
/// conservative alphabet: ASCII letters, digits, `-` and `_`, at most 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseKey(String);

impl ReleaseKey {
    pub const MAX_LEN: usize = 64;

    /// Validates and wraps a release key.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(TextError::TooLong {
                len: trimmed.len(),
                max: Self::MAX_LEN,
            });
        }
        if !trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(TextError::InvalidCharacters(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReleaseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ReleaseKey {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for ReleaseKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ReleaseKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ReleaseKey::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  Tumour normal study  ").unwrap();
        assert_eq!(text.as_str(), "Tumour normal study");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new(" \t\n"), Err(TextError::Empty));
    }

    #[test]
    fn release_key_accepts_conservative_alphabet() {
        let key = ReleaseKey::new("R-2024_007").unwrap();
        assert_eq!(key.to_string(), "R-2024_007");
    }

    #[test]
    fn release_key_rejects_path_characters() {
        let err = ReleaseKey::new("../etc").expect_err("expected rejection");
        assert!(matches!(err, TextError::InvalidCharacters(_)));
    }

    #[test]
    fn release_key_rejects_overlong_input() {
        let err = ReleaseKey::new("a".repeat(65)).expect_err("expected rejection");
        assert_eq!(err, TextError::TooLong { len: 65, max: 64 });
    }

    #[test]
    fn release_key_deserialize_validates() {
        let parsed: Result<ReleaseKey, _> = serde_json::from_str("\"has space\"");
        assert!(parsed.is_err());
    }
}
