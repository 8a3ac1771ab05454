//! Canonical entity ids and timestamp-prefixed ids.

use crate::{UuidError, UuidResult};
use chrono::{DateTime, Duration, Utc};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// DSR's canonical UUID representation (32 lowercase hex characters, no hyphens).
///
/// Once constructed the contained UUID is guaranteed to be canonical, so ids can be compared,
/// ordered and rendered without normalisation.
///
/// # Construction
/// - [`EntityId::new`] generates a fresh random id.
/// - [`EntityId::derived`] computes a stable id from a parent id and a name.
/// - [`EntityId::parse`] validates an externally supplied identifier.
///
/// # Ordering
/// `EntityId` orders by the underlying UUID bytes. Catalogue code uses it as the final
/// tie-breaker when sorting nodes, which keeps manifest output deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generates a new random id in canonical form.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Name-based (v5) id under `namespace`. The same inputs always give the same id, so
    /// records without an authored id keep their identity across loads.
    pub fn derived(namespace: &EntityId, name: &str) -> Self {
        Self(Uuid::new_v5(&namespace.0, name.as_bytes()))
    }

    /// Root namespace for [`EntityId::derived`] chains.
    pub fn root() -> Self {
        Self(Uuid::NAMESPACE_URL)
    }

    /// Validates and parses an id that must already be in canonical form.
    ///
    /// This does **not** normalise other common UUID forms (hyphenated or uppercase).
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not in canonical form.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UuidError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| UuidError::InvalidInput(format!("{}: {}", input, e)))
    }

    /// Wraps an existing `uuid::Uuid`.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns a copy of the inner UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if `input` is in canonical form.
    ///
    /// This is a purely syntactic check: exactly 32 bytes of `0-9` / `a-f`.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for EntityId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityId::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A time-prefixed identifier.
///
/// Format: `YYYYMMDDTHHMMSS.mmmZ-<canonical_uuid>`
///
/// Example: `20260111T143522.045Z-550e8400e29b41d4a716446655440000`
///
/// Ids produced by [`TimestampIdGenerator::generate`] with the previous id of the same
/// sequence sort strictly after it, both by timestamp and lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampId {
    timestamp: DateTime<Utc>,
    id: EntityId,
}

impl TimestampId {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }
}

impl FromStr for TimestampId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts_str, uuid_str) = s.split_once('-').ok_or_else(|| {
            UuidError::InvalidInput(format!("Invalid timestamp id format: '{}'", s))
        })?;

        let ts_no_z = ts_str.strip_suffix('Z').ok_or_else(|| {
            UuidError::InvalidInput(format!("Timestamp must end with 'Z': '{}'", ts_str))
        })?;

        let naive =
            chrono::NaiveDateTime::parse_from_str(ts_no_z, "%Y%m%dT%H%M%S%.3f").map_err(|e| {
                UuidError::InvalidInput(format!("Invalid timestamp format '{}': {}", ts_str, e))
            })?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
            id: EntityId::parse(uuid_str)?,
        })
    }
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            self.id
        )
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TimestampId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TimestampId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generates [`TimestampId`] values.
pub struct TimestampIdGenerator;

impl TimestampIdGenerator {
    /// Generates a new timestamp id.
    ///
    /// If `last` is provided, the new timestamp is strictly greater than the last one (by at
    /// least 1 ms). Callers must hold whatever lock serialises the sequence, for activations
    /// this is the storage transaction.
    pub fn generate(last: Option<&TimestampId>) -> TimestampId {
        // Millisecond precision matches the rendered form, so parse(display(x)) == x.
        let now = truncate_to_millis(Utc::now());

        let timestamp = match last {
            Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::milliseconds(1),
            _ => now,
        };

        TimestampId {
            timestamp,
            id: EntityId::new(),
        }
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_canonical_id() {
        let id = EntityId::new();
        assert!(EntityId::is_canonical(&id.to_string()));
    }

    #[test]
    fn test_derived_is_stable_and_scoped() {
        let dataset = EntityId::derived(&EntityId::root(), "urn:dataset:10g");
        assert_eq!(dataset, EntityId::derived(&EntityId::root(), "urn:dataset:10g"));
        assert!(EntityId::is_canonical(&dataset.to_string()));

        let case = EntityId::derived(&dataset, "case/CASE-A");
        let elsewhere = EntityId::derived(&EntityId::root(), "urn:x");
        let other = EntityId::derived(&elsewhere, "case/CASE-A");
        assert_ne!(case, other);
    }

    #[test]
    fn test_parse_valid_canonical_uuid() {
        let canonical = "550e8400e29b41d4a716446655440000";
        let id = EntityId::parse(canonical).unwrap();
        assert_eq!(id.to_string(), canonical);
    }

    #[test]
    fn test_parse_rejects_hyphenated_uuid() {
        let result = EntityId::parse("550e8400-e29b-41d4-a716-446655440000");
        match result {
            Err(UuidError::InvalidInput(msg)) => {
                assert!(msg.contains("32 lowercase hex characters"));
            }
            _ => panic!("Expected InvalidInput error"),
        }
    }

    #[test]
    fn test_parse_rejects_uppercase_and_bad_lengths() {
        assert!(EntityId::parse("550E8400E29B41D4A716446655440000").is_err());
        assert!(EntityId::parse("550e8400e29b41d4a71644665544000").is_err());
        assert!(EntityId::parse("550e8400e29b41d4a7164466554400000").is_err());
        assert!(EntityId::parse("").is_err());
    }

    #[test]
    fn test_entity_id_serde_uses_canonical_string() {
        let id = EntityId::parse("00112233445566778899aabbccddeeff").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00112233445566778899aabbccddeeff\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_timestamp_id_parse_display() {
        let s = "20260111T143522.045Z-550e8400e29b41d4a716446655440000";
        let id: TimestampId = s.parse().unwrap();
        assert_eq!(id.to_string(), s);
        assert_eq!(id.id().to_string(), "550e8400e29b41d4a716446655440000");
    }

    #[test]
    fn test_timestamp_id_rejects_missing_z() {
        let result: Result<TimestampId, _> =
            "20260111T143522.045-550e8400e29b41d4a716446655440000".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_is_strictly_monotonic() {
        let first = TimestampIdGenerator::generate(None);
        let second = TimestampIdGenerator::generate(Some(&first));
        let third = TimestampIdGenerator::generate(Some(&second));

        assert!(second.timestamp() > first.timestamp());
        assert!(third.timestamp() > second.timestamp());
        assert!(third.to_string() > second.to_string());
    }

    #[test]
    fn test_generate_steps_past_future_timestamp() {
        let future: TimestampId = "29990101T000000.000Z-550e8400e29b41d4a716446655440000"
            .parse()
            .unwrap();
        let next = TimestampIdGenerator::generate(Some(&future));
        assert_eq!(
            next.timestamp(),
            future.timestamp() + Duration::milliseconds(1)
        );
    }
}
