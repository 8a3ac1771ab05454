//! Identifier and digest utilities.
//!
//! DSR refers to every catalogue node (case, patient, specimen) and every audit event by a
//! *canonical* UUID: **32 lowercase hexadecimal characters** (no hyphens). Activations are
//! identified by a time-prefixed id so that a release's activation history sorts naturally.
//!
//! This crate provides:
//! - [`EntityId`], a wrapper that guarantees the canonical UUID form once constructed.
//! - [`TimestampId`] and [`TimestampIdGenerator`] for monotonic, human-readable ids.
//! - [`Sha256Hash`], a validated SHA-256 hex digest used for manifest integrity tags.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Non-canonical values (uppercase, hyphenated, wrong length, non-hex) are rejected by
//! [`EntityId::parse`]. Callers that accept ids from users must go through `parse`.

mod hash;
mod service;

pub use hash::Sha256Hash;
pub use service::{EntityId, TimestampId, TimestampIdGenerator, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
