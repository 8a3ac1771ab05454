//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into services as
//! `Arc<CoreConfig>`. Nothing in the core reads environment variables while handling a
//! request; binaries turn raw environment values into a `CoreConfig` with the helpers below.

use crate::constants::{DEFAULT_EGRESS_AUDIT_WINDOW_SECS, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    release_data_dir: Option<PathBuf>,
    default_page_size: usize,
    max_page_size: usize,
    egress_audit_window: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            release_data_dir: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            egress_audit_window: Duration::from_secs(DEFAULT_EGRESS_AUDIT_WINDOW_SECS),
        }
    }
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `release_data_dir` switches the local store to persistent mode when set.
    pub fn new(
        release_data_dir: Option<PathBuf>,
        default_page_size: usize,
        max_page_size: usize,
        egress_audit_window: Duration,
    ) -> CoreResult<Self> {
        if default_page_size == 0 {
            return Err(CoreError::InvalidInput(
                "default page size must be at least 1".into(),
            ));
        }
        if default_page_size > max_page_size {
            return Err(CoreError::InvalidInput(format!(
                "default page size {} exceeds maximum {}",
                default_page_size, max_page_size
            )));
        }

        Ok(Self {
            release_data_dir,
            default_page_size,
            max_page_size,
            egress_audit_window,
        })
    }

    pub fn release_data_dir(&self) -> Option<&Path> {
        self.release_data_dir.as_deref()
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn egress_audit_window(&self) -> Duration {
        self.egress_audit_window
    }

    /// Clamp a caller-supplied page size: zero means "use the default".
    pub fn effective_page_size(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_page_size,
            n => n.min(self.max_page_size),
        }
    }
}

/// Parse a page size from an optional raw environment value.
///
/// `None` or empty/whitespace yields [`DEFAULT_PAGE_SIZE`].
pub fn page_size_from_env_value(value: Option<String>) -> CoreResult<usize> {
    match non_blank(value) {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(v) => v
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| CoreError::InvalidInput(format!("invalid page size '{}'", v))),
    }
}

/// Parse the egress audit window (whole seconds) from an optional raw environment value.
pub fn window_from_env_value(value: Option<String>) -> CoreResult<Duration> {
    match non_blank(value) {
        None => Ok(Duration::from_secs(DEFAULT_EGRESS_AUDIT_WINDOW_SECS)),
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| CoreError::InvalidInput(format!("invalid egress window '{}'", v))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
