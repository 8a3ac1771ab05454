//! Constants used throughout the DSR core crate.

/// Default number of cases per page of the node tree.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Upper bound a caller may request for a node tree page.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Default cool-down window for coalesced egress audit entries, in seconds.
pub const DEFAULT_EGRESS_AUDIT_WINDOW_SECS: u64 = 300;

/// Audit log file kept at the root of the release data directory.
pub const AUDIT_LOG_FILE: &str = "audit.jsonl";

/// File extension for persisted release records.
pub const RELEASE_JSON_EXTENSION: &str = "json";

/// Notification template sent to participants after activation.
pub const TEMPLATE_RELEASE_ACTIVATED: &str = "release-activated";

/// Notification template sent to participants after deactivation.
pub const TEMPLATE_RELEASE_DEACTIVATED: &str = "release-deactivated";

/// The protocol allow-list entry that matches every storage protocol.
pub const ANY_PROTOCOL: &str = "*";
