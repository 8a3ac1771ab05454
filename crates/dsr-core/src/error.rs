use crate::resolver::SelectionFaults;
use dsr_types::ReleaseKey;

/// Errors raised while compiling or transforming a manifest.
///
/// All of these are fatal for the operation that hit them: no partial manifest is ever
/// persisted or returned.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed object url '{url}': {reason}")]
    MalformedUrl { url: String, reason: &'static str },
    #[error("unsupported storage scheme in url '{0}'")]
    UnsupportedScheme(String),
    #[error("failed to serialize manifest: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize stored manifest: {0}")]
    Deserialization(serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("caller may not {action} on release {release_key}")]
    PermissionDenied {
        release_key: ReleaseKey,
        action: &'static str,
    },
    #[error("release {0} does not exist")]
    ReleaseNotFound(ReleaseKey),
    #[error("release {0} already exists")]
    ReleaseExists(ReleaseKey),
    #[error("release {0} disappeared while the operation was running")]
    ReleaseDisappeared(ReleaseKey),
    #[error("release {0} is already activated")]
    AlreadyActivated(ReleaseKey),
    #[error("release {0} is not activated")]
    NotActivated(ReleaseKey),
    #[error("release {0} has no selected specimens, nothing to activate")]
    EmptyManifest(ReleaseKey),
    #[error("release {0} is activated, editing is locked")]
    EditingLocked(ReleaseKey),
    #[error("release {0} has a background job in progress")]
    JobInProgress(ReleaseKey),
    #[error("selection rejected: {0}")]
    SelectionFaults(SelectionFaults),
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
    #[error("invalid catalogue: {0}")]
    Catalogue(String),
    #[error("release {release} selects {missing} specimen(s) missing from the catalogue")]
    DanglingSelection { release: ReleaseKey, missing: usize },
    #[error("stored manifest for release {0} failed integrity verification")]
    IntegrityMismatch(ReleaseKey),
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),
    #[error("failed to create release directory: {0}")]
    ReleaseDirCreation(std::io::Error),
    #[error("failed to write release file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read release file: {0}")]
    FileRead(std::io::Error),
    #[error("audit log file error: {0}")]
    AuditFile(std::io::Error),
    #[error("failed to serialize release: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize release: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),

    #[error("text error: {0}")]
    Text(#[from] dsr_types::TextError),
    #[error("identifier error: {0}")]
    Uuid(#[from] dsr_uuid::UuidError),
}

impl CoreError {
    /// Stable machine-readable code for the condition, used by transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::ReleaseNotFound(_) => "release_not_found",
            Self::ReleaseExists(_) => "release_exists",
            Self::ReleaseDisappeared(_) => "release_disappeared",
            Self::AlreadyActivated(_) => "already_activated",
            Self::NotActivated(_) => "not_activated",
            Self::EmptyManifest(_) => "empty_manifest",
            Self::EditingLocked(_) => "editing_locked",
            Self::JobInProgress(_) => "job_in_progress",
            Self::SelectionFaults(_) => "selection_faults",
            Self::UnknownDataset(_) => "unknown_dataset",
            Self::Catalogue(_) => "invalid_catalogue",
            Self::DanglingSelection { .. } => "dangling_selection",
            Self::IntegrityMismatch(_) => "integrity_mismatch",
            Self::Manifest(_) => "manifest_error",
            Self::StoreUnavailable(_)
            | Self::ReleaseDirCreation(_)
            | Self::FileWrite(_)
            | Self::FileRead(_)
            | Self::AuditFile(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::YamlDeserialization(_) => "storage_error",
            Self::Text(_) | Self::Uuid(_) => "invalid_input",
        }
    }

    /// True for caller-input errors: permission, state and selection faults.
    ///
    /// Everything else (disappearance, malformed urls during compilation, storage failures)
    /// is treated as an internal error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::PermissionDenied { .. }
                | Self::ReleaseNotFound(_)
                | Self::ReleaseExists(_)
                | Self::AlreadyActivated(_)
                | Self::NotActivated(_)
                | Self::EmptyManifest(_)
                | Self::EditingLocked(_)
                | Self::JobInProgress(_)
                | Self::SelectionFaults(_)
                | Self::UnknownDataset(_)
                | Self::Text(_)
                | Self::Uuid(_)
        )
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ReleaseKey {
        ReleaseKey::new("R1").unwrap()
    }

    #[test]
    fn state_errors_are_distinct_and_recoverable() {
        let errors = [
            CoreError::AlreadyActivated(key()),
            CoreError::NotActivated(key()),
            CoreError::EditingLocked(key()),
            CoreError::EmptyManifest(key()),
        ];
        let codes: std::collections::BTreeSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(errors.iter().all(CoreError::is_recoverable));
    }

    #[test]
    fn disappearance_and_manifest_errors_are_fatal() {
        assert!(!CoreError::ReleaseDisappeared(key()).is_recoverable());
        let malformed = CoreError::from(ManifestError::MalformedUrl {
            url: "s3:/x".into(),
            reason: "missing '://'",
        });
        assert!(!malformed.is_recoverable());
        assert_eq!(malformed.code(), "manifest_error");
    }
}
