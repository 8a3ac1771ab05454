//! Narrow contracts the core consumes from its surroundings, plus in-process implementations.
//!
//! - [`RoleProvider`]: authoritative role of a caller on a release.
//! - [`JobStatusProvider`]: whether a release has a background job running.
//! - [`Notifier`]: best-effort notification delivery after commit.

use crate::{CoreError, CoreResult};
use dsr_types::{NonEmptyText, ReleaseKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

/// The identity of a caller, as supplied by the authentication layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub subject_id: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Actor {
    pub fn new(subject_id: NonEmptyText) -> Self {
        Self {
            subject_id,
            display_name: None,
            email: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseRole {
    Administrator,
    Manager,
    Member,
    AdminView,
}

/// Which nodes of the catalogue a caller may see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Every node in the release's datasets, selected or not.
    Everything,
    /// Only nodes with at least one selected descendant.
    SelectedOnly,
}

impl ReleaseRole {
    pub fn can_administer(self) -> bool {
        matches!(self, Self::Administrator)
    }

    pub fn visibility(self) -> Visibility {
        match self {
            Self::Administrator | Self::AdminView => Visibility::Everything,
            Self::Manager | Self::Member => Visibility::SelectedOnly,
        }
    }
}

pub trait RoleProvider: Send + Sync {
    /// The caller's role on `release`, or `None` if they have no access.
    fn role(&self, actor: &Actor, release: &ReleaseKey) -> Option<ReleaseRole>;

    /// Everyone holding any role on `release`, used as notification recipients.
    fn participants(&self, release: &ReleaseKey) -> Vec<Actor>;

    /// Whether the caller may create new releases (import services, release administrators).
    fn may_create_releases(&self, actor: &Actor) -> bool;
}

pub trait JobStatusProvider: Send + Sync {
    fn has_running_job(&self, release: &ReleaseKey) -> bool;
}

#[derive(Debug, thiserror::Error)]
#[error("notification '{template}' failed: {reason}")]
pub struct NotifyError {
    pub template: String,
    pub reason: String,
}

pub trait Notifier: Send + Sync {
    fn send(
        &self,
        template: &str,
        recipient: &Actor,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), NotifyError>;
}

/// Role assignments held in memory.
#[derive(Debug, Default)]
pub struct StaticRoleProvider {
    grants: RwLock<HashMap<ReleaseKey, Vec<(Actor, ReleaseRole)>>>,
    creators: RwLock<HashSet<NonEmptyText>>,
}

impl StaticRoleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant (or replace) `actor`'s role on `release`.
    pub fn grant(&self, release: &ReleaseKey, actor: Actor, role: ReleaseRole) {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        let entries = grants.entry(release.clone()).or_default();
        entries.retain(|(existing, _)| existing.subject_id != actor.subject_id);
        entries.push((actor, role));
    }

    /// Allow `actor` to create releases.
    pub fn allow_creation(&self, actor: &Actor) {
        self.creators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(actor.subject_id.clone());
    }

    /// Load grants from a YAML document of the form
    ///
    /// ```yaml
    /// creators: [importer]
    /// releases:
    ///   R001:
    ///     - { subjectId: alice, role: administrator }
    /// ```
    pub fn from_yaml(yaml: &str) -> CoreResult<Self> {
        let document: RoleDocument =
            serde_yaml::from_str(yaml).map_err(CoreError::YamlDeserialization)?;
        let provider = Self::new();
        for subject_id in document.creators {
            provider.allow_creation(&Actor::new(subject_id));
        }
        for (key, grants) in document.releases {
            for grant in grants {
                let actor = Actor {
                    subject_id: grant.subject_id,
                    display_name: grant.display_name,
                    email: grant.email,
                };
                provider.grant(&key, actor, grant.role);
            }
        }
        Ok(provider)
    }
}

#[derive(Debug, Deserialize)]
struct RoleDocument {
    #[serde(default)]
    creators: Vec<NonEmptyText>,
    #[serde(default)]
    releases: BTreeMap<ReleaseKey, Vec<RoleGrant>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleGrant {
    subject_id: NonEmptyText,
    role: ReleaseRole,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl RoleProvider for StaticRoleProvider {
    fn role(&self, actor: &Actor, release: &ReleaseKey) -> Option<ReleaseRole> {
        let grants = self.grants.read().unwrap_or_else(PoisonError::into_inner);
        grants.get(release).and_then(|entries| {
            entries
                .iter()
                .find(|(a, _)| a.subject_id == actor.subject_id)
                .map(|(_, role)| *role)
        })
    }

    fn participants(&self, release: &ReleaseKey) -> Vec<Actor> {
        let grants = self.grants.read().unwrap_or_else(PoisonError::into_inner);
        grants
            .get(release)
            .map(|entries| entries.iter().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default()
    }

    fn may_create_releases(&self, actor: &Actor) -> bool {
        self.creators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&actor.subject_id)
    }
}

/// Tracks which releases have a background job in progress.
#[derive(Debug, Default)]
pub struct StaticJobStatus {
    running: RwLock<HashSet<ReleaseKey>>,
}

impl StaticJobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, release: &ReleaseKey, running: bool) {
        let mut set = self.running.write().unwrap_or_else(PoisonError::into_inner);
        if running {
            set.insert(release.clone());
        } else {
            set.remove(release);
        }
    }
}

impl JobStatusProvider for StaticJobStatus {
    fn has_running_job(&self, release: &ReleaseKey) -> bool {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(release)
    }
}

/// Writes notifications to the tracing log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send(
        &self,
        template: &str,
        recipient: &Actor,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            template,
            recipient = recipient.subject_id.as_str(),
            ?variables,
            "notification"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub template: String,
    pub recipient: Actor,
    pub variables: BTreeMap<String, String>,
}

/// Captures notifications so callers can inspect them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(
        &self,
        template: &str,
        recipient: &Actor,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentNotification {
                template: template.to_owned(),
                recipient: recipient.clone(),
                variables: variables.clone(),
            });
        Ok(())
    }
}
