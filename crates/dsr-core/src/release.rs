//! The release aggregate: selection, allow flags and activations.

use crate::catalogue::{DataCategory, StorageProtocol};
use crate::collaborators::Actor;
use crate::manifest::MasterManifest;
use crate::CoreResult;
use chrono::{DateTime, Utc};
use dsr_types::{NonEmptyText, ReleaseKey};
use dsr_uuid::{EntityId, Sha256Hash, TimestampId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-release allow flags: three data categories and three storage protocols.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFlags {
    pub allow_read: bool,
    pub allow_variant: bool,
    pub allow_phenotype: bool,
    pub allow_s3: bool,
    pub allow_gs: bool,
    pub allow_r2: bool,
}

impl ReleaseFlags {
    pub fn allows_category(&self, category: DataCategory) -> bool {
        match category {
            DataCategory::Read => self.allow_read,
            DataCategory::Variant => self.allow_variant,
            DataCategory::Phenotype => self.allow_phenotype,
        }
    }

    /// Protocol flags combine as a union: each file is judged by its own protocol's flag.
    pub fn allows_protocol(&self, protocol: StorageProtocol) -> bool {
        match protocol {
            StorageProtocol::S3 => self.allow_s3,
            StorageProtocol::Gs => self.allow_gs,
            StorageProtocol::R2 => self.allow_r2,
        }
    }
}

/// A field of a release that may be changed after creation.
///
/// Each variant carries its own typed value, so there is no "unknown field" failure mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum ReleaseUpdate {
    AllowRead(bool),
    AllowVariant(bool),
    AllowPhenotype(bool),
    AllowS3(bool),
    AllowGs(bool),
    AllowR2(bool),
    Description(NonEmptyText),
}

impl ReleaseUpdate {
    fn apply(self, release: &mut Release) {
        let flags = &mut release.flags;
        match self {
            Self::AllowRead(v) => flags.allow_read = v,
            Self::AllowVariant(v) => flags.allow_variant = v,
            Self::AllowPhenotype(v) => flags.allow_phenotype = v,
            Self::AllowS3(v) => flags.allow_s3 = v,
            Self::AllowGs(v) => flags.allow_gs = v,
            Self::AllowR2(v) => flags.allow_r2 = v,
            Self::Description(text) => release.description = text,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::AllowRead(_) => "allowRead",
            Self::AllowVariant(_) => "allowVariant",
            Self::AllowPhenotype(_) => "allowPhenotype",
            Self::AllowS3(_) => "allowS3",
            Self::AllowGs(_) => "allowGs",
            Self::AllowR2(_) => "allowR2",
            Self::Description(_) => "description",
        }
    }
}

/// A request to create a release, typically produced by an upstream import adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelease {
    pub key: ReleaseKey,
    pub description: NonEmptyText,
    pub datasets: BTreeSet<String>,
    #[serde(default)]
    pub flags: ReleaseFlags,
}

/// The frozen manifest snapshot that makes a release live.
///
/// Activations are created only by the activation state machine and never mutated. On
/// deactivation the value is moved into the release's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    id: TimestampId,
    activated_by: Actor,
    activated_at: DateTime<Utc>,
    manifest: String,
    manifest_tag: Sha256Hash,
}

impl Activation {
    /// Serialise `manifest` and tag the exact bytes that are stored.
    pub(crate) fn seal(
        id: TimestampId,
        activated_by: Actor,
        manifest: &MasterManifest,
    ) -> CoreResult<Self> {
        let manifest = manifest.to_json()?;
        let manifest_tag = Sha256Hash::digest(manifest.as_bytes());

        Ok(Self {
            activated_at: id.timestamp(),
            id,
            activated_by,
            manifest,
            manifest_tag,
        })
    }

    pub fn id(&self) -> &TimestampId {
        &self.id
    }

    pub fn activated_by(&self) -> &Actor {
        &self.activated_by
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    /// The stored manifest blob, byte-for-byte what the integrity tag covers.
    pub fn manifest_blob(&self) -> &str {
        &self.manifest
    }

    pub fn manifest_tag(&self) -> &Sha256Hash {
        &self.manifest_tag
    }

    pub fn verify(&self) -> bool {
        self.manifest_tag.verify(self.manifest.as_bytes())
    }

    pub fn manifest(&self) -> CoreResult<MasterManifest> {
        MasterManifest::from_bytes(self.manifest.as_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    key: ReleaseKey,
    description: NonEmptyText,
    datasets: BTreeSet<String>,
    flags: ReleaseFlags,
    created_at: DateTime<Utc>,
    #[serde(default)]
    activation: Option<Activation>,
    #[serde(default)]
    history: Vec<Activation>,
    #[serde(default)]
    selected: BTreeSet<EntityId>,
}

impl Release {
    pub(crate) fn create(request: NewRelease, created_at: DateTime<Utc>) -> Self {
        Self {
            key: request.key,
            description: request.description,
            datasets: request.datasets,
            flags: request.flags,
            created_at,
            activation: None,
            history: Vec::new(),
            selected: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &ReleaseKey {
        &self.key
    }

    pub fn description(&self) -> &NonEmptyText {
        &self.description
    }

    pub fn datasets(&self) -> &BTreeSet<String> {
        &self.datasets
    }

    pub fn flags(&self) -> &ReleaseFlags {
        &self.flags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn activation(&self) -> Option<&Activation> {
        self.activation.as_ref()
    }

    pub fn history(&self) -> &[Activation] {
        &self.history
    }

    pub fn is_activated(&self) -> bool {
        self.activation.is_some()
    }

    pub fn selected(&self) -> &BTreeSet<EntityId> {
        &self.selected
    }

    pub fn is_selected(&self, specimen: &EntityId) -> bool {
        self.selected.contains(specimen)
    }

    pub(crate) fn apply_update(&mut self, update: ReleaseUpdate) {
        update.apply(self);
    }

    /// Set union. Returns how many specimens were newly selected.
    pub(crate) fn select(&mut self, specimens: &BTreeSet<EntityId>) -> usize {
        let before = self.selected.len();
        self.selected.extend(specimens.iter().copied());
        self.selected.len() - before
    }

    /// Set difference. Returns how many specimens were unselected.
    pub(crate) fn unselect(&mut self, specimens: &BTreeSet<EntityId>) -> usize {
        let before = self.selected.len();
        self.selected.retain(|id| !specimens.contains(id));
        before - self.selected.len()
    }

    pub(crate) fn clear_selection(&mut self) -> usize {
        let removed = self.selected.len();
        self.selected.clear();
        removed
    }

    pub(crate) fn set_activation(&mut self, activation: Activation) {
        self.activation = Some(activation);
    }

    /// Move the current activation to the end of the history.
    pub(crate) fn retire_activation(&mut self) -> Option<&Activation> {
        let activation = self.activation.take()?;
        self.history.push(activation);
        self.history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release {
        Release::create(
            NewRelease {
                key: ReleaseKey::new("R1").unwrap(),
                description: NonEmptyText::new("Test release").unwrap(),
                datasets: BTreeSet::from(["urn:dataset:a".to_string()]),
                flags: ReleaseFlags::default(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn select_is_idempotent_union() {
        let mut release = release();
        let a = EntityId::new();
        let b = EntityId::new();
        assert_eq!(release.select(&BTreeSet::from([a, b])), 2);
        assert_eq!(release.select(&BTreeSet::from([a])), 0);
        assert_eq!(release.selected().len(), 2);
    }

    #[test]
    fn unselect_is_set_difference() {
        let mut release = release();
        let a = EntityId::new();
        let b = EntityId::new();
        release.select(&BTreeSet::from([a, b]));
        assert_eq!(release.unselect(&BTreeSet::from([a, EntityId::new()])), 1);
        assert!(release.is_selected(&b));
        assert!(!release.is_selected(&a));
    }

    #[test]
    fn updates_set_exactly_one_field() {
        let mut release = release();
        release.apply_update(ReleaseUpdate::AllowGs(true));
        assert!(release.flags().allow_gs);
        assert!(!release.flags().allow_s3);

        release.apply_update(ReleaseUpdate::Description(
            NonEmptyText::new("Renamed").unwrap(),
        ));
        assert_eq!(release.description().as_str(), "Renamed");
    }

    #[test]
    fn update_serialises_as_tagged_field() {
        let json = serde_json::to_string(&ReleaseUpdate::AllowR2(true)).unwrap();
        assert_eq!(json, r#"{"field":"allowR2","value":true}"#);
        let back: ReleaseUpdate =
            serde_json::from_str(r#"{"field":"allowVariant","value":false}"#).unwrap();
        assert_eq!(back, ReleaseUpdate::AllowVariant(false));
    }
}
