//! The master manifest and the views derived from it.
//!
//! A [`MasterManifest`] is compiled once at activation ([`compiler`]) and stored, serialised,
//! inside the activation. Everything downstream reads the stored copy: the flat object list
//! ([`bucket_key`]) and the identifier-grouped gateway view ([`gateway`]) are pure functions
//! of it.

pub mod bucket_key;
pub mod compiler;
pub mod gateway;

use crate::audit::{AuditAction, AuditCategory};
use crate::catalogue::{
    ArtifactKind, Checksum, ConsentAnnotation, ExternalIdentifier, ObjectType, StorageProtocol,
};
use crate::collaborators::Actor;
use crate::context::CoreContext;
use crate::error::ManifestError;
use crate::release::{Activation, ReleaseFlags};
use crate::store::StoreRead;
use crate::{CoreError, CoreResult};
use bucket_key::{ObjectRow, ProtocolFilter};
use dsr_types::ReleaseKey;
use dsr_uuid::{EntityId, Sha256Hash, TimestampId};
use gateway::GatewayManifest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterManifest {
    pub release_key: ReleaseKey,
    /// Allow flags as they were when the manifest was compiled.
    pub flags: ReleaseFlags,
    pub specimens: Vec<ManifestSpecimen>,
    pub cases: Vec<ManifestCase>,
}

impl MasterManifest {
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string(self).map_err(ManifestError::Serialization)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json::to_vec(self).map_err(ManifestError::Serialization)
    }

    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::Manifest(ManifestError::Deserialization(e)))
    }

    pub fn is_empty(&self) -> bool {
        self.specimens.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.specimens
            .iter()
            .flat_map(|s| &s.artifacts)
            .map(|a| a.files.len())
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSpecimen {
    pub id: EntityId,
    pub case_id: EntityId,
    pub patient_id: EntityId,
    pub case_identifiers: Vec<ExternalIdentifier>,
    pub patient_identifiers: Vec<ExternalIdentifier>,
    pub specimen_identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
    /// Artifacts with at least one file surviving the allow flags.
    pub artifacts: Vec<ManifestArtifact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestArtifact {
    pub kind: ArtifactKind,
    pub files: Vec<ManifestFile>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub object_type: ObjectType,
    pub protocol: StorageProtocol,
    pub url: String,
    pub size: u64,
    pub checksums: Vec<Checksum>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCase {
    pub id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
    pub patients: Vec<ManifestPatient>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPatient {
    pub id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
    /// Ids of this patient's specimens, in manifest order.
    pub specimens: Vec<EntityId>,
}

/// The stored manifest bytes of the current activation, for standalone verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestBlob {
    pub release_key: ReleaseKey,
    pub activation_id: TimestampId,
    pub manifest_tag: Sha256Hash,
    pub blob: String,
}

/// Audit detail for an object manifest download; the rows themselves stay out of the log.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectManifestFetch {
    activation_id: TimestampId,
    row_count: usize,
    #[serde(skip)]
    rows: Vec<ObjectRow>,
}

/// Read access to the active manifest of a release and its derived views.
pub struct ManifestService {
    ctx: Arc<CoreContext>,
}

impl ManifestService {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// The active manifest, or `None` when the release is not activated.
    pub fn get_active_manifest(&self, key: &ReleaseKey) -> CoreResult<Option<MasterManifest>> {
        let snapshot = self.ctx.store().snapshot()?;
        match active_activation(snapshot.as_ref(), key)? {
            Some(activation) => verified_manifest(key, activation).map(Some),
            None => Ok(None),
        }
    }

    /// Flat object rows of the active manifest, restricted to `protocols` when given.
    pub fn bucket_key_manifest(
        &self,
        key: &ReleaseKey,
        protocols: Option<&[String]>,
    ) -> CoreResult<Option<Vec<ObjectRow>>> {
        let filter = ProtocolFilter::from_list(protocols)?;
        match self.get_active_manifest(key)? {
            Some(manifest) => Ok(Some(bucket_key::bucket_key_rows(&manifest, &filter)?)),
            None => Ok(None),
        }
    }

    pub fn gateway_manifest(&self, key: &ReleaseKey) -> CoreResult<Option<GatewayManifest>> {
        Ok(self
            .get_active_manifest(key)?
            .map(|manifest| gateway::gateway_manifest(&manifest)))
    }

    pub fn manifest_blob(&self, key: &ReleaseKey) -> CoreResult<Option<ManifestBlob>> {
        let snapshot = self.ctx.store().snapshot()?;
        Ok(active_activation(snapshot.as_ref(), key)?.map(|activation| ManifestBlob {
            release_key: key.clone(),
            activation_id: activation.id().clone(),
            manifest_tag: activation.manifest_tag().clone(),
            blob: activation.manifest_blob().to_owned(),
        }))
    }

    /// Recompute the integrity tag over the stored bytes of the current activation.
    pub fn verify_activation(&self, key: &ReleaseKey) -> CoreResult<Sha256Hash> {
        let snapshot = self.ctx.store().snapshot()?;
        let activation = active_activation(snapshot.as_ref(), key)?
            .ok_or_else(|| CoreError::NotActivated(key.clone()))?;
        if !activation.verify() {
            tracing::error!(release = %key, "manifest integrity check failed");
            return Err(CoreError::IntegrityMismatch(key.clone()));
        }
        Ok(activation.manifest_tag().clone())
    }

    /// Audited download of the object manifest by any participant of the release.
    pub fn fetch_object_manifest(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        protocols: Option<&[String]>,
    ) -> CoreResult<Vec<ObjectRow>> {
        let action = AuditAction::new(AuditCategory::Read, "fetch object manifest", Some(key));
        self.ctx.executor().read(
            Some(caller),
            action,
            || {
                self.ctx.require_role(caller, key, "fetch the object manifest")?;
                Ok(())
            },
            |read| {
                let filter = ProtocolFilter::from_list(protocols)?;
                let activation = active_activation(read, key)?
                    .ok_or_else(|| CoreError::NotActivated(key.clone()))?;
                let manifest = verified_manifest(key, activation)?;
                let rows = bucket_key::bucket_key_rows(&manifest, &filter)?;
                Ok(ObjectManifestFetch {
                    activation_id: activation.id().clone(),
                    row_count: rows.len(),
                    rows,
                })
            },
            |fetch| fetch.rows,
        )
    }
}

/// The current activation of `key`; a missing release is an error, an inactive one is `None`.
fn active_activation<'a>(
    read: &'a dyn StoreRead,
    key: &ReleaseKey,
) -> CoreResult<Option<&'a Activation>> {
    read.release(key)
        .map(|release| release.activation())
        .ok_or_else(|| CoreError::ReleaseNotFound(key.clone()))
}

fn verified_manifest(key: &ReleaseKey, activation: &Activation) -> CoreResult<MasterManifest> {
    if !activation.verify() {
        tracing::error!(release = %key, "manifest integrity check failed");
        return Err(CoreError::IntegrityMismatch(key.clone()));
    }
    activation.manifest()
}
