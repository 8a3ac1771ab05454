//! Flat object list: one row per stored file, with bucket and key split out of the url.

use super::MasterManifest;
use crate::catalogue::{primary_value, ExternalIdentifier, ObjectLocation, StorageProtocol};
use crate::constants::ANY_PROTOCOL;
use crate::error::ManifestError;
use crate::{CoreError, CoreResult};
use dsr_uuid::EntityId;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRow {
    pub case: String,
    pub patient: String,
    pub specimen: String,
    pub object_type: String,
    pub protocol: StorageProtocol,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Which storage protocols a caller wants rows for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolFilter {
    Any,
    Only(BTreeSet<StorageProtocol>),
}

impl ProtocolFilter {
    /// Build a filter from a caller-supplied allow-list. `None` or a `*` entry matches all.
    pub fn from_list(protocols: Option<&[String]>) -> CoreResult<Self> {
        let Some(protocols) = protocols else {
            return Ok(Self::Any);
        };
        let mut allowed = BTreeSet::new();
        for name in protocols {
            if name.trim() == ANY_PROTOCOL {
                return Ok(Self::Any);
            }
            let protocol = name.parse::<StorageProtocol>().map_err(|_| {
                CoreError::InvalidInput(format!("unknown storage protocol '{}'", name))
            })?;
            allowed.insert(protocol);
        }
        Ok(Self::Only(allowed))
    }

    pub fn allows(&self, protocol: StorageProtocol) -> bool {
        match self {
            Self::Any => true,
            Self::Only(allowed) => allowed.contains(&protocol),
        }
    }
}

/// Flatten every file of `manifest` into rows, in manifest order.
///
/// Urls are parsed again here; one that does not parse fails the whole transform.
pub fn bucket_key_rows(
    manifest: &MasterManifest,
    filter: &ProtocolFilter,
) -> Result<Vec<ObjectRow>, ManifestError> {
    let mut rows = Vec::new();
    for specimen in &manifest.specimens {
        for file in specimen.artifacts.iter().flat_map(|a| &a.files) {
            let location = ObjectLocation::parse(&file.url)?;
            if !filter.allows(location.protocol) {
                continue;
            }
            rows.push(ObjectRow {
                case: display_id(&specimen.case_identifiers, &specimen.case_id),
                patient: display_id(&specimen.patient_identifiers, &specimen.patient_id),
                specimen: display_id(&specimen.specimen_identifiers, &specimen.id),
                object_type: file.object_type.to_string(),
                protocol: location.protocol,
                bucket: location.bucket,
                key: location.key,
                size: file.size,
                checksum: file.checksums.first().map(|c| c.value.clone()),
            });
        }
    }
    Ok(rows)
}

/// Primary external identifier, falling back to the internal id.
fn display_id(identifiers: &[ExternalIdentifier], id: &EntityId) -> String {
    match primary_value(identifiers) {
        "" => id.to_string(),
        value => value.to_owned(),
    }
}

/// Render rows as tab-separated values with a header line.
pub fn render_tsv(rows: &[ObjectRow]) -> String {
    let mut out = String::from(
        "case\tpatient\tspecimen\tobjectType\tprotocol\tbucket\tkey\tsize\tchecksum\n",
    );
    for row in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            row.case,
            row.patient,
            row.specimen,
            row.object_type,
            row.protocol,
            row.bucket,
            row.key,
            row.size,
            row.checksum.as_deref().unwrap_or("")
        ));
    }
    out
}
