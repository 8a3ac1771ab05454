//! Protocol-gateway view: read and variant files grouped under identifier maps.
//!
//! Identifiers are keyed by system. The empty system is a real key. When a node carries
//! several values under one system the entry holds all of them as an array.

use super::{ManifestArtifact, ManifestFile, MasterManifest};
use crate::catalogue::{DataCategory, ExternalIdentifier, ObjectType};
use dsr_types::ReleaseKey;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IdentifierValue {
    Single(String),
    Multiple(Vec<String>),
}

pub type IdentifierMap = BTreeMap<String, IdentifierValue>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEntry {
    pub case_ids: IdentifierMap,
    pub patient_ids: IdentifierMap,
    pub specimen_ids: IdentifierMap,
    pub object_type: ObjectType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayManifest {
    pub id: ReleaseKey,
    pub reads: Vec<GatewayEntry>,
    pub variants: Vec<GatewayEntry>,
}

pub fn identifier_map(identifiers: &[ExternalIdentifier]) -> IdentifierMap {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for identifier in identifiers {
        let values = grouped.entry(identifier.system.clone()).or_default();
        if !values.contains(&identifier.value) {
            values.push(identifier.value.clone());
        }
    }
    grouped
        .into_iter()
        .map(|(system, mut values)| {
            let value = if values.len() == 1 {
                IdentifierValue::Single(values.remove(0))
            } else {
                IdentifierValue::Multiple(values)
            };
            (system, value)
        })
        .collect()
}

/// The index type that accompanies a data file, if it has one.
fn index_type_for(object_type: ObjectType) -> Option<ObjectType> {
    match object_type {
        ObjectType::Bam => Some(ObjectType::Bai),
        ObjectType::Cram => Some(ObjectType::Crai),
        ObjectType::Vcf => Some(ObjectType::Tbi),
        _ => None,
    }
}

fn data_files(artifact: &ManifestArtifact) -> impl Iterator<Item = (&ManifestFile, Option<&str>)> {
    artifact
        .files
        .iter()
        .filter(|f| !f.object_type.is_index())
        .map(|file| {
            let index = index_type_for(file.object_type).and_then(|wanted| {
                artifact
                    .files
                    .iter()
                    .find(|f| f.object_type == wanted)
                    .map(|f| f.url.as_str())
            });
            (file, index)
        })
}

pub fn gateway_manifest(manifest: &MasterManifest) -> GatewayManifest {
    let mut reads = Vec::new();
    let mut variants = Vec::new();

    for specimen in &manifest.specimens {
        let case_ids = identifier_map(&specimen.case_identifiers);
        let patient_ids = identifier_map(&specimen.patient_identifiers);
        let specimen_ids = identifier_map(&specimen.specimen_identifiers);

        for artifact in &specimen.artifacts {
            let target = match artifact.kind.category() {
                DataCategory::Read => &mut reads,
                DataCategory::Variant => &mut variants,
                DataCategory::Phenotype => continue,
            };
            for (file, index_url) in data_files(artifact) {
                target.push(GatewayEntry {
                    case_ids: case_ids.clone(),
                    patient_ids: patient_ids.clone(),
                    specimen_ids: specimen_ids.clone(),
                    object_type: file.object_type,
                    url: file.url.clone(),
                    index_url: index_url.map(str::to_owned),
                });
            }
        }
    }

    GatewayManifest {
        id: manifest.release_key.clone(),
        reads,
        variants,
    }
}
