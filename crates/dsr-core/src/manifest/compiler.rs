//! Compiles the master manifest of a release from its current selection.
//!
//! Output is deterministic for a given selection and set of flags. Specimens follow
//! [`Lineage::sort_key`](crate::catalogue::Lineage::sort_key), artifacts and files keep
//! catalogue order, and every collection serialises as a sequence. The integrity tag of an
//! activation depends on this.

use super::{
    ManifestArtifact, ManifestCase, ManifestFile, ManifestPatient, ManifestSpecimen,
    MasterManifest,
};
use crate::catalogue::{Artifact, Lineage};
use crate::error::ManifestError;
use crate::release::ReleaseFlags;
use crate::store::StoreRead;
use crate::{CoreError, CoreResult};
use dsr_types::ReleaseKey;

/// Compile the manifest of `key` as seen through `read`.
///
/// Call this with the transaction that decided to activate, so the selection cannot change
/// underneath it.
pub fn compile<S>(read: &S, key: &ReleaseKey) -> CoreResult<MasterManifest>
where
    S: StoreRead + ?Sized,
{
    let release = read
        .release(key)
        .ok_or_else(|| CoreError::ReleaseDisappeared(key.clone()))?;
    let flags = *release.flags();

    let scope = read.catalogue().scope(release.datasets());
    let lineages = scope
        .lineages
        .iter()
        .filter(|l| release.is_selected(&l.specimen.id));

    let mut specimens = Vec::new();
    let mut cases: Vec<ManifestCase> = Vec::new();

    for lineage in lineages {
        let artifacts = filter_artifacts(&lineage.specimen.artifacts, &flags)?;
        push_into_tree(&mut cases, lineage);
        specimens.push(ManifestSpecimen {
            id: lineage.specimen.id,
            case_id: lineage.case.id,
            patient_id: lineage.patient.id,
            case_identifiers: lineage.case.identifiers.clone(),
            patient_identifiers: lineage.patient.identifiers.clone(),
            specimen_identifiers: lineage.specimen.identifiers.clone(),
            consent: lineage.specimen.consent.clone(),
            artifacts,
        });
    }

    let manifest = MasterManifest {
        release_key: key.clone(),
        flags,
        specimens,
        cases,
    };
    tracing::debug!(
        release = %key,
        specimens = manifest.specimens.len(),
        files = manifest.file_count(),
        "compiled manifest"
    );
    Ok(manifest)
}

/// Keep the files whose category and protocol are allowed; drop artifacts left empty.
///
/// Every url is parsed, including ones that end up filtered out: a malformed url aborts the
/// whole compilation.
fn filter_artifacts(
    artifacts: &[Artifact],
    flags: &ReleaseFlags,
) -> Result<Vec<ManifestArtifact>, ManifestError> {
    let mut kept = Vec::new();
    for artifact in artifacts {
        let category_allowed = flags.allows_category(artifact.kind.category());
        let mut files = Vec::new();
        for entry in &artifact.files {
            let location = entry.file.location()?;
            if category_allowed && flags.allows_protocol(location.protocol) {
                files.push(ManifestFile {
                    object_type: entry.object_type,
                    protocol: location.protocol,
                    url: entry.file.url.clone(),
                    size: entry.file.size,
                    checksums: entry.file.checksums.clone(),
                });
            }
        }
        if !files.is_empty() {
            kept.push(ManifestArtifact {
                kind: artifact.kind,
                files,
            });
        }
    }
    Ok(kept)
}

/// Lineages arrive sorted, so a specimen belongs to the last case and patient or starts new ones.
fn push_into_tree(cases: &mut Vec<ManifestCase>, lineage: &Lineage<'_>) {
    if cases.last().map(|c| c.id) != Some(lineage.case.id) {
        cases.push(ManifestCase {
            id: lineage.case.id,
            identifiers: lineage.case.identifiers.clone(),
            consent: lineage.case.consent.clone(),
            patients: Vec::new(),
        });
    }
    let Some(case) = cases.last_mut() else {
        return;
    };

    if case.patients.last().map(|p| p.id) != Some(lineage.patient.id) {
        case.patients.push(ManifestPatient {
            id: lineage.patient.id,
            identifiers: lineage.patient.identifiers.clone(),
            consent: lineage.patient.consent.clone(),
            specimens: Vec::new(),
        });
    }
    if let Some(patient) = case.patients.last_mut() {
        patient.specimens.push(lineage.specimen.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Catalogue, ObjectType, StorageProtocol};
    use crate::release::{NewRelease, Release, ReleaseUpdate};
    use crate::store::{LocalStore, ReleaseStore};
    use chrono::Utc;
    use dsr_types::NonEmptyText;
    use dsr_uuid::EntityId;
    use std::collections::BTreeSet;

    const YAML: &str = r#"
datasets:
  - uri: urn:ds:a
    cases:
      - identifiers: [{ value: "CASE-B" }]
        patients:
          - identifiers: [{ value: "PAT-B" }]
            specimens:
              - id: 000000000000000000000000000000b1
                identifiers: [{ value: "SPC-B" }]
      - identifiers: [{ value: "CASE-A" }]
        patients:
          - identifiers: [{ value: "PAT-A" }]
            specimens:
              - id: 000000000000000000000000000000a1
                identifiers: [{ value: "SPC-A1" }]
                artifacts:
                  - kind: alignment
                    files:
                      - { objectType: BAM, url: "s3://bkt/a1.bam", size: 100 }
                      - { objectType: BAI, url: "s3://bkt/a1.bam.bai", size: 1 }
                  - kind: variantCalls
                    files:
                      - { objectType: VCF, url: "gs://bkt/a1.vcf.gz", size: 50 }
                      - { objectType: TBI, url: "s3://bkt/a1.vcf.gz.tbi", size: 2 }
              - id: 000000000000000000000000000000a2
                identifiers: [{ value: "SPC-A2" }]
"#;

    fn store_with(flags: &[ReleaseUpdate], selected: &[&str]) -> LocalStore {
        let store = LocalStore::in_memory(Catalogue::from_yaml(YAML).unwrap());
        let mut release = Release::create(
            NewRelease {
                key: ReleaseKey::new("R1").unwrap(),
                description: NonEmptyText::new("test").unwrap(),
                datasets: BTreeSet::from(["urn:ds:a".to_string()]),
                flags: ReleaseFlags::default(),
            },
            Utc::now(),
        );
        for update in flags {
            release.apply_update(update.clone());
        }
        let ids: BTreeSet<EntityId> = selected
            .iter()
            .map(|s| EntityId::parse(s).unwrap())
            .collect();
        release.select(&ids);

        let mut tx = store.begin().unwrap();
        tx.put_release(release);
        tx.commit().unwrap();
        store
    }

    fn compile_r1(store: &LocalStore) -> CoreResult<MasterManifest> {
        let snapshot = store.snapshot().unwrap();
        compile(snapshot.as_ref(), &ReleaseKey::new("R1").unwrap())
    }

    const ALL: [&str; 3] = [
        "000000000000000000000000000000a1",
        "000000000000000000000000000000a2",
        "000000000000000000000000000000b1",
    ];

    #[test]
    fn read_flag_off_drops_read_files_only() {
        let store = store_with(
            &[
                ReleaseUpdate::AllowVariant(true),
                ReleaseUpdate::AllowS3(true),
                ReleaseUpdate::AllowGs(true),
            ],
            &ALL,
        );
        let manifest = compile_r1(&store).unwrap();
        let a1 = &manifest.specimens[0];
        assert_eq!(a1.artifacts.len(), 1);
        assert_eq!(a1.artifacts[0].files.len(), 2);
        assert!(a1.artifacts[0]
            .files
            .iter()
            .all(|f| matches!(f.object_type, ObjectType::Vcf | ObjectType::Tbi)));
    }

    #[test]
    fn protocol_flags_combine_as_union() {
        let store = store_with(
            &[
                ReleaseUpdate::AllowRead(true),
                ReleaseUpdate::AllowVariant(true),
                ReleaseUpdate::AllowGs(true),
            ],
            &ALL,
        );
        let manifest = compile_r1(&store).unwrap();
        let protocols: Vec<StorageProtocol> = manifest.specimens[0]
            .artifacts
            .iter()
            .flat_map(|a| a.files.iter().map(|f| f.protocol))
            .collect();
        assert_eq!(protocols, vec![StorageProtocol::Gs]);
    }

    #[test]
    fn specimens_without_files_stay_in_the_tree() {
        let store = store_with(&[], &ALL);
        let manifest = compile_r1(&store).unwrap();
        assert_eq!(manifest.specimens.len(), 3);
        assert_eq!(manifest.file_count(), 0);

        let order: Vec<&str> = manifest
            .specimens
            .iter()
            .map(|s| s.specimen_identifiers[0].value.as_str())
            .collect();
        assert_eq!(order, vec!["SPC-A1", "SPC-A2", "SPC-B"]);

        assert_eq!(manifest.cases.len(), 2);
        assert_eq!(manifest.cases[0].patients[0].specimens.len(), 2);
    }

    #[test]
    fn compiling_twice_is_byte_identical() {
        let store = store_with(
            &[ReleaseUpdate::AllowRead(true), ReleaseUpdate::AllowS3(true)],
            &ALL,
        );
        let first = compile_r1(&store).unwrap().to_bytes().unwrap();
        let second = compile_r1(&store).unwrap().to_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_release_has_disappeared() {
        let store = LocalStore::in_memory(Catalogue::new());
        let err = compile_r1(&store).expect_err("release does not exist");
        assert!(matches!(err, CoreError::ReleaseDisappeared(_)));
    }
}
