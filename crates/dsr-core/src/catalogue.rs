//! Dataset catalogue: cases, patients, specimens and their stored artifacts.
//!
//! The catalogue is an arena of three flat tables keyed by [`EntityId`]. Patients point at
//! their case and specimens at their patient through parent-id back-references; nothing holds
//! a pointer to its parent object. Nested views (node trees, manifest case trees) are built by
//! grouping passes over these tables.
//!
//! Catalogues are authored as nested YAML documents ([`DatasetDocument`]) and flattened on
//! load by [`Catalogue::from_documents`]. Nodes without an authored `id` get one derived from
//! the dataset uri and the path of primary identifiers leading to them, so releases that store
//! specimen ids keep pointing at the same specimens when the catalogue is loaded again.

use crate::error::ManifestError;
use crate::{CoreError, CoreResult};
use dsr_uuid::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// An identifier issued by an external system, e.g. a study id or hospital MRN.
///
/// The empty `system` is valid and denotes a "systemless" identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalIdentifier {
    #[serde(default)]
    pub system: String,
    pub value: String,
}

impl ExternalIdentifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
        }
    }
}

/// The value used to order nodes: the first external identifier, or empty.
pub(crate) fn primary_value(identifiers: &[ExternalIdentifier]) -> &str {
    identifiers.first().map(|i| i.value.as_str()).unwrap_or("")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentAnnotation {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The object-store families a file may live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProtocol {
    S3,
    Gs,
    R2,
}

impl StorageProtocol {
    pub const ALL: [StorageProtocol; 3] = [Self::S3, Self::Gs, Self::R2];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gs => "gs",
            Self::R2 => "r2",
        }
    }
}

impl fmt::Display for StorageProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProtocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "gs" => Ok(Self::Gs),
            "r2" => Ok(Self::R2),
            _ => Err(()),
        }
    }
}

/// A parsed `scheme://bucket/key` object url.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    pub protocol: StorageProtocol,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn parse(url: &str) -> Result<Self, ManifestError> {
        let malformed = |reason| ManifestError::MalformedUrl {
            url: url.to_owned(),
            reason,
        };

        let (scheme, rest) = url.split_once("://").ok_or_else(|| malformed("missing '://'"))?;
        let protocol = scheme
            .parse::<StorageProtocol>()
            .map_err(|_| ManifestError::UnsupportedScheme(url.to_owned()))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| malformed("missing object key"))?;

        if bucket.is_empty() {
            return Err(malformed("empty bucket"));
        }
        if key.is_empty() || key.ends_with('/') {
            return Err(malformed("empty object key"));
        }

        Ok(Self {
            protocol,
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub kind: ChecksumType,
    pub value: String,
}

/// A file held in an object store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub checksums: Vec<Checksum>,
}

impl StoredFile {
    pub fn location(&self) -> Result<ObjectLocation, ManifestError> {
        ObjectLocation::parse(&self.url)
    }
}

/// The broad category of data an artifact carries. Each category has its own allow flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCategory {
    Read,
    Variant,
    Phenotype,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    PairedReads,
    Alignment,
    VariantCalls,
    Phenotype,
}

impl ArtifactKind {
    pub const fn category(self) -> DataCategory {
        match self {
            Self::PairedReads | Self::Alignment => DataCategory::Read,
            Self::VariantCalls => DataCategory::Variant,
            Self::Phenotype => DataCategory::Phenotype,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    FastqR1,
    FastqR2,
    Bam,
    Bai,
    Cram,
    Crai,
    Vcf,
    Tbi,
    Phenopacket,
}

impl ObjectType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastqR1 => "FASTQ_R1",
            Self::FastqR2 => "FASTQ_R2",
            Self::Bam => "BAM",
            Self::Bai => "BAI",
            Self::Cram => "CRAM",
            Self::Crai => "CRAI",
            Self::Vcf => "VCF",
            Self::Tbi => "TBI",
            Self::Phenopacket => "PHENOPACKET",
        }
    }

    /// True for index files that accompany a data file (BAI, CRAI, TBI).
    pub const fn is_index(self) -> bool {
        matches!(self, Self::Bai | Self::Crai | Self::Tbi)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactFile {
    pub object_type: ObjectType,
    #[serde(flatten)]
    pub file: StoredFile,
}

/// A typed group of files belonging to one specimen (e.g. a BAM and its index).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub files: Vec<ArtifactFile>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: EntityId,
    pub dataset: String,
    pub identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: EntityId,
    pub case_id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecimenRecord {
    pub id: EntityId,
    pub patient_id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
    pub artifacts: Vec<Artifact>,
}

/// A specimen together with its ancestry.
#[derive(Clone, Copy, Debug)]
pub struct Lineage<'a> {
    pub case: &'a CaseRecord,
    pub patient: &'a PatientRecord,
    pub specimen: &'a SpecimenRecord,
}

impl Lineage<'_> {
    /// Fully specified ordering: case, patient, specimen external id, each tie broken by
    /// internal id. Never depends on storage iteration order.
    pub fn sort_key(&self) -> (&str, EntityId, &str, EntityId, &str, EntityId) {
        (
            primary_value(&self.case.identifiers),
            self.case.id,
            primary_value(&self.patient.identifiers),
            self.patient.id,
            primary_value(&self.specimen.identifiers),
            self.specimen.id,
        )
    }

    /// True if any level of the lineage carries an identifier with this value.
    pub fn has_identifier_value(&self, value: &str) -> bool {
        [
            &self.case.identifiers,
            &self.patient.identifiers,
            &self.specimen.identifiers,
        ]
        .into_iter()
        .flatten()
        .any(|i| i.value == value)
    }
}

/// The subset of the catalogue visible to one release: its declared datasets only.
pub struct Scope<'a> {
    pub cases: Vec<&'a CaseRecord>,
    pub patients: Vec<&'a PatientRecord>,
    pub lineages: Vec<Lineage<'a>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalogue {
    datasets: BTreeSet<String>,
    cases: BTreeMap<EntityId, CaseRecord>,
    patients: BTreeMap<EntityId, PatientRecord>,
    specimens: BTreeMap<EntityId, SpecimenRecord>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse nested YAML dataset documents and flatten them.
    pub fn from_yaml(yaml: &str) -> CoreResult<Self> {
        let documents: CatalogueDocument =
            serde_yaml::from_str(yaml).map_err(CoreError::YamlDeserialization)?;
        Self::from_documents(documents.datasets)
    }

    pub fn from_documents(documents: Vec<DatasetDocument>) -> CoreResult<Self> {
        let mut catalogue = Self::new();
        for dataset in documents {
            catalogue.add_dataset(&dataset.uri)?;
            let dataset_ns = EntityId::derived(&EntityId::root(), dataset.uri.trim());
            for (case_pos, case) in dataset.cases.into_iter().enumerate() {
                let case_id = node_id(case.id, &dataset_ns, "case", &case.identifiers, case_pos);
                catalogue.insert_case(CaseRecord {
                    id: case_id,
                    dataset: dataset.uri.clone(),
                    identifiers: case.identifiers,
                    consent: case.consent,
                })?;
                for (patient_pos, patient) in case.patients.into_iter().enumerate() {
                    let patient_id =
                        node_id(patient.id, &case_id, "patient", &patient.identifiers, patient_pos);
                    catalogue.insert_patient(PatientRecord {
                        id: patient_id,
                        case_id,
                        identifiers: patient.identifiers,
                        consent: patient.consent,
                    })?;
                    for (specimen_pos, specimen) in patient.specimens.into_iter().enumerate() {
                        let specimen_id = node_id(
                            specimen.id,
                            &patient_id,
                            "specimen",
                            &specimen.identifiers,
                            specimen_pos,
                        );
                        catalogue.insert_specimen(SpecimenRecord {
                            id: specimen_id,
                            patient_id,
                            identifiers: specimen.identifiers,
                            consent: specimen.consent,
                            artifacts: specimen.artifacts,
                        })?;
                    }
                }
            }
        }
        Ok(catalogue)
    }

    pub fn add_dataset(&mut self, uri: &str) -> CoreResult<()> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(CoreError::Catalogue("dataset uri cannot be empty".into()));
        }
        if !self.datasets.insert(uri.to_owned()) {
            return Err(CoreError::Catalogue(format!("duplicate dataset {}", uri)));
        }
        Ok(())
    }

    pub fn insert_case(&mut self, case: CaseRecord) -> CoreResult<()> {
        if !self.datasets.contains(&case.dataset) {
            return Err(CoreError::UnknownDataset(case.dataset));
        }
        self.ensure_unused(case.id)?;
        self.cases.insert(case.id, case);
        Ok(())
    }

    pub fn insert_patient(&mut self, patient: PatientRecord) -> CoreResult<()> {
        if !self.cases.contains_key(&patient.case_id) {
            return Err(CoreError::Catalogue(format!(
                "patient {} references unknown case {}",
                patient.id, patient.case_id
            )));
        }
        self.ensure_unused(patient.id)?;
        self.patients.insert(patient.id, patient);
        Ok(())
    }

    pub fn insert_specimen(&mut self, specimen: SpecimenRecord) -> CoreResult<()> {
        if !self.patients.contains_key(&specimen.patient_id) {
            return Err(CoreError::Catalogue(format!(
                "specimen {} references unknown patient {}",
                specimen.id, specimen.patient_id
            )));
        }
        self.ensure_unused(specimen.id)?;
        self.specimens.insert(specimen.id, specimen);
        Ok(())
    }

    fn ensure_unused(&self, id: EntityId) -> CoreResult<()> {
        if self.cases.contains_key(&id)
            || self.patients.contains_key(&id)
            || self.specimens.contains_key(&id)
        {
            return Err(CoreError::Catalogue(format!("duplicate id {}", id)));
        }
        Ok(())
    }

    pub fn has_dataset(&self, uri: &str) -> bool {
        self.datasets.contains(uri)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(String::as_str)
    }

    pub fn case(&self, id: &EntityId) -> Option<&CaseRecord> {
        self.cases.get(id)
    }

    pub fn patient(&self, id: &EntityId) -> Option<&PatientRecord> {
        self.patients.get(id)
    }

    pub fn specimen(&self, id: &EntityId) -> Option<&SpecimenRecord> {
        self.specimens.get(id)
    }

    /// Resolve a specimen's ancestry through the parent-id back-references.
    pub fn lineage(&self, specimen_id: &EntityId) -> Option<Lineage<'_>> {
        let specimen = self.specimens.get(specimen_id)?;
        let patient = self.patients.get(&specimen.patient_id)?;
        let case = self.cases.get(&patient.case_id)?;
        Some(Lineage {
            case,
            patient,
            specimen,
        })
    }

    /// Everything belonging to `datasets`, lineages sorted by [`Lineage::sort_key`].
    pub fn scope(&self, datasets: &BTreeSet<String>) -> Scope<'_> {
        let cases: Vec<&CaseRecord> = self
            .cases
            .values()
            .filter(|c| datasets.contains(&c.dataset))
            .collect();
        let case_ids: BTreeSet<EntityId> = cases.iter().map(|c| c.id).collect();
        let patients: Vec<&PatientRecord> = self
            .patients
            .values()
            .filter(|p| case_ids.contains(&p.case_id))
            .collect();

        let mut lineages: Vec<Lineage<'_>> = self
            .specimens
            .keys()
            .filter_map(|id| self.lineage(id))
            .filter(|l| datasets.contains(&l.case.dataset))
            .collect();
        lineages.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        Scope {
            cases,
            patients,
            lineages,
        }
    }
}

/// The authored id, or one derived from the parent and the node's primary identifier.
///
/// Nodes with no identifiers fall back to their position among their siblings.
fn node_id(
    authored: Option<EntityId>,
    parent: &EntityId,
    level: &str,
    identifiers: &[ExternalIdentifier],
    position: usize,
) -> EntityId {
    if let Some(id) = authored {
        return id;
    }
    let name = match identifiers.first() {
        Some(primary) => format!("{}/{}|{}", level, primary.system, primary.value),
        None => format!("{}#{}", level, position),
    };
    EntityId::derived(parent, &name)
}

/// Top-level YAML catalogue document.
#[derive(Debug, Deserialize)]
pub struct CatalogueDocument {
    pub datasets: Vec<DatasetDocument>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetDocument {
    pub uri: String,
    #[serde(default)]
    pub cases: Vec<CaseDocument>,
}

#[derive(Debug, Deserialize)]
pub struct CaseDocument {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub identifiers: Vec<ExternalIdentifier>,
    #[serde(default)]
    pub consent: Vec<ConsentAnnotation>,
    #[serde(default)]
    pub patients: Vec<PatientDocument>,
}

#[derive(Debug, Deserialize)]
pub struct PatientDocument {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub identifiers: Vec<ExternalIdentifier>,
    #[serde(default)]
    pub consent: Vec<ConsentAnnotation>,
    #[serde(default)]
    pub specimens: Vec<SpecimenDocument>,
}

#[derive(Debug, Deserialize)]
pub struct SpecimenDocument {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub identifiers: Vec<ExternalIdentifier>,
    #[serde(default)]
    pub consent: Vec<ConsentAnnotation>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
datasets:
  - uri: urn:dataset:10g
    cases:
      - id: 0000000000000000000000000000000b
        identifiers: [{ system: "", value: "CASE-B" }]
        patients:
          - identifiers: [{ value: "PAT-B1" }]
            specimens:
              - identifiers: [{ value: "SPC-B1" }]
      - id: 0000000000000000000000000000000a
        identifiers: [{ system: "", value: "CASE-A" }]
        consent: [{ code: "DUO:0000042", description: "general research use" }]
        patients:
          - identifiers: [{ value: "PAT-A1" }]
            specimens:
              - identifiers: [{ value: "SPC-A1" }]
                artifacts:
                  - kind: alignment
                    files:
                      - objectType: BAM
                        url: s3://bucket/a1.bam
                        size: 10
                        checksums: [{ type: MD5, value: "abc" }]
  - uri: urn:dataset:other
"#;

    #[test]
    fn from_yaml_flattens_into_tables() {
        let catalogue = Catalogue::from_yaml(YAML).expect("catalogue should parse");
        assert!(catalogue.has_dataset("urn:dataset:10g"));
        assert!(catalogue.has_dataset("urn:dataset:other"));
        assert_eq!(catalogue.cases.len(), 2);
        assert_eq!(catalogue.patients.len(), 2);
        assert_eq!(catalogue.specimens.len(), 2);
    }

    #[test]
    fn node_ids_survive_reloading() {
        let first = Catalogue::from_yaml(YAML).unwrap();
        let second = Catalogue::from_yaml(YAML).unwrap();
        let ids = |c: &Catalogue| c.specimens.keys().copied().collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));

        let authored = EntityId::parse("0000000000000000000000000000000a").unwrap();
        assert!(second.case(&authored).is_some());
        assert!(second.patients.values().any(|p| p.case_id == authored));
    }

    #[test]
    fn scope_orders_lineages_by_external_identifiers() {
        let catalogue = Catalogue::from_yaml(YAML).unwrap();
        let datasets = BTreeSet::from(["urn:dataset:10g".to_string()]);
        let scope = catalogue.scope(&datasets);
        let order: Vec<&str> = scope
            .lineages
            .iter()
            .map(|l| primary_value(&l.specimen.identifiers))
            .collect();
        assert_eq!(order, vec!["SPC-A1", "SPC-B1"]);
    }

    #[test]
    fn scope_excludes_other_datasets() {
        let catalogue = Catalogue::from_yaml(YAML).unwrap();
        let datasets = BTreeSet::from(["urn:dataset:other".to_string()]);
        let scope = catalogue.scope(&datasets);
        assert!(scope.cases.is_empty());
        assert!(scope.lineages.is_empty());
    }

    #[test]
    fn insert_patient_rejects_unknown_case() {
        let mut catalogue = Catalogue::new();
        let err = catalogue
            .insert_patient(PatientRecord {
                id: EntityId::new(),
                case_id: EntityId::new(),
                identifiers: vec![],
                consent: vec![],
            })
            .expect_err("expected dangling parent rejection");
        assert!(matches!(err, CoreError::Catalogue(_)));
    }

    #[test]
    fn object_location_parses_bucket_and_key() {
        let location = ObjectLocation::parse("gs://umccr-10g/path/to/a.vcf.gz").unwrap();
        assert_eq!(location.protocol, StorageProtocol::Gs);
        assert_eq!(location.bucket, "umccr-10g");
        assert_eq!(location.key, "path/to/a.vcf.gz");
    }

    #[test]
    fn object_location_rejects_malformed_urls() {
        assert!(matches!(
            ObjectLocation::parse("s3:/bucket/key"),
            Err(ManifestError::MalformedUrl { .. })
        ));
        assert!(matches!(
            ObjectLocation::parse("s3://bucket"),
            Err(ManifestError::MalformedUrl { .. })
        ));
        assert!(matches!(
            ObjectLocation::parse("https://example.org/file.bam"),
            Err(ManifestError::UnsupportedScheme(_))
        ));
    }
}
