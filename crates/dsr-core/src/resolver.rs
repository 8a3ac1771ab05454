//! Resolving user-supplied identifiers to specimens of a release.
//!
//! Resolution only ever looks at the datasets declared on the release. A node from another
//! dataset is reported as not found, exactly like an id that does not exist at all.

use crate::catalogue::{Catalogue, Lineage};
use crate::release::Release;
use crate::{CoreError, CoreResult};
use dsr_uuid::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which specimens a selection edit applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "camelCase")]
pub enum SpecimenSelector {
    /// Internal ids of cases, patients or specimens. A case or patient id expands to every
    /// specimen beneath it.
    Ids(Vec<String>),
    /// External identifier values, matched at any level of the hierarchy.
    Identifiers(Vec<String>),
    /// Every specimen in the release's datasets.
    All,
}

impl SpecimenSelector {
    /// True for a targeted selector that names nothing.
    pub fn is_empty_target(&self) -> bool {
        match self {
            Self::Ids(values) | Self::Identifiers(values) => {
                values.iter().all(|v| v.trim().is_empty())
            }
            Self::All => false,
        }
    }
}

/// Problems found while resolving a selector. Any fault rejects the whole request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionFaults {
    /// Values that matched no specimen.
    pub unmatched: BTreeSet<String>,
    /// Internal ids that are malformed or do not exist in the release's datasets.
    pub missing_ids: BTreeSet<String>,
    /// External identifiers whose matches span more than one case.
    pub cross_linked: BTreeSet<String>,
}

impl SelectionFaults {
    pub fn is_empty(&self) -> bool {
        self.unmatched.is_empty() && self.missing_ids.is_empty() && self.cross_linked.is_empty()
    }
}

impl fmt::Display for SelectionFaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (label, set) in [
            ("unmatched", &self.unmatched),
            ("missing ids", &self.missing_ids),
            ("cross-linked", &self.cross_linked),
        ] {
            if !set.is_empty() {
                let values: Vec<&str> = set.iter().map(String::as_str).collect();
                parts.push(format!("{} [{}]", label, values.join(", ")));
            }
        }
        if parts.is_empty() {
            f.write_str("no faults")
        } else {
            f.write_str(&parts.join("; "))
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub specimens: BTreeSet<EntityId>,
    pub faults: SelectionFaults,
}

impl Resolution {
    /// The resolved specimens, or an error if anything failed to resolve.
    pub fn into_specimens(self) -> CoreResult<BTreeSet<EntityId>> {
        if self.faults.is_empty() {
            Ok(self.specimens)
        } else {
            Err(CoreError::SelectionFaults(self.faults))
        }
    }
}

pub fn resolve(
    catalogue: &Catalogue,
    release: &Release,
    selector: &SpecimenSelector,
) -> Resolution {
    let scope = catalogue.scope(release.datasets());
    let mut resolution = Resolution::default();

    match selector {
        SpecimenSelector::All => {
            resolution.specimens = scope.lineages.iter().map(|l| l.specimen.id).collect();
        }
        SpecimenSelector::Ids(values) => {
            for value in distinct(values) {
                let Ok(id) = EntityId::parse(value) else {
                    resolution.faults.missing_ids.insert(value.to_owned());
                    continue;
                };
                let known = scope.cases.iter().any(|c| c.id == id)
                    || scope.patients.iter().any(|p| p.id == id)
                    || scope.lineages.iter().any(|l| l.specimen.id == id);
                if !known {
                    resolution.faults.missing_ids.insert(value.to_owned());
                    continue;
                }

                let matched: Vec<EntityId> = scope
                    .lineages
                    .iter()
                    .filter(|l| descends_from(l, &id))
                    .map(|l| l.specimen.id)
                    .collect();
                if matched.is_empty() {
                    resolution.faults.unmatched.insert(value.to_owned());
                }
                resolution.specimens.extend(matched);
            }
        }
        SpecimenSelector::Identifiers(values) => {
            for value in distinct(values) {
                let matched: Vec<&Lineage<'_>> = scope
                    .lineages
                    .iter()
                    .filter(|l| l.has_identifier_value(value))
                    .collect();
                let cases: BTreeSet<EntityId> = matched.iter().map(|l| l.case.id).collect();

                if matched.is_empty() {
                    resolution.faults.unmatched.insert(value.to_owned());
                } else if cases.len() > 1 {
                    resolution.faults.cross_linked.insert(value.to_owned());
                } else {
                    resolution
                        .specimens
                        .extend(matched.iter().map(|l| l.specimen.id));
                }
            }
        }
    }

    tracing::debug!(
        release = %release.key(),
        resolved = resolution.specimens.len(),
        faults = %resolution.faults,
        "resolved selector"
    );
    resolution
}

fn descends_from(lineage: &Lineage<'_>, id: &EntityId) -> bool {
    lineage.case.id == *id || lineage.patient.id == *id || lineage.specimen.id == *id
}

/// Trimmed, non-empty, deduplicated values in first-seen order.
fn distinct(values: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{NewRelease, ReleaseFlags};
    use chrono::Utc;
    use dsr_types::{NonEmptyText, ReleaseKey};

    const YAML: &str = r#"
datasets:
  - uri: urn:ds:a
    cases:
      - id: 000000000000000000000000000000a0
        identifiers: [{ value: "CASE-A" }]
        patients:
          - id: 000000000000000000000000000000a1
            identifiers: [{ value: "PAT-A" }]
            specimens:
              - id: 000000000000000000000000000000a2
                identifiers: [{ value: "SPC-A" }, { system: "lab", value: "X" }]
              - id: 000000000000000000000000000000a3
                identifiers: [{ value: "SPC-A2" }]
      - id: 000000000000000000000000000000b0
        identifiers: [{ value: "CASE-B" }]
        patients:
          - id: 000000000000000000000000000000b1
            identifiers: [{ value: "PAT-B" }]
            specimens:
              - id: 000000000000000000000000000000b2
                identifiers: [{ value: "SPC-B" }, { system: "lab", value: "X" }]
      - id: 000000000000000000000000000000c0
        identifiers: [{ value: "CASE-EMPTY" }]
  - uri: urn:ds:other
    cases:
      - id: 000000000000000000000000000000d0
        identifiers: [{ value: "CASE-D" }]
        patients:
          - id: 000000000000000000000000000000d1
            specimens:
              - id: 000000000000000000000000000000d2
                identifiers: [{ value: "SPC-D" }]
"#;

    fn fixture() -> (Catalogue, Release) {
        let catalogue = Catalogue::from_yaml(YAML).unwrap();
        let release = Release::create(
            NewRelease {
                key: ReleaseKey::new("R1").unwrap(),
                description: NonEmptyText::new("test").unwrap(),
                datasets: BTreeSet::from(["urn:ds:a".to_string()]),
                flags: ReleaseFlags::default(),
            },
            Utc::now(),
        );
        (catalogue, release)
    }

    fn id(hex: &str) -> EntityId {
        EntityId::parse(hex).unwrap()
    }

    #[test]
    fn case_id_expands_to_descendant_specimens() {
        let (catalogue, release) = fixture();
        let resolution = resolve(
            &catalogue,
            &release,
            &SpecimenSelector::Ids(vec!["000000000000000000000000000000a0".into()]),
        );
        assert!(resolution.faults.is_empty());
        assert_eq!(
            resolution.specimens,
            BTreeSet::from([
                id("000000000000000000000000000000a2"),
                id("000000000000000000000000000000a3")
            ])
        );
    }

    #[test]
    fn ids_outside_release_datasets_are_missing() {
        let (catalogue, release) = fixture();
        let resolution = resolve(
            &catalogue,
            &release,
            &SpecimenSelector::Ids(vec![
                "000000000000000000000000000000d2".into(),
                "not-an-id".into(),
            ]),
        );
        assert_eq!(resolution.faults.missing_ids.len(), 2);
        assert!(resolution.specimens.is_empty());
    }

    #[test]
    fn node_without_specimens_is_unmatched() {
        let (catalogue, release) = fixture();
        let resolution = resolve(
            &catalogue,
            &release,
            &SpecimenSelector::Ids(vec!["000000000000000000000000000000c0".into()]),
        );
        assert!(resolution
            .faults
            .unmatched
            .contains("000000000000000000000000000000c0"));
    }

    #[test]
    fn identifier_spanning_two_cases_is_cross_linked() {
        let (catalogue, release) = fixture();
        let resolution = resolve(
            &catalogue,
            &release,
            &SpecimenSelector::Identifiers(vec!["X".into()]),
        );
        assert!(resolution.faults.cross_linked.contains("X"));
        assert!(matches!(
            resolution.into_specimens(),
            Err(CoreError::SelectionFaults(_))
        ));
    }

    #[test]
    fn identifiers_match_any_level() {
        let (catalogue, release) = fixture();
        let resolution = resolve(
            &catalogue,
            &release,
            &SpecimenSelector::Identifiers(vec!["PAT-B".into(), "SPC-A2".into()]),
        );
        let specimens = resolution.into_specimens().expect("no faults expected");
        assert_eq!(
            specimens,
            BTreeSet::from([
                id("000000000000000000000000000000a3"),
                id("000000000000000000000000000000b2")
            ])
        );
    }

    #[test]
    fn other_dataset_identifiers_do_not_match() {
        let (catalogue, release) = fixture();
        let resolution = resolve(
            &catalogue,
            &release,
            &SpecimenSelector::Identifiers(vec!["SPC-D".into()]),
        );
        assert!(resolution.faults.unmatched.contains("SPC-D"));
    }

    #[test]
    fn select_all_is_scoped_to_release_datasets() {
        let (catalogue, release) = fixture();
        let resolution = resolve(&catalogue, &release, &SpecimenSelector::All);
        assert_eq!(resolution.specimens.len(), 3);
        assert!(!resolution
            .specimens
            .contains(&id("000000000000000000000000000000d2")));
    }

    #[test]
    fn selector_serialises_with_kind_tag() {
        let json = serde_json::to_string(&SpecimenSelector::Identifiers(vec!["X".into()])).unwrap();
        assert_eq!(json, r#"{"kind":"identifiers","values":["X"]}"#);
        assert!(SpecimenSelector::Ids(vec![" ".into()]).is_empty_target());
    }
}
