//! Tri-state selection status over the case → patient → specimen tree.
//!
//! A patient is `selected` when every specimen under it is selected, `unselected` when none
//! are, and `indeterminate` otherwise. Cases aggregate their patients the same way. A node
//! with no children is `unselected`.
//!
//! Restricted callers only see nodes with at least one selected descendant. Hidden nodes are
//! left out of the tree entirely, and statuses are computed over what remains visible.

use crate::catalogue::{primary_value, ConsentAnnotation, ExternalIdentifier, Scope};
use crate::collaborators::Visibility;
use dsr_uuid::EntityId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Selected,
    Unselected,
    Indeterminate,
}

impl NodeStatus {
    pub fn from_selected(selected: bool) -> Self {
        if selected {
            Self::Selected
        } else {
            Self::Unselected
        }
    }

    /// Combine child statuses into the parent's status.
    pub fn aggregate(children: impl IntoIterator<Item = NodeStatus>) -> Self {
        let mut any_selected = false;
        let mut any_unselected = false;
        for status in children {
            match status {
                Self::Selected => any_selected = true,
                Self::Unselected => any_unselected = true,
                Self::Indeterminate => return Self::Indeterminate,
            }
        }
        match (any_selected, any_unselected) {
            (true, false) => Self::Selected,
            (true, true) => Self::Indeterminate,
            (false, _) => Self::Unselected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecimenNode {
    pub id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub status: NodeStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientNode {
    pub id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub status: NodeStatus,
    pub specimens: Vec<SpecimenNode>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseNode {
    pub id: EntityId,
    pub identifiers: Vec<ExternalIdentifier>,
    pub consent: Vec<ConsentAnnotation>,
    pub status: NodeStatus,
    pub patients: Vec<PatientNode>,
}

impl CaseNode {
    /// Case-insensitive substring match over every identifier value in this subtree.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        let hit = |ids: &[ExternalIdentifier]| {
            ids.iter().any(|i| i.value.to_lowercase().contains(&needle))
        };
        hit(&self.identifiers)
            || self.patients.iter().any(|p| {
                hit(&p.identifiers) || p.specimens.iter().any(|s| hit(&s.identifiers))
            })
    }
}

/// One page of the node tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedNodeTree {
    /// Number of visible cases matching the search, across all pages.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub cases: Vec<CaseNode>,
}

impl PagedNodeTree {
    /// Cut `cases` to the requested 1-based page.
    pub fn paginate(cases: Vec<CaseNode>, page: usize, page_size: usize) -> Self {
        let total = cases.len();
        let skip = page.saturating_sub(1).saturating_mul(page_size);
        let cases = cases.into_iter().skip(skip).take(page_size).collect();
        Self {
            total,
            page,
            page_size,
            cases,
        }
    }
}

/// Build the node tree for `scope` in a single grouping pass.
///
/// Ordering follows the primary external identifier at each level, ties broken by id.
pub fn build_tree(
    scope: &Scope<'_>,
    selected: &BTreeSet<EntityId>,
    visibility: Visibility,
) -> Vec<CaseNode> {
    let mut specimens_by_patient: BTreeMap<EntityId, Vec<SpecimenNode>> = BTreeMap::new();
    for lineage in &scope.lineages {
        let is_selected = selected.contains(&lineage.specimen.id);
        if visibility == Visibility::SelectedOnly && !is_selected {
            continue;
        }
        specimens_by_patient
            .entry(lineage.patient.id)
            .or_default()
            .push(SpecimenNode {
                id: lineage.specimen.id,
                identifiers: lineage.specimen.identifiers.clone(),
                status: NodeStatus::from_selected(is_selected),
            });
    }

    let mut patients = scope.patients.clone();
    patients.sort_by(|a, b| {
        (primary_value(&a.identifiers), a.id).cmp(&(primary_value(&b.identifiers), b.id))
    });
    let mut patients_by_case: BTreeMap<EntityId, Vec<PatientNode>> = BTreeMap::new();
    for patient in patients {
        let specimens = specimens_by_patient.remove(&patient.id).unwrap_or_default();
        if visibility == Visibility::SelectedOnly && specimens.is_empty() {
            continue;
        }
        patients_by_case
            .entry(patient.case_id)
            .or_default()
            .push(PatientNode {
                id: patient.id,
                identifiers: patient.identifiers.clone(),
                status: NodeStatus::aggregate(specimens.iter().map(|s| s.status)),
                specimens,
            });
    }

    let mut cases = scope.cases.clone();
    cases.sort_by(|a, b| {
        (primary_value(&a.identifiers), a.id).cmp(&(primary_value(&b.identifiers), b.id))
    });
    cases
        .into_iter()
        .filter_map(|case| {
            let patients = patients_by_case.remove(&case.id).unwrap_or_default();
            if visibility == Visibility::SelectedOnly && patients.is_empty() {
                return None;
            }
            Some(CaseNode {
                id: case.id,
                identifiers: case.identifiers.clone(),
                consent: case.consent.clone(),
                status: NodeStatus::aggregate(patients.iter().map(|p| p.status)),
                patients,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Catalogue;
    use NodeStatus::*;

    #[test]
    fn aggregate_follows_tri_state_rules() {
        assert_eq!(NodeStatus::aggregate([Selected, Selected]), Selected);
        assert_eq!(NodeStatus::aggregate([Unselected, Unselected]), Unselected);
        assert_eq!(NodeStatus::aggregate([Selected, Unselected]), Indeterminate);
        assert_eq!(NodeStatus::aggregate([Selected, Indeterminate]), Indeterminate);
        assert_eq!(NodeStatus::aggregate(std::iter::empty()), Unselected);
    }

    const YAML: &str = r#"
datasets:
  - uri: urn:ds:a
    cases:
      - identifiers: [{ value: "CASE-2" }]
        patients:
          - identifiers: [{ value: "P-2" }]
            specimens:
              - id: 00000000000000000000000000000021
                identifiers: [{ value: "S-21" }]
      - identifiers: [{ value: "CASE-1" }]
        patients:
          - identifiers: [{ value: "P-1" }]
            specimens:
              - id: 00000000000000000000000000000011
                identifiers: [{ value: "S-11" }]
              - id: 00000000000000000000000000000012
                identifiers: [{ value: "S-12" }]
"#;

    fn tree(visibility: Visibility) -> Vec<CaseNode> {
        let catalogue = Catalogue::from_yaml(YAML).unwrap();
        let datasets = BTreeSet::from(["urn:ds:a".to_string()]);
        let selected =
            BTreeSet::from([EntityId::parse("00000000000000000000000000000011").unwrap()]);
        build_tree(&catalogue.scope(&datasets), &selected, visibility)
    }

    #[test]
    fn elevated_view_shows_every_node_with_statuses() {
        let cases = tree(Visibility::Everything);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].identifiers[0].value, "CASE-1");
        assert_eq!(cases[0].status, Indeterminate);
        assert_eq!(cases[0].patients[0].specimens.len(), 2);
        assert_eq!(cases[1].status, Unselected);
    }

    #[test]
    fn restricted_view_omits_unselected_nodes() {
        let cases = tree(Visibility::SelectedOnly);
        assert_eq!(cases.len(), 1);
        let patient = &cases[0].patients[0];
        assert_eq!(patient.specimens.len(), 1);
        assert_eq!(patient.specimens[0].identifiers[0].value, "S-11");
        assert_eq!(patient.status, Selected);
        assert_eq!(cases[0].status, Selected);
    }

    #[test]
    fn search_and_paging() {
        let cases = tree(Visibility::Everything);
        assert!(cases[1].matches_search("s-2"));
        assert!(!cases[0].matches_search("s-2"));

        let page = PagedNodeTree::paginate(cases, 2, 1);
        assert_eq!(page.total, 2);
        assert_eq!(page.cases.len(), 1);
        assert_eq!(page.cases[0].identifiers[0].value, "CASE-2");
    }
}
