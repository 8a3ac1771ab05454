//! Selection edits and the node tree view.
//!
//! Every edit resolves its selector inside the transaction that applies it, and is rejected
//! whole if resolution reports any fault. Edits are set union and difference, so repeating
//! one or reordering several gives the same result.

use crate::audit::{AuditAction, AuditCategory};
use crate::collaborators::Actor;
use crate::context::CoreContext;
use crate::node_status::{build_tree, PagedNodeTree};
use crate::release::Release;
use crate::resolver::{resolve, SpecimenSelector};
use crate::store::StoreTransaction;
use crate::{CoreError, CoreResult};
use dsr_types::ReleaseKey;
use dsr_uuid::EntityId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of a selection edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionChange {
    /// Specimens the selector resolved to.
    pub requested: usize,
    /// Specimens whose membership actually changed.
    pub changed: usize,
    /// Size of the selection after the edit.
    pub selected_total: usize,
}

#[derive(Clone, Copy)]
enum Edit {
    Select,
    Unselect,
}

pub struct SelectionService {
    ctx: Arc<CoreContext>,
}

impl SelectionService {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    pub fn set_selected(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        selector: &SpecimenSelector,
    ) -> CoreResult<SelectionChange> {
        self.edit(caller, key, selector, Edit::Select)
    }

    pub fn set_unselected(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        selector: &SpecimenSelector,
    ) -> CoreResult<SelectionChange> {
        self.edit(caller, key, selector, Edit::Unselect)
    }

    pub fn clear_all(&self, caller: &Actor, key: &ReleaseKey) -> CoreResult<SelectionChange> {
        let action = AuditAction::new(AuditCategory::Update, "clear selection", Some(key));
        self.ctx.executor().transaction(
            Some(caller),
            action,
            || self.precheck(caller, key, "clear the selection"),
            |tx| {
                let mut release = editable_release(tx, key)?;
                let requested = release.selected().len();
                let changed = release.clear_selection();
                tx.put_release(release);
                Ok(SelectionChange {
                    requested,
                    changed,
                    selected_total: 0,
                })
            },
            |change| change,
        )
    }

    fn edit(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        selector: &SpecimenSelector,
        edit: Edit,
    ) -> CoreResult<SelectionChange> {
        let (verb, description) = match edit {
            Edit::Select => ("select specimens", "set specimens selected"),
            Edit::Unselect => ("unselect specimens", "set specimens unselected"),
        };
        let action = AuditAction::new(AuditCategory::Update, description, Some(key));

        self.ctx.executor().transaction(
            Some(caller),
            action,
            || {
                self.precheck(caller, key, verb)?;
                if selector.is_empty_target() {
                    return Err(CoreError::InvalidInput(
                        "selector names no identifiers".into(),
                    ));
                }
                Ok(())
            },
            |tx| {
                let mut release = editable_release(tx, key)?;
                let specimens: BTreeSet<EntityId> =
                    resolve(tx.catalogue(), &release, selector).into_specimens()?;
                let changed = match edit {
                    Edit::Select => release.select(&specimens),
                    Edit::Unselect => release.unselect(&specimens),
                };
                let change = SelectionChange {
                    requested: specimens.len(),
                    changed,
                    selected_total: release.selected().len(),
                };
                tx.put_release(release);
                Ok(change)
            },
            |change| {
                tracing::info!(
                    release = %key,
                    requested = change.requested,
                    changed = change.changed,
                    total = change.selected_total,
                    "{}",
                    verb
                );
                change
            },
        )
    }

    fn precheck(&self, caller: &Actor, key: &ReleaseKey, action: &'static str) -> CoreResult<()> {
        self.ctx.require_admin(caller, key, action)?;
        self.ctx.require_release(key)
    }

    /// One page of the case tree as the caller is allowed to see it.
    ///
    /// `page` is 1-based; a `page_size` of zero uses the configured default.
    pub fn node_tree(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> CoreResult<PagedNodeTree> {
        if page == 0 {
            return Err(CoreError::InvalidInput("page numbers start at 1".into()));
        }
        let role = self.ctx.require_role(caller, key, "view the node tree")?;
        let page_size = self.ctx.cfg().effective_page_size(page_size);

        let snapshot = self.ctx.store().snapshot()?;
        let release = snapshot
            .release(key)
            .ok_or_else(|| CoreError::ReleaseNotFound(key.clone()))?;
        let scope = snapshot.catalogue().scope(release.datasets());

        let mut cases = build_tree(&scope, release.selected(), role.visibility());
        if let Some(needle) = search.map(str::trim).filter(|s| !s.is_empty()) {
            cases.retain(|case| case.matches_search(needle));
        }
        Ok(PagedNodeTree::paginate(cases, page, page_size))
    }
}

/// Re-read the release inside the transaction and make sure its selection may change.
fn editable_release(tx: &dyn StoreTransaction, key: &ReleaseKey) -> CoreResult<Release> {
    let release = tx.release(key).ok_or_else(|| {
        tracing::warn!(release = %key, "release disappeared during selection edit");
        CoreError::ReleaseDisappeared(key.clone())
    })?;
    if release.is_activated() {
        return Err(CoreError::EditingLocked(key.clone()));
    }
    Ok(release.clone())
}
