//! Creating, updating and reading releases.

use crate::audit::{AuditAction, AuditCategory, AuditEvent};
use crate::collaborators::Actor;
use crate::context::CoreContext;
use crate::release::{Activation, NewRelease, Release, ReleaseUpdate};
use crate::{CoreError, CoreResult};
use chrono::Utc;
use dsr_types::ReleaseKey;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseCreated {
    release_key: ReleaseKey,
    datasets: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseUpdated {
    field: &'static str,
}

pub struct ReleaseService {
    ctx: Arc<CoreContext>,
}

impl ReleaseService {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// Create a release.
    ///
    /// `actor` is `None` only for in-process imports. A named caller needs
    /// [`may_create_releases`](crate::collaborators::RoleProvider::may_create_releases).
    pub fn create_release(
        &self,
        actor: Option<&Actor>,
        request: NewRelease,
    ) -> CoreResult<Release> {
        let key = request.key.clone();
        let has_datasets = !request.datasets.is_empty();
        let action = AuditAction::new(AuditCategory::Create, "create release", Some(&key));

        self.ctx.executor().transaction(
            actor,
            action,
            || {
                if let Some(actor) = actor {
                    if !self.ctx.roles().may_create_releases(actor) {
                        return Err(CoreError::PermissionDenied {
                            release_key: key.clone(),
                            action: "create",
                        });
                    }
                }
                if !has_datasets {
                    return Err(CoreError::InvalidInput(
                        "a release must draw from at least one dataset".into(),
                    ));
                }
                Ok(())
            },
            |tx| {
                if tx.release(&key).is_some() {
                    return Err(CoreError::ReleaseExists(key.clone()));
                }
                if let Some(unknown) = request
                    .datasets
                    .iter()
                    .find(|uri| !tx.catalogue().has_dataset(uri))
                {
                    return Err(CoreError::UnknownDataset(unknown.clone()));
                }

                let release = Release::create(request, Utc::now());
                let created = ReleaseCreated {
                    release_key: key.clone(),
                    datasets: release.datasets().len(),
                };
                tx.put_release(release);
                Ok(created)
            },
            |_| (),
        )?;

        tracing::info!(release = %key, "release created");
        self.release(&key)
    }

    /// Change one field of a release. Not allowed while the release is activated.
    pub fn update_release(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        update: ReleaseUpdate,
    ) -> CoreResult<Release> {
        let field = update.field_name();
        let action = AuditAction::new(
            AuditCategory::Update,
            format!("update release {}", field),
            Some(key),
        );

        self.ctx.executor().transaction(
            Some(caller),
            action,
            || {
                self.ctx.require_admin(caller, key, "update")?;
                self.ctx.require_release(key)
            },
            |tx| {
                let mut release = tx
                    .release(key)
                    .cloned()
                    .ok_or_else(|| CoreError::ReleaseDisappeared(key.clone()))?;
                if release.is_activated() {
                    return Err(CoreError::EditingLocked(key.clone()));
                }
                release.apply_update(update);
                tx.put_release(release);
                Ok(ReleaseUpdated { field })
            },
            |_| (),
        )?;

        self.release(key)
    }

    pub fn release(&self, key: &ReleaseKey) -> CoreResult<Release> {
        let snapshot = self.ctx.store().snapshot()?;
        snapshot
            .release(key)
            .cloned()
            .ok_or_else(|| CoreError::ReleaseNotFound(key.clone()))
    }

    pub fn release_keys(&self) -> CoreResult<Vec<ReleaseKey>> {
        Ok(self.ctx.store().snapshot()?.release_keys())
    }

    /// Keys of the releases `caller` holds any role on.
    pub fn release_keys_for(&self, caller: &Actor) -> CoreResult<Vec<ReleaseKey>> {
        let roles = self.ctx.roles();
        Ok(self
            .release_keys()?
            .into_iter()
            .filter(|key| roles.role(caller, key).is_some())
            .collect())
    }

    /// Retired activations, oldest first.
    pub fn activation_history(&self, key: &ReleaseKey) -> CoreResult<Vec<Activation>> {
        Ok(self.release(key)?.history().to_vec())
    }

    /// Completed audit events for `key`, newest first.
    pub fn audit_events(&self, key: &ReleaseKey) -> CoreResult<Vec<AuditEvent>> {
        self.ctx.audit().completed_events(key)
    }
}
