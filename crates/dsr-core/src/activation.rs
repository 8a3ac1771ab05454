//! Activation and deactivation of releases.
//!
//! ```text
//!   Deactivated ──activate──▶ Activated
//!        ▲                        │
//!        └───────deactivate───────┘
//! ```
//!
//! Both transitions re-read the release inside their transaction, so two callers racing past
//! the precheck end with one success and one named state error. Participants are notified
//! after commit; a failed notification never affects the outcome.

use crate::audit::{AuditAction, AuditCategory};
use crate::collaborators::Actor;
use crate::constants::{TEMPLATE_RELEASE_ACTIVATED, TEMPLATE_RELEASE_DEACTIVATED};
use crate::context::CoreContext;
use crate::manifest::compiler;
use crate::release::{Activation, Release};
use crate::store::StoreTransaction;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use dsr_types::ReleaseKey;
use dsr_uuid::{Sha256Hash, TimestampId, TimestampIdGenerator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSummary {
    pub activation_id: TimestampId,
    pub manifest_tag: Sha256Hash,
    pub specimen_count: usize,
    pub file_count: usize,
    pub activated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivationSummary {
    pub activation_id: TimestampId,
    pub history_length: usize,
}

pub struct ActivationService {
    ctx: Arc<CoreContext>,
}

impl ActivationService {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// Freeze the current selection into a new activation.
    pub fn activate(&self, caller: &Actor, key: &ReleaseKey) -> CoreResult<ActivationSummary> {
        let action = AuditAction::new(AuditCategory::Execute, "activate release", Some(key));

        let summary = self.ctx.executor().transaction(
            Some(caller),
            action,
            || {
                self.ctx.require_admin(caller, key, "activate")?;
                self.ctx.require_release(key)
            },
            |tx| {
                let mut release = current_release(tx, key)?;
                if release.is_activated() {
                    return Err(CoreError::AlreadyActivated(key.clone()));
                }

                let manifest = compiler::compile(&*tx, key)?;
                if manifest.is_empty() {
                    return Err(CoreError::EmptyManifest(key.clone()));
                }

                let previous = release.history().last().map(Activation::id);
                let id = TimestampIdGenerator::generate(previous);
                let activation = Activation::seal(id, caller.clone(), &manifest)?;
                let summary = ActivationSummary {
                    activation_id: activation.id().clone(),
                    manifest_tag: activation.manifest_tag().clone(),
                    specimen_count: manifest.specimens.len(),
                    file_count: manifest.file_count(),
                    activated_at: activation.activated_at(),
                };

                release.set_activation(activation);
                tx.put_release(release);
                Ok(summary)
            },
            |summary| summary,
        )?;

        tracing::info!(
            release = %key,
            activation = %summary.activation_id,
            specimens = summary.specimen_count,
            files = summary.file_count,
            "release activated"
        );
        self.ctx.notify_participants(
            key,
            TEMPLATE_RELEASE_ACTIVATED,
            &notification_variables(key, &summary.activation_id),
        );
        Ok(summary)
    }

    /// Retire the current activation into the release's history.
    pub fn deactivate(&self, caller: &Actor, key: &ReleaseKey) -> CoreResult<DeactivationSummary> {
        let action = AuditAction::new(AuditCategory::Execute, "deactivate release", Some(key));

        let summary = self.ctx.executor().transaction(
            Some(caller),
            action,
            || {
                self.ctx.require_admin(caller, key, "deactivate")?;
                self.ctx.require_release(key)?;
                if self.ctx.jobs().has_running_job(key) {
                    return Err(CoreError::JobInProgress(key.clone()));
                }
                Ok(())
            },
            |tx| {
                let mut release = current_release(tx, key)?;
                let activation_id = release
                    .retire_activation()
                    .map(|retired| retired.id().clone())
                    .ok_or_else(|| CoreError::NotActivated(key.clone()))?;
                let summary = DeactivationSummary {
                    activation_id,
                    history_length: release.history().len(),
                };
                tx.put_release(release);
                Ok(summary)
            },
            |summary| summary,
        )?;

        tracing::info!(
            release = %key,
            activation = %summary.activation_id,
            history = summary.history_length,
            "release deactivated"
        );
        self.ctx.notify_participants(
            key,
            TEMPLATE_RELEASE_DEACTIVATED,
            &notification_variables(key, &summary.activation_id),
        );
        Ok(summary)
    }
}

fn current_release(tx: &dyn StoreTransaction, key: &ReleaseKey) -> CoreResult<Release> {
    tx.release(key).cloned().ok_or_else(|| {
        tracing::warn!(release = %key, "release disappeared during activation change");
        CoreError::ReleaseDisappeared(key.clone())
    })
}

fn notification_variables(key: &ReleaseKey, activation: &TimestampId) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("releaseKey".to_string(), key.to_string()),
        ("activationId".to_string(), activation.to_string()),
    ])
}
