//! Shared wiring for the core services.

use crate::audit::AuditLog;
use crate::collaborators::{Actor, JobStatusProvider, Notifier, ReleaseRole, RoleProvider};
use crate::config::CoreConfig;
use crate::executor::AuditedExecutor;
use crate::store::ReleaseStore;
use crate::{CoreError, CoreResult};
use dsr_types::ReleaseKey;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a service needs: configuration, storage, audit and the external collaborators.
///
/// Built once at startup and shared as `Arc<CoreContext>`.
pub struct CoreContext {
    cfg: Arc<CoreConfig>,
    executor: AuditedExecutor,
    roles: Arc<dyn RoleProvider>,
    jobs: Arc<dyn JobStatusProvider>,
    notifier: Arc<dyn Notifier>,
}

impl CoreContext {
    pub fn new(
        cfg: Arc<CoreConfig>,
        store: Arc<dyn ReleaseStore>,
        audit: Arc<dyn AuditLog>,
        roles: Arc<dyn RoleProvider>,
        jobs: Arc<dyn JobStatusProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cfg,
            executor: AuditedExecutor::new(store, audit),
            roles,
            jobs,
            notifier,
        }
    }

    pub fn cfg(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn executor(&self) -> &AuditedExecutor {
        &self.executor
    }

    pub fn store(&self) -> &dyn ReleaseStore {
        self.executor.store()
    }

    pub fn audit(&self) -> &dyn AuditLog {
        self.executor.audit()
    }

    pub fn shared_audit(&self) -> Arc<dyn AuditLog> {
        self.executor.shared_audit()
    }

    pub fn roles(&self) -> &dyn RoleProvider {
        self.roles.as_ref()
    }

    pub fn jobs(&self) -> &dyn JobStatusProvider {
        self.jobs.as_ref()
    }

    /// The caller's role on `key`; no role at all is a permission error.
    pub(crate) fn require_role(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        action: &'static str,
    ) -> CoreResult<ReleaseRole> {
        self.roles
            .role(caller, key)
            .ok_or_else(|| CoreError::PermissionDenied {
                release_key: key.clone(),
                action,
            })
    }

    pub(crate) fn require_admin(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        action: &'static str,
    ) -> CoreResult<()> {
        match self.require_role(caller, key, action)? {
            role if role.can_administer() => Ok(()),
            _ => Err(CoreError::PermissionDenied {
                release_key: key.clone(),
                action,
            }),
        }
    }

    /// Fails with [`CoreError::ReleaseNotFound`] unless `key` exists right now.
    pub(crate) fn require_release(&self, key: &ReleaseKey) -> CoreResult<()> {
        let snapshot = self.store().snapshot()?;
        match snapshot.release(key) {
            Some(_) => Ok(()),
            None => Err(CoreError::ReleaseNotFound(key.clone())),
        }
    }

    /// Send `template` to every participant of `key`. Failures are logged, never returned.
    pub(crate) fn notify_participants(
        &self,
        key: &ReleaseKey,
        template: &str,
        variables: &BTreeMap<String, String>,
    ) {
        for recipient in self.roles.participants(key) {
            if let Err(err) = self.notifier.send(template, &recipient, variables) {
                tracing::warn!(
                    release = %key,
                    recipient = recipient.subject_id.as_str(),
                    error = %err,
                    "notification failed"
                );
            }
        }
    }
}
