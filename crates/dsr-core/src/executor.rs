//! The audited transaction envelope every mutation and sensitive read passes through.
//!
//! An invocation runs in this order:
//!
//! 1. open an audit event (in progress)
//! 2. `precheck`, outside any transaction
//! 3. `body`, inside a storage transaction
//! 4. commit, then complete the event with the body's result
//! 5. `postprocess`, outside the transaction
//!
//! A precheck failure returns straight away and leaves the event in progress, so it never
//! shows up in audit queries. A body or commit failure completes the event as a failure with
//! the error message as detail and is returned unchanged. The transaction is dropped without
//! commit, which rolls it back.

use crate::audit::{AuditAction, AuditLog, AuditOutcome};
use crate::collaborators::Actor;
use crate::store::{ReleaseStore, StoreRead, StoreTransaction};
use crate::CoreResult;
use dsr_uuid::EntityId;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuditedExecutor {
    store: Arc<dyn ReleaseStore>,
    audit: Arc<dyn AuditLog>,
}

impl AuditedExecutor {
    pub fn new(store: Arc<dyn ReleaseStore>, audit: Arc<dyn AuditLog>) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &dyn ReleaseStore {
        self.store.as_ref()
    }

    pub fn audit(&self) -> &dyn AuditLog {
        self.audit.as_ref()
    }

    pub fn shared_audit(&self) -> Arc<dyn AuditLog> {
        Arc::clone(&self.audit)
    }

    /// Run `body` in a transaction inside an audit envelope.
    ///
    /// `body` must only touch storage through the transaction it is given: the store is
    /// locked for as long as the transaction is open.
    pub fn transaction<T, R>(
        &self,
        actor: Option<&Actor>,
        action: AuditAction,
        precheck: impl FnOnce() -> CoreResult<()>,
        body: impl FnOnce(&mut dyn StoreTransaction) -> CoreResult<T>,
        postprocess: impl FnOnce(T) -> R,
    ) -> CoreResult<R>
    where
        T: Serialize,
    {
        let event = self.audit.start(actor, &action)?;
        precheck()?;

        let outcome = self.store.begin().and_then(|mut tx| {
            let value = body(tx.as_mut())?;
            tx.commit()?;
            Ok(value)
        });

        let value = self.finish(&event, &action, outcome)?;
        Ok(postprocess(value))
    }

    /// The read-only variant: same envelope, body receives a snapshot.
    pub fn read<T, R>(
        &self,
        actor: Option<&Actor>,
        action: AuditAction,
        precheck: impl FnOnce() -> CoreResult<()>,
        body: impl FnOnce(&dyn StoreRead) -> CoreResult<T>,
        postprocess: impl FnOnce(T) -> R,
    ) -> CoreResult<R>
    where
        T: Serialize,
    {
        let event = self.audit.start(actor, &action)?;
        precheck()?;

        let outcome = self
            .store
            .snapshot()
            .and_then(|snapshot| body(snapshot.as_ref()));

        let value = self.finish(&event, &action, outcome)?;
        Ok(postprocess(value))
    }

    fn finish<T: Serialize>(
        &self,
        event: &EntityId,
        action: &AuditAction,
        outcome: CoreResult<T>,
    ) -> CoreResult<T> {
        match outcome {
            Ok(value) => {
                let detail = serde_json::to_value(&value).ok();
                self.audit.complete(event, AuditOutcome::Success, detail)?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(
                    category = %action.category,
                    description = %action.description,
                    code = err.code(),
                    error = %err,
                    "audited operation failed"
                );
                let detail = serde_json::json!({ "error": err.to_string() });
                if let Err(audit_err) =
                    self.audit
                        .complete(event, AuditOutcome::Failure, Some(detail))
                {
                    tracing::error!(error = %audit_err, "failed to complete audit event");
                }
                Err(err)
            }
        }
    }
}
