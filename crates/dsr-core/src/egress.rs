//! Audit entries for periodic egress synchronisation.
//!
//! Sync jobs poll far more often than anyone wants to read about. Each release gets at most
//! one audit event per window: it is opened by the first sync and completed when the window
//! closes.

use crate::audit::{AuditAction, AuditCategory, AuditLog, AuditOutcome};
use crate::coalescing::{CoalescingEmitter, Emission};
use crate::CoreResult;
use dsr_types::ReleaseKey;
use dsr_uuid::EntityId;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub struct EgressAuditor {
    audit: Arc<dyn AuditLog>,
    emitter: CoalescingEmitter,
    window: Duration,
}

impl EgressAuditor {
    pub fn new(audit: Arc<dyn AuditLog>, emitter: CoalescingEmitter, window: Duration) -> Self {
        Self {
            audit,
            emitter,
            window,
        }
    }

    /// Record a sync of `key`. Returns the opened event id, or `None` if coalesced.
    pub fn record_sync(&self, key: &ReleaseKey) -> CoreResult<Option<EntityId>> {
        let opened: Arc<OnceLock<EntityId>> = Arc::new(OnceLock::new());

        let start = {
            let audit = Arc::clone(&self.audit);
            let opened = Arc::clone(&opened);
            let action = AuditAction::new(AuditCategory::Execute, "egress sync", Some(key));
            move || -> CoreResult<EntityId> {
                let id = audit.start(None, &action)?;
                let _ = opened.set(id);
                Ok(id)
            }
        };

        let end = {
            let audit = Arc::clone(&self.audit);
            let key = key.clone();
            move || {
                let Some(id) = opened.get() else {
                    return;
                };
                if let Err(err) = audit.complete(id, AuditOutcome::Success, None) {
                    tracing::warn!(release = %key, error = %err, "failed to close egress audit");
                }
            }
        };

        match self
            .emitter
            .emit(&format!("egress:{}", key), self.window, start, end)
        {
            Emission::Started(result) => result.map(Some),
            Emission::Coalesced => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;

    #[tokio::test(start_paused = true)]
    async fn one_event_per_window() {
        let audit = Arc::new(MemoryAuditLog::new());
        let auditor = EgressAuditor::new(
            audit.clone(),
            CoalescingEmitter::current().unwrap(),
            Duration::from_secs(300),
        );
        let key = ReleaseKey::new("R1").unwrap();

        let first = auditor.record_sync(&key).unwrap();
        assert!(first.is_some());
        assert_eq!(auditor.record_sync(&key).unwrap(), None);
        assert!(audit.completed_events(&key).unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        let events = audit.completed_events(&key).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(Some(events[0].id), first);
        assert!(auditor.record_sync(&key).unwrap().is_some());
    }
}
