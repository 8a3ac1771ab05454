//! One entry point for every operation the core exposes.

use crate::activation::{ActivationService, ActivationSummary, DeactivationSummary};
use crate::audit::AuditEvent;
use crate::coalescing::CoalescingEmitter;
use crate::collaborators::Actor;
use crate::context::CoreContext;
use crate::egress::EgressAuditor;
use crate::manifest::bucket_key::ObjectRow;
use crate::manifest::gateway::GatewayManifest;
use crate::manifest::{ManifestBlob, ManifestService, MasterManifest};
use crate::node_status::PagedNodeTree;
use crate::release::{Activation, NewRelease, Release, ReleaseUpdate};
use crate::releases::ReleaseService;
use crate::resolver::SpecimenSelector;
use crate::selection::{SelectionChange, SelectionService};
use crate::{CoreError, CoreResult};
use dsr_types::ReleaseKey;
use dsr_uuid::{EntityId, Sha256Hash};
use std::sync::Arc;

pub struct ReleaseEngine {
    ctx: Arc<CoreContext>,
    releases: ReleaseService,
    selection: SelectionService,
    activation: ActivationService,
    manifests: ManifestService,
    egress: Option<EgressAuditor>,
}

impl ReleaseEngine {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self {
            releases: ReleaseService::new(Arc::clone(&ctx)),
            selection: SelectionService::new(Arc::clone(&ctx)),
            activation: ActivationService::new(Arc::clone(&ctx)),
            manifests: ManifestService::new(Arc::clone(&ctx)),
            egress: None,
            ctx,
        }
    }

    /// Enable [`ReleaseEngine::record_egress_sync`], with end callbacks scheduled by `emitter`.
    pub fn with_egress(mut self, emitter: CoalescingEmitter) -> Self {
        let window = self.ctx.cfg().egress_audit_window();
        let audit = self.ctx.shared_audit();
        self.egress = Some(EgressAuditor::new(audit, emitter, window));
        self
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn create_release(
        &self,
        actor: Option<&Actor>,
        request: NewRelease,
    ) -> CoreResult<Release> {
        self.releases.create_release(actor, request)
    }

    pub fn update_release(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        update: ReleaseUpdate,
    ) -> CoreResult<Release> {
        self.releases.update_release(caller, key, update)
    }

    pub fn release(&self, key: &ReleaseKey) -> CoreResult<Release> {
        self.releases.release(key)
    }

    pub fn release_keys_for(&self, caller: &Actor) -> CoreResult<Vec<ReleaseKey>> {
        self.releases.release_keys_for(caller)
    }

    pub fn release_keys(&self) -> CoreResult<Vec<ReleaseKey>> {
        self.releases.release_keys()
    }

    pub fn resolve_and_set_selected(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        selector: &SpecimenSelector,
    ) -> CoreResult<SelectionChange> {
        self.selection.set_selected(caller, key, selector)
    }

    pub fn resolve_and_set_unselected(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        selector: &SpecimenSelector,
    ) -> CoreResult<SelectionChange> {
        self.selection.set_unselected(caller, key, selector)
    }

    pub fn clear_selection(&self, caller: &Actor, key: &ReleaseKey) -> CoreResult<SelectionChange> {
        self.selection.clear_all(caller, key)
    }

    pub fn node_tree(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> CoreResult<PagedNodeTree> {
        self.selection.node_tree(caller, key, page, page_size, search)
    }

    pub fn activate(&self, caller: &Actor, key: &ReleaseKey) -> CoreResult<ActivationSummary> {
        self.activation.activate(caller, key)
    }

    pub fn deactivate(&self, caller: &Actor, key: &ReleaseKey) -> CoreResult<DeactivationSummary> {
        self.activation.deactivate(caller, key)
    }

    pub fn activation_history(&self, key: &ReleaseKey) -> CoreResult<Vec<Activation>> {
        self.releases.activation_history(key)
    }

    pub fn get_active_manifest(&self, key: &ReleaseKey) -> CoreResult<Option<MasterManifest>> {
        self.manifests.get_active_manifest(key)
    }

    pub fn bucket_key_manifest(
        &self,
        key: &ReleaseKey,
        protocols: Option<&[String]>,
    ) -> CoreResult<Option<Vec<ObjectRow>>> {
        self.manifests.bucket_key_manifest(key, protocols)
    }

    pub fn gateway_manifest(&self, key: &ReleaseKey) -> CoreResult<Option<GatewayManifest>> {
        self.manifests.gateway_manifest(key)
    }

    pub fn manifest_blob(&self, key: &ReleaseKey) -> CoreResult<Option<ManifestBlob>> {
        self.manifests.manifest_blob(key)
    }

    pub fn verify_activation(&self, key: &ReleaseKey) -> CoreResult<Sha256Hash> {
        self.manifests.verify_activation(key)
    }

    pub fn fetch_object_manifest(
        &self,
        caller: &Actor,
        key: &ReleaseKey,
        protocols: Option<&[String]>,
    ) -> CoreResult<Vec<ObjectRow>> {
        self.manifests.fetch_object_manifest(caller, key, protocols)
    }

    pub fn audit_events(&self, key: &ReleaseKey) -> CoreResult<Vec<AuditEvent>> {
        self.releases.audit_events(key)
    }

    /// Record an egress sync for `key`, coalesced per audit window.
    pub fn record_egress_sync(&self, key: &ReleaseKey) -> CoreResult<Option<EntityId>> {
        self.releases.release(key)?;
        match &self.egress {
            Some(egress) => egress.record_sync(key),
            None => Err(CoreError::InvalidInput(
                "egress auditing is not enabled".into(),
            )),
        }
    }
}
