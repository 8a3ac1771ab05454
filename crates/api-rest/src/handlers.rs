use crate::caller::Caller;
use crate::error::{ApiError, ErrorBody};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use dsr_core::audit::AuditEvent;
use dsr_core::collaborators::Visibility;
use dsr_core::manifest::bucket_key::{render_tsv, ObjectRow};
use dsr_core::manifest::gateway::GatewayManifest;
use dsr_core::release::Activation;
use dsr_core::{
    ActivationSummary, Actor, CoreError, DeactivationSummary, NewRelease, PagedNodeTree,
    ReleaseFlags, ReleaseKey, ReleaseRole, ReleaseUpdate, SelectionChange, SpecimenSelector,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

pub const MANIFEST_TAG_HEADER: &str = "x-dsr-manifest-tag";
pub const ACTIVATION_ID_HEADER: &str = "x-dsr-activation-id";

const TSV_CONTENT_TYPE: &str = "text/tab-separated-values; charset=utf-8";

#[derive(Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// What a participant sees of a release. The frozen manifest is served separately.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseView {
    pub key: ReleaseKey,
    pub description: String,
    pub datasets: BTreeSet<String>,
    pub flags: ReleaseFlags,
    pub activated: bool,
    pub activation_id: Option<String>,
    pub selected_count: usize,
    pub history_length: usize,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRes {
    pub manifest_tag: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressSyncRes {
    /// The audit event opened by this call, or absent when it was coalesced.
    pub event_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeQuery {
    #[serde(default = "first_page")]
    page: usize,
    #[serde(default)]
    page_size: usize,
    q: Option<String>,
}

fn first_page() -> usize {
    1
}

#[derive(Deserialize)]
pub struct ObjectQuery {
    /// Comma-separated protocols, `*` for all.
    protocols: Option<String>,
    #[serde(default)]
    format: ObjectFormat,
}

#[derive(Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFormat {
    #[default]
    Tsv,
    Json,
}

impl ObjectQuery {
    fn protocols(&self) -> Option<Vec<String>> {
        self.protocols.as_ref().map(|raw| {
            raw.split(',')
                .map(|p| p.trim().to_owned())
                .filter(|p| !p.is_empty())
                .collect()
        })
    }
}

fn object_response(rows: Vec<ObjectRow>, format: ObjectFormat) -> Response {
    match format {
        ObjectFormat::Json => Json(rows).into_response(),
        ObjectFormat::Tsv => {
            ([(header::CONTENT_TYPE, TSV_CONTENT_TYPE)], render_tsv(&rows)).into_response()
        }
    }
}

fn require_participant(
    state: &AppState,
    caller: &Actor,
    key: &ReleaseKey,
    action: &'static str,
) -> Result<ReleaseRole, ApiError> {
    state
        .engine
        .context()
        .roles()
        .role(caller, key)
        .ok_or_else(|| {
            ApiError::Core(CoreError::PermissionDenied {
                release_key: key.clone(),
                action,
            })
        })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Liveness check for monitoring and load balancers.
#[axum::debug_handler]
pub async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "DSR REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/releases",
    responses(
        (status = 200, description = "Keys of the releases the caller holds a role on"),
        (status = 401, description = "No caller", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn list_releases(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<ReleaseKey>>, ApiError> {
    Ok(Json(state.engine.release_keys_for(&caller)?))
}

#[utoipa::path(
    post,
    path = "/releases",
    responses(
        (status = 201, description = "Release created"),
        (status = 400, description = "No datasets given", body = ErrorBody),
        (status = 401, description = "No caller", body = ErrorBody),
        (status = 403, description = "Caller may not create releases", body = ErrorBody),
        (status = 409, description = "Release key already in use", body = ErrorBody),
        (status = 422, description = "Unknown dataset", body = ErrorBody)
    )
)]
/// Create a release. Only callers the role provider lists as creators may do this.
#[axum::debug_handler]
pub async fn create_release(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<NewRelease>,
) -> Result<(StatusCode, Json<ReleaseView>), ApiError> {
    let release = state.engine.create_release(Some(&caller), request)?;
    Ok((StatusCode::CREATED, Json(ReleaseView::from(&release))))
}

#[utoipa::path(
    get,
    path = "/releases/{key}",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Release summary"),
        (status = 403, description = "Caller has no role on the release", body = ErrorBody),
        (status = 404, description = "No such release", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn get_release(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<ReleaseView>, ApiError> {
    require_participant(&state, &caller, &key, "read")?;
    let release = state.engine.release(&key)?;
    Ok(Json(ReleaseView::from(&release)))
}

#[utoipa::path(
    patch,
    path = "/releases/{key}",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Release updated"),
        (status = 403, description = "Caller is not an administrator", body = ErrorBody),
        (status = 409, description = "Release is activated", body = ErrorBody)
    )
)]
/// Change one field. The body is `{"field": "allowGs", "value": false}`.
#[axum::debug_handler]
pub async fn update_release(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
    Json(update): Json<ReleaseUpdate>,
) -> Result<Json<ReleaseView>, ApiError> {
    let release = state.engine.update_release(&caller, &key, update)?;
    Ok(Json(ReleaseView::from(&release)))
}

#[utoipa::path(
    post,
    path = "/releases/{key}/selection/select",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Specimens selected"),
        (status = 409, description = "Release is activated", body = ErrorBody),
        (status = 422, description = "Selection faults; nothing was changed", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn select(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
    Json(selector): Json<SpecimenSelector>,
) -> Result<Json<SelectionChange>, ApiError> {
    let change = state
        .engine
        .resolve_and_set_selected(&caller, &key, &selector)?;
    Ok(Json(change))
}

#[utoipa::path(
    post,
    path = "/releases/{key}/selection/unselect",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Specimens unselected"),
        (status = 409, description = "Release is activated", body = ErrorBody),
        (status = 422, description = "Selection faults; nothing was changed", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn unselect(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
    Json(selector): Json<SpecimenSelector>,
) -> Result<Json<SelectionChange>, ApiError> {
    let change = state
        .engine
        .resolve_and_set_unselected(&caller, &key, &selector)?;
    Ok(Json(change))
}

#[utoipa::path(
    delete,
    path = "/releases/{key}/selection",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Selection cleared"),
        (status = 409, description = "Release is activated", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn clear_selection(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<SelectionChange>, ApiError> {
    Ok(Json(state.engine.clear_selection(&caller, &key)?))
}

#[utoipa::path(
    get,
    path = "/releases/{key}/tree",
    params(
        ("key" = String, Path, description = "Release key"),
        ("page" = Option<usize>, Query, description = "1-based page number"),
        ("pageSize" = Option<usize>, Query, description = "Cases per page, 0 for the default"),
        ("q" = Option<String>, Query, description = "Identifier substring search")
    ),
    responses(
        (status = 200, description = "One page of the case tree"),
        (status = 403, description = "Caller has no role on the release", body = ErrorBody)
    )
)]
/// The case tree as the caller is allowed to see it.
#[axum::debug_handler]
pub async fn node_tree(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<PagedNodeTree>, ApiError> {
    let tree = state.engine.node_tree(
        &caller,
        &key,
        query.page,
        query.page_size,
        query.q.as_deref(),
    )?;
    Ok(Json(tree))
}

#[utoipa::path(
    post,
    path = "/releases/{key}/activation",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Release activated"),
        (status = 409, description = "Already activated, or nothing selected", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn activate(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<ActivationSummary>, ApiError> {
    Ok(Json(state.engine.activate(&caller, &key)?))
}

#[utoipa::path(
    delete,
    path = "/releases/{key}/activation",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Release deactivated"),
        (status = 409, description = "Not activated, or a job is running", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn deactivate(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<DeactivationSummary>, ApiError> {
    Ok(Json(state.engine.deactivate(&caller, &key)?))
}

/// A retired activation without its manifest body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecord {
    pub id: String,
    pub activated_by: Actor,
    pub activated_at: String,
    pub manifest_tag: String,
}

impl From<&Activation> for ActivationRecord {
    fn from(activation: &Activation) -> Self {
        Self {
            id: activation.id().to_string(),
            activated_by: activation.activated_by().clone(),
            activated_at: activation.activated_at().to_rfc3339(),
            manifest_tag: activation.manifest_tag().to_string(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/releases/{key}/activations",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Retired activations, oldest first")
    )
)]
#[axum::debug_handler]
pub async fn activation_history(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<Vec<ActivationRecord>>, ApiError> {
    require_participant(&state, &caller, &key, "read activation history")?;
    let history = state.engine.activation_history(&key)?;
    Ok(Json(history.iter().map(ActivationRecord::from).collect()))
}

#[utoipa::path(
    get,
    path = "/releases/{key}/manifest",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "The stored manifest bytes, tagged in the response headers"),
        (status = 404, description = "Release is not activated", body = ErrorBody)
    )
)]
/// The exact stored bytes of the active master manifest.
#[axum::debug_handler]
pub async fn master_manifest(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Response, ApiError> {
    require_participant(&state, &caller, &key, "read the manifest")?;
    let blob = state
        .engine
        .manifest_blob(&key)?
        .ok_or(ApiError::NotAvailable("active manifest"))?;

    let headers = [
        (header::CONTENT_TYPE, "application/json".to_owned()),
        (
            HeaderName::from_static(MANIFEST_TAG_HEADER),
            blob.manifest_tag.to_string(),
        ),
        (
            HeaderName::from_static(ACTIVATION_ID_HEADER),
            blob.activation_id.to_string(),
        ),
    ];
    Ok((headers, blob.blob).into_response())
}

#[utoipa::path(
    get,
    path = "/releases/{key}/manifest/bucket-key",
    params(
        ("key" = String, Path, description = "Release key"),
        ("protocols" = Option<String>, Query, description = "Comma-separated protocols, * for all"),
        ("format" = Option<String>, Query, description = "tsv (default) or json")
    ),
    responses(
        (status = 200, description = "One row per object"),
        (status = 404, description = "Release is not activated", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn bucket_key_manifest(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, ApiError> {
    require_participant(&state, &caller, &key, "read the manifest")?;
    let protocols = query.protocols();
    let rows = state
        .engine
        .bucket_key_manifest(&key, protocols.as_deref())?
        .ok_or(ApiError::NotAvailable("active manifest"))?;
    Ok(object_response(rows, query.format))
}

#[utoipa::path(
    get,
    path = "/releases/{key}/manifest/gateway",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Reads and variants grouped for a genomic data gateway"),
        (status = 404, description = "Release is not activated", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn gateway_manifest(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<GatewayManifest>, ApiError> {
    require_participant(&state, &caller, &key, "read the manifest")?;
    let manifest = state
        .engine
        .gateway_manifest(&key)?
        .ok_or(ApiError::NotAvailable("active manifest"))?;
    Ok(Json(manifest))
}

#[utoipa::path(
    get,
    path = "/releases/{key}/manifest/verify",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Stored manifest matches its tag", body = VerifyRes),
        (status = 409, description = "Release is not activated", body = ErrorBody),
        (status = 500, description = "Integrity mismatch", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn verify_manifest(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<VerifyRes>, ApiError> {
    require_participant(&state, &caller, &key, "verify the manifest")?;
    let tag = state.engine.verify_activation(&key)?;
    Ok(Json(VerifyRes {
        manifest_tag: tag.to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/releases/{key}/objects",
    params(
        ("key" = String, Path, description = "Release key"),
        ("protocols" = Option<String>, Query, description = "Comma-separated protocols, * for all"),
        ("format" = Option<String>, Query, description = "tsv (default) or json")
    ),
    responses(
        (status = 200, description = "Audited object manifest download"),
        (status = 409, description = "Release is not activated", body = ErrorBody)
    )
)]
/// Audited object manifest download for any participant.
#[axum::debug_handler]
pub async fn fetch_objects(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, ApiError> {
    let protocols = query.protocols();
    let rows = state
        .engine
        .fetch_object_manifest(&caller, &key, protocols.as_deref())?;
    Ok(object_response(rows, query.format))
}

#[utoipa::path(
    get,
    path = "/releases/{key}/audit",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Completed audit events, newest first"),
        (status = 403, description = "Caller may not read the audit log", body = ErrorBody)
    )
)]
#[axum::debug_handler]
pub async fn audit_events(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let role = require_participant(&state, &caller, &key, "read the audit log")?;
    if role.visibility() != Visibility::Everything {
        return Err(ApiError::Core(CoreError::PermissionDenied {
            release_key: key,
            action: "read the audit log",
        }));
    }
    Ok(Json(state.engine.audit_events(&key)?))
}

#[utoipa::path(
    post,
    path = "/releases/{key}/egress-sync",
    params(("key" = String, Path, description = "Release key")),
    responses(
        (status = 200, description = "Sync recorded or coalesced", body = EgressSyncRes)
    )
)]
/// Called by sync jobs; bursts within the audit window share one audit entry.
#[axum::debug_handler]
pub async fn egress_sync(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(key): Path<ReleaseKey>,
) -> Result<Json<EgressSyncRes>, ApiError> {
    require_participant(&state, &caller, &key, "record an egress sync")?;
    let event = state.engine.record_egress_sync(&key)?;
    Ok(Json(EgressSyncRes {
        event_id: event.map(|id| id.to_string()),
    }))
}

impl From<&dsr_core::Release> for ReleaseView {
    fn from(release: &dsr_core::Release) -> Self {
        Self {
            key: release.key().clone(),
            description: release.description().to_string(),
            datasets: release.datasets().clone(),
            flags: *release.flags(),
            activated: release.is_activated(),
            activation_id: release.activation().map(|a| a.id().to_string()),
            selected_count: release.selected().len(),
            history_length: release.history().len(),
        }
    }
}
