//! Caller identity, as forwarded by the authenticating proxy in front of this service.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use dsr_core::{Actor, NonEmptyText};

pub const SUBJECT_HEADER: &str = "x-dsr-subject";
pub const NAME_HEADER: &str = "x-dsr-name";
pub const EMAIL_HEADER: &str = "x-dsr-email";

/// An authenticated caller. Rejects the request with 401 when the subject header is absent.
pub struct Caller(pub Actor);

fn header_text(headers: &HeaderMap, name: &str) -> Result<Option<String>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim().to_owned()))
            .map_err(|_| ApiError::BadRequest(format!("header {} is not valid text", name))),
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Option<Actor>, ApiError> {
    let Some(subject) = header_text(headers, SUBJECT_HEADER)? else {
        return Ok(None);
    };
    let subject_id = NonEmptyText::new(&subject)
        .map_err(|_| ApiError::BadRequest(format!("header {} is empty", SUBJECT_HEADER)))?;

    let mut actor = Actor::new(subject_id);
    actor.display_name = header_text(headers, NAME_HEADER)?.filter(|s| !s.is_empty());
    actor.email = header_text(headers, EMAIL_HEADER)?.filter(|s| !s.is_empty());
    Ok(Some(actor))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)?
            .map(Caller)
            .ok_or(ApiError::Unauthenticated)
    }
}
