//! Extract the agency id from the request and resolve it into a [`RequestContext`].

use crate::connector::Connector;
use crate::context::RequestContext;
use crate::error::AppError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the numeric agency id, set by the API gateway.
pub const AGENCY_ID_HEADER: &str = "X-Agency-Id";

/// Raw, unvalidated agency id from the `X-Agency-Id` header.
#[derive(Clone, Debug)]
pub struct AgencyId(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for AgencyId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(AGENCY_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(AgencyId(value))
    }
}

#[async_trait]
impl<K: Connector> FromRequestParts<AppState<K>> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<K>) -> Result<Self, Self::Rejection> {
        let AgencyId(raw) = match AgencyId::from_request_parts(parts, state).await {
            Ok(id) => id,
            Err(never) => match never {},
        };
        Ok(RequestContext::new(&state.directory, raw.as_deref()).await?)
    }
}
