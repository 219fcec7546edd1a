//! Typed errors and HTTP mapping.

use crate::role::{Alias, Role};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Failures of tenant resolution, routing and connection registration.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("tenant not found: {0}")]
    TenantNotFound(i64),
    #[error("role '{0}' requires a tenant but the request carries none")]
    MissingTenantContext(Role),
    #[error("connection unavailable for alias '{alias}': {source}")]
    ConnectionUnavailable {
        alias: Alias,
        /// Shared by every caller that waited on the failed open.
        #[source]
        source: Arc<sqlx::Error>,
    },
    /// An operation reached an alias that was never routed. Programming error.
    #[error("alias '{0}' is not registered")]
    UnregisteredAlias(Alias),
    #[error("tenant name '{0}' cannot be used as a database name")]
    InvalidTenantName(String),
    #[error("control database unavailable: {0}")]
    ControlUnavailable(#[source] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Routing(e) => match e {
                RoutingError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "tenant_not_found"),
                RoutingError::MissingTenantContext(_) => (StatusCode::BAD_REQUEST, "missing_tenant"),
                RoutingError::ConnectionUnavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "connection_unavailable")
                }
                RoutingError::InvalidTenantName(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_tenant_name")
                }
                RoutingError::UnregisteredAlias(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "unregistered_alias")
                }
                RoutingError::ControlUnavailable(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "control_unavailable")
                }
            },
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
