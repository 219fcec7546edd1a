//! Common routes: health, readiness, version, plus registry and context introspection.

use crate::connector::Connector;
use crate::context::RequestContext;
use crate::error::AppError;
use crate::registry::HandleSnapshot;
use crate::response::{success_many, success_one_ok};
use crate::role::Role;
use crate::state::AppState;
use crate::tenant::Tenant;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'static str>,
}

#[derive(Serialize)]
struct ContextBody {
    tenant: Option<Tenant>,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready<K: Connector>(
    State(state): State<AppState<K>>,
) -> Result<Json<ReadyBody>, (axum::http::StatusCode, Json<ReadyBody>)> {
    let unavailable = || {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                database: Some("unavailable"),
            }),
        )
    };
    let control = state
        .router
        .connection(&RequestContext::anonymous(), Role::Control)
        .await
        .map_err(|_| unavailable())?;
    let connector = state.router.registry().connector();
    if connector.ping(control.conn()).await.is_err() {
        return Err(unavailable());
    }
    Ok(Json(ReadyBody {
        status: "ok",
        database: Some("ok"),
    }))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn connections<K: Connector>(
    State(state): State<AppState<K>>,
) -> (axum::http::StatusCode, Json<crate::response::SuccessMany<HandleSnapshot>>) {
    success_many(state.router.registry().snapshot())
}

async fn context(
    ctx: RequestContext,
) -> Result<(axum::http::StatusCode, Json<crate::response::SuccessOne<ContextBody>>), AppError> {
    Ok(success_one_ok(ContextBody {
        tenant: ctx.tenant().cloned(),
    }))
}

/// GET /health, /ready, /version, /info, /connections and /context.
pub fn common_routes<K: Connector>(state: AppState<K>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<K>))
        .route("/version", get(version))
        .route("/info", get(version))
        .route("/connections", get(connections::<K>))
        .route("/context", get(context))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
