//! Tenant directory: resolves agency ids against the control database.

use crate::connector::DbPool;
use crate::error::RoutingError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// An agency whose data lives in its own databases. Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
}

/// Where tenant rows come from.
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn find(&self, id: i64) -> Result<Option<Tenant>, sqlx::Error>;
}

/// Reads `(id, name)` rows from a table in the control database.
pub struct SqlTenantSource {
    pool: DbPool,
    table: String,
}

impl SqlTenantSource {
    /// `table` must already be a validated identifier.
    pub fn new(pool: DbPool, table: impl Into<String>) -> Self {
        SqlTenantSource {
            pool,
            table: table.into(),
        }
    }
}

#[async_trait]
impl TenantSource for SqlTenantSource {
    async fn find(&self, id: i64) -> Result<Option<Tenant>, sqlx::Error> {
        let row: Option<(i64, String)> = match &self.pool {
            DbPool::MySql(pool) => {
                let sql = format!("SELECT CAST(id AS SIGNED), name FROM {} WHERE id = ?", self.table);
                sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?
            }
            DbPool::Postgres(pool) => {
                let sql = format!("SELECT id::BIGINT, name FROM {} WHERE id = $1", self.table);
                sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?
            }
        };
        Ok(row.map(|(id, name)| Tenant { id, name }))
    }
}

/// Fixed in-memory tenant set.
#[derive(Clone, Default)]
pub struct StaticTenantSource {
    by_id: HashMap<i64, Tenant>,
}

impl StaticTenantSource {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        StaticTenantSource {
            by_id: tenants.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}

#[async_trait]
impl TenantSource for StaticTenantSource {
    async fn find(&self, id: i64) -> Result<Option<Tenant>, sqlx::Error> {
        Ok(self.by_id.get(&id).cloned())
    }
}

/// Resolves tenant ids. One lookup per call, no caching across requests.
#[derive(Clone)]
pub struct TenantDirectory {
    source: Arc<dyn TenantSource>,
}

impl TenantDirectory {
    pub fn new(source: Arc<dyn TenantSource>) -> Self {
        TenantDirectory { source }
    }

    /// Unknown id is `TenantNotFound`; a failing control database is `ControlUnavailable`.
    pub async fn resolve(&self, id: i64) -> Result<Tenant, RoutingError> {
        let found = self
            .source
            .find(id)
            .await
            .map_err(RoutingError::ControlUnavailable)?;
        match found {
            Some(tenant) => {
                tracing::debug!(tenant_id = id, tenant = %tenant.name, "tenant resolved");
                Ok(tenant)
            }
            None => Err(RoutingError::TenantNotFound(id)),
        }
    }
}

/// Numeric tenant id from a raw header value. Missing or non-numeric means anonymous.
pub fn parse_identifier(raw: Option<&str>) -> Option<i64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}
