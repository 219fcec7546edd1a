//! Per-request context carrying the resolved tenant.

use crate::error::RoutingError;
use crate::tenant::{parse_identifier, Tenant, TenantDirectory};

/// Built fresh for every inbound operation and passed explicitly down the call chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant: Option<Tenant>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        RequestContext { tenant: None }
    }

    pub fn for_tenant(tenant: Tenant) -> Self {
        RequestContext {
            tenant: Some(tenant),
        }
    }

    /// Resolve the raw identifier from the request boundary. Missing, non-numeric and
    /// unknown identifiers all yield an anonymous context; only an unreachable control
    /// database is an error.
    pub async fn new(directory: &TenantDirectory, identifier: Option<&str>) -> Result<Self, RoutingError> {
        let Some(id) = parse_identifier(identifier) else {
            return Ok(Self::anonymous());
        };
        match directory.resolve(id).await {
            Ok(tenant) => Ok(Self::for_tenant(tenant)),
            Err(RoutingError::TenantNotFound(id)) => {
                tracing::debug!(tenant_id = id, "unknown tenant, continuing anonymously");
                Ok(Self::anonymous())
            }
            Err(e) => Err(e),
        }
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }
}
