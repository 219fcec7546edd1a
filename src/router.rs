//! Picks the alias for a model's role and the current request's tenant.

use crate::config::{ConnectionTemplates, MissingTenantPolicies, MissingTenantPolicy, Settings};
use crate::connector::Connector;
use crate::context::RequestContext;
use crate::error::RoutingError;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::role::{Alias, Role, RoutedModel};
use std::sync::Arc;

/// Single entry point through which connections are created.
pub struct Router<K: Connector> {
    registry: Arc<ConnectionRegistry<K>>,
    templates: ConnectionTemplates,
    missing_tenant: MissingTenantPolicies,
}

impl<K: Connector> Router<K> {
    pub fn new(
        registry: Arc<ConnectionRegistry<K>>,
        templates: ConnectionTemplates,
        missing_tenant: MissingTenantPolicies,
    ) -> Self {
        Router {
            registry,
            templates,
            missing_tenant,
        }
    }

    pub fn from_settings(registry: Arc<ConnectionRegistry<K>>, settings: &Settings) -> Self {
        Self::new(registry, settings.templates.clone(), settings.missing_tenant)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<K>> {
        &self.registry
    }

    /// Alias for `role` in `ctx`, without touching the registry.
    pub fn target_alias(&self, ctx: &RequestContext, role: Role) -> Result<Alias, RoutingError> {
        if !role.is_tenant_scoped() {
            return Ok(Alias::control());
        }
        match ctx.tenant() {
            Some(tenant) => Alias::for_tenant(role, tenant),
            None => match self.missing_tenant.for_role(role) {
                MissingTenantPolicy::Reject => Err(RoutingError::MissingTenantContext(role)),
                MissingTenantPolicy::FallbackToControl => {
                    tracing::warn!(role = %role, "no tenant in context, routing to control");
                    Ok(Alias::control())
                }
            },
        }
    }

    /// Registers the alias if needed and records its use.
    pub async fn resolve_alias(&self, ctx: &RequestContext, role: Role) -> Result<Alias, RoutingError> {
        self.connection(ctx, role)
            .await
            .map(|handle| handle.alias().clone())
    }

    /// Handle for `role` in `ctx`, created on first use.
    pub async fn connection(
        &self,
        ctx: &RequestContext,
        role: Role,
    ) -> Result<Arc<ConnectionHandle<K::Conn>>, RoutingError> {
        let alias = self.target_alias(ctx, role)?;
        self.registry
            .acquire(&alias, || self.templates.config_for_alias(&alias))
            .await
    }

    pub async fn resolve_model<M: RoutedModel>(&self, ctx: &RequestContext) -> Result<Alias, RoutingError> {
        self.resolve_alias(ctx, M::ROLE).await
    }

    pub async fn connection_for<M: RoutedModel>(
        &self,
        ctx: &RequestContext,
    ) -> Result<Arc<ConnectionHandle<K::Conn>>, RoutingError> {
        self.connection(ctx, M::ROLE).await
    }

    /// Opens every tenant-scoped alias of the context's tenant. Returns the failures;
    /// an anonymous context warms nothing.
    pub async fn warm(&self, ctx: &RequestContext) -> Vec<RoutingError> {
        if ctx.tenant().is_none() {
            return Vec::new();
        }
        let mut failures = Vec::new();
        for role in Role::TENANT_SCOPED {
            if let Err(e) = self.connection(ctx, role).await {
                tracing::warn!(role = %role, error = %e, "warm-up failed");
                failures.push(e);
            }
        }
        failures
    }
}
