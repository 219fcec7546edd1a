//! Shared application state for all routes.

use crate::config::Settings;
use crate::connector::{Connector, DbPool, SqlxConnector};
use crate::context::RequestContext;
use crate::error::AppError;
use crate::reaper::Reaper;
use crate::registry::ConnectionRegistry;
use crate::role::Role;
use crate::router::Router;
use crate::tenant::{SqlTenantSource, TenantDirectory};
use std::sync::Arc;

pub struct AppState<K: Connector = SqlxConnector> {
    pub router: Arc<Router<K>>,
    pub directory: TenantDirectory,
}

impl<K: Connector> Clone for AppState<K> {
    fn clone(&self) -> Self {
        AppState {
            router: Arc::clone(&self.router),
            directory: self.directory.clone(),
        }
    }
}

impl<K: Connector> AppState<K> {
    pub fn new(router: Arc<Router<K>>, directory: TenantDirectory) -> Self {
        AppState { router, directory }
    }

    /// Reaper over this state's registry.
    pub fn reaper(&self, settings: &Settings) -> Reaper<K> {
        Reaper::new(Arc::clone(self.router.registry()), settings.reaper.clone())
    }
}

impl AppState<SqlxConnector> {
    /// Open the control database and build the routing stack on top of it.
    pub async fn connect(settings: &Settings) -> Result<Self, AppError> {
        let registry = Arc::new(ConnectionRegistry::new(SqlxConnector, settings.idle_after));
        let router = Arc::new(Router::from_settings(registry, settings));
        let control = router
            .connection(&RequestContext::anonymous(), Role::Control)
            .await?;
        let pool: DbPool = control.conn().clone();
        let directory = TenantDirectory::new(Arc::new(SqlTenantSource::new(
            pool,
            settings.tenant_table.clone(),
        )));
        Ok(AppState::new(router, directory))
    }
}
