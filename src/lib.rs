//! Agency router: per-tenant database routing with lazily registered, idle-reclaimed connections.

pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod extractors;
pub mod reaper;
pub mod registry;
pub mod response;
pub mod role;
pub mod router;
pub mod routes;
pub mod state;
pub mod tenant;

pub use config::{ConnectionConfig, MissingTenantPolicy, Settings};
pub use connector::{Connector, DbPool, MemoryConnector, SqlxConnector};
pub use context::RequestContext;
pub use error::{AppError, ConfigError, RoutingError};
pub use extractors::agency::{AgencyId, AGENCY_ID_HEADER};
pub use reaper::{ReapReport, Reaper, ReaperConfig};
pub use registry::{ConnectionHandle, ConnectionRegistry, HandleSnapshot, HandleState};
pub use role::{Alias, Role, RoutedModel, CONTROL_ALIAS};
pub use router::Router;
pub use routes::common_routes;
pub use state::AppState;
pub use tenant::{SqlTenantSource, StaticTenantSource, Tenant, TenantDirectory, TenantSource};
