//! Settings and connection templates.

mod connection;
mod settings;

pub use connection::{ConnectionConfig, ConnectionTemplate, ConnectionTemplates, Engine};
pub use settings::{MissingTenantPolicies, MissingTenantPolicy, Settings};
