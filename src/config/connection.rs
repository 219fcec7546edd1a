//! Connection templates per role and the immutable config derived for each alias.

use crate::role::{Alias, Role};
use std::fmt;
use std::time::Duration;

/// Database engine behind every alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    MySql,
    Postgres,
}

impl std::str::FromStr for Engine {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Engine::MySql),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            _ => Err("expected mysql or postgres"),
        }
    }
}

/// Everything needed to open one alias. Never mutated once the alias is registered.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub engine: Engine,
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub time_zone: String,
    /// Ping a pooled connection before handing it out.
    pub health_checks: bool,
    /// Max lifetime of a pooled connection. `None` keeps connections until closed.
    pub max_age: Option<Duration>,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("time_zone", &self.time_zone)
            .field("health_checks", &self.health_checks)
            .field("max_age", &self.max_age)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Shared connection parameters with the host chosen per role.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTemplate {
    pub engine: Engine,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub time_zone: String,
    pub health_checks: bool,
    pub max_age: Option<Duration>,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl fmt::Debug for ConnectionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTemplate")
            .field("engine", &self.engine)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl ConnectionTemplate {
    /// Config for a database named `database` on this template's host.
    pub fn config_for(&self, database: &str) -> ConnectionConfig {
        ConnectionConfig {
            engine: self.engine,
            database: database.to_string(),
            user: self.user.clone(),
            password: self.password.clone(),
            host: self.host.clone(),
            port: self.port,
            time_zone: self.time_zone.clone(),
            health_checks: self.health_checks,
            max_age: self.max_age,
            max_connections: self.max_connections,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// One template per role, composed once at startup.
#[derive(Clone, Debug)]
pub struct ConnectionTemplates {
    pub control: ConnectionTemplate,
    pub control_database: String,
    pub primary: ConnectionTemplate,
    pub secondary: ConnectionTemplate,
}

impl ConnectionTemplates {
    pub fn template(&self, role: Role) -> &ConnectionTemplate {
        match role {
            Role::Control => &self.control,
            Role::Primary => &self.primary,
            Role::Secondary => &self.secondary,
        }
    }

    /// The alias doubles as the database name for tenant-scoped roles.
    pub fn config_for_alias(&self, alias: &Alias) -> ConnectionConfig {
        match alias.role() {
            Role::Control => self.control.config_for(&self.control_database),
            role => self.template(role).config_for(alias.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::tenant::Tenant;

    #[test]
    fn roles_resolve_to_distinct_hosts() {
        let settings = Settings::from_lookup(|key| match key {
            "DB_HOST_PRIMARY" => Some("ops-db".into()),
            "DB_HOST_SECONDARY" => Some("clients-db".into()),
            _ => None,
        })
        .unwrap();
        let acme = Tenant { id: 7, name: "Acme".into() };
        let primary = Alias::for_tenant(Role::Primary, &acme).unwrap();
        let secondary = Alias::for_tenant(Role::Secondary, &acme).unwrap();

        let p = settings.templates.config_for_alias(&primary);
        let s = settings.templates.config_for_alias(&secondary);
        assert_eq!(p.host, "ops-db");
        assert_eq!(p.database, "primary_acme");
        assert_eq!(s.host, "clients-db");
        assert_eq!(s.database, "secondary_acme");
    }

    #[test]
    fn control_alias_uses_control_database_name() {
        let settings = Settings::from_lookup(|key| match key {
            "CONTROL_DB_NAME" => Some("directory".into()),
            _ => None,
        })
        .unwrap();
        let cfg = settings.templates.config_for_alias(&Alias::control());
        assert_eq!(cfg.database, "directory");
    }

    #[test]
    fn debug_output_hides_password() {
        let settings = Settings::from_lookup(|key| match key {
            "MYSQL_PASSWORD" => Some("hunter2".into()),
            _ => None,
        })
        .unwrap();
        let cfg = settings.templates.config_for_alias(&Alias::control());
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }
}
