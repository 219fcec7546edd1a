//! Process settings, read once from the environment at startup.

use crate::config::connection::{ConnectionTemplate, ConnectionTemplates, Engine};
use crate::error::ConfigError;
use crate::reaper::ReaperConfig;
use crate::role::Role;
use regex::Regex;
use std::time::Duration;

/// What to do when a tenant-scoped role is requested without a tenant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingTenantPolicy {
    #[default]
    Reject,
    /// Route to the control database instead. Only for deployments with anonymous endpoints.
    FallbackToControl,
}

impl std::str::FromStr for MissingTenantPolicy {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(MissingTenantPolicy::Reject),
            "control" => Ok(MissingTenantPolicy::FallbackToControl),
            _ => Err("expected reject or control"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MissingTenantPolicies {
    pub primary: MissingTenantPolicy,
    pub secondary: MissingTenantPolicy,
}

impl MissingTenantPolicies {
    pub fn for_role(&self, role: Role) -> MissingTenantPolicy {
        match role {
            Role::Primary => self.primary,
            Role::Secondary => self.secondary,
            Role::Control => MissingTenantPolicy::Reject,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub templates: ConnectionTemplates,
    /// Control-database table holding `(id, name)` per tenant.
    pub tenant_table: String,
    pub missing_tenant: MissingTenantPolicies,
    pub reaper: ReaperConfig,
    /// Live handles unused for this long are reported as idle.
    pub idle_after: Duration,
    pub bind_addr: String,
}

impl Settings {
    /// Load from process environment (after `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let engine: Engine = env.parse("DB_ENGINE", Engine::MySql)?;
        let port: u16 = env.parse("DB_PORT", 3306)?;
        let max_age_secs: u64 = env.parse("DB_CONN_MAX_AGE", 0)?;
        let base = ConnectionTemplate {
            engine,
            user: env.string("MYSQL_USER", "default_user"),
            password: env.string("MYSQL_PASSWORD", "default_password"),
            host: String::new(),
            port,
            time_zone: env.string("DB_TIME_ZONE", "+00:00"),
            health_checks: env.parse_bool("DB_HEALTH_CHECKS", true)?,
            max_age: (max_age_secs > 0).then(|| Duration::from_secs(max_age_secs)),
            max_connections: env.parse("DB_MAX_CONNECTIONS", 5)?,
            connect_timeout: Duration::from_secs(env.parse("DB_CONNECT_TIMEOUT", 10)?),
        };
        let with_host = |key: &str| ConnectionTemplate {
            host: env.string(key, "localhost"),
            ..base.clone()
        };

        let templates = ConnectionTemplates {
            control: with_host("DB_HOST_CONTROL"),
            control_database: env.string("CONTROL_DB_NAME", "control"),
            primary: with_host("DB_HOST_PRIMARY"),
            secondary: with_host("DB_HOST_SECONDARY"),
        };

        let tenant_table = env.string("CONTROL_TENANT_TABLE", "agencies");
        let ident = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("static pattern compiles");
        if !ident.is_match(&tenant_table) {
            return Err(ConfigError::InvalidValue {
                key: "CONTROL_TENANT_TABLE",
                value: tenant_table,
                reason: "expected a table identifier",
            });
        }

        let reaper = ReaperConfig {
            idle_timeout: Duration::from_secs(env.parse("CONNECTION_TIMEOUT", 3600)?),
            interval: Duration::from_secs(env.parse("REAPER_INTERVAL", 60)?),
        };
        if reaper.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "REAPER_INTERVAL",
                value: "0".into(),
                reason: "must be at least one second",
            });
        }

        Ok(Settings {
            templates,
            tenant_table,
            missing_tenant: MissingTenantPolicies {
                primary: env.parse("PRIMARY_MISSING_TENANT", MissingTenantPolicy::Reject)?,
                secondary: env.parse("SECONDARY_MISSING_TENANT", MissingTenantPolicy::Reject)?,
            },
            reaper,
            idle_after: Duration::from_secs(env.parse("CONNECTION_IDLE_AFTER", 300)?),
            bind_addr: env.string("BIND_ADDR", "0.0.0.0:3000"),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key,
                value,
                reason: "unparseable",
            }),
        }
    }

    fn parse_bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::InvalidValue {
                key,
                value,
                reason: "expected a boolean",
            }),
        }
    }
}
