//! Roles declared by data models and the aliases they resolve to.

use crate::error::RoutingError;
use crate::tenant::Tenant;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Which logical database a model's rows live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Shared directory database. Never tenant-scoped.
    Control,
    Primary,
    Secondary,
}

impl Role {
    /// Roles that get one database per tenant.
    pub const TENANT_SCOPED: [Role; 2] = [Role::Primary, Role::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Control => "control",
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }

    pub fn is_tenant_scoped(&self) -> bool {
        !matches!(self, Role::Control)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "control" => Ok(Role::Control),
            "primary" => Ok(Role::Primary),
            "secondary" => Ok(Role::Secondary),
            other => Err(format!(
                "invalid role: {} (expected control, primary or secondary)",
                other
            )),
        }
    }
}

/// Implemented by every data model to declare where its rows live.
pub trait RoutedModel {
    const ROLE: Role;
}

/// Sentinel alias of the control database.
pub const CONTROL_ALIAS: &str = "control";

/// Longest database name MySQL accepts, in characters.
const MAX_DATABASE_NAME_CHARS: usize = 64;

/// Key identifying one (tenant, role) connection target. Also used as the database name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(Arc<str>);

impl Alias {
    pub fn control() -> Self {
        Alias(Arc::from(CONTROL_ALIAS))
    }

    /// `{role}_{tenant name lowercased}`. The control role ignores the tenant.
    ///
    /// The alias travels as a connect option, never inside SQL text, so any name is kept
    /// as is except those no server accepts: blank, containing NUL, or too long.
    pub fn for_tenant(role: Role, tenant: &Tenant) -> Result<Self, RoutingError> {
        if !role.is_tenant_scoped() {
            return Ok(Alias::control());
        }
        let name = tenant.name.trim().to_lowercase();
        let alias = format!("{}_{}", role.as_str(), name);
        if name.is_empty() || name.contains('\0') || alias.chars().count() > MAX_DATABASE_NAME_CHARS {
            return Err(RoutingError::InvalidTenantName(tenant.name.clone()));
        }
        Ok(Alias(Arc::from(alias)))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        Alias(Arc::from(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_control(&self) -> bool {
        &*self.0 == CONTROL_ALIAS
    }

    /// Role encoded in the alias prefix.
    pub fn role(&self) -> Role {
        if self.is_control() {
            return Role::Control;
        }
        match self.0.split_once('_') {
            Some(("secondary", _)) => Role::Secondary,
            _ => Role::Primary,
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Alias {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Tenant {
        Tenant { id: 7, name: "Acme".into() }
    }

    #[test]
    fn alias_lowercases_tenant_name() {
        assert_eq!(Alias::for_tenant(Role::Primary, &acme()).unwrap().as_str(), "primary_acme");
        let shouting = Tenant { id: 7, name: "ACME".into() };
        assert_eq!(
            Alias::for_tenant(Role::Secondary, &shouting).unwrap().as_str(),
            "secondary_acme"
        );
    }

    #[test]
    fn control_role_ignores_tenant() {
        let alias = Alias::for_tenant(Role::Control, &acme()).unwrap();
        assert!(alias.is_control());
        assert_eq!(alias, Alias::control());
    }

    #[test]
    fn punctuated_and_accented_names_are_routable() {
        let cases = [
            ("Acme-Chile", "primary_acme-chile"),
            ("Peñalolén", "primary_peñalolén"),
            ("Acme Corp", "primary_acme corp"),
        ];
        for (name, expected) in cases {
            let tenant = Tenant { id: 8, name: name.into() };
            assert_eq!(Alias::for_tenant(Role::Primary, &tenant).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn names_no_server_accepts_are_rejected() {
        let longest = "a".repeat(MAX_DATABASE_NAME_CHARS - "secondary_".len());
        let ok = Tenant { id: 8, name: longest.clone() };
        assert!(Alias::for_tenant(Role::Secondary, &ok).is_ok());

        let too_long = format!("{}a", longest);
        for name in ["", "   ", "acme\0", too_long.as_str()] {
            let bad = Tenant { id: 8, name: name.to_string() };
            assert!(
                matches!(
                    Alias::for_tenant(Role::Secondary, &bad),
                    Err(RoutingError::InvalidTenantName(_))
                ),
                "{:?} was accepted",
                name
            );
        }
    }

    #[test]
    fn alias_role_round_trips_from_prefix() {
        assert_eq!(Alias::for_tenant(Role::Secondary, &acme()).unwrap().role(), Role::Secondary);
        assert_eq!(Alias::for_tenant(Role::Primary, &acme()).unwrap().role(), Role::Primary);
        assert_eq!(Alias::control().role(), Role::Control);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Primary".parse::<Role>(), Ok(Role::Primary));
        assert!("gci".parse::<Role>().is_err());
    }
}
