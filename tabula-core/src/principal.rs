//! Principals and per-request context.
//!
//! The authenticated principal is passed explicitly into every engine call;
//! there is no ambient "current user".

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ValidationError;

/// Owner of a set of tables. Issued by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl OwnerId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(OwnerId)
            .map_err(|_| ValidationError::InvalidValue {
                field: "owner".to_string(),
                reason: format!("'{}' is not a numeric owner id", s),
            })
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Session-authenticated dashboard.
    Dashboard,
    /// API-key-authenticated client.
    Api,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Dashboard => "dashboard",
            Source::Api => "api",
        }
    }
}

impl FromStr for Source {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard" => Ok(Source::Dashboard),
            "api" => Ok(Source::Api),
            other => Err(ValidationError::InvalidValue {
                field: "source".to_string(),
                reason: format!("unknown source '{}'", other),
            }),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub owner: OwnerId,
    pub source: Source,
    /// Display name of the API key used, for programmatic callers.
    pub api_key_name: Option<String>,
}

impl Principal {
    /// Principal authenticated through a dashboard session.
    pub fn dashboard(owner: OwnerId) -> Self {
        Self {
            owner,
            source: Source::Dashboard,
            api_key_name: None,
        }
    }

    /// Principal authenticated through an API key.
    pub fn api_key(owner: OwnerId, key_name: impl Into<String>) -> Self {
        Self {
            owner,
            source: Source::Api,
            api_key_name: Some(key_name.into()),
        }
    }
}

/// Everything an engine call needs to know about the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub principal: Principal,
    pub ip_address: Option<IpAddr>,
}

impl RequestContext {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            ip_address: None,
        }
    }

    pub fn with_ip(mut self, ip_address: Option<IpAddr>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn owner(&self) -> OwnerId {
        self.principal.owner
    }
}

/// Account state lookups, answered by the identity provider.
pub trait OwnerDirectory: Send + Sync {
    /// Whether the owner's account may authenticate.
    fn is_active(&self, owner: OwnerId) -> bool;
}

/// Directory backed by a fixed set of disabled accounts.
#[derive(Debug, Clone, Default)]
pub struct StaticOwnerDirectory {
    disabled: HashSet<OwnerId>,
}

impl StaticOwnerDirectory {
    pub fn new(disabled: impl IntoIterator<Item = OwnerId>) -> Self {
        Self {
            disabled: disabled.into_iter().collect(),
        }
    }

    pub fn disable(&mut self, owner: OwnerId) {
        self.disabled.insert(owner);
    }
}

impl OwnerDirectory for StaticOwnerDirectory {
    fn is_active(&self, owner: OwnerId) -> bool {
        !self.disabled.contains(&owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_id_parse() -> Result<(), ValidationError> {
        assert_eq!("42".parse::<OwnerId>()?, OwnerId(42));
        assert!("abc".parse::<OwnerId>().is_err());
        Ok(())
    }

    #[test]
    fn test_static_directory() {
        let directory = StaticOwnerDirectory::new([OwnerId(7)]);
        assert!(directory.is_active(OwnerId(1)));
        assert!(!directory.is_active(OwnerId(7)));
    }

    #[test]
    fn test_api_key_principal_carries_key_name() {
        let principal = Principal::api_key(OwnerId(3), "ci-runner");
        assert_eq!(principal.source, Source::Api);
        assert_eq!(principal.api_key_name.as_deref(), Some("ci-runner"));
    }
}
