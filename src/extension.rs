//! Host extension registry.
//!
//! The host owns a set of extensions keyed by [`ComponentId`]. Bifrost only
//! ever looks entries up; it never mutates the registry. Each extension
//! advertises its capabilities through narrow accessors on [`Extension`],
//! which [`crate::auth`] uses to obtain client or server authenticators.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::auth::{ClientAuthenticator, ServerAuthenticator};

/// Identifier of a host component, written `type` or `type/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct ComponentId {
    kind: String,
    name: Option<String>,
}

/// Malformed component identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentIdError {
    #[error("component id is empty")]
    Empty,
    #[error("component id {0:?} has an empty type")]
    EmptyType(String),
    #[error("component id {0:?} has an empty name after '/'")]
    EmptyName(String),
    #[error("component id {0:?} contains whitespace")]
    Whitespace(String),
}

impl ComponentId {
    /// Identifier with only a type, e.g. `bearertokenauth`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
        }
    }

    /// Identifier with a type and an instance name, e.g. `oidc/internal`.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: Some(name.into()),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl FromStr for ComponentId {
    type Err = ComponentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ComponentIdError::Empty);
        }
        if s.contains(char::is_whitespace) {
            return Err(ComponentIdError::Whitespace(s.to_string()));
        }

        match s.split_once('/') {
            None => Ok(Self::new(s)),
            Some(("", _)) => Err(ComponentIdError::EmptyType(s.to_string())),
            Some((_, "")) => Err(ComponentIdError::EmptyName(s.to_string())),
            Some((kind, name)) => Ok(Self::with_name(kind, name)),
        }
    }
}

impl TryFrom<String> for ComponentId {
    type Error = ComponentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", self.kind, name),
            None => f.write_str(&self.kind),
        }
    }
}

/// An extension registered with the host.
///
/// Capabilities are opt-in: the default accessors report the capability as
/// missing. Implementors override the ones they provide, typically as
/// `Some(self)`.
pub trait Extension: Send + Sync + 'static {
    /// This extension as a client authenticator, if it is one.
    fn client_authenticator(self: Arc<Self>) -> Option<Arc<dyn ClientAuthenticator>> {
        None
    }

    /// This extension as a server authenticator, if it is one.
    fn server_authenticator(self: Arc<Self>) -> Option<Arc<dyn ServerAuthenticator>> {
        None
    }
}

/// In-memory extension registry.
#[derive(Clone, Default)]
pub struct Extensions {
    entries: HashMap<ComponentId, Arc<dyn Extension>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension, returning the one previously stored under `id`.
    pub fn insert(
        &mut self,
        id: ComponentId,
        extension: Arc<dyn Extension>,
    ) -> Option<Arc<dyn Extension>> {
        self.entries.insert(id, extension)
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, id: ComponentId, extension: Arc<dyn Extension>) -> Self {
        self.insert(id, extension);
        self
    }

    pub fn get(&self, id: &ComponentId) -> Option<Arc<dyn Extension>> {
        self.entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.entries.keys().collect();
        ids.sort();
        f.debug_struct("Extensions").field("ids", &ids).finish()
    }
}

/// The environment that owns extensions.
pub trait Host: Send + Sync {
    /// The host's extension registry, or `None` when it carries no extension
    /// configuration at all.
    fn extensions(&self) -> Option<&Extensions>;
}

/// Host without any extension configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHost;

impl Host for NopHost {
    fn extensions(&self) -> Option<&Extensions> {
        None
    }
}

impl Host for Extensions {
    fn extensions(&self) -> Option<&Extensions> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_component_ids() {
        assert_eq!("oidc".parse::<ComponentId>(), Ok(ComponentId::new("oidc")));
        assert_eq!(
            "oidc/internal".parse::<ComponentId>(),
            Ok(ComponentId::with_name("oidc", "internal"))
        );
        assert_eq!("".parse::<ComponentId>(), Err(ComponentIdError::Empty));
        assert!(matches!(
            "/x".parse::<ComponentId>(),
            Err(ComponentIdError::EmptyType(_))
        ));
        assert!(matches!(
            "oidc/".parse::<ComponentId>(),
            Err(ComponentIdError::EmptyName(_))
        ));
        assert!(matches!(
            "oid c".parse::<ComponentId>(),
            Err(ComponentIdError::Whitespace(_))
        ));
    }

    #[test]
    fn display_round_trips() {
        for id in ["bearertokenauth", "oidc/internal"] {
            assert_eq!(id.parse::<ComponentId>().unwrap().to_string(), id);
        }
    }

    #[test]
    fn nop_host_has_no_registry() {
        assert!(NopHost.extensions().is_none());
        assert!(Extensions::new().extensions().is_some());
    }
}
