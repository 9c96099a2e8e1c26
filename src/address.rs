//! Remote address parsing.
//!
//! Inbound traffic carries a full address of the form `bare/resource`. The
//! bare part names the account; the resource names one of its concurrent
//! sessions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A remote address split into bare identity and resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Bare identity (`node@domain`).
    pub bare: String,
    /// Session/resource identifier, if present.
    pub resource: Option<String>,
}

impl Address {
    /// Split `raw` at the first `/`.
    ///
    /// Everything after the first `/` belongs to the resource, including any
    /// further slashes. An empty resource is treated as absent.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('/') {
            Some((bare, resource)) => Self {
                bare: bare.to_owned(),
                resource: (!resource.is_empty()).then(|| resource.to_owned()),
            },
            None => Self {
                bare: raw.to_owned(),
                resource: None,
            },
        }
    }

    /// The resource, or `""` when absent.
    pub fn resource_or_empty(&self) -> &str {
        self.resource.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}/{resource}", self.bare),
            None => f.write_str(&self.bare),
        }
    }
}
