//! Load-balancer service model consumed by the backend syncer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Front-end port filter of one L7LB resource.
///
/// Each entry is either a decimal port number or a named port. An empty
/// filter selects every backend of the service.
pub type PortFilter = Vec<String>;

/// Backends grouped by port key (`"*"`, a literal port number or a port name)
pub type BucketMap = BTreeMap<String, Vec<Backend>>;

/// Identity of a load-balanced service (namespace/name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName {
    pub namespace: String,
    pub name: String,
}

impl ServiceName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of an L7LB configuration resource referencing services
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct L7lbResourceName {
    pub namespace: String,
    pub name: String,
}

impl L7lbResourceName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for L7lbResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single backend of a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub address: String,
    pub port: u16,
    /// Named front-end port this backend serves
    pub fe_port_name: String,
    /// Only preferred backends are eligible for L7 routing, if any exist
    #[serde(default)]
    pub preferred: bool,
}

/// Service frontend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
}

/// Current view of a service: its frontend and live backend set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: ServiceName,
    pub frontend: Frontend,
    pub backends: Vec<Backend>,
}
