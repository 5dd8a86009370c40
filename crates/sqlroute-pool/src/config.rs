//! Router configuration.
//!
//! A [`RouterConfig`] names the driver every node uses, one master entry and
//! the replica entries. Any other top-level key is a default shared by all
//! nodes: [`RouterConfig::resolve`] merges it into each entry that does not
//! set it itself.
//!
//! ```json
//! {
//!   "connection_adapter": "mysql",
//!   "username": "app",
//!   "database": "shop",
//!   "disable_connection_test": "true",
//!   "master": { "host": "db-primary", "port": 3306 },
//!   "slaves": [ { "host": "db-r1" }, { "host": "db-r2", "name": "reporting" } ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use sqlroute_core::{Error, Result};

/// Connection parameters for one node.
///
/// Fields left unset fall back to the top-level defaults of the
/// [`RouterConfig`] they belong to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name used in log output; defaults to the node's role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Driver identifier; forced to the router's `connection_adapter`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    /// Hostname or IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Username for authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database to select after connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Driver-specific parameters passed through untouched
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl NodeConfig {
    /// Create an empty node configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set a driver-specific parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Get the socket address string, if a host is set.
    pub fn socket_addr(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Fill every unset field from `defaults`; fields already set win.
    pub fn merge_defaults(&mut self, defaults: &NodeConfig) {
        fn fill<T: Clone>(slot: &mut Option<T>, default: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(default);
            }
        }

        fill(&mut self.name, &defaults.name);
        fill(&mut self.adapter, &defaults.adapter);
        fill(&mut self.host, &defaults.host);
        fill(&mut self.port, &defaults.port);
        fill(&mut self.username, &defaults.username);
        fill(&mut self.password, &defaults.password);
        fill(&mut self.database, &defaults.database);
        for (key, value) in &defaults.params {
            self.params
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Top-level configuration for a master/slave router.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterConfig {
    /// The router's own adapter tag (e.g. `"master_slave"`); not passed on
    #[serde(default)]
    pub adapter: Option<String>,
    /// Driver identifier used for every node
    #[serde(default)]
    pub connection_adapter: Option<String>,
    /// The writable node
    #[serde(default)]
    pub master: Option<NodeConfig>,
    /// The read-only nodes
    #[serde(default)]
    pub slaves: Option<Vec<NodeConfig>>,
    /// Report the pool as always active instead of pinging each handle
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub disable_connection_test: bool,
    /// Every other top-level key: defaults merged into each node
    #[serde(flatten)]
    pub defaults: NodeConfig,
}

/// A [`RouterConfig`] after defaults are merged and required parts checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Driver identifier shared by every node
    pub connection_adapter: String,
    /// The writable node
    pub master: NodeConfig,
    /// The read-only nodes, in configuration order (never empty)
    pub slaves: Vec<NodeConfig>,
    /// Whether liveness checks are skipped
    pub disable_connection_test: bool,
}

impl RouterConfig {
    /// Create a configuration for the given driver and master node.
    pub fn new(connection_adapter: impl Into<String>, master: NodeConfig) -> Self {
        Self {
            connection_adapter: Some(connection_adapter.into()),
            master: Some(master),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON.
    #[allow(clippy::result_large_err)]
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Append a replica node.
    pub fn slave(mut self, node: NodeConfig) -> Self {
        self.slaves.get_or_insert_with(Vec::new).push(node);
        self
    }

    /// Set the defaults shared by all nodes.
    pub fn defaults(mut self, defaults: NodeConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Enable or disable the liveness check bypass.
    pub fn disable_connection_test(mut self, disabled: bool) -> Self {
        self.disable_connection_test = disabled;
        self
    }

    /// Merge defaults into each node and check the required parts.
    ///
    /// Fails with a configuration error when the driver, the master or the
    /// replicas are missing.
    #[allow(clippy::result_large_err)]
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let connection_adapter = self
            .connection_adapter
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::config("connection_adapter is required"))?;
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| Error::config("master configuration is required"))?;
        let slaves = match self.slaves.as_deref() {
            Some(slaves) if !slaves.is_empty() => slaves,
            _ => return Err(Error::config("at least one slave configuration is required")),
        };

        let massage = |node: &NodeConfig| {
            let mut node = node.clone();
            node.merge_defaults(&self.defaults);
            node.adapter = Some(connection_adapter.clone());
            node
        };

        Ok(ResolvedConfig {
            master: massage(master),
            slaves: slaves.iter().map(massage).collect(),
            connection_adapter,
            disable_connection_test: self.disable_connection_test,
        })
    }
}

/// Accept `true`/`false` or the string `"true"` (anything else is false).
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s == "true",
    })
}
