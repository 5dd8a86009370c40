//! Driver factories.
//!
//! A [`Driver`] turns one resolved [`NodeConfig`] into a live
//! [`ConnectionHandle`]. The pool uses a single driver for every node, and
//! refuses to start when the configured `connection_adapter` names a
//! different one: a missing driver is a configuration problem, not
//! something the router can route around.

use std::future::Future;

use sqlroute_core::{ConnectionHandle, Cx, Error, HandleIdentity, Outcome, Role};

use crate::config::NodeConfig;

/// Opens connection handles for one kind of database.
pub trait Driver: Send + Sync {
    /// The handle type this driver produces.
    type Handle: ConnectionHandle;

    /// Identifier matched against `connection_adapter`, e.g. `"mysql"`.
    fn adapter_name(&self) -> &str;

    /// Open a connection to `config`, tagged with `identity`.
    fn connect(
        &self,
        cx: &Cx,
        config: &NodeConfig,
        identity: HandleIdentity,
    ) -> impl Future<Output = Outcome<Self::Handle, Error>> + Send;
}

/// The identity a node gets for a role: its configured name, else the role
/// tag, plus its host and port.
pub fn identity_for(config: &NodeConfig, role: Role) -> HandleIdentity {
    let mut identity = HandleIdentity::new(role);
    if let Some(name) = &config.name {
        identity = identity.name(name.clone());
    }
    if let Some(host) = &config.host {
        identity = identity.host(host.clone());
    }
    if let Some(port) = config.port {
        identity = identity.port(port);
    }
    identity
}

/// Fail unless `driver` serves the adapter named in the configuration.
#[allow(clippy::result_large_err)]
pub fn check_adapter<D: Driver>(driver: &D, connection_adapter: &str) -> Result<(), Error> {
    if driver.adapter_name() == connection_adapter {
        Ok(())
    } else {
        Err(Error::config(format!(
            "no driver installed for adapter '{}' (available: '{}')",
            connection_adapter,
            driver.adapter_name()
        )))
    }
}
