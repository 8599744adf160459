//! Package behaviors.
//!
//! | Package                          | Service       |
//! |----------------------------------|---------------|
//! | denominator                      | [`Client`]    |
//! | elb, zuul, karyon, monolith      | [`Forwarder`] |
//! | cache, volume, store             | [`Store`]     |
//! | priamCassandra, riak             | [`Cluster`]   |
//! | staash                           | [`Layer`]     |

mod client;
mod cluster;
mod forwarder;
mod layer;
mod store;

use std::sync::Arc;

use meshsim_ring::Ring;
use meshsim_types::{Package, ServiceName};
use tokio::task::JoinSet;

pub use client::Client;
pub use cluster::Cluster;
pub use forwarder::Forwarder;
pub use layer::Layer;
pub use store::Store;

use crate::actor::{ActorCore, run_actor};
use crate::error::ProtocolError;
use crate::mailbox::Inbox;

/// Spawns the run loop for a node of `package`.
///
/// Ring members need their cluster's ring; every other package ignores it.
pub(crate) fn spawn(
    tasks: &mut JoinSet<Result<(), ProtocolError>>,
    name: &ServiceName,
    core: ActorCore,
    inbox: Inbox,
    ring: Option<Arc<Ring>>,
) -> Result<(), ProtocolError> {
    match core.package() {
        Package::Denominator => {
            tasks.spawn(run_actor(core, inbox, Client::default()));
        }
        Package::Elb | Package::Zuul | Package::Karyon | Package::Monolith => {
            tasks.spawn(run_actor(core, inbox, Forwarder));
        }
        Package::Cache | Package::Volume | Package::Store => {
            tasks.spawn(run_actor(core, inbox, Store::seeded()));
        }
        Package::PriamCassandra | Package::Riak => {
            let ring = ring.unwrap_or_default();
            tasks.spawn(run_actor(core, inbox, Cluster::new(ring)));
        }
        Package::Staash => {
            tasks.spawn(run_actor(core, inbox, Layer));
        }
        Package::Eureka => {
            return Err(ProtocolError::UnknownPackage {
                name: name.to_string(),
                package: core.package().to_string(),
            });
        }
    }
    Ok(())
}

/// Splits a `"key value"` write payload.
pub(crate) fn split_put(payload: &str) -> Option<(&str, &str)> {
    let (key, value) = payload.trim().split_once(char::is_whitespace)?;
    let value = value.trim();
    (!key.is_empty() && !value.is_empty()).then_some((key, value))
}
