//! Actor runtime for simulated microservice architectures.
//!
//! Provides everything that runs during a simulation:
//! - Mailboxes and the message envelope
//! - The shared actor loop and discovery handlers every service delegates to
//! - Per-package service behaviors (forwarders, stores, clusters, the
//!   storage access layer, the root client)
//! - The replicated service registry and the topology logger
//! - The controller that builds a topology, injects chaos and shuts down
//!
//! Every actor is a tokio task with one inbox. Actors share nothing but
//! immutable [`Settings`] and the flow tracer.

pub mod actor;
pub mod error;
pub mod fallback;
pub mod mailbox;
pub mod registry;
pub mod routing;
pub mod services;
pub mod settings;
pub mod simulation;
pub mod topology;

pub use actor::{ActorCore, Control, Pending, Service, run_actor};
pub use error::{Error, ProtocolError, Result, SettingsError};
pub use fallback::{LookupState, Tier};
pub use mailbox::{Inbox, Mailbox, MailboxId, MailboxRole, Message, mailbox};
pub use registry::{Answer, Registry, run_registry};
pub use routing::{Route, RoutingTable};
pub use settings::{DEFAULT_REGIONS, DEFAULT_ZONES, Env, Settings};
pub use simulation::{SimReport, Simulation};
pub use topology::{LogSink, MemorySink, TopologyEvent, TopologyLogger, TopologySink};

use std::sync::Arc;
use std::time::Duration;

use meshsim_flow::FlowTracer;
use meshsim_types::Architecture;

/// Runs one architecture for `duration` and returns the report.
pub async fn simulate(
    settings: Settings,
    architecture: Architecture,
    tracer: Option<Arc<FlowTracer>>,
    sink: Box<dyn TopologySink>,
    duration: Duration,
    victim: Option<&str>,
) -> Result<SimReport> {
    let mut simulation = Simulation::new(settings, architecture, tracer, sink)?;
    simulation.run(duration, victim).await
}

#[cfg(test)]
mod tests;
