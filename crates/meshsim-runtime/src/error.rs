//! Error types for the simulation runtime.

use meshsim_flow::FlowError;
use meshsim_ring::RingError;
use meshsim_types::{ArchitectureError, Kind, ParseError};
use thiserror::Error;

/// Wiring bugs detected by an actor.
///
/// Any of these ends the actor's task immediately; the controller then
/// aborts the whole simulation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A node was created from a package nothing implements.
    #[error("{name}: unknown package {package:?}")]
    UnknownPackage { name: String, package: String },

    /// A registry was asked to look up an empty name.
    #[error("{registry}: lookup with an empty name")]
    EmptyLookup { registry: String },

    /// A symbolic dependency with no service type.
    #[error("{actor}: NameDrop of an empty dependency")]
    EmptyDependency { actor: String },

    /// A payload that should carry a full name does not.
    #[error("{actor}: {source}")]
    InvalidName {
        actor: String,
        #[source]
        source: ParseError,
    },

    /// A topology message arrived before the actor learned its name.
    #[error("{kind} received before Hello")]
    BeforeHello { kind: Kind },

    /// A message that needs an answer carried no reply-to.
    #[error("{actor}: {kind} without a reply-to mailbox")]
    MissingReplyTo { actor: String, kind: Kind },
}

/// Settings that cannot build a topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("architecture name {0:?} must be one name segment")]
    ArchName(String),

    #[error("at least one region is required")]
    NoRegions,

    #[error("{requested} regions requested but only {named} names are configured")]
    TooManyRegions { requested: usize, named: usize },

    #[error("at least one zone name is required")]
    NoZones,

    #[error("registry buffer must be at least 1")]
    ZeroRegistryBuffer,

    #[error("poll interval must be positive")]
    ZeroPollInterval,
}

/// Simulation errors.
#[derive(Error, Debug)]
pub enum Error {
    /// An actor hit a protocol violation.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The architecture description cannot be simulated.
    #[error("invalid architecture: {0}")]
    Architecture(#[from] ArchitectureError),

    /// A cluster ring could not be built.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Flow export failed.
    #[error("flow export error: {0}")]
    Flow(#[from] FlowError),

    /// Settings are inconsistent.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// The recipient's task has exited.
    #[error("recipient {0} is gone")]
    RecipientGone(String),

    /// An actor task panicked or was cancelled.
    #[error("actor task failed: {0}")]
    TaskFailed(String),

    /// Not every Goodbye was acknowledged in time.
    #[error("shutdown incomplete: {acked} of {expected} acknowledged")]
    ShutdownIncomplete { expected: usize, acked: usize },
}

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, Error>;
