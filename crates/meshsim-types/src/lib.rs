//! # meshsim-types: Core types for `meshsim`
//!
//! This crate contains the vocabulary every simulated service speaks:
//! - Message kinds ([`Kind`])
//! - Causal trace context ([`Context`], [`TraceId`], [`SpanId`], [`RouteKey`], [`SpanIssuer`])
//! - Hierarchical service names ([`ServiceName`])
//! - Simulated service packages ([`Package`])
//! - Architecture descriptions ([`Architecture`], [`ServiceSpec`])
//! - Temporal types ([`Timestamp`], [`parse_duration`], [`chat_interval`])

use std::{
    fmt::Display,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

mod architecture;
mod context;
mod duration;
mod kind;
mod name;
mod package;

pub use architecture::{Architecture, ArchitectureError, ServiceSpec};
pub use context::{Context, RouteKey, SpanId, SpanIssuer, TraceId};
pub use duration::{CHAT_MAX, CHAT_MIN, chat_interval, parse_duration};
pub use kind::Kind;
pub use name::{
    FILTER_CONTAINER, FILTER_DEFAULT, FILTER_REDUCE, NAME_SEGMENTS, ServiceName, WILDCARD,
    filter, filter_edge,
};
pub use package::Package;


// ============================================================================
// Errors
// ============================================================================

/// Errors raised while parsing protocol values.
///
/// Every variant describes a wiring bug in the caller rather than a runtime
/// condition, so the runtime treats all of them as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),

    #[error("unknown package: {0:?}")]
    UnknownPackage(String),

    #[error("invalid service name {name:?}: expected {NAME_SEGMENTS} segments, found {found}")]
    InvalidName { name: String, found: usize },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

// ============================================================================
// Timestamp - Copy (8-byte value)
// ============================================================================

/// Wall-clock time in nanoseconds since the Unix epoch.
///
/// Timestamps order topology facts: a `NameDrop` stamped earlier than a
/// `Forget` for the same peer is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as microseconds since Unix epoch.
    pub fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    /// Creates a timestamp for the current time.
    ///
    /// A clock set before the epoch reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as u64)
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}
