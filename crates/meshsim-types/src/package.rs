//! Simulated service packages.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// The code a node runs, taken from the last segment of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Package {
    /// Service registry.
    Eureka,
    /// Global DNS front end; the root client that chats.
    Denominator,
    /// Load balancer.
    Elb,
    /// Edge proxy.
    Zuul,
    /// Business-logic microservice.
    Karyon,
    /// Single large service.
    Monolith,
    /// Storage access layer with cascading lookups.
    Staash,
    /// Partitioned wide-column cluster.
    PriamCassandra,
    /// Partitioned key/value cluster.
    Riak,
    /// Generic key/value store.
    Store,
    /// Cache in front of slower storage.
    Cache,
    /// Bulk volume storage.
    Volume,
}

impl Package {
    pub const ALL: [Package; 12] = [
        Package::Eureka,
        Package::Denominator,
        Package::Elb,
        Package::Zuul,
        Package::Karyon,
        Package::Monolith,
        Package::Staash,
        Package::PriamCassandra,
        Package::Riak,
        Package::Store,
        Package::Cache,
        Package::Volume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Package::Eureka => "eureka",
            Package::Denominator => "denominator",
            Package::Elb => "elb",
            Package::Zuul => "zuul",
            Package::Karyon => "karyon",
            Package::Monolith => "monolith",
            Package::Staash => "staash",
            Package::PriamCassandra => "priamCassandra",
            Package::Riak => "riak",
            Package::Store => "store",
            Package::Cache => "cache",
            Package::Volume => "volume",
        }
    }

    /// Whether nodes of this package accept peers from other zones.
    pub fn cross_zone(&self) -> bool {
        !matches!(
            self,
            Package::Denominator | Package::Zuul | Package::Karyon | Package::Eureka
        )
    }

    /// Whether this package partitions its keys over a ring.
    pub fn is_ring_member(&self) -> bool {
        matches!(self, Package::PriamCassandra | Package::Riak)
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Package {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Package::ALL
            .into_iter()
            .find(|package| package.as_str() == s)
            .ok_or_else(|| ParseError::UnknownPackage(s.to_string()))
    }
}
