//! Cascading lookup state machine for the storage access layer.
//!
//! A read walks the storage tiers from fastest to slowest:
//!
//! ```text
//! NewRequest → CacheLookup → VolumeLookup → ClusterLookup → StoreLookup → LayerLookup
//! ```
//!
//! Tiers with no routed peer are skipped. A hit at any tier, or running out
//! of tiers, ends the walk and answers the caller.

use meshsim_types::Package;

/// A storage tier the layer can ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Cache,
    Volume,
    Cluster,
    Store,
    /// Another access layer.
    Layer,
}

impl Tier {
    /// Fastest first.
    pub const ORDER: [Tier; 5] = [
        Tier::Cache,
        Tier::Volume,
        Tier::Cluster,
        Tier::Store,
        Tier::Layer,
    ];

    /// Packages that serve this tier.
    pub fn packages(self) -> &'static [Package] {
        match self {
            Tier::Cache => &[Package::Cache],
            Tier::Volume => &[Package::Volume],
            Tier::Cluster => &[Package::PriamCassandra, Package::Riak],
            Tier::Store => &[Package::Store],
            Tier::Layer => &[Package::Staash],
        }
    }

    /// State the lookup is in while this tier is being asked.
    pub fn state(self) -> LookupState {
        match self {
            Tier::Cache => LookupState::CacheLookup,
            Tier::Volume => LookupState::VolumeLookup,
            Tier::Cluster => LookupState::ClusterLookup,
            Tier::Store => LookupState::StoreLookup,
            Tier::Layer => LookupState::LayerLookup,
        }
    }
}

/// Where an in-flight read is in the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LookupState {
    /// Not sent anywhere yet.
    #[default]
    NewRequest,
    CacheLookup,
    VolumeLookup,
    ClusterLookup,
    StoreLookup,
    LayerLookup,
}

impl LookupState {
    /// The tier this state is waiting on.
    pub fn tier(self) -> Option<Tier> {
        match self {
            LookupState::NewRequest => None,
            LookupState::CacheLookup => Some(Tier::Cache),
            LookupState::VolumeLookup => Some(Tier::Volume),
            LookupState::ClusterLookup => Some(Tier::Cluster),
            LookupState::StoreLookup => Some(Tier::Store),
            LookupState::LayerLookup => Some(Tier::Layer),
        }
    }

    /// The next tier to ask after a miss in this state, skipping tiers
    /// `available` rejects. `None` means the cascade is exhausted.
    pub fn next(self, available: impl Fn(Tier) -> bool) -> Option<Tier> {
        let start = match self.tier() {
            None => 0,
            Some(current) => Tier::ORDER.iter().position(|t| *t == current)? + 1,
        };
        Tier::ORDER[start..].iter().copied().find(|t| available(*t))
    }
}
