//! Immutable simulation settings shared by every actor.

use std::sync::Arc;
use std::time::Duration;

use meshsim_flow::FlowTracer;

use crate::error::SettingsError;

/// Region names used when a run spans more than one region.
pub const DEFAULT_REGIONS: [&str; 6] = [
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-1",
    "ap-southeast-2",
];

/// Availability zone names; nodes in a tier are spread over them round-robin.
pub const DEFAULT_ZONES: [&str; 3] = ["zoneA", "zoneB", "zoneC"];

/// Everything an actor may read but never change.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Architecture name, the first segment of every node name.
    pub arch: String,
    /// Number of active regions.
    pub regions: usize,
    /// Known region names; the first `regions` are active.
    pub region_names: Vec<String>,
    pub zone_names: Vec<String>,
    /// How often each actor polls its registries for dependency changes.
    pub poll_interval: Duration,
    /// Interval sent to the root client to start traffic.
    pub chat_rate: String,
    /// Queue depth of each registry mailbox.
    pub registry_buffer: usize,
    /// Log every message received at info level.
    pub msglog: bool,
    /// Seed for every actor's generator; entropy when unset.
    pub seed: Option<u64>,
    /// Upper bound on waiting for Goodbye acknowledgements.
    pub shutdown_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            arch: "netflixoss".to_string(),
            regions: 1,
            region_names: DEFAULT_REGIONS.iter().map(|r| (*r).to_string()).collect(),
            zone_names: DEFAULT_ZONES.iter().map(|z| (*z).to_string()).collect(),
            poll_interval: Duration::from_secs(1),
            chat_rate: "10ms".to_string(),
            registry_buffer: 256,
            msglog: false,
            seed: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Settings {
    /// The regions this run creates nodes in.
    pub fn active_regions(&self) -> &[String] {
        let n = self.regions.min(self.region_names.len());
        &self.region_names[..n]
    }

    /// Checks the settings can build a topology.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.arch.is_empty() || self.arch.contains('.') {
            return Err(SettingsError::ArchName(self.arch.clone()));
        }
        if self.regions == 0 {
            return Err(SettingsError::NoRegions);
        }
        if self.regions > self.region_names.len() {
            return Err(SettingsError::TooManyRegions {
                requested: self.regions,
                named: self.region_names.len(),
            });
        }
        if self.zone_names.is_empty() {
            return Err(SettingsError::NoZones);
        }
        if self.registry_buffer == 0 {
            return Err(SettingsError::ZeroRegistryBuffer);
        }
        if self.poll_interval.is_zero() {
            return Err(SettingsError::ZeroPollInterval);
        }
        Ok(())
    }
}

/// Settings plus the shared flow tracer, handed to every actor behind an `Arc`.
#[derive(Debug, Default)]
pub struct Env {
    pub settings: Settings,
    pub tracer: Option<Arc<FlowTracer>>,
}

impl Env {
    pub fn new(settings: Settings, tracer: Option<Arc<FlowTracer>>) -> Arc<Self> {
        Arc::new(Self { settings, tracer })
    }
}
