//! Configuration management for meshsim
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (MESHSIM_* prefix, `__` between levels)
//! 3. meshsim.local.toml (gitignored, local overrides)
//! 4. meshsim.toml (git-tracked, project config)
//! 5. ~/.config/meshsim/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use meshsim_types::{Architecture, chat_interval, parse_duration};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main meshsim configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshsimConfig {
    pub simulation: SimulationConfig,
    pub topology: TopologyConfig,
    pub discovery: DiscoveryConfig,
    pub activity: ActivityConfig,
    pub output: OutputConfig,
    pub architecture: Architecture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// First segment of every node name; the architecture's name when unset.
    pub arch: Option<String>,
    pub duration: String,
    pub seed: Option<u64>,
    /// Service type that loses one node half way through the run.
    pub victim: Option<String>,
    pub shutdown_timeout: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            arch: None,
            duration: "10s".to_string(),
            seed: None,
            victim: None,
            shutdown_timeout: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub regions: usize,
    pub region_names: Vec<String>,
    pub zone_names: Vec<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            regions: 1,
            region_names: [
                "us-east-1",
                "us-west-2",
                "eu-west-1",
                "eu-central-1",
                "ap-southeast-1",
                "ap-southeast-2",
            ]
            .iter()
            .map(|r| (*r).to_string())
            .collect(),
            zone_names: ["zoneA", "zoneB", "zoneC"]
                .iter()
                .map(|z| (*z).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub poll_interval: String,
    pub registry_buffer: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: "1s".to_string(),
            registry_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub chat_rate: String,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            chat_rate: "10ms".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Collect flow annotations.
    pub flow: bool,
    pub flow_file: Option<PathBuf>,
    pub msglog: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            flow: true,
            flow_file: None,
            msglog: false,
        }
    }
}

fn parse_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value)
        .map_err(|e| ConfigError::ValidationError(format!("{field}: {e}")))
}

impl MeshsimConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Name prefix for every simulated node
    pub fn arch_name(&self) -> &str {
        self.simulation
            .arch
            .as_deref()
            .unwrap_or(&self.architecture.name)
    }

    pub fn duration(&self) -> Result<Duration, ConfigError> {
        parse_field("simulation.duration", &self.simulation.duration)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration, ConfigError> {
        parse_field("simulation.shutdown_timeout", &self.simulation.shutdown_timeout)
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        parse_field("discovery.poll_interval", &self.discovery.poll_interval)
    }

    /// Replace the architecture with one read from a TOML or JSON file
    pub fn with_architecture_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        self.architecture = load_architecture(path)?;
        Ok(self)
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if let Some(flow_file) = &self.output.flow_file
            && flow_file.is_relative()
        {
            self.output.flow_file = Some(base_dir.as_ref().join(flow_file));
        }
    }

    /// Check every value the simulation will rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let arch = self.arch_name();
        if arch.is_empty() || arch.contains('.') {
            return Err(ConfigError::ValidationError(format!(
                "architecture name {arch:?} must be one name segment"
            )));
        }

        let topology = &self.topology;
        if topology.region_names.is_empty() || topology.zone_names.is_empty() {
            return Err(ConfigError::ValidationError(
                "region and zone name lists must not be empty".to_string(),
            ));
        }
        if topology.regions == 0 || topology.regions > topology.region_names.len() {
            return Err(ConfigError::ValidationError(format!(
                "regions must be between 1 and {}, got {}",
                topology.region_names.len(),
                topology.regions
            )));
        }

        self.duration()?;
        self.shutdown_timeout()?;
        if self.poll_interval()?.is_zero() {
            return Err(ConfigError::ValidationError(
                "discovery.poll_interval must be positive".to_string(),
            ));
        }
        if chat_interval(&self.activity.chat_rate).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "activity.chat_rate {:?} is not a usable request interval",
                self.activity.chat_rate
            )));
        }
        if self.discovery.registry_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "discovery.registry_buffer must be at least 1".to_string(),
            ));
        }

        self.architecture
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Read an architecture description, as JSON for `.json` files and TOML otherwise
pub fn load_architecture(path: impl AsRef<Path>) -> Result<Architecture, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let architecture: Architecture = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&text).map_err(|source| ConfigError::JsonError {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::from_str(&text).map_err(|source| ConfigError::TomlError {
            path: path.to_path_buf(),
            source,
        })?
    };
    architecture
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("{}: {e}", path.display())))?;
    Ok(architecture)
}
