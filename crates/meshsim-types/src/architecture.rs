//! Architecture descriptions: which services exist, how many, and what they
//! depend on.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::Package;

/// Dependency that marks a tier as cross-region instead of naming a peer.
pub(crate) const REGISTRY_DEPENDENCY: &str = "eureka";

/// One tier of the architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub package: String,
    /// `0` creates a single global node outside any region.
    pub regions: usize,
    /// `0` creates one cross-zone node per region.
    pub count: usize,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ServiceSpec {
    pub fn new(
        name: impl Into<String>,
        package: Package,
        regions: usize,
        count: usize,
        dependencies: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            package: package.as_str().to_string(),
            regions,
            count,
            dependencies: dependencies.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    /// Whether this tier subscribes to every registry in every region.
    pub fn cross_region(&self) -> bool {
        self.dependencies.iter().any(|d| d == REGISTRY_DEPENDENCY)
    }

    /// Dependencies that name other tiers.
    pub fn peer_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| !d.is_empty() && *d != REGISTRY_DEPENDENCY)
    }
}

/// Reasons an architecture cannot be simulated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchitectureError {
    #[error("architecture {0:?} has no services")]
    Empty(String),

    #[error("service {0:?} is defined more than once")]
    DuplicateService(String),

    #[error("service {service:?} depends on undefined service {dependency:?}")]
    MissingDependency { service: String, dependency: String },

    #[error("service {service:?} uses unknown package {package:?}")]
    UnknownPackage { service: String, package: String },

    #[error("architecture {0:?} has no denominator service to drive traffic")]
    NoRoot(String),

    /// Storage layers write through to the layers they depend on, so a loop
    /// among them would never stop writing.
    #[error("storage layer {0:?} depends on itself through other layers")]
    LayerCycle(String),
}

/// A named set of tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub services: Vec<ServiceSpec>,
}

impl Architecture {
    /// Checks names, packages and dependencies, returning the root service.
    pub fn validate(&self) -> Result<&ServiceSpec, ArchitectureError> {
        if self.services.is_empty() {
            return Err(ArchitectureError::Empty(self.name.clone()));
        }

        let mut defined = HashSet::new();
        for service in &self.services {
            if !defined.insert(service.name.as_str()) {
                return Err(ArchitectureError::DuplicateService(service.name.clone()));
            }
            if service.package.parse::<Package>().is_err() {
                return Err(ArchitectureError::UnknownPackage {
                    service: service.name.clone(),
                    package: service.package.clone(),
                });
            }
        }

        for service in &self.services {
            if let Some(missing) = service
                .peer_dependencies()
                .find(|dep| !defined.contains(dep))
            {
                return Err(ArchitectureError::MissingDependency {
                    service: service.name.clone(),
                    dependency: missing.to_string(),
                });
            }
        }

        if let Some(layer) = self.layer_cycle() {
            return Err(ArchitectureError::LayerCycle(layer.to_string()));
        }

        self.root().ok_or_else(|| ArchitectureError::NoRoot(self.name.clone()))
    }

    /// First staash tier that can reach itself through staash dependencies.
    fn layer_cycle(&self) -> Option<&str> {
        self.services
            .iter()
            .filter(|s| s.package == Package::Staash.as_str())
            .map(|s| s.name.as_str())
            .find(|start| {
                let mut seen = HashSet::new();
                let mut stack = self.layer_dependencies(start);
                while let Some(next) = stack.pop() {
                    if next == *start {
                        return true;
                    }
                    if seen.insert(next) {
                        stack.extend(self.layer_dependencies(next));
                    }
                }
                false
            })
    }

    /// Dependencies of `name` that are themselves staash tiers.
    fn layer_dependencies(&self, name: &str) -> Vec<&str> {
        let Some(service) = self.service(name) else {
            return Vec::new();
        };
        service
            .peer_dependencies()
            .filter(|d| {
                self.service(d)
                    .is_some_and(|t| t.package == Package::Staash.as_str())
            })
            .collect()
    }

    /// The last denominator tier, which receives the `Chat` that starts traffic.
    pub fn root(&self) -> Option<&ServiceSpec> {
        self.services
            .iter()
            .rev()
            .find(|s| s.package == Package::Denominator.as_str())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}

impl Default for Architecture {
    /// A storage-heavy web architecture that exercises every package.
    fn default() -> Self {
        Self {
            name: "netflixoss".to_string(),
            description: "web front end over a cascading storage layer".to_string(),
            services: vec![
                ServiceSpec::new(
                    "cassTurtle",
                    Package::PriamCassandra,
                    1,
                    6,
                    &["eureka", "cassTurtle"],
                ),
                ServiceSpec::new("evcache", Package::Cache, 1, 3, &[]),
                ServiceSpec::new("s3", Package::Volume, 1, 0, &[]),
                ServiceSpec::new("mysql", Package::Store, 1, 2, &[]),
                ServiceSpec::new(
                    "turtle-staash",
                    Package::Staash,
                    1,
                    3,
                    &["evcache", "s3", "cassTurtle", "mysql"],
                ),
                ServiceSpec::new("homepage", Package::Karyon, 1, 9, &["turtle-staash"]),
                ServiceSpec::new("signup", Package::Karyon, 1, 3, &["mysql"]),
                ServiceSpec::new("www-proxy", Package::Zuul, 1, 3, &["homepage", "signup"]),
                ServiceSpec::new("www-elb", Package::Elb, 1, 0, &["www-proxy"]),
                ServiceSpec::new("www", Package::Denominator, 0, 0, &["www-elb"]),
            ],
        }
    }
}
