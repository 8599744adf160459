//! Simulation controller.
//!
//! Builds the registries, the topology logger and every tier of an
//! architecture, starts traffic at the root, optionally removes one node
//! half way through, and shuts everything down in order: nodes first, then
//! registries, then the logger. Each phase waits for one `Goodbye`
//! acknowledgement per actor it asked to leave.
//!
//! Any actor task that fails aborts the whole run.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use meshsim_flow::FlowTracer;
use meshsim_ring::Ring;
use meshsim_types::{Architecture, Context, Kind, Package, ServiceName, ServiceSpec, WILDCARD};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};

use crate::actor::ActorCore;
use crate::error::{Error, ProtocolError, Result};
use crate::mailbox::{Inbox, Mailbox, MailboxRole, Message, mailbox};
use crate::registry::{Registry, run_registry};
use crate::services;
use crate::settings::{Env, Settings};
use crate::topology::{TopologyLogger, TopologySink};

/// Package segment of registry names.
const REGISTRY: &str = "eureka";
/// Service and package segment of the topology logger's name.
const LOGGER: &str = "edda";

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimReport {
    pub arch: String,
    /// Service nodes created, excluding registries and the logger.
    pub nodes: usize,
    pub registries: usize,
    pub victim: Option<String>,
    /// Goodbyes sent to service nodes, chaos included.
    pub goodbyes_sent: usize,
    /// Goodbye acknowledgements from service nodes.
    pub acks: usize,
    pub registries_drained: usize,
    pub flows_completed: u64,
    pub elapsed: Duration,
}

type Joined = Option<std::result::Result<std::result::Result<(), ProtocolError>, JoinError>>;

/// Owns every actor task of one run.
pub struct Simulation {
    env: Arc<Env>,
    architecture: Architecture,
    listener: Mailbox,
    inbox: Inbox,
    /// Live service nodes, by name.
    nodes: BTreeMap<ServiceName, Mailbox>,
    /// Names created per tier, in creation order.
    tiers: BTreeMap<String, Vec<ServiceName>>,
    registries: BTreeMap<ServiceName, Mailbox>,
    logger: Option<(ServiceName, Mailbox)>,
    sink: Option<Box<dyn TopologySink>>,
    /// Names asked to leave that have not acknowledged yet.
    departing: HashSet<String>,
    tasks: JoinSet<std::result::Result<(), ProtocolError>>,
    rng: SmallRng,
    report: SimReport,
    started: Instant,
}

impl Simulation {
    /// Validates settings and architecture. Nothing runs until [`Simulation::build`].
    pub fn new(
        settings: Settings,
        architecture: Architecture,
        tracer: Option<Arc<FlowTracer>>,
        sink: Box<dyn TopologySink>,
    ) -> Result<Self> {
        settings.validate()?;
        architecture.validate()?;

        let rng = match settings.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let (listener, inbox) = mailbox(MailboxRole::FanIn(settings.registry_buffer));
        let report = SimReport {
            arch: settings.arch.clone(),
            ..SimReport::default()
        };
        Ok(Self {
            env: Env::new(settings, tracer),
            architecture,
            listener,
            inbox,
            nodes: BTreeMap::new(),
            tiers: BTreeMap::new(),
            registries: BTreeMap::new(),
            logger: None,
            sink: Some(sink),
            departing: HashSet::new(),
            tasks: JoinSet::new(),
            rng,
            report,
            started: Instant::now(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.env.settings
    }

    /// Live service nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &ServiceName> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Mailbox of a live node.
    pub fn node(&self, name: &ServiceName) -> Option<&Mailbox> {
        self.nodes.get(name)
    }

    /// Every name created for one tier, departed or not.
    pub fn tier(&self, service: &str) -> &[ServiceName] {
        self.tiers.get(service).map_or(&[], Vec::as_slice)
    }

    pub fn registries(&self) -> impl Iterator<Item = &ServiceName> {
        self.registries.keys()
    }

    pub fn report(&self) -> &SimReport {
        &self.report
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Creates registries, the logger and every tier, and introduces each
    /// node to its registries and dependencies.
    pub async fn build(&mut self) -> Result<()> {
        self.started = Instant::now();
        self.create_registries().await?;
        self.create_logger().await?;

        let specs = self.architecture.services.clone();
        for spec in &specs {
            self.create_tier(spec).await?;
        }
        tracing::info!(
            arch = %self.env.settings.arch,
            nodes = self.report.nodes,
            registries = self.report.registries,
            "topology created"
        );
        Ok(())
    }

    /// One registry per zone of every active region, peered within the region.
    async fn create_registries(&mut self) -> Result<()> {
        let env = Arc::clone(&self.env);
        let zones = &env.settings.zone_names;
        for (r, region) in env.settings.active_regions().iter().enumerate() {
            for (z, zone) in zones.iter().enumerate() {
                let index = r * zones.len() + z;
                let name = ServiceName::make(&env.settings.arch, region, zone, REGISTRY, REGISTRY, index);
                let (mb, inbox) = mailbox(MailboxRole::FanIn(env.settings.registry_buffer));
                let registry = Registry::new(name.clone(), mb.clone(), Arc::clone(&env));
                self.tasks.spawn(run_registry(registry, inbox));
                self.registries.insert(name, mb);
            }
        }
        self.report.registries = self.registries.len();

        for (name, mb) in &self.registries {
            for (peer, peer_mb) in &self.registries {
                if peer != name && peer.region() == name.region() {
                    let intro = Message::new(Kind::NameDrop, Some(peer_mb.clone()), Context::NIL, peer.as_str());
                    mb.send(intro).await?;
                }
            }
        }
        Ok(())
    }

    async fn create_logger(&mut self) -> Result<()> {
        let Some(sink) = self.sink.take() else {
            return Ok(());
        };
        let settings = &self.env.settings;
        let name = ServiceName::make(&settings.arch, WILDCARD, WILDCARD, LOGGER, LOGGER, 0);
        let (mb, inbox) = mailbox(MailboxRole::FanIn(settings.registry_buffer));
        self.tasks.spawn(TopologyLogger::new(name.as_str(), sink).run(inbox));

        for registry in self.registries.values() {
            let subscribe = Message::new(Kind::Inform, Some(mb.clone()), Context::NIL, name.as_str());
            registry.send(subscribe).await?;
        }
        self.logger = Some((name, mb));
        Ok(())
    }

    /// Names for one tier, following its region and count rules.
    fn tier_names(&self, spec: &ServiceSpec) -> Vec<ServiceName> {
        let settings = &self.env.settings;
        let arch = settings.arch.as_str();
        if spec.regions == 0 {
            return vec![ServiceName::make(arch, WILDCARD, WILDCARD, &spec.name, &spec.package, 0)];
        }
        let regions = (spec.regions * settings.regions).min(settings.region_names.len());
        let zones = &settings.zone_names;
        let mut names = Vec::new();
        for (r, region) in settings.region_names[..regions].iter().enumerate() {
            if spec.count == 0 {
                names.push(ServiceName::make(arch, region, WILDCARD, &spec.name, &spec.package, 0));
                continue;
            }
            for i in r * spec.count..(r + 1) * spec.count {
                let zone = &zones[i % zones.len()];
                names.push(ServiceName::make(arch, region, zone, &spec.name, &spec.package, i));
            }
        }
        names
    }

    async fn create_tier(&mut self, spec: &ServiceSpec) -> Result<()> {
        let names = self.tier_names(spec);
        let package: Package = spec.package.parse().map_err(|_| ProtocolError::UnknownPackage {
            name: spec.name.clone(),
            package: spec.package.clone(),
        })?;

        let mut rings: BTreeMap<String, Arc<Ring>> = BTreeMap::new();
        if package.is_ring_member() {
            let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
            for name in &names {
                groups.entry(name.region_zone()).or_default().push(name.as_str());
            }
            for (group, members) in groups {
                let ring = Ring::distribute(members)?;
                tracing::debug!(tier = %spec.name, %group, %ring, "ring built");
                rings.insert(group, Arc::new(ring));
            }
        }

        for name in &names {
            let (mb, inbox) = mailbox(MailboxRole::PointToPoint);
            let core = ActorCore::new(mb.clone(), package, Arc::clone(&self.env));
            let ring = rings.get(&name.region_zone()).cloned();
            services::spawn(&mut self.tasks, name, core, inbox, ring)?;
            self.nodes.insert(name.clone(), mb.clone());
            self.start_node(name, &mb, spec).await?;
        }
        self.report.nodes += names.len();
        self.tiers.insert(spec.name.clone(), names);
        Ok(())
    }

    /// Names a node, subscribes it to the registries in its scope and hands
    /// it its symbolic dependencies.
    async fn start_node(&self, name: &ServiceName, mb: &Mailbox, spec: &ServiceSpec) -> Result<()> {
        mb.send(Message::new(Kind::Hello, Some(self.listener.clone()), Context::NIL, name.as_str()))
            .await?;

        for (registry, registry_mb) in &self.registries {
            let in_scope = if name.region() == WILDCARD || spec.cross_region() {
                true
            } else if name.zone() == WILDCARD {
                registry.region() == name.region()
            } else {
                registry.region_zone() == name.region_zone()
            };
            if in_scope {
                let inform = Message::new(Kind::Inform, Some(registry_mb.clone()), Context::NIL, registry.as_str());
                mb.send(inform).await?;
            }
        }

        for dependency in spec.peer_dependencies() {
            mb.send(Message::new(Kind::NameDrop, None, Context::NIL, dependency))
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Builds, drives traffic for `duration`, and shuts down.
    ///
    /// With a `victim` service type, one random node of it is asked to leave
    /// half way through. Ctrl-C skips straight to shutdown.
    pub async fn run(&mut self, duration: Duration, victim: Option<&str>) -> Result<SimReport> {
        self.build().await?;
        self.start_traffic().await?;

        let half = duration / 2;
        let mut interrupted = self.wait(half).await?;
        if !interrupted {
            if let Some(service) = victim {
                self.chaos(service);
            }
            interrupted = self.wait(duration - half).await?;
        }
        if interrupted {
            tracing::info!("interrupted, shutting down");
        }
        self.shutdown().await
    }

    /// Sends `Chat` to every node of the root tier.
    pub async fn start_traffic(&mut self) -> Result<()> {
        let root = self
            .architecture
            .root()
            .map(|spec| spec.name.clone())
            .unwrap_or_default();
        let rate = self.env.settings.chat_rate.clone();
        for name in self.tier(&root).to_vec() {
            if let Some(mb) = self.nodes.get(&name) {
                mb.send(Message::new(Kind::Chat, None, Context::NIL, rate.as_str()))
                    .await?;
                tracing::info!(root = %name, %rate, "traffic started");
            }
        }
        Ok(())
    }

    /// Sleeps while watching for failed actors. Returns `true` on Ctrl-C.
    pub async fn wait(&mut self, period: Duration) -> Result<bool> {
        let deadline = time::sleep(period);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => return Ok(false),
                joined = self.tasks.join_next(), if !self.tasks.is_empty() => self.check(joined)?,
                _ = signal::ctrl_c() => return Ok(true),
            }
        }
    }

    fn check(&mut self, joined: Joined) -> Result<()> {
        match joined {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => {
                self.tasks.abort_all();
                Err(e.into())
            }
            Some(Err(e)) => {
                self.tasks.abort_all();
                Err(Error::TaskFailed(e.to_string()))
            }
        }
    }

    /// Asks one random live node of `service` to leave.
    pub fn chaos(&mut self, service: &str) -> Option<ServiceName> {
        let candidates: Vec<&ServiceName> = self.nodes.keys().filter(|n| n.service() == service).collect();
        if candidates.is_empty() {
            tracing::warn!(%service, "chaos monkey found no live victim");
            return None;
        }
        let victim = candidates[self.rng.gen_range(0..candidates.len())].clone();
        let mb = self.nodes.remove(&victim)?;

        self.departing.insert(victim.to_string());
        mb.go_send(Message::new(Kind::Goodbye, Some(self.listener.clone()), Context::NIL, "chaosmonkey"));
        self.report.goodbyes_sent += 1;
        self.report.victim = Some(victim.to_string());
        tracing::info!(%victim, "chaos monkey");
        Some(victim)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Sends `Goodbye` to every live node, then the registries, then the
    /// logger, waiting for every acknowledgement at each step.
    pub async fn shutdown(&mut self) -> Result<SimReport> {
        let live = std::mem::take(&mut self.nodes);
        for (name, mb) in &live {
            self.depart(name, mb);
        }
        self.report.goodbyes_sent += live.len();
        self.report.acks = self.await_departures().await?;

        let registries = std::mem::take(&mut self.registries);
        for (name, mb) in &registries {
            self.depart(name, mb);
        }
        self.report.registries_drained = self.await_departures().await?;

        if let Some((name, mb)) = self.logger.take() {
            self.depart(&name, &mb);
            self.await_departures().await?;
        }

        while let Some(joined) = self.tasks.join_next().await {
            self.check(Some(joined))?;
        }

        self.report.flows_completed = self.env.tracer.as_ref().map_or(0, |t| t.completed());
        self.report.elapsed = self.started.elapsed();
        tracing::info!(
            nodes = self.report.nodes,
            goodbyes = self.report.goodbyes_sent,
            acks = self.report.acks,
            registries = self.report.registries_drained,
            flows = self.report.flows_completed,
            "simulation shut down"
        );
        Ok(self.report.clone())
    }

    fn depart(&mut self, name: &ServiceName, mb: &Mailbox) {
        self.departing.insert(name.to_string());
        mb.go_send(Message::new(Kind::Goodbye, Some(self.listener.clone()), Context::NIL, "shutdown"));
    }

    /// Collects acknowledgements until nobody is left departing.
    async fn await_departures(&mut self) -> Result<usize> {
        let expected = self.departing.len();
        let deadline = time::sleep(self.env.settings.shutdown_timeout);
        tokio::pin!(deadline);
        let mut acked = 0;

        while !self.departing.is_empty() {
            tokio::select! {
                received = self.inbox.recv() => match received {
                    Some(msg) if msg.kind == Kind::Goodbye => {
                        if self.departing.remove(&msg.payload) {
                            acked += 1;
                        } else {
                            tracing::debug!(from = %msg.payload, "unexpected goodbye");
                        }
                    }
                    Some(msg) => tracing::trace!(kind = %msg.kind, "controller ignored"),
                    None => break,
                },
                joined = self.tasks.join_next(), if !self.tasks.is_empty() => self.check(joined)?,
                () = &mut deadline => {
                    self.tasks.abort_all();
                    return Err(Error::ShutdownIncomplete { expected, acked });
                }
            }
        }
        Ok(acked)
    }
}
