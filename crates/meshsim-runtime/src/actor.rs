//! Actor core: state and handlers every simulated service shares.
//!
//! Each node runs [`run_actor`] with an [`ActorCore`] and a [`Service`]. The
//! service sees every message first and handles the kinds its package
//! customises, then hands the rest to [`ActorCore::handle_common`]. No
//! service re-implements discovery, routing or shutdown.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use meshsim_types::{Context, Kind, Package, RouteKey, ServiceName, SpanIssuer, Timestamp, WILDCARD};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::error::ProtocolError;
use crate::fallback::LookupState;
use crate::mailbox::{Inbox, Mailbox, Message};
use crate::routing::RoutingTable;
use crate::settings::{Env, Settings};

/// What the run loop does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// An outstanding request this actor is waiting on.
#[derive(Debug, Clone)]
pub struct Pending {
    /// Who to answer; `None` for requests this actor originated.
    pub reply_to: Option<Mailbox>,
    /// Context of the upstream request, used on the answer.
    pub ctx: Context,
    /// The key being read.
    pub key: String,
    pub state: LookupState,
}

/// Package-specific behavior plugged into the shared run loop.
pub trait Service: Send + 'static {
    /// Handles one message.
    fn handle(
        &mut self,
        core: &mut ActorCore,
        msg: Message,
    ) -> impl Future<Output = Result<Control, ProtocolError>> + Send;

    /// Called on every chat tick once traffic has started.
    fn on_chat(
        &mut self,
        _core: &mut ActorCore,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send {
        async { Ok(()) }
    }
}

// ============================================================================
// ActorCore
// ============================================================================

/// Identity, routes and bookkeeping of one node.
pub struct ActorCore {
    mailbox: Mailbox,
    package: Package,
    name: Option<ServiceName>,
    parent: Option<Mailbox>,
    routes: RoutingTable,
    /// Service types polled from the registries.
    dependencies: BTreeSet<String>,
    /// Latest forget time per peer; older introductions are stale.
    forgotten: HashMap<ServiceName, Timestamp>,
    registries: BTreeMap<String, Mailbox>,
    pending: HashMap<RouteKey, Pending>,
    issuer: SpanIssuer,
    rng: SmallRng,
    gold: u64,
    chat: Option<Duration>,
    env: Arc<Env>,
}

impl ActorCore {
    pub fn new(mailbox: Mailbox, package: Package, env: Arc<Env>) -> Self {
        let id = mailbox.id().as_u64();
        let rng = match env.settings.seed {
            Some(seed) => SmallRng::seed_from_u64(seed ^ id),
            None => SmallRng::from_entropy(),
        };
        Self {
            issuer: SpanIssuer::new(id),
            mailbox,
            package,
            name: None,
            parent: None,
            routes: RoutingTable::new(),
            dependencies: BTreeSet::new(),
            forgotten: HashMap::new(),
            registries: BTreeMap::new(),
            pending: HashMap::new(),
            rng,
            gold: 0,
            chat: None,
            env,
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn package(&self) -> Package {
        self.package
    }

    pub fn name(&self) -> Option<&ServiceName> {
        self.name.as_ref()
    }

    /// The node's name, or a placeholder before `Hello`.
    pub fn label(&self) -> &str {
        self.name.as_ref().map_or("unnamed", ServiceName::as_str)
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn settings(&self) -> &Settings {
        &self.env.settings
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }

    pub fn registries(&self) -> impl Iterator<Item = &Mailbox> {
        self.registries.values()
    }

    pub fn gold(&self) -> u64 {
        self.gold
    }

    /// The name, or a fatal error for a message that needs one.
    pub fn require_name(&self, kind: Kind) -> Result<&ServiceName, ProtocolError> {
        self.name.as_ref().ok_or(ProtocolError::BeforeHello { kind })
    }

    /// The reply-to of a message that must be answered.
    pub fn require_reply_to(&self, msg: &Message) -> Result<Mailbox, ProtocolError> {
        msg.reply_to
            .clone()
            .ok_or_else(|| ProtocolError::MissingReplyTo {
                actor: self.label().to_string(),
                kind: msg.kind,
            })
    }

    pub fn parse_name(&self, payload: &str) -> Result<ServiceName, ProtocolError> {
        ServiceName::parse(payload).map_err(|source| ProtocolError::InvalidName {
            actor: self.label().to_string(),
            source,
        })
    }

    // ------------------------------------------------------------------------
    // Contexts and routes
    // ------------------------------------------------------------------------

    /// Starts a new request flow rooted at this actor.
    pub fn new_trace(&mut self) -> Context {
        Context::new_trace(&mut self.issuer)
    }

    pub fn new_parent(&mut self, ctx: Context) -> Context {
        ctx.new_parent(&mut self.issuer)
    }

    pub fn new_span(&mut self, ctx: Context) -> Context {
        ctx.new_span(&mut self.issuer)
    }

    /// Mailbox of any routed peer.
    pub fn random_route(&mut self) -> Option<Mailbox> {
        self.routes.random(&mut self.rng).map(|r| r.mailbox.clone())
    }

    /// Mailbox of any routed peer running one of `packages`.
    pub fn pick(&mut self, packages: &[Package]) -> Option<Mailbox> {
        self.routes.pick(packages, &mut self.rng).map(|r| r.mailbox.clone())
    }

    pub fn track(&mut self, key: RouteKey, pending: Pending) {
        self.pending.insert(key, pending);
    }

    pub fn pending(&self, key: &RouteKey) -> Option<&Pending> {
        self.pending.get(key)
    }

    pub fn pending_mut(&mut self, key: &RouteKey) -> Option<&mut Pending> {
        self.pending.get_mut(key)
    }

    pub fn untrack(&mut self, key: &RouteKey) -> Option<Pending> {
        self.pending.remove(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn start_chat(&mut self, period: Duration) {
        self.chat = Some(period);
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Builds a message from this actor with its own mailbox as reply-to.
    pub fn message(&self, kind: Kind, ctx: Context, payload: impl Into<String>) -> Message {
        Message::new(kind, Some(self.mailbox.clone()), ctx, payload)
    }

    /// Annotates and sends to a peer without waiting.
    pub fn tell(&self, to: &Mailbox, msg: Message) {
        if let Some(tracer) = &self.env.tracer {
            tracer.annotate_send(self.label(), msg.kind, msg.ctx, &msg.payload, msg.sent_at);
        }
        to.go_send(msg);
    }

    /// Issues a read for `key` one hop below `upstream`, returning the new context.
    pub fn issue_get(&mut self, to: &Mailbox, upstream: Context, key: &str) -> Context {
        let ctx = self.new_parent(upstream);
        self.tell(to, self.message(Kind::GetRequest, ctx, key));
        ctx
    }

    /// Tells one registry about a topology fact.
    async fn notify_registry(&self, msg: Message) {
        let Some(registry) = self.registries.values().next() else {
            return;
        };
        if let Err(e) = registry.send(msg).await {
            tracing::debug!(actor = %self.label(), error = %e, "registry unavailable");
        }
    }

    /// Logs and annotates a received message.
    pub(crate) fn observe(&self, msg: &Message) {
        if self.env.settings.msglog {
            tracing::info!("{}: {}", self.label(), msg);
        }
        if let Some(tracer) = &self.env.tracer {
            tracer.annotate_receive(self.label(), msg.kind, msg.ctx, &msg.payload, Timestamp::now());
        }
    }

    /// Asks every registry for every dependency.
    pub(crate) async fn poll(&self) {
        if self.name.is_none() {
            return;
        }
        for dependency in &self.dependencies {
            for registry in self.registries.values() {
                let query = self.message(Kind::GetRequest, Context::NIL, dependency.as_str());
                if let Err(e) = registry.send(query).await {
                    tracing::debug!(actor = %self.label(), error = %e, "poll skipped");
                }
            }
        }
    }

    // ========================================================================
    // Shared handlers
    // ========================================================================

    /// Default handling for every kind.
    pub async fn handle_common(&mut self, msg: Message) -> Result<Control, ProtocolError> {
        match msg.kind {
            Kind::Hello => self.hello(msg)?,
            Kind::Inform => self.inform(msg).await?,
            Kind::NameDrop => self.name_drop(msg).await?,
            Kind::Forget => self.forget(msg).await?,
            Kind::GetRequest => self.forward_get(&msg)?,
            Kind::Put => self.forward_put(msg),
            Kind::GetResponse => self.relay_response(msg),
            Kind::GoldCoin => self.gold_coin(&msg),
            Kind::Goodbye => {
                self.goodbye(&msg).await;
                return Ok(Control::Stop);
            }
            Kind::Chat | Kind::Replicate | Kind::Delete => {
                tracing::trace!(actor = %self.label(), kind = %msg.kind, "ignored");
            }
        }
        Ok(Control::Continue)
    }

    /// Learns this node's name and parent. Later Hellos are ignored.
    fn hello(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.name.is_some() {
            return Ok(());
        }
        self.name = Some(self.parse_name(&msg.payload)?);
        self.parent = msg.reply_to;
        tracing::debug!(actor = %self.label(), "hello");
        Ok(())
    }

    /// Subscribes to a registry and announces this node to it.
    async fn inform(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let me = self.require_name(Kind::Inform)?.clone();
        let registry = self.require_reply_to(&msg)?;
        self.registries.insert(msg.payload, registry.clone());
        let announce = self.message(Kind::Put, Context::NIL, me.as_str());
        if let Err(e) = registry.send(announce).await {
            tracing::warn!(actor = %me, error = %e, "registry gone before announce");
        }
        Ok(())
    }

    /// Learns of a peer (with mailbox) or a symbolic dependency (without).
    async fn name_drop(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let Some(peer_box) = msg.reply_to.clone() else {
            return self.add_dependency(msg.payload).await;
        };
        let me = self.require_name(Kind::NameDrop)?.clone();
        let peer = self.parse_name(&msg.payload)?;
        if peer == me {
            return Ok(());
        }
        if !self.package.cross_zone() && me.zone() != WILDCARD && me.zone() != peer.zone() {
            return Ok(());
        }
        if self.forgotten.get(&peer).is_some_and(|at| msg.sent_at < *at) {
            tracing::debug!(actor = %me, %peer, "stale introduction dropped");
            return Ok(());
        }
        if !self.routes.add(peer.clone(), peer_box, msg.sent_at) {
            return Ok(());
        }
        self.forgotten.remove(&peer);
        self.dependencies.insert(peer.service().to_string());

        let edge = self.message(Kind::Inform, Context::NIL, format!("{me} {peer}"));
        self.notify_registry(edge).await;
        Ok(())
    }

    async fn add_dependency(&mut self, service: String) -> Result<(), ProtocolError> {
        if service.is_empty() {
            return Err(ProtocolError::EmptyDependency {
                actor: self.label().to_string(),
            });
        }
        // Look up now rather than waiting for the first poll.
        for registry in self.registries.values() {
            let query = self.message(Kind::GetRequest, Context::NIL, service.as_str());
            if let Err(e) = registry.send(query).await {
                tracing::debug!(actor = %self.label(), error = %e, "lookup skipped");
            }
        }
        self.dependencies.insert(service);
        Ok(())
    }

    /// Drops a peer and records when, so older introductions are rejected.
    async fn forget(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let peer = self.parse_name(&msg.payload)?;
        let at = self.forgotten.entry(peer.clone()).or_insert(msg.sent_at);
        *at = (*at).max(msg.sent_at);

        if self.routes.remove(&peer).is_some()
            && let Some(me) = &self.name
        {
            let edge = self.message(Kind::Forget, Context::NIL, format!("{me} {peer}"));
            self.notify_registry(edge).await;
        }
        Ok(())
    }

    /// Relays a read to any peer, one hop deeper.
    fn forward_get(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let reply_to = self.require_reply_to(msg)?;
        let Some(target) = self.random_route() else {
            tracing::debug!(actor = %self.label(), key = %msg.payload, "no route for read");
            return Ok(());
        };
        let ctx = self.issue_get(&target, msg.ctx, &msg.payload);
        self.track(
            ctx.route(),
            Pending {
                reply_to: Some(reply_to),
                ctx: msg.ctx,
                key: msg.payload.clone(),
                state: LookupState::NewRequest,
            },
        );
        Ok(())
    }

    /// Relays a write to any peer, one hop deeper. No answer is expected.
    fn forward_put(&mut self, msg: Message) {
        let Some(target) = self.random_route() else {
            tracing::debug!(actor = %self.label(), "no route for write");
            return;
        };
        let ctx = self.new_parent(msg.ctx);
        self.tell(&target, self.message(Kind::Put, ctx, msg.payload));
    }

    /// Answers the caller waiting on this response, if any.
    pub fn relay_response(&mut self, msg: Message) {
        match self.untrack(&msg.ctx.route()) {
            Some(Pending {
                reply_to: Some(upstream),
                ctx,
                ..
            }) => {
                self.tell(&upstream, self.message(Kind::GetResponse, ctx, msg.payload));
            }
            Some(_) => {}
            None => {
                tracing::trace!(actor = %self.label(), ctx = %msg.ctx, "stale response dropped");
            }
        }
    }

    fn gold_coin(&mut self, msg: &Message) {
        match msg.payload.trim().parse::<u64>() {
            Ok(amount) => self.gold = self.gold.saturating_add(amount),
            Err(_) => tracing::debug!(actor = %self.label(), payload = %msg.payload, "bad coin"),
        }
    }

    /// Tells the registries this node is leaving and acknowledges to the parent.
    async fn goodbye(&mut self, msg: &Message) {
        let name = self.label().to_string();
        if self.name.is_some() {
            for registry in self.registries.values() {
                let leaving = self.message(Kind::Delete, Context::NIL, name.as_str());
                if let Err(e) = registry.send(leaving).await {
                    tracing::debug!(actor = %name, error = %e, "registry gone before delete");
                }
            }
        }
        if let Some(parent) = self.parent.as_ref().or(msg.reply_to.as_ref()) {
            parent.go_send(self.message(Kind::Goodbye, Context::NIL, name.as_str()));
        }
        tracing::debug!(actor = %name, reason = %msg.payload, gold = self.gold, "goodbye");
    }
}

// ============================================================================
// Run loop
// ============================================================================

async fn next_tick(chat: &mut Option<Interval>) {
    match chat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Runs one node until `Goodbye` or a protocol violation.
pub async fn run_actor<S: Service>(
    mut core: ActorCore,
    mut inbox: Inbox,
    mut service: S,
) -> Result<(), ProtocolError> {
    let period = core.settings().poll_interval;
    let mut poll = time::interval_at(Instant::now() + period, period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut chat: Option<Interval> = None;

    loop {
        tokio::select! {
            received = inbox.recv() => {
                let Some(msg) = received else { break };
                core.observe(&msg);
                match service.handle(&mut core, msg).await {
                    Ok(Control::Continue) => {}
                    Ok(Control::Stop) => break,
                    Err(e) => {
                        tracing::error!(actor = %core.label(), error = %e, "protocol violation");
                        return Err(e);
                    }
                }
                if let Some(period) = core.chat.take() {
                    let mut ticks = time::interval(period);
                    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    chat = Some(ticks);
                }
            }
            _ = poll.tick() => core.poll().await,
            () = next_tick(&mut chat) => {
                if let Err(e) = service.on_chat(&mut core).await {
                    tracing::error!(actor = %core.label(), error = %e, "protocol violation");
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
