//! Unit tests for meshsim-runtime

use std::sync::Arc;
use std::time::Duration;

use meshsim_ring::Ring;
use meshsim_types::{Context, Kind, Package, ServiceName, SpanIssuer, Timestamp};

use crate::actor::{ActorCore, Control, Service};
use crate::error::ProtocolError;
use crate::mailbox::{Inbox, Mailbox, MailboxRole, Message, mailbox};
use crate::services::{Cluster, Layer, Store};
use crate::settings::Env;

fn name(zone: &str, service: &str, package: Package, i: usize) -> ServiceName {
    ServiceName::make("test", "us-east-1", zone, service, package.as_str(), i)
}

/// A mailbox the test reads from directly.
struct Probe {
    mb: Mailbox,
    inbox: Inbox,
}

impl Probe {
    fn new() -> Self {
        let (mb, inbox) = mailbox(MailboxRole::FanIn(64));
        Self { mb, inbox }
    }

    async fn next(&mut self) -> Message {
        self.inbox.recv().await.unwrap()
    }

    /// Whether nothing arrives within a short grace period.
    async fn stays_quiet(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(50), self.inbox.recv())
            .await
            .is_err()
    }
}

/// A core that has been named, with a probe standing in for its parent.
async fn named_core(me: &ServiceName, package: Package) -> (ActorCore, Probe) {
    let (mb, _inbox) = mailbox(MailboxRole::PointToPoint);
    let mut core = ActorCore::new(mb, package, Arc::new(Env::default()));
    let parent = Probe::new();
    let hello = Message::new(Kind::Hello, Some(parent.mb.clone()), Context::NIL, me.as_str());
    core.handle_common(hello).await.unwrap();
    (core, parent)
}

async fn introduce(core: &mut ActorCore, peer: &ServiceName, mb: &Mailbox, at: u64) {
    let drop = Message::new(Kind::NameDrop, Some(mb.clone()), Context::NIL, peer.as_str())
        .stamped(Timestamp::from_nanos(at));
    core.handle_common(drop).await.unwrap();
}

async fn subscribe(core: &mut ActorCore, registry: &Probe) {
    let inform = Message::new(Kind::Inform, Some(registry.mb.clone()), Context::NIL, "registry");
    core.handle_common(inform).await.unwrap();
}

fn root() -> Context {
    Context::new_trace(&mut SpanIssuer::new(4242))
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn inform_announces_the_node() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let mut registry = Probe::new();

    subscribe(&mut core, &registry).await;

    let put = registry.next().await;
    assert_eq!(put.kind, Kind::Put);
    assert_eq!(put.payload, me.as_str());
    assert_eq!(put.reply_to.as_ref(), Some(core.mailbox()));
}

#[tokio::test]
async fn inform_before_hello_is_fatal() {
    let (mb, _inbox) = mailbox(MailboxRole::PointToPoint);
    let mut core = ActorCore::new(mb, Package::Karyon, Arc::new(Env::default()));
    let registry = Probe::new();
    let inform = Message::new(Kind::Inform, Some(registry.mb.clone()), Context::NIL, "registry");

    assert_eq!(
        core.handle_common(inform).await.unwrap_err(),
        ProtocolError::BeforeHello { kind: Kind::Inform }
    );
}

#[tokio::test]
async fn empty_dependency_is_fatal() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let drop = Message::new(Kind::NameDrop, None, Context::NIL, "");
    assert!(matches!(
        core.handle_common(drop).await,
        Err(ProtocolError::EmptyDependency { .. })
    ));
}

#[tokio::test]
async fn symbolic_dependency_is_looked_up_at_once() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let mut registry = Probe::new();
    subscribe(&mut core, &registry).await;
    let _put = registry.next().await;

    core.handle_common(Message::new(Kind::NameDrop, None, Context::NIL, "mysql"))
        .await
        .unwrap();

    let query = registry.next().await;
    assert_eq!(query.kind, Kind::GetRequest);
    assert_eq!(query.payload, "mysql");
    assert_eq!(core.dependencies().collect::<Vec<_>>(), vec!["mysql"]);
}

#[tokio::test]
async fn name_drop_adds_a_route_and_reports_the_edge() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let peer = name("zoneA", "mysql", Package::Store, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let mut registry = Probe::new();
    subscribe(&mut core, &registry).await;
    let _put = registry.next().await;
    let target = Probe::new();

    introduce(&mut core, &peer, &target.mb, 1).await;
    introduce(&mut core, &peer, &target.mb, 2).await;

    assert_eq!(core.routes().len(), 1);
    let edge = registry.next().await;
    assert_eq!(edge.kind, Kind::Inform);
    assert_eq!(edge.payload, format!("{me} {peer}"));
}

#[tokio::test]
async fn own_name_is_never_routed() {
    let me = name("zoneA", "mysql", Package::Store, 0);
    let (mut core, _parent) = named_core(&me, Package::Store).await;
    let own = core.mailbox().clone();
    introduce(&mut core, &me, &own, 1).await;
    assert!(core.routes().is_empty());
}

#[tokio::test]
async fn zone_local_package_ignores_other_zones() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let far = Probe::new();
    let near = Probe::new();

    introduce(&mut core, &name("zoneB", "mysql", Package::Store, 1), &far.mb, 1).await;
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 0), &near.mb, 1).await;

    assert_eq!(core.routes().len(), 1);
    assert!(core.routes().iter().all(|r| r.name.zone() == "zoneA"));
}

#[tokio::test]
async fn cross_zone_package_accepts_other_zones() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let far = Probe::new();
    introduce(&mut core, &name("zoneB", "mysql", Package::Store, 1), &far.mb, 1).await;
    assert_eq!(core.routes().len(), 1);
}

#[tokio::test]
async fn introduction_older_than_forget_is_rejected() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let peer = name("zoneA", "mysql", Package::Store, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let target = Probe::new();

    introduce(&mut core, &peer, &target.mb, 5).await;
    let forget = Message::new(Kind::Forget, None, Context::NIL, peer.as_str())
        .stamped(Timestamp::from_nanos(10));
    core.handle_common(forget).await.unwrap();
    assert!(core.routes().is_empty());

    introduce(&mut core, &peer, &target.mb, 7).await;
    assert!(core.routes().is_empty(), "stale introduction must not resurrect the peer");

    introduce(&mut core, &peer, &target.mb, 15).await;
    assert_eq!(core.routes().len(), 1);
}

#[tokio::test]
async fn forget_is_reported_as_edge_retraction() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let peer = name("zoneA", "mysql", Package::Store, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let mut registry = Probe::new();
    subscribe(&mut core, &registry).await;
    let target = Probe::new();
    introduce(&mut core, &peer, &target.mb, 1).await;
    let _put = registry.next().await;
    let _edge = registry.next().await;

    core.handle_common(Message::new(Kind::Forget, None, Context::NIL, peer.as_str()))
        .await
        .unwrap();

    let retraction = registry.next().await;
    assert_eq!(retraction.kind, Kind::Forget);
    assert_eq!(retraction.payload, format!("{me} {peer}"));
}

// ============================================================================
// Request relay
// ============================================================================

#[tokio::test]
async fn get_request_goes_one_hop_deeper_and_the_answer_comes_back() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let mut target = Probe::new();
    let mut upstream = Probe::new();
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 0), &target.mb, 1).await;
    let root = root();

    core.handle_common(Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root, "why?"))
        .await
        .unwrap();
    let relayed = target.next().await;
    assert_eq!(relayed.ctx.trace, root.trace);
    assert_eq!(relayed.ctx.parent, root.span);
    assert_eq!(core.pending_count(), 1);

    let response = Message::new(Kind::GetResponse, Some(target.mb.clone()), relayed.ctx, "because...");
    core.handle_common(response.clone()).await.unwrap();
    let answer = upstream.next().await;
    assert_eq!(answer.kind, Kind::GetResponse);
    assert_eq!(answer.ctx, root);
    assert_eq!(answer.payload, "because...");

    // A duplicate response finds nothing pending and is dropped.
    core.handle_common(response).await.unwrap();
    assert_eq!(core.pending_count(), 0);
}

#[tokio::test]
async fn get_request_without_reply_to_is_fatal() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    let msg = Message::new(Kind::GetRequest, None, root(), "why?");
    assert!(matches!(
        core.handle_common(msg).await,
        Err(ProtocolError::MissingReplyTo { kind: Kind::GetRequest, .. })
    ));
}

#[tokio::test]
async fn gold_coins_accumulate() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, _parent) = named_core(&me, Package::Karyon).await;
    for payload in ["3", "4", "lots"] {
        core.handle_common(Message::new(Kind::GoldCoin, None, Context::NIL, payload))
            .await
            .unwrap();
    }
    assert_eq!(core.gold(), 7);
}

#[tokio::test]
async fn goodbye_deletes_then_acknowledges() {
    let me = name("zoneA", "signup", Package::Karyon, 0);
    let (mut core, mut parent) = named_core(&me, Package::Karyon).await;
    let mut registry = Probe::new();
    subscribe(&mut core, &registry).await;
    let _put = registry.next().await;

    let control = core
        .handle_common(Message::new(Kind::Goodbye, Some(parent.mb.clone()), Context::NIL, "shutdown"))
        .await
        .unwrap();
    assert_eq!(control, Control::Stop);

    let delete = registry.next().await;
    assert_eq!(delete.kind, Kind::Delete);
    assert_eq!(delete.payload, me.as_str());
    let ack = parent.next().await;
    assert_eq!(ack.kind, Kind::Goodbye);
    assert_eq!(ack.payload, me.as_str());
}

// ============================================================================
// Services
// ============================================================================

#[tokio::test]
async fn store_answers_seeded_and_written_keys() {
    let me = name("zoneA", "mysql", Package::Store, 0);
    let (mut core, _parent) = named_core(&me, Package::Store).await;
    let mut store = Store::seeded();
    let mut upstream = Probe::new();
    let ctx = root();

    store
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), ctx, "why?"))
        .await
        .unwrap();
    assert_eq!(upstream.next().await.payload, "because...");

    store
        .handle(&mut core, Message::new(Kind::Put, None, ctx, "why1 me"))
        .await
        .unwrap();
    store
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), ctx, "why1"))
        .await
        .unwrap();
    let answer = upstream.next().await;
    assert_eq!(answer.payload, "me");
    assert_eq!(answer.ctx, ctx);

    store
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), ctx, "nothing"))
        .await
        .unwrap();
    assert_eq!(upstream.next().await.payload, "");
}

#[tokio::test]
async fn store_copies_writes_to_same_package_peers() {
    let me = name("zoneA", "mysql", Package::Store, 0);
    let (mut core, _parent) = named_core(&me, Package::Store).await;
    let mut peer = Probe::new();
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 1), &peer.mb, 1).await;
    let mut store = Store::seeded();

    store
        .handle(&mut core, Message::new(Kind::Put, None, root(), "k v"))
        .await
        .unwrap();
    let copy = peer.next().await;
    assert_eq!(copy.kind, Kind::Replicate);
    assert_eq!(copy.payload, "k v");
    assert_eq!(store.get("k"), Some("v"));
}

#[tokio::test]
async fn layer_falls_through_misses_to_the_next_tier() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let mut cache = Probe::new();
    let mut store = Probe::new();
    let mut upstream = Probe::new();
    introduce(&mut core, &name("zoneA", "evcache", Package::Cache, 0), &cache.mb, 1).await;
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 0), &store.mb, 1).await;
    let root = root();
    let mut layer = Layer;

    layer
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root, "k"))
        .await
        .unwrap();
    let first = cache.next().await;
    assert_eq!(first.ctx.parent, root.span);

    layer
        .handle(&mut core, Message::new(Kind::GetResponse, Some(cache.mb.clone()), first.ctx, ""))
        .await
        .unwrap();
    let second = store.next().await;
    assert_eq!(second.kind, Kind::GetRequest);
    assert_eq!(second.payload, "k");
    assert_eq!(second.ctx.route(), first.ctx.route(), "retries share the route key");

    layer
        .handle(&mut core, Message::new(Kind::GetResponse, Some(store.mb.clone()), second.ctx, "v"))
        .await
        .unwrap();
    let answer = upstream.next().await;
    assert_eq!(answer.ctx, root);
    assert_eq!(answer.payload, "v");
    assert_eq!(core.pending_count(), 0);
}

#[tokio::test]
async fn layer_answers_empty_when_every_tier_misses() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let mut cache = Probe::new();
    let mut upstream = Probe::new();
    introduce(&mut core, &name("zoneA", "evcache", Package::Cache, 0), &cache.mb, 1).await;
    let root = root();
    let mut layer = Layer;

    layer
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root, "k"))
        .await
        .unwrap();
    let first = cache.next().await;
    layer
        .handle(&mut core, Message::new(Kind::GetResponse, None, first.ctx, ""))
        .await
        .unwrap();

    let answer = upstream.next().await;
    assert_eq!(answer.payload, "");
    assert_eq!(answer.ctx, root);
    assert_eq!(core.pending_count(), 0);
}

#[tokio::test]
async fn layer_with_no_tiers_answers_at_once() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let mut upstream = Probe::new();
    Layer
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root(), "k"))
        .await
        .unwrap();
    assert_eq!(upstream.next().await.payload, "");
}

#[tokio::test]
async fn layer_without_cache_asks_the_cluster_before_the_store() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let mut cluster = Probe::new();
    let mut store = Probe::new();
    let mut upstream = Probe::new();
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 0), &store.mb, 1).await;
    introduce(&mut core, &name("zoneA", "cass", Package::PriamCassandra, 0), &cluster.mb, 1).await;
    let root = root();
    let mut layer = Layer;

    layer
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root, "k"))
        .await
        .unwrap();
    let first = cluster.next().await;
    assert_eq!(first.kind, Kind::GetRequest);
    assert!(store.stays_quiet().await, "store asked before the cluster missed");

    layer
        .handle(&mut core, Message::new(Kind::GetResponse, Some(cluster.mb.clone()), first.ctx, ""))
        .await
        .unwrap();
    let second = store.next().await;
    assert_eq!(second.payload, "k");
    assert_eq!(second.ctx.route(), first.ctx.route());

    layer
        .handle(&mut core, Message::new(Kind::GetResponse, Some(store.mb.clone()), second.ctx, "v"))
        .await
        .unwrap();
    assert_eq!(upstream.next().await.payload, "v");
    assert!(cluster.stays_quiet().await);
}

#[tokio::test]
async fn layer_cluster_hit_never_reaches_the_store() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let mut cluster = Probe::new();
    let mut store = Probe::new();
    let mut upstream = Probe::new();
    introduce(&mut core, &name("zoneA", "cass", Package::PriamCassandra, 0), &cluster.mb, 1).await;
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 0), &store.mb, 1).await;
    let mut layer = Layer;

    layer
        .handle(&mut core, Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root(), "k"))
        .await
        .unwrap();
    let first = cluster.next().await;
    layer
        .handle(&mut core, Message::new(Kind::GetResponse, Some(cluster.mb.clone()), first.ctx, "v"))
        .await
        .unwrap();

    assert_eq!(upstream.next().await.payload, "v");
    assert!(store.stays_quiet().await);
    assert_eq!(core.pending_count(), 0);
}

#[tokio::test]
async fn layer_writes_reach_one_node_of_every_tier() {
    let me = name("zoneA", "turtle-staash", Package::Staash, 0);
    let (mut core, _parent) = named_core(&me, Package::Staash).await;
    let mut cache = Probe::new();
    let mut volume = Probe::new();
    let mut cassandra = Probe::new();
    let mut riak = Probe::new();
    let mut store = Probe::new();
    let mut further = Probe::new();
    introduce(&mut core, &name("zoneA", "evcache", Package::Cache, 0), &cache.mb, 1).await;
    introduce(&mut core, &name("zoneA", "s3", Package::Volume, 0), &volume.mb, 1).await;
    introduce(&mut core, &name("zoneA", "cass", Package::PriamCassandra, 0), &cassandra.mb, 1).await;
    introduce(&mut core, &name("zoneA", "bucket", Package::Riak, 0), &riak.mb, 1).await;
    introduce(&mut core, &name("zoneA", "mysql", Package::Store, 0), &store.mb, 1).await;
    introduce(&mut core, &name("zoneA", "archive-staash", Package::Staash, 0), &further.mb, 1).await;

    Layer
        .handle(&mut core, Message::new(Kind::Put, None, root(), "k v"))
        .await
        .unwrap();

    for probe in [&mut cache, &mut store, &mut further] {
        let put = probe.next().await;
        assert_eq!(put.kind, Kind::Put);
        assert_eq!(put.payload, "k v");
    }
    let namespaced = volume.next().await;
    assert_eq!(namespaced.payload, format!("{}/k v", me.instance()));

    // Both ring packages form one cluster tier, so only one of them is written.
    let cassandra_quiet = cassandra.stays_quiet().await;
    let riak_quiet = riak.stays_quiet().await;
    assert!(cassandra_quiet != riak_quiet, "exactly one cluster node is written");
}

#[tokio::test]
async fn cluster_forwards_to_the_owner_unchanged() {
    let me = name("zoneA", "cass", Package::PriamCassandra, 0);
    let other = name("zoneA", "cass", Package::PriamCassandra, 1);
    let ring = Arc::new(Ring::distribute([me.as_str(), other.as_str()]).unwrap());
    let remote_key = (0..)
        .map(|i| format!("k{i}"))
        .find(|k| ring.owner_of(k) == Some(other.as_str()))
        .unwrap();
    let local_key = (0..)
        .map(|i| format!("k{i}"))
        .find(|k| ring.owner_of(k) == Some(me.as_str()))
        .unwrap();

    let (mut core, _parent) = named_core(&me, Package::PriamCassandra).await;
    let mut owner = Probe::new();
    let mut upstream = Probe::new();
    introduce(&mut core, &other, &owner.mb, 1).await;
    let mut cluster = Cluster::new(ring);
    let root = root();

    cluster
        .handle(
            &mut core,
            Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root, remote_key.as_str()),
        )
        .await
        .unwrap();
    let forwarded = owner.next().await;
    assert_eq!(forwarded.ctx, root);
    assert_eq!(forwarded.reply_to.as_ref(), Some(&upstream.mb));
    assert_eq!(forwarded.payload, remote_key);

    cluster
        .handle(
            &mut core,
            Message::new(Kind::GetRequest, Some(upstream.mb.clone()), root, local_key.as_str()),
        )
        .await
        .unwrap();
    let answer = upstream.next().await;
    assert_eq!(answer.kind, Kind::GetResponse);
    assert_eq!(answer.ctx, root);
}

#[tokio::test]
async fn cluster_replicates_writes_to_other_zones() {
    let me = name("zoneA", "cass", Package::PriamCassandra, 0);
    let (mut core, _parent) = named_core(&me, Package::PriamCassandra).await;
    let mut zone_b = Probe::new();
    introduce(&mut core, &name("zoneB", "cass", Package::PriamCassandra, 1), &zone_b.mb, 1).await;
    let mut cluster = Cluster::new(Arc::new(Ring::distribute([me.as_str()]).unwrap()));

    cluster
        .handle(&mut core, Message::new(Kind::Put, None, root(), "k v"))
        .await
        .unwrap();

    assert_eq!(cluster.get("k"), Some("v"));
    let copy = zone_b.next().await;
    assert_eq!(copy.kind, Kind::Replicate);
    assert_eq!(copy.payload, "k v");
}
