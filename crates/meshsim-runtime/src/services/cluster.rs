//! Partitioned cluster nodes.
//!
//! Every node of a region-zone shares one token ring. A read or write for a
//! key the node does not own is forwarded unchanged to the owner, so the
//! owner answers the original caller directly. Writes are then copied to
//! one node in each other zone of the region and one node in each other
//! active region. A copy arriving from another region is passed on once to
//! the other zones here, and never further.

use std::collections::HashMap;
use std::sync::Arc;

use meshsim_ring::Ring;
use meshsim_types::{Context, Kind, ServiceName};

use super::client::SEED_KEY;
use super::split_put;
use crate::actor::{ActorCore, Control, Service};
use crate::error::ProtocolError;
use crate::mailbox::{Mailbox, Message};

#[derive(Debug, Clone)]
pub struct Cluster {
    ring: Arc<Ring>,
    data: HashMap<String, String>,
}

impl Cluster {
    pub fn new(ring: Arc<Ring>) -> Self {
        let mut data = HashMap::new();
        data.insert(SEED_KEY.to_string(), "because...".to_string());
        Self { ring, data }
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Mailbox of the key's owner when that is a known peer.
    ///
    /// `None` means handle locally: the ring is empty, this node owns the
    /// key, or the owner has not been discovered yet.
    fn owner(&self, core: &ActorCore, key: &str) -> Option<Mailbox> {
        let owner = self.ring.owner_of(key)?;
        if core.name().is_some_and(|me| me.as_str() == owner) {
            return None;
        }
        core.routes().named(owner).cloned()
    }

    /// Copies a write to one peer in each other zone of this region, and
    /// optionally one peer in each other active region.
    fn replicate(&self, core: &mut ActorCore, upstream: Context, payload: &str, cross_region: bool) {
        let Some(me) = core.name().cloned() else {
            return;
        };
        let env = Arc::clone(core.env());
        let same_service = |n: &ServiceName| n.service() == me.service();

        let mut targets = Vec::new();
        for zone in me.other_zones(&env.settings.zone_names) {
            if let Some(r) = core
                .routes()
                .find(|n| same_service(n) && n.region() == me.region() && n.zone() == zone)
            {
                targets.push(r.mailbox.clone());
            }
        }
        if cross_region {
            for region in me.other_regions(env.settings.active_regions()) {
                if let Some(r) = core.routes().find(|n| same_service(n) && n.region() == region) {
                    targets.push(r.mailbox.clone());
                }
            }
        }

        let mut ctx = core.new_parent(upstream);
        for (i, target) in targets.iter().enumerate() {
            if i > 0 {
                ctx = core.new_span(ctx);
            }
            core.tell(target, core.message(Kind::Replicate, ctx, payload));
        }
    }
}

impl Service for Cluster {
    async fn handle(&mut self, core: &mut ActorCore, msg: Message) -> Result<Control, ProtocolError> {
        match msg.kind {
            Kind::GetRequest => {
                let key = msg.payload.trim().to_string();
                if let Some(owner) = self.owner(core, &key) {
                    core.tell(&owner, msg);
                } else {
                    let reply_to = core.require_reply_to(&msg)?;
                    let value = self.get(&key).unwrap_or_default();
                    core.tell(&reply_to, core.message(Kind::GetResponse, msg.ctx, value));
                }
            }
            Kind::Put => {
                let Some((key, value)) = split_put(&msg.payload) else {
                    return Ok(Control::Continue);
                };
                if let Some(owner) = self.owner(core, key) {
                    core.tell(&owner, msg);
                } else {
                    self.data.insert(key.to_string(), value.to_string());
                    self.replicate(core, msg.ctx, &msg.payload, true);
                }
            }
            Kind::Replicate => {
                let Some((key, value)) = split_put(&msg.payload) else {
                    return Ok(Control::Continue);
                };
                if let Some(owner) = self.owner(core, key) {
                    core.tell(&owner, msg);
                    return Ok(Control::Continue);
                }
                self.data.insert(key.to_string(), value.to_string());

                let from_other_region = match (&msg.reply_to, core.name()) {
                    (Some(sender), Some(me)) => core
                        .routes()
                        .name_of(sender)
                        .is_some_and(|from| from.region() != me.region()),
                    _ => false,
                };
                if from_other_region {
                    self.replicate(core, msg.ctx, &msg.payload, false);
                }
            }
            _ => return core.handle_common(msg).await,
        }
        Ok(Control::Continue)
    }
}
