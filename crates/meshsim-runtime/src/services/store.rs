//! Plain key/value tiers: caches, volumes and stores.

use std::collections::HashMap;

use meshsim_types::{Context, Kind};

use super::client::SEED_KEY;
use super::split_put;
use crate::actor::{ActorCore, Control, Service};
use crate::error::ProtocolError;
use crate::mailbox::Message;

/// In-memory map that answers reads and copies writes to same-package peers.
#[derive(Debug, Clone, Default)]
pub struct Store {
    data: HashMap<String, String>,
}

impl Store {
    /// A store holding the key every client reads first.
    pub fn seeded() -> Self {
        let mut data = HashMap::new();
        data.insert(SEED_KEY.to_string(), "because...".to_string());
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn replicate(&self, core: &mut ActorCore, upstream: Context, payload: &str) {
        let peers: Vec<_> = core
            .routes()
            .subset(&[core.package()])
            .map(|r| r.mailbox.clone())
            .collect();
        let mut ctx = core.new_parent(upstream);
        for (i, peer) in peers.iter().enumerate() {
            if i > 0 {
                ctx = core.new_span(ctx);
            }
            core.tell(peer, core.message(Kind::Replicate, ctx, payload));
        }
    }
}

impl Service for Store {
    async fn handle(&mut self, core: &mut ActorCore, msg: Message) -> Result<Control, ProtocolError> {
        match msg.kind {
            Kind::GetRequest => {
                let reply_to = core.require_reply_to(&msg)?;
                let value = self.get(msg.payload.trim()).unwrap_or_default();
                core.tell(&reply_to, core.message(Kind::GetResponse, msg.ctx, value));
            }
            Kind::Put => {
                if let Some((key, value)) = split_put(&msg.payload) {
                    self.data.insert(key.to_string(), value.to_string());
                    self.replicate(core, msg.ctx, &msg.payload);
                }
            }
            Kind::Replicate => {
                if let Some((key, value)) = split_put(&msg.payload) {
                    self.data.insert(key.to_string(), value.to_string());
                }
            }
            _ => return core.handle_common(msg).await,
        }
        Ok(Control::Continue)
    }
}
