//! Stateless tiers: load balancers, proxies, business logic and monoliths.

use crate::actor::{ActorCore, Control, Service};
use crate::error::ProtocolError;
use crate::mailbox::Message;

/// Relays every request to a random dependency and answers on the way back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forwarder;

impl Service for Forwarder {
    async fn handle(&mut self, core: &mut ActorCore, msg: Message) -> Result<Control, ProtocolError> {
        core.handle_common(msg).await
    }
}
