//! Root client that drives traffic into the architecture.

use meshsim_types::{Kind, chat_interval};
use rand::Rng;

use crate::actor::{ActorCore, Control, Pending, Service};
use crate::error::ProtocolError;
use crate::fallback::LookupState;
use crate::mailbox::Message;

/// Key every store is seeded with.
pub const SEED_KEY: &str = "why?";

/// Sends a mix of reads and writes on every chat tick.
///
/// Writes use keys `why<n><n²>`; reads pick one of the keys written so far,
/// or the seeded key.
#[derive(Debug, Clone, Default)]
pub struct Client {
    writes: u64,
}

impl Client {
    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn read_key<R: Rng>(&self, rng: &mut R) -> String {
        if self.writes == 0 || rng.gen_bool(0.5) {
            return SEED_KEY.to_string();
        }
        let q = rng.gen_range(0..self.writes);
        format!("why{q}{}", q * q)
    }
}

impl Service for Client {
    async fn handle(&mut self, core: &mut ActorCore, msg: Message) -> Result<Control, ProtocolError> {
        match msg.kind {
            Kind::Chat => {
                match chat_interval(&msg.payload) {
                    Some(period) => {
                        tracing::info!(actor = %core.label(), rate = %msg.payload, "traffic started");
                        core.start_chat(period);
                    }
                    None => {
                        tracing::warn!(actor = %core.label(), rate = %msg.payload, "chat rate out of range");
                    }
                }
                Ok(Control::Continue)
            }
            Kind::GetResponse => {
                if core.untrack(&msg.ctx.route()).is_some()
                    && let Some(tracer) = &core.env().tracer
                    && let Some(timings) = tracer.end(msg.ctx.trace)
                {
                    tracing::trace!(trace = %msg.ctx.trace, ?timings, value = %msg.payload, "read answered");
                }
                Ok(Control::Continue)
            }
            _ => core.handle_common(msg).await,
        }
    }

    async fn on_chat(&mut self, core: &mut ActorCore) -> Result<(), ProtocolError> {
        let Some(target) = core.random_route() else {
            return Ok(());
        };
        let ctx = core.new_trace();
        if core.rng().gen_range(0..3) < 2 {
            let key = self.read_key(core.rng());
            core.track(
                ctx.route(),
                Pending {
                    reply_to: None,
                    ctx,
                    key: key.clone(),
                    state: LookupState::NewRequest,
                },
            );
            core.tell(&target, core.message(Kind::GetRequest, ctx, key));
        } else {
            let w = self.writes;
            self.writes += 1;
            core.tell(&target, core.message(Kind::Put, ctx, format!("why{w}{} me", w * w)));
        }
        Ok(())
    }
}
