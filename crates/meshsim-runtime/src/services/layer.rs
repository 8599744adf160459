//! Storage access layer with cascading reads.

use meshsim_types::{Context, Kind, RouteKey};

use super::split_put;
use crate::actor::{ActorCore, Control, Pending, Service};
use crate::error::ProtocolError;
use crate::fallback::{LookupState, Tier};
use crate::mailbox::{Mailbox, Message};

/// Reads walk the tiers cache → volume → cluster → store → layer until one
/// answers with a value; writes go to one node of every tier, further
/// layers included.
#[derive(Debug, Clone, Copy, Default)]
pub struct Layer;

impl Layer {
    /// Asks the next available tier after `state`, or answers empty when
    /// none is left.
    fn advance(core: &mut ActorCore, upstream: &Mailbox, ctx: Context, key: &str, state: LookupState) {
        let next = state.next(|tier| core.routes().has_any(tier.packages()));
        let target = next.and_then(|tier| core.pick(tier.packages()).map(|mb| (tier, mb)));
        match target {
            Some((tier, mailbox)) => {
                let out = core.issue_get(&mailbox, ctx, key);
                core.track(
                    out.route(),
                    Pending {
                        reply_to: Some(upstream.clone()),
                        ctx,
                        key: key.to_string(),
                        state: tier.state(),
                    },
                );
            }
            None => {
                // Every read issued for this upstream shares one route key.
                core.untrack(&RouteKey {
                    trace: ctx.trace,
                    parent: ctx.span,
                });
                core.tell(upstream, core.message(Kind::GetResponse, ctx, ""));
            }
        }
    }

    fn on_response(core: &mut ActorCore, msg: Message) {
        let key = msg.ctx.route();
        let Some(pending) = core.pending(&key).cloned() else {
            tracing::trace!(actor = %core.label(), ctx = %msg.ctx, "stale response dropped");
            return;
        };
        let Some(upstream) = pending.reply_to else {
            core.untrack(&key);
            return;
        };
        if msg.payload.is_empty() {
            tracing::trace!(actor = %core.label(), key = %pending.key, state = ?pending.state, "miss");
            Self::advance(core, &upstream, pending.ctx, &pending.key, pending.state);
        } else {
            core.untrack(&key);
            core.tell(&upstream, core.message(Kind::GetResponse, pending.ctx, msg.payload));
        }
    }

    fn write_through(core: &mut ActorCore, msg: &Message) {
        let Some((key, value)) = split_put(&msg.payload) else {
            return;
        };
        let instance = core.name().map(|n| n.instance().to_string()).unwrap_or_default();

        // One node per tier; volumes namespace the key by writer instance.
        let mut writes: Vec<(Mailbox, String)> = Vec::new();
        for tier in Tier::ORDER {
            let Some(target) = core.pick(tier.packages()) else {
                continue;
            };
            let payload = match tier {
                Tier::Volume => format!("{instance}/{key} {value}"),
                _ => msg.payload.clone(),
            };
            writes.push((target, payload));
        }

        let mut ctx = core.new_parent(msg.ctx);
        for (i, (target, payload)) in writes.into_iter().enumerate() {
            if i > 0 {
                ctx = core.new_span(ctx);
            }
            core.tell(&target, core.message(Kind::Put, ctx, payload));
        }
    }
}

impl Service for Layer {
    async fn handle(&mut self, core: &mut ActorCore, msg: Message) -> Result<Control, ProtocolError> {
        match msg.kind {
            Kind::GetRequest => {
                let upstream = core.require_reply_to(&msg)?;
                Self::advance(core, &upstream, msg.ctx, msg.payload.trim(), LookupState::NewRequest);
            }
            Kind::GetResponse => Self::on_response(core, msg),
            Kind::Put => Self::write_through(core, &msg),
            _ => return core.handle_common(msg).await,
        }
        Ok(Control::Continue)
    }
}
