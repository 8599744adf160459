//! Causal trace context.
//!
//! A [`Context`] ties the messages of one logical request together. It is a
//! plain `Copy` value: forwarding a request one hop deeper derives a new
//! context with [`Context::new_parent`], fanning out derives siblings with
//! [`Context::new_span`]. Neither mutates the original.
//!
//! Span ids come from a per-actor [`SpanIssuer`]. Each issuer owns a distinct
//! origin tag in the upper bits of every id it hands out, so two actors can
//! derive contexts concurrently without a shared counter and still never
//! collide.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Bits reserved for the per-issuer sequence number.
const SEQUENCE_BITS: u32 = 40;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Identifies one request flow. Zero means "no trace".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TraceId(u64);

impl TraceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one step of a request flow. Zero means "no span" (a root's parent).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SpanId(u64);

impl SpanId {
    pub const NONE: SpanId = SpanId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SpanIssuer
// ============================================================================

/// Hands out ids that are unique across every issuer with a distinct origin.
///
/// **Bit Layout**:
/// - Upper 24 bits: origin tag (one per actor)
/// - Lower 40 bits: sequence number, starting at 1
#[derive(Debug, Clone)]
pub struct SpanIssuer {
    origin: u64,
    next: u64,
}

impl SpanIssuer {
    /// Creates an issuer for the given origin tag.
    ///
    /// Origins must be unique among concurrently live issuers; the runtime
    /// uses the actor's mailbox id.
    pub fn new(origin: u64) -> Self {
        Self {
            origin: origin << SEQUENCE_BITS,
            next: 1,
        }
    }

    fn issue(&mut self) -> u64 {
        debug_assert!(self.next <= SEQUENCE_MASK, "span sequence exhausted");
        let id = self.origin | (self.next & SEQUENCE_MASK);
        self.next += 1;
        id
    }
}

// ============================================================================
// Context
// ============================================================================

/// The `(trace, parent)` pair used to match a response to its request.
///
/// Every retry of one upstream request derives its context from the same
/// parent span, so all of them share a route key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub trace: TraceId,
    pub parent: SpanId,
}

/// Causal identity of a message: which flow, which caller, which step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Context {
    pub trace: TraceId,
    pub parent: SpanId,
    pub span: SpanId,
}

impl Context {
    /// The context carried by messages that are not part of any request flow.
    pub const NIL: Context = Context {
        trace: TraceId(0),
        parent: SpanId(0),
        span: SpanId(0),
    };

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Starts a new flow with a root span.
    pub fn new_trace(issuer: &mut SpanIssuer) -> Self {
        let id = issuer.issue();
        Self {
            trace: TraceId(id),
            parent: SpanId::NONE,
            span: SpanId(id),
        }
    }

    /// One hop deeper: the current span becomes the parent of a fresh span.
    ///
    /// Deriving from [`Context::NIL`] stays nil.
    pub fn new_parent(&self, issuer: &mut SpanIssuer) -> Self {
        if self.is_nil() {
            return Self::NIL;
        }
        Self {
            trace: self.trace,
            parent: self.span,
            span: SpanId(issuer.issue()),
        }
    }

    /// A sibling of this span under the same parent, for fan-out.
    ///
    /// Deriving from [`Context::NIL`] stays nil.
    pub fn new_span(&self, issuer: &mut SpanIssuer) -> Self {
        if self.is_nil() {
            return Self::NIL;
        }
        Self {
            trace: self.trace,
            parent: self.parent,
            span: SpanId(issuer.issue()),
        }
    }

    pub fn route(&self) -> RouteKey {
        RouteKey {
            trace: self.trace,
            parent: self.parent,
        }
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}p{}s{}", self.trace, self.parent, self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_context_renders_all_zero() {
        assert!(Context::NIL.is_nil());
        assert_eq!(Context::NIL.to_string(), "t0p0s0");
    }

    #[test]
    fn new_trace_is_a_root() {
        let mut issuer = SpanIssuer::new(3);
        let ctx = Context::new_trace(&mut issuer);
        assert!(!ctx.is_nil());
        assert_eq!(ctx.parent, SpanId::NONE);
        assert_eq!(ctx.trace.as_u64(), ctx.span.as_u64());
    }

    #[test]
    fn new_parent_links_to_the_current_span() {
        let mut issuer = SpanIssuer::new(1);
        let root = Context::new_trace(&mut issuer);
        let child = root.new_parent(&mut issuer);

        assert_eq!(child.trace, root.trace);
        assert_eq!(child.parent, root.span);
        assert_ne!(child.span, root.span);
    }

    #[test]
    fn new_span_is_a_sibling() {
        let mut issuer = SpanIssuer::new(1);
        let root = Context::new_trace(&mut issuer);
        let first = root.new_parent(&mut issuer);
        let second = first.new_span(&mut issuer);

        assert_eq!(second.parent, first.parent);
        assert_eq!(second.route(), first.route());
        assert_ne!(second.span, first.span);
    }

    #[test]
    fn derivations_from_nil_stay_nil() {
        let mut issuer = SpanIssuer::new(1);
        assert!(Context::NIL.new_parent(&mut issuer).is_nil());
        assert!(Context::NIL.new_span(&mut issuer).is_nil());
    }

    #[test]
    fn issuers_with_distinct_origins_never_collide() {
        let mut a = SpanIssuer::new(1);
        let mut b = SpanIssuer::new(2);
        let root = Context::new_trace(&mut a);

        let from_a = root.new_parent(&mut a);
        let from_b = root.new_parent(&mut b);
        assert_eq!(from_a.parent, from_b.parent);
        assert_ne!(from_a.span, from_b.span);
    }
}
