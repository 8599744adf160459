//! meshsim-flow: request flow tracing
//!
//! Every actor annotates the tracer when it sends or receives a message that
//! carries a non-nil [`Context`]. Annotations accumulate per trace; when a
//! flow completes, [`FlowTracer::end`] extracts response, service and network
//! times from the four canonical direction tags.
//!
//! At shutdown the annotations are grouped into one [`SpanRecord`] per
//! `(trace, parent, span)` triple and written as a JSON array in the Zipkin
//! v1 span shape, ready to load into a trace viewer.
//!
//! The tracer is the only structure shared between actors, so its map sits
//! behind a mutex.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use meshsim_types::{Context, Kind, SpanId, Timestamp, TraceId};
use serde::{Deserialize, Serialize};

/// Errors that can occur while exporting flows.
#[derive(thiserror::Error, Debug)]
pub enum FlowError {
    #[error("failed to write flow export: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode flow export: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

// ============================================================================
// Annotations
// ============================================================================

/// Which side of a call an annotation was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "cs")]
    ClientSend,
    #[serde(rename = "sr")]
    ServerReceive,
    #[serde(rename = "ss")]
    ServerSend,
    #[serde(rename = "cr")]
    ClientReceive,
}

impl Direction {
    /// A send is a server send when it carries a response, a client send otherwise.
    pub fn of_send(kind: Kind) -> Self {
        if kind == Kind::GetResponse {
            Direction::ServerSend
        } else {
            Direction::ClientSend
        }
    }

    /// A receive is a client receive when it carries a response, a server receive otherwise.
    pub fn of_receive(kind: Kind) -> Self {
        if kind == Kind::GetResponse {
            Direction::ClientReceive
        } else {
            Direction::ServerReceive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientSend => "cs",
            Direction::ServerReceive => "sr",
            Direction::ServerSend => "ss",
            Direction::ClientReceive => "cr",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub ctx: Context,
    pub host: String,
    pub kind: Kind,
    pub payload: String,
    pub at: Timestamp,
    pub direction: Direction,
}

/// Durations measured for one completed flow.
///
/// A component is `None` when the annotations it needs were never recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowTimings {
    /// `client-receive − client-send`, measured at the client.
    pub response: Option<Duration>,
    /// `server-send − server-receive`, measured at the server.
    pub service: Option<Duration>,
    /// Both one-way gaps: `(server-receive − client-send) + (client-receive − server-send)`.
    pub network: Option<Duration>,
}

// ============================================================================
// FlowTracer
// ============================================================================

/// Shared collector of annotations, keyed by trace.
#[derive(Debug, Default)]
pub struct FlowTracer {
    flows: Mutex<HashMap<TraceId, Vec<Annotation>>>,
    completed: AtomicU64,
}

impl FlowTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn flows(&self) -> MutexGuard<'_, HashMap<TraceId, Vec<Annotation>>> {
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn annotate(
        &self,
        host: &str,
        kind: Kind,
        ctx: Context,
        payload: &str,
        at: Timestamp,
        direction: Direction,
    ) {
        if ctx.is_nil() {
            return;
        }
        self.flows().entry(ctx.trace).or_default().push(Annotation {
            ctx,
            host: host.to_string(),
            kind,
            payload: payload.to_string(),
            at,
            direction,
        });
    }

    /// Records a send by `host`.
    pub fn annotate_send(
        &self,
        host: &str,
        kind: Kind,
        ctx: Context,
        payload: &str,
        at: Timestamp,
    ) {
        self.annotate(host, kind, ctx, payload, at, Direction::of_send(kind));
    }

    /// Records a receive by `host`.
    pub fn annotate_receive(
        &self,
        host: &str,
        kind: Kind,
        ctx: Context,
        payload: &str,
        at: Timestamp,
    ) {
        self.annotate(host, kind, ctx, payload, at, Direction::of_receive(kind));
    }

    /// Completes a flow and returns its timings.
    ///
    /// Timings come from the root span only: the originating client's send
    /// and receive, and the first server's receive and send. Annotations stay
    /// in the tracer for export. Returns `None` for an unknown trace.
    pub fn end(&self, trace: TraceId) -> Option<FlowTimings> {
        let timings = {
            let flows = self.flows();
            let annotations = flows.get(&trace)?;
            timings_of(annotations)
        };
        self.completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%trace, ?timings, "flow complete");
        Some(timings)
    }

    /// Number of flows ended so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Number of distinct traces with at least one annotation.
    pub fn trace_count(&self) -> usize {
        self.flows().len()
    }

    /// A copy of the annotations recorded for one trace, in arrival order.
    pub fn annotations(&self, trace: TraceId) -> Vec<Annotation> {
        self.flows().get(&trace).cloned().unwrap_or_default()
    }

    /// Groups every annotation into span records, ordered by trace id, then
    /// span, then time.
    pub fn spans(&self) -> Vec<SpanRecord> {
        let flows = self.flows();
        let mut traces: Vec<&TraceId> = flows.keys().collect();
        traces.sort();
        traces
            .into_iter()
            .flat_map(|trace| span_records(&flows[trace]))
            .collect()
    }

    /// Writes every span as one JSON array, returning the number of spans.
    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<usize> {
        let spans = self.spans();
        serde_json::to_writer_pretty(&mut writer, &spans)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(spans.len())
    }

    /// Writes the span export to a file.
    pub fn write_json_file(&self, path: &Path) -> Result<usize> {
        let count = self.write_json(BufWriter::new(File::create(path)?))?;
        tracing::info!(path = %path.display(), spans = count, "flushed flows");
        Ok(count)
    }
}

fn timings_of(annotations: &[Annotation]) -> FlowTimings {
    // Only the root span describes the caller's round trip. A relay that
    // keeps the context records a second server receive, so the earliest
    // receive and the latest send are kept.
    let mut cs: Option<Timestamp> = None;
    let mut sr = None;
    let mut ss = None;
    let mut cr = None;
    for a in annotations.iter().filter(|a| a.ctx.parent == SpanId::NONE) {
        let (slot, earliest) = match a.direction {
            Direction::ClientSend => (&mut cs, true),
            Direction::ServerReceive => (&mut sr, true),
            Direction::ServerSend => (&mut ss, false),
            Direction::ClientReceive => (&mut cr, false),
        };
        *slot = Some(match *slot {
            Some(seen) if earliest => seen.min(a.at),
            Some(seen) => seen.max(a.at),
            None => a.at,
        });
    }

    let response = cs.zip(cr).map(|(cs, cr)| cr.since(cs));
    let service = sr.zip(ss).map(|(sr, ss)| ss.since(sr));
    let network = match (cs, sr, ss, cr) {
        (Some(cs), Some(sr), Some(ss), Some(cr)) => Some(sr.since(cs) + cr.since(ss)),
        _ => None,
    };
    FlowTimings {
        response,
        service,
        network,
    }
}

// ============================================================================
// Span export
// ============================================================================

/// Endpoint of an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "serviceName")]
    pub service_name: String,
}

/// One annotation in a span record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanAnnotation {
    pub endpoint: Endpoint,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub value: Direction,
}

/// One `(trace, parent, span)` step, in the Zipkin v1 JSON shape.
///
/// Ids are 16 lowercase hex digits. A root span has no `parentId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRecord {
    pub trace_id: String,
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub annotations: Vec<SpanAnnotation>,
}

fn hex_id(id: u64) -> String {
    format!("{id:016x}")
}

fn span_records(annotations: &[Annotation]) -> Vec<SpanRecord> {
    let mut sorted: Vec<&Annotation> = annotations.iter().collect();
    sorted.sort_by_key(|a| (a.ctx.span, a.ctx.parent, a.at));

    let mut records: Vec<SpanRecord> = Vec::new();
    let mut current: Option<Context> = None;
    for a in sorted {
        if current != Some(a.ctx) {
            let parent = a.ctx.parent.as_u64();
            records.push(SpanRecord {
                trace_id: hex_id(a.ctx.trace.as_u64()),
                name: a.kind.to_string(),
                id: hex_id(a.ctx.span.as_u64()),
                parent_id: (parent != 0).then(|| hex_id(parent)),
                annotations: Vec::new(),
            });
            current = Some(a.ctx);
        }
        if let Some(record) = records.last_mut() {
            record.annotations.push(SpanAnnotation {
                endpoint: Endpoint {
                    service_name: a.host.clone(),
                },
                timestamp: a.at.as_micros(),
                value: a.direction,
            });
        }
    }
    records
}
