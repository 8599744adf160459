//! Topology logger.
//!
//! Registries forward every topology fact to a single logger actor, which
//! removes duplicates (one node announces itself to several registries) and
//! hands each distinct change to a [`TopologySink`].

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, PoisonError};

use meshsim_types::{Context, Kind, ServiceName, Timestamp};

use crate::error::ProtocolError;
use crate::mailbox::{Inbox, Message};

/// One distinct change to the simulated topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    NodeAnnounced {
        name: ServiceName,
        at: Timestamp,
    },
    EdgeAnnounced {
        from: ServiceName,
        to: ServiceName,
        at: Timestamp,
    },
    EdgeForgotten {
        from: ServiceName,
        to: ServiceName,
        at: Timestamp,
    },
    NodeDeparted {
        name: ServiceName,
        at: Timestamp,
    },
}

impl Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyEvent::NodeAnnounced { name, .. } => write!(f, "+node {name}"),
            TopologyEvent::EdgeAnnounced { from, to, .. } => write!(f, "+edge {from} {to}"),
            TopologyEvent::EdgeForgotten { from, to, .. } => write!(f, "-edge {from} {to}"),
            TopologyEvent::NodeDeparted { name, .. } => write!(f, "-node {name}"),
        }
    }
}

/// Destination for topology events.
pub trait TopologySink: Send {
    fn record(&mut self, event: &TopologyEvent);

    /// Called once when the logger shuts down.
    fn finish(&mut self) {}
}

/// Writes every event to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink {
    count: usize,
}

impl TopologySink for LogSink {
    fn record(&mut self, event: &TopologyEvent) {
        self.count += 1;
        tracing::debug!(target: "meshsim::topology", "{event}");
    }

    fn finish(&mut self) {
        tracing::info!(target: "meshsim::topology", events = self.count, "topology closed");
    }
}

/// Keeps events in memory behind a shared handle, for inspection after a run.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TopologyEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TopologyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TopologySink for MemorySink {
    fn record(&mut self, event: &TopologyEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

// ============================================================================
// Logger
// ============================================================================

/// Deduplicating collector of topology facts.
pub struct TopologyLogger {
    name: String,
    nodes: HashSet<ServiceName>,
    departed: HashSet<ServiceName>,
    edges: HashSet<(ServiceName, ServiceName)>,
    sink: Box<dyn TopologySink>,
}

impl TopologyLogger {
    pub fn new(name: impl Into<String>, sink: Box<dyn TopologySink>) -> Self {
        Self {
            name: name.into(),
            nodes: HashSet::new(),
            departed: HashSet::new(),
            edges: HashSet::new(),
            sink,
        }
    }

    fn parse(&self, name: &str) -> Result<ServiceName, ProtocolError> {
        ServiceName::parse(name).map_err(|source| ProtocolError::InvalidName {
            actor: self.name.clone(),
            source,
        })
    }

    fn parse_edge(&self, payload: &str) -> Result<(ServiceName, ServiceName), ProtocolError> {
        let (from, to) = payload.trim().split_once(' ').unwrap_or((payload, ""));
        Ok((self.parse(from)?, self.parse(to.trim())?))
    }

    /// Turns a forwarded fact into an event, or `None` for a duplicate.
    pub fn observe(&mut self, msg: &Message) -> Result<Option<TopologyEvent>, ProtocolError> {
        let at = msg.sent_at;
        let event = match msg.kind {
            Kind::Put => {
                let name = self.parse(&msg.payload)?;
                self.nodes
                    .insert(name.clone())
                    .then_some(TopologyEvent::NodeAnnounced { name, at })
            }
            Kind::Inform => {
                let (from, to) = self.parse_edge(&msg.payload)?;
                self.edges
                    .insert((from.clone(), to.clone()))
                    .then_some(TopologyEvent::EdgeAnnounced { from, to, at })
            }
            Kind::Forget => {
                let (from, to) = self.parse_edge(&msg.payload)?;
                self.edges
                    .remove(&(from.clone(), to.clone()))
                    .then_some(TopologyEvent::EdgeForgotten { from, to, at })
            }
            Kind::Delete => {
                let name = self.parse(&msg.payload)?;
                (self.nodes.contains(&name) && self.departed.insert(name.clone()))
                    .then_some(TopologyEvent::NodeDeparted { name, at })
            }
            _ => None,
        };
        Ok(event)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Runs until `Goodbye`, draining whatever is queued before acknowledging.
    pub async fn run(mut self, mut inbox: Inbox) -> Result<(), ProtocolError> {
        let mut goodbye = None;
        while let Some(msg) = inbox.recv().await {
            if msg.kind == Kind::Goodbye {
                inbox.close();
                goodbye = Some(msg);
                continue;
            }
            if let Some(event) = self.observe(&msg)? {
                self.sink.record(&event);
            }
        }
        self.sink.finish();
        tracing::debug!(
            logger = %self.name,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            departed = self.departed.len(),
            "topology logger closed"
        );
        if let Some(reply_to) = goodbye.and_then(|msg| msg.reply_to) {
            reply_to.go_send(Message::new(Kind::Goodbye, None, Context::NIL, self.name.as_str()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: usize) -> ServiceName {
        ServiceName::make("test", "us-east-1", "zoneA", "mysql", "store", i)
    }

    fn msg(kind: Kind, payload: String) -> Message {
        Message::new(kind, None, Context::NIL, payload)
    }

    #[test]
    fn duplicate_announcements_are_dropped() {
        let sink = MemorySink::new();
        let mut logger = TopologyLogger::new("edda", Box::new(sink));
        let put = msg(Kind::Put, node(0).to_string());

        assert!(logger.observe(&put).unwrap().is_some());
        assert!(logger.observe(&put).unwrap().is_none());
        assert_eq!(logger.node_count(), 1);
    }

    #[test]
    fn edges_can_be_forgotten_and_announced_again() {
        let mut logger = TopologyLogger::new("edda", Box::new(LogSink::default()));
        let edge = format!("{} {}", node(0), node(1));

        assert!(matches!(
            logger.observe(&msg(Kind::Inform, edge.clone())).unwrap(),
            Some(TopologyEvent::EdgeAnnounced { .. })
        ));
        assert!(matches!(
            logger.observe(&msg(Kind::Forget, edge.clone())).unwrap(),
            Some(TopologyEvent::EdgeForgotten { .. })
        ));
        assert!(logger.observe(&msg(Kind::Forget, edge.clone())).unwrap().is_none());
        assert!(logger.observe(&msg(Kind::Inform, edge)).unwrap().is_some());
    }

    #[test]
    fn departure_of_an_unknown_node_is_ignored() {
        let mut logger = TopologyLogger::new("edda", Box::new(LogSink::default()));
        assert!(logger.observe(&msg(Kind::Delete, node(3).to_string())).unwrap().is_none());

        logger.observe(&msg(Kind::Put, node(3).to_string())).unwrap();
        assert!(logger.observe(&msg(Kind::Delete, node(3).to_string())).unwrap().is_some());
        assert!(logger.observe(&msg(Kind::Delete, node(3).to_string())).unwrap().is_none());
    }

    #[test]
    fn malformed_edge_is_fatal() {
        let mut logger = TopologyLogger::new("edda", Box::new(LogSink::default()));
        assert!(logger.observe(&msg(Kind::Inform, "onlyone".to_string())).is_err());
    }

    #[tokio::test]
    async fn run_drains_then_acknowledges() {
        use crate::mailbox::{MailboxRole, mailbox};

        let sink = MemorySink::new();
        let (mb, inbox) = mailbox(MailboxRole::FanIn(8));
        let (parent, mut parent_inbox) = mailbox(MailboxRole::FanIn(8));
        let task = tokio::spawn(TopologyLogger::new("edda", Box::new(sink.clone())).run(inbox));

        mb.send(msg(Kind::Put, node(0).to_string())).await.unwrap();
        mb.send(Message::new(Kind::Goodbye, Some(parent), Context::NIL, "shutdown"))
            .await
            .unwrap();

        let ack = parent_inbox.recv().await.unwrap();
        assert_eq!(ack.kind, Kind::Goodbye);
        assert_eq!(ack.payload, "edda");
        task.await.unwrap().unwrap();
        assert_eq!(sink.events().len(), 1);
    }
}
