//! Replicated service registry.
//!
//! Each registry holds a name → mailbox table for the nodes that announced
//! themselves to it. Registries of one region are peered: a first
//! registration is copied to every peer with `Replicate`, which is never
//! copied further.
//!
//! Reads come in two shapes:
//! - an exact name returns that entry's current state, always;
//! - a service type returns only the entries that changed since this
//!   requester last asked this question, so steady-state polls are empty.
//!
//! Changes are ordered by a per-registry revision counter rather than wall
//! clock, so two changes in the same nanosecond are still told apart.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use meshsim_types::{Context, Kind, ServiceName, Timestamp};

use crate::error::ProtocolError;
use crate::mailbox::{Inbox, Mailbox, MailboxId, Message};
use crate::settings::Env;

/// One registered node.
#[derive(Debug, Clone)]
pub struct Entry {
    pub mailbox: Mailbox,
    pub online: bool,
    /// Time of the fact that last changed this entry.
    pub stamp: Timestamp,
    revision: u64,
}

/// What a lookup tells the requester about one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Online {
        name: ServiceName,
        mailbox: Mailbox,
        stamp: Timestamp,
    },
    Offline {
        name: ServiceName,
        stamp: Timestamp,
    },
}

impl Answer {
    fn of(name: &ServiceName, entry: &Entry) -> Self {
        if entry.online {
            Answer::Online {
                name: name.clone(),
                mailbox: entry.mailbox.clone(),
                stamp: entry.stamp,
            }
        } else {
            Answer::Offline {
                name: name.clone(),
                stamp: entry.stamp,
            }
        }
    }

    /// The `NameDrop` or `Forget` that carries this answer.
    pub fn into_message(self) -> Message {
        match self {
            Answer::Online {
                name,
                mailbox,
                stamp,
            } => Message::new(Kind::NameDrop, Some(mailbox), Context::NIL, name.as_str()).stamped(stamp),
            Answer::Offline { name, stamp } => {
                Message::new(Kind::Forget, None, Context::NIL, name.as_str()).stamped(stamp)
            }
        }
    }
}

/// Registry state and handlers.
#[derive(Debug)]
pub struct Registry {
    name: ServiceName,
    mailbox: Mailbox,
    entries: BTreeMap<ServiceName, Entry>,
    peers: BTreeMap<ServiceName, Mailbox>,
    /// Revision each requester had seen when it last asked each question.
    polls: HashMap<(MailboxId, String), u64>,
    revision: u64,
    logger: Option<Mailbox>,
    env: Arc<Env>,
}

impl Registry {
    pub fn new(name: ServiceName, mailbox: Mailbox, env: Arc<Env>) -> Self {
        Self {
            name,
            mailbox,
            entries: BTreeMap::new(),
            peers: BTreeMap::new(),
            polls: HashMap::new(),
            revision: 0,
            logger: None,
            env,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn entry(&self, name: &ServiceName) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.entries.values().filter(|e| e.online).count()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Records a registration. The first writer of an online name wins;
    /// an offline entry comes back online unless the registration predates
    /// the fact that took it offline. Returns whether anything changed.
    pub fn register(&mut self, name: ServiceName, mailbox: Mailbox, stamp: Timestamp) -> bool {
        let revision = self.revision + 1;
        match self.entries.get_mut(&name) {
            Some(entry) if entry.online => {
                if entry.mailbox != mailbox {
                    tracing::debug!(registry = %self.name, %name, "duplicate registration ignored");
                }
                return false;
            }
            Some(entry) if stamp < entry.stamp => return false,
            Some(entry) => {
                entry.mailbox = mailbox;
                entry.online = true;
                entry.stamp = stamp;
                entry.revision = revision;
            }
            None => {
                self.entries.insert(
                    name,
                    Entry {
                        mailbox,
                        online: true,
                        stamp,
                        revision,
                    },
                );
            }
        }
        self.bump();
        true
    }

    /// Marks a name offline. Only this name is touched, and a fact older
    /// than the entry's current state is ignored.
    pub fn unregister(&mut self, name: &ServiceName, stamp: Timestamp) -> bool {
        let revision = self.revision + 1;
        let Some(entry) = self.entries.get_mut(name) else {
            return false;
        };
        if !entry.online || stamp < entry.stamp {
            return false;
        }
        entry.online = false;
        entry.stamp = stamp;
        entry.revision = revision;
        self.bump();
        true
    }

    /// Answers an exact-name or service-type query from `requester`.
    pub fn lookup(&mut self, query: &str, requester: MailboxId) -> Vec<Answer> {
        if let Ok(name) = ServiceName::parse(query) {
            return self
                .entries
                .get(&name)
                .map(|entry| Answer::of(&name, entry))
                .into_iter()
                .collect();
        }

        let seen = self
            .polls
            .insert((requester, query.to_string()), self.revision)
            .unwrap_or(0);
        self.entries
            .iter()
            .filter(|(name, entry)| name.service() == query && entry.revision > seen)
            .map(|(name, entry)| Answer::of(name, entry))
            .collect()
    }

    fn parse_name(&self, payload: &str) -> Result<ServiceName, ProtocolError> {
        ServiceName::parse(payload).map_err(|source| ProtocolError::InvalidName {
            actor: self.name.to_string(),
            source,
        })
    }

    fn require_reply_to(&self, msg: &Message) -> Result<Mailbox, ProtocolError> {
        msg.reply_to
            .clone()
            .ok_or_else(|| ProtocolError::MissingReplyTo {
                actor: self.name.to_string(),
                kind: msg.kind,
            })
    }

    /// Passes a topology fact on to the logger.
    async fn log(&self, msg: Message) {
        if let Some(logger) = &self.logger
            && let Err(e) = logger.send(msg).await
        {
            tracing::debug!(registry = %self.name, error = %e, "topology logger gone");
        }
    }

    /// Handles every kind except `Goodbye`, which the run loop owns.
    pub async fn handle(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.env.settings.msglog {
            tracing::info!("{}: {}", self.name, msg);
        }
        match msg.kind {
            Kind::Put => {
                let mailbox = self.require_reply_to(&msg)?;
                let name = self.parse_name(&msg.payload)?;
                if self.register(name.clone(), mailbox.clone(), msg.sent_at) {
                    for peer in self.peers.values() {
                        let copy = Message::new(Kind::Replicate, Some(mailbox.clone()), Context::NIL, name.as_str())
                            .stamped(msg.sent_at);
                        peer.go_send(copy);
                    }
                    self.log(msg).await;
                }
            }
            Kind::Replicate => {
                let mailbox = self.require_reply_to(&msg)?;
                let name = self.parse_name(&msg.payload)?;
                self.register(name, mailbox, msg.sent_at);
            }
            Kind::GetRequest => {
                let requester = self.require_reply_to(&msg)?;
                let query = msg.payload.trim();
                if query.is_empty() {
                    return Err(ProtocolError::EmptyLookup {
                        registry: self.name.to_string(),
                    });
                }
                for answer in self.lookup(query, requester.id()) {
                    requester.go_send(answer.into_message());
                }
            }
            Kind::Forget if msg.payload.contains(' ') => self.log(msg).await,
            Kind::Forget => {
                let name = self.parse_name(&msg.payload)?;
                self.unregister(&name, msg.sent_at);
            }
            Kind::Delete => {
                let name = self.parse_name(&msg.payload)?;
                self.unregister(&name, msg.sent_at);
                self.log(msg).await;
            }
            Kind::Inform if msg.payload.contains(' ') => self.log(msg).await,
            Kind::Inform => {
                self.logger = Some(self.require_reply_to(&msg)?);
            }
            Kind::NameDrop => {
                let peer = self.require_reply_to(&msg)?;
                let name = self.parse_name(&msg.payload)?;
                if name != self.name && peer != self.mailbox {
                    self.peers.insert(name, peer);
                }
            }
            Kind::Hello
            | Kind::Chat
            | Kind::GoldCoin
            | Kind::GetResponse
            | Kind::Goodbye => {
                tracing::trace!(registry = %self.name, kind = %msg.kind, "ignored");
            }
        }
        Ok(())
    }
}

/// Runs a registry until `Goodbye`.
///
/// On `Goodbye` the inbox is closed and drained, then the sender is
/// acknowledged with the registry's name.
pub async fn run_registry(mut registry: Registry, mut inbox: Inbox) -> Result<(), ProtocolError> {
    while let Some(msg) = inbox.recv().await {
        if msg.kind != Kind::Goodbye {
            if let Err(e) = registry.handle(msg).await {
                tracing::error!(registry = %registry.name, error = %e, "protocol violation");
                return Err(e);
            }
            continue;
        }

        inbox.close();
        while let Some(rest) = inbox.recv().await {
            if rest.kind != Kind::Goodbye {
                registry.handle(rest).await?;
            }
        }
        tracing::debug!(
            registry = %registry.name,
            entries = registry.len(),
            online = registry.online_count(),
            "registry drained"
        );
        if let Some(reply_to) = msg.reply_to {
            let ack = Message::new(Kind::Goodbye, Some(registry.mailbox.clone()), Context::NIL, registry.name.as_str());
            reply_to.go_send(ack);
        }
        return Ok(());
    }
    Ok(())
}
