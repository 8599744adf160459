//! Typed mailboxes and the message envelope.
//!
//! A [`Mailbox`] is the sending half of a bounded tokio channel, an
//! [`Inbox`] the receiving half. Every actor owns exactly one inbox. The
//! mailbox can be cloned freely and handed to peers inside messages, so a
//! routing table is just a set of mailboxes.
//!
//! Two send disciplines exist:
//! - [`Mailbox::send`] waits for queue space. Used for fan-in traffic to
//!   registries and the topology logger, which never block on their senders.
//! - [`Mailbox::go_send`] hands the message to a detached task. Used between
//!   peers, where two actors waiting on each other would deadlock.

use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use meshsim_types::{Context, Kind, Timestamp};
use tokio::sync::mpsc;

use crate::error::Error;

static NEXT_MAILBOX: AtomicU64 = AtomicU64::new(1);

/// Process-unique mailbox identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxId(u64);

impl MailboxId {
    fn next() -> Self {
        Self(NEXT_MAILBOX.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mb{}", self.0)
    }
}

/// How a mailbox queues messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxRole {
    /// One message in flight; the sender waits for the receiver to take it.
    PointToPoint,
    /// A bounded queue for many producers feeding one consumer.
    FanIn(usize),
}

impl MailboxRole {
    fn capacity(self) -> usize {
        match self {
            MailboxRole::PointToPoint => 1,
            MailboxRole::FanIn(n) => n.max(1),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// One protocol message.
#[derive(Clone)]
pub struct Message {
    pub kind: Kind,
    /// Where answers go, or the mailbox being introduced.
    pub reply_to: Option<Mailbox>,
    pub sent_at: Timestamp,
    pub ctx: Context,
    pub payload: String,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn new(
        kind: Kind,
        reply_to: Option<Mailbox>,
        ctx: Context,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            reply_to,
            sent_at: Timestamp::now(),
            ctx,
            payload: payload.into(),
        }
    }

    /// Replaces the send time, used when relaying a fact whose age matters.
    pub fn stamped(mut self, at: Timestamp) -> Self {
        self.sent_at = at;
        self
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("reply_to", &self.reply_to.as_ref().map(Mailbox::id))
            .field("sent_at", &self.sent_at)
            .field("ctx", &self.ctx)
            .field("payload", &self.payload)
            .finish()
    }
}

/// `Kind ctx payload`, the message log line format.
impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.ctx, self.payload)
    }
}

// ============================================================================
// Mailbox / Inbox
// ============================================================================

/// Sending half of an actor's queue.
#[derive(Clone)]
pub struct Mailbox {
    id: MailboxId,
    tx: mpsc::Sender<Message>,
}

/// Receiving half of an actor's queue.
#[derive(Debug)]
pub struct Inbox {
    id: MailboxId,
    rx: mpsc::Receiver<Message>,
}

/// Creates a connected mailbox and inbox.
pub fn mailbox(role: MailboxRole) -> (Mailbox, Inbox) {
    let id = MailboxId::next();
    let (tx, rx) = mpsc::channel(role.capacity());
    (Mailbox { id, tx }, Inbox { id, rx })
}

impl Mailbox {
    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Sends, waiting for queue space.
    ///
    /// Fails only when the receiving actor has exited.
    pub async fn send(&self, msg: Message) -> Result<(), Error> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| Error::RecipientGone(self.id.to_string()))
    }

    /// Sends from a detached task so the caller never waits.
    ///
    /// A recipient that has already exited drops the message silently.
    pub fn go_send(&self, msg: Message) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(msg).await;
        });
    }

    /// Whether the receiving actor has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for Mailbox {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Mailbox {}

impl Hash for Mailbox {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mailbox({})", self.id)
    }
}

impl Inbox {
    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Next message, or `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Stops accepting new messages; queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
