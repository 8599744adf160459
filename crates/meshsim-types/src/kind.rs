//! The closed set of message kinds.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// What a message imposes on its receiver.
///
/// The set is closed: every actor recognises every kind, and a kind that
/// cannot be parsed is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Adopt the payload as your name; the reply-to is your creator.
    Hello,
    /// Here is a peer (with reply-to) or a service type to look up (without).
    NameDrop,
    /// Start a periodic self-request at the payload's rate.
    Chat,
    /// Add the payload amount to your balance.
    GoldCoin,
    /// Register a consumer of topology updates, or report an edge.
    Inform,
    /// Look up a key, a name or a service type.
    GetRequest,
    /// Answer to a `GetRequest`; an empty payload is a miss.
    GetResponse,
    /// Store a value or register a name.
    Put,
    /// Like `Put`, but never forwarded further.
    Replicate,
    /// Drop a peer, mark an entry offline, or retract an edge.
    Forget,
    /// A node is leaving for good.
    Delete,
    /// Shut down; echoed back as the acknowledgement.
    Goodbye,
}

impl Kind {
    /// All kinds, in protocol order.
    pub const ALL: [Kind; 12] = [
        Kind::Hello,
        Kind::NameDrop,
        Kind::Chat,
        Kind::GoldCoin,
        Kind::Inform,
        Kind::GetRequest,
        Kind::GetResponse,
        Kind::Put,
        Kind::Replicate,
        Kind::Forget,
        Kind::Delete,
        Kind::Goodbye,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Hello => "Hello",
            Kind::NameDrop => "NameDrop",
            Kind::Chat => "Chat",
            Kind::GoldCoin => "GoldCoin",
            Kind::Inform => "Inform",
            Kind::GetRequest => "GetRequest",
            Kind::GetResponse => "GetResponse",
            Kind::Put => "Put",
            Kind::Replicate => "Replicate",
            Kind::Forget => "Forget",
            Kind::Delete => "Delete",
            Kind::Goodbye => "Goodbye",
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn every_kind_parses_from_its_display() {
        for kind in Kind::ALL {
            assert_eq!(kind.to_string().parse::<Kind>(), Ok(kind));
        }
    }

    #[test_case("Unknown"; "unknown word")]
    #[test_case("hello"; "wrong case")]
    #[test_case(""; "empty")]
    fn unrecognised_kind_is_an_error(input: &str) {
        assert_eq!(
            input.parse::<Kind>(),
            Err(ParseError::UnknownKind(input.to_string()))
        );
    }
}
