//! meshsim-ring: Consistent-hash token ring
//!
//! A ring assigns each member of a partitioned cluster one or more tokens
//! spread evenly over the 32-bit hash space. A key belongs to the member
//! holding the smallest token at or above the key's hash, wrapping around to
//! the lowest token when the hash is above every token.
//!
//! Rings are built once when a cluster forms. Changing membership means
//! building a new ring; there is no online token insertion or removal.
//!
//! # Example
//!
//! ```
//! use meshsim_ring::Ring;
//!
//! let ring = Ring::distribute(["cass0", "cass1", "cass2"]).unwrap();
//!
//! // Tokens are equally spaced over the sorted member names.
//! assert_eq!(ring.to_string(), "cass0:0,cass1:1431655765,cass2:2863311530");
//!
//! // Lookups are pure: the same key always lands on the same member.
//! let owner = ring.owner_of("why?").unwrap();
//! assert_eq!(ring.owner_of("why?"), Some(owner));
//! ```

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};


/// Hashes a key onto the ring.
///
/// CRC-32 (IEEE) is stable across processes and rebuilds, so a key keeps
/// its position no matter how the ring around it changes.
pub fn hash(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

/// One token and the member that owns the range ending at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: u32,
    pub owner: String,
}

/// Partition ownership for one cluster, sorted by token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    tokens: Vec<Token>,
}

impl Ring {
    /// Gives each member one token, equally spaced over the sorted names.
    pub fn distribute<I, S>(members: I) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::distribute_with_vnodes(members, 1)
    }

    /// Gives each member `vnodes` tokens.
    ///
    /// Token slots are equally spaced and handed out round-robin over the
    /// sorted member names, so every member's tokens are spread across the
    /// whole ring rather than bunched together.
    pub fn distribute_with_vnodes<I, S>(members: I, vnodes: usize) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if vnodes == 0 {
            return Err(RingError::NoVirtualNodes);
        }
        let mut names: Vec<String> = members.into_iter().map(Into::into).collect();
        names.sort();
        if let Some(dup) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(RingError::DuplicateMember(dup[0].clone()));
        }
        if names.is_empty() {
            return Ok(Self::default());
        }

        let slots = names.len() * vnodes;
        let slots_u32 = u32::try_from(slots).map_err(|_| RingError::TooManyTokens(slots))?;
        let step = u32::MAX / slots_u32;
        let tokens = (0..slots_u32)
            .map(|slot| Token {
                token: step * slot,
                owner: names[slot as usize % names.len()].clone(),
            })
            .collect();
        Ok(Self { tokens })
    }

    /// Builds a ring from explicit tokens.
    pub fn from_tokens(mut tokens: Vec<Token>) -> Result<Self, RingError> {
        tokens.sort_by_key(|t| t.token);
        if let Some(dup) = tokens.windows(2).find(|pair| pair[0].token == pair[1].token) {
            return Err(RingError::DuplicateToken(dup[0].token));
        }
        Ok(Self { tokens })
    }

    /// Returns the token that owns `hash`: the smallest token `>= hash`,
    /// wrapping to the smallest token. `None` for an empty ring.
    pub fn find(&self, hash: u32) -> Option<&Token> {
        if self.tokens.is_empty() {
            return None;
        }
        let index = self.tokens.partition_point(|t| t.token < hash);
        Some(&self.tokens[index % self.tokens.len()])
    }

    /// The member that owns `key`.
    pub fn owner_of(&self, key: &str) -> Option<&str> {
        self.find(hash(key)).map(|t| t.owner.as_str())
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Distinct members, in token order of first appearance.
    pub fn members(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.tokens
            .iter()
            .map(|t| t.owner.as_str())
            .filter(|owner| seen.insert(*owner))
            .collect()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.tokens.iter().any(|t| t.owner == member)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Renders the gossip form `name:token,name:token`, in token order.
impl Display for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, t) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", t.owner, t.token)?;
        }
        Ok(())
    }
}

impl FromStr for Ring {
    type Err = RingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let tokens = s
            .split(',')
            .map(|entry| {
                let (owner, token) = entry
                    .rsplit_once(':')
                    .ok_or_else(|| RingError::MalformedEntry(entry.to_string()))?;
                let token = token
                    .trim()
                    .parse()
                    .map_err(|_| RingError::MalformedEntry(entry.to_string()))?;
                let owner = owner.trim();
                if owner.is_empty() {
                    return Err(RingError::MalformedEntry(entry.to_string()));
                }
                Ok(Token {
                    token,
                    owner: owner.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_tokens(tokens)
    }
}

/// Errors that can occur while building a ring.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// A member name was listed twice.
    #[error("member listed twice: {0}")]
    DuplicateMember(String),

    /// Two entries claim the same token.
    #[error("token claimed twice: {0}")]
    DuplicateToken(u32),

    /// A gossip entry is not of the form `name:token`.
    #[error("malformed ring entry: {0:?}")]
    MalformedEntry(String),

    /// At least one token per member is required.
    #[error("virtual node count must be at least 1")]
    NoVirtualNodes,

    /// More tokens than the hash space can spread.
    #[error("cannot spread {0} tokens over a 32-bit ring")]
    TooManyTokens(usize),
}
