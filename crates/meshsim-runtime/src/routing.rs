//! Per-actor routing table.
//!
//! Entries live in a dense `Vec` so random selection is one index draw; a
//! name index beside it is rebuilt whenever membership changes, so lookups
//! by name stay O(1) without keeping two copies of every mailbox.

use std::collections::HashMap;

use meshsim_types::{Package, ServiceName, Timestamp};
use rand::Rng;

use crate::mailbox::Mailbox;

/// One known peer.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: ServiceName,
    pub mailbox: Mailbox,
    /// Package parsed from the name; `None` for a package nothing implements.
    pub package: Option<Package>,
    /// Timestamp of the fact that introduced this peer.
    pub since: Timestamp,
}

/// Peer name to mailbox, with random and per-package selection.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
    index: HashMap<ServiceName, usize>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn reindex(&mut self) {
        self.index = self
            .routes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
    }

    /// Adds a peer. Returns `false` if the name is already routed.
    pub fn add(&mut self, name: ServiceName, mailbox: Mailbox, since: Timestamp) -> bool {
        if self.index.contains_key(&name) {
            return false;
        }
        let package = name.package().parse().ok();
        self.routes.push(Route {
            name,
            mailbox,
            package,
            since,
        });
        self.reindex();
        true
    }

    /// Removes a peer, returning its route if it was present.
    pub fn remove(&mut self, name: &ServiceName) -> Option<Route> {
        let at = *self.index.get(name)?;
        let route = self.routes.swap_remove(at);
        self.reindex();
        Some(route)
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.index.contains_key(name)
    }

    /// Mailbox of a peer by full name.
    pub fn named(&self, name: &str) -> Option<&Mailbox> {
        let name = ServiceName::parse(name).ok()?;
        self.index.get(&name).map(|&i| &self.routes[i].mailbox)
    }

    /// Reverse lookup: which peer owns this mailbox.
    pub fn name_of(&self, mailbox: &Mailbox) -> Option<&ServiceName> {
        self.routes
            .iter()
            .find(|r| r.mailbox == *mailbox)
            .map(|r| &r.name)
    }

    /// Any peer, uniformly.
    pub fn random<R: Rng>(&self, rng: &mut R) -> Option<&Route> {
        if self.routes.is_empty() {
            return None;
        }
        Some(&self.routes[rng.gen_range(0..self.routes.len())])
    }

    /// Any peer running one of `packages`, uniformly.
    pub fn pick<'a, R: Rng>(&'a self, packages: &[Package], rng: &mut R) -> Option<&'a Route> {
        let matching: Vec<&'a Route> = self.subset(packages).collect();
        if matching.is_empty() {
            return None;
        }
        Some(matching[rng.gen_range(0..matching.len())])
    }

    /// Peers running one of `packages`.
    ///
    /// Routes borrow from the table only, so they outlive `packages`.
    pub fn subset<'a>(&'a self, packages: &[Package]) -> impl Iterator<Item = &'a Route> {
        self.routes
            .iter()
            .filter(move |r| r.package.is_some_and(|p| packages.contains(&p)))
    }

    /// Whether any peer runs one of `packages`.
    pub fn has_any(&self, packages: &[Package]) -> bool {
        self.subset(packages).next().is_some()
    }

    /// First peer matching a predicate on its name, in insertion order.
    pub fn find(&self, mut predicate: impl FnMut(&ServiceName) -> bool) -> Option<&Route> {
        self.routes.iter().find(|r| predicate(&r.name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
