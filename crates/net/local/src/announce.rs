//! Announce-address disclosure.
//!
//! The node listens on whatever addresses its transports bind, but only a
//! subset is disclosed to peers. [`AddressPolicy`] decides that subset and
//! [`AnnouncedAddrs`] keeps the derived set in step with the live candidate
//! set, reporting what changed so the host can update its external addresses.

use libp2p::Multiaddr;
use tracing::debug;

use crate::scope::is_public_multiaddr;

/// How announced addresses are derived from candidate listen addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPolicy {
    /// Ignore candidates and always announce this fixed list.
    Static(Vec<Multiaddr>),
    /// Announce only candidates that are publicly routable.
    Automatic,
}

impl AddressPolicy {
    /// Static override when `announce` is non-empty, automatic otherwise.
    pub fn from_announce_addrs(announce: Vec<Multiaddr>) -> Self {
        if announce.is_empty() {
            Self::Automatic
        } else {
            Self::Static(dedup(announce))
        }
    }

    /// Compute the announced set for a candidate set.
    pub fn compute_announced(&self, candidates: &[Multiaddr]) -> Vec<Multiaddr> {
        match self {
            Self::Static(addrs) => addrs.clone(),
            Self::Automatic => dedup(
                candidates
                    .iter()
                    .filter(|addr| is_public_multiaddr(addr))
                    .cloned(),
            ),
        }
    }

    /// Returns true for the static override mode.
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

/// Difference between two announced sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressChange {
    /// Newly announced addresses.
    pub added: Vec<Multiaddr>,
    /// Addresses no longer announced.
    pub removed: Vec<Multiaddr>,
}

impl AddressChange {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Candidate listen addresses and the announced set derived from them.
///
/// The announced set is never edited directly; it is recomputed from the
/// policy on every candidate change.
#[derive(Debug, Clone)]
pub struct AnnouncedAddrs {
    policy: AddressPolicy,
    candidates: Vec<Multiaddr>,
    announced: Vec<Multiaddr>,
}

impl AnnouncedAddrs {
    /// Create with no candidates. Static policies announce immediately.
    pub fn new(policy: AddressPolicy) -> Self {
        let announced = policy.compute_announced(&[]);
        Self {
            policy,
            candidates: Vec::new(),
            announced,
        }
    }

    /// The disclosure policy.
    pub fn policy(&self) -> &AddressPolicy {
        &self.policy
    }

    /// Current candidate listen addresses.
    pub fn candidates(&self) -> &[Multiaddr] {
        &self.candidates
    }

    /// Current announced addresses.
    pub fn announced(&self) -> &[Multiaddr] {
        &self.announced
    }

    /// A transport started listening on `addr`.
    pub fn add_candidate(&mut self, addr: Multiaddr) -> AddressChange {
        if self.candidates.contains(&addr) {
            return AddressChange::default();
        }
        self.candidates.push(addr);
        self.recompute()
    }

    /// A transport stopped listening on `addr`.
    pub fn remove_candidate(&mut self, addr: &Multiaddr) -> AddressChange {
        let before = self.candidates.len();
        self.candidates.retain(|a| a != addr);
        if self.candidates.len() == before {
            return AddressChange::default();
        }
        self.recompute()
    }

    fn recompute(&mut self) -> AddressChange {
        let next = self.policy.compute_announced(&self.candidates);

        let change = AddressChange {
            added: next
                .iter()
                .filter(|a| !self.announced.contains(a))
                .cloned()
                .collect(),
            removed: self
                .announced
                .iter()
                .filter(|a| !next.contains(a))
                .cloned()
                .collect(),
        };

        if !change.is_empty() {
            debug!(
                added = change.added.len(),
                removed = change.removed.len(),
                "announced addresses changed"
            );
        }

        self.announced = next;
        change
    }
}

fn dedup(addrs: impl IntoIterator<Item = Multiaddr>) -> Vec<Multiaddr> {
    let mut out: Vec<Multiaddr> = Vec::new();
    for addr in addrs {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}
