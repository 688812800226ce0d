//! Connection record table and pruning.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use dashmap::DashMap;
use libp2p::{PeerId, swarm::ConnectionId};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::{
    config::{ConnManagerConfig, ConnManagerError},
    metrics::ConnManagerMetrics,
};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Lifecycle of a tracked connection.
///
/// Transitions only move forward: `Grace → Prunable → Closing`. A record is
/// dropped from the table once the transport reports the connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPhase {
    /// Younger than the grace period; never pruned.
    Grace,
    /// Past the grace period; eligible unless the peer is protected.
    Prunable,
    /// Selected for pruning; waiting for the transport to close it.
    Closing,
}

/// A live connection as seen by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub peer: PeerId,
    pub direction: Direction,
    pub established_at: Instant,
    closing: bool,
}

impl ConnectionRecord {
    /// Whether this connection has been selected for pruning.
    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

#[derive(Debug, Default)]
struct PeerEntry {
    connections: usize,
    protections: HashSet<String>,
    tags: HashMap<String, i64>,
}

impl PeerEntry {
    fn value(&self) -> i64 {
        self.tags.values().copied().fold(0i64, i64::saturating_add)
    }

    fn is_idle(&self) -> bool {
        self.connections == 0 && self.protections.is_empty() && self.tags.is_empty()
    }
}

/// Ordering key for pruning (lower = prune first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PruneCandidate {
    id: ConnectionId,
    peer: PeerId,
    value: i64,
    established_at: Instant,
}

impl PartialOrd for PruneCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PruneCandidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Least valuable first, then oldest first
        self.value
            .cmp(&other.value)
            .then_with(|| self.established_at.cmp(&other.established_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Soft watermark-based connection manager.
///
/// Safe to share across threads: the record table and per-peer state are
/// sharded maps, so unrelated peers never contend on one lock. Only the trim
/// pass is serialized, and a concurrent caller skips instead of waiting.
#[derive(Debug)]
pub struct ConnManager {
    config: ConnManagerConfig,
    connections: DashMap<ConnectionId, ConnectionRecord>,
    peers: DashMap<PeerId, PeerEntry>,
    /// Connections not yet selected for pruning.
    live: AtomicUsize,
    trim_lock: Mutex<()>,
    closed: AtomicBool,
    metrics: ConnManagerMetrics,
}

impl ConnManager {
    /// Create a manager for the given watermark policy.
    pub fn new(config: ConnManagerConfig) -> Result<Self, ConnManagerError> {
        config.validate()?;
        Ok(Self {
            config,
            connections: DashMap::new(),
            peers: DashMap::new(),
            live: AtomicUsize::new(0),
            trim_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            metrics: ConnManagerMetrics::default(),
        })
    }

    pub fn config(&self) -> &ConnManagerConfig {
        &self.config
    }

    /// Record a newly established connection.
    pub fn connected(&self, id: ConnectionId, peer: PeerId, direction: Direction) {
        self.connected_at(id, peer, direction, Instant::now());
    }

    /// Record a connection established at `now`.
    pub fn connected_at(
        &self,
        id: ConnectionId,
        peer: PeerId,
        direction: Direction,
        now: Instant,
    ) {
        let record = ConnectionRecord {
            peer,
            direction,
            established_at: now,
            closing: false,
        };
        if self.connections.insert(id, record).is_some() {
            return;
        }
        self.peers.entry(peer).or_default().connections += 1;
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.connections.set(live as f64);
        trace!(%peer, ?id, ?direction, live, "connection tracked");
    }

    /// Forget a connection the transport has closed.
    pub fn disconnected(&self, id: ConnectionId) {
        let Some((_, record)) = self.connections.remove(&id) else {
            return;
        };
        if !record.closing {
            let live = self.live.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            self.metrics.connections.set(live as f64);
        }
        self.peers.remove_if_mut(&record.peer, |_, entry| {
            entry.connections = entry.connections.saturating_sub(1);
            entry.is_idle()
        });
        trace!(peer = %record.peer, ?id, "connection untracked");
    }

    /// Number of live connections (excluding those already selected for pruning).
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of tracked connections to `peer`, including closing ones.
    pub fn peer_connections(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map_or(0, |entry| entry.connections)
    }

    pub fn record(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.connections.get(id).map(|r| r.value().clone())
    }

    /// Protect `peer` under `tag`. Protected peers are never pruned.
    pub fn protect(&self, peer: PeerId, tag: &str) {
        self.peers
            .entry(peer)
            .or_default()
            .protections
            .insert(tag.to_owned());
    }

    /// Remove protection `tag`. Returns true if the peer is still protected
    /// under another tag.
    pub fn unprotect(&self, peer: &PeerId, tag: &str) -> bool {
        let mut still_protected = false;
        self.peers.remove_if_mut(peer, |_, entry| {
            entry.protections.remove(tag);
            still_protected = !entry.protections.is_empty();
            entry.is_idle()
        });
        still_protected
    }

    pub fn is_protected(&self, peer: &PeerId) -> bool {
        self.peers
            .get(peer)
            .is_some_and(|entry| !entry.protections.is_empty())
    }

    /// Set a value tag on `peer`. Higher total value is pruned later.
    pub fn tag_peer(&self, peer: PeerId, tag: &str, value: i64) {
        self.peers
            .entry(peer)
            .or_default()
            .tags
            .insert(tag.to_owned(), value);
    }

    pub fn untag_peer(&self, peer: &PeerId, tag: &str) {
        self.peers.remove_if_mut(peer, |_, entry| {
            entry.tags.remove(tag);
            entry.is_idle()
        });
    }

    /// Phase of a connection at `now`, or `None` if untracked.
    pub fn phase(&self, id: &ConnectionId, now: Instant) -> Option<ConnectionPhase> {
        let record = self.connections.get(id)?;
        Some(if record.closing {
            ConnectionPhase::Closing
        } else if now.saturating_duration_since(record.established_at) < self.config.grace {
            ConnectionPhase::Grace
        } else {
            ConnectionPhase::Prunable
        })
    }

    /// Whether the live count has reached the high watermark.
    pub fn needs_trim(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.connection_count() >= self.config.high
    }

    /// Run a pruning pass now.
    pub fn trim(&self) -> Vec<(PeerId, ConnectionId)> {
        self.trim_at(Instant::now())
    }

    /// Run a pruning pass as of `now`.
    ///
    /// Returns the connections selected for closing. They stop counting as
    /// live immediately; the caller is responsible for closing them.
    pub fn trim_at(&self, now: Instant) -> Vec<(PeerId, ConnectionId)> {
        if !self.needs_trim() {
            return Vec::new();
        }
        let Some(_guard) = self.trim_lock.try_lock() else {
            trace!("trim already in progress");
            return Vec::new();
        };

        let live = self.connection_count();
        let target = live.saturating_sub(self.config.low);
        if target == 0 {
            return Vec::new();
        }

        // Snapshot records first so no peer shard is locked while a
        // connection shard is held.
        let eligible: Vec<(ConnectionId, PeerId, Instant)> = self
            .connections
            .iter()
            .filter(|r| {
                !r.closing && now.saturating_duration_since(r.established_at) >= self.config.grace
            })
            .map(|r| (*r.key(), r.peer, r.established_at))
            .collect();

        let mut candidates: Vec<PruneCandidate> = eligible
            .into_iter()
            .filter_map(|(id, peer, established_at)| {
                let value = match self.peers.get(&peer) {
                    Some(entry) if !entry.protections.is_empty() => return None,
                    Some(entry) => entry.value().value(),
                    None => 0,
                };
                Some(PruneCandidate {
                    id,
                    peer,
                    value,
                    established_at,
                })
            })
            .collect();
        candidates.sort_unstable();

        let mut selected = Vec::with_capacity(target.min(candidates.len()));
        for candidate in candidates {
            if selected.len() == target {
                break;
            }
            let Some(mut record) = self.connections.get_mut(&candidate.id) else {
                continue;
            };
            if record.closing {
                continue;
            }
            record.closing = true;
            drop(record);
            self.live.fetch_sub(1, Ordering::AcqRel);
            selected.push((candidate.peer, candidate.id));
        }

        let remaining = self.connection_count();
        self.metrics.connections.set(remaining as f64);
        self.metrics.pruned_total.increment(selected.len() as u64);

        if remaining >= self.config.high {
            self.metrics.pressure_total.increment(1);
            warn!(
                live = remaining,
                high = self.config.high,
                pruned = selected.len(),
                "connection pressure: not enough unprotected connections to prune"
            );
        } else if selected.len() < target {
            debug!(
                live = remaining,
                low = self.config.low,
                pruned = selected.len(),
                "trim stopped above low watermark"
            );
        } else {
            debug!(live = remaining, pruned = selected.len(), "trimmed connections");
        }

        selected
    }

    /// Stop pruning. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(tracked = self.connections.len(), "connection manager closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use libp2p::identity::{Keypair, ed25519};
    use proptest::prelude::*;

    use super::*;

    fn test_peer_id(n: u8) -> PeerId {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        bytes[31] = 1;
        let key = ed25519::SecretKey::try_from_bytes(bytes).unwrap();
        Keypair::from(ed25519::Keypair::from(key))
            .public()
            .to_peer_id()
    }

    fn conn(n: usize) -> ConnectionId {
        ConnectionId::new_unchecked(n)
    }

    fn manager(low: usize, high: usize, grace: Duration) -> ConnManager {
        ConnManager::new(ConnManagerConfig::new(low, high, grace)).unwrap()
    }

    #[test]
    fn prunes_to_low_keeping_newest() {
        let mgr = manager(10, 20, Duration::from_secs(1));
        let base = Instant::now();
        for i in 0..25 {
            mgr.connected_at(
                conn(i),
                test_peer_id(i as u8),
                Direction::Inbound,
                base + Duration::from_millis(i as u64),
            );
        }
        assert!(mgr.needs_trim());

        let pruned = mgr.trim_at(base + Duration::from_secs(10));
        assert_eq!(pruned.len(), 15);
        assert_eq!(mgr.connection_count(), 10);

        let pruned_ids: HashSet<_> = pruned.iter().map(|(_, id)| *id).collect();
        for i in 0..15 {
            assert!(pruned_ids.contains(&conn(i)), "conn {i} should be pruned");
        }
        for i in 15..25 {
            assert!(!pruned_ids.contains(&conn(i)), "conn {i} should survive");
        }
    }

    #[test]
    fn no_trim_below_high() {
        let mgr = manager(2, 5, Duration::ZERO);
        let base = Instant::now();
        for i in 0..4 {
            mgr.connected_at(conn(i), test_peer_id(1), Direction::Outbound, base);
        }
        assert!(!mgr.needs_trim());
        assert!(mgr.trim_at(base + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn protected_peers_are_never_pruned() {
        let mgr = manager(1, 4, Duration::ZERO);
        let base = Instant::now();
        let protected = test_peer_id(1);
        mgr.protect(protected, "relay-reservation");
        for i in 0..4 {
            mgr.connected_at(conn(i), protected, Direction::Inbound, base);
        }
        mgr.connected_at(conn(10), test_peer_id(2), Direction::Inbound, base);

        let pruned = mgr.trim_at(base + Duration::from_secs(1));
        assert_eq!(pruned, vec![(test_peer_id(2), conn(10))]);
        // Over high with only protected connections left: pressure, not blocking
        assert_eq!(mgr.connection_count(), 4);
        assert!(mgr.is_protected(&protected));
    }

    #[test]
    fn connections_in_grace_are_never_pruned() {
        let mgr = manager(0, 2, Duration::from_secs(60));
        let base = Instant::now();
        for i in 0..5 {
            mgr.connected_at(conn(i), test_peer_id(i as u8), Direction::Inbound, base);
        }
        assert_eq!(
            mgr.phase(&conn(0), base + Duration::from_secs(59)),
            Some(ConnectionPhase::Grace)
        );
        assert!(mgr.trim_at(base + Duration::from_secs(59)).is_empty());

        assert_eq!(
            mgr.phase(&conn(0), base + Duration::from_secs(60)),
            Some(ConnectionPhase::Prunable)
        );
        assert_eq!(mgr.trim_at(base + Duration::from_secs(60)).len(), 5);
    }

    #[test]
    fn tag_value_outranks_age() {
        let mgr = manager(1, 2, Duration::ZERO);
        let base = Instant::now();
        let valued = test_peer_id(1);
        mgr.tag_peer(valued, "useful", 10);
        mgr.connected_at(conn(0), valued, Direction::Inbound, base);
        mgr.connected_at(
            conn(1),
            test_peer_id(2),
            Direction::Inbound,
            base + Duration::from_secs(1),
        );

        let pruned = mgr.trim_at(base + Duration::from_secs(5));
        assert_eq!(pruned, vec![(test_peer_id(2), conn(1))]);
    }

    #[test]
    fn phases_move_forward_and_disconnect_clears() {
        let mgr = manager(0, 1, Duration::from_secs(1));
        let base = Instant::now();
        let peer = test_peer_id(3);
        mgr.connected_at(conn(0), peer, Direction::Outbound, base);
        assert_eq!(mgr.phase(&conn(0), base), Some(ConnectionPhase::Grace));

        let later = base + Duration::from_secs(2);
        assert_eq!(mgr.trim_at(later), vec![(peer, conn(0))]);
        assert_eq!(mgr.phase(&conn(0), later), Some(ConnectionPhase::Closing));
        assert_eq!(mgr.connection_count(), 0);
        assert_eq!(mgr.peer_connections(&peer), 1);

        mgr.disconnected(conn(0));
        assert_eq!(mgr.phase(&conn(0), later), None);
        assert_eq!(mgr.peer_connections(&peer), 0);
        assert_eq!(mgr.connection_count(), 0);
    }

    #[test]
    fn unprotect_reports_remaining_tags() {
        let mgr = manager(0, 10, Duration::ZERO);
        let peer = test_peer_id(4);
        mgr.protect(peer, "a");
        mgr.protect(peer, "b");
        assert!(mgr.unprotect(&peer, "a"));
        assert!(!mgr.unprotect(&peer, "b"));
        assert!(!mgr.is_protected(&peer));
    }

    #[test]
    fn closed_manager_stops_trimming() {
        let mgr = manager(0, 1, Duration::ZERO);
        let base = Instant::now();
        mgr.connected_at(conn(0), test_peer_id(1), Direction::Inbound, base);
        mgr.close();
        mgr.close();
        assert!(mgr.is_closed());
        assert!(mgr.trim_at(base + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn duplicate_connected_is_ignored() {
        let mgr = manager(0, 10, Duration::ZERO);
        let peer = test_peer_id(1);
        mgr.connected(conn(0), peer, Direction::Inbound);
        mgr.connected(conn(0), peer, Direction::Inbound);
        assert_eq!(mgr.connection_count(), 1);
        assert_eq!(mgr.peer_connections(&peer), 1);
    }

    proptest! {
        #[test]
        fn one_pass_brings_count_below_high(
            low in 0usize..20,
            extra in 1usize..20,
            over in 0usize..20,
            protected in 0usize..10,
        ) {
            let high = low + extra;
            let total = high + over;
            let mgr = manager(low, high, Duration::from_secs(1));
            let base = Instant::now();
            let guarded = test_peer_id(255);
            mgr.protect(guarded, "keep");

            let protected = protected.min(total);
            for i in 0..total {
                let peer = if i < protected { guarded } else { test_peer_id((i % 200) as u8) };
                mgr.connected_at(conn(i), peer, Direction::Inbound, base + Duration::from_millis(i as u64));
            }

            let pruned = mgr.trim_at(base + Duration::from_secs(5));
            let unprotected = total - protected;

            // Never pruned below low
            prop_assert!(mgr.connection_count() >= low.min(total));
            prop_assert!(pruned.iter().all(|(p, _)| *p != guarded));
            if unprotected >= total - low {
                prop_assert_eq!(mgr.connection_count(), low);
                prop_assert!(mgr.connection_count() < high);
            }
        }

        #[test]
        fn grace_always_respected(
            grace_ms in 1u64..10_000,
            ages in prop::collection::vec(0u64..20_000, 1..40),
        ) {
            let mgr = manager(0, 1, Duration::from_millis(grace_ms));
            let now = Instant::now() + Duration::from_secs(30);
            for (i, age) in ages.iter().enumerate() {
                mgr.connected_at(conn(i), test_peer_id(i as u8), Direction::Inbound, now - Duration::from_millis(*age));
            }
            let pruned: HashSet<_> = mgr.trim_at(now).into_iter().map(|(_, id)| id).collect();
            for (i, age) in ages.iter().enumerate() {
                if *age < grace_ms {
                    prop_assert!(!pruned.contains(&conn(i)));
                } else {
                    prop_assert!(pruned.contains(&conn(i)));
                }
            }
        }
    }
}
