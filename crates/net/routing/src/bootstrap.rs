//! Bootstrap state machine.

use std::collections::HashSet;

use libp2p::{
    PeerId,
    kad::{self, QueryId, QueryResult, store::MemoryStore},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::config::{RoutingConfig, RoutingError};

/// Overlay membership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RoutingState {
    /// Not started yet.
    Idle,
    /// A bootstrap round is in flight.
    Bootstrapping,
    /// Enough seeds responded.
    Active,
    /// Operating with whatever peers are known; retries periodically.
    Degraded,
    /// Shut down.
    Stopped,
}

impl RoutingState {
    /// Whether a bootstrap round has concluded.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Active | Self::Degraded | Self::Stopped)
    }
}

/// Cloneable handle for observing routing and requesting retries.
#[derive(Debug, Clone)]
pub struct RoutingHandle {
    state: watch::Receiver<RoutingState>,
    retry: mpsc::UnboundedSender<()>,
}

impl RoutingHandle {
    pub fn state(&self) -> RoutingState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoutingState> {
        self.state.clone()
    }

    /// Request a new bootstrap round. Ignored while one is in flight.
    pub fn retry(&self) {
        let _ = self.retry.send(());
    }

    /// Wait until the current round concludes.
    pub async fn settled(&self) -> RoutingState {
        let mut rx = self.state.clone();
        match rx.wait_for(|s| s.is_settled()).await {
            Ok(state) => *state,
            Err(_) => RoutingState::Stopped,
        }
    }
}

struct Round {
    query: QueryId,
    deadline: Instant,
}

/// Drives Kademlia bootstrap rounds against the configured seeds.
///
/// Owned by the host's run loop, which feeds it Kademlia events, connection
/// events and ticks; the Kademlia behaviour itself stays inside the swarm and
/// is passed in by reference.
pub struct RoutingBootstrap {
    config: RoutingConfig,
    seeds: Vec<(PeerId, libp2p::Multiaddr)>,
    seed_ids: HashSet<PeerId>,
    responded: HashSet<PeerId>,
    round: Option<Round>,
    next_retry: Option<Instant>,
    state: watch::Sender<RoutingState>,
    retry_rx: mpsc::UnboundedReceiver<()>,
}

impl RoutingBootstrap {
    pub fn new(config: RoutingConfig) -> Result<(Self, RoutingHandle), RoutingError> {
        let seeds = config.seeds()?;
        let (state, state_rx) = watch::channel(RoutingState::Idle);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let bootstrap = Self {
            seed_ids: seeds.iter().map(|(peer, _)| *peer).collect(),
            seeds,
            config,
            responded: HashSet::new(),
            round: None,
            next_retry: None,
            state,
            retry_rx,
        };
        let handle = RoutingHandle {
            state: state_rx,
            retry: retry_tx,
        };
        Ok((bootstrap, handle))
    }

    pub fn state(&self) -> RoutingState {
        *self.state.borrow()
    }

    /// Seed peers that currently hold a connection to us.
    pub fn responded_seeds(&self) -> usize {
        self.responded.len()
    }

    /// Register seeds with Kademlia and start the first round.
    pub fn start(&mut self, kad: &mut kad::Behaviour<MemoryStore>) {
        if self.state() != RoutingState::Idle {
            return;
        }
        for (peer, addr) in &self.seeds {
            kad.add_address(peer, addr.clone());
        }
        info!(seeds = self.seeds.len(), "starting routing bootstrap");
        self.begin_round(kad, Instant::now());
    }

    fn begin_round(&mut self, kad: &mut kad::Behaviour<MemoryStore>, now: Instant) {
        self.next_retry = None;
        match kad.bootstrap() {
            Ok(query) => {
                self.round = Some(Round {
                    query,
                    deadline: now + self.config.bootstrap_timeout,
                });
                self.set_state(RoutingState::Bootstrapping);
            }
            Err(e) => {
                warn!(error = %e, "routing bootstrap cannot start");
                self.degrade(now);
            }
        }
    }

    /// Wait for an operator retry request.
    ///
    /// Never resolves once every [`RoutingHandle`] is dropped.
    pub async fn retry_requested(&mut self) {
        if self.retry_rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    /// Start a new round unless one is in flight or routing is stopped.
    pub fn retry(&mut self, kad: &mut kad::Behaviour<MemoryStore>) {
        match self.state() {
            RoutingState::Bootstrapping | RoutingState::Stopped => {}
            RoutingState::Idle => self.start(kad),
            RoutingState::Active | RoutingState::Degraded => {
                debug!("retrying routing bootstrap");
                self.begin_round(kad, Instant::now());
            }
        }
    }

    pub fn on_event(&mut self, kad: &mut kad::Behaviour<MemoryStore>, event: &kad::Event) {
        if let kad::Event::OutboundQueryProgressed {
            id,
            result: QueryResult::Bootstrap(result),
            step,
            ..
        } = event
        {
            if let Err(e) = result {
                debug!(error = %e, "bootstrap query step failed");
            }
            if step.last {
                self.query_finished(kad, *id, Instant::now());
            }
        }
    }

    /// A connection to `peer` was established.
    pub fn peer_connected(&mut self, peer: PeerId) {
        if self.seed_ids.contains(&peer) && self.responded.insert(peer) {
            debug!(%peer, responded = self.responded.len(), "seed peer reachable");
        }
    }

    /// The last connection to `peer` closed.
    pub fn peer_disconnected(&mut self, peer: &PeerId) {
        self.responded.remove(peer);
    }

    fn query_finished(&mut self, kad: &mut kad::Behaviour<MemoryStore>, id: QueryId, now: Instant) {
        if self.round.as_ref().is_none_or(|r| r.query != id) {
            return;
        }
        self.round = None;
        if self.responded.len() >= self.config.min_seed_responses {
            info!(
                seeds = self.responded.len(),
                peers = kad.kbuckets().map(|b| b.num_entries()).sum::<usize>(),
                "routing bootstrap complete"
            );
            self.set_state(RoutingState::Active);
        } else {
            warn!(
                responded = self.responded.len(),
                required = self.config.min_seed_responses,
                "too few seeds responded, routing degraded"
            );
            self.degrade(now);
        }
    }

    /// Enforce the round deadline and run scheduled retries.
    pub fn on_tick(&mut self, kad: &mut kad::Behaviour<MemoryStore>, now: Instant) {
        if let Some(round) = &self.round {
            if now >= round.deadline {
                let query = round.query;
                warn!(timeout = ?self.config.bootstrap_timeout, "routing bootstrap timed out");
                if let Some(mut q) = kad.query_mut(&query) {
                    q.finish();
                }
                self.round = None;
                self.degrade(now);
            }
            return;
        }
        if self.state() == RoutingState::Degraded
            && self.next_retry.is_some_and(|at| now >= at)
        {
            debug!("scheduled routing bootstrap retry");
            self.begin_round(kad, now);
        }
    }

    /// Abort any in-flight round and stop for good. Idempotent.
    pub fn stop(&mut self, kad: &mut kad::Behaviour<MemoryStore>) {
        if self.state() == RoutingState::Stopped {
            return;
        }
        if let Some(round) = self.round.take() {
            if let Some(mut q) = kad.query_mut(&round.query) {
                q.finish();
            }
            record_outcome("aborted");
        }
        self.next_retry = None;
        self.set_state(RoutingState::Stopped);
        debug!("routing stopped");
    }

    fn degrade(&mut self, now: Instant) {
        self.next_retry = Some(now + self.config.retry_interval);
        self.set_state(RoutingState::Degraded);
    }

    fn set_state(&mut self, state: RoutingState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            if matches!(state, RoutingState::Active | RoutingState::Degraded) {
                record_outcome(state.into());
            }
            debug!(from = %previous, to = %state, "routing state changed");
        }
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("relayd_routing_bootstrap_total", "outcome" => outcome).increment(1);
}
