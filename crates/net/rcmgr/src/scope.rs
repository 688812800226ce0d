//! Scope counters with lock-free check-and-reserve.

use std::sync::atomic::{AtomicU64, Ordering};

use libp2p::core::Endpoint;

use crate::limits::{Limits, Resource};

/// Kind of accounting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScopeKind {
    System,
    Transient,
    Peer,
    Protocol,
    Connection,
}

/// Amount of each resource a reservation takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub memory: u64,
    pub fds: u64,
    pub conns_inbound: u64,
    pub conns_outbound: u64,
    pub conns: u64,
    pub streams_inbound: u64,
    pub streams_outbound: u64,
    pub streams: u64,
}

impl Usage {
    /// One connection, optionally holding a file descriptor.
    pub fn connection(endpoint: Endpoint, uses_fd: bool) -> Self {
        let (inbound, outbound) = split(endpoint);
        Self {
            fds: u64::from(uses_fd),
            conns_inbound: inbound,
            conns_outbound: outbound,
            conns: 1,
            ..Default::default()
        }
    }

    /// One stream.
    pub fn stream(endpoint: Endpoint) -> Self {
        let (inbound, outbound) = split(endpoint);
        Self {
            streams_inbound: inbound,
            streams_outbound: outbound,
            streams: 1,
            ..Default::default()
        }
    }

    /// Add `bytes` of memory.
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory = self.memory.saturating_add(bytes);
        self
    }

    pub fn get(&self, resource: Resource) -> u64 {
        match resource {
            Resource::Memory => self.memory,
            Resource::Fds => self.fds,
            Resource::ConnsInbound => self.conns_inbound,
            Resource::ConnsOutbound => self.conns_outbound,
            Resource::Conns => self.conns,
            Resource::StreamsInbound => self.streams_inbound,
            Resource::StreamsOutbound => self.streams_outbound,
            Resource::Streams => self.streams,
        }
    }

    pub fn is_zero(&self) -> bool {
        Resource::ALL.iter().all(|r| self.get(*r) == 0)
    }
}

fn split(endpoint: Endpoint) -> (u64, u64) {
    match endpoint {
        Endpoint::Listener => (1, 0),
        Endpoint::Dialer => (0, 1),
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory: AtomicU64,
    fds: AtomicU64,
    conns_inbound: AtomicU64,
    conns_outbound: AtomicU64,
    conns: AtomicU64,
    streams_inbound: AtomicU64,
    streams_outbound: AtomicU64,
    streams: AtomicU64,
}

impl Counters {
    fn get(&self, resource: Resource) -> &AtomicU64 {
        match resource {
            Resource::Memory => &self.memory,
            Resource::Fds => &self.fds,
            Resource::ConnsInbound => &self.conns_inbound,
            Resource::ConnsOutbound => &self.conns_outbound,
            Resource::Conns => &self.conns,
            Resource::StreamsInbound => &self.streams_inbound,
            Resource::StreamsOutbound => &self.streams_outbound,
            Resource::Streams => &self.streams,
        }
    }
}

/// One accounting scope.
#[derive(Debug)]
pub(crate) struct Scope {
    kind: ScopeKind,
    limits: Limits,
    used: Counters,
}

impl Scope {
    pub(crate) fn new(kind: ScopeKind, limits: Limits) -> Self {
        Self {
            kind,
            limits,
            used: Counters::default(),
        }
    }

    pub(crate) fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Charge `usage` to this scope, all or nothing.
    ///
    /// Each resource is reserved with a compare-and-swap against the ceiling,
    /// so two concurrent callers can never both take the last unit. On
    /// failure, resources already charged by this call are returned.
    pub(crate) fn try_reserve(&self, usage: &Usage) -> Result<(), Resource> {
        for (i, resource) in Resource::ALL.iter().copied().enumerate() {
            let amount = usage.get(resource);
            if amount == 0 {
                continue;
            }
            let counter = self.used.get(resource);
            let limit = self.limits.get(resource);
            let mut current = counter.load(Ordering::Acquire);
            loop {
                let Some(next) = current.checked_add(amount).filter(|n| *n <= limit) else {
                    for prior in Resource::ALL.iter().copied().take(i) {
                        self.release_one(prior, usage.get(prior));
                    }
                    return Err(resource);
                };
                match counter.compare_exchange_weak(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
        Ok(())
    }

    /// Return `usage` previously charged with [`Self::try_reserve`].
    pub(crate) fn release(&self, usage: &Usage) {
        for resource in Resource::ALL {
            self.release_one(resource, usage.get(resource));
        }
    }

    fn release_one(&self, resource: Resource, amount: u64) {
        if amount > 0 {
            self.used.get(resource).fetch_sub(amount, Ordering::AcqRel);
        }
    }

    pub(crate) fn usage(&self) -> Usage {
        let load = |r| self.used.get(r).load(Ordering::Acquire);
        Usage {
            memory: load(Resource::Memory),
            fds: load(Resource::Fds),
            conns_inbound: load(Resource::ConnsInbound),
            conns_outbound: load(Resource::ConnsOutbound),
            conns: load(Resource::Conns),
            streams_inbound: load(Resource::StreamsInbound),
            streams_outbound: load(Resource::StreamsOutbound),
            streams: load(Resource::Streams),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.usage().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn limits_with_conns(conns: u64) -> Limits {
        Limits {
            conns,
            ..Limits::UNLIMITED
        }
    }

    #[test]
    fn reserve_up_to_ceiling() {
        let scope = Scope::new(ScopeKind::System, limits_with_conns(2));
        let usage = Usage::connection(Endpoint::Listener, false);
        assert!(scope.try_reserve(&usage).is_ok());
        assert!(scope.try_reserve(&usage).is_ok());
        assert_eq!(scope.try_reserve(&usage), Err(Resource::Conns));
        scope.release(&usage);
        assert!(scope.try_reserve(&usage).is_ok());
    }

    #[test]
    fn failed_reserve_rolls_back_partial_charge() {
        let scope = Scope::new(
            ScopeKind::Peer,
            Limits {
                conns: 0,
                ..Limits::UNLIMITED
            },
        );
        let usage = Usage::connection(Endpoint::Dialer, true);
        assert_eq!(scope.try_reserve(&usage), Err(Resource::Conns));
        // fds and conns_outbound were charged before conns failed
        assert!(scope.is_idle());
    }

    #[test]
    fn concurrent_reservations_never_exceed_ceiling() {
        let scope = Arc::new(Scope::new(ScopeKind::System, limits_with_conns(50)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = scope.clone();
                std::thread::spawn(move || {
                    let usage = Usage::connection(Endpoint::Listener, false);
                    (0..100)
                        .filter(|_| scope.try_reserve(&usage).is_ok())
                        .count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(scope.usage().conns, 50);
    }
}
