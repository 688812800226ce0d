//! Resource limits and auto-scaling.

use tracing::debug;

const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

/// Memory below which limits are not scaled up.
const MIN_MEMORY_BUDGET: u64 = 128 * MIB;

/// File descriptor budget when none is configured.
pub const DEFAULT_FD_BUDGET: u64 = 4096;

/// A counted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    Memory,
    Fds,
    ConnsInbound,
    ConnsOutbound,
    Conns,
    StreamsInbound,
    StreamsOutbound,
    Streams,
}

impl Resource {
    /// Every resource, in charging order.
    pub const ALL: [Self; 8] = [
        Self::Memory,
        Self::Fds,
        Self::ConnsInbound,
        Self::ConnsOutbound,
        Self::Conns,
        Self::StreamsInbound,
        Self::StreamsOutbound,
        Self::Streams,
    ];
}

/// Ceilings for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub memory: u64,
    pub fds: u64,
    pub conns_inbound: u64,
    pub conns_outbound: u64,
    pub conns: u64,
    pub streams_inbound: u64,
    pub streams_outbound: u64,
    pub streams: u64,
}

impl Limits {
    /// No ceiling on anything.
    pub const UNLIMITED: Self = Self {
        memory: u64::MAX,
        fds: u64::MAX,
        conns_inbound: u64::MAX,
        conns_outbound: u64::MAX,
        conns: u64::MAX,
        streams_inbound: u64::MAX,
        streams_outbound: u64::MAX,
        streams: u64::MAX,
    };

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

    fn get_mut(&mut self, resource: Resource) -> &mut u64 {
        match resource {
            Resource::Memory => &mut self.memory,
            Resource::Fds => &mut self.fds,
            Resource::ConnsInbound => &mut self.conns_inbound,
            Resource::ConnsOutbound => &mut self.conns_outbound,
            Resource::Conns => &mut self.conns,
            Resource::StreamsInbound => &mut self.streams_inbound,
            Resource::StreamsOutbound => &mut self.streams_outbound,
            Resource::Streams => &mut self.streams,
        }
    }

    /// Replace every ceiling that `overrides` sets.
    pub fn apply(mut self, overrides: &PartialLimits) -> Self {
        for resource in Resource::ALL {
            if let Some(value) = overrides.get(resource) {
                *self.get_mut(resource) = value;
            }
        }
        self
    }
}

/// Operator overrides for one scope. `None` keeps the auto-scaled value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialLimits {
    pub memory: Option<u64>,
    pub fds: Option<u64>,
    pub conns_inbound: Option<u64>,
    pub conns_outbound: Option<u64>,
    pub conns: Option<u64>,
    pub streams_inbound: Option<u64>,
    pub streams_outbound: Option<u64>,
    pub streams: Option<u64>,
}

impl PartialLimits {
    fn get(&self, resource: Resource) -> Option<u64> {
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
}

/// Base limits plus growth per GiB of memory budget above 128 MiB.
///
/// File descriptors scale with the fd budget instead: `base.fds +
/// fd_fraction × budget`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingLimits {
    pub base: Limits,
    pub increase: Limits,
    pub fd_fraction: f64,
}

impl ScalingLimits {
    /// Concrete limits for the given memory and fd budgets.
    pub fn scale(&self, memory_budget: u64, fd_budget: u64) -> Limits {
        let extra = memory_budget.saturating_sub(MIN_MEMORY_BUDGET);
        let mut out = self.base;
        for resource in Resource::ALL {
            if resource == Resource::Fds {
                continue;
            }
            let increase = self.increase.get(resource);
            // u128 keeps `increase × extra` from overflowing for large budgets
            let grown = (u128::from(increase) * u128::from(extra)) / u128::from(GIB);
            let grown = u64::try_from(grown).unwrap_or(u64::MAX);
            *out.get_mut(resource) = self.base.get(resource).saturating_add(grown);
        }
        let fds = (self.fd_fraction * fd_budget as f64) as u64;
        out.fds = self.base.fds.saturating_add(fds);
        out
    }
}

const fn limits(
    memory: u64,
    fds: u64,
    conns: (u64, u64, u64),
    streams: (u64, u64, u64),
) -> Limits {
    Limits {
        memory,
        fds,
        conns_inbound: conns.0,
        conns_outbound: conns.1,
        conns: conns.2,
        streams_inbound: streams.0,
        streams_outbound: streams.1,
        streams: streams.2,
    }
}

/// Scaling limits for every scope kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeLimits {
    pub system: ScalingLimits,
    pub transient: ScalingLimits,
    pub peer: ScalingLimits,
    pub protocol: ScalingLimits,
    pub conn: ScalingLimits,
}

impl Default for ScopeLimits {
    fn default() -> Self {
        Self {
            system: ScalingLimits {
                base: limits(128 * MIB, 0, (64, 128, 128), (2048, 4096, 4096)),
                increase: limits(GIB, 0, (64, 128, 128), (2048, 4096, 4096)),
                fd_fraction: 1.0,
            },
            transient: ScalingLimits {
                base: limits(32 * MIB, 0, (32, 64, 64), (128, 256, 256)),
                increase: limits(128 * MIB, 0, (16, 32, 32), (128, 256, 256)),
                fd_fraction: 0.25,
            },
            peer: ScalingLimits {
                base: limits(64 * MIB, 4, (8, 8, 8), (256, 512, 512)),
                increase: limits(128 * MIB, 0, (0, 0, 0), (128, 256, 256)),
                fd_fraction: 1.0 / 64.0,
            },
            protocol: ScalingLimits {
                base: limits(64 * MIB, u64::MAX, (u64::MAX, u64::MAX, u64::MAX), (512, 2048, 2048)),
                increase: limits(128 * MIB, 0, (0, 0, 0), (256, 512, 512)),
                fd_fraction: 0.0,
            },
            conn: ScalingLimits {
                base: limits(32 * MIB, 1, (1, 1, 1), (256, 256, 256)),
                increase: limits(0, 0, (0, 0, 0), (0, 0, 0)),
                fd_fraction: 0.0,
            },
        }
    }
}

/// Resolved ceilings for every scope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub system: Limits,
    pub transient: Limits,
    pub peer: Limits,
    pub protocol: Limits,
    pub conn: Limits,
}

/// Resource manager configuration.
///
/// All limits are auto-scaled from the host's memory and the fd budget;
/// per-scope overrides replace individual ceilings afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceManagerConfig {
    /// Memory budget. Defaults to `max(total memory / 8, 128 MiB)`.
    pub max_memory: Option<u64>,
    /// File descriptor budget. Defaults to [`DEFAULT_FD_BUDGET`].
    pub max_file_descriptors: Option<u64>,
    pub scaling: ScopeLimits,
    pub system: PartialLimits,
    pub transient: PartialLimits,
    pub peer: PartialLimits,
    pub protocol: PartialLimits,
    pub conn: PartialLimits,
}

impl ResourceManagerConfig {
    /// Resolve limits against the host's total memory.
    pub fn resolve(&self) -> ResolvedLimits {
        self.resolve_with_total_memory(total_system_memory())
    }

    /// Resolve limits as if the host had `total_memory` bytes.
    pub fn resolve_with_total_memory(&self, total_memory: u64) -> ResolvedLimits {
        let memory = self
            .max_memory
            .unwrap_or_else(|| (total_memory / 8).max(MIN_MEMORY_BUDGET));
        let fds = self.max_file_descriptors.unwrap_or(DEFAULT_FD_BUDGET);
        debug!(memory, fds, "scaling resource limits");

        let s = &self.scaling;
        ResolvedLimits {
            system: s.system.scale(memory, fds).apply(&self.system),
            transient: s.transient.scale(memory, fds).apply(&self.transient),
            peer: s.peer.scale(memory, fds).apply(&self.peer),
            protocol: s.protocol.scale(memory, fds).apply(&self.protocol),
            conn: s.conn.scale(memory, fds).apply(&self.conn),
        }
    }
}

fn total_system_memory() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.total_memory()
}
