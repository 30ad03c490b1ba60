//! Port allocation, one concrete port per declared protocol.
//!
//! Protocol index 0 takes the service's explicit port when it has one.
//! Every other index (and index 0 without an explicit port) draws from the
//! registered range [1024, 49151].
//!
//! Random ports are NOT stable across compilations. Callers that need the
//! same infrastructure on every redeploy must pin `port` on the service.
//! Pinning is the only reproducibility guarantee this allocator makes.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use rand::Rng;
use tracing::debug;

use fargate_core::{ClusterSpec, Protocol, ServiceSpec};

/// Registered (non-privileged, non-ephemeral) port range.
pub const REGISTERED_PORTS: RangeInclusive<u16> = 1024..=49151;

/// Port chosen for one (service, protocol index) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPort {
    pub protocol_index: usize,
    pub protocol: Protocol,
    pub port: u16,
}

/// Cluster-scoped allocator.
///
/// Explicit ports of every service are reserved up front so random draws
/// never land on a port another service pinned. Each cluster gets its own
/// allocator; nothing is shared between clusters.
#[derive(Debug, Default)]
pub struct PortAllocator {
    taken: HashSet<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_cluster(spec: &ClusterSpec) -> Self {
        Self {
            taken: spec.services.iter().filter_map(|s| s.port).collect(),
        }
    }

    /// Allocate ports for every protocol of `service`, in declaration order.
    pub fn allocate<R: Rng>(&mut self, service: &ServiceSpec, rng: &mut R) -> Vec<ResolvedPort> {
        let ports: Vec<ResolvedPort> = service
            .protocols
            .iter()
            .enumerate()
            .map(|(index, proto)| {
                let port = match (index, service.port) {
                    (0, Some(port)) => port,
                    _ => self.draw(rng),
                };
                ResolvedPort {
                    protocol_index: index,
                    protocol: proto.protocol,
                    port,
                }
            })
            .collect();
        debug!(
            service = %service.name,
            ports = ?ports.iter().map(|p| p.port).collect::<Vec<_>>(),
            "allocated ports"
        );
        ports
    }

    fn draw<R: Rng>(&mut self, rng: &mut R) -> u16 {
        let capacity = REGISTERED_PORTS.len();
        loop {
            let port = rng.gen_range(REGISTERED_PORTS);
            // Once the range is exhausted, reuse rather than spin.
            if self.taken.insert(port) || self.taken.len() >= capacity {
                return port;
            }
        }
    }
}
