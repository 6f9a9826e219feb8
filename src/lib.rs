//! Dynamic IPAM for network slices
//!
//! Partitions fixed IPv4 address spaces ("slice subnets") into variably sized
//! CIDR sub-blocks on behalf of named consumers ("clusters"):
//! - First-fit allocation with lazy binary splitting of free blocks
//! - Coalescing free list that re-merges adjacent siblings on reclaim
//! - One independent pool per slice, all held by a single allocator
//! - Thread-safe: a registry lock routes to per-pool locks
//!
//! The allocator is purely in-memory; persistence, the control-plane RPC
//! surface, and the reconcile loop that drives it live in the host.

pub mod allocator;
pub mod error;
pub mod models;
pub mod service;

// Re-export core types
pub use allocator::SlicePool;
pub use error::{Error, Result};
pub use models::{ClusterAllocation, IpamStats, PoolSnapshot};
pub use service::{DynamicIpamAllocator, IpamAllocator, IpamConfig};

/// Reserved per-slice allocations
pub mod reserved {
    /// Cluster name under which every slice's VPN subnet is held.
    ///
    /// Consumed at pool initialization; callers must not reuse it for a
    /// regular cluster.
    pub const VPN_CLUSTER_NAME: &str = "VPN_Subnet";

    /// Prefix length of the VPN subnet carved out of every new pool.
    pub const VPN_PREFIX_LEN: u8 = 24;
}
