//! Allocation records and pool snapshots

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// A cluster's live allocation within a slice pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAllocation {
    /// Cluster that owns the block
    pub cluster: String,
    /// Allocated CIDR block, in canonical form
    pub cidr: Ipv4Net,
    /// When the block was handed out
    pub allocated_at: DateTime<Utc>,
}

/// Point-in-time copy of a single pool's state
///
/// Taken atomically under the pool lock. The allocations and free blocks
/// together partition the slice subnet; `free_blocks` preserves the pool's
/// canonical ordering (ascending network address, longer prefix first on
/// ties).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Slice the pool belongs to
    pub slice: String,
    /// Outer CIDR block, fixed at pool creation
    pub slice_subnet: Ipv4Net,
    /// Live allocations, sorted by network address
    pub allocated: Vec<ClusterAllocation>,
    /// Free list in pool order
    pub free_blocks: Vec<Ipv4Net>,
}

/// Aggregate counters across all pools of an allocator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamStats {
    /// Registered slice pools
    pub pools: usize,
    /// Live allocations across all pools, VPN reservations included
    pub allocations: usize,
    /// Free-list entries across all pools
    pub free_blocks: usize,
}
