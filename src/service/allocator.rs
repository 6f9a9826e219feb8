//! Dynamic IPAM allocator
//!
//! Routes public operations to per-slice pools. A single registry lock
//! guards the slice-name map and is always released before the pool lock is
//! taken, so operations on distinct slices never contend past the lookup.

use std::collections::HashMap;
use std::sync::Arc;

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allocator::SlicePool;
use crate::error::{Error, Result};
use crate::models::{IpamStats, PoolSnapshot};
use crate::reserved;

/// Trait for dynamic slice IPAM
///
/// `allocate` and `reclaim` take a cancellation token checked at entry; a
/// token cancelled before the pool is touched fails fast without mutation.
/// Cancellation once work has begun is ignored.
pub trait IpamAllocator: Send + Sync {
    /// Set up the pool for a slice. Idempotent: a second call for an already
    /// registered slice succeeds without re-validating the subnet.
    fn initialize_pool(&self, slice_name: &str, slice_subnet: &str) -> Result<()>;

    /// Allocate a block of exactly `required_prefix_len` bits to a cluster.
    /// Returns the existing block unchanged when the cluster already holds
    /// one of the requested size.
    fn allocate(
        &self,
        ctx: &CancellationToken,
        slice_name: &str,
        cluster_name: &str,
        required_prefix_len: u8,
    ) -> Result<Ipv4Net>;

    /// Return a cluster's block to the slice pool, merging adjacent free
    /// blocks to counter fragmentation.
    fn reclaim(&self, ctx: &CancellationToken, slice_name: &str, cluster_name: &str)
        -> Result<()>;
}

/// Configuration for [`DynamicIpamAllocator`]
#[derive(Debug, Clone)]
pub struct IpamConfig {
    /// Cluster name holding each slice's VPN reservation
    pub vpn_cluster_name: String,
    /// Prefix length of the VPN reservation
    pub vpn_prefix_len: u8,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            vpn_cluster_name: reserved::VPN_CLUSTER_NAME.to_string(),
            vpn_prefix_len: reserved::VPN_PREFIX_LEN,
        }
    }
}

/// In-memory IPAM allocator holding one pool per slice
///
/// Pools are created on demand by [`IpamAllocator::initialize_pool`] and
/// never destroyed. State lives entirely in memory; the host persists and
/// replays what it needs.
pub struct DynamicIpamAllocator {
    config: IpamConfig,
    pools: Mutex<HashMap<String, Arc<Mutex<SlicePool>>>>,
}

impl DynamicIpamAllocator {
    /// Create an allocator with the default configuration
    pub fn new() -> Self {
        Self::with_config(IpamConfig::default())
    }

    /// Create an allocator with a custom configuration
    pub fn with_config(config: IpamConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a slice's pool handle, releasing the registry lock before
    /// returning.
    fn pool(&self, slice_name: &str) -> Result<Arc<Mutex<SlicePool>>> {
        self.pools
            .lock()
            .get(slice_name)
            .cloned()
            .ok_or_else(|| Error::PoolNotInitialized {
                slice: slice_name.to_string(),
            })
    }

    /// Atomic copy of one pool's state
    pub fn snapshot(&self, slice_name: &str) -> Result<PoolSnapshot> {
        let pool = self.pool(slice_name)?;
        let snapshot = pool.lock().snapshot();
        Ok(snapshot)
    }

    /// Registered slice names, sorted
    pub fn list_pools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Aggregate counters across all pools
    pub fn stats(&self) -> IpamStats {
        let pools: Vec<Arc<Mutex<SlicePool>>> = self.pools.lock().values().cloned().collect();

        let mut stats = IpamStats {
            pools: pools.len(),
            ..IpamStats::default()
        };
        for pool in pools {
            let guard = pool.lock();
            stats.allocations += guard.allocation_count();
            stats.free_blocks += guard.free_block_count();
        }
        stats
    }
}

impl Default for DynamicIpamAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IpamAllocator for DynamicIpamAllocator {
    fn initialize_pool(&self, slice_name: &str, slice_subnet: &str) -> Result<()> {
        let pool = {
            let mut pools = self.pools.lock();
            if pools.contains_key(slice_name) {
                debug!(slice = %slice_name, "pool already initialized");
                return Ok(());
            }

            let subnet: Ipv4Net = slice_subnet
                .parse()
                .map_err(|e: ipnet::AddrParseError| Error::InvalidCidr {
                    slice: slice_name.to_string(),
                    cidr: slice_subnet.to_string(),
                    reason: e.to_string(),
                })?;

            let pool = Arc::new(Mutex::new(SlicePool::new(slice_name, subnet.trunc())));
            pools.insert(slice_name.to_string(), pool.clone());
            pool
        };

        // Every slice carries a VPN subnet whether or not a cluster ever
        // asks for it. On failure the pool stays registered with the
        // reservation unserved; callers see the error and can retire the
        // slice.
        let vpn = {
            let mut guard = pool.lock();
            match guard.allocate(&self.config.vpn_cluster_name, self.config.vpn_prefix_len) {
                Ok(net) => net,
                Err(source) => {
                    warn!(
                        slice = %slice_name,
                        subnet = %guard.slice_subnet(),
                        error = %source,
                        "VPN reservation failed during pool initialization"
                    );
                    return Err(Error::VpnReservationFailed {
                        slice: slice_name.to_string(),
                        source: Box::new(source),
                    });
                }
            }
        };

        info!(
            slice = %slice_name,
            subnet = %slice_subnet,
            vpn = %vpn,
            "initialized IPAM pool"
        );

        Ok(())
    }

    fn allocate(
        &self,
        ctx: &CancellationToken,
        slice_name: &str,
        cluster_name: &str,
        required_prefix_len: u8,
    ) -> Result<Ipv4Net> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled {
                slice: slice_name.to_string(),
            });
        }

        let pool = self.pool(slice_name)?;
        let allocated = pool.lock().allocate(cluster_name, required_prefix_len)?;

        info!(
            slice = %slice_name,
            cluster = %cluster_name,
            cidr = %allocated,
            "allocated subnet"
        );

        Ok(allocated)
    }

    fn reclaim(
        &self,
        ctx: &CancellationToken,
        slice_name: &str,
        cluster_name: &str,
    ) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled {
                slice: slice_name.to_string(),
            });
        }

        let pool = self.pool(slice_name)?;
        let reclaimed = pool.lock().reclaim(cluster_name)?;

        info!(
            slice = %slice_name,
            cluster = %cluster_name,
            cidr = %reclaimed,
            "reclaimed subnet"
        );

        Ok(())
    }
}
