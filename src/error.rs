//! Error types for slice IPAM operations

use ipnet::Ipv4Net;
use thiserror::Error;

/// Result type for IPAM operations
pub type Result<T> = std::result::Result<T, Error>;

/// IPAM allocator errors
///
/// Every variant carries the slice (and where relevant the cluster and
/// requested prefix) so callers can act on the failure without extra lookups.
/// All errors are non-fatal; pool state is left with its invariants intact.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Validation errors
    #[error("invalid slice subnet CIDR {cidr:?} for slice {slice}: {reason}")]
    InvalidCidr {
        slice: String,
        cidr: String,
        reason: String,
    },

    #[error("requested prefix /{requested} for cluster {cluster} in slice {slice} is not a valid IPv4 prefix length")]
    InvalidPrefix {
        slice: String,
        cluster: String,
        requested: u8,
    },

    // Precondition errors
    #[error("ipam pool for slice {slice} is not initialized")]
    PoolNotInitialized { slice: String },

    #[error("cluster {cluster} has no allocated subnet in slice {slice} to reclaim")]
    NotAllocated { slice: String, cluster: String },

    #[error("cluster {cluster} in slice {slice} already has subnet {existing} but requested /{requested}; re-allocation is not supported")]
    ReallocationUnsupported {
        slice: String,
        cluster: String,
        existing: Ipv4Net,
        requested: u8,
    },

    // Capacity errors
    #[error("no available subnet of size /{requested} for cluster {cluster} in pool for slice {slice}")]
    NoFreeBlock {
        slice: String,
        cluster: String,
        requested: u8,
    },

    #[error("failed to reserve VPN subnet for slice {slice}")]
    VpnReservationFailed {
        slice: String,
        #[source]
        source: Box<Error>,
    },

    // Transport errors
    #[error("operation on slice {slice} was cancelled before it started")]
    Cancelled { slice: String },
}
