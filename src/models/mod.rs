//! Data models for pool state observation

mod allocation;

pub use allocation::{ClusterAllocation, IpamStats, PoolSnapshot};
