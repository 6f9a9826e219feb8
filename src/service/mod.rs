//! IPAM allocator service

mod allocator;

pub use allocator::{DynamicIpamAllocator, IpamAllocator, IpamConfig};
