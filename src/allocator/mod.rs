//! Slice pool allocation internals
//!
//! Provides the per-slice pool (free list + allocation map) and the CIDR
//! block algebra it is built on: canonical ordering, binary splitting, and
//! sibling coalescing over the 32-bit IPv4 address space.

mod cidr;
mod pool;

pub use pool::SlicePool;
