//! CIDR block algebra
//!
//! All arithmetic is done on the `u32` form of the network address, so
//! increments, masks, and comparisons are single-word operations and
//! canonical form is trivially enforced at construction.

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// Builds a canonical block. Callers guarantee `prefix_len <= 32`.
pub(crate) fn block(network: u32, prefix_len: u8) -> Ipv4Net {
    Ipv4Net::new_assert(Ipv4Addr::from(network), prefix_len).trunc()
}

/// Number of addresses covered by a prefix. Callers guarantee
/// `1 <= prefix_len <= 32`.
pub(crate) fn block_len(prefix_len: u8) -> u32 {
    1u32 << (32 - prefix_len)
}

/// Free-list ordering: ascending network address; on equal addresses the
/// longer prefix (smaller block) sorts first.
pub(crate) fn compare(a: &Ipv4Net, b: &Ipv4Net) -> Ordering {
    u32::from(a.network())
        .cmp(&u32::from(b.network()))
        .then_with(|| b.prefix_len().cmp(&a.prefix_len()))
}

/// Merges `b` into `a` when `b` is the immediately following block of the
/// same size, yielding the one-bit-shorter parent.
///
/// Only detects pairs given in `a`-then-`b` order, and does not require the
/// pair to be aligned to the parent boundary: two adjacent same-size blocks
/// straddling their parent merge into the containing block of the shorter
/// mask. Blocks produced by the split policy are always aligned, so that
/// case cannot arise from normal pool operation.
pub(crate) fn try_merge(a: &Ipv4Net, b: &Ipv4Net) -> Option<Ipv4Net> {
    let prefix_len = a.prefix_len();
    if prefix_len != b.prefix_len() || prefix_len == 0 {
        return None;
    }

    let expected_next = u32::from(a.network()).checked_add(block_len(prefix_len))?;
    if expected_next != u32::from(b.network()) {
        return None;
    }

    Some(block(u32::from(a.network()), prefix_len - 1))
}
