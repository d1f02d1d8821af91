//! Identity and lifecycle metadata for pool members

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a pool, used in logs and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Identifier of a member, unique within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub(crate) u64);

impl MemberId {
    /// The raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// Capability shared by everything the pool hands out or reports on
pub trait ResourcePoolMember {
    /// Identifier within the owning pool
    fn member_id(&self) -> MemberId;

    /// When the underlying resource was created. Never changes.
    fn created_timestamp(&self) -> Instant;

    /// When the member was last acquired, or its creation time if never acquired
    fn last_used_timestamp(&self) -> Instant;
}

/// Creation and usage stamps carried alongside every resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MemberStamps {
    pub id: MemberId,
    pub created_at: Instant,
    pub last_used: Instant,
}

impl MemberStamps {
    pub fn new(id: MemberId, now: Instant) -> Self {
        Self {
            id,
            created_at: now,
            last_used: now,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
    }
}

/// Point-in-time view of one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: MemberId,
    pub created_at: Instant,
    pub last_used: Instant,
    pub in_use: bool,
}

impl MemberInfo {
    pub(crate) fn from_stamps(stamps: &MemberStamps, in_use: bool) -> Self {
        Self {
            id: stamps.id,
            created_at: stamps.created_at,
            last_used: stamps.last_used,
            in_use,
        }
    }
}

impl ResourcePoolMember for MemberInfo {
    fn member_id(&self) -> MemberId {
        self.id
    }

    fn created_timestamp(&self) -> Instant {
        self.created_at
    }

    fn last_used_timestamp(&self) -> Instant {
        self.last_used
    }
}
