//! Process-wide host id allocation

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// Value never handed out as the id of any host
pub const INVALID_HOST_ID: i32 = -1;

static GLOBAL_ALLOCATOR: UniqueIdAllocator = UniqueIdAllocator::new();

/// Identifier of a live [`ChildProcessHost`](crate::ChildProcessHost)
///
/// A `HostId` can only be obtained from a [`UniqueIdAllocator`], so it never
/// holds [`INVALID_HOST_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(i32);

impl HostId {
    /// Allocate a fresh id from the process-wide allocator
    pub fn allocate() -> Self {
        GLOBAL_ALLOCATOR.allocate()
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source
///
/// Ids start at 1 and strictly increase. They are never reused within the
/// lifetime of the allocator, so no two hosts can ever share one.
#[derive(Debug)]
pub struct UniqueIdAllocator {
    next: AtomicI32,
}

impl UniqueIdAllocator {
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an allocator whose first id is `first`
    ///
    /// # Panics
    ///
    /// Panics if `first` is not positive.
    pub const fn starting_at(first: i32) -> Self {
        assert!(first > 0, "host ids must be positive");
        Self {
            next: AtomicI32::new(first),
        }
    }

    /// Hand out the next id
    ///
    /// The counter always holds the id after the one returned, so the last
    /// id handed out is `i32::MAX - 1`. `i32::MAX` is never used.
    ///
    /// # Panics
    ///
    /// Exhausting the id space is unrecoverable for every host in the
    /// process, so it panics instead of returning an error.
    pub fn allocate(&self) -> HostId {
        match self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        {
            Ok(id) => HostId(id),
            Err(_) => {
                tracing::error!("host id space exhausted");
                panic!("host id space exhausted");
            }
        }
    }
}

impl Default for UniqueIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
