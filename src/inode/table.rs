//! Inode table: ino → live inode-info, separate chaining, one mutex over
//! the whole bucket array.

use std::collections::VecDeque;

use crate::lock::Named;
use crate::pool::SlabHandle;

/// Sentinel identifying a live, correctly-typed [`InodeInfo`]. Rust's
/// ownership already rules out reading a freed `InodeInfo`, so nothing
/// ever strictly needs to check this, but the field stays so a corrupted
/// table is detectable in debug builds.
pub const IMAGIC: u32 = 0x696e_6f64;

/// Default bucket count. Construct with [`InodeTable::with_buckets`] for
/// a different size.
pub const DEFAULT_BUCKETS: usize = 33377;

/// Per-live-inode control block binding an inode number to its slab slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InodeInfo {
    pub imagic: u32,
    pub ino: u64,
    pub handle: SlabHandle,
}

impl InodeInfo {
    pub fn new(ino: u64, handle: SlabHandle) -> Self {
        Self { imagic: IMAGIC, ino, handle }
    }
}

struct TableInner {
    buckets: Vec<VecDeque<InodeInfo>>,
}

/// Fixed-size chained hash table from ino to [`InodeInfo`]. One mutex
/// guards every bucket; there is no per-bucket locking.
pub struct InodeTable {
    inner: Named<TableInner>,
    nbuckets: usize,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    /// Constructs a table with a caller-chosen bucket count.
    pub fn with_buckets(nbuckets: usize) -> Self {
        assert!(nbuckets > 0, "InodeTable::with_buckets: nbuckets must be positive");
        Self {
            inner: Named::new("ITABLE", TableInner { buckets: (0..nbuckets).map(|_| VecDeque::new()).collect() }),
            nbuckets,
        }
    }

    fn bucket_of(&self, ino: u64) -> usize {
        (ino % self.nbuckets as u64) as usize
    }

    pub fn find(&self, ino: u64) -> Option<InodeInfo> {
        let inner = self.inner.lock();
        inner.buckets[self.bucket_of(ino)].iter().find(|info| info.ino == ino).copied()
    }

    /// Inserts `info`. Inserting the same `ino` twice is a programming
    /// error.
    pub fn insert(&self, info: InodeInfo) {
        let mut inner = self.inner.lock();
        let bucket = &mut inner.buckets[(info.ino % self.nbuckets as u64) as usize];
        assert!(
            !bucket.iter().any(|existing| existing.ino == info.ino),
            "InodeTable::insert: ino {} already present",
            info.ino
        );
        bucket.push_front(info);
    }

    /// Removes the entry for `ino`. Removing a non-member is a
    /// programming error.
    pub fn remove(&self, ino: u64) -> InodeInfo {
        let mut inner = self.inner.lock();
        let bucket = &mut inner.buckets[(ino % self.nbuckets as u64) as usize];
        let pos = bucket
            .iter()
            .position(|info| info.ino == ino)
            .unwrap_or_else(|| panic!("InodeTable::remove: ino {} is not a member", ino));
        bucket.remove(pos).unwrap()
    }

    /// Current bucket count.
    pub fn buckets(&self) -> usize {
        self.nbuckets
    }

    /// Rehashes every live entry into a table with `new_buckets` slots,
    /// under the table mutex for the whole operation. Lets the bucket
    /// count grow under load rather than only being settable at
    /// construction via [`InodeTable::with_buckets`].
    pub fn resize(&mut self, new_buckets: usize) {
        assert!(new_buckets > 0, "InodeTable::resize: new_buckets must be positive");
        let mut inner = self.inner.lock();
        let mut fresh: Vec<VecDeque<InodeInfo>> = (0..new_buckets).map(|_| VecDeque::new()).collect();
        for bucket in inner.buckets.drain(..) {
            for info in bucket {
                fresh[(info.ino % new_buckets as u64) as usize].push_front(info);
            }
        }
        inner.buckets = fresh;
        drop(inner);
        self.nbuckets = new_buckets;
        log::debug!("itable: resized to {} buckets", new_buckets);
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
