//! Page arena & typed slab pool.
//!
//! One mutex (the "pool mutex") protects the raw page free-list and all
//! four typed free-lists (inode, dirent, dblkref, iblkref records). A
//! typed allocation that finds its free-list empty pops one raw page from
//! the arena, splits it into fixed-size records, and pushes every record
//! onto the typed list before returning one — all inside the single
//! critical section a caller already holds, so no other thread can
//! observe a half-carved page.
//!
//! Carving is irreversible: once a page is split into typed records it
//! never returns to the raw free-list. The pool grows lazily, carving
//! pages out of the shared [`Arena`] one at a time as each typed slab's
//! free-list runs dry.

use std::mem::size_of;

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::lock::Named;
use crate::page::{Bn, PAGE_SIZE};

/// A handle into a typed slab: the page that was carved to produce the
/// record, and the record's slot within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabHandle {
    pub bn: Bn,
    pub slot: u32,
}

const FREE_SENTINEL: u64 = u64::MAX;

fn encode(h: SlabHandle) -> u64 {
    (h.bn.0 << 16) | h.slot as u64
}

fn decode(v: u64) -> SlabHandle {
    SlabHandle {
        bn: Bn(v >> 16),
        slot: (v & 0xFFFF) as u32,
    }
}

/// Implemented by every record type the pool slabs pages into. Each record
/// reserves its own embedded "next" field so the free-list threads
/// directly through the records themselves, with no separate bookkeeping
/// array.
pub trait SlabRecord: Copy {
    fn free_next(&self) -> u64;
    fn set_free_next(&mut self, v: u64);
    fn zeroed() -> Self;
}

/// One typed free-list plus the raw pages it has carved.
struct Slab<R: SlabRecord> {
    free_head: u64,
    carved_pages: Vec<Bn>,
    _marker: std::marker::PhantomData<R>,
}

impl<R: SlabRecord> Slab<R> {
    fn new() -> Self {
        Self {
            free_head: FREE_SENTINEL,
            carved_pages: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    fn per_page() -> usize {
        PAGE_SIZE / size_of::<R>()
    }

    /// # Safety
    /// `bn` must address a page within `arena` that is not shared with any
    /// other typed slab or the raw free-list.
    unsafe fn carve(&mut self, arena: &Arena, bn: Bn) {
        arena.zero_page(bn);
        let per_page = Self::per_page();
        let base = arena.block_ptr(bn) as *mut R;
        for slot in (0..per_page).rev() {
            let rec = &mut *base.add(slot);
            *rec = R::zeroed();
            let handle = SlabHandle { bn, slot: slot as u32 };
            rec.set_free_next(self.free_head);
            self.free_head = encode(handle);
        }
        self.carved_pages.push(bn);
    }

    fn record_ptr(&self, arena: &Arena, handle: SlabHandle) -> *mut R {
        // SAFETY: handle was produced by `carve`, so bn addresses a page
        // carved for this slab and slot < per_page.
        unsafe { (arena.block_ptr(handle.bn) as *mut R).add(handle.slot as usize) }
    }

    fn alloc(&mut self, arena: &Arena, raw: &mut RawFreeList) -> Result<SlabHandle> {
        if self.free_head == FREE_SENTINEL {
            let bn = raw.pop().ok_or(Error::NoSpace)?;
            // SAFETY: `bn` was just popped from the raw free-list, so it is
            // not owned by any other slab or in use as a data page.
            unsafe { self.carve(arena, bn) };
        }
        let handle = decode(self.free_head);
        // SAFETY: `handle` is the head of this slab's own free-list.
        let rec = unsafe { &*self.record_ptr(arena, handle) };
        self.free_head = rec.free_next();
        Ok(handle)
    }

    fn free(&mut self, arena: &Arena, handle: SlabHandle) {
        let rec = self.record_ptr(arena, handle);
        // SAFETY: handle was allocated from this slab and the caller no
        // longer holds any reference to it.
        unsafe {
            (*rec).set_free_next(self.free_head);
        }
        self.free_head = encode(handle);
    }

    fn get<'a>(&self, arena: &'a Arena, handle: SlabHandle) -> &'a R {
        // SAFETY: caller holds the pool mutex and `handle` is live.
        unsafe { &*self.record_ptr(arena, handle) }
    }

    fn get_mut<'a>(&self, arena: &'a Arena, handle: SlabHandle) -> &'a mut R {
        // SAFETY: caller holds the pool mutex and `handle` is live.
        unsafe { &mut *self.record_ptr(arena, handle) }
    }
}

/// The raw page free-list: a LIFO stack of unused arena pages.
struct RawFreeList {
    stack: Vec<Bn>,
}

impl RawFreeList {
    fn new(arena: &Arena) -> Self {
        // Pages 0/1 are reserved (crate::arena::RESERVED_PAGES) and never
        // enter the free-list, so `Bn(0)` stays safe to use as the "no
        // block" sentinel. The rest start free; push in
        // descending order so low block numbers are handed out first
        // (cosmetic, matches the "first write wins the lowest bn"
        // behavior tests rely on).
        let stack = (crate::arena::RESERVED_PAGES..arena.num_pages()).rev().map(Bn).collect();
        Self { stack }
    }

    fn pop(&mut self) -> Option<Bn> {
        self.stack.pop()
    }

    fn push(&mut self, bn: Bn) {
        self.stack.push(bn);
    }

    fn len(&self) -> u64 {
        self.stack.len() as u64
    }
}

use crate::dir::DirentRecord;
use crate::file::{DblkrefRecord, IblkrefRecord};
use crate::inode::InodeRecord;

struct PoolInner {
    raw: RawFreeList,
    inodes: Slab<InodeRecord>,
    dirents: Slab<DirentRecord>,
    dblkrefs: Slab<DblkrefRecord>,
    iblkrefs: Slab<IblkrefRecord>,
}

/// The page-pool allocator: one mutex over the raw stack and every typed
/// free-list.
pub struct Pool {
    inner: Named<PoolInner>,
}

impl Pool {
    pub fn new(arena: &Arena) -> Self {
        Self {
            inner: Named::new(
                "POOL",
                PoolInner {
                    raw: RawFreeList::new(arena),
                    inodes: Slab::new(),
                    dirents: Slab::new(),
                    dblkrefs: Slab::new(),
                    iblkrefs: Slab::new(),
                },
            ),
        }
    }

    /// Allocates one raw page directly from the arena, bypassing the typed
    /// slabs. Used for file data blocks and for the long-symlink page.
    pub fn alloc_page(&self) -> Result<Bn> {
        let mut inner = self.inner.lock();
        let bn = inner.raw.pop().ok_or_else(|| {
            log::warn!("pool: raw page free-list exhausted");
            Error::NoSpace
        })?;
        Ok(bn)
    }

    /// Returns a page to the raw free-list.
    ///
    /// A page that was carved into a typed slab must never be returned
    /// here; this is a programming error and panics rather than
    /// corrupting the raw free-list.
    pub fn free_page(&self, arena: &Arena, bn: Bn) {
        let mut inner = self.inner.lock();
        assert!(
            !inner.inodes.carved_pages.contains(&bn)
                && !inner.dirents.carved_pages.contains(&bn)
                && !inner.dblkrefs.carved_pages.contains(&bn)
                && !inner.iblkrefs.carved_pages.contains(&bn),
            "free_page: {} was carved into a typed slab and can never return to the raw pool",
            bn
        );
        let _ = arena;
        inner.raw.push(bn);
    }

    pub fn alloc_inode(&self, arena: &Arena) -> Result<SlabHandle> {
        let mut inner = self.inner.lock();
        let PoolInner { raw, inodes, .. } = &mut *inner;
        inodes.alloc(arena, raw)
    }

    pub fn free_inode(&self, arena: &Arena, handle: SlabHandle) {
        self.inner.lock().inodes.free(arena, handle);
    }

    pub fn inode<'a>(&self, arena: &'a Arena, handle: SlabHandle) -> InodeRecord {
        *self.inner.lock().inodes.get(arena, handle)
    }

    pub fn with_inode_mut<F: FnOnce(&mut InodeRecord) -> T, T>(
        &self,
        arena: &Arena,
        handle: SlabHandle,
        f: F,
    ) -> T {
        let inner = self.inner.lock();
        f(inner.inodes.get_mut(arena, handle))
    }

    pub fn alloc_dirent(&self, arena: &Arena) -> Result<SlabHandle> {
        let mut inner = self.inner.lock();
        let PoolInner { raw, dirents, .. } = &mut *inner;
        dirents.alloc(arena, raw)
    }

    pub fn free_dirent(&self, arena: &Arena, handle: SlabHandle) {
        self.inner.lock().dirents.free(arena, handle);
    }

    pub fn with_dirent<F: FnOnce(&DirentRecord) -> T, T>(
        &self,
        arena: &Arena,
        handle: SlabHandle,
        f: F,
    ) -> T {
        let inner = self.inner.lock();
        f(inner.dirents.get(arena, handle))
    }

    pub fn with_dirent_mut<F: FnOnce(&mut DirentRecord) -> T, T>(
        &self,
        arena: &Arena,
        handle: SlabHandle,
        f: F,
    ) -> T {
        let inner = self.inner.lock();
        f(inner.dirents.get_mut(arena, handle))
    }

    pub fn alloc_dblkref(&self, arena: &Arena, rec: DblkrefRecord) -> Result<SlabHandle> {
        let mut inner = self.inner.lock();
        let PoolInner { raw, dblkrefs, .. } = &mut *inner;
        let handle = dblkrefs.alloc(arena, raw)?;
        *dblkrefs.get_mut(arena, handle) = rec;
        Ok(handle)
    }

    pub fn free_dblkref(&self, arena: &Arena, handle: SlabHandle) {
        self.inner.lock().dblkrefs.free(arena, handle);
    }

    pub fn dblkref(&self, arena: &Arena, handle: SlabHandle) -> DblkrefRecord {
        *self.inner.lock().dblkrefs.get(arena, handle)
    }

    pub fn with_dblkref_mut<F: FnOnce(&mut DblkrefRecord) -> T, T>(
        &self,
        arena: &Arena,
        handle: SlabHandle,
        f: F,
    ) -> T {
        let inner = self.inner.lock();
        f(inner.dblkrefs.get_mut(arena, handle))
    }

    pub fn alloc_iblkref(&self, arena: &Arena, rec: IblkrefRecord) -> Result<SlabHandle> {
        let mut inner = self.inner.lock();
        let PoolInner { raw, iblkrefs, .. } = &mut *inner;
        let handle = iblkrefs.alloc(arena, raw)?;
        *iblkrefs.get_mut(arena, handle) = rec;
        Ok(handle)
    }

    pub fn free_iblkref(&self, arena: &Arena, handle: SlabHandle) {
        self.inner.lock().iblkrefs.free(arena, handle);
    }

    pub fn iblkref(&self, arena: &Arena, handle: SlabHandle) -> IblkrefRecord {
        *self.inner.lock().iblkrefs.get(arena, handle)
    }

    pub fn with_iblkref_mut<F: FnOnce(&mut IblkrefRecord) -> T, T>(
        &self,
        arena: &Arena,
        handle: SlabHandle,
        f: F,
    ) -> T {
        let inner = self.inner.lock();
        f(inner.iblkrefs.get_mut(arena, handle))
    }

    /// Raw pages still free, for statvfs accounting.
    pub fn free_raw_pages(&self) -> u64 {
        self.inner.lock().raw.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::DblkrefRecord;

    #[test]
    fn typed_allocation_carves_pages_lazily() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let before = pool.free_raw_pages();

        let h1 = pool
            .alloc_dblkref(&arena, DblkrefRecord { bn: Bn(1), refcount: 1, free_next: 0 })
            .unwrap();
        // One raw page must have been carved to back the dblkref slab.
        assert_eq!(pool.free_raw_pages(), before - 1);

        let h2 = pool
            .alloc_dblkref(&arena, DblkrefRecord { bn: Bn(2), refcount: 1, free_next: 0 })
            .unwrap();
        // The same carved page still has free slots.
        assert_eq!(pool.free_raw_pages(), before - 1);
        assert_ne!(h1, h2);

        pool.free_dblkref(&arena, h1);
        pool.free_dblkref(&arena, h2);
    }

    #[test]
    fn raw_pages_never_hand_out_reserved_block_numbers() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        assert_eq!(pool.free_raw_pages(), arena.usable_pages());
        for _ in 0..8 {
            let bn = pool.alloc_page().unwrap();
            assert!(bn.0 >= crate::arena::RESERVED_PAGES, "allocated reserved block number {}", bn.0);
        }
    }

    #[test]
    fn out_of_space_when_raw_stack_drained() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let total = arena.usable_pages();
        for _ in 0..total {
            pool.alloc_page().unwrap();
        }
        assert_eq!(pool.alloc_page().unwrap_err(), Error::NoSpace);
    }

    #[test]
    #[should_panic(expected = "carved into a typed slab")]
    fn freeing_a_carved_page_as_raw_panics() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let h = pool
            .alloc_dblkref(&arena, DblkrefRecord { bn: Bn(1), refcount: 1, free_next: 0 })
            .unwrap();
        let bn = {
            let inner = pool.inner.lock();
            inner.dblkrefs.carved_pages[0]
        };
        pool.free_dblkref(&arena, h);
        pool.free_page(&arena, bn);
    }
}
