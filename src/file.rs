//! Regular-file page map and file engine.
//!
//! A regular inode's content is a sorted, singly-linked chain of
//! [`IblkrefRecord`]s keyed by page-aligned file offset, each pointing at
//! a refcounted [`DblkrefRecord`] that owns one arena data page. Missing
//! offsets are holes. An unbounded sorted chain, rather than a fixed
//! direct/indirect block table, is what lets a hole be punched anywhere
//! in the file rather than only truncating a tail.

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::page::{page_floor, page_index, Bn, PAGE_SIZE};
use crate::pool::{Pool, SlabHandle, SlabRecord};

/// Largest byte offset a file may address.
pub const TOYFS_ISIZE_MAX: u64 = 1 << 50;

const FREE_SENTINEL: u64 = u64::MAX;
const CHAIN_END: u64 = u64::MAX;

fn encode(h: SlabHandle) -> u64 {
    (h.bn.0 << 16) | h.slot as u64
}
fn decode(v: u64) -> SlabHandle {
    SlabHandle { bn: Bn(v >> 16), slot: (v & 0xFFFF) as u32 }
}

/// A reference-counted handle to one data page.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct DblkrefRecord {
    pub bn: Bn,
    pub refcount: u32,
    pub free_next: u64,
}

impl SlabRecord for DblkrefRecord {
    fn free_next(&self) -> u64 {
        self.free_next
    }
    fn set_free_next(&mut self, v: u64) {
        self.free_next = v;
    }
    fn zeroed() -> Self {
        Self { bn: Bn(0), refcount: 0, free_next: FREE_SENTINEL }
    }
}

/// One entry in a file's block map: a page-aligned file offset bound to
/// a [`DblkrefRecord`] handle, chained in strictly ascending offset order.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct IblkrefRecord {
    pub file_offset: u64,
    pub dblkref: u64,
    next: u64,
    free_next: u64,
}

impl SlabRecord for IblkrefRecord {
    fn free_next(&self) -> u64 {
        self.free_next
    }
    fn set_free_next(&mut self, v: u64) {
        self.free_next = v;
    }
    fn zeroed() -> Self {
        Self { file_offset: 0, dblkref: FREE_SENTINEL, next: CHAIN_END, free_next: FREE_SENTINEL }
    }
}

impl IblkrefRecord {
    pub(crate) fn dblkref_handle(&self) -> SlabHandle {
        decode(self.dblkref)
    }
}

/// The regular-file part of an inode's payload: the head of the sorted
/// iblkref chain and the first-parent ino.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct RegPayload {
    pub block_head: u64,
    pub first_parent: u64,
}

impl RegPayload {
    pub fn new(first_parent: u64) -> Self {
        Self { block_head: CHAIN_END, first_parent }
    }
}

pub(crate) fn iblkref_chain(pool: &Pool, arena: &Arena, reg: &RegPayload) -> Vec<(SlabHandle, IblkrefRecord)> {
    let mut out = Vec::new();
    let mut cur = reg.block_head;
    while cur != CHAIN_END {
        let handle = decode(cur);
        let rec = pool.with_iblkref_mut(arena, handle, |r| *r);
        out.push((handle, rec));
        cur = rec.next;
    }
    out
}

pub(crate) fn find_iblkref(pool: &Pool, arena: &Arena, reg: &RegPayload, boff: u64) -> Option<(SlabHandle, IblkrefRecord)> {
    iblkref_chain(pool, arena, reg).into_iter().find(|(_, r)| r.file_offset == boff)
}

pub(crate) fn bn_for_handle(pool: &Pool, arena: &Arena, dblkref: SlabHandle) -> Bn {
    pool.dblkref(arena, dblkref).bn
}

/// Inserts a new iblkref (with a fresh private dblkref and page) at
/// `boff`, keeping the chain sorted ascending by offset.
///
/// Each allocation step is wrapped in a `scopeguard` that undoes it on an
/// early return, disarmed with `into_inner` once the next step succeeds,
/// so a failure partway through never leaks a page or a dblkref slot.
fn insert_new_block(pool: &Pool, arena: &Arena, reg: &mut RegPayload, boff: u64) -> Result<(SlabHandle, Bn)> {
    let bn = pool.alloc_page().map_err(|_| Error::NoSpace)?;
    let bn_guard = scopeguard::guard(bn, |bn| pool.free_page(arena, bn));
    arena.zero_page(bn);

    let dblkref = pool.alloc_dblkref(arena, DblkrefRecord { bn, refcount: 1, free_next: 0 }).map_err(|_| Error::NoSpace)?;
    let dblkref_guard = scopeguard::guard(dblkref, |d| pool.free_dblkref(arena, d));

    let handle = pool
        .alloc_iblkref(arena, IblkrefRecord { file_offset: boff, dblkref: encode(dblkref), next: CHAIN_END, free_next: 0 })
        .map_err(|_| Error::NoSpace)?;

    scopeguard::ScopeGuard::into_inner(dblkref_guard);
    scopeguard::ScopeGuard::into_inner(bn_guard);
    splice_sorted(pool, arena, reg, handle, boff);
    Ok((handle, bn))
}

fn splice_sorted(pool: &Pool, arena: &Arena, reg: &mut RegPayload, handle: SlabHandle, boff: u64) {
    let mut prev_encoded: Option<u64> = None;
    let mut cur = reg.block_head;
    while cur != CHAIN_END {
        let cur_handle = decode(cur);
        let cur_off = pool.with_iblkref_mut(arena, cur_handle, |r| r.file_offset);
        if cur_off > boff {
            break;
        }
        prev_encoded = Some(cur);
        cur = pool.with_iblkref_mut(arena, cur_handle, |r| r.next);
    }
    pool.with_iblkref_mut(arena, handle, |r| r.next = cur);
    match prev_encoded {
        Some(prev) => {
            let prev_handle = decode(prev);
            pool.with_iblkref_mut(arena, prev_handle, |r| r.next = encode(handle));
        }
        None => reg.block_head = encode(handle),
    }
}

fn unlink(pool: &Pool, arena: &Arena, reg: &mut RegPayload, target: SlabHandle) {
    let target_off = pool.with_iblkref_mut(arena, target, |r| r.file_offset);
    let mut prev_encoded: Option<u64> = None;
    let mut cur = reg.block_head;
    while cur != CHAIN_END {
        let cur_handle = decode(cur);
        let (cur_off, cur_next) = pool.with_iblkref_mut(arena, cur_handle, |r| (r.file_offset, r.next));
        if cur_off == target_off {
            match prev_encoded {
                Some(prev) => {
                    let prev_handle = decode(prev);
                    pool.with_iblkref_mut(arena, prev_handle, |r| r.next = cur_next);
                }
                None => reg.block_head = cur_next,
            }
            return;
        }
        prev_encoded = Some(cur);
        cur = cur_next;
    }
}

/// Drops one iblkref, decrementing (and possibly freeing) its dblkref.
pub(crate) fn drop_block(pool: &Pool, arena: &Arena, reg: &mut RegPayload, handle: SlabHandle) {
    let rec = pool.iblkref(arena, handle);
    unlink(pool, arena, reg, handle);
    release_dblkref(pool, arena, rec.dblkref_handle());
    pool.free_iblkref(arena, handle);
}

pub(crate) fn release_dblkref(pool: &Pool, arena: &Arena, handle: SlabHandle) {
    let freed = pool.with_dblkref_mut(arena, handle, |d| {
        d.refcount -= 1;
        d.refcount == 0
    });
    if freed {
        let bn = pool.dblkref(arena, handle).bn;
        pool.free_dblkref(arena, handle);
        pool.free_page(arena, bn);
    }
}

/// "require-block": finds or creates the private, writable data page for
/// `boff`, performing copy-on-write if the existing dblkref is shared.
pub(crate) fn require_block(pool: &Pool, arena: &Arena, reg: &mut RegPayload, boff: u64) -> Result<Bn> {
    match find_iblkref(pool, arena, reg, boff) {
        None => insert_new_block(pool, arena, reg, boff).map(|(_, bn)| bn),
        Some((handle, rec)) => {
            let dblkref = rec.dblkref_handle();
            let shared = pool.dblkref(arena, dblkref).refcount > 1;
            if !shared {
                return Ok(pool.dblkref(arena, dblkref).bn);
            }
            let old_bn = pool.dblkref(arena, dblkref).bn;
            let new_bn = pool.alloc_page().map_err(|_| Error::NoSpace)?;
            let new_bn_guard = scopeguard::guard(new_bn, |bn| pool.free_page(arena, bn));
            arena.copy_page(old_bn, new_bn);
            let new_dblkref = pool
                .alloc_dblkref(arena, DblkrefRecord { bn: new_bn, refcount: 1, free_next: 0 })
                .map_err(|_| Error::NoSpace)?;
            scopeguard::ScopeGuard::into_inner(new_bn_guard);

            log::debug!("file: unsharing dblkref at {:?}, cloning into {}", dblkref, new_bn);
            release_dblkref(pool, arena, dblkref);
            pool.with_iblkref_mut(arena, handle, |r| r.dblkref = encode(new_dblkref));
            Ok(new_bn)
        }
    }
}

/// Points the iblkref at `boff` at `dblkref` (bumping its refcount),
/// detaching and releasing whatever block was there before. Used by the
/// clone engine, which deliberately does not go through CoW: the caller
/// is responsible for the sharing semantics it wants.
pub(crate) fn point_at(pool: &Pool, arena: &Arena, reg: &mut RegPayload, boff: u64, dblkref: SlabHandle) -> Result<()> {
    if let Some((handle, _)) = find_iblkref(pool, arena, reg, boff) {
        drop_block(pool, arena, reg, handle);
    }
    pool.with_dblkref_mut(arena, dblkref, |d| d.refcount += 1);
    let handle = pool
        .alloc_iblkref(arena, IblkrefRecord { file_offset: boff, dblkref: encode(dblkref), next: CHAIN_END, free_next: 0 })
        .map_err(|e| {
            pool.with_dblkref_mut(arena, dblkref, |d| d.refcount -= 1);
            e
        })?;
    splice_sorted(pool, arena, reg, handle, boff);
    Ok(())
}

fn check_range(offset: i64, len: i64) -> Result<(u64, u64)> {
    if offset < 0 || len == 0 {
        return Err(Error::Inval);
    }
    let offset = offset as u64;
    let len = len as u64;
    let end = offset.checked_add(len).ok_or(Error::FileBig)?;
    if end > TOYFS_ISIZE_MAX {
        return Err(Error::FileBig);
    }
    Ok((offset, end))
}

/// Returns the backing block number for byte offset `boff`'s page, or
/// `None` if it is a hole.
pub fn get_block(pool: &Pool, arena: &Arena, reg: &RegPayload, index: u64) -> Option<Bn> {
    let boff = index * PAGE_SIZE as u64;
    find_iblkref(pool, arena, reg, boff).map(|(h, _)| bn_for_handle(pool, arena, pool.iblkref(arena, h).dblkref_handle()))
}

pub fn read(pool: &Pool, arena: &Arena, reg: &RegPayload, i_size: u64, offset: i64, len: i64, out: &mut [u8]) -> Result<usize> {
    let (offset, _end) = check_range(offset, len)?;
    let end = (offset + len as u64).min(i_size);
    if offset >= end {
        return Ok(0);
    }
    let mut pos = offset;
    let mut written = 0usize;
    while pos < end {
        let boff = page_floor(pos);
        let page_end = (boff + PAGE_SIZE as u64).min(end);
        let in_page = (pos - boff) as usize;
        let n = (page_end - pos) as usize;
        match find_iblkref(pool, arena, reg, boff) {
            Some((_, rec)) => {
                let bn = bn_for_handle(pool, arena, rec.dblkref_handle());
                // SAFETY: bn is a live data page owned by this file; the
                // shim serializes operations on this inode.
                let page = unsafe { arena.page(bn) };
                out[written..written + n].copy_from_slice(&page[in_page..in_page + n]);
            }
            None => {
                out[written..written + n].fill(0);
            }
        }
        written += n;
        pos = page_end;
    }
    Ok(written)
}

/// Returns `(bytes_written, new_i_size)`. On partial failure the prefix
/// already written is retained and `new_i_size` reflects it.
pub fn write(
    pool: &Pool,
    arena: &Arena,
    reg: &mut RegPayload,
    i_size: u64,
    offset: i64,
    data: &[u8],
) -> (usize, u64, Result<()>) {
    let (offset, _end) = match check_range(offset, data.len() as i64) {
        Ok(v) => v,
        Err(e) => return (0, i_size, Err(e)),
    };
    let mut pos = offset;
    let mut written = 0usize;
    let target_end = offset + data.len() as u64;
    let mut size = i_size;
    while pos < target_end {
        let boff = page_floor(pos);
        let page_end = (boff + PAGE_SIZE as u64).min(target_end);
        let in_page = (pos - boff) as usize;
        let n = (page_end - pos) as usize;
        let bn = match require_block(pool, arena, reg, boff) {
            Ok(bn) => bn,
            Err(e) => {
                size = size.max(offset + written as u64);
                return (written, size, Err(e));
            }
        };
        // SAFETY: require_block just returned a page privately owned by
        // this file for this offset.
        unsafe {
            let page = arena.page_mut(bn);
            page[in_page..in_page + n].copy_from_slice(&data[written..written + n]);
        }
        written += n;
        pos = page_end;
    }
    size = size.max(offset + written as u64);
    (written, size, Ok(()))
}

/// Drops every iblkref at or beyond the page containing `new_size`.
/// Returns the retained `i_size`.
pub fn truncate(pool: &Pool, arena: &Arena, reg: &mut RegPayload, new_size: u64) {
    let boundary = page_index(new_size) * PAGE_SIZE as u64
        + if new_size % PAGE_SIZE as u64 == 0 { 0 } else { PAGE_SIZE as u64 };
    for (handle, rec) in iblkref_chain(pool, arena, reg) {
        if rec.file_offset >= boundary {
            drop_block(pool, arena, reg, handle);
        }
    }
}

bitflags::bitflags! {
    pub struct FallocateFlags: u32 {
        const PUNCH_HOLE = 0b01;
        const KEEP_SIZE = 0b10;
        const ZERO_RANGE = 0b100;
    }
}

/// `fallocate`. Returns the new `i_size` when the default (non-punch,
/// non-zero) branch grows the file.
pub fn fallocate(
    pool: &Pool,
    arena: &Arena,
    reg: &mut RegPayload,
    i_size: u64,
    flags: FallocateFlags,
    offset: i64,
    len: i64,
) -> Result<u64> {
    let (offset, end) = check_range(offset, len)?;

    if flags.contains(FallocateFlags::PUNCH_HOLE) {
        if !flags.contains(FallocateFlags::KEEP_SIZE) {
            return Err(Error::Inval);
        }
        let mut pos = offset;
        while pos < end {
            let boff = page_floor(pos);
            let page_end = boff + PAGE_SIZE as u64;
            if offset <= boff && end >= page_end {
                if let Some((handle, _)) = find_iblkref(pool, arena, reg, boff) {
                    drop_block(pool, arena, reg, handle);
                }
            } else if find_iblkref(pool, arena, reg, boff).is_some() {
                // Partial-page punch is a mutation of just part of the
                // page, so a shared block must be unshared first — going
                // through `require_block` (not a raw lookup) keeps this
                // CoW-safe exactly like a write would be.
                let bn = require_block(pool, arena, reg, boff)?;
                zero_intersection(arena, bn, boff, offset.max(boff), end.min(page_end));
            }
            pos = page_end;
        }
        return Ok(i_size);
    }

    if flags.contains(FallocateFlags::ZERO_RANGE) {
        let mut pos = offset;
        while pos < end {
            let boff = page_floor(pos);
            let page_end = boff + PAGE_SIZE as u64;
            if find_iblkref(pool, arena, reg, boff).is_some() {
                let bn = require_block(pool, arena, reg, boff)?;
                let zero_start = offset.max(boff);
                let zero_end = end.min(page_end);
                zero_intersection(arena, bn, boff, zero_start, zero_end);
            }
            pos = page_end;
        }
        return Ok(i_size.max(end));
    }

    if !flags.is_empty() {
        return Err(Error::NotSupported);
    }

    let mut pos = offset;
    while pos < end {
        let boff = page_floor(pos);
        require_block(pool, arena, reg, boff)?;
        pos = boff + PAGE_SIZE as u64;
    }
    Ok(i_size.max(end))
}

fn zero_intersection(arena: &Arena, bn: Bn, boff: u64, start: u64, end: u64) {
    let in_page_start = (start - boff) as usize;
    let in_page_end = (end - boff) as usize;
    // SAFETY: bn was just returned by `require_block`, which guarantees a
    // privately-owned page for this offset.
    unsafe {
        arena.page_mut(bn)[in_page_start..in_page_end].fill(0);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Data,
    Hole,
}

/// `seek`: linear scan of page offsets in `[from, i_size)`.
pub fn seek(pool: &Pool, arena: &Arena, reg: &RegPayload, i_size: u64, from: u64, whence: Whence) -> Option<u64> {
    let mut pos = page_floor(from.min(i_size));
    while pos < i_size {
        let has_data = find_iblkref(pool, arena, reg, pos).is_some();
        let want_data = whence == Whence::Data;
        if has_data == want_data {
            return Some(pos.max(from));
        }
        pos += PAGE_SIZE as u64;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::pool::Pool;

    #[test]
    fn write_then_read_roundtrips() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut reg = RegPayload::new(1);

        let (written, size, res) = write(&pool, &arena, &mut reg, 0, 100, b"hello");
        res.unwrap();
        assert_eq!(written, 5);
        assert_eq!(size, 105);

        let mut buf = [0u8; 5];
        let n = read(&pool, &arena, &reg, size, 100, 5, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn punch_hole_middle_page() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut reg = RegPayload::new(1);
        let data = vec![0xAAu8; 3 * PAGE_SIZE];
        let (_w, size, res) = write(&pool, &arena, &mut reg, 0, 0, &data);
        res.unwrap();

        fallocate(
            &pool,
            &arena,
            &mut reg,
            size,
            FallocateFlags::PUNCH_HOLE | FallocateFlags::KEEP_SIZE,
            PAGE_SIZE as i64,
            PAGE_SIZE as i64,
        )
        .unwrap();

        let mut buf = vec![0u8; 3 * PAGE_SIZE];
        read(&pool, &arena, &reg, size, 0, buf.len() as i64, &mut buf).unwrap();
        assert!(buf[..PAGE_SIZE].iter().all(|&b| b == 0xAA));
        assert!(buf[PAGE_SIZE..2 * PAGE_SIZE].iter().all(|&b| b == 0));
        assert!(buf[2 * PAGE_SIZE..].iter().all(|&b| b == 0xAA));

        assert!(get_block(&pool, &arena, &reg, 1).is_none());
    }

    #[test]
    fn truncate_then_truncate_is_idempotent() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut reg = RegPayload::new(1);
        let data = vec![1u8; 2 * PAGE_SIZE];
        let (_w, size, res) = write(&pool, &arena, &mut reg, 0, 0, &data);
        res.unwrap();

        truncate(&pool, &arena, &mut reg, PAGE_SIZE as u64);
        let after_first = iblkref_chain(&pool, &arena, &reg).len();
        truncate(&pool, &arena, &mut reg, PAGE_SIZE as u64);
        let after_second = iblkref_chain(&pool, &arena, &reg).len();
        assert_eq!(after_first, after_second);
        assert_eq!(after_first, 1);
    }

    #[test]
    fn seek_data_and_hole_are_complementary() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut reg = RegPayload::new(1);
        let data = vec![1u8; PAGE_SIZE];
        let (_w, size, res) = write(&pool, &arena, &mut reg, 0, 2 * PAGE_SIZE as i64, &data);
        res.unwrap();

        assert_eq!(seek(&pool, &arena, &reg, size, 0, Whence::Hole), Some(0));
        assert_eq!(seek(&pool, &arena, &reg, size, 0, Whence::Data), Some(2 * PAGE_SIZE as u64));
    }

    #[test]
    fn rejects_negative_offset_and_zero_length() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let reg = RegPayload::new(1);
        let mut buf = [0u8; 1];
        assert_eq!(read(&pool, &arena, &reg, 0, -1, 1, &mut buf).unwrap_err(), Error::Inval);
        assert_eq!(read(&pool, &arena, &reg, 0, 0, 0, &mut buf).unwrap_err(), Error::Inval);
    }

    #[test]
    fn rejects_offsets_beyond_isize_max() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let reg = RegPayload::new(1);
        let mut buf = [0u8; 1];
        let past_max = (TOYFS_ISIZE_MAX - 1) as i64;
        assert_eq!(read(&pool, &arena, &reg, 0, past_max, 2, &mut buf).unwrap_err(), Error::FileBig);
    }

    #[test]
    fn clone_unaware_fallocate_cows_shared_pages() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut a = RegPayload::new(1);
        let mut b = RegPayload::new(1);
        let data = vec![0x11u8; PAGE_SIZE];
        let (_w, size, res) = write(&pool, &arena, &mut a, 0, 0, &data);
        res.unwrap();

        crate::clone::clone_entire(&pool, &arena, &a, size, &mut b).unwrap();
        assert_eq!(get_block(&pool, &arena, &a, 0), get_block(&pool, &arena, &b, 0));

        fallocate(&pool, &arena, &mut b, size, FallocateFlags::ZERO_RANGE, 0, PAGE_SIZE as i64).unwrap();
        assert_ne!(get_block(&pool, &arena, &a, 0), get_block(&pool, &arena, &b, 0));

        let mut buf = vec![0u8; PAGE_SIZE];
        read(&pool, &arena, &a, size, 0, PAGE_SIZE as i64, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x11), "the sibling clone must be untouched by b's zero-range");
    }
}
