//! Directory engine.
//!
//! A directory's children are an ordered, singly-linked chain of
//! [`DirentRecord`]s carved from the dirent typed slab, threaded through
//! each record's own `next` field, since dirents are not laid out
//! contiguously in a file the way a byte-offset scan would require.

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::page::PAGE_SIZE;
use crate::pool::{Pool, SlabHandle, SlabRecord};

pub const NAME_MAX: usize = 255;

const FREE_SENTINEL: u64 = u64::MAX;
const CHAIN_END: u64 = u64::MAX;

fn encode(h: SlabHandle) -> u64 {
    (h.bn.0 << 16) | h.slot as u64
}
fn decode(v: u64) -> SlabHandle {
    SlabHandle { bn: crate::page::Bn(v >> 16), slot: (v & 0xFFFF) as u32 }
}

/// The pool-backed record for one directory entry. `name_len` bytes of
/// `name` are significant; the rest is unspecified.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DirentRecord {
    pub inum: u64,
    pub d_off: u64,
    pub name_len: u8,
    pub name: [u8; NAME_MAX],
    next: u64,
    free_next: u64,
}

impl SlabRecord for DirentRecord {
    fn free_next(&self) -> u64 {
        self.free_next
    }
    fn set_free_next(&mut self, v: u64) {
        self.free_next = v;
    }
    fn zeroed() -> Self {
        Self {
            inum: 0,
            d_off: 0,
            name_len: 0,
            name: [0; NAME_MAX],
            next: CHAIN_END,
            free_next: FREE_SENTINEL,
        }
    }
}

impl DirentRecord {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }
}

/// The directory-specific part of an inode's payload: the head of the
/// dirent chain, the live child count, and the monotonic offset counter.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct DirPayload {
    pub child_head: u64,
    pub nchild: u32,
    pub d_off_max: u64,
}

impl DirPayload {
    pub fn new() -> Self {
        // Offsets 0 and 1 are reserved for "." and "..", so allocation
        // starts at 2.
        Self { child_head: CHAIN_END, nchild: 0, d_off_max: 2 }
    }
}

/// One emitted readdir entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dirent {
    pub off: u64,
    pub inum: u64,
    pub name_len: u8,
}

/// Adds a child named `name` pointing at `child_inum` to the directory
/// described by `dir`. Returns the updated payload and the new entry's
/// directory offset.
pub fn add_dentry(
    pool: &Pool,
    arena: &Arena,
    dir: &mut DirPayload,
    name: &[u8],
    child_inum: u64,
) -> Result<u64> {
    assert!(name.len() <= NAME_MAX, "add_dentry: name too long");
    let handle = pool.alloc_dirent(arena).map_err(|_| Error::NoSpace)?;
    let off = dir.d_off_max * PAGE_SIZE as u64;
    pool.with_dirent_mut(arena, handle, |rec| {
        rec.inum = child_inum;
        rec.d_off = off;
        rec.name_len = name.len() as u8;
        rec.name[..name.len()].copy_from_slice(name);
        rec.next = dir.child_head;
    });
    dir.child_head = encode(handle);
    dir.nchild += 1;
    dir.d_off_max += 1;
    log::trace!("dir: assigned offset {} to new dentry, d_off_max now {}", off, dir.d_off_max);
    Ok(off)
}

/// Finds the dirent named `name`, returning its slab handle and record.
fn find_dentry(
    pool: &Pool,
    arena: &Arena,
    dir: &DirPayload,
    name: &[u8],
) -> Option<(SlabHandle, DirentRecord)> {
    let mut cur = dir.child_head;
    while cur != CHAIN_END {
        let handle = decode(cur);
        let rec = pool.with_dirent(arena, handle, |r| *r);
        if rec.name() == name {
            return Some((handle, rec));
        }
        cur = rec.next;
    }
    None
}

pub fn lookup(pool: &Pool, arena: &Arena, dir: &DirPayload, name: &[u8]) -> Option<u64> {
    find_dentry(pool, arena, dir, name).map(|(_, rec)| rec.inum)
}

/// Removes the dentry named `name`. Returns `NOTEMPTY` if the target
/// inode is a non-empty directory (callers pass `target_is_empty_dir` so
/// this module need not know about inode payloads).
pub fn remove_dentry(
    pool: &Pool,
    arena: &Arena,
    dir: &mut DirPayload,
    name: &[u8],
    target_is_nonempty_dir: bool,
) -> Result<u64> {
    if target_is_nonempty_dir {
        return Err(Error::NotEmpty);
    }
    let mut prev: Option<u64> = None;
    let mut cur = dir.child_head;
    while cur != CHAIN_END {
        let handle = decode(cur);
        let rec = pool.with_dirent(arena, handle, |r| *r);
        if rec.name() == name {
            match prev {
                Some(prev_encoded) => {
                    let prev_handle = decode(prev_encoded);
                    pool.with_dirent_mut(arena, prev_handle, |p| p.next = rec.next);
                }
                None => dir.child_head = rec.next,
            }
            pool.free_dirent(arena, handle);
            dir.nchild -= 1;
            return Ok(rec.inum);
        }
        prev = Some(cur);
        cur = rec.next;
    }
    Err(Error::NoEnt)
}

/// Walks the dirent chain in append order (tail-first insertion means the
/// chain is naturally head-to-tail in *reverse* arrival order, so this
/// returns a `Vec` sorted by `d_off` to preserve oldest-first ordering for
/// readdir callers).
pub fn children_by_offset(pool: &Pool, arena: &Arena, dir: &DirPayload) -> Vec<Dirent> {
    let mut out = Vec::new();
    let mut cur = dir.child_head;
    while cur != CHAIN_END {
        let handle = decode(cur);
        let rec = pool.with_dirent(arena, handle, |r| *r);
        out.push(Dirent { off: rec.d_off, inum: rec.inum, name_len: rec.name_len });
        cur = rec.next;
    }
    out.sort_by_key(|d| d.off);
    out
}

/// readdir cursor walk. `emit` returns `false` to signal "buffer full";
/// iteration stops at the first rejection.
pub fn iterate(
    pool: &Pool,
    arena: &Arena,
    dir: &DirPayload,
    parent_inum: u64,
    self_inum: u64,
    from_cursor: u64,
    mut emit: impl FnMut(&[u8], u64, u64) -> bool,
) -> (u64, bool) {
    let mut cursor = from_cursor;
    if cursor == 0 {
        if !emit(b".", self_inum, 1) {
            return (cursor, true);
        }
        cursor = 1;
    }
    if cursor == 1 {
        if !emit(b"..", parent_inum, 2) {
            return (cursor, true);
        }
        cursor = 2;
    }
    for child in children_by_offset(pool, arena, dir) {
        if child.off < cursor {
            continue;
        }
        let handle_rec = find_handle_for_offset(pool, arena, dir, child.off);
        let name_buf = handle_rec.map(|h| pool.with_dirent(arena, h, |r| {
            let mut v = vec![0u8; r.name_len as usize];
            v.copy_from_slice(r.name());
            v
        }));
        let name = name_buf.unwrap_or_default();
        let next_cursor = child.off + 1;
        if !emit(&name, child.inum, next_cursor) {
            return (child.off, true);
        }
        cursor = next_cursor;
    }
    (cursor, false)
}

fn find_handle_for_offset(
    pool: &Pool,
    arena: &Arena,
    dir: &DirPayload,
    off: u64,
) -> Option<SlabHandle> {
    let mut cur = dir.child_head;
    while cur != CHAIN_END {
        let handle = decode(cur);
        let rec = pool.with_dirent(arena, handle, |r| *r);
        if rec.d_off == off {
            return Some(handle);
        }
        cur = rec.next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::pool::Pool;

    #[test]
    fn add_lookup_and_readdir_order() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut dir = DirPayload::new();

        let off_a = add_dentry(&pool, &arena, &mut dir, b"a", 10).unwrap();
        let off_b = add_dentry(&pool, &arena, &mut dir, b"b", 11).unwrap();
        assert!(off_b > off_a);
        assert_eq!(dir.nchild, 2);

        assert_eq!(lookup(&pool, &arena, &dir, b"a"), Some(10));
        assert_eq!(lookup(&pool, &arena, &dir, b"missing"), None);

        let mut seen = Vec::new();
        let (_cursor, has_more) = iterate(&pool, &arena, &dir, 1, 1, 0, |name, inum, _next| {
            seen.push((name.to_vec(), inum));
            true
        });
        assert!(!has_more);
        assert_eq!(
            seen,
            vec![
                (b".".to_vec(), 1),
                (b"..".to_vec(), 1),
                (b"a".to_vec(), 10),
                (b"b".to_vec(), 11),
            ]
        );
    }

    #[test]
    fn remove_nonempty_dir_fails_then_succeeds() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut dir = DirPayload::new();
        add_dentry(&pool, &arena, &mut dir, b"child", 5).unwrap();

        assert_eq!(
            remove_dentry(&pool, &arena, &mut dir, b"child", true).unwrap_err(),
            Error::NotEmpty
        );
        assert_eq!(remove_dentry(&pool, &arena, &mut dir, b"child", false).unwrap(), 5);
        assert_eq!(dir.nchild, 0);
        assert_eq!(lookup(&pool, &arena, &dir, b"child"), None);
    }

    #[test]
    fn readdir_cursor_resumes_after_rejection() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut dir = DirPayload::new();
        add_dentry(&pool, &arena, &mut dir, b"a", 10).unwrap();
        add_dentry(&pool, &arena, &mut dir, b"b", 11).unwrap();

        let mut count = 0;
        let (cursor, has_more) = iterate(&pool, &arena, &dir, 1, 1, 0, |_, _, _| {
            count += 1;
            count < 3
        });
        assert!(has_more);

        let mut rest = Vec::new();
        let (_cursor2, has_more2) = iterate(&pool, &arena, &dir, 1, 1, cursor, |name, inum, _| {
            rest.push((name.to_vec(), inum));
            true
        });
        assert!(!has_more2);
        assert_eq!(rest, vec![(b"a".to_vec(), 10), (b"b".to_vec(), 11)]);
    }
}
