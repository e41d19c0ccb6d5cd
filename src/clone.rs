//! Clone engine: page-aligned, refcounted copy-on-write sharing between
//! two regular files' block maps.
//!
//! Both whole-file and sub-range clone reduce to the same primitive —
//! [`crate::file::point_at`] — repointing a destination `iblkref` at a
//! source `dblkref` and bumping its refcount; the two entry points differ
//! only in how they decide which offsets to touch and whether holes are
//! allowed to propagate as holes (whole-file) or must materialize as
//! zeroed private pages (sub-range).

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::file::{self, RegPayload};
use crate::page::PAGE_SIZE;
use crate::pool::Pool;

/// Clones every block of `src` onto `dst`, in source order, and copies
/// `i_size`. Any blocks `dst` owned beforehand are released first.
///
/// If an iblkref allocation fails partway through, `dst` is left holding
/// whichever prefix of `src`'s blocks was already pointed at — callers
/// should treat that as a failed clone rather than rely on the partial
/// result.
pub fn clone_entire(pool: &Pool, arena: &Arena, src: &RegPayload, src_i_size: u64, dst: &mut RegPayload) -> Result<u64> {
    file::truncate(pool, arena, dst, 0);
    for (_, rec) in file::iblkref_chain(pool, arena, src) {
        file::point_at(pool, arena, dst, rec.file_offset, rec.dblkref_handle())?;
    }
    Ok(src_i_size)
}

/// Clones `[src_offset, src_offset+len)` onto `[dst_offset, dst_offset+len)`.
/// Both offsets and `len` must be page-aligned. Returns the new `i_size`
/// for `dst` (grown to cover the cloned range if it did not already).
pub fn clone_range(
    pool: &Pool,
    arena: &Arena,
    src: &RegPayload,
    src_offset: u64,
    dst: &mut RegPayload,
    dst_offset: u64,
    dst_i_size: u64,
    len: u64,
) -> Result<u64> {
    let aligned = |v: u64| v % PAGE_SIZE as u64 == 0;
    if !aligned(src_offset) || !aligned(dst_offset) || !aligned(len) || len == 0 {
        return Err(Error::NotSupported);
    }

    let mut delta = 0u64;
    while delta < len {
        let src_boff = src_offset + delta;
        let dst_boff = dst_offset + delta;
        match file::find_iblkref(pool, arena, src, src_boff) {
            Some((_, rec)) => {
                file::point_at(pool, arena, dst, dst_boff, rec.dblkref_handle())?;
            }
            None => {
                let bn = file::require_block(pool, arena, dst, dst_boff)?;
                arena.zero_page(bn);
            }
        }
        delta += PAGE_SIZE as u64;
    }

    Ok(dst_i_size.max(dst_offset + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::pool::Pool;

    #[test]
    fn entire_clone_shares_pages_until_write_diverges() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let mut a = RegPayload::new(1);
        let mut b = RegPayload::new(1);

        let data = vec![0xCCu8; 3 * PAGE_SIZE];
        let (_w, size_a, res) = file::write(&pool, &arena, &mut a, 0, 0, &data);
        res.unwrap();

        let size_b = clone_entire(&pool, &arena, &a, size_a, &mut b).unwrap();
        assert_eq!(size_b, size_a);

        let bn_a1 = file::get_block(&pool, &arena, &a, 1).unwrap();
        let bn_b1 = file::get_block(&pool, &arena, &b, 1).unwrap();
        assert_eq!(bn_a1, bn_b1);

        let (_w, _size_a2, res) = file::write(&pool, &arena, &mut a, size_a, 0, b"X");
        res.unwrap();

        let mut byte_a = [0u8; 1];
        let mut byte_b = [0u8; 1];
        file::read(&pool, &arena, &a, size_a, 0, 1, &mut byte_a).unwrap();
        file::read(&pool, &arena, &b, size_b, 0, 1, &mut byte_b).unwrap();
        assert_eq!(byte_a, [b'X']);
        assert_eq!(byte_b, [0xCC]);

        let bn_a1_after = file::get_block(&pool, &arena, &a, 1).unwrap();
        let bn_b1_after = file::get_block(&pool, &arena, &b, 1).unwrap();
        assert_eq!(bn_a1_after, bn_b1_after);
    }

    #[test]
    fn sub_range_clone_rejects_unaligned_arguments() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let src = RegPayload::new(1);
        let mut dst = RegPayload::new(1);
        let err = clone_range(&pool, &arena, &src, 1, &mut dst, 0, 0, PAGE_SIZE as u64).unwrap_err();
        assert_eq!(err, Error::NotSupported);
    }

    #[test]
    fn sub_range_clone_zeroes_holes_privately() {
        let arena = Arena::new_anonymous().unwrap();
        let pool = Pool::new(&arena);
        let src = RegPayload::new(1);
        let mut dst = RegPayload::new(1);
        let data = vec![0x11u8; PAGE_SIZE];
        let (_w, _size, res) = file::write(&pool, &arena, &mut dst, 0, 0, &data);
        res.unwrap();

        let new_size = clone_range(&pool, &arena, &src, 0, &mut dst, 0, PAGE_SIZE as u64, PAGE_SIZE as u64).unwrap();
        assert_eq!(new_size, PAGE_SIZE as u64);

        let mut buf = vec![0u8; PAGE_SIZE];
        file::read(&pool, &arena, &dst, new_size, 0, PAGE_SIZE as i64, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
