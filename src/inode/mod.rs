//! Inode core: the pool-backed on-disk inode record and its lifecycle.
//!
//! `InodeRecord` is the pool-backed, fixed-size POD that lives inside the
//! inode typed slab — one flat struct with an inline byte blob big enough
//! for any payload shape, a union with alignment padding rather than a
//! Rust enum so its size and layout stay fixed regardless of which
//! variant is active. [`InodePayload`] is the ergonomic, mode-discriminated
//! view callers actually work with.

pub mod table;

use static_assertions::const_assert;

use crate::dir::DirPayload;
use crate::file::RegPayload;
use crate::page::Bn;
use crate::pool::SlabRecord;

pub use table::{InodeInfo, InodeTable, DEFAULT_BUCKETS, IMAGIC};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFIFO: u32 = 0o010000;

pub const SYMLINK_INLINE_MAX: usize = 40;

/// A symlink target: short links live inline; anything longer spills into
/// one owned arena page.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct SymlinkPayload {
    pub len: u16,
    pub inline: [u8; SYMLINK_INLINE_MAX],
    pub long_bn: Bn,
}

impl SymlinkPayload {
    pub fn empty() -> Self {
        Self { len: 0, inline: [0; SYMLINK_INLINE_MAX], long_bn: Bn::NULL }
    }

    pub fn is_long(&self) -> bool {
        self.len as usize > SYMLINK_INLINE_MAX
    }
}

/// Ergonomic, mode-discriminated view of an inode's type-specific state.
#[derive(Clone, Copy, Debug)]
pub enum InodePayload {
    Dir(DirPayload),
    Reg(RegPayload),
    Symlink(SymlinkPayload),
    Fifo,
}

impl InodePayload {
    fn kind_bits(&self) -> u32 {
        match self {
            InodePayload::Dir(_) => S_IFDIR,
            InodePayload::Reg(_) => S_IFREG,
            InodePayload::Symlink(_) => S_IFLNK,
            InodePayload::Fifo => S_IFIFO,
        }
    }
}

const PAYLOAD_BYTES: usize = 64;

const_assert!(std::mem::size_of::<DirPayload>() <= PAYLOAD_BYTES);
const_assert!(std::mem::size_of::<RegPayload>() <= PAYLOAD_BYTES);
const_assert!(std::mem::size_of::<SymlinkPayload>() <= PAYLOAD_BYTES);

const FREE_SENTINEL: u64 = u64::MAX;

/// The pool-backed inode record. All fields are plain data; `payload` is
/// interpreted according to `mode & S_IFMT` via [`InodeRecord::payload`]
/// and [`InodeRecord::set_payload`].
#[derive(Clone, Copy)]
#[repr(C)]
pub struct InodeRecord {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub size: u64,
    pub nblocks: u64,
    pub generation: u64,
    pub parent_ino: u64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    payload: [u8; PAYLOAD_BYTES],
    free_next: u64,
}

impl SlabRecord for InodeRecord {
    fn free_next(&self) -> u64 {
        self.free_next
    }
    fn set_free_next(&mut self, v: u64) {
        self.free_next = v;
    }
    fn zeroed() -> Self {
        Self {
            ino: 0,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            nblocks: 0,
            generation: 0,
            parent_ino: 0,
            atime_ns: 0,
            mtime_ns: 0,
            ctime_ns: 0,
            payload: [0; PAYLOAD_BYTES],
            free_next: FREE_SENTINEL,
        }
    }
}

impl InodeRecord {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
    pub fn is_reg(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Interprets `payload` according to `mode`.
    ///
    /// # Panics
    /// Panics if `mode`'s type bits are not one of dir/reg/symlink/fifo —
    /// this indicates pool corruption or use of an uninitialized record,
    /// both programming errors.
    pub fn payload(&self) -> InodePayload {
        match self.mode & S_IFMT {
            S_IFDIR => InodePayload::Dir(self.read_payload::<DirPayload>()),
            S_IFREG => InodePayload::Reg(self.read_payload::<RegPayload>()),
            S_IFLNK => InodePayload::Symlink(self.read_payload::<SymlinkPayload>()),
            S_IFIFO => InodePayload::Fifo,
            other => panic!("InodeRecord::payload: inode {} has unknown mode bits {:o}", self.ino, other),
        }
    }

    pub fn set_payload(&mut self, payload: InodePayload) {
        self.mode = (self.mode & !S_IFMT) | payload.kind_bits();
        match payload {
            InodePayload::Dir(p) => self.write_payload(p),
            InodePayload::Reg(p) => self.write_payload(p),
            InodePayload::Symlink(p) => self.write_payload(p),
            InodePayload::Fifo => {}
        }
    }

    fn read_payload<T: Copy>(&self) -> T {
        debug_assert!(std::mem::size_of::<T>() <= PAYLOAD_BYTES);
        // SAFETY: `T` is one of the POD payload types whose size was
        // statically checked to fit `payload`, and `set_payload` always
        // writes the variant matching `mode`'s current type bits before
        // this is called with a consistent `T`. `payload`'s byte offset
        // within `InodeRecord` is not guaranteed to satisfy `T`'s
        // alignment, so this reads unaligned rather than dereferencing a
        // cast pointer directly.
        unsafe { (self.payload.as_ptr() as *const T).read_unaligned() }
    }

    fn write_payload<T: Copy>(&mut self, value: T) {
        debug_assert!(std::mem::size_of::<T>() <= PAYLOAD_BYTES);
        self.payload = [0; PAYLOAD_BYTES];
        // SAFETY: size checked above; see `read_payload` on alignment.
        unsafe { (self.payload.as_mut_ptr() as *mut T).write_unaligned(value) };
    }
}
