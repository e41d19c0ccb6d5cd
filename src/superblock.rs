//! Superblock lifecycle, statvfs accounting, and the callback surface the
//! VFS shim drives.
//!
//! This module is the one place that knows about every other module at
//! once: it owns the [`Arena`], the [`Pool`], the [`InodeTable`], and the
//! super mutex, and every externally visible operation (`new_inode`,
//! `read`, `readdir`, `clone`, ...) is a method here that looks up an
//! inode and delegates to `dir`/`file`/`clone`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::arena::Arena;
use crate::clone as clone_engine;
use crate::dir::{self, DirPayload, Dirent};
use crate::error::{Error, Result};
use crate::file::{self, FallocateFlags, RegPayload, Whence};
use crate::inode::{InodeInfo, InodePayload, InodeRecord, InodeTable, SymlinkPayload, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG};
use crate::lock::Named;
use crate::page::{Bn, PAGE_SIZE};
use crate::pool::Pool;

/// `ino` of the filesystem root, fixed for the life of a mount.
pub const ROOT_INO: u64 = 1;

fn now_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

struct StatState {
    inodes_in_use: u64,
}

/// statvfs-shaped snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statvfs {
    pub f_bsize: u64,
    pub f_frsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_favail: u64,
    pub f_namemax: u64,
}

/// Fields a caller may apply via [`Superblock::setattr`]; `None` leaves a
/// field untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Setattr {
    pub mode: Option<u32>,
    pub nlink: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime_ns: Option<i64>,
    pub mtime_ns: Option<i64>,
}

/// The in-memory superblock: arena, pool, inode table, and statvfs state
/// bound together for one mount.
pub struct Superblock {
    arena: Arena,
    pool: Pool,
    itable: InodeTable,
    stat: Named<StatState>,
    top_ino: AtomicU64,
    // Serializes new_inode/free_inode/add_dentry/... against each other
    // for a *single* directory/inode so dirent-list and size updates stay
    // atomic together. The external shim is documented to serialize
    // per-inode; this private mutex exists only because, unlike the shim,
    // nothing else in this crate provides that guarantee for multi-step
    // operations that touch more than one pool call.
    op: Mutex<()>,
}

impl Superblock {
    /// `sbi_alloc` + `sbi_init`: builds the arena (pmem if `pmem_fd` is
    /// given, else an anonymous mapping), brings up the pool and inode
    /// table, and bootstraps the root inode.
    pub fn init(pmem_fd: Option<(std::os::unix::io::RawFd, u64)>) -> std::io::Result<Self> {
        let arena = match pmem_fd {
            Some((fd, len_pages)) => Arena::new_pmem(fd, len_pages)?,
            None => Arena::new_anonymous()?,
        };
        let pool = Pool::new(&arena);
        let itable = InodeTable::new();

        let handle = pool.alloc_inode(&arena).expect("sbi_init: pool has no room for the root inode");
        let now = now_ns();
        pool.with_inode_mut(&arena, handle, |rec| {
            *rec = InodeRecord::zeroed();
            rec.ino = ROOT_INO;
            rec.mode = S_IFDIR | 0o755;
            rec.nlink = 2;
            rec.parent_ino = ROOT_INO;
            rec.atime_ns = now;
            rec.mtime_ns = now;
            rec.ctime_ns = now;
            rec.set_payload(InodePayload::Dir(DirPayload::new()));
        });
        itable.insert(InodeInfo::new(ROOT_INO, handle));
        log::info!("superblock: mounted, {} pages ({} pmem)", arena.num_pages(), arena.is_pmem());

        Ok(Self {
            arena,
            pool,
            itable,
            stat: Named::new("SUPER", StatState { inodes_in_use: 1 }),
            top_ino: AtomicU64::new(ROOT_INO + 1),
            op: Mutex::new(()),
        })
    }

    /// `sbi_fini`: no persistent state beyond the arena/pool/table, which
    /// are torn down by `Drop`; kept as an explicit entry point to match
    /// the shim's lifecycle contract.
    pub fn fini(self) {
        log::info!("superblock: unmounted");
    }

    fn alloc_ino(&self) -> u64 {
        self.top_ino.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup_handle(&self, ino: u64) -> Option<InodeInfo> {
        self.itable.find(ino)
    }

    fn require_handle(&self, ino: u64) -> Result<InodeInfo> {
        self.lookup_handle(ino).ok_or(Error::NoEnt)
    }

    pub fn iget(&self, ino: u64) -> Option<InodeRecord> {
        let info = self.lookup_handle(ino)?;
        Some(self.pool.inode(&self.arena, info.handle))
    }

    /// Creates a new inode of `mode`'s type under `parent_ino`, inserts it
    /// into the table, and returns its record. Does not link it into any
    /// directory — callers pair this with [`Superblock::add_dentry`].
    pub fn new_inode(&self, parent_ino: u64, mode: u32, symlink_target: Option<&[u8]>) -> Result<InodeRecord> {
        let _guard = self.op.lock().unwrap();
        let handle = self.pool.alloc_inode(&self.arena).map_err(|_| Error::NoSpace)?;
        let ino = self.alloc_ino();
        let now = now_ns();

        let kind = mode & crate::inode::S_IFMT;
        let payload = match kind {
            S_IFDIR => InodePayload::Dir(DirPayload::new()),
            S_IFREG => InodePayload::Reg(RegPayload::new(parent_ino)),
            S_IFLNK => {
                let target = symlink_target.ok_or(Error::Inval)?;
                InodePayload::Symlink(self.make_symlink_payload(target)?)
            }
            S_IFIFO => InodePayload::Fifo,
            _ => return Err(Error::Inval),
        };

        let record = self.pool.with_inode_mut(&self.arena, handle, |rec| {
            *rec = InodeRecord::zeroed();
            rec.ino = ino;
            rec.mode = mode;
            rec.nlink = if kind == S_IFDIR { 2 } else { 1 };
            rec.parent_ino = parent_ino;
            rec.atime_ns = now;
            rec.mtime_ns = now;
            rec.ctime_ns = now;
            rec.set_payload(payload);
            *rec
        });
        self.itable.insert(InodeInfo::new(ino, handle));
        self.stat.lock().inodes_in_use += 1;
        Ok(record)
    }

    fn make_symlink_payload(&self, target: &[u8]) -> Result<SymlinkPayload> {
        if target.len() <= crate::inode::SYMLINK_INLINE_MAX {
            let mut payload = SymlinkPayload::empty();
            payload.len = target.len() as u16;
            payload.inline[..target.len()].copy_from_slice(target);
            Ok(payload)
        } else {
            if target.len() > PAGE_SIZE {
                return Err(Error::FileBig);
            }
            let bn = self.pool.alloc_page().map_err(|_| Error::NoSpace)?;
            self.arena.zero_page(bn);
            // SAFETY: bn was just allocated exclusively for this symlink.
            unsafe { self.arena.page_mut(bn)[..target.len()].copy_from_slice(target) };
            Ok(SymlinkPayload { len: target.len() as u16, inline: [0; crate::inode::SYMLINK_INLINE_MAX], long_bn: bn })
        }
    }

    /// Reads a symlink's target bytes.
    pub fn get_symlink(&self, ino: u64) -> Result<Vec<u8>> {
        let info = self.require_handle(ino)?;
        let rec = self.pool.inode(&self.arena, info.handle);
        match rec.payload() {
            InodePayload::Symlink(p) if p.is_long() => {
                // SAFETY: long_bn was allocated and filled by make_symlink_payload
                // and is owned exclusively by this inode.
                let page = unsafe { self.arena.page(p.long_bn) };
                Ok(page[..p.len as usize].to_vec())
            }
            InodePayload::Symlink(p) => Ok(p.inline[..p.len as usize].to_vec()),
            _ => Err(Error::Inval),
        }
    }

    /// `free_inode`: releases a no-longer-linked inode's payload and slab
    /// slot. A directory being freed must already have a zero child count.
    pub fn free_inode(&self, ino: u64) -> Result<()> {
        let _guard = self.op.lock().unwrap();
        let info = self.itable.remove(ino);
        let rec = self.pool.inode(&self.arena, info.handle);
        match rec.payload() {
            InodePayload::Dir(dir) => {
                assert!(dir.nchild == 0, "free_inode: directory {} still has {} children", ino, dir.nchild);
            }
            InodePayload::Reg(mut reg) => {
                file::truncate(&self.pool, &self.arena, &mut reg, 0);
            }
            InodePayload::Symlink(p) if p.is_long() => {
                self.pool.free_page(&self.arena, p.long_bn);
            }
            InodePayload::Symlink(_) | InodePayload::Fifo => {}
        }
        self.pool.free_inode(&self.arena, info.handle);
        self.stat.lock().inodes_in_use -= 1;
        Ok(())
    }

    /// Runs `f` over `ino`'s directory payload.
    ///
    /// Reads the inode record, releases the pool lock, runs `f` (which
    /// may itself make pool calls — `dir::add_dentry` and friends each
    /// take the single pool mutex for one O(1) step), then reacquires the
    /// lock just long enough to write the updated payload back. Never
    /// call this from inside another pool-locking closure: the pool has
    /// one mutex shared by every typed slab, and it is not reentrant.
    fn with_dir<T>(&self, ino: u64, f: impl FnOnce(&mut DirPayload) -> T) -> Result<T> {
        let info = self.require_handle(ino)?;
        let rec = self.pool.inode(&self.arena, info.handle);
        if !rec.is_dir() {
            return Err(Error::NotSupported);
        }
        let mut dir = match rec.payload() {
            InodePayload::Dir(d) => d,
            _ => unreachable!(),
        };
        let out = f(&mut dir);
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| rec.set_payload(InodePayload::Dir(dir)));
        Ok(out)
    }

    pub fn add_dentry(&self, dir_ino: u64, name: &[u8], child_ino: u64) -> Result<u64> {
        let _guard = self.op.lock().unwrap();
        let off = self.with_dir(dir_ino, |dir| dir::add_dentry(&self.pool, &self.arena, dir, name, child_ino))??;
        let info = self.require_handle(dir_ino)?;
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| {
            rec.size = off + PAGE_SIZE as u64 + 2;
            rec.mtime_ns = now_ns();
        });
        Ok(off)
    }

    pub fn remove_dentry(&self, dir_ino: u64, name: &[u8], target_is_nonempty_dir: bool) -> Result<u64> {
        let _guard = self.op.lock().unwrap();
        let child_ino = self.with_dir(dir_ino, |dir| dir::remove_dentry(&self.pool, &self.arena, dir, name, target_is_nonempty_dir))??;
        self.force_unlink_nlink(child_ino);
        Ok(child_ino)
    }

    /// Deliberate simplification: once an empty directory's last dentry is
    /// gone, force its `nlink` to 0 so the shim's refcounting sees it as
    /// unlinked and calls `free_inode`, rather than relying on the shim to
    /// decide when an empty directory with `nlink == 1` should be freed.
    fn force_unlink_nlink(&self, ino: u64) {
        let Some(info) = self.lookup_handle(ino) else { return };
        let rec = self.pool.inode(&self.arena, info.handle);
        let is_empty_dir = matches!(rec.payload(), InodePayload::Dir(d) if d.nchild == 0);
        if is_empty_dir && rec.nlink == 1 {
            self.pool.with_inode_mut(&self.arena, info.handle, |rec| rec.nlink = 0);
        }
    }

    pub fn lookup(&self, dir_ino: u64, name: &[u8]) -> Result<Option<u64>> {
        self.with_dir(dir_ino, |dir| dir::lookup(&self.pool, &self.arena, dir, name))
    }

    /// `rename`: detaches `name` from `old_parent` and reattaches it as
    /// `new_name` under `new_parent`. An empty name is a programming error
    /// here and is mapped to `INVAL` rather than propagated silently.
    pub fn rename(&self, old_parent: u64, old_name: &[u8], new_parent: u64, new_name: &[u8]) -> Result<()> {
        if old_name.is_empty() || new_name.is_empty() {
            return Err(Error::Inval);
        }
        let _guard = self.op.lock().unwrap();
        let ino = self.with_dir(old_parent, |dir| dir::remove_dentry(&self.pool, &self.arena, dir, old_name, false))??;
        let off = self.with_dir(new_parent, |dir| dir::add_dentry(&self.pool, &self.arena, dir, new_name, ino))??;
        let new_parent_info = self.require_handle(new_parent)?;
        self.pool.with_inode_mut(&self.arena, new_parent_info.handle, |rec| {
            rec.size = off + PAGE_SIZE as u64 + 2;
            rec.mtime_ns = now_ns();
        });
        Ok(())
    }

    pub fn readdir(
        &self,
        dir_ino: u64,
        from_cursor: u64,
        emit: impl FnMut(&[u8], u64, u64) -> bool,
    ) -> Result<(u64, bool)> {
        let rec_ino_pair = {
            let info = self.require_handle(dir_ino)?;
            let rec = self.pool.inode(&self.arena, info.handle);
            (rec, info)
        };
        let (rec, _info) = rec_ino_pair;
        let dir = match rec.payload() {
            InodePayload::Dir(d) => d,
            _ => return Err(Error::NotSupported),
        };
        Ok(dir::iterate(&self.pool, &self.arena, &dir, rec.parent_ino, rec.ino, from_cursor, emit))
    }

    pub fn children(&self, dir_ino: u64) -> Result<Vec<Dirent>> {
        self.with_dir(dir_ino, |dir| dir::children_by_offset(&self.pool, &self.arena, dir))
    }

    /// Runs `f` over `ino`'s regular-file payload; see [`Superblock::with_dir`]
    /// for why the pool lock is not held across `f`.
    fn with_reg<T>(&self, ino: u64, f: impl FnOnce(&mut RegPayload, u64) -> T) -> Result<T> {
        let info = self.require_handle(ino)?;
        let rec = self.pool.inode(&self.arena, info.handle);
        if !rec.is_reg() {
            return Err(if rec.is_dir() { Error::IsDir } else { Error::NotSupported });
        }
        let mut reg = match rec.payload() {
            InodePayload::Reg(r) => r,
            _ => unreachable!(),
        };
        let out = f(&mut reg, rec.size);
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| rec.set_payload(InodePayload::Reg(reg)));
        Ok(out)
    }

    pub fn read(&self, ino: u64, offset: i64, out: &mut [u8]) -> Result<usize> {
        let len = out.len() as i64;
        self.with_reg(ino, |reg, size| file::read(&self.pool, &self.arena, reg, size, offset, len, out))?
    }

    /// Returns the byte count written; `i_size` is applied to the inode
    /// record before returning, including on partial failure.
    pub fn write(&self, ino: u64, offset: i64, data: &[u8]) -> Result<usize> {
        let info = self.require_handle(ino)?;
        let rec = self.pool.inode(&self.arena, info.handle);
        if !rec.is_reg() {
            return Err(if rec.is_dir() { Error::IsDir } else { Error::NotSupported });
        }
        let mut reg = match rec.payload() {
            InodePayload::Reg(r) => r,
            _ => unreachable!(),
        };
        let (written, new_size, res) = file::write(&self.pool, &self.arena, &mut reg, rec.size, offset, data);
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| {
            rec.size = new_size;
            rec.mtime_ns = now_ns();
            rec.set_payload(InodePayload::Reg(reg));
        });
        res.map(|()| written).or_else(|e| if written > 0 { Ok(written) } else { Err(e) })
    }

    pub fn truncate(&self, ino: u64, new_size: u64) -> Result<()> {
        self.with_reg(ino, |reg, _size| file::truncate(&self.pool, &self.arena, reg, new_size))?;
        let info = self.require_handle(ino)?;
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| rec.size = new_size);
        Ok(())
    }

    pub fn fallocate(&self, ino: u64, flags: FallocateFlags, offset: i64, len: i64) -> Result<()> {
        let info = self.require_handle(ino)?;
        let rec = self.pool.inode(&self.arena, info.handle);
        if !rec.is_reg() {
            return Err(Error::NotSupported);
        }
        let mut reg = match rec.payload() {
            InodePayload::Reg(r) => r,
            _ => unreachable!(),
        };
        let new_size = file::fallocate(&self.pool, &self.arena, &mut reg, rec.size, flags, offset, len)?;
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| {
            rec.size = new_size;
            rec.set_payload(InodePayload::Reg(reg));
        });
        Ok(())
    }

    pub fn seek(&self, ino: u64, from: u64, whence: Whence) -> Result<Option<u64>> {
        self.with_reg(ino, |reg, size| file::seek(&self.pool, &self.arena, reg, size, from, whence))
    }

    pub fn get_block(&self, ino: u64, index: u64) -> Result<Bn> {
        self.with_reg(ino, |reg, _size| file::get_block(&self.pool, &self.arena, reg, index).unwrap_or(Bn::NULL))
    }

    /// No-op: cacheline flushing for pmem durability is an external
    /// collaborator's responsibility.
    pub fn sync(&self, _ino: u64) {}

    pub fn setattr(&self, ino: u64, attr: Setattr) -> Result<()> {
        let info = self.require_handle(ino)?;
        let mut shrink_to: Option<u64> = None;
        self.pool.with_inode_mut(&self.arena, info.handle, |rec| {
            if let Some(mode) = attr.mode {
                rec.mode = (rec.mode & crate::inode::S_IFMT) | (mode & !crate::inode::S_IFMT);
            }
            if let Some(nlink) = attr.nlink {
                rec.nlink = nlink;
            }
            if let Some(uid) = attr.uid {
                rec.uid = uid;
            }
            if let Some(gid) = attr.gid {
                rec.gid = gid;
            }
            if let Some(atime) = attr.atime_ns {
                rec.atime_ns = atime;
            }
            if let Some(mtime) = attr.mtime_ns {
                rec.mtime_ns = mtime;
            }
            if let Some(size) = attr.size {
                if rec.is_reg() && size < rec.size {
                    shrink_to = Some(size);
                }
                rec.size = size;
            }
            rec.ctime_ns = now_ns();
        });
        if let Some(size) = shrink_to {
            self.with_reg(ino, |reg, _| file::truncate(&self.pool, &self.arena, reg, size))?;
        }
        Ok(())
    }

    /// `clone`: `src == dst` is a no-op; an all-zero range means "clone
    /// the entire file".
    pub fn clone_range(&self, src_ino: u64, src_offset: u64, dst_ino: u64, dst_offset: u64, len: u64) -> Result<()> {
        if src_ino == dst_ino {
            return Ok(());
        }
        let src_info = self.require_handle(src_ino)?;
        let src_rec = self.pool.inode(&self.arena, src_info.handle);
        let src_reg = match src_rec.payload() {
            InodePayload::Reg(r) => r,
            _ => return Err(Error::NotSupported),
        };

        let dst_info = self.require_handle(dst_ino)?;
        let dst_rec = self.pool.inode(&self.arena, dst_info.handle);
        if !dst_rec.is_reg() {
            return Err(Error::NotSupported);
        }
        let mut dst_reg = match dst_rec.payload() {
            InodePayload::Reg(r) => r,
            _ => unreachable!(),
        };

        let new_size = if src_offset == 0 && dst_offset == 0 && len == 0 {
            clone_engine::clone_entire(&self.pool, &self.arena, &src_reg, src_rec.size, &mut dst_reg)?
        } else {
            clone_engine::clone_range(&self.pool, &self.arena, &src_reg, src_offset, &mut dst_reg, dst_offset, dst_rec.size, len)?
        };

        self.pool.with_inode_mut(&self.arena, dst_info.handle, |dst_rec| {
            dst_rec.size = new_size;
            dst_rec.set_payload(InodePayload::Reg(dst_reg));
        });
        Ok(())
    }

    pub fn statfs(&self) -> Statvfs {
        // Reserved low block numbers never enter the pool's raw free-list,
        // so they must also be excluded here to keep
        // `f_blocks = f_bfree + pages_in_use` holding from mount onward.
        let total_pages = self.arena.usable_pages();
        let free_pages = self.pool.free_raw_pages();
        let inodes_per_page = (PAGE_SIZE / std::mem::size_of::<InodeRecord>()) as u64;
        let f_files = total_pages * inodes_per_page;
        let inodes_in_use = self.stat.lock().inodes_in_use;
        Statvfs {
            f_bsize: PAGE_SIZE as u64,
            f_frsize: PAGE_SIZE as u64,
            f_blocks: total_pages,
            f_bfree: free_pages,
            f_bavail: free_pages,
            f_files,
            f_ffree: f_files.saturating_sub(inodes_in_use),
            f_favail: f_files.saturating_sub(inodes_in_use),
            f_namemax: crate::dir::NAME_MAX as u64,
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_bootstraps_root_with_dot_and_dotdot() {
        let sb = Superblock::init(None).unwrap();
        let root = sb.iget(ROOT_INO).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert_eq!(root.parent_ino, ROOT_INO);

        let mut seen = Vec::new();
        let (_cursor, has_more) = sb
            .readdir(ROOT_INO, 0, |name, inum, _next| {
                seen.push((name.to_vec(), inum));
                true
            })
            .unwrap();
        assert!(!has_more);
        assert_eq!(seen, vec![(b".".to_vec(), ROOT_INO), (b"..".to_vec(), ROOT_INO)]);
    }

    #[test]
    fn create_list_and_write_through_superblock() {
        let sb = Superblock::init(None).unwrap();
        let a = sb.new_inode(ROOT_INO, S_IFREG | 0o644, None).unwrap();
        sb.add_dentry(ROOT_INO, b"a", a.ino).unwrap();
        let b = sb.new_inode(ROOT_INO, S_IFDIR | 0o755, None).unwrap();
        sb.add_dentry(ROOT_INO, b"b", b.ino).unwrap();

        assert_eq!(sb.lookup(ROOT_INO, b"a").unwrap(), Some(a.ino));
        assert_eq!(sb.lookup(ROOT_INO, b"missing").unwrap(), None);

        let written = sb.write(a.ino, 100, b"hello").unwrap();
        assert_eq!(written, 5);
        let mut buf = [0u8; 5];
        let n = sb.read(a.ino, 100, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(sb.iget(a.ino).unwrap().size, 105);
    }

    #[test]
    fn removing_nonempty_directory_fails_then_succeeds() {
        let sb = Superblock::init(None).unwrap();
        let d = sb.new_inode(ROOT_INO, S_IFDIR | 0o755, None).unwrap();
        sb.add_dentry(ROOT_INO, b"d", d.ino).unwrap();
        let child = sb.new_inode(d.ino, S_IFREG | 0o644, None).unwrap();
        sb.add_dentry(d.ino, b"child", child.ino).unwrap();

        assert_eq!(sb.remove_dentry(ROOT_INO, b"d", true).unwrap_err(), Error::NotEmpty);
        sb.remove_dentry(d.ino, b"child", false).unwrap();
        sb.remove_dentry(ROOT_INO, b"d", false).unwrap();
        sb.free_inode(child.ino).unwrap();
        sb.free_inode(d.ino).unwrap();
    }

    #[test]
    fn unlinking_empty_directory_forces_nlink_zero() {
        // The shim is expected to drop nlink to 1 (dropping the implicit
        // ".." link) before asking the core to detach the last dentry;
        // simulate that externally-driven step with `setattr`.
        let sb = Superblock::init(None).unwrap();
        let d = sb.new_inode(ROOT_INO, S_IFDIR | 0o755, None).unwrap();
        sb.add_dentry(ROOT_INO, b"d", d.ino).unwrap();
        sb.setattr(d.ino, Setattr { nlink: Some(1), ..Default::default() }).unwrap();

        sb.remove_dentry(ROOT_INO, b"d", false).unwrap();
        assert_eq!(sb.iget(d.ino).unwrap().nlink, 0);
    }

    #[test]
    fn statfs_reflects_allocations() {
        let sb = Superblock::init(None).unwrap();
        let before = sb.statfs();
        let a = sb.new_inode(ROOT_INO, S_IFREG | 0o644, None).unwrap();
        sb.add_dentry(ROOT_INO, b"a", a.ino).unwrap();
        sb.write(a.ino, 0, b"x").unwrap();

        let after = sb.statfs();
        assert!(after.f_bfree < before.f_bfree);
        assert_eq!(after.f_ffree, before.f_ffree - 1);
        assert_eq!(after.f_blocks, before.f_blocks);
    }

    #[test]
    fn fifo_creation_and_removal() {
        let sb = Superblock::init(None).unwrap();
        let p = sb.new_inode(ROOT_INO, S_IFIFO | 0o644, None).unwrap();
        sb.add_dentry(ROOT_INO, b"p", p.ino).unwrap();
        assert!(matches!(sb.iget(p.ino).unwrap().payload(), InodePayload::Fifo));

        sb.remove_dentry(ROOT_INO, b"p", false).unwrap();
        sb.free_inode(p.ino).unwrap();
        assert!(sb.iget(p.ino).is_none());
    }

    #[test]
    fn short_and_long_symlinks_roundtrip() {
        let sb = Superblock::init(None).unwrap();
        let short = sb.new_inode(ROOT_INO, S_IFLNK | 0o777, Some(b"short-target")).unwrap();
        assert_eq!(sb.get_symlink(short.ino).unwrap(), b"short-target");

        let long_target = vec![b'x'; 200];
        let long = sb.new_inode(ROOT_INO, S_IFLNK | 0o777, Some(&long_target)).unwrap();
        assert_eq!(sb.get_symlink(long.ino).unwrap(), long_target);
    }
}
