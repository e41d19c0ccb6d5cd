//! `toyfs`: a userspace reference filesystem engine that services VFS
//! callbacks delegated by a kernel shim over pmem.
//!
//! The crate is organized bottom-up, mirroring how a mount comes
//! together: [`arena`] maps the backing pages, [`pool`] carves them into
//! typed slabs, [`inode`] and [`dir`] and [`file`] build the filesystem
//! tree and its data blocks on top of those slabs, [`clone`] shares data
//! blocks refcounted across files, and [`superblock`] wires all of it
//! into the single entry point a shim would call through. [`format`] is
//! the separate, offline path that writes a fresh image for `mkfs` to
//! lay down before any of the above ever mounts it.

pub mod arena;
pub mod clone;
pub mod crc16;
pub mod dir;
pub mod error;
pub mod file;
pub mod format;
pub mod inode;
pub mod lock;
pub mod page;
pub mod pool;
pub mod superblock;

pub use error::{Error, Result};
pub use superblock::Superblock;
