//! On-media format writer: lays out a fresh `toyfs` image on an
//! already-sized device. Used by `src/bin/mkfs.rs`; does not touch
//! `Pool`/`Arena` at all, since there is no live mount to serve — it
//! writes the same byte shapes those types would produce, directly.

pub mod layout;

use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::AsBytes;

use crate::dir::DirPayload;
use crate::inode::{InodePayload, InodeRecord, S_IFDIR};
use crate::page::PAGE_SIZE;
use crate::pool::SlabRecord;
use crate::superblock::ROOT_INO;
use layout::{DeviceTable, PART_SIZE};

/// Minimum device size the format writer will accept.
pub const MIN_DEVICE_BYTES: u64 = 1 << 20;

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as i64
}

fn root_inode_page() -> [u8; PAGE_SIZE] {
    let mut rec = InodeRecord::zeroed();
    rec.ino = ROOT_INO;
    rec.mode = S_IFDIR | 0o755;
    rec.nlink = 2;
    rec.parent_ino = ROOT_INO;
    rec.set_payload(InodePayload::Dir(DirPayload::new()));

    let mut page = [0u8; PAGE_SIZE];
    // SAFETY: `InodeRecord` is `#[repr(C)]` and `Copy`; this reads the
    // exact bytes `pool::Slab::carve` would leave behind for inode slot
    // 0 of a freshly carved page, just without an `Arena` backing it.
    let bytes =
        unsafe { std::slice::from_raw_parts(&rec as *const InodeRecord as *const u8, size_of::<InodeRecord>()) };
    page[..bytes.len()].copy_from_slice(bytes);
    page
}

/// Writes a fresh image to `device`: page 0 holds the two mirrored
/// superblock halves, page 1 holds the root inode. `device` must already
/// exist and be at least [`MIN_DEVICE_BYTES`] long — this writer never
/// creates or resizes the backing file. `dev_uuid` identifies the device
/// entry in the superblock's device list; the filesystem's own `s_uuid`
/// is minted fresh by [`DeviceTable::new`].
pub fn write_image(device: &Path, dev_uuid: [u8; 16]) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(device)?;
    let len = file.metadata()?.len();
    if len < MIN_DEVICE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("device is {len} bytes, need at least {MIN_DEVICE_BYTES}"),
        ));
    }

    let table = DeviceTable::new(dev_uuid, len, now_ns());
    let mut page0 = [0u8; PAGE_SIZE];
    page0[..PART_SIZE].copy_from_slice(table.as_bytes());
    page0[PART_SIZE..].copy_from_slice(table.as_bytes());

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&page0)?;
    file.write_all(&root_inode_page())?;
    file.sync_all()?;

    log::info!("mkfs: wrote superblock and root inode to {}", device.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zerocopy::FromBytes;

    use super::*;

    #[test]
    fn rejects_undersized_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(1024).unwrap();
        let err = write_image(file.path(), [0; 16]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn writes_mirrored_halves_and_root_inode() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(64 << 20).unwrap();
        write_image(file.path(), [0xABu8; 16]).unwrap();

        let mut buf = vec![0u8; 2 * PAGE_SIZE];
        let mut f = std::fs::File::open(file.path()).unwrap();
        f.read_exact(&mut buf).unwrap();

        let half1 = &buf[..PART_SIZE];
        let half2 = &buf[PART_SIZE..PAGE_SIZE];
        assert_eq!(half1, half2, "part1 and part2 must be byte-identical");

        let table = DeviceTable::read_from(half1).unwrap();
        assert!(table.checksum_is_valid());
        assert_eq!(table.checksummed.s_t1_blocks, (64u64 << 20) / PAGE_SIZE as u64);
        assert_eq!(table.checksummed.s_dev_list.dev_ids[0].uuid, [0xABu8; 16]);
        assert_ne!(table.s_uuid, [0xABu8; 16], "s_uuid must not reuse the device uuid");

        let root_page = &buf[PAGE_SIZE..2 * PAGE_SIZE];
        let ino = u64::from_ne_bytes(root_page[0..8].try_into().unwrap());
        assert_eq!(ino, ROOT_INO);
    }
}
