//! `mkfs <device-path> <uuid>`: formats an already-sized regular file or
//! block device with a fresh `toyfs` image.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "mkfs", about = "Writes a toyfs image to a device")]
struct Args {
    /// Regular file or block device to format. Must already exist and
    /// be at least 1 MiB.
    device: PathBuf,

    /// Filesystem UUID, e.g. 00112233-4455-6677-8899-aabbccddeeff.
    uuid: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let uuid = match uuid::Uuid::parse_str(&args.uuid) {
        Ok(uuid) => uuid,
        Err(e) => {
            log::error!("mkfs: invalid uuid {:?}: {}", args.uuid, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = toyfs::format::write_image(&args.device, *uuid.as_bytes()) {
        log::error!("mkfs: {}: {}", args.device.display(), e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
