//! Client-side store/retrieve: resolve the owner, then talk to it directly.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use crate::peer::rpc;
use crate::ring;
use crate::{Error, Result};

/// Uploads `file` under its base name: hash the name, ask `entry` for the
/// owner, run the `STORE` exchange against the owner.
pub fn store(entry: &str, file: &Path, timeout: Duration) -> Result<()> {
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a storable file name: {}", file.display()),
            ))
        })?;
    let key = ring::hash(name);

    let owner = rpc::succ(entry, key, timeout)?;
    let mut blob = File::open(file).map_err(Error::Io)?;
    let size = blob.metadata().map_err(Error::Io)?.len();
    rpc::store_blob(&owner, name, size, &mut blob, timeout)?;

    println!("Stored {name} (key {key}) on {owner}");
    Ok(())
}

/// Downloads `name` into the current directory. The bytes land in a temp
/// file first so a failed transfer leaves nothing behind.
pub fn retrieve(entry: &str, name: &str, timeout: Duration) -> Result<()> {
    let key = ring::hash(name);
    let owner = rpc::succ(entry, key, timeout)?;

    let dir = std::env::current_dir().map_err(Error::Io)?;
    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(Error::Io)?;
    let size = rpc::retrieve_blob(&owner, name, temp.as_file_mut(), timeout)?;
    temp.persist(dir.join(name))
        .map_err(|e| Error::Io(e.error))?;

    println!("Retrieved {name} ({size} bytes, key {key}) from {owner}");
    Ok(())
}
