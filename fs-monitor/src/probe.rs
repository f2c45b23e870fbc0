//! Content checksum and size probing.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Checksum and size of a file's current content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Hex-encoded SHA-256 digest.
    pub checksum: String,

    /// Number of bytes hashed.
    pub size: u64,
}

/// Hash the file at `path` and report its size.
///
/// Fails if the path does not exist or is not a regular file.
pub async fn probe(path: &Path) -> io::Result<Probe> {
    let mut file = File::open(path).await?;
    if !file.metadata().await?.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a regular file: {}", path.display()),
        ));
    }

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(Probe {
        checksum: hex::encode(hasher.finalize()),
        size,
    })
}
