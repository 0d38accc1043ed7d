//! Content-address hashing for sync items.
//!
//! The gateway stores whole blobs keyed by SHA-256, so the walker streams
//! every included file through this hasher exactly once. The hasher keeps no
//! state between files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use digest::Digest;
use sha2::Sha256;

const READ_BUFFER: usize = 64 * 1024;

/// Streams the contents of `path` through SHA-256 and returns the lowercase
/// hex digest.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}
