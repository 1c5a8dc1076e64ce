// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Streaming SHA-256 content hashing

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::{Result, TidyError};

const CHUNK_SIZE: usize = 128 * 1024;

/// Hash the first `partial_bytes` of a file, or the whole file when zero.
///
/// Reads in fixed-size chunks so memory use does not depend on file size.
/// The file is opened read-only; on Windows std opens with shared
/// read/write/delete access, so concurrent users are never blocked.
///
/// Any failure to open or read the file is reported as
/// [`TidyError::Unreadable`]; callers should drop the file from the pass.
pub fn hash_file(path: &Path, partial_bytes: u64, cancel: &CancellationToken) -> Result<String> {
    let unreadable = |source| TidyError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(unreadable)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = if partial_bytes > 0 { partial_bytes } else { u64::MAX };

    while remaining > 0 {
        if cancel.is_cancelled() {
            return Err(TidyError::Cancelled);
        }
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let read = match file.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(unreadable(e)),
        };
        hasher.update(&buf[..read]);
        remaining -= read as u64;
    }

    Ok(format!("{:x}", hasher.finalize()))
}
