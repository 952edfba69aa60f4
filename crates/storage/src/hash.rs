// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content hashing for the file cache and firmware ledger.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Read chunk size. Keeps memory flat when hashing large firmware images.
const CHUNK_SIZE: usize = 8192;

/// SHA-256 of a file's contents, as a lowercase hex string.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex(hasher.finalize().as_slice()))
}

/// Combined SHA-256 over a set of files: paths are sorted so the result is
/// independent of discovery order, and each path is mixed in alongside its
/// contents so a rename changes the hash.
pub fn hash_file_set(paths: &[PathBuf]) -> std::io::Result<String> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        let mut file = File::open(path)?;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(hex(hasher.finalize().as_slice()))
}

/// SHA-256 over a sorted list of compiler/board flags.
///
/// Sorting makes the hash insensitive to flag ordering, which varies between
/// config parse runs without changing build semantics.
pub fn hash_flags<S: AsRef<str>>(flags: &[S]) -> String {
    let mut sorted: Vec<&str> = flags.iter().map(|s| s.as_ref()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for flag in sorted {
        hasher.update(flag.as_bytes());
        hasher.update([0u8]);
    }
    hex(hasher.finalize().as_slice())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
