// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fb-storage: Atomic on-disk state for the fbuild daemon.
//!
//! Everything the daemon persists (the incremental-compilation file cache,
//! the per-port firmware ledger, the status snapshot) goes through the
//! same temp-and-rename atomic write discipline so a crash mid-write never
//! leaves a partial document behind.

pub mod atomic;
pub mod file_cache;
pub mod hash;
pub mod ledger;
pub mod status_file;

pub use atomic::{load_json, save_json_atomic, AtomicIoError};
pub use file_cache::{CacheStatistics, FileCache};
pub use hash::{hash_file, hash_file_set, hash_flags};
pub use ledger::{FirmwareEntry, FirmwareLedger, STALE_AFTER_SECS};
pub use status_file::StatusFile;
