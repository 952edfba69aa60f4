// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line length management.
//!
//! Windows bounds the command line at ~32k characters. Include-path lists
//! for ESP32 builds routinely blow past that, so when the estimated line
//! would exceed the threshold the include arguments are written to a
//! response file and passed as `@file`.

use std::path::{Path, PathBuf};

/// Threshold near the 32k Windows limit, leaving room for the program path.
#[cfg(windows)]
const CMDLINE_LIMIT: usize = 30_000;

/// Unix argv limits are megabytes; effectively never hit, but the same
/// mechanism applies for symmetry.
#[cfg(not(windows))]
const CMDLINE_LIMIT: usize = 1_500_000;

/// Estimated command-line length: argument bytes plus separators, with a
/// 10% margin for quoting.
pub fn estimate_command_len<S: AsRef<str>>(args: &[S]) -> usize {
    let raw: usize = args.iter().map(|a| a.as_ref().len() + 1).sum();
    raw + raw / 10
}

/// Whether `args` should go through a response file.
pub fn needs_response_file<S: AsRef<str>>(args: &[S]) -> bool {
    estimate_command_len(args) > CMDLINE_LIMIT
}

/// Write `include_args` to a response file next to `object`.
///
/// Returns the response file path, to be passed as `@path`.
pub fn write_response_file(object: &Path, include_args: &[String]) -> std::io::Result<PathBuf> {
    let rsp = object.with_extension("rsp");
    // One arg per line; compilers accept both spaces and newlines in @files
    std::fs::write(&rsp, include_args.join("\n"))?;
    Ok(rsp)
}

#[cfg(test)]
#[path = "cmdline_tests.rs"]
mod tests;
