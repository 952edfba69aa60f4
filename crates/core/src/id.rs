// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes for the daemon protocol.
//!
//! Daemon-assigned IDs (operations) carry a short kind prefix so log lines
//! and status output are self-describing. Client-supplied IDs (requests)
//! end up in filenames on disk, so they are validated for path safety
//! before the daemon acts on them.

use std::fmt;

/// Longest accepted client-supplied identifier.
const MAX_ID_LEN: usize = 128;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_id! {
    /// Daemon-assigned identifier for one accepted operation.
    OperationId
}

impl OperationId {
    /// Fresh ID, e.g. `op-673cb1a407c94ad8b97c334a62c4b230`.
    pub fn generate() -> Self {
        Self(format!("op-{}", uuid::Uuid::new_v4().simple()))
    }
}

string_id! {
    /// Client-supplied identifier for one request.
    ///
    /// Names the cancellation signal file (`cancel_<request_id>.signal`),
    /// so it must pass [`RequestId::is_path_safe`] before the daemon
    /// touches the filesystem with it.
    RequestId
}

impl RequestId {
    /// Fresh ID for clients, e.g. `req-1f3a9c2d74e04b6c8d21e05f77aa90bc`.
    pub fn generate() -> Self {
        Self(format!("req-{}", uuid::Uuid::new_v4().simple()))
    }

    /// True if the ID can safely appear in a filename inside the daemon
    /// directory: limited length, no separators, no leading dot.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_ID_LEN
            && !self.0.starts_with('.')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

string_id! {
    /// Identifier for a connected client.
    ///
    /// Daemon-generated for anonymous registrations; serial-monitor API
    /// clients bring their own.
    ClientId
}

impl ClientId {
    /// Internal identity the daemon uses when it attaches to a serial
    /// session itself (the monitor processor).
    pub fn for_monitor(operation_id: &OperationId) -> Self {
        Self(format!("monitor-{operation_id}"))
    }
}

string_id! {
    /// Identifier for a shared serial session.
    SessionId
}

impl SessionId {
    /// Sessions are keyed by physical port and baud rate; the ID encodes
    /// both so a reopened port at a new rate is a distinct session.
    pub fn for_port(port: &str, baud: u32) -> Self {
        Self(format!("session-{port}-{baud}"))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
