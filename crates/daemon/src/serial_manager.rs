// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared serial port sessions.
//!
//! One physical port is served by at most one session. A dedicated reader
//! thread pulls bytes into a bounded ring buffer; every byte gets a
//! monotonically increasing sequence number, and clients poll with a
//! `(client, last_seen_seq)` cursor so multiple clients observe the same
//! bytes in the same order without loss.
//!
//! Opening retries through the USB quirk window: after a device reset the
//! OS can report permission-denied while the old handle drains, and during
//! re-enumeration the node disappears entirely before coming back. Both
//! are retried with exponential backoff. An exclusive preemption (firmware
//! upload) force-closes the session and leaves a notice for each attached
//! client to reconnect afterwards.

use fb_adapters::{SerialConnector, SerialStream};
use fb_core::{ClientId, SessionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ring buffer capacity per session.
const RING_CAPACITY: usize = 64 * 1024;

/// Open retry bounds. Windows needs a longer window because USB-CDC
/// re-enumeration can hold the node hostage for tens of seconds.
#[cfg(windows)]
const MAX_OPEN_ATTEMPTS: usize = 30;
#[cfg(not(windows))]
const MAX_OPEN_ATTEMPTS: usize = 15;

/// Backoff cap between open attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// First backoff step. `FBUILD_SERIAL_RETRY_BASE_MS` overrides (tests use
/// short windows).
fn initial_backoff() -> Duration {
    std::env::var("FBUILD_SERIAL_RETRY_BASE_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1))
}

/// Serial manager failures.
#[derive(Debug, Error)]
pub enum SerialManagerError {
    #[error("port {port} could not be opened after {attempts} attempts: {last_error}")]
    OpenFailed {
        port: String,
        attempts: usize,
        last_error: String,
    },

    #[error("no session open for port {0}")]
    NoSession(String),

    #[error("client {client} is not attached to port {port}")]
    NotAttached { client: ClientId, port: String },
}

/// Out-of-band event delivered to a client on its next poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerialNotice {
    /// The session was closed for an exclusive upload; reconnect afterwards
    Preempted,
    /// The session died from an unrecoverable I/O error
    SessionError { message: String },
}

/// Data returned by one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPollData {
    /// Bytes since the client's cursor (lossy UTF-8 for the wire)
    pub data: String,
    /// New cursor to pass on the next poll
    pub new_seq: u64,
    /// Events since the last poll
    #[serde(default)]
    pub notices: Vec<SerialNotice>,
}

struct Ring {
    bytes: VecDeque<u8>,
    /// Sequence number of the first byte in `bytes`
    start_seq: u64,
    /// Sequence number the next received byte will get
    next_seq: u64,
}

impl Ring {
    fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
            start_seq: 0,
            next_seq: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk.iter().copied());
        self.next_seq += chunk.len() as u64;
        while self.bytes.len() > RING_CAPACITY {
            self.bytes.pop_front();
            self.start_seq += 1;
        }
    }

    /// Bytes from `seq` onward. A cursor older than the ring start resumes
    /// from the oldest retained byte.
    fn since(&self, seq: u64) -> (Vec<u8>, u64) {
        let from = seq.max(self.start_seq);
        let offset = (from - self.start_seq) as usize;
        let data = self.bytes.iter().skip(offset).copied().collect();
        (data, self.next_seq)
    }
}

struct Session {
    session_id: SessionId,
    clients: HashSet<ClientId>,
    ring: Ring,
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
    /// Set by the reader thread on unrecoverable error
    dead: bool,
}

/// Serializes physical port access across logical attaches.
pub struct SharedSerialManager {
    connector: Arc<dyn SerialConnector>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    /// Ports with an open() in flight, so concurrent attaches wait instead
    /// of double-opening the device
    opening: Arc<Mutex<HashSet<String>>>,
    /// Notices for clients whose session is gone (preemption, errors)
    pending_notices: Arc<Mutex<HashMap<ClientId, Vec<SerialNotice>>>>,
}

impl SharedSerialManager {
    pub fn new(connector: Arc<dyn SerialConnector>) -> Self {
        Self {
            connector,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            opening: Arc::new(Mutex::new(HashSet::new())),
            pending_notices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach `client` to `port`, opening a session if none exists.
    ///
    /// Returns the session ID. Opening retries `PermissionError` and
    /// `FileNotFoundError`-class failures with exponential backoff
    /// (1s → 2s → 4s → 8s → 10s cap).
    pub async fn open_port(
        &self,
        port: &str,
        baud: u32,
        client: &ClientId,
    ) -> Result<SessionId, SerialManagerError> {
        loop {
            // Fast path: session exists, just attach
            let stale = {
                let mut sessions = self.sessions.lock();
                match sessions.get_mut(port) {
                    Some(session) if !session.dead => {
                        session.clients.insert(client.clone());
                        debug!(port, client = %client, "attached to existing session");
                        return Ok(session.session_id.clone());
                    }
                    Some(_) => sessions.remove(port),
                    None => None,
                }
            };
            if let Some(session) = stale {
                close_session(port, session);
            }

            // Serialize opens per port
            let we_open = self.opening.lock().insert(port.to_string());
            if we_open {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let result = self.open_with_retries(port, baud).await;
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                self.opening.lock().remove(port);
                return Err(e);
            }
        };

        let session_id = SessionId::for_port(port, baud);
        let stop = Arc::new(AtomicBool::new(false));

        // Insert the session before the reader starts so no bytes are read
        // into the void
        {
            let mut session = Session {
                session_id: session_id.clone(),
                clients: HashSet::new(),
                ring: Ring::new(),
                stop: Arc::clone(&stop),
                reader: None,
                dead: false,
            };
            session.clients.insert(client.clone());
            self.sessions.lock().insert(port.to_string(), session);
        }

        let reader = spawn_reader(
            port.to_string(),
            stream,
            Arc::clone(&self.sessions),
            Arc::clone(&self.pending_notices),
            stop,
        );
        if let Some(session) = self.sessions.lock().get_mut(port) {
            session.reader = Some(reader);
        }

        self.opening.lock().remove(port);
        info!(port, baud, client = %client, "serial session opened");
        Ok(session_id)
    }

    async fn open_with_retries(
        &self,
        port: &str,
        baud: u32,
    ) -> Result<Box<dyn SerialStream>, SerialManagerError> {
        let mut backoff = initial_backoff();
        let mut last_error = String::new();

        for attempt in 1..=MAX_OPEN_ATTEMPTS {
            match self.connector.open(port, baud) {
                Ok(mut stream) => {
                    if let Err(e) = stream.reset_device() {
                        warn!(port, error = %e, "device reset failed, continuing");
                    }
                    if attempt > 1 {
                        info!(port, attempt, "serial port opened after retries");
                    }
                    return Ok(stream);
                }
                Err(e) if e.is_retryable() && attempt < MAX_OPEN_ATTEMPTS => {
                    // Crash-rebooting devices alternate between
                    // permission-denied and not-found here
                    debug!(port, attempt, error = %e, "open failed, retrying");
                    last_error = e.to_string();
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    return Err(SerialManagerError::OpenFailed {
                        port: port.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        Err(SerialManagerError::OpenFailed {
            port: port.to_string(),
            attempts: MAX_OPEN_ATTEMPTS,
            last_error,
        })
    }

    /// Attach another client to an existing session.
    pub fn attach_client(
        &self,
        port: &str,
        client: &ClientId,
    ) -> Result<SessionId, SerialManagerError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(port)
            .filter(|s| !s.dead)
            .ok_or_else(|| SerialManagerError::NoSession(port.to_string()))?;
        session.clients.insert(client.clone());
        Ok(session.session_id.clone())
    }

    /// Poll for bytes after `last_seen_seq`, plus any pending notices.
    ///
    /// When the session is gone but notices are pending (preemption, death),
    /// the notices are still delivered.
    pub fn poll(
        &self,
        port: &str,
        client: &ClientId,
        last_seen_seq: u64,
    ) -> Result<SerialPollData, SerialManagerError> {
        let notices = self
            .pending_notices
            .lock()
            .remove(client)
            .unwrap_or_default();

        let mut sessions = self.sessions.lock();
        match sessions.get_mut(port) {
            Some(session) => {
                if !session.clients.contains(client) {
                    return Err(SerialManagerError::NotAttached {
                        client: client.clone(),
                        port: port.to_string(),
                    });
                }
                let (bytes, new_seq) = session.ring.since(last_seen_seq);
                Ok(SerialPollData {
                    data: String::from_utf8_lossy(&bytes).into_owned(),
                    new_seq,
                    notices,
                })
            }
            None if !notices.is_empty() => Ok(SerialPollData {
                data: String::new(),
                new_seq: last_seen_seq,
                notices,
            }),
            None => Err(SerialManagerError::NoSession(port.to_string())),
        }
    }

    /// Detach a client from one port. The last detach closes the port.
    pub fn detach_client(&self, port: &str, client: &ClientId) -> Result<(), SerialManagerError> {
        let closed = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(port)
                .ok_or_else(|| SerialManagerError::NoSession(port.to_string()))?;

            if !session.clients.remove(client) {
                return Err(SerialManagerError::NotAttached {
                    client: client.clone(),
                    port: port.to_string(),
                });
            }

            if session.clients.is_empty() {
                sessions.remove(port)
            } else {
                None
            }
        };

        if let Some(session) = closed {
            info!(port, "last client detached, closing session");
            close_session(port, session);
        }
        Ok(())
    }

    /// Detach a client from every session it is attached to.
    /// Fired by the client disconnect callback.
    pub fn disconnect_client(&self, client: &ClientId) -> usize {
        let mut detached = 0;
        let to_close = {
            let mut sessions = self.sessions.lock();
            let mut empty_ports = Vec::new();
            for (port, session) in sessions.iter_mut() {
                if session.clients.remove(client) {
                    detached += 1;
                    if session.clients.is_empty() {
                        empty_ports.push(port.clone());
                    }
                }
            }
            empty_ports
                .into_iter()
                .filter_map(|port| sessions.remove(&port).map(|s| (port, s)))
                .collect::<Vec<_>>()
        };
        self.pending_notices.lock().remove(client);

        for (port, session) in to_close {
            info!(port, "closing session after client disconnect");
            close_session(&port, session);
        }
        detached
    }

    /// Force-close a session so an exclusive holder (firmware upload) can
    /// take the physical port. Each attached client gets a Preempted notice
    /// delivered on its next poll; returns the clients that were attached.
    pub fn preempt_for_upload(&self, port: &str) -> Vec<ClientId> {
        let (clients, session) = {
            let mut sessions = self.sessions.lock();
            match sessions.remove(port) {
                Some(mut session) => {
                    let clients: Vec<ClientId> = session.clients.drain().collect();
                    (clients, Some(session))
                }
                None => (Vec::new(), None),
            }
        };

        if let Some(session) = session {
            info!(port, clients = clients.len(), "preempting serial session for upload");
            close_session(port, session);
        }

        let mut pending = self.pending_notices.lock();
        for client in &clients {
            pending
                .entry(client.clone())
                .or_default()
                .push(SerialNotice::Preempted);
        }
        clients
    }

    /// True if a live session exists for `port`.
    pub fn has_session(&self, port: &str) -> bool {
        self.sessions
            .lock()
            .get(port)
            .map(|s| !s.dead)
            .unwrap_or(false)
    }

    /// Clients attached to `port`.
    pub fn session_clients(&self, port: &str) -> Vec<ClientId> {
        self.sessions
            .lock()
            .get(port)
            .map(|s| s.clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Close every session. Shutdown only.
    pub fn shutdown(&self) {
        let sessions: Vec<(String, Session)> = {
            let mut map = self.sessions.lock();
            let ports: Vec<String> = map.keys().cloned().collect();
            ports
                .into_iter()
                .filter_map(|port| map.remove(&port).map(|s| (port, s)))
                .collect()
        };
        for (port, session) in sessions {
            close_session(&port, session);
        }
    }
}

/// Stop the reader and join it. Must be called WITHOUT the session map
/// locked: the reader takes that lock to push bytes, so joining under it
/// would deadlock.
fn close_session(port: &str, mut session: Session) {
    session.stop.store(true, Ordering::SeqCst);
    if let Some(reader) = session.reader.take() {
        if reader.join().is_err() {
            warn!(port, "serial reader thread panicked");
        }
    }
    debug!(port, "serial session closed");
}

/// Reader thread: port bytes into the session ring until stopped.
fn spawn_reader(
    port: String,
    mut stream: Box<dyn SerialStream>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    pending_notices: Arc<Mutex<HashMap<ClientId, Vec<SerialNotice>>>>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("fb-serial-{port}"))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                match stream.read_chunk(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        let mut sessions = sessions.lock();
                        if let Some(session) = sessions.get_mut(&port) {
                            session.ring.push(&buf[..n]);
                        }
                    }
                    Err(e) => {
                        warn!(port, error = %e, "serial session error, stopping reader");
                        let clients = {
                            let mut sessions = sessions.lock();
                            match sessions.get_mut(&port) {
                                Some(session) => {
                                    session.dead = true;
                                    session.clients.iter().cloned().collect::<Vec<_>>()
                                }
                                None => Vec::new(),
                            }
                        };
                        let notice = SerialNotice::SessionError {
                            message: e.to_string(),
                        };
                        let mut pending = pending_notices.lock();
                        for client in clients {
                            pending.entry(client).or_default().push(notice.clone());
                        }
                        break;
                    }
                }
            }
        })
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to spawn serial reader thread");
            std::thread::spawn(|| {})
        })
}

#[cfg(test)]
#[path = "serial_manager_tests.rs"]
mod tests;
