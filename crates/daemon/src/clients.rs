// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client connection tracking.
//!
//! Clients register when they first talk to the daemon and heartbeat while
//! they hold resources. A client is declared dead when its heartbeat ages
//! out or its PID disappears. The PID probe wins, so a killed client is
//! cleaned up before the heartbeat window expires. Cleanup callbacks
//! release everything the client held; a panicking callback is swallowed
//! so it cannot block cleanup of unrelated subsystems.

use fb_core::{ClientId, Clock};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// One connected client.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub pid: u32,
    /// Epoch ms of registration
    pub connect_time: u64,
    /// Epoch ms of the most recent heartbeat
    pub last_heartbeat: u64,
    pub metadata: HashMap<String, String>,
    /// Opaque IDs of resources attached to this client
    pub resources: HashSet<String>,
}

type CleanupCallback = Box<dyn Fn(&ClientInfo) + Send + Sync>;

/// Registry of live clients with heartbeat-based death detection.
pub struct ClientConnectionManager<C: Clock> {
    clock: C,
    heartbeat_timeout: Duration,
    clients: Mutex<HashMap<ClientId, ClientInfo>>,
    callbacks: Mutex<Vec<CleanupCallback>>,
    next_id: AtomicU64,
}

impl<C: Clock> ClientConnectionManager<C> {
    pub fn new(clock: C, heartbeat_timeout: Duration) -> Self {
        Self {
            clock,
            heartbeat_timeout,
            clients: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a client, generating an ID when none is supplied.
    pub fn register_client(
        &self,
        client_id: Option<ClientId>,
        pid: u32,
        metadata: HashMap<String, String>,
    ) -> ClientInfo {
        let client_id = client_id.unwrap_or_else(|| {
            ClientId::new(format!(
                "client-{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            ))
        });

        let now = self.clock.epoch_ms();
        let info = ClientInfo {
            client_id: client_id.clone(),
            pid,
            connect_time: now,
            last_heartbeat: now,
            metadata,
            resources: HashSet::new(),
        };

        info!(client = %client_id, pid, "client registered");
        self.clients.lock().insert(client_id, info.clone());
        info
    }

    /// Refresh a client's heartbeat. Returns false for unknown clients.
    pub fn update_heartbeat(&self, client_id: &ClientId) -> bool {
        let mut clients = self.clients.lock();
        match clients.get_mut(client_id) {
            Some(info) => {
                info.last_heartbeat = self.clock.epoch_ms();
                true
            }
            None => false,
        }
    }

    /// Alive = registered, heartbeat fresh, and PID still present.
    pub fn is_client_alive(&self, client_id: &ClientId) -> bool {
        let clients = self.clients.lock();
        clients
            .get(client_id)
            .map(|info| !self.is_dead(info))
            .unwrap_or(false)
    }

    fn is_dead(&self, info: &ClientInfo) -> bool {
        // Eager PID probe wins over the heartbeat window
        if !fb_adapters::pid_alive(info.pid) {
            return true;
        }
        let age = self.clock.epoch_ms().saturating_sub(info.last_heartbeat);
        age >= self.heartbeat_timeout.as_millis() as u64
    }

    pub fn get_client(&self, client_id: &ClientId) -> Option<ClientInfo> {
        self.clients.lock().get(client_id).cloned()
    }

    /// IDs of clients currently considered dead.
    pub fn get_dead_clients(&self) -> Vec<ClientId> {
        let clients = self.clients.lock();
        clients
            .values()
            .filter(|info| self.is_dead(info))
            .map(|info| info.client_id.clone())
            .collect()
    }

    /// Unregister every dead client, firing cleanup callbacks.
    pub fn cleanup_dead_clients(&self) -> Vec<ClientId> {
        let dead = self.get_dead_clients();
        for client_id in &dead {
            info!(client = %client_id, "cleaning up dead client");
            self.unregister_client(client_id);
        }
        dead
    }

    /// Attach an opaque resource ID to a client.
    pub fn attach_resource(&self, client_id: &ClientId, resource: &str) -> bool {
        let mut clients = self.clients.lock();
        match clients.get_mut(client_id) {
            Some(info) => {
                info.resources.insert(resource.to_string());
                true
            }
            None => false,
        }
    }

    pub fn detach_resource(&self, client_id: &ClientId, resource: &str) -> bool {
        let mut clients = self.clients.lock();
        clients
            .get_mut(client_id)
            .map(|info| info.resources.remove(resource))
            .unwrap_or(false)
    }

    pub fn get_client_resources(&self, client_id: &ClientId) -> HashSet<String> {
        self.clients
            .lock()
            .get(client_id)
            .map(|info| info.resources.clone())
            .unwrap_or_default()
    }

    /// Register a callback fired with the [`ClientInfo`] on unregister.
    pub fn register_cleanup_callback(&self, callback: CleanupCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Remove a client and fire all cleanup callbacks.
    pub fn unregister_client(&self, client_id: &ClientId) -> bool {
        let Some(info) = self.clients.lock().remove(client_id) else {
            return false;
        };

        let callbacks = self.callbacks.lock();
        for callback in callbacks.iter() {
            // A failing callback must not block the rest
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&info);
            }));
            if result.is_err() {
                warn!(client = %client_id, "cleanup callback panicked");
            }
        }
        true
    }

    /// Drop all clients without firing callbacks. Shutdown only.
    pub fn clear_all_clients(&self) -> usize {
        let mut clients = self.clients.lock();
        let count = clients.len();
        clients.clear();
        count
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

#[cfg(test)]
#[path = "clients_tests.rs"]
mod tests;
