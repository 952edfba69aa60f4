// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-drop request transport.
//!
//! Clients atomically write `<kind>_request.json` into the daemon
//! directory; the receiver polls every 0.5 s, consumes each file
//! (read + delete), and dispatches to the matching processor on a spawned
//! task. The poll loop re-checks the shutdown flag every tick so a user
//! interrupt stops intake promptly while in-flight operations finish.
//!
//! The serial-monitor sub-protocol (attach / detach / poll) shares one
//! response file; requests are serviced in place since polls must be fast.

use crate::context::DaemonContext;
use crate::processors::{
    process_request, BuildProcessor, DeployProcessor, InstallDepsProcessor, MonitorProcessor,
};
use crate::serial_manager::SerialPollData;
use fb_core::{
    BuildRequest, ClientId, Clock, DeployRequest, InstallDepsRequest, MonitorRequest,
    SerialAttachRequest, SerialDetachRequest, SerialPollRequest, SessionId,
};
use fb_storage::save_json_atomic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Response document for the serial-monitor sub-protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialResponse {
    /// Which request this answers: `attach`, `detach`, or `poll`
    pub request: String,
    pub client_id: String,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub poll: Option<SerialPollData>,
}

/// Polls request drop files and dispatches work.
pub struct RequestReceiver<C: Clock + 'static> {
    ctx: Arc<DaemonContext<C>>,
    shutdown: Arc<Notify>,
}

impl<C: Clock + 'static> RequestReceiver<C> {
    pub fn new(ctx: Arc<DaemonContext<C>>, shutdown: Arc<Notify>) -> Self {
        Self { ctx, shutdown }
    }

    /// Run until shutdown is requested.
    pub async fn run(self) {
        let poll_interval = crate::env::poll_interval();
        info!(interval = ?poll_interval, "request receiver started");

        loop {
            if self.ctx.is_shutting_down() {
                break;
            }

            self.poll_once();

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("request receiver stopped");
    }

    /// One pass over every drop file.
    fn poll_once(&self) {
        let paths = &self.ctx.paths;

        if let Some(request) = take_request::<BuildRequest>(&paths.build_request()) {
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                process_request(&BuildProcessor, &request, ctx.as_ref()).await;
            });
        }

        if let Some(request) = take_request::<DeployRequest>(&paths.deploy_request()) {
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                process_request(&DeployProcessor, &request, ctx.as_ref()).await;
            });
        }

        if let Some(request) = take_request::<MonitorRequest>(&paths.monitor_request()) {
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                process_request(&MonitorProcessor, &request, ctx.as_ref()).await;
            });
        }

        if let Some(request) = take_request::<InstallDepsRequest>(&paths.install_deps_request()) {
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                process_request(&InstallDepsProcessor, &request, ctx.as_ref()).await;
            });
        }

        self.poll_serial_api();
    }

    /// Service the serial-monitor sub-protocol files.
    fn poll_serial_api(&self) {
        let paths = &self.ctx.paths;

        if let Some(request) = take_request::<SerialAttachRequest>(&paths.serial_attach_request()) {
            let ctx = Arc::clone(&self.ctx);
            // Attach can retry-open for a while; don't stall the poll loop
            tokio::spawn(async move {
                let response = handle_attach(&ctx, &request).await;
                write_response(&ctx.paths.serial_response(), &response);
            });
        }

        if let Some(request) = take_request::<SerialDetachRequest>(&paths.serial_detach_request()) {
            let response = self.handle_detach(&request);
            write_response(&paths.serial_response(), &response);
        }

        if let Some(request) = take_request::<SerialPollRequest>(&paths.serial_poll_request()) {
            let response = self.handle_poll(&request);
            write_response(&paths.serial_response(), &response);
        }
    }

    fn handle_detach(&self, request: &SerialDetachRequest) -> SerialResponse {
        let client = ClientId::new(request.client_id.clone());
        match self.ctx.serial.detach_client(&request.port, &client) {
            Ok(()) => {
                self.ctx
                    .clients
                    .detach_resource(&client, &resource_id(&request.port));
                SerialResponse {
                    request: "detach".to_string(),
                    client_id: request.client_id.clone(),
                    ok: true,
                    error: None,
                    session_id: None,
                    poll: None,
                }
            }
            Err(e) => SerialResponse {
                request: "detach".to_string(),
                client_id: request.client_id.clone(),
                ok: false,
                error: Some(e.to_string()),
                session_id: None,
                poll: None,
            },
        }
    }

    fn handle_poll(&self, request: &SerialPollRequest) -> SerialResponse {
        let client = ClientId::new(request.client_id.clone());
        // Polling doubles as the client's heartbeat
        self.ctx.clients.update_heartbeat(&client);

        match self
            .ctx
            .serial
            .poll(&request.port, &client, request.last_seen_seq)
        {
            Ok(poll) => SerialResponse {
                request: "poll".to_string(),
                client_id: request.client_id.clone(),
                ok: true,
                error: None,
                session_id: None,
                poll: Some(poll),
            },
            Err(e) => SerialResponse {
                request: "poll".to_string(),
                client_id: request.client_id.clone(),
                ok: false,
                error: Some(e.to_string()),
                session_id: None,
                poll: None,
            },
        }
    }
}

async fn handle_attach<C: Clock + 'static>(
    ctx: &DaemonContext<C>,
    request: &SerialAttachRequest,
) -> SerialResponse {
    let client = ClientId::new(request.client_id.clone());

    if ctx.clients.get_client(&client).is_none() {
        ctx.clients.register_client(
            Some(client.clone()),
            request.caller_pid,
            HashMap::new(),
        );
    } else {
        ctx.clients.update_heartbeat(&client);
    }

    match ctx
        .serial
        .open_port(&request.port, request.baud_rate, &client)
        .await
    {
        Ok(session_id) => {
            ctx.clients
                .attach_resource(&client, &resource_id(&request.port));
            SerialResponse {
                request: "attach".to_string(),
                client_id: request.client_id.clone(),
                ok: true,
                error: None,
                session_id: Some(session_id),
                poll: None,
            }
        }
        Err(e) => SerialResponse {
            request: "attach".to_string(),
            client_id: request.client_id.clone(),
            ok: false,
            error: Some(e.to_string()),
            session_id: None,
            poll: None,
        },
    }
}

/// Opaque resource ID tying a serial attachment to a client.
fn resource_id(port: &str) -> String {
    format!("serial:{port}")
}

/// Consume a request drop file: parse then delete. A malformed file is
/// deleted too, since leaving it would wedge the poll loop forever.
fn take_request<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read request file");
            return None;
        }
    };

    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove request file");
    }

    match serde_json::from_str(&content) {
        Ok(request) => {
            debug!(path = %path.display(), "request accepted");
            Some(request)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "malformed request file dropped");
            None
        }
    }
}

fn write_response(path: &Path, response: &SerialResponse) {
    if let Err(e) = save_json_atomic(path, response) {
        warn!(path = %path.display(), error = %e, "failed to write serial response");
    }
}

/// Periodically sweep dead clients so their resources release promptly.
pub fn spawn_heartbeat_sweeper<C: Clock + 'static>(ctx: Arc<DaemonContext<C>>) {
    let interval = crate::env::heartbeat_timeout() / 3;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            if ctx.is_shutting_down() {
                break;
            }
            let dead = ctx.clients.cleanup_dead_clients();
            if !dead.is_empty() {
                info!(count = dead.len(), "swept dead clients");
            }
        }
    });
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
