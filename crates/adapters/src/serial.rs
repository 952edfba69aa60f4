// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serial port adapter.
//!
//! The shared serial manager talks to devices through [`SerialConnector`] /
//! [`SerialStream`] so retry logic, ring buffers, and session bookkeeping
//! can be exercised against a scripted fake. The production connector wraps
//! the `serialport` crate.

use std::time::Duration;
use thiserror::Error;

/// Read timeout on the underlying port. Short, so the reader thread can
/// observe detach/shutdown promptly.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial failures, split by how the caller should react.
#[derive(Debug, Error)]
pub enum SerialError {
    /// Device node is gone, transient during USB re-enumeration
    #[error("port {0} not found")]
    NotFound(String),

    /// OS refused the open, transient after a device reset on some hosts
    #[error("permission denied opening port {0}")]
    PermissionDenied(String),

    /// Anything else; stops the session
    #[error("serial I/O error on {port}: {message}")]
    Io { port: String, message: String },
}

impl SerialError {
    /// Errors worth retrying during the open window.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SerialError::NotFound(_) | SerialError::PermissionDenied(_))
    }
}

/// One open serial connection.
pub trait SerialStream: Send + std::fmt::Debug {
    /// Read available bytes into `buf`. Returns 0 on read timeout.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// Reset the device via DTR/RTS so output is captured from boot.
    fn reset_device(&mut self) -> Result<(), SerialError>;
}

/// Opens serial connections.
pub trait SerialConnector: Send + Sync {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialStream>, SerialError>;
}

/// Production connector backed by the `serialport` crate.
#[derive(Clone, Default)]
pub struct SystemSerialConnector;

impl SerialConnector for SystemSerialConnector {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialStream>, SerialError> {
        let opened = serialport::new(port, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| map_open_error(port, e))?;
        Ok(Box::new(SystemSerialStream {
            port: port.to_string(),
            inner: opened,
        }))
    }
}

fn map_open_error(port: &str, e: serialport::Error) -> SerialError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => SerialError::NotFound(port.to_string()),
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            SerialError::NotFound(port.to_string())
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            SerialError::PermissionDenied(port.to_string())
        }
        _ => SerialError::Io {
            port: port.to_string(),
            message: e.to_string(),
        },
    }
}

#[derive(Debug)]
struct SystemSerialStream {
    port: String,
    inner: Box<dyn serialport::SerialPort>,
}

impl SerialStream for SystemSerialStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        use std::io::Read;
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(SerialError::Io {
                port: self.port.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        use std::io::Write;
        self.inner.write_all(bytes).map_err(|e| SerialError::Io {
            port: self.port.clone(),
            message: e.to_string(),
        })
    }

    fn reset_device(&mut self) -> Result<(), SerialError> {
        // DTR/RTS toggle sequence: the device may have booted between the
        // flasher finishing and this open, so force a reset to see output
        // from the start.
        let io_err = |e: serialport::Error| SerialError::Io {
            port: self.port.clone(),
            message: e.to_string(),
        };

        self.inner.write_data_terminal_ready(false).map_err(io_err)?;
        self.inner.write_request_to_send(true).map_err(io_err)?;
        std::thread::sleep(Duration::from_millis(100));
        self.inner.write_request_to_send(false).map_err(io_err)?;
        std::thread::sleep(Duration::from_millis(100));
        self.inner.write_data_terminal_ready(true).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Scripted serial fake for tests.

    use super::{SerialConnector, SerialError, SerialStream};
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::time::Duration;

    /// Outcome of one scripted `open` attempt.
    #[derive(Debug)]
    pub enum OpenOutcome {
        Ok,
        NotFound,
        PermissionDenied,
        /// Non-retryable failure
        Io,
    }

    /// Shared handle to a fake port's state. Tests feed bytes in; streams
    /// read them out.
    #[derive(Clone, Default, Debug)]
    pub struct FakePort {
        inner: Arc<FakePortState>,
    }

    #[derive(Default, Debug)]
    struct FakePortState {
        /// Bytes waiting to be read
        pending: Mutex<VecDeque<u8>>,
        /// Everything written by the daemon side
        written: Mutex<Vec<u8>>,
        /// Remaining scripted open outcomes; once empty, opens succeed
        open_script: Mutex<VecDeque<OpenOutcome>>,
        reset_count: Mutex<u32>,
        open_count: Mutex<u32>,
    }

    impl FakePort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue device output for readers.
        pub fn feed(&self, bytes: &[u8]) {
            self.inner.pending.lock().extend(bytes.iter().copied());
        }

        /// Script the outcomes of upcoming open attempts.
        pub fn script_opens(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
            self.inner.open_script.lock().extend(outcomes);
        }

        pub fn written(&self) -> Vec<u8> {
            self.inner.written.lock().clone()
        }

        pub fn reset_count(&self) -> u32 {
            *self.inner.reset_count.lock()
        }

        pub fn open_count(&self) -> u32 {
            *self.inner.open_count.lock()
        }
    }

    /// Connector serving [`FakePort`]s by name.
    #[derive(Clone, Default)]
    pub struct FakeConnector {
        ports: Arc<Mutex<HashMap<String, FakePort>>>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a port; returns its handle for feeding/scripting.
        pub fn add_port(&self, name: &str) -> FakePort {
            let port = FakePort::new();
            self.ports.lock().insert(name.to_string(), port.clone());
            port
        }
    }

    impl SerialConnector for FakeConnector {
        fn open(&self, port: &str, _baud: u32) -> Result<Box<dyn SerialStream>, SerialError> {
            let handle = self
                .ports
                .lock()
                .get(port)
                .cloned()
                .ok_or_else(|| SerialError::NotFound(port.to_string()))?;

            *handle.inner.open_count.lock() += 1;

            if let Some(outcome) = handle.inner.open_script.lock().pop_front() {
                match outcome {
                    OpenOutcome::Ok => {}
                    OpenOutcome::NotFound => {
                        return Err(SerialError::NotFound(port.to_string()));
                    }
                    OpenOutcome::PermissionDenied => {
                        return Err(SerialError::PermissionDenied(port.to_string()));
                    }
                    OpenOutcome::Io => {
                        return Err(SerialError::Io {
                            port: port.to_string(),
                            message: "device wedged".to_string(),
                        });
                    }
                }
            }

            Ok(Box::new(FakeStream { handle }))
        }
    }

    #[derive(Debug)]
    struct FakeStream {
        handle: FakePort,
    }

    impl SerialStream for FakeStream {
        fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
            let mut pending = self.handle.inner.pending.lock();
            if pending.is_empty() {
                drop(pending);
                // Mimic the production read timeout
                std::thread::sleep(Duration::from_millis(5));
                return Ok(0);
            }

            let n = buf.len().min(pending.len());
            for slot in buf.iter_mut().take(n) {
                if let Some(b) = pending.pop_front() {
                    *slot = b;
                }
            }
            Ok(n)
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
            self.handle.inner.written.lock().extend_from_slice(bytes);
            Ok(())
        }

        fn reset_device(&mut self) -> Result<(), SerialError> {
            *self.handle.inner.reset_count.lock() += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "serial_tests.rs"]
mod tests;
