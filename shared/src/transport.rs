//! Outgoing datagram seam between session drivers and the socket

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A datagram as received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub bytes: Bytes,
}

impl Datagram {
    pub fn new(from: SocketAddr, bytes: impl Into<Bytes>) -> Self {
        Self {
            from,
            bytes: bytes.into(),
        }
    }
}

/// Non-blocking datagram send used by drivers while handling a tick.
///
/// A failed send aborts only that one operation; callers log and move on.
pub trait Transport {
    fn send_to(&self, target: SocketAddr, bytes: &[u8]) -> io::Result<()>;
}

/// [`Transport`] over a non-blocking clone of the loop's UDP socket.
///
/// Sends go straight to the OS, so they do not depend on the runtime having
/// seen the socket become writable.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<std::net::UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<std::net::UdpSocket>) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, target: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        let written = self.socket.send_to(bytes, target)?;
        if written != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", written, bytes.len()),
            ));
        }
        Ok(())
    }
}

/// A datagram recorded by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub target: SocketAddr,
    pub bytes: Bytes,
}

/// In-process [`Transport`] that records every send instead of touching the
/// network. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Outgoing>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail with `ConnectionRefused`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drains the recorded datagrams
    pub fn take(&self) -> Vec<Outgoing> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, target: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory transport is failing sends",
            ));
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory transport poisoned"))?;
        sent.push(Outgoing {
            target,
            bytes: Bytes::copy_from_slice(bytes),
        });
        Ok(())
    }
}
