//! Datagram server loop with cooperative shutdown
//!
//! [`UdpServer::run`] alternates between waiting for the socket, draining
//! every datagram that is ready, and ticking the handler once per interval.
//! The wait is always bounded by the interval so ticks keep coming without
//! traffic, and [`UdpServer::shutdown`] may be called from any task or
//! thread to stop the loop at its next wake-up.

use crate::protocol::MAX_DATAGRAM_SIZE;
use crate::transport::{Datagram, UdpTransport};
use bytes::Bytes;
use log::{debug, error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// Receives everything the loop reads off the socket
pub trait DatagramHandler {
    fn on_datagram(&mut self, datagram: Datagram);

    /// Called at most once per interval. Returning false stops the loop.
    fn on_tick(&mut self) -> bool;
}

/// One-shot stop request shared between the loop and whoever stops it
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes the loop. Returns false if shutdown was
    /// already requested, in which case nothing happens.
    pub fn shutdown(&self) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        // notify_one keeps a permit when nobody is waiting yet
        self.notify.notify_one();
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a shutdown has been signalled
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

pub struct UdpServer {
    host: String,
    port: u16,
    socket: Option<Arc<UdpSocket>>,
    /// Clone of the bound socket used for replies
    sender: Option<Arc<std::net::UdpSocket>>,
    shutdown: Arc<ShutdownSignal>,
}

impl UdpServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: None,
            sender: None,
            shutdown: Arc::new(ShutdownSignal::new()),
        }
    }

    /// Binds the socket in non-blocking mode. Calling it again once bound
    /// does nothing. Must be called from within a tokio runtime.
    pub fn initialize(&mut self) -> io::Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = std::net::UdpSocket::bind((self.host.as_str(), self.port)).map_err(|e| {
            error!("Failed to bind {}:{}: {}", self.host, self.port, e);
            e
        })?;
        socket.set_nonblocking(true).map_err(|e| {
            error!("Failed to make socket non-blocking: {}", e);
            e
        })?;
        let sender = socket.try_clone()?;
        let socket = UdpSocket::from_std(socket)?;

        info!("Listening on {}", socket.local_addr()?);
        self.socket = Some(Arc::new(socket));
        self.sender = Some(Arc::new(sender));
        Ok(())
    }

    fn socket(&self) -> io::Result<&Arc<UdpSocket>> {
        self.socket.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "server socket is not initialized")
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    /// Send side of the bound socket for handlers to reply through
    pub fn transport(&self) -> io::Result<UdpTransport> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "server socket is not initialized")
        })?;
        Ok(UdpTransport::new(Arc::clone(sender)))
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) -> bool {
        self.shutdown.shutdown()
    }

    /// Runs the receive/tick cycle until shutdown is requested, the handler
    /// asks to stop, or the socket fails.
    pub async fn run<H: DatagramHandler + ?Sized>(
        &self,
        interval: Duration,
        handler: &mut H,
    ) -> io::Result<()> {
        let socket = self.socket()?;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut last_tick = Instant::now();

        info!("Server loop started with a {:?} tick interval", interval);

        while !self.shutdown.is_shutdown() {
            let until_tick = interval.saturating_sub(last_tick.elapsed());
            tokio::select! {
                ready = socket.readable() => ready?,
                _ = time::sleep(until_tick) => {}
                _ = self.shutdown.wait() => {}
            }

            if self.shutdown.is_shutdown() {
                break;
            }

            drain(|buf| socket.try_recv_from(buf), &mut buffer, handler)?;

            if last_tick.elapsed() >= interval {
                last_tick = Instant::now();
                if !handler.on_tick() {
                    info!("Tick handler asked the loop to stop");
                    break;
                }
            }

            let remaining = interval.saturating_sub(last_tick.elapsed());
            if !remaining.is_zero() {
                tokio::select! {
                    _ = time::sleep(remaining) => {}
                    _ = self.shutdown.wait() => {}
                }
            }
        }

        info!("Server loop stopped");
        Ok(())
    }
}

/// Hands every ready datagram to the handler until `recv` would block.
/// Transient errors are skipped; any other error is returned.
fn drain<H, R>(mut recv: R, buffer: &mut [u8], handler: &mut H) -> io::Result<()>
where
    H: DatagramHandler + ?Sized,
    R: FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
{
    loop {
        match recv(buffer) {
            Ok((len, from)) => {
                handler.on_datagram(Datagram::new(from, Bytes::copy_from_slice(&buffer[..len])));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if is_transient(&e) => {
                debug!("Ignoring transient receive error: {}", e);
            }
            Err(e) => {
                error!("Receive failed, stopping server loop: {}", e);
                return Err(e);
            }
        }
    }
}

/// Errors a connectionless socket reports for earlier sends to dead peers
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[derive(Default)]
    struct CountingHandler {
        datagrams: Vec<Datagram>,
        ticks: u32,
        stop_after: Option<u32>,
    }

    impl DatagramHandler for CountingHandler {
        fn on_datagram(&mut self, datagram: Datagram) {
            self.datagrams.push(datagram);
        }

        fn on_tick(&mut self) -> bool {
            self.ticks += 1;
            match self.stop_after {
                Some(limit) => self.ticks < limit,
                None => true,
            }
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
        assert!(signal.shutdown());
        assert!(signal.is_shutdown());
        assert!(!signal.shutdown());
    }

    #[test]
    fn test_shutdown_before_wait_is_not_missed() {
        let signal = ShutdownSignal::new();
        signal.shutdown();
        tokio_test::block_on(signal.wait());
    }

    #[test]
    fn test_run_requires_initialize() {
        let server = UdpServer::new("127.0.0.1", 0);
        let mut handler = CountingHandler::default();

        let err = tokio_test::block_on(server.run(Duration::from_millis(5), &mut handler))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(server.local_addr().is_err());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        let addr = server.local_addr().unwrap();

        server.initialize().unwrap();
        assert_eq!(server.local_addr().unwrap(), addr);
        assert_eq!(server.transport().unwrap().local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_initialize_reports_bind_failure() {
        let mut first = UdpServer::new("127.0.0.1", 0);
        first.initialize().unwrap();
        let port = first.local_addr().unwrap().port();

        let mut second = UdpServer::new("127.0.0.1", port);
        assert!(second.initialize().is_err());
    }

    #[tokio::test]
    async fn test_handler_can_stop_loop() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        let mut handler = CountingHandler {
            stop_after: Some(3),
            ..Default::default()
        };

        server
            .run(Duration::from_millis(5), &mut handler)
            .await
            .unwrap();
        assert_eq!(handler.ticks, 3);
    }

    #[tokio::test]
    async fn test_loop_delivers_datagrams() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        let addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"first", addr).await.unwrap();
        client.send_to(b"second", addr).await.unwrap();

        let mut handler = CountingHandler {
            stop_after: Some(20),
            ..Default::default()
        };
        server
            .run(Duration::from_millis(5), &mut handler)
            .await
            .unwrap();

        assert_eq!(handler.datagrams.len(), 2);
        assert_eq!(handler.datagrams[0].bytes.as_ref(), b"first");
        assert_eq!(handler.datagrams[1].bytes.as_ref(), b"second");
        assert_eq!(handler.datagrams[0].from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_loop() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        let signal = server.shutdown_handle();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            signal.shutdown();
        });

        let mut handler = CountingHandler::default();
        let result = time::timeout(
            Duration::from_secs(5),
            server.run(Duration::from_millis(10), &mut handler),
        )
        .await;

        assert!(result.is_ok(), "loop did not stop after shutdown");
        assert!(result.unwrap().is_ok());
        assert!(handler.ticks > 0);
        assert!(!server.shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_immediately() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        assert!(server.shutdown());

        let mut handler = CountingHandler::default();
        server
            .run(Duration::from_secs(60), &mut handler)
            .await
            .unwrap();
        assert_eq!(handler.ticks, 0);
    }

    fn scripted(
        results: Vec<io::Result<(usize, SocketAddr)>>,
    ) -> impl FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut results = results.into_iter();
        move |buf: &mut [u8]| {
            buf[..3].copy_from_slice(b"abc");
            results
                .next()
                .unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()))
        }
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_drain_skips_transient_errors() {
        let mut handler = CountingHandler::default();
        let mut buffer = [0u8; 16];
        let recv = scripted(vec![
            Ok((3, test_addr())),
            Err(io::ErrorKind::ConnectionReset.into()),
            Ok((3, test_addr())),
            Err(io::ErrorKind::ConnectionRefused.into()),
        ]);

        drain(recv, &mut buffer, &mut handler).unwrap();
        assert_eq!(handler.datagrams.len(), 2);
        assert_eq!(handler.datagrams[1].bytes.as_ref(), b"abc");
        assert_eq!(handler.datagrams[1].from, test_addr());
    }

    #[test]
    fn test_drain_stops_on_other_errors() {
        let mut handler = CountingHandler::default();
        let mut buffer = [0u8; 16];
        let recv = scripted(vec![
            Ok((3, test_addr())),
            Err(io::ErrorKind::PermissionDenied.into()),
            Ok((3, test_addr())),
        ]);

        let err = drain(recv, &mut buffer, &mut handler).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(handler.datagrams.len(), 1);
    }

    #[test]
    fn test_transient_error_kinds() {
        assert!(is_transient(&io::ErrorKind::ConnectionReset.into()));
        assert!(is_transient(&io::ErrorKind::ConnectionRefused.into()));
        assert!(!is_transient(&io::ErrorKind::PermissionDenied.into()));
        assert!(!is_transient(&io::ErrorKind::WouldBlock.into()));
    }

    #[tokio::test]
    async fn test_fresh_transport_sends_immediately() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let transport = server.transport().unwrap();
        for _ in 0..3 {
            transport
                .send_to(receiver.local_addr().unwrap(), b"reply")
                .unwrap();
        }

        let mut buf = [0u8; 16];
        let (len, from) = time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"reply");
        assert_eq!(from, server.local_addr().unwrap());
    }

    #[test]
    fn test_transport_requires_initialize() {
        let server = UdpServer::new("127.0.0.1", 0);
        assert_eq!(
            server.transport().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[tokio::test]
    async fn test_shutdown_from_another_thread() {
        let mut server = UdpServer::new("127.0.0.1", 0);
        server.initialize().unwrap();
        let addr = server.local_addr().unwrap();
        let signal = server.shutdown_handle();

        let worker = std::thread::spawn(move || {
            let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            for _ in 0..200 {
                sender.send_to(b"traffic", addr).unwrap();
                std::thread::sleep(Duration::from_millis(1));
            }
            signal.shutdown()
        });

        let mut handler = CountingHandler::default();
        let result = time::timeout(
            Duration::from_secs(5),
            server.run(Duration::from_millis(20), &mut handler),
        )
        .await;

        assert!(result.is_ok(), "loop did not stop after shutdown");
        result.unwrap().unwrap();
        assert!(worker.join().unwrap());
        assert!(handler.ticks > 0);
        assert!(!handler.datagrams.is_empty());
    }
}
