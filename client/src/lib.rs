//! # Session Client Library
//!
//! This library provides the client role of the UDP session protocol. A
//! client logs in to a server, learns the session id it was assigned, and
//! then keeps the session alive with periodic pings.
//!
//! ## Session Lifecycle
//!
//! ### New
//! The client sends a login request carrying its own return address and the
//! unassigned session id, and repeats it every 500ms until a reply arrives.
//! A reply carrying the unassigned id is ignored, as is one naming a session
//! that is already registered locally.
//!
//! ### LoggedIn
//! The first valid reply registers the client's own player under the
//! assigned id. From then on the client pings every 100ms. Further login
//! messages naming other sessions register those as remote players.
//!
//! ### Disconnected
//! Reached only through `ClientDriver::disconnect`. The next tick stops the
//! loop.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::{ClientConfig, ClientDriver};
//! use shared::{GameLoop, GameParams, UdpServer};
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::time::Duration;
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut socket = UdpServer::new("127.0.0.1", 40000);
//! socket.initialize()?;
//!
//! let config = ClientConfig {
//!     client_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000),
//!     server_addr: "127.0.0.1:8088".parse().unwrap(),
//! };
//! let mut game_loop = GameLoop::new(
//!     GameParams::default(),
//!     ClientDriver::new(config),
//!     socket.transport()?,
//! );
//! socket.run(Duration::from_millis(30), &mut game_loop).await
//! # }
//! ```

pub mod driver;

pub use driver::{ClientConfig, ClientDriver, ClientState};
