//! Protocol, game state and datagram loop shared by the client and server
//!
//! The data flow through this crate is:
//!
//! ```text
//! socket -> net::UdpServer -> session::GameLoop -> game::Game (event queue)
//!        -> tick -> SessionDriver handler -> protocol encode -> Transport
//! ```

pub mod game;
pub mod net;
pub mod player;
pub mod protocol;
pub mod selftest;
pub mod session;
pub mod transport;

pub use game::{
    AcknowledgeEvent, Event, Game, GameParams, LoginEvent, PingEvent, SessionError,
};
pub use net::{DatagramHandler, ShutdownSignal, UdpServer};
pub use player::{PlayerState, Position, PositionState};
pub use protocol::{
    AcknowledgeMessage, Action, DecodeError, LoginMessage, Message, MessageHeader, PingMessage,
    WireMessage, INVALID_PLAYER, INVALID_SESSION, MAX_DATAGRAM_SIZE,
};
pub use session::{GameLoop, SessionDriver, TickContext};
pub use transport::{Datagram, MemoryTransport, Transport, UdpTransport};
