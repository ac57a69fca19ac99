//! # Session Server Library
//!
//! This library provides the authoritative server role of the UDP session
//! protocol. It assigns session ids to clients that log in, acknowledges
//! their keep-alive pings, and keeps track of which sessions have gone quiet.
//!
//! ## Core Responsibilities
//!
//! ### Session Assignment
//! Each distinct client endpoint gets exactly one session. A client that
//! repeats its login (because a reply was lost, for instance) is handed the
//! session it already has rather than a new one. Once the configured player
//! limit is reached, logins from new endpoints are dropped.
//!
//! ### Keep-Alive Acknowledgment
//! Pings naming a known session refresh its activity time and are answered
//! with an acknowledgment echoing the ping's last acknowledged id. Pings with
//! the invalid player id or an unknown id are dropped without a reply.
//!
//! ### Stale Session Reporting
//! Sessions silent for longer than the player timeout are logged once when
//! they go quiet and again if they come back. They are never evicted.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick Loop
//! All session state lives in one `shared::game::Game` owned by the loop
//! task. Datagrams are decoded and queued as they arrive, then handled in
//! arrival order at the next tick, so handlers never race each other.
//!
//! ### Best-Effort UDP
//! Malformed frames, conflicting logins and unknown sessions are all
//! handled the same way: a log line, and no reply. Clients rely on their
//! own resend cadence to recover.
//!
//! ## Module Organization
//!
//! ### Driver Module (`driver`)
//! The server's implementation of `shared::session::SessionDriver`:
//! - Login handling and session creation
//! - Ping acknowledgment
//! - Periodic stale session and status reporting

pub mod driver;

pub use driver::ServerDriver;
