//! Per-session player state and grid cells
//!
//! A [`PlayerState`] is created once per session and mutated on every message
//! exchanged for that session. Grid cells refer to players by id only; the
//! player table in [`crate::game::Game`] is the single owner.

use crate::protocol::WireMessage;
use crate::transport::Transport;
use bytes::Bytes;
use log::{debug, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Number of sent datagrams retained per player
pub const SENT_MESSAGE_CAPACITY: usize = 32;

/// A coordinate on the game grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// One grid cell and the id of the player standing on it, if any
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PositionState {
    pub pos: Position,
    pub player: Option<u32>,
}

/// Bounded record of the raw bytes sent under each outgoing message id
///
/// Entries are kept in send order; once full, the oldest entry is evicted.
/// Nothing reads these back yet, they exist so a resend path has the exact
/// bytes available.
#[derive(Debug, Clone)]
pub struct SentMessages {
    entries: VecDeque<(u32, Bytes)>,
    capacity: usize,
}

impl SentMessages {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `bytes` under `message_id`, replacing an existing entry for the
    /// same id in place.
    pub fn insert(&mut self, message_id: u32, bytes: Bytes) {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| *id == message_id) {
            entry.1 = bytes;
            return;
        }

        self.entries.push_back((message_id, bytes));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn get(&self, message_id: u32) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|(id, _)| *id == message_id)
            .map(|(_, bytes)| bytes)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SentMessages {
    fn default() -> Self {
        Self::with_capacity(SENT_MESSAGE_CAPACITY)
    }
}

/// State tracked for one session
#[derive(Debug, Clone)]
pub struct PlayerState {
    /// Session id assigned by the server
    pub id: u32,
    /// Where replies for this player go. Unknown for remote players a client
    /// learns about only by id.
    pub endpoint: Option<SocketAddr>,
    /// Grid cell the player occupies, if placed
    pub position: Option<Position>,
    pub connected_at: Instant,
    pub last_message: Instant,
    /// Id for the next outgoing message
    pub next_message: u32,
    /// Acknowledgments received for this session
    pub ack_count: u32,
    pub sent: SentMessages,
}

impl PlayerState {
    pub fn new(id: u32, endpoint: Option<SocketAddr>, now: Instant) -> Self {
        Self {
            id,
            endpoint,
            position: None,
            connected_at: now,
            last_message: now,
            next_message: 0,
            ack_count: 0,
            sent: SentMessages::default(),
        }
    }

    /// Marks activity from this player
    pub fn touch(&mut self, now: Instant) {
        self.last_message = now;
    }

    /// Hands out the next outgoing message id
    pub fn next_message_id(&mut self) -> u32 {
        let id = self.next_message;
        self.next_message = self.next_message.wrapping_add(1);
        id
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_message) > timeout
    }

    /// Encodes `message`, sends it to `target` and retains the sent bytes
    /// under the message's id. A failed send is logged and not retained.
    pub fn send_tracked<M: WireMessage>(
        &mut self,
        transport: &dyn Transport,
        target: SocketAddr,
        message: &mut M,
    ) -> bool {
        let Some(bytes) = message.to_bytes() else {
            warn!(
                "Failed to encode {:?} message for player {}",
                M::ACTION,
                self.id
            );
            return false;
        };
        let message_id = message.message().message_id;

        match transport.send_to(target, &bytes) {
            Ok(()) => {
                debug!(
                    "Sent {:?} message {} to player {} at {}",
                    M::ACTION,
                    message_id,
                    self.id,
                    target
                );
                self.sent.insert(message_id, bytes);
                true
            }
            Err(e) => {
                warn!(
                    "Failed to send {:?} message to player {} at {}: {}",
                    M::ACTION,
                    self.id,
                    target,
                    e
                );
                false
            }
        }
    }
}
