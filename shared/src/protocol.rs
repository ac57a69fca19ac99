//! Fixed-layout binary wire protocol
//!
//! Every frame is laid out as:
//!
//! ```text
//! magic[2] | hash:u64 | payloadSize:u32 | action:u32 | messageId:u32 | payload...
//! ```
//!
//! All integers are big-endian and no padding is inserted between fields.
//! The hash is a 64-bit FNV-1a digest over every byte that follows the
//! header, and `payloadSize` is the count of those bytes. Because the header
//! depends on the body, frames are always written tail-first: the kind
//! specific payload, then the action and message id, and finally the header.
//!
//! Message bodies are laid out by serde derives pushed through `bincode`
//! configured for fixed-width big-endian integers, so the field order of each
//! struct *is* the wire order. The header is written by hand once the body
//! bytes exist.

use bincode::Options;
use bytes::{Buf, BufMut, Bytes};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Leading bytes of every frame
pub const MAGIC: [u8; 2] = [0xBE, 0xEF];

/// Standard 1500 byte MTU minus the 20 byte IP header and 8 byte UDP header
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// magic(2) + hash(8) + payload size(4)
pub const HEADER_SIZE: usize = 14;

/// action(4) + message id(4)
pub const MESSAGE_BODY_SIZE: usize = 8;

/// Size of a bare [`Message`] frame
pub const MESSAGE_SIZE: usize = HEADER_SIZE + MESSAGE_BODY_SIZE;

/// Session id carried by a login request that has not been assigned one yet
pub const INVALID_SESSION: u32 = u32::MAX;

/// Player id that never refers to a registered player
pub const INVALID_PLAYER: u32 = u32::MAX;

const FNV1A_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
const FNV1A_PRIME: u64 = 1_099_511_628_211;

/// 64-bit FNV-1a digest
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV1A_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV1A_PRIME)
    })
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .allow_trailing_bytes()
}

/// Message kind carried in every frame after the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    None,
    Acknowledge,
    Login,
    Ping,
}

/// Reasons a received frame is rejected
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad magic bytes {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("header hash is zero")]
    ZeroHash,

    #[error("header payload size is zero")]
    EmptyPayload,

    #[error("payload size {0} exceeds the maximum datagram size")]
    PayloadTooLarge(u32),

    #[error("payload size {claimed} exceeds the {available} bytes received")]
    PayloadOverrun { claimed: u32, available: usize },

    #[error("hash mismatch: header says {expected:#018x}, payload hashes to {actual:#018x}")]
    HashMismatch { expected: u64, actual: u64 },

    #[error("expected a {expected:?} message, found {found:?}")]
    WrongAction { expected: Action, found: Action },

    #[error("malformed message body: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Frame header, always the first [`HEADER_SIZE`] bytes of a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub magic: [u8; 2],
    pub hash: u64,
    pub payload_size: u32,
}

/// Reads and validates the header at the start of `bytes`.
///
/// Only the header itself is checked here; bounds and hash verification
/// against the rest of the frame happen in [`Message::decode_frame`].
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let mut reader = &bytes[..HEADER_SIZE];
    let magic = [reader.get_u8(), reader.get_u8()];
    let hash = reader.get_u64();
    let payload_size = reader.get_u32();

    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    if hash == 0 {
        return Err(DecodeError::ZeroHash);
    }
    if payload_size == 0 {
        return Err(DecodeError::EmptyPayload);
    }

    Ok(MessageHeader {
        magic,
        hash,
        payload_size,
    })
}

/// Writes the header describing `payload` into the first [`HEADER_SIZE`]
/// bytes of `out` and returns it. `out` must hold at least a header.
pub fn seal_header(out: &mut [u8], payload: &[u8]) -> MessageHeader {
    let header = MessageHeader {
        magic: MAGIC,
        hash: fnv1a_64(payload),
        payload_size: payload.len() as u32,
    };

    let mut writer: &mut [u8] = &mut out[..HEADER_SIZE];
    writer.put_slice(&header.magic);
    writer.put_u64(header.hash);
    writer.put_u32(header.payload_size);

    header
}

/// Base shape shared by every message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip)]
    pub header: MessageHeader,
    pub action: Action,
    pub message_id: u32,
}

impl Message {
    pub fn new(action: Action, message_id: u32) -> Self {
        Self {
            header: MessageHeader::default(),
            action,
            message_id,
        }
    }

    /// Validates a whole frame and splits it into the base message and the
    /// kind specific payload that follows it.
    ///
    /// The returned payload is bounded by the header's payload size, so any
    /// trailing bytes in the datagram are ignored.
    pub fn decode_frame(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let header = decode_header(bytes)?;
        let claimed = header.payload_size as usize;

        if claimed > MAX_DATAGRAM_SIZE - HEADER_SIZE {
            return Err(DecodeError::PayloadTooLarge(header.payload_size));
        }

        let available = bytes.len() - HEADER_SIZE;
        if claimed > available {
            return Err(DecodeError::PayloadOverrun {
                claimed: header.payload_size,
                available,
            });
        }

        let body = &bytes[HEADER_SIZE..HEADER_SIZE + claimed];
        let actual = fnv1a_64(body);
        if actual != header.hash {
            return Err(DecodeError::HashMismatch {
                expected: header.hash,
                actual,
            });
        }

        if body.len() < MESSAGE_BODY_SIZE {
            return Err(DecodeError::Truncated {
                needed: MESSAGE_SIZE,
                available: HEADER_SIZE + body.len(),
            });
        }

        let (base, payload) = body.split_at(MESSAGE_BODY_SIZE);
        let mut message: Message = wire_options().deserialize(base)?;
        message.header = header;

        Ok((message, payload))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_frame(bytes).map(|(message, _)| message)
    }

    /// Encodes a bare message, stamping the header into `self`.
    /// Returns 0 when `out` is too small.
    pub fn encode(&mut self, out: &mut [u8]) -> usize {
        if out.len() < MESSAGE_SIZE {
            return 0;
        }

        let (head, body) = out[..MESSAGE_SIZE].split_at_mut(HEADER_SIZE);
        if wire_options().serialize_into(&mut *body, &*self).is_err() {
            return 0;
        }
        self.header = seal_header(head, body);

        MESSAGE_SIZE
    }
}

/// A message kind with a fixed payload after the base [`Message`].
///
/// Implementors only describe their layout; encoding and decoding are shared.
/// The serde representation of an implementor must cover exactly its payload
/// fields (the embedded [`Message`] is skipped).
pub trait WireMessage: Serialize + DeserializeOwned {
    const ACTION: Action;

    /// Exact encoded size, header included
    const SIZE: usize;

    fn message(&self) -> &Message;

    fn message_mut(&mut self) -> &mut Message;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (message, payload) = Message::decode_frame(bytes)?;

        if message.action != Self::ACTION {
            return Err(DecodeError::WrongAction {
                expected: Self::ACTION,
                found: message.action,
            });
        }

        if payload.len() < Self::SIZE - MESSAGE_SIZE {
            return Err(DecodeError::Truncated {
                needed: Self::SIZE,
                available: MESSAGE_SIZE + payload.len(),
            });
        }

        let mut decoded: Self = wire_options().deserialize(payload)?;
        *decoded.message_mut() = message;

        Ok(decoded)
    }

    /// Encodes into `out` and stamps the resulting header into the message.
    ///
    /// Returns the number of bytes written, or 0 (nothing written) when `out`
    /// is smaller than [`Self::SIZE`].
    fn encode(&mut self, out: &mut [u8]) -> usize {
        if out.len() < Self::SIZE {
            return 0;
        }

        let (head, body) = out[..Self::SIZE].split_at_mut(HEADER_SIZE);
        let (base, payload) = body.split_at_mut(MESSAGE_BODY_SIZE);

        if wire_options().serialize_into(payload, &*self).is_err() {
            return 0;
        }

        self.message_mut().action = Self::ACTION;
        if wire_options().serialize_into(base, self.message()).is_err() {
            return 0;
        }

        let header = seal_header(head, body);
        self.message_mut().header = header;

        Self::SIZE
    }

    /// Encodes into a freshly allocated buffer of exactly [`Self::SIZE`] bytes
    fn to_bytes(&mut self) -> Option<Bytes> {
        let mut buffer = vec![0u8; Self::SIZE];
        match self.encode(&mut buffer) {
            0 => None,
            written => {
                buffer.truncate(written);
                Some(Bytes::from(buffer))
            }
        }
    }
}

/// Starts a session. Sent by a client with [`INVALID_SESSION`] and echoed
/// back by the server with the assigned session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginMessage {
    #[serde(skip)]
    pub message: Message,
    pub session: u32,
    /// Return address of the client
    pub address: Ipv4Addr,
    pub port: u16,
}

impl LoginMessage {
    pub fn new(session: u32, address: Ipv4Addr, port: u16) -> Self {
        Self {
            message: Message::new(Action::Login, 0),
            session,
            address,
            port,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session != INVALID_SESSION
    }
}

impl Default for LoginMessage {
    fn default() -> Self {
        Self::new(INVALID_SESSION, Ipv4Addr::UNSPECIFIED, 0)
    }
}

impl WireMessage for LoginMessage {
    const ACTION: Action = Action::Login;
    const SIZE: usize = MESSAGE_SIZE + 10;

    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

/// Keep-alive carrying the last message id the sender saw acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    #[serde(skip)]
    pub message: Message,
    pub player_id: u32,
    pub last_ack_id: u64,
}

impl PingMessage {
    pub fn new(player_id: u32, last_ack_id: u64) -> Self {
        Self {
            message: Message::new(Action::Ping, 0),
            player_id,
            last_ack_id,
        }
    }
}

impl Default for PingMessage {
    fn default() -> Self {
        Self::new(INVALID_PLAYER, 0)
    }
}

impl WireMessage for PingMessage {
    const ACTION: Action = Action::Ping;
    const SIZE: usize = MESSAGE_SIZE + 12;

    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeMessage {
    #[serde(skip)]
    pub message: Message,
    pub acked_message_id: u64,
}

impl AcknowledgeMessage {
    pub fn new(acked_message_id: u64) -> Self {
        Self {
            message: Message::new(Action::Acknowledge, 0),
            acked_message_id,
        }
    }
}

impl Default for AcknowledgeMessage {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WireMessage for AcknowledgeMessage {
    const ACTION: Action = Action::Acknowledge;
    const SIZE: usize = MESSAGE_SIZE + 8;

    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}
