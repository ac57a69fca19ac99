//! Pre-flight codec checks run once before serving traffic

use crate::protocol::{
    AcknowledgeMessage, Action, DecodeError, LoginMessage, Message, PingMessage, WireMessage,
    INVALID_PLAYER, INVALID_SESSION, MESSAGE_SIZE,
};
use log::info;
use std::fmt::Debug;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelfTestError {
    #[error("{0} message did not encode")]
    Encode(&'static str),

    #[error("{kind} message did not decode: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: DecodeError,
    },

    #[error("{0} message changed across a round trip")]
    Mismatch(&'static str),

    #[error("{0} frame was accepted after being corrupted")]
    AcceptedCorrupt(&'static str),
}

fn check_kind<M>(kind: &'static str, mut message: M) -> Result<(), SelfTestError>
where
    M: WireMessage + PartialEq + Debug,
{
    let bytes = message.to_bytes().ok_or(SelfTestError::Encode(kind))?;
    let decoded = M::decode(&bytes).map_err(|source| SelfTestError::Decode { kind, source })?;
    if decoded != message {
        return Err(SelfTestError::Mismatch(kind));
    }

    let mut corrupted = bytes.to_vec();
    if let Some(last) = corrupted.last_mut() {
        *last ^= 0x5A;
    }
    if M::decode(&corrupted).is_ok() {
        return Err(SelfTestError::AcceptedCorrupt(kind));
    }

    if M::decode(&bytes[..M::SIZE - 1]).is_ok() {
        return Err(SelfTestError::AcceptedCorrupt(kind));
    }

    Ok(())
}

fn check_base() -> Result<(), SelfTestError> {
    let mut message = Message::new(Action::Acknowledge, 1);
    let mut buffer = [0u8; MESSAGE_SIZE];
    if message.encode(&mut buffer) != MESSAGE_SIZE {
        return Err(SelfTestError::Encode("base"));
    }

    let decoded = Message::decode(&buffer).map_err(|source| SelfTestError::Decode {
        kind: "base",
        source,
    })?;
    if decoded != message {
        return Err(SelfTestError::Mismatch("base"));
    }

    buffer[0] = !buffer[0];
    if Message::decode(&buffer).is_ok() {
        return Err(SelfTestError::AcceptedCorrupt("base"));
    }

    Ok(())
}

/// Round-trips every message kind and checks corrupted frames are refused.
/// Touches no game state.
pub fn run_all() -> Result<(), SelfTestError> {
    check_base()?;
    check_kind(
        "login",
        LoginMessage::new(INVALID_SESSION, Ipv4Addr::LOCALHOST, 40000),
    )?;
    check_kind("login", LoginMessage::new(1, Ipv4Addr::new(10, 0, 0, 1), 1))?;
    check_kind("ping", PingMessage::new(INVALID_PLAYER, u64::MAX))?;
    check_kind("ping", PingMessage::new(1, 0))?;
    check_kind("acknowledge", AcknowledgeMessage::new(0))?;
    check_kind("acknowledge", AcknowledgeMessage::new(u64::MAX))?;

    info!("Codec self-test passed");
    Ok(())
}
