//! Wire protocol for the SBOX relay.
//!
//! This crate defines the messages the relay exchanges with the
//! coordination server and the game engines:
//!
//! - **Types** ([`Envelope`], [`RegistrationRequest`], [`JoinRoomPayload`],
//!   and the two response payloads) — the records that travel on the wire.
//! - **Classification** ([`ServerMessage`], [`MessageKind`]) — telling a
//!   registration ack apart from an instruction envelope.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how records become text.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer doesn't know about sockets. Bot ↔ engine traffic is
//! never decoded at all; only server and engine control messages pass
//! through here.

mod codec;
mod error;
mod message;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use message::{
    MessageKind, ServerMessage, is_registration_accepted, leave_room_target,
};
pub use types::{
    Envelope, JoinRoomPayload, JoinRoomResponsePayload,
    LeaveRoomResponsePayload, RegistrationRequest,
};
