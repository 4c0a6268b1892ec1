//! Wire protocol for roomnet.
//!
//! Two layers live here:
//!
//! - the **value codec**: a self-describing, tagged, big-endian binary
//!   encoding used for room/client properties, message payloads, and
//!   property queries ([`marshal`], [`unmarshal`], [`Value`], [`Dict`]);
//! - the **room wire**: event frames sent from a host to its peers
//!   ([`Event`], [`EvType`]) and message frames sent from a client to the
//!   room ([`ClientMsg`], [`MsgType`]).
//!
//! The codec is laid out so that raw byte comparison of two marshaled
//! values of the same tag equals numeric comparison — the lobby's property
//! queries rely on this.

pub mod ev;
pub mod msg;
pub mod recursive;
mod marshal;
mod tag;
mod unmarshal;
mod value;

pub use ev::{EvType, Event};
pub use marshal::marshal;
pub use msg::{ClientMsg, MsgType, RoomPropPayload};
pub use recursive::{unmarshal_recursive, RawValue};
pub use tag::Tag;
pub use unmarshal::{unmarshal, unmarshal_as, CodecError};
pub use value::{Dict, Obj, Value};

use thiserror::Error;

/// Errors produced while framing or parsing room events and messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short")]
    Truncated,
    #[error("unknown event type: {0}")]
    UnknownEvent(u8),
    #[error("unknown message type: {0}")]
    UnknownMessage(u8),
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
