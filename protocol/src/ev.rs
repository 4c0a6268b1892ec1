//! Event frames: host → client.
//!
//! Frame layout is `[type u8][seq u32 BE, regular events only][payload]`.
//! Regular events (type >= 30) carry a room-scoped sequence number and are
//! kept in the room's history buffer for replay; system events are not.

use crate::marshal::marshal;
use crate::tag::Tag;
use crate::unmarshal::{unmarshal, unmarshal_as};
use crate::value::Value;
use crate::WireError;

/// First regular event type. Everything below is a system event.
pub const REGULAR_EV_BASE: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EvType {
    PeerReady = 1,
    Pong = 2,
    Joined = 30,
    Left = 31,
    RoomProp = 32,
    ClientProp = 33,
    MasterSwitched = 34,
    Message = 35,
    Rejoined = 36,
    Closed = 37,
}

impl EvType {
    pub fn from_u8(b: u8) -> Option<EvType> {
        use EvType::*;
        Some(match b {
            1 => PeerReady,
            2 => Pong,
            30 => Joined,
            31 => Left,
            32 => RoomProp,
            33 => ClientProp,
            34 => MasterSwitched,
            35 => Message,
            36 => Rejoined,
            37 => Closed,
            _ => return None,
        })
    }

    pub fn is_regular(self) -> bool {
        self as u8 >= REGULAR_EV_BASE
    }
}

/// One event frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub ty: EvType,
    /// Present iff the event is regular.
    pub seq: Option<u32>,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn regular(ty: EvType, seq: u32, payload: Vec<u8>) -> Event {
        debug_assert!(ty.is_regular());
        Event {
            ty,
            seq: Some(seq),
            payload,
        }
    }

    pub fn system(ty: EvType, payload: Vec<u8>) -> Event {
        debug_assert!(!ty.is_regular());
        Event {
            ty,
            seq: None,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.payload.len());
        buf.push(self.ty as u8);
        if let Some(seq) = self.seq {
            buf.extend_from_slice(&seq.to_be_bytes());
        }
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Event, WireError> {
        let ty = *frame.first().ok_or(WireError::Truncated)?;
        let ty = EvType::from_u8(ty).ok_or(WireError::UnknownEvent(ty))?;
        if !ty.is_regular() {
            return Ok(Event::system(ty, frame[1..].to_vec()));
        }
        if frame.len() < 5 {
            return Err(WireError::Truncated);
        }
        let seq = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        Ok(Event::regular(ty, seq, frame[5..].to_vec()))
    }
}

// Payload builders. Client ids ride as Str8, property dicts as raw
// marshaled bytes.

pub fn peer_ready(last_seq: u32) -> Vec<u8> {
    marshal(&Value::UInt(last_seq))
}

pub fn pong(ping_time: u64, server_time: u64, watchers: u32) -> Vec<u8> {
    let mut p = marshal(&Value::ULong(ping_time));
    p.extend_from_slice(&marshal(&Value::ULong(server_time)));
    p.extend_from_slice(&marshal(&Value::UInt(watchers)));
    p
}

pub fn joined(client_id: &str, props: &[u8]) -> Vec<u8> {
    let mut p = marshal(&Value::Str8(client_id.to_string()));
    p.extend_from_slice(props);
    p
}

pub fn left(client_id: &str, cause: &str) -> Vec<u8> {
    let mut p = marshal(&Value::Str8(client_id.to_string()));
    p.extend_from_slice(&marshal(&Value::Str8(cause.to_string())));
    p
}

pub fn master_switched(new_master: &str) -> Vec<u8> {
    marshal(&Value::Str8(new_master.to_string()))
}

pub fn message(sender: &str, body: &[u8]) -> Vec<u8> {
    let mut p = marshal(&Value::Str8(sender.to_string()));
    p.extend_from_slice(body);
    p
}

pub fn client_prop(client_id: &str, props: &[u8]) -> Vec<u8> {
    let mut p = marshal(&Value::Str8(client_id.to_string()));
    p.extend_from_slice(props);
    p
}

pub fn closed(message: &str) -> Vec<u8> {
    marshal(&Value::Str8(message.to_string()))
}

// Payload parsers, used by tests and client tooling.

fn split_str8(payload: &[u8]) -> Result<(String, &[u8]), WireError> {
    let (v, n) = unmarshal_as(payload, &[Tag::Str8])?;
    let Value::Str8(s) = v else { unreachable!() };
    Ok((s, &payload[n..]))
}

pub fn parse_joined(payload: &[u8]) -> Result<(String, Vec<u8>), WireError> {
    let (id, rest) = split_str8(payload)?;
    Ok((id, rest.to_vec()))
}

pub fn parse_left(payload: &[u8]) -> Result<(String, String), WireError> {
    let (id, rest) = split_str8(payload)?;
    let (cause, _) = split_str8(rest)?;
    Ok((id, cause))
}

pub fn parse_master_switched(payload: &[u8]) -> Result<String, WireError> {
    Ok(split_str8(payload)?.0)
}

pub fn parse_message(payload: &[u8]) -> Result<(String, Vec<u8>), WireError> {
    let (sender, rest) = split_str8(payload)?;
    Ok((sender, rest.to_vec()))
}

pub fn parse_pong(payload: &[u8]) -> Result<(u64, u64, u32), WireError> {
    let (v, n) = unmarshal_as(payload, &[Tag::ULong])?;
    let Value::ULong(ping) = v else { unreachable!() };
    let rest = &payload[n..];
    let (v, n) = unmarshal_as(rest, &[Tag::ULong])?;
    let Value::ULong(server) = v else { unreachable!() };
    let (v, _) = unmarshal_as(&rest[n..], &[Tag::UInt])?;
    let Value::UInt(watchers) = v else { unreachable!() };
    Ok((ping, server, watchers))
}

pub fn parse_peer_ready(payload: &[u8]) -> Result<u32, WireError> {
    let (v, _) = unmarshal(payload)?;
    match v {
        Value::UInt(seq) => Ok(seq),
        _ => Err(WireError::Malformed("peer_ready expects a uint seq")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_event_frame_carries_seq() {
        let ev = Event::regular(EvType::Message, 42, message("alice", b"hi"));
        let frame = ev.encode();
        assert_eq!(frame[0], EvType::Message as u8);
        assert_eq!(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]), 42);
        assert_eq!(Event::decode(&frame).unwrap(), ev);
    }

    #[test]
    fn test_system_event_frame_has_no_seq() {
        let ev = Event::system(EvType::PeerReady, peer_ready(7));
        let frame = ev.encode();
        let back = Event::decode(&frame).unwrap();
        assert_eq!(back.seq, None);
        assert_eq!(parse_peer_ready(&back.payload).unwrap(), 7);
    }

    #[test]
    fn test_left_payload_roundtrip() {
        let p = left("bob", "timeout");
        assert_eq!(parse_left(&p).unwrap(), ("bob".into(), "timeout".into()));
    }

    #[test]
    fn test_pong_payload_roundtrip() {
        let p = pong(123, 456, 2);
        assert_eq!(parse_pong(&p).unwrap(), (123, 456, 2));
    }

    #[test]
    fn test_decode_unknown_event() {
        assert!(matches!(
            Event::decode(&[99, 0, 0, 0, 0]),
            Err(WireError::UnknownEvent(99))
        ));
    }
}
