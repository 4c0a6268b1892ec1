//! Message frames: client → host.
//!
//! Frame layout is `[type u8][payload]`. Payloads use the value codec; a
//! frame that fails to parse is a protocol error and gets its sender
//! evicted by the room.

use crate::marshal::marshal;
use crate::tag::Tag;
use crate::unmarshal::unmarshal_as;
use crate::value::{Dict, Value};
use crate::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Ping = 1,
    Leave = 2,
    RoomProp = 3,
    ClientProp = 4,
    SwitchMaster = 5,
    Kick = 6,
    Broadcast = 7,
    ToMaster = 8,
    ToClients = 9,
}

impl MsgType {
    pub fn from_u8(b: u8) -> Option<MsgType> {
        use MsgType::*;
        Some(match b {
            1 => Ping,
            2 => Leave,
            3 => RoomProp,
            4 => ClientProp,
            5 => SwitchMaster,
            6 => Kick,
            7 => Broadcast,
            8 => ToMaster,
            9 => ToClients,
            _ => return None,
        })
    }
}

/// A parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    Ping { timestamp: u64 },
    Leave { message: String },
    RoomProp(RoomPropPayload),
    /// Marshaled dict of the client's new public props.
    ClientProp { props: Vec<u8> },
    SwitchMaster { target: String },
    Kick { target: String },
    Broadcast { body: Vec<u8> },
    ToMaster { body: Vec<u8> },
    ToClients { targets: Vec<String>, body: Vec<u8> },
}

/// Requested room property changes, applied atomically by the room loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomPropPayload {
    pub visible: bool,
    pub joinable: bool,
    pub watchable: bool,
    pub search_group: u32,
    pub max_players: u32,
    pub client_deadline: u32,
    /// Marshaled dict merged into the room's public props.
    pub public_props: Vec<u8>,
    /// Marshaled dict merged into the room's private props.
    pub private_props: Vec<u8>,
}

impl RoomPropPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut d = Dict::new();
        d.insert("visible", marshal(&Value::Bool(self.visible)));
        d.insert("joinable", marshal(&Value::Bool(self.joinable)));
        d.insert("watchable", marshal(&Value::Bool(self.watchable)));
        d.insert("search_group", marshal(&Value::UInt(self.search_group)));
        d.insert("max_players", marshal(&Value::UInt(self.max_players)));
        d.insert("client_deadline", marshal(&Value::UInt(self.client_deadline)));
        d.insert("public_props", self.public_props.clone());
        d.insert("private_props", self.private_props.clone());
        marshal(&Value::Dict(d))
    }

    pub fn decode(payload: &[u8]) -> Result<RoomPropPayload, WireError> {
        let (v, _) = unmarshal_as(payload, &[Tag::Dict])?;
        let Value::Dict(d) = v else { unreachable!() };
        Ok(RoomPropPayload {
            visible: get_bool(&d, "visible")?,
            joinable: get_bool(&d, "joinable")?,
            watchable: get_bool(&d, "watchable")?,
            search_group: get_u32(&d, "search_group")?,
            max_players: get_u32(&d, "max_players")?,
            client_deadline: get_u32(&d, "client_deadline")?,
            public_props: get_dict_bytes(&d, "public_props")?,
            private_props: get_dict_bytes(&d, "private_props")?,
        })
    }
}

fn get_bool(d: &Dict, key: &'static str) -> Result<bool, WireError> {
    let raw = d.get(key).ok_or(WireError::Malformed(key))?;
    let (v, _) = unmarshal_as(raw, &[Tag::True, Tag::False])?;
    let Value::Bool(b) = v else { unreachable!() };
    Ok(b)
}

fn get_u32(d: &Dict, key: &'static str) -> Result<u32, WireError> {
    let raw = d.get(key).ok_or(WireError::Malformed(key))?;
    let (v, _) = unmarshal_as(raw, &[Tag::UInt])?;
    let Value::UInt(n) = v else { unreachable!() };
    Ok(n)
}

fn get_dict_bytes(d: &Dict, key: &'static str) -> Result<Vec<u8>, WireError> {
    let raw = d.get(key).ok_or(WireError::Malformed(key))?;
    unmarshal_as(raw, &[Tag::Dict])?;
    Ok(raw.to_vec())
}

impl ClientMsg {
    pub fn encode(&self) -> Vec<u8> {
        let (ty, payload) = match self {
            ClientMsg::Ping { timestamp } => {
                (MsgType::Ping, marshal(&Value::ULong(*timestamp)))
            }
            ClientMsg::Leave { message } => {
                (MsgType::Leave, marshal(&Value::Str8(message.clone())))
            }
            ClientMsg::RoomProp(p) => (MsgType::RoomProp, p.encode()),
            ClientMsg::ClientProp { props } => (MsgType::ClientProp, props.clone()),
            ClientMsg::SwitchMaster { target } => {
                (MsgType::SwitchMaster, marshal(&Value::Str8(target.clone())))
            }
            ClientMsg::Kick { target } => {
                (MsgType::Kick, marshal(&Value::Str8(target.clone())))
            }
            ClientMsg::Broadcast { body } => (MsgType::Broadcast, body.clone()),
            ClientMsg::ToMaster { body } => (MsgType::ToMaster, body.clone()),
            ClientMsg::ToClients { targets, body } => {
                let list = Value::List(
                    targets
                        .iter()
                        .map(|t| marshal(&Value::Str8(t.clone())))
                        .collect(),
                );
                let mut p = marshal(&list);
                p.extend_from_slice(body);
                (MsgType::ToClients, p)
            }
        };
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(ty as u8);
        frame.extend_from_slice(&payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<ClientMsg, WireError> {
        let ty = *frame.first().ok_or(WireError::Truncated)?;
        let ty = MsgType::from_u8(ty).ok_or(WireError::UnknownMessage(ty))?;
        let payload = &frame[1..];
        Ok(match ty {
            MsgType::Ping => {
                let (v, _) = unmarshal_as(payload, &[Tag::ULong])?;
                let Value::ULong(timestamp) = v else { unreachable!() };
                ClientMsg::Ping { timestamp }
            }
            MsgType::Leave => {
                let (v, _) = unmarshal_as(payload, &[Tag::Str8])?;
                let Value::Str8(message) = v else { unreachable!() };
                ClientMsg::Leave { message }
            }
            MsgType::RoomProp => ClientMsg::RoomProp(RoomPropPayload::decode(payload)?),
            MsgType::ClientProp => {
                unmarshal_as(payload, &[Tag::Dict])?;
                ClientMsg::ClientProp {
                    props: payload.to_vec(),
                }
            }
            MsgType::SwitchMaster => {
                let (v, _) = unmarshal_as(payload, &[Tag::Str8])?;
                let Value::Str8(target) = v else { unreachable!() };
                ClientMsg::SwitchMaster { target }
            }
            MsgType::Kick => {
                let (v, _) = unmarshal_as(payload, &[Tag::Str8])?;
                let Value::Str8(target) = v else { unreachable!() };
                ClientMsg::Kick { target }
            }
            MsgType::Broadcast => ClientMsg::Broadcast {
                body: payload.to_vec(),
            },
            MsgType::ToMaster => ClientMsg::ToMaster {
                body: payload.to_vec(),
            },
            MsgType::ToClients => {
                let (v, n) = unmarshal_as(payload, &[Tag::List])?;
                let Value::List(elems) = v else { unreachable!() };
                let mut targets = Vec::with_capacity(elems.len());
                for e in &elems {
                    let (v, _) = unmarshal_as(e, &[Tag::Str8])?;
                    let Value::Str8(id) = v else { unreachable!() };
                    targets.push(id);
                }
                ClientMsg::ToClients {
                    targets,
                    body: payload[n..].to_vec(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: ClientMsg) {
        assert_eq!(ClientMsg::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_msg_roundtrips() {
        roundtrip(ClientMsg::Ping { timestamp: 1234567 });
        roundtrip(ClientMsg::Leave {
            message: "bye".into(),
        });
        roundtrip(ClientMsg::SwitchMaster {
            target: "u2".into(),
        });
        roundtrip(ClientMsg::Kick { target: "u3".into() });
        roundtrip(ClientMsg::Broadcast {
            body: vec![1, 2, 3],
        });
        roundtrip(ClientMsg::ToMaster { body: vec![9] });
        roundtrip(ClientMsg::ToClients {
            targets: vec!["a".into(), "b".into()],
            body: vec![7, 8],
        });
    }

    #[test]
    fn test_room_prop_roundtrip() {
        let props = marshal(&Value::Dict(Dict::new()));
        let msg = ClientMsg::RoomProp(RoomPropPayload {
            visible: true,
            joinable: false,
            watchable: true,
            search_group: 5,
            max_players: 8,
            client_deadline: 30,
            public_props: props.clone(),
            private_props: props,
        });
        roundtrip(msg);
    }

    #[test]
    fn test_client_prop_rejects_non_dict() {
        let mut frame = vec![MsgType::ClientProp as u8];
        frame.extend_from_slice(&marshal(&Value::Byte(1)));
        assert!(ClientMsg::decode(&frame).is_err());
    }

    #[test]
    fn test_unknown_message_type() {
        assert!(matches!(
            ClientMsg::decode(&[200, 0]),
            Err(WireError::UnknownMessage(200))
        ));
    }
}
