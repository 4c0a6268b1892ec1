//! Room-owned client state.
//!
//! A `Client` is what the room loop knows about one participant: its
//! public props, liveness stamp, and the bounded queue feeding its peer's
//! websocket writer. The queue is the backpressure boundary — a peer that
//! cannot drain it fast enough gets evicted instead of stalling the room.

use std::time::Instant;

use tokio::sync::mpsc;

use roomnet_common::model::{ClientId, ClientInfo};
use roomnet_protocol::{marshal, unmarshal_as, Dict, Tag, Value};

/// Outcome of pushing a frame at a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No peer attached right now; the frame is dropped (replay covers it).
    NoPeer,
    /// The peer queue is full; the client must be evicted.
    Overflow,
}

pub struct Client {
    pub id: ClientId,
    /// Marshaled dict of public props.
    pub props: Vec<u8>,
    pub last_msg: Instant,
    /// Join order within the room; master succession picks the minimum.
    pub join_order: u64,
    pub evicted: bool,
    peer: Option<mpsc::Sender<Vec<u8>>>,
}

impl Client {
    pub fn new(info: &ClientInfo, join_order: u64) -> Client {
        Client {
            id: info.id.clone(),
            props: info.props.clone(),
            last_msg: Instant::now(),
            join_order,
            evicted: false,
            peer: None,
        }
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            props: self.props.clone(),
        }
    }

    pub fn attach_peer(&mut self, peer: mpsc::Sender<Vec<u8>>) {
        self.peer = Some(peer);
        self.last_msg = Instant::now();
    }

    pub fn detach_peer(&mut self) {
        self.peer = None;
    }

    /// Non-blocking push toward the peer. Never stalls the room loop.
    pub fn send(&mut self, frame: Vec<u8>) -> SendOutcome {
        let Some(peer) = &self.peer else {
            return SendOutcome::NoPeer;
        };
        match peer.try_send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Overflow,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Transport died without a detach; the tick will time the
                // client out unless it reattaches.
                self.peer = None;
                SendOutcome::NoPeer
            }
        }
    }

    /// Merge a marshaled dict of prop updates into the stored props.
    pub fn merge_props(&mut self, update: &[u8]) {
        let Ok((Value::Dict(update), _)) = unmarshal_as(update, &[Tag::Dict]) else {
            return;
        };
        let mut props = match unmarshal_as(&self.props, &[Tag::Dict]) {
            Ok((Value::Dict(d), _)) => d,
            _ => Dict::new(),
        };
        props.merge(&update);
        self.props = marshal(&Value::Dict(props));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> ClientInfo {
        ClientInfo {
            id: id.into(),
            props: marshal(&Value::Dict(Dict::new())),
        }
    }

    #[test]
    fn test_send_without_peer_drops() {
        let mut c = Client::new(&info("u1"), 1);
        assert_eq!(c.send(vec![1]), SendOutcome::NoPeer);
    }

    #[test]
    fn test_send_overflow_detected() {
        let mut c = Client::new(&info("u1"), 1);
        let (tx, mut rx) = mpsc::channel(1);
        c.attach_peer(tx);
        assert_eq!(c.send(vec![1]), SendOutcome::Sent);
        assert_eq!(c.send(vec![2]), SendOutcome::Overflow);
        assert_eq!(rx.try_recv().unwrap(), vec![1]);
    }

    #[test]
    fn test_send_to_closed_peer_detaches() {
        let mut c = Client::new(&info("u1"), 1);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        c.attach_peer(tx);
        assert_eq!(c.send(vec![1]), SendOutcome::NoPeer);
        assert_eq!(c.send(vec![2]), SendOutcome::NoPeer);
    }

    #[test]
    fn test_merge_props() {
        let mut c = Client::new(&info("u1"), 1);
        let mut update = Dict::new();
        update.insert("rank", marshal(&Value::Int(3)));
        c.merge_props(&marshal(&Value::Dict(update)));

        let Ok((Value::Dict(d), _)) = unmarshal_as(&c.props, &[Tag::Dict]) else {
            panic!("props must stay a dict");
        };
        assert_eq!(d.get("rank"), Some(marshal(&Value::Int(3)).as_slice()));
    }
}
