//! The per-room event loop.
//!
//! A room is a single-writer automaton: one tokio task owns the room's
//! state and consumes a bounded channel of [`Msg`]s. Nothing outside the
//! loop ever touches the state; callers that need an answer pass a oneshot
//! reply channel. Regular events take the next room sequence number, go
//! into the bounded history ring for replay, and are pushed at each
//! recipient's peer queue without ever blocking the loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use roomnet_common::model::{ClientId, ClientInfo, RoomId, RoomInfo};
use roomnet_common::rpc::RpcCode;
use roomnet_common::time::now_unix_millis;
use roomnet_protocol::ev;
use roomnet_protocol::msg::{ClientMsg, RoomPropPayload};
use roomnet_protocol::{marshal, unmarshal_as, Dict, EvType, Event, Tag, Value};

use crate::client::{Client, SendOutcome};
use crate::repository::Repository;

/// Snapshot returned to a successful join/watch.
#[derive(Debug, Clone)]
pub struct JoinedInfo {
    pub room: RoomInfo,
    pub players: Vec<ClientInfo>,
    pub master_id: ClientId,
    pub deadline: Duration,
}

pub type JoinReply = oneshot::Sender<Result<JoinedInfo, RpcCode>>;

/// Why a peer attach was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    UnknownClient,
    /// The requested replay start fell below the history floor; the
    /// session must be reset with a fresh join.
    SeqGap,
}

/// Everything the outside world can ask of a room.
pub enum Msg {
    Join {
        info: ClientInfo,
        reply: JoinReply,
    },
    Watch {
        info: ClientInfo,
        reply: JoinReply,
    },
    Leave {
        client: ClientId,
        cause: String,
    },
    Broadcast {
        sender: ClientId,
        body: Vec<u8>,
    },
    ToMaster {
        sender: ClientId,
        body: Vec<u8>,
    },
    ToClients {
        sender: ClientId,
        targets: Vec<ClientId>,
        body: Vec<u8>,
    },
    RoomProp {
        sender: ClientId,
        payload: RoomPropPayload,
    },
    ClientProp {
        sender: ClientId,
        props: Vec<u8>,
    },
    SwitchMaster {
        sender: ClientId,
        target: ClientId,
    },
    Kick {
        sender: ClientId,
        target: ClientId,
    },
    Ping {
        sender: ClientId,
        timestamp: u64,
    },
    AttachPeer {
        client: ClientId,
        last_seq: u32,
        peer_tx: mpsc::Sender<Vec<u8>>,
        reply: oneshot::Sender<Result<(), AttachError>>,
    },
    DetachPeer {
        client: ClientId,
    },
    ClientError {
        client: ClientId,
        cause: String,
    },
}

impl Msg {
    /// Map a parsed wire message onto a room msg.
    pub fn from_client(sender: ClientId, msg: ClientMsg) -> Msg {
        match msg {
            ClientMsg::Ping { timestamp } => Msg::Ping { sender, timestamp },
            ClientMsg::Leave { message } => Msg::Leave {
                client: sender,
                cause: if message.is_empty() {
                    "leave".to_string()
                } else {
                    message
                },
            },
            ClientMsg::RoomProp(payload) => Msg::RoomProp { sender, payload },
            ClientMsg::ClientProp { props } => Msg::ClientProp { sender, props },
            ClientMsg::SwitchMaster { target } => Msg::SwitchMaster { sender, target },
            ClientMsg::Kick { target } => Msg::Kick { sender, target },
            ClientMsg::Broadcast { body } => Msg::Broadcast { sender, body },
            ClientMsg::ToMaster { body } => Msg::ToMaster { sender, body },
            ClientMsg::ToClients { targets, body } => Msg::ToClients {
                sender,
                targets,
                body,
            },
        }
    }
}

/// Handle to a live room: the id, the room key tokens are issued against,
/// and the loop's message channel.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: RoomId,
    pub key: String,
    msg_tx: mpsc::Sender<Msg>,
}

impl RoomHandle {
    /// Queue a msg for the loop, waiting if the channel is full. Fails
    /// only when the room has shut down.
    pub async fn send(&self, msg: Msg) -> Result<(), ()> {
        self.msg_tx.send(msg).await.map_err(|_| ())
    }

    pub fn sender(&self) -> mpsc::Sender<Msg> {
        self.msg_tx.clone()
    }
}

pub(crate) struct RoomParams {
    pub history_limit: usize,
    pub queue_len: usize,
}

/// Which recipients a stored event was fanned to; replay honors the same
/// targeting so a reconnect never sees events that were not addressed to
/// it.
enum Target {
    All,
    Clients(Vec<ClientId>),
}

impl Target {
    fn includes(&self, id: &str) -> bool {
        match self {
            Target::All => true,
            Target::Clients(ids) => ids.iter().any(|c| c == id),
        }
    }
}

struct HistoryEntry {
    event: Event,
    target: Target,
}

struct Room {
    repo: Arc<Repository>,
    info: RoomInfo,
    deadline: Duration,
    clients: HashMap<ClientId, Client>,
    watchers: HashMap<ClientId, Client>,
    master: ClientId,
    seq: u32,
    history: VecDeque<HistoryEntry>,
    params: RoomParams,
    next_join_order: u64,
    msg_rx: mpsc::Receiver<Msg>,
    closing: bool,
}

/// Spawn the room loop with the creating master's join already queued.
/// The returned receiver yields the master's [`JoinedInfo`].
pub(crate) fn spawn_room(
    repo: Arc<Repository>,
    mut info: RoomInfo,
    key: String,
    deadline: Duration,
    params: RoomParams,
    master: ClientInfo,
) -> (
    RoomHandle,
    oneshot::Receiver<Result<JoinedInfo, RpcCode>>,
) {
    let (msg_tx, msg_rx) = mpsc::channel(params.queue_len.max(8));
    let (reply_tx, reply_rx) = oneshot::channel();

    // The loop recounts players as clients join.
    info.players = 0;
    let room_id = info.id.clone();

    let room = Room {
        repo,
        info,
        deadline,
        clients: HashMap::new(),
        watchers: HashMap::new(),
        master: String::new(),
        seq: 0,
        history: VecDeque::new(),
        params,
        next_join_order: 0,
        msg_rx,
        closing: false,
    };

    // Queued before the loop starts, so the master is always join #1.
    msg_tx
        .try_send(Msg::Join {
            info: master,
            reply: reply_tx,
        })
        .ok()
        .expect("fresh room channel");

    tokio::spawn(room.run());

    (
        RoomHandle {
            room_id,
            key,
            msg_tx,
        },
        reply_rx,
    )
}

impl Room {
    async fn run(mut self) {
        tracing::info!(room = %self.info.id, "room started");
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !self.closing {
            tokio::select! {
                maybe = self.msg_rx.recv() => match maybe {
                    Some(msg) => self.dispatch(msg),
                    None => break,
                },
                _ = tick.tick() => self.handle_tick(),
            }
        }

        self.shutdown().await;
    }

    /// One handler turn. A panic in a handler is contained here and takes
    /// the room down in an orderly way instead of poisoning the process.
    fn dispatch(&mut self, msg: Msg) {
        let caught =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.handle(msg)));
        if caught.is_err() {
            tracing::error!(room = %self.info.id, "room handler panicked, shutting down");
            self.closing = true;
        }
    }

    fn handle(&mut self, msg: Msg) {
        self.stamp_activity(&msg);
        match msg {
            Msg::Join { info, reply } => self.handle_join(info, reply),
            Msg::Watch { info, reply } => self.handle_watch(info, reply),
            Msg::Leave { client, cause } => self.handle_leave(&client, &cause),
            Msg::Broadcast { sender, body } => self.handle_broadcast(&sender, body),
            Msg::ToMaster { sender, body } => self.handle_to_master(&sender, body),
            Msg::ToClients {
                sender,
                targets,
                body,
            } => self.handle_to_clients(&sender, targets, body),
            Msg::RoomProp { sender, payload } => self.handle_room_prop(&sender, payload),
            Msg::ClientProp { sender, props } => self.handle_client_prop(&sender, props),
            Msg::SwitchMaster { sender, target } => self.handle_switch_master(&sender, target),
            Msg::Kick { sender, target } => self.handle_kick(&sender, target),
            Msg::Ping { sender, timestamp } => self.handle_ping(&sender, timestamp),
            Msg::AttachPeer {
                client,
                last_seq,
                peer_tx,
                reply,
            } => {
                let _ = reply.send(self.handle_attach(&client, last_seq, peer_tx));
            }
            Msg::DetachPeer { client } => {
                if let Some(c) = self.member_mut(&client) {
                    c.detach_peer();
                }
            }
            Msg::ClientError { client, cause } => self.handle_leave(&client, &cause),
        }
    }

    fn stamp_activity(&mut self, msg: &Msg) {
        let sender = match msg {
            Msg::Leave { client, .. } => client,
            Msg::Broadcast { sender, .. }
            | Msg::ToMaster { sender, .. }
            | Msg::ToClients { sender, .. }
            | Msg::RoomProp { sender, .. }
            | Msg::ClientProp { sender, .. }
            | Msg::SwitchMaster { sender, .. }
            | Msg::Kick { sender, .. }
            | Msg::Ping { sender, .. } => sender,
            _ => return,
        };
        let sender = sender.clone();
        if let Some(c) = self.member_mut(&sender) {
            c.last_msg = Instant::now();
        }
    }

    fn member_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients
            .get_mut(id)
            .or_else(|| self.watchers.get_mut(id))
    }

    // ------------------------------------------------------------------
    // Join / watch / leave
    // ------------------------------------------------------------------

    fn handle_join(&mut self, info: ClientInfo, reply: JoinReply) {
        let creating = self.clients.is_empty() && self.next_join_order == 0;
        if !creating && !self.info.joinable {
            let _ = reply.send(Err(RpcCode::FailedPrecondition));
            return;
        }
        if self.clients.len() as u32 >= self.info.max_players {
            let _ = reply.send(Err(RpcCode::ResourceExhausted));
            return;
        }
        if self.clients.contains_key(&info.id) {
            let _ = reply.send(Err(RpcCode::AlreadyExists));
            return;
        }

        let order = self.next_join_order;
        self.next_join_order += 1;
        let client = Client::new(&info, order);
        if creating {
            self.master = info.id.clone();
        }
        self.clients.insert(info.id.clone(), client);
        self.info.players = self.clients.len() as u32;

        self.emit(
            EvType::Joined,
            ev::joined(&info.id, &info.props),
            Target::All,
        );

        tracing::info!(room = %self.info.id, client = %info.id, players = self.info.players, "client joined");
        let _ = reply.send(Ok(self.joined_info()));
        self.repo.schedule_room_update(self.info.clone());
    }

    fn handle_watch(&mut self, info: ClientInfo, reply: JoinReply) {
        if !self.info.watchable {
            let _ = reply.send(Err(RpcCode::FailedPrecondition));
            return;
        }
        if self.watchers.contains_key(&info.id) {
            let _ = reply.send(Err(RpcCode::AlreadyExists));
            return;
        }

        let order = self.next_join_order;
        self.next_join_order += 1;
        self.watchers.insert(info.id.clone(), Client::new(&info, order));

        tracing::info!(room = %self.info.id, client = %info.id, watchers = self.watchers.len(), "watcher joined");
        let _ = reply.send(Ok(self.joined_info()));
        self.repo
            .schedule_watchers_update(&self.info.id, self.watchers.len() as u32);
    }

    fn handle_leave(&mut self, id: &str, cause: &str) {
        if self.watchers.remove(id).is_some() {
            self.repo.remove_client(id, &self.info.id);
            self.repo
                .schedule_watchers_update(&self.info.id, self.watchers.len() as u32);
            tracing::info!(room = %self.info.id, client = %id, "watcher left");
            return;
        }

        let Some(_) = self.clients.remove(id) else {
            return;
        };
        self.info.players = self.clients.len() as u32;
        self.repo.remove_client(id, &self.info.id);

        if self.master == id {
            if let Some(next) = self.oldest_survivor() {
                self.master = next.clone();
                self.emit(
                    EvType::MasterSwitched,
                    ev::master_switched(&next),
                    Target::All,
                );
                tracing::info!(room = %self.info.id, master = %next, "master switched");
            }
        }

        self.emit(EvType::Left, ev::left(id, cause), Target::All);
        tracing::info!(room = %self.info.id, client = %id, cause, players = self.info.players, "client left");

        if self.clients.is_empty() {
            self.closing = true;
        } else {
            self.repo.schedule_room_update(self.info.clone());
        }
    }

    fn oldest_survivor(&self) -> Option<ClientId> {
        self.clients
            .values()
            .min_by_key(|c| c.join_order)
            .map(|c| c.id.clone())
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    fn handle_broadcast(&mut self, sender: &str, body: Vec<u8>) {
        if !self.clients.contains_key(sender) {
            tracing::warn!(room = %self.info.id, client = %sender, "broadcast from non-member, ignoring");
            return;
        }
        self.emit(EvType::Message, ev::message(sender, &body), Target::All);
    }

    fn handle_to_master(&mut self, sender: &str, body: Vec<u8>) {
        if !self.clients.contains_key(sender) {
            return;
        }
        let master = self.master.clone();
        self.emit(
            EvType::Message,
            ev::message(sender, &body),
            Target::Clients(vec![master]),
        );
    }

    fn handle_to_clients(&mut self, sender: &str, targets: Vec<ClientId>, body: Vec<u8>) {
        if !self.clients.contains_key(sender) {
            return;
        }
        self.emit(
            EvType::Message,
            ev::message(sender, &body),
            Target::Clients(targets),
        );
    }

    // ------------------------------------------------------------------
    // Properties and privileged ops
    // ------------------------------------------------------------------

    fn handle_room_prop(&mut self, sender: &str, payload: RoomPropPayload) {
        if sender != self.master {
            tracing::warn!(room = %self.info.id, client = %sender, "room prop change from non-master, ignoring");
            return;
        }

        self.info.visible = payload.visible;
        self.info.joinable = payload.joinable;
        self.info.watchable = payload.watchable;
        self.info.search_group = payload.search_group;
        if payload.max_players > 0 {
            self.info.max_players = payload.max_players;
        }
        if payload.client_deadline > 0 {
            self.deadline = Duration::from_secs(payload.client_deadline as u64);
        }
        merge_props(&mut self.info.public_props, &payload.public_props);
        merge_props(&mut self.info.private_props, &payload.private_props);

        self.emit(EvType::RoomProp, payload.encode(), Target::All);
        self.repo.schedule_room_update(self.info.clone());
    }

    fn handle_client_prop(&mut self, sender: &str, props: Vec<u8>) {
        let Some(client) = self.clients.get_mut(sender) else {
            return;
        };
        client.merge_props(&props);
        let sender = sender.to_string();
        self.emit(
            EvType::ClientProp,
            ev::client_prop(&sender, &props),
            Target::All,
        );
    }

    fn handle_switch_master(&mut self, sender: &str, target: ClientId) {
        if sender != self.master {
            tracing::warn!(room = %self.info.id, client = %sender, "switch master from non-master, ignoring");
            return;
        }
        if !self.clients.contains_key(&target) {
            tracing::warn!(room = %self.info.id, target = %target, "switch master to unknown client, ignoring");
            return;
        }
        self.master = target.clone();
        self.emit(
            EvType::MasterSwitched,
            ev::master_switched(&target),
            Target::All,
        );
    }

    fn handle_kick(&mut self, sender: &str, target: ClientId) {
        if sender != self.master {
            tracing::warn!(room = %self.info.id, client = %sender, "kick from non-master, ignoring");
            return;
        }
        self.handle_leave(&target, "kicked");
    }

    fn handle_ping(&mut self, sender: &str, timestamp: u64) {
        let watchers = self.watchers.len() as u32;
        let Some(client) = self.member_mut(sender) else {
            return;
        };
        let pong = Event::system(EvType::Pong, ev::pong(timestamp, now_unix_millis(), watchers));
        let _ = client.send(pong.encode());
    }

    // ------------------------------------------------------------------
    // Liveness, attach, replay
    // ------------------------------------------------------------------

    fn handle_tick(&mut self) {
        let deadline = self.deadline;
        let mut expired: Vec<ClientId> = self
            .clients
            .values()
            .chain(self.watchers.values())
            .filter(|c| c.last_msg.elapsed() > deadline)
            .map(|c| c.id.clone())
            .collect();
        for id in expired.drain(..) {
            tracing::info!(room = %self.info.id, client = %id, "client deadline exceeded");
            self.handle_leave(&id, "timeout");
            if self.closing {
                break;
            }
        }
    }

    fn handle_attach(
        &mut self,
        id: &str,
        last_seq: u32,
        peer_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), AttachError> {
        let floor = self
            .history
            .front()
            .and_then(|e| e.event.seq)
            .unwrap_or(self.seq + 1);
        let client = self.member_mut(id).ok_or(AttachError::UnknownClient)?;
        if last_seq.saturating_add(1) < floor {
            return Err(AttachError::SeqGap);
        }

        client.attach_peer(peer_tx);
        let ready = Event::system(EvType::PeerReady, ev::peer_ready(last_seq));
        let _ = client.send(ready.encode());

        // Replay everything this client missed, in order.
        let mut frames = Vec::new();
        for entry in &self.history {
            let seq = entry.event.seq.unwrap_or(0);
            if seq > last_seq && entry.target.includes(id) {
                frames.push(entry.event.encode());
            }
        }
        let client = self.member_mut(id).expect("attached above");
        for frame in frames {
            if client.send(frame) == SendOutcome::Overflow {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event plumbing
    // ------------------------------------------------------------------

    /// Allocate the next sequence number, build the event, store it, and
    /// fan it out. Overflowing clients are evicted after the fan-out.
    fn emit(&mut self, ty: EvType, payload: Vec<u8>, target: Target) {
        let Some(seq) = self.seq.checked_add(1) else {
            // Sequence space exhausted; no wraparound, the room retires.
            tracing::error!(room = %self.info.id, "sequence number overflow, shutting down");
            self.closing = true;
            return;
        };
        self.seq = seq;
        let event = Event::regular(ty, seq, payload);
        let frame = event.encode();

        let mut overflowed = Vec::new();
        for client in self.clients.values_mut().chain(self.watchers.values_mut()) {
            if !target.includes(&client.id) || client.evicted {
                continue;
            }
            if client.send(frame.clone()) == SendOutcome::Overflow {
                client.evicted = true;
                overflowed.push(client.id.clone());
            }
        }

        self.history.push_back(HistoryEntry { event, target });
        while self.history.len() > self.params.history_limit {
            self.history.pop_front();
        }

        for id in overflowed {
            tracing::warn!(room = %self.info.id, client = %id, "send queue overflow, evicting");
            self.handle_leave(&id, "overflow");
        }
    }

    fn joined_info(&self) -> JoinedInfo {
        let mut players: Vec<&Client> = self.clients.values().collect();
        players.sort_by_key(|c| c.join_order);
        JoinedInfo {
            room: self.info.clone(),
            players: players.into_iter().map(|c| c.info()).collect(),
            master_id: self.master.clone(),
            deadline: self.deadline,
        }
    }

    async fn shutdown(mut self) {
        tracing::info!(room = %self.info.id, "room shutting down");

        // Last regular event all surviving peers observe.
        self.emit(EvType::Closed, ev::closed("room closed"), Target::All);

        for (id, _) in self.clients.drain() {
            self.repo.remove_client(&id, &self.info.id);
        }
        for (id, _) in self.watchers.drain() {
            self.repo.remove_client(&id, &self.info.id);
        }

        // Refuse whatever is still queued.
        self.msg_rx.close();
        while let Ok(msg) = self.msg_rx.try_recv() {
            match msg {
                Msg::Join { reply, .. } | Msg::Watch { reply, .. } => {
                    let _ = reply.send(Err(RpcCode::NotFound));
                }
                Msg::AttachPeer { reply, .. } => {
                    let _ = reply.send(Err(AttachError::UnknownClient));
                }
                _ => {}
            }
        }

        self.repo.remove_room(&self.info.id).await;
        tracing::info!(room = %self.info.id, "room stopped");
    }
}

fn merge_props(stored: &mut Vec<u8>, update: &[u8]) {
    let Ok((Value::Dict(update), _)) = unmarshal_as(update, &[Tag::Dict]) else {
        return;
    };
    if update.is_empty() {
        return;
    }
    let mut props = match unmarshal_as(stored, &[Tag::Dict]) {
        Ok((Value::Dict(d), _)) => d,
        _ => Dict::new(),
    };
    props.merge(&update);
    *stored = marshal(&Value::Dict(props));
}
