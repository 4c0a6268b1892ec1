//! Websocket peers.
//!
//! Each accepted socket is one peer of one already-joined client. The
//! actor plays both session workers: a spawned forwarder drains the
//! client's event queue into the socket (the writer), and the stream
//! handler parses inbound frames into room msgs (the reader). Attaching
//! runs through the room loop so the `PeerReady` + replay handshake is
//! serialized with event emission.

use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use roomnet_common::auth::AuthToken;
use roomnet_common::model::ClientId;
use roomnet_protocol::ClientMsg;

use crate::room::{Msg, RoomHandle};
use crate::rpc::GameState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
pub struct PeerQuery {
    /// Last regular sequence number the session has seen; replay starts
    /// after it.
    #[serde(default)]
    pub last_seq: u32,
}

/// `GET /rooms/{room_id}/ws?last_seq=N`
///
/// Auth rides in headers: `X-App-Id`, `X-User-Id`, and the room token's
/// `X-Nonce` / `X-Hash` pair. The client must have joined (or started
/// watching) through the lobby first.
pub async fn room_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<PeerQuery>,
    state: web::Data<GameState>,
) -> Result<HttpResponse, actix_web::Error> {
    let room_id = path.into_inner();
    let app_id = header(&req, "x-app-id")?;
    let user_id = header(&req, "x-user-id")?;
    let token = AuthToken {
        nonce: header(&req, "x-nonce")?,
        hash: header(&req, "x-hash")?,
    };

    let repo = state
        .repos
        .get(&app_id)
        .ok_or_else(|| actix_web::error::ErrorBadRequest("unknown app"))?;
    let handle = repo
        .get_room(&room_id)
        .ok_or_else(|| actix_web::error::ErrorNotFound("room not found"))?;
    if !repo.valid_auth_token(&room_id, &user_id, &token) {
        return Err(actix_web::error::ErrorUnauthorized("invalid token"));
    }
    if !repo.has_client(&user_id, &room_id) {
        return Err(actix_web::error::ErrorForbidden("not in room"));
    }

    tracing::info!(room = %room_id, client = %user_id, last_seq = query.last_seq, "peer connecting");
    let actor = PeerActor::new(user_id, handle, query.last_seq, state.queue_len);
    ws::start(actor, &req, stream)
}

fn header(req: &HttpRequest, name: &str) -> Result<String, actix_web::Error> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| actix_web::error::ErrorBadRequest(format!("missing {name} header")))
}

/// Frame from the room, bound for the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct EventFrame(Vec<u8>);

/// The room refused the attach (unknown client or replay gap); the
/// session must be reset.
#[derive(Message)]
#[rtype(result = "()")]
struct AttachFailed;

pub struct PeerActor {
    client_id: ClientId,
    room: RoomHandle,
    last_seq: u32,
    peer_rx: Option<mpsc::Receiver<Vec<u8>>>,
    peer_tx: Option<mpsc::Sender<Vec<u8>>>,
    last_heartbeat: Instant,
}

impl PeerActor {
    pub fn new(
        client_id: ClientId,
        room: RoomHandle,
        last_seq: u32,
        queue_len: usize,
    ) -> PeerActor {
        let (peer_tx, peer_rx) = mpsc::channel(queue_len.max(1));
        PeerActor {
            client_id,
            room,
            last_seq,
            peer_rx: Some(peer_rx),
            peer_tx: Some(peer_tx),
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if act.last_heartbeat.elapsed() > SOCKET_TIMEOUT {
                tracing::debug!(client = %act.client_id, "socket heartbeat timeout");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn forward(&self, msg: Msg) {
        let room = self.room.sender();
        actix::spawn(async move {
            let _ = room.send(msg).await;
        });
    }
}

impl Actor for PeerActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        // Writer: drain the event queue into the socket in order.
        if let Some(mut peer_rx) = self.peer_rx.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(frame) = peer_rx.recv().await {
                    if addr.try_send(EventFrame(frame)).is_err() {
                        break;
                    }
                }
            });
        }

        // Attach through the room loop; it sends PeerReady and the replay
        // into the queue before any new event.
        if let Some(peer_tx) = self.peer_tx.take() {
            let room = self.room.sender();
            let client = self.client_id.clone();
            let last_seq = self.last_seq;
            let addr = ctx.address();
            actix::spawn(async move {
                let (reply_tx, reply_rx) = oneshot::channel();
                let attach = Msg::AttachPeer {
                    client,
                    last_seq,
                    peer_tx,
                    reply: reply_tx,
                };
                if room.send(attach).await.is_err() {
                    let _ = addr.try_send(AttachFailed);
                    return;
                }
                match reply_rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(?err, "peer attach refused");
                        let _ = addr.try_send(AttachFailed);
                    }
                    Err(_) => {
                        let _ = addr.try_send(AttachFailed);
                    }
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.forward(Msg::DetachPeer {
            client: self.client_id.clone(),
        });
    }
}

impl Handler<EventFrame> for PeerActor {
    type Result = ();

    fn handle(&mut self, frame: EventFrame, ctx: &mut Self::Context) {
        ctx.binary(frame.0);
    }
}

impl Handler<AttachFailed> for PeerActor {
    type Result = ();

    fn handle(&mut self, _: AttachFailed, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some("session reset required".into()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PeerActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                match ClientMsg::decode(&data) {
                    Ok(parsed) => {
                        self.forward(Msg::from_client(self.client_id.clone(), parsed));
                    }
                    Err(err) => {
                        tracing::warn!(client = %self.client_id, %err, "malformed message");
                        self.forward(Msg::ClientError {
                            client: self.client_id.clone(),
                            cause: "protocol error".into(),
                        });
                        ctx.stop();
                    }
                }
            }
            Ok(ws::Message::Text(_)) => {
                tracing::warn!(client = %self.client_id, "text frame on binary protocol");
                self.forward(Msg::ClientError {
                    client: self.client_id.clone(),
                    cause: "protocol error".into(),
                });
                ctx.stop();
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(client = %self.client_id, ?reason, "socket closed");
                ctx.stop();
            }
            _ => {}
        }
    }
}
