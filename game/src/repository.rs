//! Per-app registry of live rooms on one host.
//!
//! The repository owns room birth (a transactional row insert plus the
//! loop spawn), forwards join/watch calls into the loops, and is called
//! back by the loops for deferred row updates and final removal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::oneshot;

use roomnet_common::auth::{self, AuthToken};
use roomnet_common::config::GameConfig;
use roomnet_common::db;
use roomnet_common::model::{AppId, AppRow, ClientId, ClientInfo, JoinedRoomRes, RoomId, RoomInfo, RoomOption};
use roomnet_common::rpc::RpcCode;
use roomnet_common::time::now_unix_secs;
use roomnet_protocol::{marshal, Dict, Value};

use crate::error::GameError;
use crate::room::{spawn_room, JoinedInfo, Msg, RoomHandle, RoomParams};

/// Room ids are 16 lowercase-hex chars.
const ID_BYTES: usize = 8;
/// Transactional room birth and join forwarding share this deadline.
const OP_DEADLINE: Duration = Duration::from_secs(5);

pub struct Repository {
    host_id: u32,
    app: AppRow,
    conf: GameConfig,
    pool: SqlitePool,
    rooms: DashMap<RoomId, RoomHandle>,
    clients: DashMap<(ClientId, RoomId), ()>,
}

impl Repository {
    pub fn new(pool: SqlitePool, conf: GameConfig, app: AppRow) -> Arc<Repository> {
        Arc::new(Repository {
            host_id: conf.host_id,
            app,
            conf,
            pool,
            rooms: DashMap::new(),
            clients: DashMap::new(),
        })
    }

    /// One repository per registered app, loaded from the `app` table.
    pub async fn new_repos(
        pool: SqlitePool,
        conf: GameConfig,
    ) -> Result<HashMap<AppId, Arc<Repository>>, sqlx::Error> {
        let apps = db::load_apps(&pool).await?;
        Ok(apps
            .into_iter()
            .map(|app| {
                tracing::debug!(app = %app.id, "new repository");
                (app.id.clone(), Repository::new(pool.clone(), conf.clone(), app))
            })
            .collect())
    }

    pub fn app_id(&self) -> &str {
        &self.app.id
    }

    /// Create a room and seat `master` in it.
    ///
    /// The row insert, the loop spawn, and the master's join all happen
    /// under one deadline; the transaction commits only after the loop
    /// acknowledged the join.
    pub async fn create_room(
        self: &Arc<Self>,
        op: &RoomOption,
        master: &ClientInfo,
    ) -> Result<JoinedRoomRes, GameError> {
        if master.id.is_empty() {
            return Err(GameError::invalid_argument("empty master client id"));
        }
        if op.max_players == 0 {
            return Err(GameError::invalid_argument("max_players must be positive"));
        }

        tokio::time::timeout(OP_DEADLINE, self.create_room_inner(op, master))
            .await
            .map_err(|_| GameError::internal(format!("create_room deadline: app={}", self.app.id)))?
    }

    async fn create_room_inner(
        self: &Arc<Self>,
        op: &RoomOption,
        master: &ClientInfo,
    ) -> Result<JoinedRoomRes, GameError> {
        let mut tx = self.pool.begin().await?;
        let info = self.new_room_info(&mut tx, op).await?;
        let room_id = info.id.clone();

        let key = auth::random_hex(16);
        let deadline = if op.client_deadline > 0 {
            Duration::from_secs(op.client_deadline as u64)
        } else {
            Duration::from_secs(self.conf.default_deadline_secs as u64)
        };

        let (handle, reply) = spawn_room(
            self.clone(),
            info,
            key.clone(),
            deadline,
            RoomParams {
                history_limit: self.conf.history_limit,
                queue_len: self.conf.queue_len,
            },
            master.clone(),
        );

        let joined = match reply.await {
            Ok(Ok(joined)) => joined,
            Ok(Err(code)) => {
                return Err(GameError::new(
                    code,
                    format!("create_room: master join refused: room={room_id}"),
                ));
            }
            Err(_) => {
                return Err(GameError::internal(format!(
                    "create_room: join reply dropped: room={room_id}"
                )));
            }
        };

        tx.commit().await?;

        self.rooms.insert(room_id.clone(), handle);
        self.clients.insert((master.id.clone(), room_id.clone()), ());

        tracing::info!(room = %room_id, master = %master.id, "room created");
        Ok(self.joined_res(joined, &master.id, &key))
    }

    async fn new_room_info(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        op: &RoomOption,
    ) -> Result<RoomInfo, GameError> {
        let mut last_err = None;
        for _ in 0..self.conf.retry_count {
            let info = RoomInfo {
                id: auth::random_hex(ID_BYTES),
                app_id: self.app.id.clone(),
                host_id: self.host_id,
                number: op
                    .with_number
                    .then(|| rand::thread_rng().gen_range(1..=self.conf.max_room_num as i64)),
                search_group: op.search_group,
                max_players: op.max_players,
                players: 1,
                visible: op.visible,
                joinable: op.joinable,
                watchable: op.watchable,
                public_props: props_or_empty(&op.public_props),
                private_props: props_or_empty(&op.private_props),
                created: now_unix_secs(),
            };

            let res = sqlx::query(
                "INSERT INTO room (id, app_id, host_id, number, search_group, max_players, \
                 players, visible, joinable, watchable, public_props, private_props, created) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&info.id)
            .bind(&info.app_id)
            .bind(info.host_id)
            .bind(info.number)
            .bind(info.search_group)
            .bind(info.max_players)
            .bind(info.players)
            .bind(info.visible)
            .bind(info.joinable)
            .bind(info.watchable)
            .bind(&info.public_props)
            .bind(&info.private_props)
            .bind(info.created)
            .execute(&mut **tx)
            .await;

            match res {
                Ok(_) => return Ok(info),
                // Only id/number collisions are worth another draw; any
                // other constraint or driver failure aborts the create.
                Err(err) if db::is_unique_violation(&err) => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(GameError::new(
            RpcCode::ResourceExhausted,
            format!(
                "no free room id/number after {} tries: {:?}",
                self.conf.retry_count, last_err
            ),
        ))
    }

    pub async fn join_room(
        &self,
        room_id: &str,
        client: &ClientInfo,
    ) -> Result<JoinedRoomRes, GameError> {
        self.enter_room(room_id, client, false).await
    }

    pub async fn watch_room(
        &self,
        room_id: &str,
        client: &ClientInfo,
    ) -> Result<JoinedRoomRes, GameError> {
        self.enter_room(room_id, client, true).await
    }

    async fn enter_room(
        &self,
        room_id: &str,
        client: &ClientInfo,
        as_watcher: bool,
    ) -> Result<JoinedRoomRes, GameError> {
        if client.id.is_empty() {
            return Err(GameError::invalid_argument("empty client id"));
        }
        let handle = self
            .get_room(room_id)
            .ok_or_else(|| GameError::not_found(format!("room not found: room={room_id}")))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = if as_watcher {
            Msg::Watch {
                info: client.clone(),
                reply: reply_tx,
            }
        } else {
            Msg::Join {
                info: client.clone(),
                reply: reply_tx,
            }
        };
        handle
            .send(msg)
            .await
            .map_err(|_| GameError::not_found(format!("room closed: room={room_id}")))?;

        let joined = match tokio::time::timeout(OP_DEADLINE, reply_rx).await {
            Ok(Ok(Ok(joined))) => joined,
            Ok(Ok(Err(code))) => {
                return Err(GameError::new(
                    code,
                    format!("join refused: room={room_id} client={}", client.id),
                ));
            }
            Ok(Err(_)) => {
                return Err(GameError::not_found(format!(
                    "room closed while joining: room={room_id}"
                )));
            }
            Err(_) => {
                return Err(GameError::internal(format!(
                    "join deadline: room={room_id}"
                )));
            }
        };

        self.clients
            .insert((client.id.clone(), room_id.to_string()), ());
        Ok(self.joined_res(joined, &client.id, &handle.key))
    }

    fn joined_res(&self, joined: JoinedInfo, client_id: &str, key: &str) -> JoinedRoomRes {
        JoinedRoomRes {
            room_info: joined.room,
            players: joined.players,
            token: auth::issue_token(client_id, key),
            master_id: joined.master_id,
            deadline: joined.deadline.as_secs() as u32,
        }
    }

    pub fn get_room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|h| h.clone())
    }

    /// Check a token issued for this room against the room key.
    pub fn valid_auth_token(&self, room_id: &str, user_id: &str, token: &AuthToken) -> bool {
        match self.get_room(room_id) {
            Some(handle) => auth::validate_token(token, &handle.key, user_id),
            None => false,
        }
    }

    /// Whether `client_id` is currently seated in `room_id` on this host.
    pub fn has_client(&self, client_id: &str, room_id: &str) -> bool {
        self.clients
            .contains_key(&(client_id.to_string(), room_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Callbacks from the room loops
    // ------------------------------------------------------------------

    /// Reflect the room row in the database. Deferred; the room state is
    /// authoritative while the room lives.
    pub(crate) fn schedule_room_update(&self, info: RoomInfo) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let res = sqlx::query(
                "UPDATE room SET search_group = ?, max_players = ?, players = ?, visible = ?, \
                 joinable = ?, watchable = ?, public_props = ?, private_props = ? WHERE id = ?",
            )
            .bind(info.search_group)
            .bind(info.max_players)
            .bind(info.players)
            .bind(info.visible)
            .bind(info.joinable)
            .bind(info.watchable)
            .bind(&info.public_props)
            .bind(&info.private_props)
            .bind(&info.id)
            .execute(&pool)
            .await;
            if let Err(err) = res {
                tracing::error!(room = %info.id, %err, "room row update failed");
            }
        });
    }

    /// Report this hub's watcher count for a room, for the lobby's
    /// watcher spreading. No-op on game hosts.
    pub(crate) fn schedule_watchers_update(&self, room_id: &str, watchers: u32) {
        if !self.conf.hub_mode {
            return;
        }
        let pool = self.pool.clone();
        let host_id = self.host_id;
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            let res = sqlx::query(
                "INSERT INTO hub_watching (host_id, room_id, watchers) VALUES (?, ?, ?) \
                 ON CONFLICT (host_id, room_id) DO UPDATE SET watchers = excluded.watchers",
            )
            .bind(host_id)
            .bind(&room_id)
            .bind(watchers)
            .execute(&pool)
            .await;
            if let Err(err) = res {
                tracing::error!(room = %room_id, %err, "hub watcher update failed");
            }
        });
    }

    pub(crate) fn remove_client(&self, client_id: &str, room_id: &str) {
        self.clients
            .remove(&(client_id.to_string(), room_id.to_string()));
    }

    /// Final teardown, called by the room loop as its last act.
    pub(crate) async fn remove_room(&self, room_id: &str) {
        self.rooms.remove(room_id);
        if let Err(err) = sqlx::query("DELETE FROM room WHERE id = ?")
            .bind(room_id)
            .execute(&self.pool)
            .await
        {
            tracing::error!(room = %room_id, %err, "room row delete failed");
        }
        if let Err(err) = sqlx::query("DELETE FROM hub_watching WHERE host_id = ? AND room_id = ?")
            .bind(self.host_id)
            .bind(room_id)
            .execute(&self.pool)
            .await
        {
            tracing::error!(room = %room_id, %err, "hub watcher row delete failed");
        }
        tracing::debug!(room = %room_id, "room removed from repository");
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn props_or_empty(props: &[u8]) -> Vec<u8> {
    if props.is_empty() {
        marshal(&Value::Dict(Dict::new()))
    } else {
        props.to_vec()
    }
}
