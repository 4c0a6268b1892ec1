//! The lobby service: admission and dispatch.
//!
//! Reads go through the room/host caches; admission calls are forwarded to
//! the owning host over the internal RPC. Rooms can die between a cache
//! read and the dispatch, so per-room failures are absorbed where a retry
//! against another candidate makes sense (`join_at_random`), and surface
//! as semantic misses everywhere else.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use sqlx::SqlitePool;

use roomnet_common::config::LobbyConfig;
use roomnet_common::db;
use roomnet_common::hosts::{HostCache, HostError, HostTable};
use roomnet_common::model::{AppId, AppRow, ClientInfo, HostRow, JoinedRoomRes, RoomInfo, RoomOption};
use roomnet_common::rpc::{CreateRoomReq, JoinRoomReq, RpcCode, RpcError, RpcPool};
use roomnet_protocol::{unmarshal_as, Dict, Tag, Value};

use crate::cache::RoomCache;
use crate::error::LobbyError;
use crate::query::{match_any, PropQueries};

/// A hub stops taking new watchers for a room at this count.
pub const MAX_WATCHERS: i64 = 10_000;

const ROOM_CACHE_TTL: Duration = Duration::from_millis(10);
const HOST_CACHE_TTL: Duration = Duration::from_secs(1);

pub struct RoomService {
    pool: SqlitePool,
    conf: LobbyConfig,
    /// Immutable after boot; changing the app registry needs a restart.
    apps: HashMap<AppId, AppRow>,
    rpc_pool: RpcPool,
    room_cache: RoomCache,
    game_cache: HostCache,
    hub_cache: HostCache,
}

impl RoomService {
    pub async fn new(pool: SqlitePool, conf: LobbyConfig) -> Result<RoomService, LobbyError> {
        let apps = db::load_apps(&pool)
            .await
            .map_err(|e| LobbyError::internal(format!("select apps: {e}")))?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        let valid_heartbeat = Duration::from_secs(conf.valid_heartbeat_secs);
        Ok(RoomService {
            room_cache: RoomCache::new(pool.clone(), ROOM_CACHE_TTL),
            game_cache: HostCache::new(
                pool.clone(),
                HostTable::Game,
                HOST_CACHE_TTL,
                valid_heartbeat,
            ),
            hub_cache: HostCache::new(
                pool.clone(),
                HostTable::Hub,
                HOST_CACHE_TTL,
                valid_heartbeat,
            ),
            rpc_pool: RpcPool::new(),
            pool,
            conf,
            apps,
        })
    }

    pub fn valid_app(&self, app_id: &str) -> bool {
        self.apps.contains_key(app_id)
    }

    fn check_app(&self, app_id: &str) -> Result<(), LobbyError> {
        if self.valid_app(app_id) {
            Ok(())
        } else {
            Err(LobbyError::bad_request(format!("unknown app: {app_id}")))
        }
    }

    /// Create a room on a randomly chosen live game host.
    pub async fn create(
        &self,
        app_id: &str,
        room_option: RoomOption,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        self.check_app(app_id)?;

        let game = self.game_cache.rand().await.map_err(|e| match e {
            HostError::Db(e) => LobbyError::internal(format!("create: {e}")),
            e => LobbyError::unavailable("No game server found", format!("create: {e}")),
        })?;

        let addr = game.rpc_addr();
        let req = CreateRoomReq {
            app_id: app_id.to_string(),
            room_option,
            master_info: client_info,
        };
        match self.rpc_pool.get(&addr).create(&req).await {
            Ok(res) => {
                tracing::info!(room = %res.room_info.id, host = game.id, "created room");
                Ok(res)
            }
            Err(err) => {
                self.drop_broken_conn(&addr, &err);
                Err(match err.code() {
                    Some(RpcCode::InvalidArgument) => LobbyError::with_status(
                        400,
                        "Invalid argument",
                        format!("create: {err}"),
                    ),
                    Some(RpcCode::ResourceExhausted) => LobbyError::unavailable(
                        "Reached to the max room number",
                        format!("create: {err}"),
                    ),
                    _ => LobbyError::internal(format!("create: {err}")),
                })
            }
        }
    }

    pub async fn join_by_id(
        &self,
        app_id: &str,
        room_id: &str,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        self.check_app(app_id)?;
        let room = sqlx::query_as::<_, RoomInfo>(
            "SELECT * FROM room WHERE app_id = ? AND id = ? AND joinable = 1",
        )
        .bind(app_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LobbyError::from(e).trace("join_by_id"))?;

        let Some(room) = room else {
            return Err(LobbyError::with_status(
                200,
                "No joinable room found",
                format!("join_by_id: no joinable room: app={app_id} room={room_id}"),
            ));
        };
        self.join_filtered(app_id, room, queries, client_info).await
    }

    pub async fn join_by_number(
        &self,
        app_id: &str,
        number: i64,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        self.check_app(app_id)?;
        let room = sqlx::query_as::<_, RoomInfo>(
            "SELECT * FROM room WHERE app_id = ? AND number = ? AND joinable = 1",
        )
        .bind(app_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LobbyError::from(e).trace("join_by_number"))?;

        let Some(room) = room else {
            return Err(LobbyError::with_status(
                200,
                "No joinable room found",
                format!("join_by_number: no joinable room: app={app_id} number={number}"),
            ));
        };
        self.join_filtered(app_id, room, queries, client_info).await
    }

    async fn join_filtered(
        &self,
        app_id: &str,
        room: RoomInfo,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        let props = unmarshal_props(&room.public_props)?;
        let room_id = room.id.clone();
        let filtered = filter(&[room], &[props], &queries, 1, true, false);
        let Some(room) = filtered.into_iter().next() else {
            return Err(LobbyError::with_status(
                200,
                "No joinable room found",
                format!("join: query rejected room: app={app_id} room={room_id}"),
            ));
        };
        self.join(app_id, &room.id, client_info, room.host_id).await
    }

    /// Pick any joinable room in `search_group` matching `queries`.
    ///
    /// Candidates come from a snapshot that may be up to the cache TTL
    /// stale, so individual attempts may hit rooms that died or filled up;
    /// those are absorbed and the next candidate tried. A 400 means the
    /// arguments themselves are bad and would fail on every room.
    pub async fn join_at_random(
        &self,
        app_id: &str,
        search_group: u32,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        let deadline = Instant::now() + Duration::from_millis(self.conf.fetch_timeout_ms);
        let (rooms, props) = self
            .room_cache
            .get_rooms(app_id, search_group)
            .await
            .map_err(|e| LobbyError::from(e).trace("join_at_random"))?;

        let mut candidates = filter(
            &rooms,
            &props,
            &queries,
            self.conf.search_limit as usize,
            true,
            false,
        );
        candidates.shuffle(&mut rand::thread_rng());

        for room in candidates {
            if Instant::now() >= deadline {
                return Err(LobbyError::internal("join_at_random: timeout"));
            }
            match self
                .join(app_id, &room.id, client_info.clone(), room.host_id)
                .await
            {
                Ok(res) => return Ok(res),
                // Bad arguments fail on every room; stop here.
                Err(err) if err.status() == 400 => return Err(err),
                Err(err) => {
                    tracing::debug!(room = %room.id, %err, "join_at_random: attempt failed");
                }
            }
        }

        Err(LobbyError::with_status(
            200,
            "No joinable room found",
            format!("join_at_random: no candidate joined: app={app_id} group={search_group}"),
        ))
    }

    pub async fn watch_by_id(
        &self,
        app_id: &str,
        room_id: &str,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        self.check_app(app_id)?;
        let room = sqlx::query_as::<_, RoomInfo>(
            "SELECT * FROM room WHERE app_id = ? AND id = ? AND watchable = 1",
        )
        .bind(app_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LobbyError::from(e).trace("watch_by_id"))?;

        let Some(room) = room else {
            return Err(LobbyError::with_status(
                200,
                "No watchable room found",
                format!("watch_by_id: no watchable room: app={app_id} room={room_id}"),
            ));
        };
        self.watch_filtered(app_id, room, queries, client_info).await
    }

    pub async fn watch_by_number(
        &self,
        app_id: &str,
        number: i64,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        self.check_app(app_id)?;
        let room = sqlx::query_as::<_, RoomInfo>(
            "SELECT * FROM room WHERE app_id = ? AND number = ? AND watchable = 1",
        )
        .bind(app_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LobbyError::from(e).trace("watch_by_number"))?;

        let Some(room) = room else {
            return Err(LobbyError::with_status(
                200,
                "No watchable room found",
                format!("watch_by_number: no watchable room: app={app_id} number={number}"),
            ));
        };
        self.watch_filtered(app_id, room, queries, client_info).await
    }

    async fn watch_filtered(
        &self,
        app_id: &str,
        room: RoomInfo,
        queries: Vec<PropQueries>,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        let props = unmarshal_props(&room.public_props)?;
        let room_id = room.id.clone();
        let filtered = filter(&[room], &[props], &queries, 1, false, true);
        let Some(room) = filtered.into_iter().next() else {
            return Err(LobbyError::with_status(
                200,
                "No watchable room found",
                format!("watch: query rejected room: app={app_id} room={room_id}"),
            ));
        };
        self.watch(app_id, &room.id, client_info).await
    }

    /// Passive discovery: filtered snapshot, never dispatches.
    pub async fn search(
        &self,
        app_id: &str,
        search_group: u32,
        queries: Vec<PropQueries>,
        limit: u32,
        joinable: bool,
        watchable: bool,
    ) -> Result<Vec<RoomInfo>, LobbyError> {
        let (rooms, props) = self
            .room_cache
            .get_rooms(app_id, search_group)
            .await
            .map_err(|e| LobbyError::from(e).trace("search"))?;
        let limit = if limit == 0 { self.conf.search_limit } else { limit };
        Ok(filter(
            &rooms,
            &props,
            &queries,
            limit as usize,
            joinable,
            watchable,
        ))
    }

    async fn join(
        &self,
        app_id: &str,
        room_id: &str,
        client_info: ClientInfo,
        host_id: u32,
    ) -> Result<JoinedRoomRes, LobbyError> {
        let game = self
            .game_cache
            .get(host_id)
            .await
            .map_err(|e| LobbyError::internal(format!("join: failed to get game server: {e}")))?;

        let addr = game.rpc_addr();
        let req = JoinRoomReq {
            app_id: app_id.to_string(),
            room_id: room_id.to_string(),
            client_info,
        };
        match self.rpc_pool.get(&addr).join(&req).await {
            Ok(res) => {
                tracing::info!(room = %room_id, client = %req.client_info.id, "joined room");
                Ok(res)
            }
            Err(err) => {
                self.drop_broken_conn(&addr, &err);
                Err(match err.code() {
                    // The room died or closed between the directory read
                    // and the dispatch.
                    Some(RpcCode::NotFound) | Some(RpcCode::FailedPrecondition) => {
                        LobbyError::with_status(
                            200,
                            "No joinable room found",
                            format!("join: {err}"),
                        )
                    }
                    Some(RpcCode::ResourceExhausted) => {
                        LobbyError::with_status(200, "Room full", format!("join: {err}"))
                    }
                    Some(RpcCode::AlreadyExists) => {
                        LobbyError::with_status(409, "Already exists", format!("join: {err}"))
                    }
                    Some(RpcCode::InvalidArgument) => LobbyError::with_status(
                        400,
                        "Invalid argument",
                        format!("join: {err}"),
                    ),
                    _ => LobbyError::internal(format!("join: {err}")),
                })
            }
        }
    }

    async fn watch(
        &self,
        app_id: &str,
        room_id: &str,
        client_info: ClientInfo,
    ) -> Result<JoinedRoomRes, LobbyError> {
        // Prefer a hub already serving this room with watcher headroom;
        // otherwise spread onto a live hub not serving it yet. A room
        // whose every serving hub is saturated and has nowhere left to
        // spill is a semantic miss, not an error.
        let serving: Vec<(u32, i64)> = sqlx::query_as(
            "SELECT host_id, watchers FROM hub_watching WHERE room_id = ?",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LobbyError::from(e).trace("watch"))?;

        let open: Vec<u32> = serving
            .iter()
            .filter(|(_, watchers)| *watchers < MAX_WATCHERS)
            .map(|(host_id, _)| *host_id)
            .collect();

        let mut hub = None;
        if let Some(host_id) = open.choose(&mut rand::thread_rng()) {
            match self.hub_cache.get(*host_id).await {
                Ok(h) => hub = Some(h),
                // The serving hub dropped out of the live set (crashed
                // without clearing its rows); treat it as not open and
                // spread the watcher like any other.
                Err(HostError::NotFound(..)) => {
                    tracing::debug!(host = *host_id, room = %room_id, "serving hub no longer live, spreading");
                }
                Err(e) => {
                    return Err(LobbyError::internal(format!(
                        "watch: failed to get hub server: {e}"
                    )));
                }
            }
        }

        let hub = if let Some(hub) = hub {
            hub
        } else {
            let live = self.hub_cache.live().await.map_err(|e| {
                LobbyError::internal(format!("watch: failed to list hub servers: {e}"))
            })?;
            if live.is_empty() {
                return Err(LobbyError::unavailable(
                    "No hub server found",
                    format!("watch: no live hub: room={room_id}"),
                ));
            }
            let fresh: Vec<&HostRow> = live
                .iter()
                .filter(|h| !serving.iter().any(|(host_id, _)| *host_id == h.id))
                .collect();
            match fresh.choose(&mut rand::thread_rng()) {
                Some(hub) => (*hub).clone(),
                None => {
                    return Err(LobbyError::with_status(
                        200,
                        "No watchable room found",
                        format!("watch: all hubs saturated: room={room_id}"),
                    ));
                }
            }
        };

        let addr = hub.rpc_addr();
        let req = JoinRoomReq {
            app_id: app_id.to_string(),
            room_id: room_id.to_string(),
            client_info,
        };
        match self.rpc_pool.get(&addr).watch(&req).await {
            Ok(res) => {
                tracing::info!(room = %room_id, client = %req.client_info.id, "watcher joined room");
                Ok(res)
            }
            Err(err) => {
                self.drop_broken_conn(&addr, &err);
                Err(match err.code() {
                    Some(RpcCode::NotFound) | Some(RpcCode::FailedPrecondition) => {
                        LobbyError::with_status(
                            200,
                            "No watchable room found",
                            format!("watch: {err}"),
                        )
                    }
                    Some(RpcCode::AlreadyExists) => {
                        LobbyError::with_status(409, "Already exists", format!("watch: {err}"))
                    }
                    Some(RpcCode::InvalidArgument) => LobbyError::with_status(
                        400,
                        "Invalid argument",
                        format!("watch: {err}"),
                    ),
                    _ => LobbyError::internal(format!("watch: {err}")),
                })
            }
        }
    }

    fn drop_broken_conn(&self, addr: &str, err: &RpcError) {
        if matches!(err, RpcError::Transport(_)) {
            self.rpc_pool.invalidate(addr);
        }
    }
}

fn unmarshal_props(bytes: &[u8]) -> Result<Dict, LobbyError> {
    match unmarshal_as(bytes, &[Tag::Dict]) {
        Ok((Value::Dict(d), _)) => Ok(d),
        Ok(_) => unreachable!(),
        Err(err) => Err(LobbyError::internal(format!("unmarshal props: {err}"))),
    }
}

/// Apply the joinable/watchable masks, then the query disjunction, keeping
/// input order up to `limit` (0 = unlimited).
pub fn filter(
    rooms: &[RoomInfo],
    props: &[Dict],
    queries: &[PropQueries],
    limit: usize,
    check_joinable: bool,
    check_watchable: bool,
) -> Vec<RoomInfo> {
    let limit = if limit == 0 || limit > rooms.len() {
        rooms.len()
    } else {
        limit
    };
    let mut filtered = Vec::with_capacity(limit);
    for (room, props) in rooms.iter().zip(props) {
        if check_joinable && !room.joinable {
            continue;
        }
        if check_watchable && !room.watchable {
            continue;
        }
        if match_any(queries, props) {
            filtered.push(room.clone());
        }
        if filtered.len() >= limit {
            break;
        }
    }
    filtered
}
