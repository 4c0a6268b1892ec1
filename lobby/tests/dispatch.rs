//! Lobby dispatch against a fake host: stale-cache absorption, error
//! mapping, and watcher spreading.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::{web, App, HttpResponse, HttpServer};
use sqlx::SqlitePool;

use roomnet_common::auth;
use roomnet_common::config::LobbyConfig;
use roomnet_common::db;
use roomnet_common::model::{ClientInfo, JoinedRoomRes, RoomInfo};
use roomnet_common::rpc::{JoinRoomReq, RpcCode, RpcErrorBody};
use roomnet_common::time::now_unix_secs;
use roomnet_lobby::query::{OpType, PropQueries, PropQuery};
use roomnet_lobby::RoomService;
use roomnet_protocol::{marshal, Dict, Value};

struct FakeHost {
    dead: Mutex<HashSet<String>>,
    joins: AtomicU32,
    watches: AtomicU32,
}

fn fake_joined(room_id: &str, client: &ClientInfo) -> JoinedRoomRes {
    JoinedRoomRes {
        room_info: RoomInfo {
            id: room_id.to_string(),
            app_id: "app".into(),
            host_id: 1,
            number: None,
            search_group: 7,
            max_players: 4,
            players: 2,
            visible: true,
            joinable: true,
            watchable: true,
            public_props: marshal(&Value::Dict(Dict::new())),
            private_props: marshal(&Value::Dict(Dict::new())),
            created: now_unix_secs(),
        },
        players: vec![client.clone()],
        token: auth::issue_token(&client.id, "room-key"),
        master_id: "u1".into(),
        deadline: 30,
    }
}

async fn fake_join(
    body: web::Json<JoinRoomReq>,
    state: web::Data<Arc<FakeHost>>,
) -> HttpResponse {
    if state.dead.lock().unwrap().contains(&body.room_id) {
        return HttpResponse::NotFound().json(RpcErrorBody {
            code: RpcCode::NotFound,
            message: "room not found".into(),
        });
    }
    state.joins.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok().json(fake_joined(&body.room_id, &body.client_info))
}

async fn fake_watch(
    body: web::Json<JoinRoomReq>,
    state: web::Data<Arc<FakeHost>>,
) -> HttpResponse {
    state.watches.fetch_add(1, Ordering::SeqCst);
    HttpResponse::Ok().json(fake_joined(&body.room_id, &body.client_info))
}

async fn start_fake_host(dead: &[&str]) -> (u16, Arc<FakeHost>) {
    let state = Arc::new(FakeHost {
        dead: Mutex::new(dead.iter().map(|s| s.to_string()).collect()),
        joins: AtomicU32::new(0),
        watches: AtomicU32::new(0),
    });
    let data = web::Data::new(state.clone());
    let srv = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/rpc/join", web::post().to(fake_join))
            .route("/rpc/watch", web::post().to(fake_watch))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let port = srv.addrs()[0].port();
    actix_web::rt::spawn(srv.run());
    (port, state)
}

async fn seed_app(pool: &SqlitePool) {
    sqlx::query("INSERT INTO app (id, key) VALUES ('app', 'secret')")
        .execute(pool)
        .await
        .unwrap();
}

async fn seed_host(pool: &SqlitePool, table: &str, id: u32, port: u16) {
    let q = format!(
        "INSERT INTO {table} (id, hostname, public_name, grpc_port, ws_port, status, heartbeat) \
         VALUES (?, '127.0.0.1', '127.0.0.1', ?, ?, 1, ?)"
    );
    sqlx::query(&q)
        .bind(id)
        .bind(port)
        .bind(port)
        .bind(now_unix_secs())
        .execute(pool)
        .await
        .unwrap();
}

async fn seed_room(pool: &SqlitePool, id: &str, group: u32, score: i32) {
    let mut props = Dict::new();
    props.insert("score", marshal(&Value::Int(score)));
    sqlx::query(
        "INSERT INTO room (id, app_id, host_id, number, search_group, max_players, players, \
         visible, joinable, watchable, public_props, private_props, created) \
         VALUES (?, 'app', 1, NULL, ?, 4, 1, 1, 1, 1, ?, ?, ?)",
    )
    .bind(id)
    .bind(group)
    .bind(marshal(&Value::Dict(props)))
    .bind(marshal(&Value::Dict(Dict::new())))
    .bind(now_unix_secs())
    .execute(pool)
    .await
    .unwrap();
}

fn conf() -> LobbyConfig {
    LobbyConfig {
        valid_heartbeat_secs: 60,
        fetch_timeout_ms: 2_000,
        ..LobbyConfig::default()
    }
}

fn client(id: &str) -> ClientInfo {
    ClientInfo {
        id: id.into(),
        props: marshal(&Value::Dict(Dict::new())),
    }
}

fn score_query(score: i32) -> Vec<PropQueries> {
    vec![PropQueries(vec![PropQuery {
        key: "score".into(),
        op: OpType::Equal,
        val: marshal(&Value::Int(score)),
    }])]
}

#[actix_web::test]
async fn test_join_at_random_absorbs_dead_rooms() {
    // Room r2 is still in the directory but the host lost it.
    let (port, host) = start_fake_host(&["r2"]).await;
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;
    seed_host(&pool, "game", 1, port).await;
    for id in ["r1", "r2", "r3"] {
        seed_room(&pool, id, 7, 5).await;
    }

    let service = RoomService::new(pool, conf()).await.unwrap();
    for _ in 0..2 {
        let res = service
            .join_at_random("app", 7, score_query(5), client("u9"))
            .await
            .expect("a surviving candidate should accept the join");
        assert_ne!(res.room_info.id, "r2");
    }
    assert_eq!(host.joins.load(Ordering::SeqCst), 2);
}

#[actix_web::test]
async fn test_join_at_random_with_no_match_is_semantic_miss() {
    let (port, _host) = start_fake_host(&[]).await;
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;
    seed_host(&pool, "game", 1, port).await;
    seed_room(&pool, "r1", 7, 5).await;

    let service = RoomService::new(pool, conf()).await.unwrap();
    let err = service
        .join_at_random("app", 7, score_query(6), client("u9"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 200);
    assert_eq!(err.message(), "No joinable room found");
}

#[actix_web::test]
async fn test_join_by_id_misses() {
    let (port, _host) = start_fake_host(&[]).await;
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;
    seed_host(&pool, "game", 1, port).await;
    seed_room(&pool, "r1", 7, 5).await;

    let service = RoomService::new(pool, conf()).await.unwrap();

    // Unknown id: semantic miss, not an error.
    let err = service
        .join_by_id("app", "nope", vec![], client("u9"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 200);
    assert_eq!(err.message(), "No joinable room found");

    // Query rejects the room: also a semantic miss.
    let err = service
        .join_by_id("app", "r1", score_query(6), client("u9"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 200);

    // Unknown app: a real 400.
    let err = service
        .join_by_id("ghost-app", "r1", vec![], client("u9"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);

    // Matching query dispatches.
    let res = service
        .join_by_id("app", "r1", score_query(5), client("u9"))
        .await
        .unwrap();
    assert_eq!(res.room_info.id, "r1");
}

#[actix_web::test]
async fn test_create_without_live_game_host() {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;

    let service = RoomService::new(pool, conf()).await.unwrap();
    let op = roomnet_common::model::RoomOption {
        visible: true,
        joinable: true,
        watchable: true,
        with_number: false,
        search_group: 0,
        max_players: 4,
        client_deadline: 0,
        public_props: vec![],
        private_props: vec![],
    };
    let err = service.create("app", op, client("u1")).await.unwrap_err();
    assert_eq!(err.status(), 503);
    assert_eq!(err.message(), "No game server found");
}

#[actix_web::test]
async fn test_watch_spreads_and_respects_watcher_cap() {
    let (port, host) = start_fake_host(&[]).await;
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;
    seed_host(&pool, "game", 1, port).await;
    seed_host(&pool, "hub", 2, port).await;
    seed_room(&pool, "r1", 7, 5).await;

    // The only hub serving r1 is saturated; nowhere to spill.
    sqlx::query("INSERT INTO hub_watching (host_id, room_id, watchers) VALUES (2, 'r1', 10000)")
        .execute(&pool)
        .await
        .unwrap();

    let service = RoomService::new(pool.clone(), conf()).await.unwrap();
    let err = service
        .watch_by_id("app", "r1", vec![], client("w1"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 200);
    assert_eq!(err.message(), "No watchable room found");
    assert_eq!(host.watches.load(Ordering::SeqCst), 0);

    // With headroom the watcher lands on the serving hub.
    sqlx::query("UPDATE hub_watching SET watchers = 5")
        .execute(&pool)
        .await
        .unwrap();
    // Outwait the host cache TTL so the hub list refreshes.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let res = service
        .watch_by_id("app", "r1", vec![], client("w1"))
        .await
        .unwrap();
    assert_eq!(res.room_info.id, "r1");
    assert_eq!(host.watches.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_watch_spills_over_a_dead_serving_hub() {
    let (port, host) = start_fake_host(&[]).await;
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;
    seed_host(&pool, "game", 1, port).await;
    seed_host(&pool, "hub", 2, port).await;
    seed_room(&pool, "r1", 7, 5).await;

    // Hub 9 crashed without clearing its row: it still claims r1 with
    // headroom but is absent from the live set. The watcher must land
    // on a live hub, not surface an error.
    sqlx::query("INSERT INTO hub_watching (host_id, room_id, watchers) VALUES (9, 'r1', 5)")
        .execute(&pool)
        .await
        .unwrap();

    let service = RoomService::new(pool, conf()).await.unwrap();
    let res = service
        .watch_by_id("app", "r1", vec![], client("w1"))
        .await
        .unwrap();
    assert_eq!(res.room_info.id, "r1");
    assert_eq!(host.watches.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_search_filters_by_query() {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    seed_app(&pool).await;
    seed_room(&pool, "r1", 7, 5).await;
    seed_room(&pool, "r2", 7, 9).await;

    let service = RoomService::new(pool, conf()).await.unwrap();
    let all = service
        .search("app", 7, vec![], 0, true, false)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let scored = service
        .search("app", 7, score_query(9), 0, true, false)
        .await
        .unwrap();
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].id, "r2");
}
