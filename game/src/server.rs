//! Host process assembly: repositories, presence heartbeat, HTTP server.

use std::time::Duration;

use actix_web::{web, App, HttpServer};
use sqlx::SqlitePool;

use roomnet_common::config::GameConfig;
use roomnet_common::db;
use roomnet_common::model::HOST_STATUS_RUNNING;
use roomnet_common::time::now_unix_secs;

use crate::peer;
use crate::repository::Repository;
use crate::rpc::{self, GameState};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Build the host and run until shutdown.
pub async fn serve(conf: GameConfig) -> std::io::Result<()> {
    let pool = db::connect(&conf.db_url)
        .await
        .map_err(|e| std::io::Error::other(format!("db connect: {e}")))?;

    let repos = Repository::new_repos(pool.clone(), conf.clone())
        .await
        .map_err(|e| std::io::Error::other(format!("load apps: {e}")))?;
    if repos.is_empty() {
        tracing::warn!("no apps registered, the host will refuse every call");
    }

    register_host(&pool, &conf)
        .await
        .map_err(|e| std::io::Error::other(format!("register host: {e}")))?;
    spawn_heartbeat(pool.clone(), conf.clone());

    let state = web::Data::new(GameState {
        repos,
        queue_len: conf.queue_len,
    });

    let kind = if conf.hub_mode { "hub" } else { "game" };
    tracing::info!(host = conf.host_id, kind, "host listening on {}", conf.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/rpc/create", web::post().to(rpc::rpc_create))
            .route("/rpc/join", web::post().to(rpc::rpc_join))
            .route("/rpc/watch", web::post().to(rpc::rpc_watch))
            .route("/rooms/{room_id}/ws", web::get().to(peer::room_ws))
    })
    .bind(&conf.bind_addr)?
    .run()
    .await
}

fn host_table(conf: &GameConfig) -> &'static str {
    if conf.hub_mode {
        "hub"
    } else {
        "game"
    }
}

/// Upsert this host's row with a fresh heartbeat.
pub async fn register_host(pool: &SqlitePool, conf: &GameConfig) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO {} (id, hostname, public_name, grpc_port, ws_port, status, heartbeat) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET hostname = excluded.hostname, \
         public_name = excluded.public_name, grpc_port = excluded.grpc_port, \
         ws_port = excluded.ws_port, status = excluded.status, heartbeat = excluded.heartbeat",
        host_table(conf)
    );
    sqlx::query(&query)
        .bind(conf.host_id)
        .bind(&conf.hostname)
        .bind(&conf.public_name)
        .bind(conf.grpc_port)
        .bind(conf.ws_port)
        .bind(HOST_STATUS_RUNNING)
        .bind(now_unix_secs())
        .execute(pool)
        .await?;
    Ok(())
}

fn spawn_heartbeat(pool: SqlitePool, conf: GameConfig) {
    let query = format!("UPDATE {} SET heartbeat = ? WHERE id = ?", host_table(&conf));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(err) = sqlx::query(&query)
                .bind(now_unix_secs())
                .bind(conf.host_id)
                .execute(&pool)
                .await
            {
                tracing::error!(%err, "heartbeat update failed");
            }
        }
    });
}
