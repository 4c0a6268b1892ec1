//! The internal RPC surface the lobby dispatches to.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpResponse};

use roomnet_common::model::AppId;
use roomnet_common::rpc::{CreateRoomReq, JoinRoomReq, RpcErrorBody};

use crate::error::GameError;
use crate::repository::Repository;

pub struct GameState {
    pub repos: HashMap<AppId, Arc<Repository>>,
    /// Capacity of each peer's event queue.
    pub queue_len: usize,
}

impl GameState {
    fn repo(&self, app_id: &str) -> Result<&Arc<Repository>, GameError> {
        self.repos
            .get(app_id)
            .ok_or_else(|| GameError::invalid_argument(format!("unknown app: {app_id}")))
    }
}

fn render_err(err: GameError) -> HttpResponse {
    tracing::debug!("{err}");
    let status = actix_web::http::StatusCode::from_u16(err.code().http_status())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(RpcErrorBody {
        code: err.code(),
        message: err.public_message().to_string(),
    })
}

pub async fn rpc_create(
    body: web::Json<CreateRoomReq>,
    state: web::Data<GameState>,
) -> HttpResponse {
    let req = body.into_inner();
    let repo = match state.repo(&req.app_id) {
        Ok(repo) => repo,
        Err(err) => return render_err(err),
    };
    match repo.create_room(&req.room_option, &req.master_info).await {
        Ok(res) => HttpResponse::Ok().json(res),
        Err(err) => render_err(err),
    }
}

pub async fn rpc_join(
    body: web::Json<JoinRoomReq>,
    state: web::Data<GameState>,
) -> HttpResponse {
    let req = body.into_inner();
    let repo = match state.repo(&req.app_id) {
        Ok(repo) => repo,
        Err(err) => return render_err(err),
    };
    match repo.join_room(&req.room_id, &req.client_info).await {
        Ok(res) => HttpResponse::Ok().json(res),
        Err(err) => render_err(err),
    }
}

pub async fn rpc_watch(
    body: web::Json<JoinRoomReq>,
    state: web::Data<GameState>,
) -> HttpResponse {
    let req = body.into_inner();
    let repo = match state.repo(&req.app_id) {
        Ok(repo) => repo,
        Err(err) => return render_err(err),
    };
    match repo.watch_room(&req.room_id, &req.client_info).await {
        Ok(res) => HttpResponse::Ok().json(res),
        Err(err) => render_err(err),
    }
}
