//! JSON surface of the lobby.
//!
//! All routes are POST and take the app id from the `X-App-Id` header
//! (verified upstream by the auth front). Semantic misses ("no joinable
//! room found") answer 200 with a message body; real error classes carry
//! their HTTP status.

use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};

use roomnet_common::config::LobbyConfig;
use roomnet_common::db;
use roomnet_common::model::{ClientInfo, JoinedRoomRes, RoomInfo, RoomOption};

use crate::error::LobbyError;
use crate::query::{PropQueries, PropQuery};
use crate::service::RoomService;

pub struct AppState {
    pub service: Arc<RoomService>,
}

#[derive(Deserialize)]
pub struct CreateParam {
    pub room: RoomOption,
    pub client: ClientInfo,
}

#[derive(Deserialize)]
pub struct JoinParam {
    #[serde(default)]
    pub query: Vec<Vec<PropQuery>>,
    pub client: ClientInfo,
}

#[derive(Deserialize)]
pub struct SearchParam {
    #[serde(default)]
    pub query: Vec<Vec<PropQuery>>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub joinable: bool,
    #[serde(default)]
    pub watchable: bool,
}

#[derive(Serialize)]
struct RoomResponse<'a> {
    message: &'a str,
    room: &'a JoinedRoomRes,
}

#[derive(Serialize)]
struct RoomsResponse<'a> {
    message: &'a str,
    rooms: &'a [RoomInfo],
}

#[derive(Serialize)]
struct MsgResponse<'a> {
    message: &'a str,
}

fn groups(query: Vec<Vec<PropQuery>>) -> Vec<PropQueries> {
    query.into_iter().map(PropQueries).collect()
}

fn app_id(req: &HttpRequest, state: &AppState) -> Result<String, LobbyError> {
    let id = req
        .headers()
        .get("x-app-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| LobbyError::bad_request("missing X-App-Id header"))?;
    if !state.service.valid_app(id) {
        return Err(LobbyError::bad_request(format!("unknown app: {id}")));
    }
    Ok(id.to_string())
}

fn ok_room(res: &JoinedRoomRes) -> HttpResponse {
    HttpResponse::Ok().json(RoomResponse {
        message: "OK",
        room: res,
    })
}

fn render_err(err: LobbyError) -> HttpResponse {
    if err.status() >= 500 {
        tracing::error!("{err}");
    } else {
        tracing::debug!("{err}");
    }
    let status = actix_web::http::StatusCode::from_u16(err.status())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(MsgResponse {
        message: err.message(),
    })
}

pub async fn create(
    req: HttpRequest,
    body: web::Json<CreateParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state.service.create(&app, body.room, body.client).await {
        Ok(res) => ok_room(&res),
        Err(err) => render_err(err),
    }
}

pub async fn join_by_id(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<JoinParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state
        .service
        .join_by_id(&app, path.as_str(), groups(body.query), body.client)
        .await
    {
        Ok(res) => ok_room(&res),
        Err(err) => render_err(err),
    }
}

pub async fn join_by_number(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<JoinParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state
        .service
        .join_by_number(&app, *path, groups(body.query), body.client)
        .await
    {
        Ok(res) => ok_room(&res),
        Err(err) => render_err(err),
    }
}

pub async fn join_at_random(
    req: HttpRequest,
    path: web::Path<u32>,
    body: web::Json<JoinParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state
        .service
        .join_at_random(&app, *path, groups(body.query), body.client)
        .await
    {
        Ok(res) => ok_room(&res),
        Err(err) => render_err(err),
    }
}

pub async fn watch_by_id(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<JoinParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state
        .service
        .watch_by_id(&app, path.as_str(), groups(body.query), body.client)
        .await
    {
        Ok(res) => ok_room(&res),
        Err(err) => render_err(err),
    }
}

pub async fn watch_by_number(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<JoinParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state
        .service
        .watch_by_number(&app, *path, groups(body.query), body.client)
        .await
    {
        Ok(res) => ok_room(&res),
        Err(err) => render_err(err),
    }
}

pub async fn search(
    req: HttpRequest,
    path: web::Path<u32>,
    body: web::Json<SearchParam>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let app = match app_id(&req, &state) {
        Ok(app) => app,
        Err(err) => return render_err(err),
    };
    let body = body.into_inner();
    match state
        .service
        .search(
            &app,
            *path,
            groups(body.query),
            body.limit,
            body.joinable,
            body.watchable,
        )
        .await
    {
        Ok(rooms) => HttpResponse::Ok().json(RoomsResponse {
            message: "OK",
            rooms: &rooms,
        }),
        Err(err) => render_err(err),
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/rooms", web::post().to(create))
        .route("/rooms/join/id/{room_id}", web::post().to(join_by_id))
        .route("/rooms/join/number/{number}", web::post().to(join_by_number))
        .route(
            "/rooms/join/random/{search_group}",
            web::post().to(join_at_random),
        )
        .route("/rooms/watch/id/{room_id}", web::post().to(watch_by_id))
        .route(
            "/rooms/watch/number/{number}",
            web::post().to(watch_by_number),
        )
        .route("/rooms/search/{search_group}", web::post().to(search));
}

/// Build the service and run the HTTP server until shutdown.
pub async fn serve(conf: LobbyConfig) -> std::io::Result<()> {
    let pool = db::connect(&conf.db_url)
        .await
        .map_err(|e| std::io::Error::other(format!("db connect: {e}")))?;
    let service = Arc::new(
        RoomService::new(pool, conf.clone())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?,
    );
    let state = web::Data::new(AppState { service });

    tracing::info!("lobby listening on {}", conf.bind_addr);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind(&conf.bind_addr)?
        .run()
        .await
}
