//! The roomnet game/hub host.
//!
//! One process serves many rooms for many apps. Each room is a single
//! tokio task owning all of its state; everything else talks to it through
//! a bounded message channel. The [`Repository`] tracks the live rooms of
//! one app and persists their rows; the websocket [`peer`] actors bridge
//! client transports to the room loops; [`rpc`] exposes the create/join/
//! watch surface the lobby dispatches to.
//!
//! A hub host runs the same binary with `hub_mode` set: it serves watchers
//! instead of players and reports per-room watcher counts for the lobby to
//! spread load over.

pub mod client;
pub mod error;
pub mod peer;
pub mod repository;
pub mod room;
pub mod rpc;
pub mod server;

pub use error::GameError;
pub use repository::Repository;
pub use room::{JoinedInfo, Msg, RoomHandle};
