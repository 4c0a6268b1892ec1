//! The roomnet lobby.
//!
//! A searchable directory of live rooms plus the admission path: clients
//! ask the lobby to create, join, or watch a room, and the lobby dispatches
//! the call to the owning (or a freshly chosen) game/hub host over the
//! internal RPC. Room rows in the database are the ground truth; short-TTL
//! caches absorb the read load.

pub mod cache;
pub mod error;
pub mod http;
pub mod query;
pub mod service;

pub use cache::RoomCache;
pub use error::LobbyError;
pub use query::{OpType, PropQueries, PropQuery};
pub use service::RoomService;
