//! Short-TTL snapshot of the joinable-room directory.
//!
//! Keyed by `(app_id, search_group)`. The TTL is deliberately tiny
//! (default 10 ms): its job is coalescing bursts of join-at-random and
//! search traffic into one SELECT, not long-term caching. Concurrent
//! misses for the same key single-flight behind a per-key lock; other keys
//! refresh independently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use roomnet_common::model::{AppId, RoomInfo};
use roomnet_protocol::{unmarshal_as, Dict, Tag, Value};

type Key = (AppId, u32);

struct Cached {
    rooms: Arc<Vec<RoomInfo>>,
    props: Arc<Vec<Dict>>,
    taken: Instant,
}

pub struct RoomCache {
    pool: SqlitePool,
    ttl: Duration,
    entries: DashMap<Key, Arc<Mutex<Option<Cached>>>>,
}

impl RoomCache {
    pub fn new(pool: SqlitePool, ttl: Duration) -> RoomCache {
        RoomCache {
            pool,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Rooms currently advertised for `(app_id, search_group)`, alongside
    /// their decoded public props (index-aligned).
    pub async fn get_rooms(
        &self,
        app_id: &str,
        search_group: u32,
    ) -> Result<(Arc<Vec<RoomInfo>>, Arc<Vec<Dict>>), sqlx::Error> {
        let entry = self
            .entries
            .entry((app_id.to_string(), search_group))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut state = entry.lock().await;
        if let Some(cached) = state.as_ref() {
            if cached.taken.elapsed() < self.ttl {
                return Ok((cached.rooms.clone(), cached.props.clone()));
            }
        }

        let rooms = sqlx::query_as::<_, RoomInfo>(
            "SELECT * FROM room \
             WHERE app_id = ? AND search_group = ? AND visible = 1 AND joinable = 1",
        )
        .bind(app_id)
        .bind(search_group)
        .fetch_all(&self.pool)
        .await?;

        let props: Vec<Dict> = rooms.iter().map(|r| decode_props(r)).collect();

        let rooms = Arc::new(rooms);
        let props = Arc::new(props);
        *state = Some(Cached {
            rooms: rooms.clone(),
            props: props.clone(),
            taken: Instant::now(),
        });
        Ok((rooms, props))
    }
}

fn decode_props(room: &RoomInfo) -> Dict {
    match unmarshal_as(&room.public_props, &[Tag::Dict]) {
        Ok((Value::Dict(d), _)) => d,
        Ok(_) => unreachable!(),
        Err(err) => {
            tracing::warn!(room = %room.id, %err, "undecodable public props, treating as empty");
            Dict::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomnet_common::db;
    use roomnet_protocol::marshal;

    async fn seed_room(pool: &SqlitePool, id: &str, group: u32, joinable: bool) {
        let mut props = Dict::new();
        props.insert("name", marshal(&Value::Str8(id.into())));
        sqlx::query(
            "INSERT INTO room (id, app_id, host_id, number, search_group, max_players, players, \
             visible, joinable, watchable, public_props, private_props, created) \
             VALUES (?, 'app', 1, NULL, ?, 4, 1, 1, ?, 1, ?, x'', 0)",
        )
        .bind(id)
        .bind(group)
        .bind(joinable)
        .bind(marshal(&Value::Dict(props)))
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cache_filters_unjoinable_and_decodes_props() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        seed_room(&pool, "aaaaaaaaaaaaaaa1", 7, true).await;
        seed_room(&pool, "aaaaaaaaaaaaaaa2", 7, false).await;
        seed_room(&pool, "aaaaaaaaaaaaaaa3", 8, true).await;

        let cache = RoomCache::new(pool, Duration::from_millis(10));
        let (rooms, props) = cache.get_rooms("app", 7).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "aaaaaaaaaaaaaaa1");
        assert!(props[0].get("name").is_some());
    }

    #[tokio::test]
    async fn test_snapshot_reused_within_ttl() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        seed_room(&pool, "aaaaaaaaaaaaaaa1", 1, true).await;

        let cache = RoomCache::new(pool.clone(), Duration::from_secs(60));
        let (first, _) = cache.get_rooms("app", 1).await.unwrap();
        assert_eq!(first.len(), 1);

        seed_room(&pool, "aaaaaaaaaaaaaaa2", 1, true).await;
        let (second, _) = cache.get_rooms("app", 1).await.unwrap();
        // Same snapshot: the new room is invisible until the TTL lapses.
        assert_eq!(second.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_expired_snapshot_refreshes() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        seed_room(&pool, "aaaaaaaaaaaaaaa1", 1, true).await;

        let cache = RoomCache::new(pool.clone(), Duration::from_millis(1));
        cache.get_rooms("app", 1).await.unwrap();
        seed_room(&pool, "aaaaaaaaaaaaaaa2", 1, true).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (rooms, _) = cache.get_rooms("app", 1).await.unwrap();
        assert_eq!(rooms.len(), 2);
    }
}
