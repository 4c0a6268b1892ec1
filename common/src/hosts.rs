//! Heartbeat-filtered host caches.
//!
//! The lobby picks dispatch targets from short-TTL snapshots of the `game`
//! and `hub` tables. A snapshot may go stale for up to the TTL after a
//! host dies; callers tolerate the stale pick and retry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{HostRow, HOST_STATUS_RUNNING};
use crate::time::now_unix_secs;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no live {0} server")]
    NoneAvailable(&'static str),
    #[error("{0} server not found: host={1}")]
    NotFound(&'static str, u32),
    #[error("host query error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Which host table a cache reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTable {
    Game,
    Hub,
}

impl HostTable {
    pub fn name(self) -> &'static str {
        match self {
            HostTable::Game => "game",
            HostTable::Hub => "hub",
        }
    }
}

struct Snapshot {
    hosts: HashMap<u32, HostRow>,
    live_ids: Vec<u32>,
    taken: Instant,
}

/// TTL cache of live hosts from one table.
pub struct HostCache {
    pool: SqlitePool,
    table: HostTable,
    ttl: Duration,
    valid_heartbeat: Duration,
    // The refresh runs under this lock, so concurrent misses coalesce.
    state: Mutex<Option<Snapshot>>,
}

impl HostCache {
    pub fn new(
        pool: SqlitePool,
        table: HostTable,
        ttl: Duration,
        valid_heartbeat: Duration,
    ) -> HostCache {
        HostCache {
            pool,
            table,
            ttl,
            valid_heartbeat,
            state: Mutex::new(None),
        }
    }

    /// Look up a host by id.
    pub async fn get(&self, host_id: u32) -> Result<HostRow, HostError> {
        let mut state = self.state.lock().await;
        let snap = self.fresh(&mut state).await?;
        snap.hosts
            .get(&host_id)
            .cloned()
            .ok_or(HostError::NotFound(self.table.name(), host_id))
    }

    /// Snapshot of every live host.
    pub async fn live(&self) -> Result<Vec<HostRow>, HostError> {
        let mut state = self.state.lock().await;
        let snap = self.fresh(&mut state).await?;
        Ok(snap.live_ids.iter().map(|id| snap.hosts[id].clone()).collect())
    }

    /// Pick a live host uniformly at random.
    pub async fn rand(&self) -> Result<HostRow, HostError> {
        let mut state = self.state.lock().await;
        let snap = self.fresh(&mut state).await?;
        let id = snap
            .live_ids
            .choose(&mut rand::thread_rng())
            .ok_or(HostError::NoneAvailable(self.table.name()))?;
        Ok(snap.hosts[id].clone())
    }

    async fn fresh<'a>(
        &self,
        state: &'a mut Option<Snapshot>,
    ) -> Result<&'a Snapshot, HostError> {
        let expired = match state {
            Some(snap) => snap.taken.elapsed() >= self.ttl,
            None => true,
        };
        if expired {
            *state = Some(self.refresh().await?);
        }
        Ok(state.as_ref().unwrap())
    }

    async fn refresh(&self) -> Result<Snapshot, HostError> {
        let min_heartbeat = now_unix_secs() - self.valid_heartbeat.as_secs() as i64;
        let query = format!(
            "SELECT id, hostname, public_name, grpc_port, ws_port, status, heartbeat \
             FROM {} WHERE status = ? AND heartbeat >= ?",
            self.table.name()
        );
        let rows = sqlx::query_as::<_, HostRow>(&query)
            .bind(HOST_STATUS_RUNNING)
            .bind(min_heartbeat)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(table = self.table.name(), hosts = rows.len(), "host cache refreshed");

        let live_ids = rows.iter().map(|h| h.id).collect();
        Ok(Snapshot {
            hosts: rows.into_iter().map(|h| (h.id, h)).collect(),
            live_ids,
            taken: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed_host(pool: &SqlitePool, table: &str, id: u32, heartbeat: i64) {
        let q = format!(
            "INSERT INTO {table} (id, hostname, public_name, grpc_port, ws_port, status, heartbeat) \
             VALUES (?, 'h', 'h', 19000, 19001, 1, ?)"
        );
        sqlx::query(&q).bind(id).bind(heartbeat).execute(pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_and_rand_only_see_live_hosts() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let now = now_unix_secs();
        seed_host(&pool, "game", 1, now).await;
        seed_host(&pool, "game", 2, now - 3600).await; // heartbeat expired

        let cache = HostCache::new(
            pool,
            HostTable::Game,
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        assert_eq!(cache.get(1).await.unwrap().id, 1);
        assert!(matches!(cache.get(2).await, Err(HostError::NotFound(_, 2))));
        assert_eq!(cache.rand().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_empty_table_reports_none_available() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let cache = HostCache::new(
            pool,
            HostTable::Hub,
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        assert!(matches!(
            cache.rand().await,
            Err(HostError::NoneAvailable("hub"))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_within_ttl() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let now = now_unix_secs();
        seed_host(&pool, "game", 1, now).await;

        let cache = HostCache::new(
            pool.clone(),
            HostTable::Game,
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        assert_eq!(cache.get(1).await.unwrap().id, 1);

        // A host added after the snapshot stays invisible until the TTL.
        seed_host(&pool, "game", 9, now).await;
        assert!(cache.get(9).await.is_err());
    }
}
