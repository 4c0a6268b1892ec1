//! Database bootstrap.
//!
//! SQLite through sqlx. The schema is created on startup if missing; the
//! `app` table is seeded by the operator, everything else is written by
//! the services themselves.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::model::AppRow;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS app (
        id   TEXT PRIMARY KEY,
        key  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS room (
        id            TEXT PRIMARY KEY,
        app_id        TEXT NOT NULL,
        host_id       INTEGER NOT NULL,
        number        INTEGER,
        search_group  INTEGER NOT NULL DEFAULT 0,
        max_players   INTEGER NOT NULL,
        players       INTEGER NOT NULL,
        visible       INTEGER NOT NULL,
        joinable      INTEGER NOT NULL,
        watchable     INTEGER NOT NULL,
        public_props  BLOB NOT NULL,
        private_props BLOB NOT NULL,
        created       INTEGER NOT NULL,
        UNIQUE (app_id, number)
    )",
    "CREATE INDEX IF NOT EXISTS room_search
        ON room (app_id, search_group, visible, joinable)",
    "CREATE TABLE IF NOT EXISTS game (
        id          INTEGER PRIMARY KEY,
        hostname    TEXT NOT NULL,
        public_name TEXT NOT NULL,
        grpc_port   INTEGER NOT NULL,
        ws_port     INTEGER NOT NULL,
        status      INTEGER NOT NULL,
        heartbeat   INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub (
        id          INTEGER PRIMARY KEY,
        hostname    TEXT NOT NULL,
        public_name TEXT NOT NULL,
        grpc_port   INTEGER NOT NULL,
        ws_port     INTEGER NOT NULL,
        status      INTEGER NOT NULL,
        heartbeat   INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS hub_watching (
        host_id  INTEGER NOT NULL,
        room_id  TEXT NOT NULL,
        watchers INTEGER NOT NULL,
        PRIMARY KEY (host_id, room_id)
    )",
];

/// Open a pool against `url` and make sure the schema exists.
///
/// An in-memory database exists per connection, so `:memory:` URLs are
/// pinned to a single pooled connection.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let max_connections = if url.contains(":memory:") { 1 } else { 16 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables if missing. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

/// Load the immutable per-process app registry.
pub async fn load_apps(pool: &SqlitePool) -> Result<Vec<AppRow>, sqlx::Error> {
    sqlx::query_as::<_, AppRow>("SELECT id, key FROM app")
        .fetch_all(pool)
        .await
}

/// Whether an error is a unique-constraint violation (safe to retry with a
/// fresh id/number) as opposed to any other database failure.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        sqlx::query("INSERT INTO app (id, key) VALUES ('testapp', 'secret')")
            .execute(&pool)
            .await
            .unwrap();
        let apps = load_apps(&pool).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].id, "testapp");
    }

    #[tokio::test]
    async fn test_unique_violation_detection() {
        let pool = connect("sqlite::memory:").await.unwrap();
        sqlx::query("INSERT INTO app (id, key) VALUES ('a', 'k')")
            .execute(&pool)
            .await
            .unwrap();
        let err = sqlx::query("INSERT INTO app (id, key) VALUES ('a', 'k')")
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let err = sqlx::query("INSERT INTO missing_table (x) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(!is_unique_violation(&err));
    }
}
