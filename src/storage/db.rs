use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Result;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and brings the
/// schema up to date.
///
/// # Arguments
///
/// * `database_path` - Path to SQLite database file
///
/// # Returns
///
/// Returns a `DbPool` on success or an `r2d2::Error` if pool creation fails.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    // Ensure schema is up to date on first connection
    let conn = pool.get()?;
    if let Err(e) = init_schema(&conn) {
        log::warn!("Failed to initialize schema: {}", e);
    }
    if let Err(e) = migrate_schema(&conn) {
        log::warn!("Failed to migrate schema: {}", e);
        // Don't fail on migration errors, as they might be expected
    }

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Create all tables if they don't exist yet
fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            telegram_id INTEGER NOT NULL UNIQUE,
            first_name TEXT,
            last_name TEXT,
            username TEXT,
            is_premium INTEGER NOT NULL DEFAULT 0,
            premium_expires_at TEXT,
            is_blocked INTEGER NOT NULL DEFAULT 0,
            is_premium_banned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS mandatory_channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id TEXT,
            channel_name TEXT NOT NULL,
            channel_link TEXT NOT NULL,
            channel_type TEXT NOT NULL DEFAULT 'PUBLIC',
            is_active INTEGER NOT NULL DEFAULT 1,
            position INTEGER NOT NULL DEFAULT 0,
            member_limit INTEGER,
            current_members INTEGER NOT NULL DEFAULT 0,
            pending_requests INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS database_channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id TEXT NOT NULL,
            channel_name TEXT NOT NULL,
            channel_link TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_channel_status (
            user_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('joined', 'left', 'requested')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, channel_id),
            FOREIGN KEY (channel_id) REFERENCES mandatory_channels(id)
        );

        CREATE TABLE IF NOT EXISTS channel_join_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (channel_id) REFERENCES mandatory_channels(id)
        );

        CREATE TABLE IF NOT EXISTS fields (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            channel_id TEXT,
            channel_link TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS movies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code INTEGER NOT NULL UNIQUE,
            title TEXT NOT NULL,
            genre TEXT,
            description TEXT,
            field_id INTEGER,
            poster_file_id TEXT,
            video_file_id TEXT,
            total_parts INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (field_id) REFERENCES fields(id)
        );

        CREATE TABLE IF NOT EXISTS movie_episodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            movie_id INTEGER NOT NULL,
            part_number INTEGER NOT NULL,
            video_file_id TEXT NOT NULL,
            UNIQUE (movie_id, part_number),
            FOREIGN KEY (movie_id) REFERENCES movies(id)
        );

        CREATE TABLE IF NOT EXISTS serials (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code INTEGER NOT NULL UNIQUE,
            title TEXT NOT NULL,
            genre TEXT,
            description TEXT,
            field_id INTEGER,
            poster_file_id TEXT,
            total_episodes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (field_id) REFERENCES fields(id)
        );

        CREATE TABLE IF NOT EXISTS episodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            serial_id INTEGER NOT NULL,
            episode_number INTEGER NOT NULL,
            video_file_id TEXT NOT NULL,
            UNIQUE (serial_id, episode_number),
            FOREIGN KEY (serial_id) REFERENCES serials(id)
        );

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            duration_days INTEGER NOT NULL,
            provider TEXT NOT NULL DEFAULT 'manual',
            receipt_file_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            payme_transaction_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS admins (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            telegram_id INTEGER NOT NULL UNIQUE,
            name TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS premium_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            monthly_price INTEGER NOT NULL,
            quarterly_price INTEGER NOT NULL,
            half_year_price INTEGER NOT NULL,
            yearly_price INTEGER NOT NULL,
            card_number TEXT,
            card_holder TEXT
        );

        CREATE TABLE IF NOT EXISTS watch_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            movie_id INTEGER,
            serial_id INTEGER,
            watched_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_user_channel_status_user
            ON user_channel_status(user_id);
        CREATE INDEX IF NOT EXISTS idx_payments_user
            ON payments(user_id);
        CREATE INDEX IF NOT EXISTS idx_watch_history_user
            ON watch_history(user_id);
        ",
    )?;
    Ok(())
}

/// Migrate database schema to ensure all required columns exist
/// This function safely adds missing columns to existing tables
fn migrate_schema(conn: &rusqlite::Connection) -> Result<()> {
    let users_columns = table_columns(conn, "users")?;

    // is_premium_banned arrived after the first deployments
    if !users_columns.contains(&"is_premium_banned".to_string()) {
        log::info!("Adding missing column: is_premium_banned to users table");
        if let Err(e) = conn.execute(
            "ALTER TABLE users ADD COLUMN is_premium_banned INTEGER NOT NULL DEFAULT 0",
            [],
        ) {
            log::warn!("Failed to add is_premium_banned column: {}", e);
        }
    }

    let channel_columns = table_columns(conn, "mandatory_channels")?;

    // member_limit / counters were added once approval-gated channels appeared
    for (column, ddl) in [
        ("member_limit", "ALTER TABLE mandatory_channels ADD COLUMN member_limit INTEGER"),
        (
            "current_members",
            "ALTER TABLE mandatory_channels ADD COLUMN current_members INTEGER NOT NULL DEFAULT 0",
        ),
        (
            "pending_requests",
            "ALTER TABLE mandatory_channels ADD COLUMN pending_requests INTEGER NOT NULL DEFAULT 0",
        ),
        (
            "position",
            "ALTER TABLE mandatory_channels ADD COLUMN position INTEGER NOT NULL DEFAULT 0",
        ),
    ] {
        if !channel_columns.contains(&column.to_string()) {
            log::info!("Adding missing column: {} to mandatory_channels table", column);
            if let Err(e) = conn.execute(ddl, []) {
                log::warn!("Failed to add {} column: {}", column, e);
            }
        }
    }

    Ok(())
}

fn table_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pool_initializes_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = create_pool(path.to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('users', 'mandatory_channels', 'movies', 'serials', 'payments')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_migrate_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = create_pool(path.to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();

        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();

        let columns = table_columns(&conn, "mandatory_channels").unwrap();
        assert!(columns.contains(&"member_limit".to_string()));
        assert!(columns.contains(&"pending_requests".to_string()));
    }
}
