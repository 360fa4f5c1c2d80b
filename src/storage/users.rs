//! User rows: lookup, creation, premium and block flags.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Result};

use crate::storage::db::DbConnection;

/// A bot user as stored in the database.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_premium: bool,
    pub premium_expires_at: Option<String>,
    pub is_blocked: bool,
    pub is_premium_banned: bool,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        username: row.get(4)?,
        is_premium: row.get::<_, i64>(5)? != 0,
        premium_expires_at: row.get(6)?,
        is_blocked: row.get::<_, i64>(7)? != 0,
        is_premium_banned: row.get::<_, i64>(8)? != 0,
    })
}

const USER_COLUMNS: &str = "id, telegram_id, first_name, last_name, username, \
                            is_premium, premium_expires_at, is_blocked, is_premium_banned";

pub fn find_by_telegram_id(conn: &DbConnection, telegram_id: i64) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
        params![telegram_id],
        row_to_user,
    )
    .optional()
}

/// Find a user by telegram id, creating the row on first contact.
/// Name fields are refreshed on every call so renames show up.
pub fn find_or_create(
    conn: &DbConnection,
    telegram_id: i64,
    first_name: Option<&str>,
    last_name: Option<&str>,
    username: Option<&str>,
) -> Result<User> {
    conn.execute(
        "INSERT INTO users (telegram_id, first_name, last_name, username)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(telegram_id) DO UPDATE SET
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            username = excluded.username",
        params![telegram_id, first_name, last_name, username],
    )?;

    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
        params![telegram_id],
        row_to_user,
    )
}

/// Whether the user currently has an active premium subscription.
///
/// A set flag with an expiry in the past counts as expired; the flag is
/// cleared lazily on the next check.
pub fn is_premium_active(conn: &DbConnection, telegram_id: i64) -> Result<bool> {
    let Some(user) = find_by_telegram_id(conn, telegram_id)? else {
        return Ok(false);
    };
    if !user.is_premium {
        return Ok(false);
    }
    match user.premium_expires_at.as_deref().map(parse_timestamp) {
        Some(Some(expires)) if expires <= Utc::now() => {
            conn.execute(
                "UPDATE users SET is_premium = 0, premium_expires_at = NULL WHERE telegram_id = ?1",
                params![telegram_id],
            )?;
            Ok(false)
        }
        // No expiry recorded means a perpetual grant
        _ => Ok(true),
    }
}

/// Grant (or extend) premium for the given number of days.
///
/// Extension stacks: an active subscription is extended from its current
/// expiry, an expired or missing one starts from now.
pub fn grant_premium(conn: &DbConnection, telegram_id: i64, duration_days: i64) -> Result<String> {
    let now = Utc::now();
    let base = find_by_telegram_id(conn, telegram_id)?
        .and_then(|u| u.premium_expires_at.as_deref().and_then(parse_timestamp))
        .filter(|expires| *expires > now)
        .unwrap_or(now);
    let expires_at = (base + Duration::days(duration_days)).to_rfc3339();

    conn.execute(
        "UPDATE users SET is_premium = 1, premium_expires_at = ?2 WHERE telegram_id = ?1",
        params![telegram_id, expires_at],
    )?;
    Ok(expires_at)
}

pub fn set_blocked(conn: &DbConnection, telegram_id: i64, blocked: bool) -> Result<()> {
    conn.execute(
        "UPDATE users SET is_blocked = ?2 WHERE telegram_id = ?1",
        params![telegram_id, blocked as i64],
    )?;
    Ok(())
}

pub fn set_premium_banned(conn: &DbConnection, telegram_id: i64, banned: bool) -> Result<()> {
    conn.execute(
        "UPDATE users SET is_premium_banned = ?2 WHERE telegram_id = ?1",
        params![telegram_id, banned as i64],
    )?;
    Ok(())
}

pub fn count_users(conn: &DbConnection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
}

/// Count users whose premium is currently active. A set flag with no expiry
/// is a perpetual grant and counts too.
pub fn count_premium_users(conn: &DbConnection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM users
         WHERE is_premium = 1
           AND (premium_expires_at IS NULL OR premium_expires_at > ?1)",
        params![Utc::now().to_rfc3339()],
        |row| row.get(0),
    )
}

/// Whether the user was added to the admins table at runtime.
pub fn is_dynamic_admin(conn: &DbConnection, telegram_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM admins WHERE telegram_id = ?1",
        params![telegram_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn add_admin(conn: &DbConnection, telegram_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO admins (telegram_id) VALUES (?1)",
        params![telegram_id],
    )?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::{create_pool, get_connection};
    use pretty_assertions::assert_eq;

    fn test_conn() -> (tempfile::TempDir, DbConnection) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();
        (dir, conn)
    }

    #[test]
    fn find_or_create_refreshes_names() {
        let (_dir, conn) = test_conn();
        let created = find_or_create(&conn, 42, Some("Ali"), None, Some("ali")).unwrap();
        assert_eq!(created.first_name.as_deref(), Some("Ali"));

        let updated = find_or_create(&conn, 42, Some("Vali"), None, Some("vali")).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.first_name.as_deref(), Some("Vali"));
        assert_eq!(updated.username.as_deref(), Some("vali"));
    }

    #[test]
    fn premium_grant_extends_active_subscription() {
        let (_dir, conn) = test_conn();
        find_or_create(&conn, 42, Some("Ali"), None, None).unwrap();

        let first = grant_premium(&conn, 42, 30).unwrap();
        let second = grant_premium(&conn, 42, 30).unwrap();

        let first_dt = DateTime::parse_from_rfc3339(&first).unwrap();
        let second_dt = DateTime::parse_from_rfc3339(&second).unwrap();
        let gap = second_dt - first_dt;
        assert!(gap >= Duration::days(29) && gap <= Duration::days(31));
        assert!(is_premium_active(&conn, 42).unwrap());
    }

    #[test]
    fn expired_premium_is_cleared_lazily() {
        let (_dir, conn) = test_conn();
        find_or_create(&conn, 42, Some("Ali"), None, None).unwrap();

        let past = (Utc::now() - Duration::days(1)).to_rfc3339();
        conn.execute(
            "UPDATE users SET is_premium = 1, premium_expires_at = ?1 WHERE telegram_id = 42",
            params![past],
        )
        .unwrap();

        assert!(!is_premium_active(&conn, 42).unwrap());
        let user = find_by_telegram_id(&conn, 42).unwrap().unwrap();
        assert!(!user.is_premium);
        assert_eq!(user.premium_expires_at, None);
    }

    #[test]
    fn premium_count_includes_perpetual_grants() {
        let (_dir, conn) = test_conn();
        find_or_create(&conn, 1, Some("Active"), None, None).unwrap();
        find_or_create(&conn, 2, Some("Perpetual"), None, None).unwrap();
        find_or_create(&conn, 3, Some("Expired"), None, None).unwrap();
        find_or_create(&conn, 4, Some("Free"), None, None).unwrap();

        grant_premium(&conn, 1, 30).unwrap();
        conn.execute(
            "UPDATE users SET is_premium = 1, premium_expires_at = NULL WHERE telegram_id = 2",
            [],
        )
        .unwrap();
        let past = (Utc::now() - Duration::days(1)).to_rfc3339();
        conn.execute(
            "UPDATE users SET is_premium = 1, premium_expires_at = ?1 WHERE telegram_id = 3",
            params![past],
        )
        .unwrap();

        assert_eq!(count_premium_users(&conn).unwrap(), 2);
    }

    #[test]
    fn unknown_user_is_not_premium() {
        let (_dir, conn) = test_conn();
        assert!(!is_premium_active(&conn, 999).unwrap());
    }
}
