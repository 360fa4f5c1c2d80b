//! Mandatory and database channels, per-user subscription status, join
//! requests, and the member/pending counters.

use rusqlite::{params, OptionalExtension, Result};

use crate::storage::db::DbConnection;

/// How a mandatory channel is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Public channel, membership checked via get_chat_member
    Public,
    /// Private channel the bot administers, checked via get_chat_member
    Private,
    /// Private channel where a pending join request already counts
    PrivateWithAdminApproval,
    /// Link the bot cannot verify (another bot, external site)
    External,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Public => "PUBLIC",
            ChannelType::Private => "PRIVATE",
            ChannelType::PrivateWithAdminApproval => "PRIVATE_WITH_ADMIN_APPROVAL",
            ChannelType::External => "EXTERNAL",
        }
    }

    pub fn parse(raw: &str) -> ChannelType {
        match raw {
            "PRIVATE" => ChannelType::Private,
            "PRIVATE_WITH_ADMIN_APPROVAL" => ChannelType::PrivateWithAdminApproval,
            "EXTERNAL" => ChannelType::External,
            _ => ChannelType::Public,
        }
    }
}

/// Per-user membership state for one mandatory channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Joined,
    Left,
    Requested,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Joined => "joined",
            SubscriptionStatus::Left => "left",
            SubscriptionStatus::Requested => "requested",
        }
    }

    pub fn parse(raw: &str) -> SubscriptionStatus {
        match raw {
            "joined" => SubscriptionStatus::Joined,
            "requested" => SubscriptionStatus::Requested,
            _ => SubscriptionStatus::Left,
        }
    }

    /// Whether this state satisfies the subscription gate.
    pub fn satisfies_gate(self) -> bool {
        matches!(self, SubscriptionStatus::Joined | SubscriptionStatus::Requested)
    }
}

#[derive(Debug, Clone)]
pub struct MandatoryChannel {
    pub id: i64,
    /// Telegram chat id as string, None for EXTERNAL links
    pub channel_id: Option<String>,
    pub channel_name: String,
    pub channel_link: String,
    pub channel_type: ChannelType,
    pub is_active: bool,
    pub position: i64,
    pub member_limit: Option<i64>,
    pub current_members: i64,
    pub pending_requests: i64,
}

#[derive(Debug, Clone)]
pub struct DatabaseChannel {
    pub id: i64,
    pub channel_id: String,
    pub channel_name: String,
    pub channel_link: Option<String>,
    pub is_active: bool,
}

fn row_to_mandatory(row: &rusqlite::Row<'_>) -> Result<MandatoryChannel> {
    Ok(MandatoryChannel {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        channel_name: row.get(2)?,
        channel_link: row.get(3)?,
        channel_type: ChannelType::parse(&row.get::<_, String>(4)?),
        is_active: row.get::<_, i64>(5)? != 0,
        position: row.get(6)?,
        member_limit: row.get(7)?,
        current_members: row.get(8)?,
        pending_requests: row.get(9)?,
    })
}

const MANDATORY_COLUMNS: &str = "id, channel_id, channel_name, channel_link, channel_type, \
                                 is_active, position, member_limit, current_members, pending_requests";

/// Active mandatory channels in display order. The gate iterates this list.
pub fn find_all_mandatory(conn: &DbConnection) -> Result<Vec<MandatoryChannel>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MANDATORY_COLUMNS} FROM mandatory_channels
         WHERE is_active = 1 ORDER BY position, id"
    ))?;
    let rows = stmt.query_map([], row_to_mandatory)?;
    rows.collect()
}

/// All mandatory channels including deactivated ones, for the admin panel.
pub fn find_all_mandatory_with_inactive(conn: &DbConnection) -> Result<Vec<MandatoryChannel>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MANDATORY_COLUMNS} FROM mandatory_channels ORDER BY position, id"
    ))?;
    let rows = stmt.query_map([], row_to_mandatory)?;
    rows.collect()
}

pub fn find_mandatory_by_id(conn: &DbConnection, id: i64) -> Result<Option<MandatoryChannel>> {
    conn.query_row(
        &format!("SELECT {MANDATORY_COLUMNS} FROM mandatory_channels WHERE id = ?1"),
        params![id],
        row_to_mandatory,
    )
    .optional()
}

/// Look up a mandatory channel by its Telegram chat id.
pub fn find_mandatory_by_chat_id(conn: &DbConnection, chat_id: i64) -> Result<Option<MandatoryChannel>> {
    conn.query_row(
        &format!("SELECT {MANDATORY_COLUMNS} FROM mandatory_channels WHERE channel_id = ?1"),
        params![chat_id.to_string()],
        row_to_mandatory,
    )
    .optional()
}

pub fn create_mandatory_channel(
    conn: &DbConnection,
    channel_id: Option<&str>,
    channel_name: &str,
    channel_link: &str,
    channel_type: ChannelType,
    member_limit: Option<i64>,
) -> Result<i64> {
    let position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM mandatory_channels",
        [],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO mandatory_channels
            (channel_id, channel_name, channel_link, channel_type, member_limit, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            channel_id,
            channel_name,
            channel_link,
            channel_type.as_str(),
            member_limit,
            position
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_mandatory_active(conn: &DbConnection, id: i64, active: bool) -> Result<()> {
    conn.execute(
        "UPDATE mandatory_channels SET is_active = ?2 WHERE id = ?1",
        params![id, active as i64],
    )?;
    Ok(())
}

pub fn delete_mandatory_channel(conn: &DbConnection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM user_channel_status WHERE channel_id = ?1", params![id])?;
    conn.execute("DELETE FROM channel_join_requests WHERE channel_id = ?1", params![id])?;
    conn.execute("DELETE FROM mandatory_channels WHERE id = ?1", params![id])?;
    Ok(())
}

/// Reassign positions to match the given id order, in one transaction.
pub fn reorder_mandatory_channels(conn: &mut DbConnection, ordered_ids: &[i64]) -> Result<()> {
    let tx = conn.transaction()?;
    for (index, id) in ordered_ids.iter().enumerate() {
        tx.execute(
            "UPDATE mandatory_channels SET position = ?2 WHERE id = ?1",
            params![id, index as i64],
        )?;
    }
    tx.commit()
}

/// Bump the member counter. When a member limit is set and reached, the
/// channel deactivates itself so new users stop being sent to it.
pub fn increment_member_count(conn: &DbConnection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE mandatory_channels SET current_members = current_members + 1 WHERE id = ?1",
        params![id],
    )?;
    conn.execute(
        "UPDATE mandatory_channels SET is_active = 0
         WHERE id = ?1 AND member_limit IS NOT NULL AND current_members >= member_limit",
        params![id],
    )?;
    Ok(())
}

pub fn decrement_member_count(conn: &DbConnection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE mandatory_channels
         SET current_members = MAX(current_members - 1, 0) WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn increment_pending_requests(conn: &DbConnection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE mandatory_channels SET pending_requests = pending_requests + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn decrement_pending_requests(conn: &DbConnection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE mandatory_channels
         SET pending_requests = MAX(pending_requests - 1, 0) WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Stored membership state for one (user, channel) pair.
pub fn get_user_status(
    conn: &DbConnection,
    user_id: i64,
    channel_id: i64,
) -> Result<Option<SubscriptionStatus>> {
    conn.query_row(
        "SELECT status FROM user_channel_status WHERE user_id = ?1 AND channel_id = ?2",
        params![user_id, channel_id],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|opt| opt.as_deref().map(SubscriptionStatus::parse))
}

pub fn set_user_status(
    conn: &DbConnection,
    user_id: i64,
    channel_id: i64,
    status: SubscriptionStatus,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_channel_status (user_id, channel_id, status, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(user_id, channel_id) DO UPDATE SET
            status = excluded.status,
            updated_at = excluded.updated_at",
        params![user_id, channel_id, status.as_str()],
    )?;
    Ok(())
}

pub fn create_join_request(conn: &DbConnection, user_id: i64, channel_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO channel_join_requests (user_id, channel_id) VALUES (?1, ?2)",
        params![user_id, channel_id],
    )?;
    Ok(())
}

pub fn approve_join_requests(conn: &DbConnection, user_id: i64, channel_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE channel_join_requests SET status = 'approved'
         WHERE user_id = ?1 AND channel_id = ?2 AND status = 'pending'",
        params![user_id, channel_id],
    )?;
    Ok(())
}

pub fn has_pending_request(conn: &DbConnection, user_id: i64, channel_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM channel_join_requests
         WHERE user_id = ?1 AND channel_id = ?2 AND status = 'pending'",
        params![user_id, channel_id],
    |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_database_channel(row: &rusqlite::Row<'_>) -> Result<DatabaseChannel> {
    Ok(DatabaseChannel {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        channel_name: row.get(2)?,
        channel_link: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
    })
}

pub fn find_active_database_channels(conn: &DbConnection) -> Result<Vec<DatabaseChannel>> {
    let mut stmt = conn.prepare(
        "SELECT id, channel_id, channel_name, channel_link, is_active
         FROM database_channels WHERE is_active = 1 ORDER BY id",
    )?;
    let rows = stmt.query_map([], row_to_database_channel)?;
    rows.collect()
}

pub fn create_database_channel(
    conn: &DbConnection,
    channel_id: &str,
    channel_name: &str,
    channel_link: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO database_channels (channel_id, channel_name, channel_link) VALUES (?1, ?2, ?3)",
        params![channel_id, channel_name, channel_link],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count_database_channels(conn: &DbConnection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM database_channels", [], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::{create_pool, get_connection, DbPool};
    use pretty_assertions::assert_eq;

    fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[test]
    fn inactive_channels_are_excluded_from_gate_list() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();

        let a = create_mandatory_channel(&conn, Some("-100"), "A", "https://t.me/a", ChannelType::Public, None).unwrap();
        let b = create_mandatory_channel(&conn, Some("-200"), "B", "https://t.me/b", ChannelType::Public, None).unwrap();
        set_mandatory_active(&conn, a, false).unwrap();

        let active = find_all_mandatory(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b);

        let all = find_all_mandatory_with_inactive(&conn).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn member_limit_deactivates_channel() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();

        let id = create_mandatory_channel(&conn, Some("-1"), "A", "https://t.me/a", ChannelType::Private, Some(2)).unwrap();
        increment_member_count(&conn, id).unwrap();
        assert!(find_mandatory_by_id(&conn, id).unwrap().unwrap().is_active);

        increment_member_count(&conn, id).unwrap();
        let channel = find_mandatory_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(channel.current_members, 2);
        assert!(!channel.is_active);
    }

    #[test]
    fn pending_requests_never_go_negative() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();

        let id = create_mandatory_channel(
            &conn,
            Some("-1"),
            "A",
            "https://t.me/a",
            ChannelType::PrivateWithAdminApproval,
            None,
        )
        .unwrap();
        decrement_pending_requests(&conn, id).unwrap();
        increment_pending_requests(&conn, id).unwrap();
        decrement_pending_requests(&conn, id).unwrap();
        decrement_pending_requests(&conn, id).unwrap();

        let channel = find_mandatory_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(channel.pending_requests, 0);
    }

    #[test]
    fn reorder_assigns_sequential_positions() {
        let (_dir, pool) = test_pool();
        let mut conn = get_connection(&pool).unwrap();

        let a = create_mandatory_channel(&conn, None, "A", "https://t.me/a", ChannelType::Public, None).unwrap();
        let b = create_mandatory_channel(&conn, None, "B", "https://t.me/b", ChannelType::Public, None).unwrap();
        let c = create_mandatory_channel(&conn, None, "C", "https://t.me/c", ChannelType::Public, None).unwrap();

        reorder_mandatory_channels(&mut conn, &[c, a, b]).unwrap();

        let order: Vec<i64> = find_all_mandatory(&conn).unwrap().iter().map(|ch| ch.id).collect();
        assert_eq!(order, vec![c, a, b]);
    }

    #[test]
    fn user_status_upsert_overwrites() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();

        let ch = create_mandatory_channel(&conn, Some("-1"), "A", "https://t.me/a", ChannelType::Public, None).unwrap();
        set_user_status(&conn, 7, ch, SubscriptionStatus::Requested).unwrap();
        set_user_status(&conn, 7, ch, SubscriptionStatus::Joined).unwrap();

        assert_eq!(get_user_status(&conn, 7, ch).unwrap(), Some(SubscriptionStatus::Joined));
        assert_eq!(get_user_status(&conn, 8, ch).unwrap(), None);
    }

    #[test]
    fn subscription_status_gate_semantics() {
        assert!(SubscriptionStatus::Joined.satisfies_gate());
        assert!(SubscriptionStatus::Requested.satisfies_gate());
        assert!(!SubscriptionStatus::Left.satisfies_gate());
    }
}
