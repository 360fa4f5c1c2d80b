//! Shared state passed into every handler branch.

use std::sync::Arc;

use teloxide::types::Message;

use crate::core::error::AppResult;
use crate::session::SessionStore;
use crate::storage::db::DbPool;
use crate::storage::{get_connection, users};

/// Error type used across the dptree schema.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies injected into the dispatcher.
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub sessions: Arc<SessionStore>,
    /// Username from get_me, used to build t.me deep links.
    pub bot_username: String,
}

/// Minimal sender info extracted from an incoming message.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserInfo {
    pub fn from_message(msg: &Message) -> Option<UserInfo> {
        let user = msg.from.as_ref()?;
        Some(UserInfo {
            telegram_id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
        })
    }
}

/// Upsert the sender into the users table. Returns true when this is the
/// first time the user is seen.
pub fn ensure_user_exists(deps: &HandlerDeps, info: &UserInfo) -> AppResult<bool> {
    let conn = get_connection(&deps.db_pool)?;
    let created = users::find_by_telegram_id(&conn, info.telegram_id)?.is_none();
    users::find_or_create(
        &conn,
        info.telegram_id,
        info.first_name.as_deref(),
        info.last_name.as_deref(),
        info.username.as_deref(),
    )?;
    Ok(created)
}
