//! Live membership updates: chat_member, my_chat_member, chat_join_request.
//!
//! These keep the per-user status rows and the channel counters current
//! without waiting for the user to press the check button.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatJoinRequest, ChatKind, ChatMemberUpdated};

use crate::storage::channels::{self, ChannelType, SubscriptionStatus};
use crate::storage::db::DbPool;
use crate::storage::{get_connection, users};
use crate::telegram::subscriptions::{apply_status_transition, kind_counts_as_joined};

/// Handle a chat_member update inside a mandatory channel.
pub async fn handle_chat_member_update(_bot: Bot, update: ChatMemberUpdated, pool: Arc<DbPool>) {
    let conn = match get_connection(&pool) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection for chat_member update: {}", e);
            return;
        }
    };

    let channel = match channels::find_mandatory_by_chat_id(&conn, update.chat.id.0) {
        Ok(Some(channel)) => channel,
        Ok(None) => return, // not a channel we gate on
        Err(e) => {
            log::error!("Failed to look up channel {}: {}", update.chat.id, e);
            return;
        }
    };

    let user_id = update.new_chat_member.user.id.0 as i64;
    let was_joined = kind_counts_as_joined(&update.old_chat_member.kind);
    let is_joined = kind_counts_as_joined(&update.new_chat_member.kind);
    if was_joined == is_joined {
        return;
    }

    let previous = channels::get_user_status(&conn, user_id, channel.id).unwrap_or(None);

    // A pending join request that turns into membership was approved.
    if is_joined && previous == Some(SubscriptionStatus::Requested) {
        if let Err(e) = channels::decrement_pending_requests(&conn, channel.id) {
            log::error!("Failed to decrement pending requests for channel {}: {}", channel.id, e);
        }
        if let Err(e) = channels::approve_join_requests(&conn, user_id, channel.id) {
            log::error!("Failed to approve join requests for user {}: {}", user_id, e);
        }
    }

    let status = if is_joined {
        SubscriptionStatus::Joined
    } else {
        SubscriptionStatus::Left
    };
    apply_status_transition(&conn, user_id, &channel, previous, status);
    log::info!(
        "User {} is now {} in channel {} ({})",
        user_id,
        status.as_str(),
        channel.id,
        channel.channel_name
    );
}

/// Handle a chat_join_request for an approval-gated channel.
pub async fn handle_chat_join_request(bot: Bot, request: ChatJoinRequest, pool: Arc<DbPool>) {
    let conn = match get_connection(&pool) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection for join request: {}", e);
            return;
        }
    };

    let channel = match channels::find_mandatory_by_chat_id(&conn, request.chat.id.0) {
        Ok(Some(channel)) => channel,
        Ok(None) => return,
        Err(e) => {
            log::error!("Failed to look up channel {}: {}", request.chat.id, e);
            return;
        }
    };

    let user_id = request.from.id.0 as i64;
    let previous = channels::get_user_status(&conn, user_id, channel.id).unwrap_or(None);
    if previous == Some(SubscriptionStatus::Requested) {
        return; // duplicate update
    }

    if let Err(e) = channels::set_user_status(&conn, user_id, channel.id, SubscriptionStatus::Requested) {
        log::error!("Failed to store requested status for user {}: {}", user_id, e);
        return;
    }
    if let Err(e) = channels::create_join_request(&conn, user_id, channel.id) {
        log::error!("Failed to record join request for user {}: {}", user_id, e);
    }
    if let Err(e) = channels::increment_pending_requests(&conn, channel.id) {
        log::error!("Failed to increment pending requests for channel {}: {}", channel.id, e);
    }
    log::info!(
        "Join request from user {} for channel {} ({})",
        user_id,
        channel.id,
        channel.channel_name
    );

    // For approval-gated channels the request already satisfies the gate,
    // so tell the user they can come back right away.
    if channel.channel_type == ChannelType::PrivateWithAdminApproval {
        let text = "✅ So'rovingiz qabul qilindi! Botga qaytib, \"Tekshirish\" tugmasini bosishingiz mumkin.";
        if let Err(e) = bot.send_message(ChatId(user_id), text).await {
            log::warn!("Failed to confirm join request to user {}: {}", user_id, e);
        }
    }
}

/// Handle my_chat_member updates: users blocking/unblocking the bot in
/// private chats, and the bot being removed from a mandatory channel.
pub async fn handle_my_chat_member_update(_bot: Bot, update: ChatMemberUpdated, pool: Arc<DbPool>) {
    let conn = match get_connection(&pool) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to get DB connection for my_chat_member update: {}", e);
            return;
        }
    };

    if matches!(update.chat.kind, ChatKind::Private(_)) {
        let user_id = update.chat.id.0;
        let blocked = !kind_counts_as_joined(&update.new_chat_member.kind);
        if let Err(e) = users::set_blocked(&conn, user_id, blocked) {
            log::error!("Failed to update blocked flag for user {}: {}", user_id, e);
        } else if blocked {
            log::info!("User {} blocked the bot", user_id);
        } else {
            log::info!("User {} unblocked the bot", user_id);
        }
        return;
    }

    // Bot removed from a mandatory channel: it can no longer verify
    // membership there, deactivate the channel.
    if !kind_counts_as_joined(&update.new_chat_member.kind) {
        if let Ok(Some(channel)) = channels::find_mandatory_by_chat_id(&conn, update.chat.id.0) {
            log::warn!(
                "Bot removed from mandatory channel {} ({}), deactivating",
                channel.id,
                channel.channel_name
            );
            if let Err(e) = channels::set_mandatory_active(&conn, channel.id, false) {
                log::error!("Failed to deactivate channel {}: {}", channel.id, e);
            }
        }
    }
}
