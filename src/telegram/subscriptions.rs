//! Mandatory-channel gating and membership reconciliation.
//!
//! The gate runs on /start and on the "check subscription" button: every
//! active mandatory channel is checked against the live Telegram API, the
//! per-user status row is upserted, and the member counters are adjusted on
//! transitions. A pending join request satisfies the gate for
//! approval-gated channels.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup};

use crate::core::error::AppResult;
use crate::storage::channels::{self, ChannelType, MandatoryChannel, SubscriptionStatus};
use crate::storage::db::{DbConnection, DbPool};
use crate::storage::get_connection;

/// Callback data for the "check subscription" button.
pub const CHECK_SUBSCRIPTION: &str = "check_subscription";

/// Whether a live Telegram membership state counts as joined.
///
/// Restricted users still inside the chat count; left and banned do not.
pub fn kind_counts_as_joined(kind: &ChatMemberKind) -> bool {
    match kind {
        ChatMemberKind::Restricted(restricted) => restricted.is_member,
        ChatMemberKind::Left => false,
        ChatMemberKind::Banned { .. } => false,
        _ => true,
    }
}

/// Merge a live membership check with the stored status.
///
/// A user who is not currently a member keeps a previously recorded
/// `requested` status: their join request is still pending and satisfies
/// the gate for approval-gated channels.
pub fn reconcile_status(is_member_now: bool, previous: Option<SubscriptionStatus>) -> SubscriptionStatus {
    if is_member_now {
        SubscriptionStatus::Joined
    } else if previous == Some(SubscriptionStatus::Requested) {
        SubscriptionStatus::Requested
    } else {
        SubscriptionStatus::Left
    }
}

/// Reconcile one channel for one user and persist the result.
///
/// API failures are treated as "not subscribed" for this channel so a broken
/// channel cannot wave users through the gate.
pub async fn sync_channel_status(
    bot: &Bot,
    conn: &DbConnection,
    user_id: i64,
    channel: &MandatoryChannel,
) -> SubscriptionStatus {
    let previous = channels::get_user_status(conn, user_id, channel.id).unwrap_or(None);

    // External links cannot be verified through the Bot API; the stored
    // status (set optimistically when the user presses the check button)
    // is all we have.
    if channel.channel_type == ChannelType::External {
        return previous.unwrap_or(SubscriptionStatus::Left);
    }

    let is_member_now = match channel.channel_id.as_deref().and_then(|id| id.parse::<i64>().ok()) {
        Some(chat_id) => match bot.get_chat_member(ChatId(chat_id), UserId(user_id as u64)).await {
            Ok(member) => kind_counts_as_joined(&member.kind),
            Err(e) => {
                log::warn!(
                    "get_chat_member failed for channel {} ({}): {}",
                    channel.id,
                    channel.channel_name,
                    e
                );
                false
            }
        },
        None => {
            log::warn!(
                "Mandatory channel {} ({}) has no usable chat id",
                channel.id,
                channel.channel_name
            );
            false
        }
    };

    let status = reconcile_status(is_member_now, previous);
    apply_status_transition(conn, user_id, channel, previous, status);
    status
}

/// Persist a status change and keep the channel counters in step.
pub(crate) fn apply_status_transition(
    conn: &DbConnection,
    user_id: i64,
    channel: &MandatoryChannel,
    previous: Option<SubscriptionStatus>,
    status: SubscriptionStatus,
) {
    if previous == Some(status) {
        return;
    }
    if let Err(e) = channels::set_user_status(conn, user_id, channel.id, status) {
        log::error!("Failed to store status for user {} channel {}: {}", user_id, channel.id, e);
        return;
    }

    let was_joined = previous == Some(SubscriptionStatus::Joined);
    let is_joined = status == SubscriptionStatus::Joined;
    let result = if is_joined && !was_joined {
        channels::increment_member_count(conn, channel.id)
    } else if was_joined && !is_joined {
        channels::decrement_member_count(conn, channel.id)
    } else {
        Ok(())
    };
    if let Err(e) = result {
        log::error!("Failed to adjust member counter for channel {}: {}", channel.id, e);
    }
}

/// Channels the user still has to deal with before content is served.
pub async fn unsatisfied_channels(bot: &Bot, pool: &Arc<DbPool>, user_id: i64) -> AppResult<Vec<MandatoryChannel>> {
    let conn = get_connection(pool)?;
    let mandatory = channels::find_all_mandatory(&conn)?;

    let mut missing = Vec::new();
    for channel in mandatory {
        let status = sync_channel_status(bot, &conn, user_id, &channel).await;
        if !status.satisfies_gate() {
            missing.push(channel);
        }
    }
    Ok(missing)
}

/// Mark every external channel as satisfied for this user.
///
/// Called when the user presses the check button: external links cannot be
/// verified, so pressing the button is taken at face value.
pub fn accept_external_channels(conn: &DbConnection, user_id: i64) -> AppResult<()> {
    for channel in channels::find_all_mandatory(conn)? {
        if channel.channel_type == ChannelType::External {
            let previous = channels::get_user_status(conn, user_id, channel.id)?;
            if previous != Some(SubscriptionStatus::Joined) {
                channels::set_user_status(conn, user_id, channel.id, SubscriptionStatus::Joined)?;
            }
        }
    }
    Ok(())
}

/// One url button per missing channel plus the check button.
pub fn subscription_keyboard(missing: &[MandatoryChannel]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::with_capacity(missing.len() + 1);
    for channel in missing {
        let button = match url::Url::parse(&channel.channel_link) {
            Ok(url) => InlineKeyboardButton::url(format!("➕ {}", channel.channel_name), url),
            Err(_) => InlineKeyboardButton::callback(channel.channel_name.clone(), CHECK_SUBSCRIPTION.to_string()),
        };
        rows.push(vec![button]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "✅ Tekshirish".to_string(),
        CHECK_SUBSCRIPTION.to_string(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// Ask the user to join the listed channels.
pub async fn send_subscription_prompt(bot: &Bot, chat_id: ChatId, missing: &[MandatoryChannel]) -> AppResult<()> {
    bot.send_message(
        chat_id,
        "🔒 Botdan foydalanish uchun quyidagi kanallarga obuna bo'ling va \"Tekshirish\" tugmasini bosing:",
    )
    .reply_markup(subscription_keyboard(missing))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn joined_wins_over_any_previous_state() {
        assert_eq!(reconcile_status(true, None), SubscriptionStatus::Joined);
        assert_eq!(
            reconcile_status(true, Some(SubscriptionStatus::Left)),
            SubscriptionStatus::Joined
        );
        assert_eq!(
            reconcile_status(true, Some(SubscriptionStatus::Requested)),
            SubscriptionStatus::Joined
        );
    }

    #[test]
    fn pending_request_survives_a_negative_check() {
        assert_eq!(
            reconcile_status(false, Some(SubscriptionStatus::Requested)),
            SubscriptionStatus::Requested
        );
    }

    #[test]
    fn absent_user_maps_to_left() {
        assert_eq!(reconcile_status(false, None), SubscriptionStatus::Left);
        assert_eq!(
            reconcile_status(false, Some(SubscriptionStatus::Joined)),
            SubscriptionStatus::Left
        );
    }
}
