//! Admin notification fan-out.

use teloxide::prelude::*;

use crate::core::config;

/// Send a plain-text notification to every configured admin.
///
/// Delivery failures are logged per admin and do not stop the fan-out.
pub async fn notify_admins_text(bot: &Bot, text: &str) {
    let admin_ids = &*config::admin::ADMIN_IDS;
    if admin_ids.is_empty() {
        log::warn!("ADMIN_IDS is empty, notification not sent: {}", text);
        return;
    }

    for admin_id in admin_ids {
        if let Err(e) = bot.send_message(ChatId(*admin_id), text).await {
            log::error!("Failed to notify admin {}: {}", admin_id, e);
        }
    }
}

/// Notify admins that a new user started the bot.
pub async fn notify_admin_new_user(bot: &Bot, telegram_id: i64, username: Option<&str>, first_name: Option<&str>) {
    let username = username.map(|u| format!("@{}", u)).unwrap_or_else(|| "-".to_string());
    let first_name = first_name.unwrap_or("-");
    let text = format!(
        "👤 Yangi foydalanuvchi\n\nID: {}\nIsm: {}\nUsername: {}",
        telegram_id, first_name, username
    );
    notify_admins_text(bot, &text).await;
}
