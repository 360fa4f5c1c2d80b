//! Premium sales: plan menu, Payme checkout, manual receipts, and the
//! admin approve/reject flow.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile};

use crate::core::config;
use crate::core::error::AppResult;
use crate::payme;
use crate::session::{PendingReceipt, SessionStore};
use crate::storage::db::DbPool;
use crate::storage::payments::{self, PaymentStatus, PremiumSettings};
use crate::storage::{get_connection, users};

/// Offered plan durations in days.
pub const PLAN_DURATIONS: [i64; 4] = [30, 90, 180, 365];

fn plan_label(days: i64) -> &'static str {
    match days {
        30 => "1 oy",
        90 => "3 oy",
        180 => "6 oy",
        365 => "1 yil",
        _ => "?",
    }
}

fn settings_or_defaults(settings: Option<PremiumSettings>) -> PremiumSettings {
    settings.unwrap_or_else(|| PremiumSettings {
        monthly_price: *config::premium::MONTHLY,
        quarterly_price: *config::premium::QUARTERLY,
        half_year_price: *config::premium::HALF_YEAR,
        yearly_price: *config::premium::YEARLY,
        card_number: Some(config::premium::CARD_NUMBER.clone()),
        card_holder: Some(config::premium::CARD_HOLDER.clone()),
    })
}

/// Plan selection keyboard.
pub fn premium_keyboard(settings: &PremiumSettings) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    for days in PLAN_DURATIONS {
        if let Some(price) = settings.price_for_days(days) {
            rows.push(vec![InlineKeyboardButton::callback(
                format!("{} — {} so'm", plan_label(days), price),
                format!("buy_premium_{}", days),
            )]);
        }
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 Orqaga".to_string(),
        "back_to_main".to_string(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// Show the premium menu with current status and plan buttons.
pub async fn show_premium_menu(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId, user_id: i64) -> AppResult<()> {
    let conn = get_connection(pool)?;

    if let Some(user) = users::find_by_telegram_id(&conn, user_id)? {
        if user.is_premium_banned {
            bot.send_message(chat_id, "❌ Sizga premium xizmati cheklangan.").await?;
            return Ok(());
        }
    }

    let settings = settings_or_defaults(payments::get_premium_settings(&conn)?);
    let mut text = String::from(
        "⭐ Premium obuna\n\nPremium foydalanuvchilar majburiy kanallarga obuna bo'lmasdan \
         barcha kinolarni ko'rishlari mumkin.\n\nTarifni tanlang:",
    );
    if users::is_premium_active(&conn, user_id)? {
        if let Some(user) = users::find_by_telegram_id(&conn, user_id)? {
            if let Some(expires) = user.premium_expires_at.as_deref() {
                text = format!("⭐ Sizda premium obuna faol!\nTugash sanasi: {}\n\nUzaytirish uchun tarifni tanlang:", expires);
            }
        }
    }

    bot.send_message(chat_id, text)
        .reply_markup(premium_keyboard(&settings))
        .await?;
    Ok(())
}

/// Plan chosen: show the Payme link and the manual receipt option.
pub async fn handle_buy_premium(
    bot: &Bot,
    pool: &Arc<DbPool>,
    chat_id: ChatId,
    user_id: i64,
    duration_days: i64,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let settings = settings_or_defaults(payments::get_premium_settings(&conn)?);
    let Some(price) = settings.price_for_days(duration_days) else {
        bot.send_message(chat_id, "❌ Bunday tarif mavjud emas.").await?;
        return Ok(());
    };

    let payment_id = payments::create_payment(&conn, user_id, price, duration_days, "payme", None)?;
    let link = payme::checkout_link(&config::payme::ENDPOINT, &config::payme::MERCHANT_ID, payment_id, price);

    let card = settings.card_number.as_deref().unwrap_or("-");
    let holder = settings.card_holder.as_deref().unwrap_or("-");
    let text = format!(
        "💳 {} tarifi — {} so'm\n\n\
         1️⃣ Payme orqali to'lang (tugma pastda), yoki\n\
         2️⃣ Kartaga o'tkazib, chek rasmini yuboring:\n\n\
         Karta: {}\nEgasi: {}",
        plan_label(duration_days),
        price,
        card,
        holder
    );

    let mut rows = Vec::new();
    if let Ok(url) = url::Url::parse(&link) {
        rows.push(vec![InlineKeyboardButton::url("💳 Payme orqali to'lash".to_string(), url)]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "🧾 Chek yuborish".to_string(),
        format!("upload_receipt_{}", duration_days),
    )]);
    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 Orqaga".to_string(),
        "show_premium".to_string(),
    )]);

    bot.send_message(chat_id, text)
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

/// "Upload receipt" pressed: remember what they are paying for and ask for
/// the photo.
pub async fn handle_upload_receipt_prompt(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    chat_id: ChatId,
    user_id: i64,
    duration_days: i64,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let settings = settings_or_defaults(payments::get_premium_settings(&conn)?);
    let Some(price) = settings.price_for_days(duration_days) else {
        bot.send_message(chat_id, "❌ Bunday tarif mavjud emas.").await?;
        return Ok(());
    };

    sessions.set_pending_receipt(
        user_id,
        PendingReceipt {
            amount: price,
            duration_days,
        },
    );
    bot.send_message(chat_id, "🧾 To'lov chekining rasmini yuboring.").await?;
    Ok(())
}

/// A photo arrived from a user we are waiting on: record the payment and
/// send it to the admins with approve/reject buttons.
pub async fn handle_receipt_photo(bot: &Bot, pool: &Arc<DbPool>, sessions: &SessionStore, msg: &Message) -> AppResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let Some(pending) = sessions.take_pending_receipt(user_id) else {
        return Ok(());
    };
    let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) else {
        // Not a photo after all; put the marker back and re-prompt.
        sessions.set_pending_receipt(user_id, pending);
        bot.send_message(msg.chat.id, "🧾 Iltimos, chekni rasm ko'rinishida yuboring.")
            .await?;
        return Ok(());
    };

    let conn = get_connection(pool)?;
    let payment_id = payments::create_payment(
        &conn,
        user_id,
        pending.amount,
        pending.duration_days,
        "manual",
        Some(photo.file.id.0.as_str()),
    )?;

    bot.send_message(
        msg.chat.id,
        "✅ Chek qabul qilindi! Adminlar tekshirgach, premium faollashtiriladi.",
    )
    .await?;

    let caption = format!(
        "🧾 Yangi to'lov cheki\n\nTo'lov ID: {}\nFoydalanuvchi: {} (@{})\nTarif: {} ({} so'm)",
        payment_id,
        user_id,
        user.username.as_deref().unwrap_or("-"),
        plan_label(pending.duration_days),
        pending.amount
    );
    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Tasdiqlash".to_string(), format!("approve_payment_{}", payment_id)),
        InlineKeyboardButton::callback("❌ Rad etish".to_string(), format!("reject_payment_{}", payment_id)),
    ]]);

    for admin_id in &*config::admin::ADMIN_IDS {
        let send = bot
            .send_photo(ChatId(*admin_id), InputFile::file_id(photo.file.id.clone()))
            .caption(caption.clone())
            .reply_markup(keyboard.clone())
            .await;
        if let Err(e) = send {
            log::error!("Failed to forward receipt to admin {}: {}", admin_id, e);
        }
    }
    Ok(())
}

/// Admin pressed approve/reject under a receipt.
pub async fn handle_payment_decision(
    bot: &Bot,
    pool: &Arc<DbPool>,
    admin_chat: ChatId,
    payment_id: i64,
    approve: bool,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let Some(payment) = payments::find_payment_by_id(&conn, payment_id)? else {
        bot.send_message(admin_chat, "❌ To'lov topilmadi.").await?;
        return Ok(());
    };
    if payment.status != PaymentStatus::Pending {
        bot.send_message(
            admin_chat,
            format!("ℹ️ To'lov {} allaqachon ko'rib chiqilgan ({}).", payment.id, payment.status.as_str()),
        )
        .await?;
        return Ok(());
    }

    if approve {
        payments::set_payment_status(&conn, payment.id, PaymentStatus::Paid)?;
        let expires_at = users::grant_premium(&conn, payment.user_id, payment.duration_days)?;
        log::info!(
            "Payment {} approved, premium for user {} until {}",
            payment.id,
            payment.user_id,
            expires_at
        );

        bot.send_message(
            admin_chat,
            format!("✅ To'lov {} tasdiqlandi.", payment.id),
        )
        .await?;
        let user_text = format!(
            "✅ To'lovingiz tasdiqlandi!\n\nPremium obuna {} kunga faollashtirildi. Yoqimli tomosha!",
            payment.duration_days
        );
        if let Err(e) = bot.send_message(ChatId(payment.user_id), user_text).await {
            log::warn!("Failed to notify user {} about approval: {}", payment.user_id, e);
        }
    } else {
        payments::set_payment_status(&conn, payment.id, PaymentStatus::Rejected)?;
        log::info!("Payment {} rejected", payment.id);

        bot.send_message(admin_chat, format!("❌ To'lov {} rad etildi.", payment.id))
            .await?;
        let user_text = "❌ To'lovingiz rad etildi. Chekni tekshirib, qayta yuboring yoki admin bilan bog'laning.";
        if let Err(e) = bot.send_message(ChatId(payment.user_id), user_text).await {
            log::warn!("Failed to notify user {} about rejection: {}", payment.user_id, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings() -> PremiumSettings {
        PremiumSettings {
            monthly_price: 15_000,
            quarterly_price: 40_000,
            half_year_price: 75_000,
            yearly_price: 140_000,
            card_number: None,
            card_holder: None,
        }
    }

    #[test]
    fn premium_keyboard_has_all_plans_and_back() {
        let keyboard = premium_keyboard(&settings());
        let rows = &keyboard.inline_keyboard;
        assert_eq!(rows.len(), PLAN_DURATIONS.len() + 1);
        assert!(rows[0][0].text.contains("1 oy"));
        assert!(rows[0][0].text.contains("15000"));
        assert!(rows[3][0].text.contains("1 yil"));
    }

    #[test]
    fn plan_labels() {
        assert_eq!(plan_label(30), "1 oy");
        assert_eq!(plan_label(365), "1 yil");
        assert_eq!(plan_label(7), "?");
    }
}
