//! Reply keyboards and the static menu sections.
//!
//! All user-facing strings are Uzbek, matching the audience of the bot.

use teloxide::prelude::*;
use teloxide::types::{KeyboardButton, KeyboardMarkup};

use crate::core::error::AppResult;

/// Main-menu button labels, also matched as "hears" triggers.
pub const BTN_SEARCH: &str = "🔍 Kino qidirish";
pub const BTN_PREMIUM: &str = "⭐ Premium";
pub const BTN_ABOUT: &str = "ℹ️ Biz haqimizda";
pub const BTN_CONTACT: &str = "📞 Aloqa";
pub const BTN_BACK: &str = "🔙 Orqaga";

/// Generic failure message shown whenever a handler errors out.
pub const GENERIC_ERROR: &str = "❌ Xatolik yuz berdi. Iltimos, keyinroq qayta urinib ko'ring.";

pub fn main_menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BTN_SEARCH)],
        vec![KeyboardButton::new(BTN_PREMIUM)],
        vec![KeyboardButton::new(BTN_ABOUT), KeyboardButton::new(BTN_CONTACT)],
    ])
    .resize_keyboard()
}

pub fn back_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(BTN_BACK)]]).resize_keyboard()
}

/// Send the main menu with a greeting.
pub async fn show_main_menu(bot: &Bot, chat_id: ChatId, first_name: Option<&str>) -> AppResult<()> {
    let greeting = match first_name {
        Some(name) => format!("Assalomu alaykum, {}! 👋", name),
        None => "Assalomu alaykum! 👋".to_string(),
    };
    let text = format!(
        "{}\n\nKino kodini yuboring yoki quyidagi bo'limlardan birini tanlang:",
        greeting
    );
    bot.send_message(chat_id, text)
        .reply_markup(main_menu_keyboard())
        .await?;
    Ok(())
}

/// "Search" section: prompt for a numeric code.
pub async fn show_search_prompt(bot: &Bot, chat_id: ChatId) -> AppResult<()> {
    bot.send_message(
        chat_id,
        "🔍 Kino kodini yuboring.\n\nMasalan: 123\n\nKodlar kanallarimizdagi postlarda ko'rsatilgan.",
    )
    .reply_markup(back_keyboard())
    .await?;
    Ok(())
}

/// "About" section.
pub async fn show_about(bot: &Bot, chat_id: ChatId) -> AppResult<()> {
    bot.send_message(
        chat_id,
        "ℹ️ Bu bot orqali kod bo'yicha kino va seriallarni tomosha qilishingiz mumkin.\n\n\
         Yangi kinolar har kuni qo'shib boriladi. Kodlar kanallarimizda e'lon qilinadi.",
    )
    .reply_markup(main_menu_keyboard())
    .await?;
    Ok(())
}

/// "Contact" section.
pub async fn show_contact(bot: &Bot, chat_id: ChatId) -> AppResult<()> {
    bot.send_message(
        chat_id,
        "📞 Murojaat uchun: @kinoteka_admin\n\nTaklif va shikoyatlaringizni yozib qoldiring.",
    )
    .reply_markup(main_menu_keyboard())
    .await?;
    Ok(())
}

/// Send the generic error message, ignoring delivery failures.
pub async fn send_generic_error(bot: &Bot, chat_id: ChatId) {
    if let Err(e) = bot.send_message(chat_id, GENERIC_ERROR).await {
        log::warn!("Failed to send error message to {}: {}", chat_id, e);
    }
}
