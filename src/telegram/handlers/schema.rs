//! dptree update schema: routes messages, callbacks, inline queries and
//! membership updates to the feature modules.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatJoinRequest, ChatMemberUpdated, InlineQuery, Message};

use crate::core::error::AppResult;
use crate::storage::{content, get_connection, users};
use crate::telegram::bot::{parse_start_payload, Command, DeepLink};
use crate::telegram::handlers::types::{ensure_user_exists, HandlerDeps, HandlerError, UserInfo};
use crate::telegram::{admin, content as delivery, membership, menu, notifications, premium, subscriptions};

/// Build the full update handler tree.
pub fn schema() -> UpdateHandler<HandlerError> {
    let message_branch = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(command_endpoint),
        )
        .endpoint(message_endpoint);

    dptree::entry()
        .branch(message_branch)
        .branch(Update::filter_callback_query().endpoint(callback_endpoint))
        .branch(Update::filter_inline_query().endpoint(inline_endpoint))
        .branch(Update::filter_chat_member().endpoint(chat_member_endpoint))
        .branch(Update::filter_my_chat_member().endpoint(my_chat_member_endpoint))
        .branch(Update::filter_chat_join_request().endpoint(join_request_endpoint))
}

async fn command_endpoint(bot: Bot, msg: Message, cmd: Command, deps: HandlerDeps) -> Result<(), HandlerError> {
    if let Err(e) = handle_command(&bot, &msg, cmd, &deps).await {
        log::error!("Command handler failed in chat {}: {}", msg.chat.id, e);
        menu::send_generic_error(&bot, msg.chat.id).await;
    }
    Ok(())
}

async fn message_endpoint(bot: Bot, msg: Message, deps: HandlerDeps) -> Result<(), HandlerError> {
    if let Err(e) = handle_message(&bot, &msg, &deps).await {
        log::error!("Message handler failed in chat {}: {}", msg.chat.id, e);
        menu::send_generic_error(&bot, msg.chat.id).await;
    }
    Ok(())
}

async fn callback_endpoint(bot: Bot, q: CallbackQuery, deps: HandlerDeps) -> Result<(), HandlerError> {
    let chat_id = q.message.as_ref().map(|m| m.chat().id);
    if let Err(e) = handle_callback(&bot, &q, &deps).await {
        log::error!("Callback handler failed for user {}: {}", q.from.id, e);
        if let Some(chat_id) = chat_id {
            menu::send_generic_error(&bot, chat_id).await;
        }
    }
    Ok(())
}

async fn inline_endpoint(bot: Bot, q: InlineQuery, deps: HandlerDeps) -> Result<(), HandlerError> {
    if let Err(e) = delivery::handle_inline_query(&bot, &deps.db_pool, &q).await {
        log::error!("Inline query handler failed for user {}: {}", q.from.id, e);
    }
    Ok(())
}

async fn chat_member_endpoint(bot: Bot, update: ChatMemberUpdated, deps: HandlerDeps) -> Result<(), HandlerError> {
    membership::handle_chat_member_update(bot, update, deps.db_pool.clone()).await;
    Ok(())
}

async fn my_chat_member_endpoint(bot: Bot, update: ChatMemberUpdated, deps: HandlerDeps) -> Result<(), HandlerError> {
    membership::handle_my_chat_member_update(bot, update, deps.db_pool.clone()).await;
    Ok(())
}

async fn join_request_endpoint(bot: Bot, request: ChatJoinRequest, deps: HandlerDeps) -> Result<(), HandlerError> {
    membership::handle_chat_join_request(bot, request, deps.db_pool.clone()).await;
    Ok(())
}

/// Run the mandatory-channel gate and, when it fails, show the join prompt
/// for the channels still missing. Admins and premium users skip the gate.
/// Returns true when content may be served.
async fn gate_or_prompt(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId, user_id: i64) -> AppResult<bool> {
    {
        let conn = get_connection(&deps.db_pool)?;
        if admin::is_admin(&conn, user_id) || users::is_premium_active(&conn, user_id)? {
            return Ok(true);
        }
    }
    // One sweep over the channels serves both the verdict and the prompt.
    let missing = subscriptions::unsatisfied_channels(bot, &deps.db_pool, user_id).await?;
    if missing.is_empty() {
        return Ok(true);
    }
    subscriptions::send_subscription_prompt(bot, chat_id, &missing).await?;
    Ok(false)
}

async fn handle_command(bot: &Bot, msg: &Message, cmd: Command, deps: &HandlerDeps) -> AppResult<()> {
    let Some(info) = UserInfo::from_message(msg) else {
        return Ok(());
    };
    let created = ensure_user_exists(deps, &info)?;
    if created {
        notifications::notify_admin_new_user(bot, info.telegram_id, info.username.as_deref(), info.first_name.as_deref())
            .await;
    }

    match cmd {
        Command::Start => {
            let payload = msg
                .text()
                .and_then(|t| t.strip_prefix("/start"))
                .map(str::trim)
                .filter(|p| !p.is_empty());

            let deep_link = payload.and_then(parse_start_payload);
            if let Some(link) = deep_link {
                if !gate_or_prompt(bot, deps, msg.chat.id, info.telegram_id).await? {
                    return Ok(());
                }
                match link {
                    DeepLink::Movie(code) => {
                        delivery::handle_code_search(bot, &deps.db_pool, msg.chat.id, info.telegram_id, code).await?;
                    }
                    DeepLink::Serial(code) => {
                        delivery::handle_serial_code(bot, &deps.db_pool, msg.chat.id, info.telegram_id, code).await?;
                    }
                }
                return Ok(());
            }

            if !gate_or_prompt(bot, deps, msg.chat.id, info.telegram_id).await? {
                return Ok(());
            }
            menu::show_main_menu(bot, msg.chat.id, info.first_name.as_deref()).await?;
        }
        Command::Admin => {
            let conn = get_connection(&deps.db_pool)?;
            if !admin::is_admin(&conn, info.telegram_id) {
                bot.send_message(msg.chat.id, "⛔ Bu buyruq faqat adminlar uchun.").await?;
                return Ok(());
            }
            drop(conn);
            admin::show_admin_panel(bot, msg.chat.id).await?;
        }
    }
    Ok(())
}

async fn handle_message(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> AppResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(info) = UserInfo::from_message(msg) else {
        return Ok(());
    };
    let created = ensure_user_exists(deps, &info)?;
    if created {
        notifications::notify_admin_new_user(bot, info.telegram_id, info.username.as_deref(), info.first_name.as_deref())
            .await;
    }
    let user_id = info.telegram_id;

    // Active admin wizards consume everything, including photos and videos.
    {
        let conn = get_connection(&deps.db_pool)?;
        let admin_user = admin::is_admin(&conn, user_id);
        drop(conn);
        if admin_user
            && admin::handle_wizard_message(bot, &deps.db_pool, &deps.sessions, msg, &deps.bot_username).await?
        {
            return Ok(());
        }
    }

    // Payment receipt photos.
    if deps.sessions.pending_receipt(user_id).is_some() {
        premium::handle_receipt_photo(bot, &deps.db_pool, &deps.sessions, msg).await?;
        return Ok(());
    }

    let Some(text) = msg.text().map(str::trim) else {
        return Ok(());
    };

    match text {
        menu::BTN_SEARCH => return menu::show_search_prompt(bot, msg.chat.id).await,
        menu::BTN_PREMIUM => return premium::show_premium_menu(bot, &deps.db_pool, msg.chat.id, user_id).await,
        menu::BTN_ABOUT => return menu::show_about(bot, msg.chat.id).await,
        menu::BTN_CONTACT => return menu::show_contact(bot, msg.chat.id).await,
        menu::BTN_BACK => return menu::show_main_menu(bot, msg.chat.id, info.first_name.as_deref()).await,
        _ => {}
    }

    // Anything that parses as a code is a lookup.
    if let Some(link) = parse_start_payload(text) {
        if !gate_or_prompt(bot, deps, msg.chat.id, user_id).await? {
            return Ok(());
        }
        match link {
            DeepLink::Movie(code) => {
                delivery::handle_code_search(bot, &deps.db_pool, msg.chat.id, user_id, code).await?;
            }
            DeepLink::Serial(code) => {
                delivery::handle_serial_code(bot, &deps.db_pool, msg.chat.id, user_id, code).await?;
            }
        }
        return Ok(());
    }

    bot.send_message(msg.chat.id, "🔢 Kino kodini raqam bilan yuboring (masalan: 123).")
        .await?;
    Ok(())
}

fn parse_suffix_id(data: &str, prefix: &str) -> Option<i64> {
    data.strip_prefix(prefix).and_then(|rest| rest.parse().ok())
}

fn parse_two_ids(data: &str, prefix: &str) -> Option<(i64, i64)> {
    let rest = data.strip_prefix(prefix)?;
    let (a, b) = rest.split_once('_')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

async fn handle_callback(bot: &Bot, q: &CallbackQuery, deps: &HandlerDeps) -> AppResult<()> {
    let Some(data) = q.data.as_deref() else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let Some(chat_id) = q.message.as_ref().map(|m| m.chat().id) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let user_id = q.from.id.0 as i64;

    match data {
        subscriptions::CHECK_SUBSCRIPTION => {
            {
                let conn = get_connection(&deps.db_pool)?;
                subscriptions::accept_external_channels(&conn, user_id)?;
            }
            let missing = subscriptions::unsatisfied_channels(bot, &deps.db_pool, user_id).await?;
            if missing.is_empty() {
                bot.answer_callback_query(q.id.clone()).await?;
                bot.send_message(chat_id, "✅ Obuna tasdiqlandi!").await?;
                menu::show_main_menu(bot, chat_id, Some(q.from.first_name.as_str())).await?;
            } else {
                bot.answer_callback_query(q.id.clone())
                    .text("❌ Hali hamma kanallarga obuna emassiz.")
                    .show_alert(true)
                    .await?;
                subscriptions::send_subscription_prompt(bot, chat_id, &missing).await?;
            }
            return Ok(());
        }
        "show_premium" => {
            bot.answer_callback_query(q.id.clone()).await?;
            return premium::show_premium_menu(bot, &deps.db_pool, chat_id, user_id).await;
        }
        "back_to_main" => {
            bot.answer_callback_query(q.id.clone()).await?;
            return menu::show_main_menu(bot, chat_id, Some(q.from.first_name.as_str())).await;
        }
        admin::CB_ADD_MOVIE
        | admin::CB_ADD_SERIAL
        | admin::CB_ADD_EPISODES
        | admin::CB_ADD_CHANNEL
        | admin::CB_LIST_CHANNELS
        | admin::CB_STATS => {
            bot.answer_callback_query(q.id.clone()).await?;
            return handle_admin_callback(bot, deps, chat_id, user_id, data).await;
        }
        _ => {}
    }

    if let Some(days) = parse_suffix_id(data, "buy_premium_") {
        bot.answer_callback_query(q.id.clone()).await?;
        return premium::handle_buy_premium(bot, &deps.db_pool, chat_id, user_id, days).await;
    }
    if let Some(days) = parse_suffix_id(data, "upload_receipt_") {
        bot.answer_callback_query(q.id.clone()).await?;
        return premium::handle_upload_receipt_prompt(bot, &deps.db_pool, &deps.sessions, chat_id, user_id, days).await;
    }

    if let Some((serial_id, episode)) = parse_two_ids(data, "episode_") {
        bot.answer_callback_query(q.id.clone()).await?;
        if !gate_or_prompt(bot, deps, chat_id, user_id).await? {
            return Ok(());
        }
        let conn = get_connection(&deps.db_pool)?;
        return delivery::send_episode(bot, &conn, chat_id, serial_id, episode).await;
    }
    if let Some((movie_id, part)) = parse_two_ids(data, "movie_part_") {
        bot.answer_callback_query(q.id.clone()).await?;
        if !gate_or_prompt(bot, deps, chat_id, user_id).await? {
            return Ok(());
        }
        let conn = get_connection(&deps.db_pool)?;
        return delivery::send_movie_part(bot, &conn, chat_id, movie_id, part).await;
    }
    if let Some(movie_id) = parse_suffix_id(data, "movie_") {
        bot.answer_callback_query(q.id.clone()).await?;
        if !gate_or_prompt(bot, deps, chat_id, user_id).await? {
            return Ok(());
        }
        let conn = get_connection(&deps.db_pool)?;
        match content::find_movie_by_id(&conn, movie_id)? {
            Some(movie) => delivery::send_movie(bot, &conn, chat_id, &movie).await?,
            None => {
                bot.send_message(chat_id, "❌ Kino topilmadi.").await?;
            }
        }
        return Ok(());
    }
    if let Some(serial_id) = parse_suffix_id(data, "serial_") {
        bot.answer_callback_query(q.id.clone()).await?;
        if !gate_or_prompt(bot, deps, chat_id, user_id).await? {
            return Ok(());
        }
        let conn = get_connection(&deps.db_pool)?;
        match content::find_serial_by_id(&conn, serial_id)? {
            Some(serial) => delivery::send_serial(bot, &conn, chat_id, &serial).await?,
            None => {
                bot.send_message(chat_id, "❌ Serial topilmadi.").await?;
            }
        }
        return Ok(());
    }
    if let Some(field_id) = parse_suffix_id(data, "field_channel_") {
        bot.answer_callback_query(q.id.clone()).await?;
        let conn = get_connection(&deps.db_pool)?;
        match content::find_field_by_id(&conn, field_id)? {
            Some(field) => {
                let link = field.channel_link.as_deref().unwrap_or("-");
                bot.send_message(chat_id, format!("📣 {}: {}", field.name, link)).await?;
            }
            None => {
                bot.send_message(chat_id, "❌ Bo'lim topilmadi.").await?;
            }
        }
        return Ok(());
    }

    if let Some(payment_id) = parse_suffix_id(data, "approve_payment_") {
        bot.answer_callback_query(q.id.clone()).await?;
        return handle_payment_callback(bot, deps, chat_id, user_id, payment_id, true).await;
    }
    if let Some(payment_id) = parse_suffix_id(data, "reject_payment_") {
        bot.answer_callback_query(q.id.clone()).await?;
        return handle_payment_callback(bot, deps, chat_id, user_id, payment_id, false).await;
    }

    if let Some(channel_id) = parse_suffix_id(data, "admin_channel_toggle_") {
        bot.answer_callback_query(q.id.clone()).await?;
        if require_admin(bot, deps, chat_id, user_id).await? {
            admin::toggle_channel(bot, &deps.db_pool, chat_id, channel_id).await?;
        }
        return Ok(());
    }
    if let Some(channel_id) = parse_suffix_id(data, "admin_channel_delete_") {
        bot.answer_callback_query(q.id.clone()).await?;
        if require_admin(bot, deps, chat_id, user_id).await? {
            admin::delete_channel(bot, &deps.db_pool, chat_id, channel_id).await?;
        }
        return Ok(());
    }

    log::warn!("Unhandled callback data: {}", data);
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

async fn require_admin(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId, user_id: i64) -> AppResult<bool> {
    let conn = get_connection(&deps.db_pool)?;
    if admin::is_admin(&conn, user_id) {
        return Ok(true);
    }
    drop(conn);
    bot.send_message(chat_id, "⛔ Bu amal faqat adminlar uchun.").await?;
    Ok(false)
}

async fn handle_admin_callback(
    bot: &Bot,
    deps: &HandlerDeps,
    chat_id: ChatId,
    user_id: i64,
    data: &str,
) -> AppResult<()> {
    if !require_admin(bot, deps, chat_id, user_id).await? {
        return Ok(());
    }
    match data {
        admin::CB_ADD_MOVIE => admin::start_movie_wizard(bot, &deps.sessions, chat_id, user_id).await,
        admin::CB_ADD_SERIAL => admin::start_serial_wizard(bot, &deps.sessions, chat_id, user_id).await,
        admin::CB_ADD_EPISODES => admin::start_episodes_wizard(bot, &deps.sessions, chat_id, user_id).await,
        admin::CB_ADD_CHANNEL => admin::start_channel_wizard(bot, &deps.sessions, chat_id, user_id).await,
        admin::CB_LIST_CHANNELS => admin::show_channel_list(bot, &deps.db_pool, chat_id).await,
        admin::CB_STATS => admin::show_stats(bot, &deps.db_pool, chat_id).await,
        _ => Ok(()),
    }
}

async fn handle_payment_callback(
    bot: &Bot,
    deps: &HandlerDeps,
    chat_id: ChatId,
    user_id: i64,
    payment_id: i64,
    approve: bool,
) -> AppResult<()> {
    if !require_admin(bot, deps, chat_id, user_id).await? {
        return Ok(());
    }
    premium::handle_payment_decision(bot, &deps.db_pool, chat_id, payment_id, approve).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use teloxide::utils::command::BotCommands;

    #[test]
    fn callback_id_parsing() {
        assert_eq!(parse_suffix_id("buy_premium_30", "buy_premium_"), Some(30));
        assert_eq!(parse_suffix_id("buy_premium_x", "buy_premium_"), None);
        assert_eq!(parse_two_ids("episode_7_12", "episode_"), Some((7, 12)));
        assert_eq!(parse_two_ids("movie_part_3_1", "movie_part_"), Some((3, 1)));
        assert_eq!(parse_two_ids("episode_7", "episode_"), None);
    }

    #[test]
    fn descriptions_include_both_commands() {
        let listing = Command::descriptions().to_string();
        assert!(listing.contains("/start"));
        assert!(listing.contains("/admin"));
    }
}
