//! Admin panel: statistics, the content-creation wizards, and mandatory
//! channel management.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Message};

use crate::core::config;
use crate::core::error::AppResult;
use crate::session::{
    ChannelDraft, ChannelStep, EpisodeTarget, MovieDraft, MovieStep, SerialDraft, SerialStep,
    SessionStore, WizardState,
};
use crate::storage::channels::{self, ChannelType};
use crate::storage::db::{DbConnection, DbPool};
use crate::storage::{content, get_connection, users};
use crate::telegram::bot::{parse_start_payload, DeepLink};

pub const CB_ADD_MOVIE: &str = "admin_add_movie";
pub const CB_ADD_SERIAL: &str = "admin_add_serial";
pub const CB_ADD_EPISODES: &str = "admin_add_episodes";
pub const CB_ADD_CHANNEL: &str = "admin_add_channel";
pub const CB_LIST_CHANNELS: &str = "admin_channels";
pub const CB_STATS: &str = "admin_stats";

const CANCEL_WORDS: [&str; 3] = ["/cancel", "bekor", "Bekor qilish"];
const DONE_WORDS: [&str; 2] = ["/done", "tayyor"];
const SKIP_WORD: &str = "-";
const WATCH_BUTTON: &str = "▶️ Tomosha qilish";

/// Admins come from the ADMIN_IDS env list plus the admins table.
pub fn is_admin(conn: &DbConnection, telegram_id: i64) -> bool {
    if config::admin::ADMIN_IDS.contains(&telegram_id) {
        return true;
    }
    users::is_dynamic_admin(conn, telegram_id).unwrap_or(false)
}

fn panel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("🎞 Kino qo'shish".to_string(), CB_ADD_MOVIE.to_string()),
            InlineKeyboardButton::callback("🎬 Serial qo'shish".to_string(), CB_ADD_SERIAL.to_string()),
        ],
        vec![InlineKeyboardButton::callback(
            "➕ Qism qo'shish".to_string(),
            CB_ADD_EPISODES.to_string(),
        )],
        vec![InlineKeyboardButton::callback(
            "📢 Kanal qo'shish".to_string(),
            CB_ADD_CHANNEL.to_string(),
        )],
        vec![InlineKeyboardButton::callback(
            "📋 Kanallar ro'yxati".to_string(),
            CB_LIST_CHANNELS.to_string(),
        )],
        vec![InlineKeyboardButton::callback(
            "📊 Statistika".to_string(),
            CB_STATS.to_string(),
        )],
    ])
}

/// /admin entry point.
pub async fn show_admin_panel(bot: &Bot, chat_id: ChatId) -> AppResult<()> {
    bot.send_message(chat_id, "🛠 Admin panel")
        .reply_markup(panel_keyboard())
        .await?;
    Ok(())
}

pub async fn show_stats(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let total_users = users::count_users(&conn)?;
    let premium_users = users::count_premium_users(&conn)?;
    let channels = channels::find_all_mandatory(&conn)?.len();

    bot.send_message(
        chat_id,
        format!(
            "📊 Statistika\n\n👥 Foydalanuvchilar: {}\n⭐ Premium: {}\n📢 Faol majburiy kanallar: {}",
            total_users, premium_users, channels
        ),
    )
    .await?;
    Ok(())
}

/// List mandatory channels with toggle/delete buttons.
pub async fn show_channel_list(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let all = channels::find_all_mandatory_with_inactive(&conn)?;
    if all.is_empty() {
        bot.send_message(chat_id, "📢 Majburiy kanallar yo'q.").await?;
        return Ok(());
    }

    let mut text = String::from("📢 Majburiy kanallar:\n");
    let mut rows = Vec::new();
    for channel in &all {
        let state = if channel.is_active { "✅" } else { "⏸" };
        let limit = channel
            .member_limit
            .map(|l| format!("{}/{}", channel.current_members, l))
            .unwrap_or_else(|| channel.current_members.to_string());
        text.push_str(&format!(
            "\n{} [{}] {} ({}) — a'zolar: {}, so'rovlar: {}",
            state,
            channel.id,
            channel.channel_name,
            channel.channel_type.as_str(),
            limit,
            channel.pending_requests
        ));
        rows.push(vec![
            InlineKeyboardButton::callback(
                format!("{} {}", state, channel.channel_name),
                format!("admin_channel_toggle_{}", channel.id),
            ),
            InlineKeyboardButton::callback(
                "🗑".to_string(),
                format!("admin_channel_delete_{}", channel.id),
            ),
        ]);
    }

    bot.send_message(chat_id, text)
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

pub async fn toggle_channel(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId, channel_id: i64) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let Some(channel) = channels::find_mandatory_by_id(&conn, channel_id)? else {
        bot.send_message(chat_id, "❌ Kanal topilmadi.").await?;
        return Ok(());
    };
    channels::set_mandatory_active(&conn, channel_id, !channel.is_active)?;
    let verb = if channel.is_active { "o'chirildi" } else { "yoqildi" };
    bot.send_message(chat_id, format!("📢 {} {}.", channel.channel_name, verb))
        .await?;
    show_channel_list(bot, pool, chat_id).await
}

pub async fn delete_channel(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId, channel_id: i64) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let Some(channel) = channels::find_mandatory_by_id(&conn, channel_id)? else {
        bot.send_message(chat_id, "❌ Kanal topilmadi.").await?;
        return Ok(());
    };
    channels::delete_mandatory_channel(&conn, channel_id)?;
    bot.send_message(chat_id, format!("🗑 {} o'chirib tashlandi.", channel.channel_name))
        .await?;
    Ok(())
}

/// Start the movie wizard.
pub async fn start_movie_wizard(bot: &Bot, sessions: &SessionStore, chat_id: ChatId, user_id: i64) -> AppResult<()> {
    sessions.set_wizard(
        user_id,
        WizardState::AddMovie {
            step: MovieStep::Code,
            draft: MovieDraft::default(),
        },
    );
    bot.send_message(
        chat_id,
        "🎞 Yangi kino.\n\nKino kodini yuboring (raqam). Bekor qilish: /cancel",
    )
    .await?;
    Ok(())
}

/// Start the serial wizard.
pub async fn start_serial_wizard(bot: &Bot, sessions: &SessionStore, chat_id: ChatId, user_id: i64) -> AppResult<()> {
    sessions.set_wizard(
        user_id,
        WizardState::AddSerial {
            step: SerialStep::Code,
            draft: SerialDraft::default(),
        },
    );
    bot.send_message(
        chat_id,
        "🎬 Yangi serial.\n\nSerial kodini yuboring (raqam). Bekor qilish: /cancel",
    )
    .await?;
    Ok(())
}

/// Start the append-episodes wizard for an existing movie or serial.
pub async fn start_episodes_wizard(bot: &Bot, sessions: &SessionStore, chat_id: ChatId, user_id: i64) -> AppResult<()> {
    sessions.set_wizard(user_id, WizardState::PickEpisodeTarget);
    bot.send_message(
        chat_id,
        "➕ Qaysi kodga qism qo'shamiz? Kino uchun raqam (masalan 123), serial uchun s bilan (masalan s45). Bekor qilish: /cancel",
    )
    .await?;
    Ok(())
}

/// Start the mandatory-channel wizard.
pub async fn start_channel_wizard(bot: &Bot, sessions: &SessionStore, chat_id: ChatId, user_id: i64) -> AppResult<()> {
    sessions.set_wizard(
        user_id,
        WizardState::AddChannel {
            step: ChannelStep::Name,
            draft: ChannelDraft::default(),
        },
    );
    bot.send_message(
        chat_id,
        "📢 Yangi majburiy kanal.\n\nKanal nomini yuboring. Bekor qilish: /cancel",
    )
    .await?;
    Ok(())
}

/// Route a message from an admin with an active wizard. Returns true when
/// the message was consumed by a wizard.
pub async fn handle_wizard_message(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    msg: &Message,
    bot_username: &str,
) -> AppResult<bool> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(false);
    };
    let user_id = user.id.0 as i64;
    let Some(state) = sessions.wizard(user_id) else {
        return Ok(false);
    };

    if let Some(text) = msg.text() {
        if CANCEL_WORDS.iter().any(|w| text.eq_ignore_ascii_case(w)) {
            sessions.clear_wizard(user_id);
            bot.send_message(msg.chat.id, "❌ Bekor qilindi.").await?;
            return Ok(true);
        }
    }

    match state {
        WizardState::AddSerial { step, draft } => {
            handle_serial_step(bot, pool, sessions, msg, user_id, bot_username, step, draft).await?;
        }
        WizardState::AddMovie { step, draft } => {
            handle_movie_step(bot, pool, sessions, msg, user_id, bot_username, step, draft).await?;
        }
        WizardState::AddChannel { step, draft } => {
            handle_channel_step(bot, pool, sessions, msg, user_id, step, draft).await?;
        }
        WizardState::PickEpisodeTarget => {
            handle_pick_target(bot, pool, sessions, msg, user_id).await?;
        }
        WizardState::AddEpisodes { target, next_number } => {
            handle_append_episode(bot, pool, sessions, msg, user_id, target, next_number).await?;
        }
    }
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn handle_serial_step(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    msg: &Message,
    user_id: i64,
    bot_username: &str,
    step: SerialStep,
    mut draft: SerialDraft,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let chat_id = msg.chat.id;

    match step {
        SerialStep::Code => {
            let Some(code) = msg.text().and_then(|t| t.trim().parse::<i64>().ok()) else {
                bot.send_message(chat_id, "❗ Kod raqam bo'lishi kerak. Qayta yuboring.").await?;
                return Ok(());
            };
            if !content::is_code_available(&conn, code)? {
                let nearest = content::find_nearest_available_codes(&conn, code, 5)?;
                let suggestions = nearest
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                bot.send_message(
                    chat_id,
                    format!("❗ {} kodi band. Bo'sh kodlar: {}", code, suggestions),
                )
                .await?;
                return Ok(());
            }
            draft.code = Some(code);
            sessions.set_wizard(user_id, WizardState::AddSerial { step: SerialStep::Title, draft });
            bot.send_message(chat_id, "Serial nomini yuboring.").await?;
        }
        SerialStep::Title => {
            let Some(title) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
                bot.send_message(chat_id, "❗ Nom matn bo'lishi kerak.").await?;
                return Ok(());
            };
            draft.title = Some(title.to_string());
            sessions.set_wizard(user_id, WizardState::AddSerial { step: SerialStep::Genre, draft });
            bot.send_message(chat_id, "Janrni yuboring (o'tkazib yuborish: -).").await?;
        }
        SerialStep::Genre => {
            let Some(text) = msg.text().map(str::trim) else {
                bot.send_message(chat_id, "❗ Janr matn bo'lishi kerak.").await?;
                return Ok(());
            };
            if text != SKIP_WORD {
                draft.genre = Some(text.to_string());
            }
            sessions.set_wizard(user_id, WizardState::AddSerial { step: SerialStep::Description, draft });
            bot.send_message(chat_id, "Tavsifni yuboring (o'tkazib yuborish: -).").await?;
        }
        SerialStep::Description => {
            let Some(text) = msg.text().map(str::trim) else {
                bot.send_message(chat_id, "❗ Tavsif matn bo'lishi kerak.").await?;
                return Ok(());
            };
            if text != SKIP_WORD {
                draft.description = Some(text.to_string());
            }
            let listing = field_listing(&conn)?;
            sessions.set_wizard(user_id, WizardState::AddSerial { step: SerialStep::Field, draft });
            bot.send_message(
                chat_id,
                format!("Bo'lim raqamini yuboring (o'tkazib yuborish: -):\n{}", listing),
            )
            .await?;
        }
        SerialStep::Field => {
            match read_field_choice(bot, &conn, msg).await? {
                FieldChoice::Picked(id) => draft.field_id = Some(id),
                FieldChoice::Skipped => {}
                FieldChoice::Invalid => return Ok(()),
            }
            sessions.set_wizard(user_id, WizardState::AddSerial { step: SerialStep::Poster, draft });
            bot.send_message(chat_id, "Poster rasmini yuboring (o'tkazib yuborish: -).").await?;
        }
        SerialStep::Poster => {
            if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
                draft.poster_file_id = Some(photo.file.id.0.clone());
            } else if msg.text().map(str::trim) != Some(SKIP_WORD) {
                bot.send_message(chat_id, "❗ Rasm yuboring yoki - bilan o'tkazing.").await?;
                return Ok(());
            }

            // All metadata collected, create the row before episode upload.
            let serial_id = content::create_serial(
                &conn,
                draft.code.unwrap_or_default(),
                draft.title.as_deref().unwrap_or_default(),
                draft.genre.as_deref(),
                draft.description.as_deref(),
                draft.field_id,
                draft.poster_file_id.as_deref(),
            )?;
            log::info!("Serial {} created with code {:?}", serial_id, draft.code);
            draft.serial_id = Some(serial_id);
            draft.next_episode = 1;
            sessions.set_wizard(
                user_id,
                WizardState::AddSerial {
                    step: SerialStep::UploadingEpisodes,
                    draft,
                },
            );
            bot.send_message(
                chat_id,
                "✅ Serial yaratildi. Endi qismlarni video qilib yuboring. Tugatish: /done",
            )
            .await?;
        }
        SerialStep::UploadingEpisodes => {
            if let Some(text) = msg.text() {
                if DONE_WORDS.iter().any(|w| text.eq_ignore_ascii_case(w)) {
                    sessions.clear_wizard(user_id);
                    let uploaded = draft.next_episode - 1;
                    bot.send_message(
                        chat_id,
                        format!("✅ Tayyor! {} ta qism yuklandi.", uploaded),
                    )
                    .await?;
                    if let Some(serial_id) = draft.serial_id {
                        announce_serial(bot, &conn, bot_username, serial_id).await;
                    }
                    return Ok(());
                }
            }
            let Some(video) = msg.video() else {
                bot.send_message(chat_id, "❗ Video yuboring yoki /done bilan tugating.").await?;
                return Ok(());
            };
            let Some(serial_id) = draft.serial_id else {
                sessions.clear_wizard(user_id);
                bot.send_message(chat_id, "❌ Ichki xatolik, qaytadan boshlang.").await?;
                return Ok(());
            };
            let episode_number = draft.next_episode;
            content::add_episode(&conn, serial_id, episode_number, video.file.id.0.as_str())?;
            draft.next_episode += 1;
            sessions.set_wizard(
                user_id,
                WizardState::AddSerial {
                    step: SerialStep::UploadingEpisodes,
                    draft,
                },
            );
            bot.send_message(chat_id, format!("✅ {}-qism qabul qilindi.", episode_number))
                .await?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_movie_step(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    msg: &Message,
    user_id: i64,
    bot_username: &str,
    step: MovieStep,
    mut draft: MovieDraft,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let chat_id = msg.chat.id;

    match step {
        MovieStep::Code => {
            let Some(code) = msg.text().and_then(|t| t.trim().parse::<i64>().ok()) else {
                bot.send_message(chat_id, "❗ Kod raqam bo'lishi kerak. Qayta yuboring.").await?;
                return Ok(());
            };
            if !content::is_code_available(&conn, code)? {
                let nearest = content::find_nearest_available_codes(&conn, code, 5)?;
                let suggestions = nearest
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                bot.send_message(
                    chat_id,
                    format!("❗ {} kodi band. Bo'sh kodlar: {}", code, suggestions),
                )
                .await?;
                return Ok(());
            }
            draft.code = Some(code);
            sessions.set_wizard(user_id, WizardState::AddMovie { step: MovieStep::Title, draft });
            bot.send_message(chat_id, "Kino nomini yuboring.").await?;
        }
        MovieStep::Title => {
            let Some(title) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
                bot.send_message(chat_id, "❗ Nom matn bo'lishi kerak.").await?;
                return Ok(());
            };
            draft.title = Some(title.to_string());
            sessions.set_wizard(user_id, WizardState::AddMovie { step: MovieStep::Genre, draft });
            bot.send_message(chat_id, "Janrni yuboring (o'tkazib yuborish: -).").await?;
        }
        MovieStep::Genre => {
            let Some(text) = msg.text().map(str::trim) else {
                bot.send_message(chat_id, "❗ Janr matn bo'lishi kerak.").await?;
                return Ok(());
            };
            if text != SKIP_WORD {
                draft.genre = Some(text.to_string());
            }
            sessions.set_wizard(user_id, WizardState::AddMovie { step: MovieStep::Description, draft });
            bot.send_message(chat_id, "Tavsifni yuboring (o'tkazib yuborish: -).").await?;
        }
        MovieStep::Description => {
            let Some(text) = msg.text().map(str::trim) else {
                bot.send_message(chat_id, "❗ Tavsif matn bo'lishi kerak.").await?;
                return Ok(());
            };
            if text != SKIP_WORD {
                draft.description = Some(text.to_string());
            }
            let listing = field_listing(&conn)?;
            sessions.set_wizard(user_id, WizardState::AddMovie { step: MovieStep::Field, draft });
            bot.send_message(
                chat_id,
                format!("Bo'lim raqamini yuboring (o'tkazib yuborish: -):\n{}", listing),
            )
            .await?;
        }
        MovieStep::Field => {
            match read_field_choice(bot, &conn, msg).await? {
                FieldChoice::Picked(id) => draft.field_id = Some(id),
                FieldChoice::Skipped => {}
                FieldChoice::Invalid => return Ok(()),
            }
            sessions.set_wizard(user_id, WizardState::AddMovie { step: MovieStep::Poster, draft });
            bot.send_message(chat_id, "Poster rasmini yuboring (o'tkazib yuborish: -).").await?;
        }
        MovieStep::Poster => {
            if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
                draft.poster_file_id = Some(photo.file.id.0.clone());
            } else if msg.text().map(str::trim) != Some(SKIP_WORD) {
                bot.send_message(chat_id, "❗ Rasm yuboring yoki - bilan o'tkazing.").await?;
                return Ok(());
            }

            let movie_id = content::create_movie(
                &conn,
                draft.code.unwrap_or_default(),
                draft.title.as_deref().unwrap_or_default(),
                draft.genre.as_deref(),
                draft.description.as_deref(),
                draft.field_id,
                draft.poster_file_id.as_deref(),
                None,
            )?;
            log::info!("Movie {} created with code {:?}", movie_id, draft.code);
            draft.movie_id = Some(movie_id);
            draft.next_part = 1;
            sessions.set_wizard(
                user_id,
                WizardState::AddMovie {
                    step: MovieStep::UploadingParts,
                    draft,
                },
            );
            bot.send_message(
                chat_id,
                "✅ Kino yaratildi. Endi videoni yuboring (bir necha qism bo'lsa, ketma-ket). Tugatish: /done",
            )
            .await?;
        }
        MovieStep::UploadingParts => {
            if let Some(text) = msg.text() {
                if DONE_WORDS.iter().any(|w| text.eq_ignore_ascii_case(w)) {
                    let uploaded = draft.next_part - 1;
                    if uploaded == 0 {
                        bot.send_message(chat_id, "❗ Kamida bitta video yuboring.").await?;
                        return Ok(());
                    }
                    sessions.clear_wizard(user_id);
                    bot.send_message(
                        chat_id,
                        format!("✅ Tayyor! {} ta video yuklandi.", uploaded),
                    )
                    .await?;
                    if let Some(movie_id) = draft.movie_id {
                        announce_movie(bot, &conn, bot_username, movie_id).await;
                    }
                    return Ok(());
                }
            }
            let Some(video) = msg.video() else {
                bot.send_message(chat_id, "❗ Video yuboring yoki /done bilan tugating.").await?;
                return Ok(());
            };
            let Some(movie_id) = draft.movie_id else {
                sessions.clear_wizard(user_id);
                bot.send_message(chat_id, "❌ Ichki xatolik, qaytadan boshlang.").await?;
                return Ok(());
            };
            let part_number = draft.next_part;
            content::add_movie_part(&conn, movie_id, part_number, video.file.id.0.as_str())?;
            // The first video doubles as the single-video delivery source.
            if part_number == 1 {
                content::set_movie_video(&conn, movie_id, video.file.id.0.as_str())?;
            }
            draft.next_part += 1;
            sessions.set_wizard(
                user_id,
                WizardState::AddMovie {
                    step: MovieStep::UploadingParts,
                    draft,
                },
            );
            bot.send_message(chat_id, format!("✅ {}-qism qabul qilindi.", part_number))
                .await?;
        }
    }
    Ok(())
}

/// Resolve the code an admin typed into an append target and the number the
/// next upload should get.
async fn handle_pick_target(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    msg: &Message,
    user_id: i64,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let chat_id = msg.chat.id;

    let Some(link) = msg.text().map(str::trim).and_then(parse_start_payload) else {
        bot.send_message(chat_id, "❗ Kod yuboring: kino uchun 123, serial uchun s45.").await?;
        return Ok(());
    };

    let (target, next_number, title) = match link {
        DeepLink::Movie(code) => {
            let Some(movie) = content::find_movie_by_code(&conn, code)? else {
                bot.send_message(chat_id, format!("❌ {} kodli kino topilmadi.", code)).await?;
                return Ok(());
            };
            let last_part = content::find_movie_parts(&conn, movie.id)?
                .last()
                .map(|p| p.part_number);
            // A single-video movie has no part rows; promote its video to
            // part 1 so appended uploads continue from part 2.
            if last_part.is_none() {
                if let Some(video) = movie.video_file_id.as_deref() {
                    content::add_movie_part(&conn, movie.id, 1, video)?;
                }
            }
            let next = resume_part_number(last_part, movie.video_file_id.is_some());
            (EpisodeTarget::Movie(movie.id), next, movie.title)
        }
        DeepLink::Serial(code) => {
            let Some(serial) = content::find_serial_by_code(&conn, code)? else {
                bot.send_message(chat_id, format!("❌ s{} kodli serial topilmadi.", code)).await?;
                return Ok(());
            };
            let last = content::find_episodes(&conn, serial.id)?
                .last()
                .map(|e| e.episode_number);
            (EpisodeTarget::Serial(serial.id), last.map_or(1, |n| n + 1), serial.title)
        }
    };

    sessions.set_wizard(user_id, WizardState::AddEpisodes { target, next_number });
    bot.send_message(
        chat_id,
        format!(
            "📥 {} — videolarni yuboring, {}-qismdan boshlanadi. Tugatish: /done",
            title, next_number
        ),
    )
    .await?;
    Ok(())
}

async fn handle_append_episode(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    msg: &Message,
    user_id: i64,
    target: EpisodeTarget,
    next_number: i64,
) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let chat_id = msg.chat.id;

    if let Some(text) = msg.text() {
        if DONE_WORDS.iter().any(|w| text.eq_ignore_ascii_case(w)) {
            sessions.clear_wizard(user_id);
            bot.send_message(chat_id, "✅ Tayyor! Qismlar saqlandi.").await?;
            return Ok(());
        }
    }
    let Some(video) = msg.video() else {
        bot.send_message(chat_id, "❗ Video yuboring yoki /done bilan tugating.").await?;
        return Ok(());
    };

    match target {
        EpisodeTarget::Movie(movie_id) => {
            content::add_movie_part(&conn, movie_id, next_number, video.file.id.0.as_str())?;
        }
        EpisodeTarget::Serial(serial_id) => {
            content::add_episode(&conn, serial_id, next_number, video.file.id.0.as_str())?;
        }
    }
    sessions.set_wizard(
        user_id,
        WizardState::AddEpisodes {
            target,
            next_number: next_number + 1,
        },
    );
    bot.send_message(chat_id, format!("✅ {}-qism qabul qilindi.", next_number))
        .await?;
    Ok(())
}

/// Part number the next upload gets when appending to an existing movie.
/// A single-video movie gets that video promoted to part 1 first, so
/// appending starts at 2.
fn resume_part_number(last_part: Option<i64>, has_single_video: bool) -> i64 {
    match last_part {
        Some(n) => n + 1,
        None if has_single_video => 2,
        None => 1,
    }
}

fn field_listing(conn: &DbConnection) -> AppResult<String> {
    let fields = content::find_all_fields(conn)?;
    if fields.is_empty() {
        return Ok("Bo'limlar yo'q.".to_string());
    }
    Ok(fields
        .iter()
        .map(|f| format!("{} — {}", f.id, f.name))
        .collect::<Vec<_>>()
        .join("\n"))
}

enum FieldChoice {
    Picked(i64),
    Skipped,
    Invalid,
}

async fn read_field_choice(bot: &Bot, conn: &DbConnection, msg: &Message) -> AppResult<FieldChoice> {
    let Some(text) = msg.text().map(str::trim) else {
        bot.send_message(msg.chat.id, "❗ Bo'lim raqam bo'lishi kerak.").await?;
        return Ok(FieldChoice::Invalid);
    };
    if text == SKIP_WORD {
        return Ok(FieldChoice::Skipped);
    }
    let Ok(field_id) = text.parse::<i64>() else {
        bot.send_message(msg.chat.id, "❗ Bo'lim raqam bo'lishi kerak.").await?;
        return Ok(FieldChoice::Invalid);
    };
    if content::find_field_by_id(conn, field_id)?.is_none() {
        bot.send_message(msg.chat.id, "❗ Bunday bo'lim yo'q.").await?;
        return Ok(FieldChoice::Invalid);
    }
    Ok(FieldChoice::Picked(field_id))
}

/// Deep-link keyboard for channel announcements. A callback button is wrong
/// here: pressed under a channel post, the callback's chat is the channel
/// itself, so the bot would dump gated video into the channel. The /start
/// deep link pulls the viewer into a private chat where the gate runs.
fn announcement_keyboard(bot_username: &str, payload: &str) -> Option<InlineKeyboardMarkup> {
    let link = format!("https://t.me/{}?start={}", bot_username, payload);
    let url = url::Url::parse(&link).ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url(WATCH_BUTTON.to_string(), url),
    ]]))
}

/// Post the finished serial's card into its field channel so subscribers see
/// the new code. Failures only log; the serial itself is already saved.
async fn announce_serial(bot: &Bot, conn: &DbConnection, bot_username: &str, serial_id: i64) {
    let serial = match content::find_serial_by_id(conn, serial_id) {
        Ok(Some(serial)) => serial,
        Ok(None) => return,
        Err(e) => {
            log::error!("Failed to load serial {} for announcement: {}", serial_id, e);
            return;
        }
    };
    let caption = crate::telegram::content::serial_caption(&serial);
    let keyboard = announcement_keyboard(bot_username, &format!("s{}", serial.code));
    post_announcement(
        bot,
        conn,
        serial.field_id,
        serial.poster_file_id.as_deref(),
        caption,
        keyboard,
    )
    .await;
}

/// Same as [`announce_serial`], for a finished movie.
async fn announce_movie(bot: &Bot, conn: &DbConnection, bot_username: &str, movie_id: i64) {
    let movie = match content::find_movie_by_id(conn, movie_id) {
        Ok(Some(movie)) => movie,
        Ok(None) => return,
        Err(e) => {
            log::error!("Failed to load movie {} for announcement: {}", movie_id, e);
            return;
        }
    };
    let caption = crate::telegram::content::movie_caption(&movie);
    let keyboard = announcement_keyboard(bot_username, &movie.code.to_string());
    post_announcement(
        bot,
        conn,
        movie.field_id,
        movie.poster_file_id.as_deref(),
        caption,
        keyboard,
    )
    .await;
}

async fn post_announcement(
    bot: &Bot,
    conn: &DbConnection,
    field_id: Option<i64>,
    poster_file_id: Option<&str>,
    caption: String,
    keyboard: Option<InlineKeyboardMarkup>,
) {
    let Some(field_id) = field_id else {
        return;
    };
    let field_chat = match content::find_field_by_id(conn, field_id) {
        Ok(Some(field)) => field.channel_id.and_then(|id| id.parse::<i64>().ok()),
        _ => None,
    };
    let Some(field_chat) = field_chat else {
        return;
    };
    let Some(keyboard) = keyboard else {
        return;
    };

    let sent = match poster_file_id {
        Some(poster) => {
            bot.send_photo(
                ChatId(field_chat),
                teloxide::types::InputFile::file_id(teloxide::types::FileId(poster.to_string())),
            )
            .caption(caption)
            .reply_markup(keyboard)
            .await
            .map(|_| ())
        }
        None => bot
            .send_message(ChatId(field_chat), caption)
            .reply_markup(keyboard)
            .await
            .map(|_| ()),
    };
    if let Err(e) = sent {
        log::warn!("Failed to post announcement to field channel {}: {}", field_chat, e);
    }
}

async fn handle_channel_step(
    bot: &Bot,
    pool: &Arc<DbPool>,
    sessions: &SessionStore,
    msg: &Message,
    user_id: i64,
    step: ChannelStep,
    mut draft: ChannelDraft,
) -> AppResult<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text().map(str::trim) else {
        bot.send_message(chat_id, "❗ Matn yuboring.").await?;
        return Ok(());
    };

    match step {
        ChannelStep::Name => {
            draft.name = Some(text.to_string());
            sessions.set_wizard(user_id, WizardState::AddChannel { step: ChannelStep::Link, draft });
            bot.send_message(chat_id, "Kanal havolasini yuboring (https://t.me/...).").await?;
        }
        ChannelStep::Link => {
            if url::Url::parse(text).is_err() {
                bot.send_message(chat_id, "❗ Havola noto'g'ri. Qayta yuboring.").await?;
                return Ok(());
            }
            draft.link = Some(text.to_string());
            sessions.set_wizard(user_id, WizardState::AddChannel { step: ChannelStep::ChatId, draft });
            bot.send_message(
                chat_id,
                "Kanal chat id sini yuboring (masalan -1001234567890, tashqi havola uchun: -).",
            )
            .await?;
        }
        ChannelStep::ChatId => {
            if text != SKIP_WORD {
                if text.parse::<i64>().is_err() {
                    bot.send_message(chat_id, "❗ Chat id raqam bo'lishi kerak.").await?;
                    return Ok(());
                }
                draft.chat_id = Some(text.to_string());
            }
            sessions.set_wizard(user_id, WizardState::AddChannel { step: ChannelStep::Type, draft });
            bot.send_message(
                chat_id,
                "Kanal turini tanlang:\n1 — PUBLIC\n2 — PRIVATE\n3 — PRIVATE_WITH_ADMIN_APPROVAL\n4 — EXTERNAL",
            )
            .await?;
        }
        ChannelStep::Type => {
            let channel_type = match text {
                "1" => ChannelType::Public,
                "2" => ChannelType::Private,
                "3" => ChannelType::PrivateWithAdminApproval,
                "4" => ChannelType::External,
                _ => {
                    bot.send_message(chat_id, "❗ 1 dan 4 gacha raqam yuboring.").await?;
                    return Ok(());
                }
            };
            if channel_type != ChannelType::External && draft.chat_id.is_none() {
                bot.send_message(
                    chat_id,
                    "❗ Bu tur uchun chat id majburiy. /cancel qilib qaytadan boshlang.",
                )
                .await?;
                return Ok(());
            }
            draft.channel_type = Some(channel_type.as_str().to_string());
            sessions.set_wizard(user_id, WizardState::AddChannel { step: ChannelStep::MemberLimit, draft });
            bot.send_message(chat_id, "A'zolar limitini yuboring (limitsiz: -).").await?;
        }
        ChannelStep::MemberLimit => {
            let member_limit = if text == SKIP_WORD {
                None
            } else {
                match text.parse::<i64>() {
                    Ok(limit) if limit > 0 => Some(limit),
                    _ => {
                        bot.send_message(chat_id, "❗ Limit musbat raqam bo'lishi kerak.").await?;
                        return Ok(());
                    }
                }
            };

            let conn = get_connection(pool)?;
            let channel_type = draft
                .channel_type
                .as_deref()
                .map(ChannelType::parse)
                .unwrap_or(ChannelType::Public);
            let channel_id = channels::create_mandatory_channel(
                &conn,
                draft.chat_id.as_deref(),
                draft.name.as_deref().unwrap_or_default(),
                draft.link.as_deref().unwrap_or_default(),
                channel_type,
                member_limit,
            )?;
            sessions.clear_wizard(user_id);
            log::info!(
                "Mandatory channel {} ({:?}) added as {}",
                channel_id,
                draft.name,
                channel_type.as_str()
            );
            bot.send_message(
                chat_id,
                format!("✅ Kanal qo'shildi (id {}).", channel_id),
            )
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn admins_table_grants_admin() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::storage::create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();
        assert!(!users::is_dynamic_admin(&conn, 424242).unwrap());

        users::add_admin(&conn, 424242).unwrap();
        assert!(is_admin(&conn, 424242));
    }

    #[test]
    fn announcement_button_is_a_deep_link_not_a_callback() {
        let keyboard = announcement_keyboard("kinoteka_bot", "s77").unwrap();
        let button = &keyboard.inline_keyboard[0][0];
        match &button.kind {
            InlineKeyboardButtonKind::Url(url) => {
                assert_eq!(url.as_str(), "https://t.me/kinoteka_bot?start=s77");
            }
            other => panic!("expected a url button, got {:?}", other),
        }
    }

    #[test]
    fn movie_announcement_payload_is_the_bare_code() {
        let keyboard = announcement_keyboard("kinoteka_bot", "123").unwrap();
        let button = &keyboard.inline_keyboard[0][0];
        match &button.kind {
            InlineKeyboardButtonKind::Url(url) => {
                assert_eq!(url.as_str(), "https://t.me/kinoteka_bot?start=123");
            }
            other => panic!("expected a url button, got {:?}", other),
        }
    }

    #[test]
    fn append_numbering_resumes_after_existing_parts() {
        assert_eq!(resume_part_number(Some(3), true), 4);
        assert_eq!(resume_part_number(None, true), 2);
        assert_eq!(resume_part_number(None, false), 1);
    }
}
