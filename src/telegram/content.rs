//! Content delivery: code search, movie/serial cards, episode buttons,
//! inline queries, and deep links.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButton, InlineKeyboardMarkup, InlineQueryResult, InlineQueryResultArticle, InputFile,
    InputMessageContent, InputMessageContentText,
};

use crate::core::error::AppResult;
use crate::storage::content::{self, Episode, Movie, MoviePart, Serial};
use crate::storage::db::{DbConnection, DbPool};
use crate::storage::get_connection;

/// Buttons per keyboard row for episode/part lists.
const BUTTONS_PER_ROW: usize = 5;

/// Caption card for a movie.
pub fn movie_caption(movie: &Movie) -> String {
    let mut caption = format!(
        "╭─────────────────\n│ 🎬 {}\n│ 🔢 Kod: {}",
        movie.title, movie.code
    );
    if let Some(genre) = movie.genre.as_deref() {
        caption.push_str(&format!("\n│ 🎭 Janr: {}", genre));
    }
    if movie.total_parts > 1 {
        caption.push_str(&format!("\n│ 🎞 Qismlar: {}", movie.total_parts));
    }
    caption.push_str("\n╰─────────────────");
    if let Some(description) = movie.description.as_deref() {
        caption.push_str(&format!("\n\n{}", description));
    }
    caption
}

/// Caption card for a serial.
pub fn serial_caption(serial: &Serial) -> String {
    let mut caption = format!(
        "╭─────────────────\n│ 📺 {}\n│ 🔢 Kod: s{}\n│ 🎬 Qismlar: {}",
        serial.title, serial.code, serial.total_episodes
    );
    if let Some(genre) = serial.genre.as_deref() {
        caption.push_str(&format!("\n│ 🎭 Janr: {}", genre));
    }
    caption.push_str("\n╰─────────────────");
    if let Some(description) = serial.description.as_deref() {
        caption.push_str(&format!("\n\n{}", description));
    }
    caption
}

/// Chunk numbered buttons into rows of [`BUTTONS_PER_ROW`].
fn numbered_keyboard(prefix: &str, owner_id: i64, numbers: &[i64]) -> Vec<Vec<InlineKeyboardButton>> {
    numbers
        .chunks(BUTTONS_PER_ROW)
        .map(|chunk| {
            chunk
                .iter()
                .map(|n| InlineKeyboardButton::callback(n.to_string(), format!("{}_{}_{}", prefix, owner_id, n)))
                .collect()
        })
        .collect()
}

/// Episode selection keyboard for a serial, plus the field-channel button.
pub fn serial_keyboard(serial: &Serial, episodes: &[Episode]) -> InlineKeyboardMarkup {
    let numbers: Vec<i64> = episodes.iter().map(|e| e.episode_number).collect();
    let mut rows = numbered_keyboard("episode", serial.id, &numbers);
    if let Some(field_id) = serial.field_id {
        rows.push(vec![InlineKeyboardButton::callback(
            "📣 Kanalga o'tish".to_string(),
            format!("field_channel_{}", field_id),
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}

/// Part selection keyboard for a multi-part movie.
pub fn movie_parts_keyboard(movie: &Movie, parts: &[MoviePart]) -> InlineKeyboardMarkup {
    let numbers: Vec<i64> = parts.iter().map(|p| p.part_number).collect();
    InlineKeyboardMarkup::new(numbered_keyboard("movie_part", movie.id, &numbers))
}

/// Send the movie card and, for single-part movies, the video itself.
pub async fn send_movie(bot: &Bot, conn: &DbConnection, chat_id: ChatId, movie: &Movie) -> AppResult<()> {
    let caption = movie_caption(movie);

    if movie.total_parts > 1 {
        let parts = content::find_movie_parts(conn, movie.id)?;
        let keyboard = movie_parts_keyboard(movie, &parts);
        match movie.poster_file_id.as_deref() {
            Some(poster) => {
                bot.send_photo(chat_id, InputFile::file_id(FileId(poster.to_string())))
                    .caption(caption)
                    .reply_markup(keyboard)
                    .await?;
            }
            None => {
                bot.send_message(chat_id, caption).reply_markup(keyboard).await?;
            }
        }
        return Ok(());
    }

    match movie.video_file_id.as_deref() {
        Some(video) => {
            bot.send_video(chat_id, InputFile::file_id(FileId(video.to_string())))
                .caption(caption)
                .await?;
        }
        None => {
            bot.send_message(chat_id, format!("{}\n\n⚠️ Video hali yuklanmagan.", caption))
                .await?;
        }
    }
    Ok(())
}

/// Send one part of a multi-part movie.
pub async fn send_movie_part(bot: &Bot, conn: &DbConnection, chat_id: ChatId, movie_id: i64, part: i64) -> AppResult<()> {
    let Some(movie) = content::find_movie_by_id(conn, movie_id)? else {
        bot.send_message(chat_id, "❌ Kino topilmadi.").await?;
        return Ok(());
    };
    let parts = content::find_movie_parts(conn, movie_id)?;
    let Some(found) = parts.iter().find(|p| p.part_number == part) else {
        bot.send_message(chat_id, "❌ Bunday qism yo'q.").await?;
        return Ok(());
    };
    bot.send_video(chat_id, InputFile::file_id(FileId(found.video_file_id.clone())))
        .caption(format!("🎬 {} — {}-qism", movie.title, part))
        .await?;
    Ok(())
}

/// Send the serial card with its episode keyboard.
pub async fn send_serial(bot: &Bot, conn: &DbConnection, chat_id: ChatId, serial: &Serial) -> AppResult<()> {
    let episodes = content::find_episodes(conn, serial.id)?;
    let caption = serial_caption(serial);
    let keyboard = serial_keyboard(serial, &episodes);

    match serial.poster_file_id.as_deref() {
        Some(poster) => {
            bot.send_photo(chat_id, InputFile::file_id(FileId(poster.to_string())))
                .caption(caption)
                .reply_markup(keyboard)
                .await?;
        }
        None => {
            bot.send_message(chat_id, caption).reply_markup(keyboard).await?;
        }
    }
    Ok(())
}

/// Send one episode of a serial.
pub async fn send_episode(
    bot: &Bot,
    conn: &DbConnection,
    chat_id: ChatId,
    serial_id: i64,
    episode_number: i64,
) -> AppResult<()> {
    let Some(serial) = content::find_serial_by_id(conn, serial_id)? else {
        bot.send_message(chat_id, "❌ Serial topilmadi.").await?;
        return Ok(());
    };
    let Some(episode) = content::find_episode(conn, serial_id, episode_number)? else {
        bot.send_message(chat_id, "❌ Bunday qism yo'q.").await?;
        return Ok(());
    };
    bot.send_video(chat_id, InputFile::file_id(FileId(episode.video_file_id)))
        .caption(format!("📺 {} — {}-qism", serial.title, episode_number))
        .await?;
    Ok(())
}

/// Resolve a numeric code against movies first, then serials.
pub async fn handle_code_search(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId, user_id: i64, code: i64) -> AppResult<()> {
    let conn = get_connection(pool)?;

    if let Some(movie) = content::find_movie_by_code(&conn, code)? {
        send_movie(bot, &conn, chat_id, &movie).await?;
        if let Err(e) = content::record_watch(&conn, user_id, Some(movie.id), None) {
            log::warn!("Failed to record watch for user {}: {}", user_id, e);
        }
        return Ok(());
    }
    if let Some(serial) = content::find_serial_by_code(&conn, code)? {
        send_serial(bot, &conn, chat_id, &serial).await?;
        if let Err(e) = content::record_watch(&conn, user_id, None, Some(serial.id)) {
            log::warn!("Failed to record watch for user {}: {}", user_id, e);
        }
        return Ok(());
    }

    bot.send_message(
        chat_id,
        format!("❌ {} kodi bo'yicha hech narsa topilmadi. Kodni tekshirib, qayta yuboring.", code),
    )
    .await?;
    Ok(())
}

/// Resolve an explicit serial code (from `/start s<code>` deep links).
pub async fn handle_serial_code(bot: &Bot, pool: &Arc<DbPool>, chat_id: ChatId, user_id: i64, code: i64) -> AppResult<()> {
    let conn = get_connection(pool)?;
    match content::find_serial_by_code(&conn, code)? {
        Some(serial) => {
            send_serial(bot, &conn, chat_id, &serial).await?;
            if let Err(e) = content::record_watch(&conn, user_id, None, Some(serial.id)) {
                log::warn!("Failed to record watch for user {}: {}", user_id, e);
            }
        }
        None => {
            bot.send_message(chat_id, format!("❌ s{} kodi bo'yicha serial topilmadi.", code))
                .await?;
        }
    }
    Ok(())
}

/// Inline query: `s<code>` looks up serials, a bare number movies, anything
/// else searches titles. Selecting a result posts the code into the chat.
pub async fn handle_inline_query(bot: &Bot, pool: &Arc<DbPool>, query: &InlineQuery) -> AppResult<()> {
    let conn = get_connection(pool)?;
    let text = query.query.trim();

    let mut results: Vec<InlineQueryResult> = Vec::new();

    if let Some(code) = text.strip_prefix('s').and_then(|rest| rest.parse::<i64>().ok()) {
        if let Some(serial) = content::find_serial_by_code(&conn, code)? {
            results.push(inline_article(
                &format!("serial_{}", serial.id),
                &format!("📺 {}", serial.title),
                &format!("s{}", serial.code),
            ));
        }
    } else if let Ok(code) = text.parse::<i64>() {
        if let Some(movie) = content::find_movie_by_code(&conn, code)? {
            results.push(inline_article(
                &format!("movie_{}", movie.id),
                &format!("🎬 {}", movie.title),
                &movie.code.to_string(),
            ));
        }
    } else if !text.is_empty() {
        for movie in content::search_movies_by_title(&conn, text, 10)? {
            results.push(inline_article(
                &format!("movie_{}", movie.id),
                &format!("🎬 {}", movie.title),
                &movie.code.to_string(),
            ));
        }
        for serial in content::search_serials_by_title(&conn, text, 10)? {
            results.push(inline_article(
                &format!("serial_{}", serial.id),
                &format!("📺 {}", serial.title),
                &format!("s{}", serial.code),
            ));
        }
    }

    bot.answer_inline_query(query.id.clone(), results).await?;
    Ok(())
}

fn inline_article(id: &str, title: &str, message: &str) -> InlineQueryResult {
    InlineQueryResult::Article(InlineQueryResultArticle::new(
        id.to_string(),
        title.to_string(),
        InputMessageContent::Text(InputMessageContentText::new(message.to_string())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_movie() -> Movie {
        Movie {
            id: 1,
            code: 123,
            title: "Qasoskorlar".to_string(),
            genre: Some("Jangari".to_string()),
            description: Some("Marvel kinosi".to_string()),
            field_id: None,
            poster_file_id: None,
            video_file_id: Some("file".to_string()),
            total_parts: 1,
        }
    }

    #[test]
    fn movie_caption_contains_code_and_genre() {
        let caption = movie_caption(&sample_movie());
        assert!(caption.contains("Qasoskorlar"));
        assert!(caption.contains("Kod: 123"));
        assert!(caption.contains("Janr: Jangari"));
        assert!(caption.contains("Marvel kinosi"));
        assert!(!caption.contains("Qismlar"));
    }

    #[test]
    fn serial_caption_uses_s_prefixed_code() {
        let serial = Serial {
            id: 2,
            code: 45,
            title: "Sherlok".to_string(),
            genre: None,
            description: None,
            field_id: None,
            poster_file_id: None,
            total_episodes: 8,
        };
        let caption = serial_caption(&serial);
        assert!(caption.contains("Kod: s45"));
        assert!(caption.contains("Qismlar: 8"));
    }

    #[test]
    fn episode_buttons_are_chunked_in_fives() {
        let serial = Serial {
            id: 9,
            code: 1,
            title: "T".to_string(),
            genre: None,
            description: None,
            field_id: None,
            poster_file_id: None,
            total_episodes: 12,
        };
        let episodes: Vec<Episode> = (1..=12)
            .map(|n| Episode {
                episode_number: n,
                video_file_id: format!("f{}", n),
            })
            .collect();

        let keyboard = serial_keyboard(&serial, &episodes);
        let rows = &keyboard.inline_keyboard;
        assert_eq!(rows.len(), 3); // 5 + 5 + 2
        assert_eq!(rows[0].len(), 5);
        assert_eq!(rows[2].len(), 2);
        assert_eq!(rows[0][0].text, "1");
    }

    #[test]
    fn field_button_appended_when_field_set() {
        let serial = Serial {
            id: 9,
            code: 1,
            title: "T".to_string(),
            genre: None,
            description: None,
            field_id: Some(4),
            poster_file_id: None,
            total_episodes: 1,
        };
        let episodes = vec![Episode {
            episode_number: 1,
            video_file_id: "f".to_string(),
        }];

        let keyboard = serial_keyboard(&serial, &episodes);
        let last_row = keyboard.inline_keyboard.last().unwrap();
        assert_eq!(last_row.len(), 1);
        assert!(last_row[0].text.contains("Kanalga"));
    }
}
