//! Content catalog: fields, movies, serials, episodes, watch history.

use rusqlite::{params, OptionalExtension, Result};

use crate::storage::db::DbConnection;

#[derive(Debug, Clone)]
pub struct Field {
    pub id: i64,
    pub name: String,
    pub channel_id: Option<String>,
    pub channel_link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Movie {
    pub id: i64,
    pub code: i64,
    pub title: String,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub field_id: Option<i64>,
    pub poster_file_id: Option<String>,
    pub video_file_id: Option<String>,
    pub total_parts: i64,
}

#[derive(Debug, Clone)]
pub struct MoviePart {
    pub part_number: i64,
    pub video_file_id: String,
}

#[derive(Debug, Clone)]
pub struct Serial {
    pub id: i64,
    pub code: i64,
    pub title: String,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub field_id: Option<i64>,
    pub poster_file_id: Option<String>,
    pub total_episodes: i64,
}

#[derive(Debug, Clone)]
pub struct Episode {
    pub episode_number: i64,
    pub video_file_id: String,
}

pub fn create_field(
    conn: &DbConnection,
    name: &str,
    channel_id: Option<&str>,
    channel_link: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO fields (name, channel_id, channel_link) VALUES (?1, ?2, ?3)",
        params![name, channel_id, channel_link],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_all_fields(conn: &DbConnection) -> Result<Vec<Field>> {
    let mut stmt = conn.prepare("SELECT id, name, channel_id, channel_link FROM fields ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Field {
            id: row.get(0)?,
            name: row.get(1)?,
            channel_id: row.get(2)?,
            channel_link: row.get(3)?,
        })
    })?;
    rows.collect()
}

pub fn find_field_by_id(conn: &DbConnection, id: i64) -> Result<Option<Field>> {
    conn.query_row(
        "SELECT id, name, channel_id, channel_link FROM fields WHERE id = ?1",
        params![id],
        |row| {
            Ok(Field {
                id: row.get(0)?,
                name: row.get(1)?,
                channel_id: row.get(2)?,
                channel_link: row.get(3)?,
            })
        },
    )
    .optional()
}

fn row_to_movie(row: &rusqlite::Row<'_>) -> Result<Movie> {
    Ok(Movie {
        id: row.get(0)?,
        code: row.get(1)?,
        title: row.get(2)?,
        genre: row.get(3)?,
        description: row.get(4)?,
        field_id: row.get(5)?,
        poster_file_id: row.get(6)?,
        video_file_id: row.get(7)?,
        total_parts: row.get(8)?,
    })
}

const MOVIE_COLUMNS: &str =
    "id, code, title, genre, description, field_id, poster_file_id, video_file_id, total_parts";

pub fn create_movie(
    conn: &DbConnection,
    code: i64,
    title: &str,
    genre: Option<&str>,
    description: Option<&str>,
    field_id: Option<i64>,
    poster_file_id: Option<&str>,
    video_file_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO movies (code, title, genre, description, field_id, poster_file_id, video_file_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![code, title, genre, description, field_id, poster_file_id, video_file_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_movie_by_id(conn: &DbConnection, id: i64) -> Result<Option<Movie>> {
    conn.query_row(
        &format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = ?1"),
        params![id],
        row_to_movie,
    )
    .optional()
}

pub fn find_movie_by_code(conn: &DbConnection, code: i64) -> Result<Option<Movie>> {
    conn.query_row(
        &format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE code = ?1"),
        params![code],
        row_to_movie,
    )
    .optional()
}

pub fn search_movies_by_title(conn: &DbConnection, query: &str, limit: i64) -> Result<Vec<Movie>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MOVIE_COLUMNS} FROM movies WHERE title LIKE ?1 ORDER BY code LIMIT ?2"
    ))?;
    let pattern = format!("%{}%", query);
    let rows = stmt.query_map(params![pattern, limit], row_to_movie)?;
    rows.collect()
}

pub fn set_movie_video(conn: &DbConnection, movie_id: i64, video_file_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE movies SET video_file_id = ?2 WHERE id = ?1",
        params![movie_id, video_file_id],
    )?;
    Ok(())
}

pub fn add_movie_part(conn: &DbConnection, movie_id: i64, part_number: i64, video_file_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO movie_episodes (movie_id, part_number, video_file_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(movie_id, part_number) DO UPDATE SET video_file_id = excluded.video_file_id",
        params![movie_id, part_number, video_file_id],
    )?;
    conn.execute(
        "UPDATE movies SET total_parts = (SELECT COUNT(*) FROM movie_episodes WHERE movie_id = ?1)
         WHERE id = ?1",
        params![movie_id],
    )?;
    Ok(())
}

pub fn find_movie_parts(conn: &DbConnection, movie_id: i64) -> Result<Vec<MoviePart>> {
    let mut stmt = conn.prepare(
        "SELECT part_number, video_file_id FROM movie_episodes
         WHERE movie_id = ?1 ORDER BY part_number",
    )?;
    let rows = stmt.query_map(params![movie_id], |row| {
        Ok(MoviePart {
            part_number: row.get(0)?,
            video_file_id: row.get(1)?,
        })
    })?;
    rows.collect()
}

fn row_to_serial(row: &rusqlite::Row<'_>) -> Result<Serial> {
    Ok(Serial {
        id: row.get(0)?,
        code: row.get(1)?,
        title: row.get(2)?,
        genre: row.get(3)?,
        description: row.get(4)?,
        field_id: row.get(5)?,
        poster_file_id: row.get(6)?,
        total_episodes: row.get(7)?,
    })
}

const SERIAL_COLUMNS: &str =
    "id, code, title, genre, description, field_id, poster_file_id, total_episodes";

pub fn create_serial(
    conn: &DbConnection,
    code: i64,
    title: &str,
    genre: Option<&str>,
    description: Option<&str>,
    field_id: Option<i64>,
    poster_file_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO serials (code, title, genre, description, field_id, poster_file_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![code, title, genre, description, field_id, poster_file_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_serial_by_id(conn: &DbConnection, id: i64) -> Result<Option<Serial>> {
    conn.query_row(
        &format!("SELECT {SERIAL_COLUMNS} FROM serials WHERE id = ?1"),
        params![id],
        row_to_serial,
    )
    .optional()
}

pub fn find_serial_by_code(conn: &DbConnection, code: i64) -> Result<Option<Serial>> {
    conn.query_row(
        &format!("SELECT {SERIAL_COLUMNS} FROM serials WHERE code = ?1"),
        params![code],
        row_to_serial,
    )
    .optional()
}

pub fn search_serials_by_title(conn: &DbConnection, query: &str, limit: i64) -> Result<Vec<Serial>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SERIAL_COLUMNS} FROM serials WHERE title LIKE ?1 ORDER BY code LIMIT ?2"
    ))?;
    let pattern = format!("%{}%", query);
    let rows = stmt.query_map(params![pattern, limit], row_to_serial)?;
    rows.collect()
}

pub fn add_episode(conn: &DbConnection, serial_id: i64, episode_number: i64, video_file_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO episodes (serial_id, episode_number, video_file_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(serial_id, episode_number) DO UPDATE SET video_file_id = excluded.video_file_id",
        params![serial_id, episode_number, video_file_id],
    )?;
    conn.execute(
        "UPDATE serials SET total_episodes = (SELECT COUNT(*) FROM episodes WHERE serial_id = ?1)
         WHERE id = ?1",
        params![serial_id],
    )?;
    Ok(())
}

pub fn find_episodes(conn: &DbConnection, serial_id: i64) -> Result<Vec<Episode>> {
    let mut stmt = conn.prepare(
        "SELECT episode_number, video_file_id FROM episodes
         WHERE serial_id = ?1 ORDER BY episode_number",
    )?;
    let rows = stmt.query_map(params![serial_id], |row| {
        Ok(Episode {
            episode_number: row.get(0)?,
            video_file_id: row.get(1)?,
        })
    })?;
    rows.collect()
}

pub fn find_episode(conn: &DbConnection, serial_id: i64, episode_number: i64) -> Result<Option<Episode>> {
    conn.query_row(
        "SELECT episode_number, video_file_id FROM episodes
         WHERE serial_id = ?1 AND episode_number = ?2",
        params![serial_id, episode_number],
        |row| {
            Ok(Episode {
                episode_number: row.get(0)?,
                video_file_id: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Whether a numeric code is free across both movies and serials.
pub fn is_code_available(conn: &DbConnection, code: i64) -> Result<bool> {
    let taken: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM movies WHERE code = ?1)
              + (SELECT COUNT(*) FROM serials WHERE code = ?1)",
        params![code],
        |row| row.get(0),
    )?;
    Ok(taken == 0)
}

/// Nearest free codes around a taken one, suggested to admins in the wizard.
pub fn find_nearest_available_codes(conn: &DbConnection, around: i64, count: usize) -> Result<Vec<i64>> {
    let mut found = Vec::new();
    let mut offset: i64 = 1;
    while found.len() < count && offset < 1000 {
        for candidate in [around + offset, around - offset] {
            if candidate > 0 && found.len() < count && is_code_available(conn, candidate)? {
                found.push(candidate);
            }
        }
        offset += 1;
    }
    found.sort_unstable();
    Ok(found)
}

pub fn record_watch(
    conn: &DbConnection,
    user_id: i64,
    movie_id: Option<i64>,
    serial_id: Option<i64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO watch_history (user_id, movie_id, serial_id) VALUES (?1, ?2, ?3)",
        params![user_id, movie_id, serial_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::{create_pool, get_connection};
    use pretty_assertions::assert_eq;

    fn test_conn() -> (tempfile::TempDir, DbConnection) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();
        (dir, conn)
    }

    #[test]
    fn movie_lookup_by_code() {
        let (_dir, conn) = test_conn();
        create_movie(&conn, 101, "Qasoskorlar", Some("Jangari"), None, None, None, Some("file1")).unwrap();

        let movie = find_movie_by_code(&conn, 101).unwrap().unwrap();
        assert_eq!(movie.title, "Qasoskorlar");
        assert!(find_movie_by_code(&conn, 102).unwrap().is_none());
    }

    #[test]
    fn episode_upsert_updates_total() {
        let (_dir, conn) = test_conn();
        let id = create_serial(&conn, 5, "Sherlok", None, None, None, None).unwrap();

        add_episode(&conn, id, 1, "file1").unwrap();
        add_episode(&conn, id, 2, "file2").unwrap();
        add_episode(&conn, id, 2, "file2b").unwrap();

        let serial = find_serial_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(serial.total_episodes, 2);

        let ep = find_episode(&conn, id, 2).unwrap().unwrap();
        assert_eq!(ep.video_file_id, "file2b");
    }

    #[test]
    fn single_movie_grows_into_parts() {
        let (_dir, conn) = test_conn();
        let id = create_movie(&conn, 200, "Dyuna", None, None, None, None, None).unwrap();

        // Wizard flow: first upload becomes both part 1 and the single-video
        // source, later uploads are parts only.
        add_movie_part(&conn, id, 1, "vid1").unwrap();
        set_movie_video(&conn, id, "vid1").unwrap();
        let movie = find_movie_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(movie.video_file_id.as_deref(), Some("vid1"));
        assert_eq!(movie.total_parts, 1);

        add_movie_part(&conn, id, 2, "vid2").unwrap();
        let movie = find_movie_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(movie.total_parts, 2);

        let parts = find_movie_parts(&conn, id).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].video_file_id, "vid2");
    }

    #[test]
    fn code_availability_spans_movies_and_serials() {
        let (_dir, conn) = test_conn();
        create_movie(&conn, 10, "A", None, None, None, None, None).unwrap();
        create_serial(&conn, 11, "B", None, None, None, None).unwrap();

        assert!(!is_code_available(&conn, 10).unwrap());
        assert!(!is_code_available(&conn, 11).unwrap());
        assert!(is_code_available(&conn, 12).unwrap());
    }

    #[test]
    fn nearest_codes_skip_taken_ones() {
        let (_dir, conn) = test_conn();
        create_movie(&conn, 10, "A", None, None, None, None, None).unwrap();
        create_movie(&conn, 11, "B", None, None, None, None, None).unwrap();
        create_movie(&conn, 9, "C", None, None, None, None, None).unwrap();

        let suggestions = find_nearest_available_codes(&conn, 10, 3).unwrap();
        assert_eq!(suggestions.len(), 3);
        for code in &suggestions {
            assert!(is_code_available(&conn, *code).unwrap());
        }
    }

    #[test]
    fn title_search_is_substring_match() {
        let (_dir, conn) = test_conn();
        create_movie(&conn, 1, "Qasoskorlar", None, None, None, None, None).unwrap();
        create_movie(&conn, 2, "Sherlok Xolms", None, None, None, None, None).unwrap();

        let hits = search_movies_by_title(&conn, "sherlok", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].code, 2);
    }
}
