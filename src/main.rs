use std::sync::Arc;

use teloxide::prelude::*;

use kinoteka::core::config;
use kinoteka::session::SessionStore;
use kinoteka::storage::{self, get_connection};
use kinoteka::telegram::{self, HandlerDeps};
use kinoteka::{init_logger, web};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logger(&config::LOG_FILE_PATH)?;
    log::info!("Starting kinoteka bot");

    let bot = telegram::create_bot()?;

    // Telegram may not be reachable right after a deploy; retry before
    // giving up.
    let mut me = None;
    for attempt in 1..=config::retry::MAX_STARTUP_RETRIES {
        match bot.get_me().await {
            Ok(user) => {
                me = Some(user);
                break;
            }
            Err(e) => {
                log::warn!(
                    "get_me attempt {}/{} failed: {}",
                    attempt,
                    config::retry::MAX_STARTUP_RETRIES,
                    e
                );
                tokio::time::sleep(config::retry::startup_delay()).await;
            }
        }
    }
    let me = me.ok_or_else(|| anyhow::anyhow!("Telegram is unreachable, giving up"))?;
    log::info!("Authorized as @{}", me.username());

    let db_pool = Arc::new(storage::create_pool(&config::DATABASE_PATH)?);
    {
        let conn = get_connection(&db_pool)?;
        storage::payments::seed_premium_settings(
            &conn,
            *config::premium::MONTHLY,
            *config::premium::QUARTERLY,
            *config::premium::HALF_YEAR,
            *config::premium::YEARLY,
            &config::premium::CARD_NUMBER,
            &config::premium::CARD_HOLDER,
        )?;

        // First start: register the default database channel so uploads have
        // somewhere to point at.
        if storage::channels::count_database_channels(&conn)? == 0 {
            if let Some(link) = config::DEFAULT_DATABASE_CHANNEL_LINK.as_deref() {
                let id = storage::channels::create_database_channel(
                    &conn,
                    link,
                    &config::DEFAULT_DATABASE_CHANNEL_NAME,
                    Some(link),
                )?;
                log::info!("Registered default database channel {}", id);
            }
        }
    }

    if let Err(e) = telegram::setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let web_db = db_pool.clone();
    let web_bot = bot.clone();
    tokio::spawn(async move {
        if let Err(e) = web::start_web_server(*config::PORT, web_db, web_bot).await {
            log::error!("Payment API server exited: {}", e);
        }
    });

    let deps = HandlerDeps {
        db_pool,
        sessions: Arc::new(SessionStore::new()),
        bot_username: me.username().to_string(),
    };

    Dispatcher::builder(bot, telegram::schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
