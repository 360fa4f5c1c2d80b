//! Bot initialization and command registration

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Buyruqlar:")]
pub enum Command {
    #[command(description = "botni ishga tushirish")]
    Start,
    #[command(description = "admin panel (faqat adminlar uchun)")]
    Admin,
}

/// Creates a Bot instance with a custom request timeout
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Failed to create bot (invalid token, client build failure)
pub fn create_bot() -> anyhow::Result<Bot> {
    if config::BOT_TOKEN.is_empty() {
        anyhow::bail!("BOT_TOKEN is not set");
    }
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    Ok(Bot::with_client(config::BOT_TOKEN.clone(), client))
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![BotCommand::new("start", "botni ishga tushirish")])
        .await?;

    Ok(())
}

/// Parses a /start deep-link payload into a content code.
///
/// `"s12"` refers to serial code 12, a bare number to a movie code.
pub fn parse_start_payload(payload: &str) -> Option<DeepLink> {
    let payload = payload.trim();
    if let Some(rest) = payload.strip_prefix('s') {
        rest.parse().ok().map(DeepLink::Serial)
    } else {
        payload.parse().ok().map(DeepLink::Movie)
    }
}

/// Target of a /start deep link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLink {
    Movie(i64),
    Serial(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_descriptions() {
        let commands = Command::descriptions();
        let command_list = format!("{}", commands);

        assert!(command_list.contains("Buyruqlar"));
        assert!(command_list.contains("start"));
        assert!(command_list.contains("admin"));
    }

    #[test]
    fn test_parse_start_payload() {
        assert_eq!(parse_start_payload("12"), Some(DeepLink::Movie(12)));
        assert_eq!(parse_start_payload("s34"), Some(DeepLink::Serial(34)));
        assert_eq!(parse_start_payload(" s7 "), Some(DeepLink::Serial(7)));
        assert_eq!(parse_start_payload("abc"), None);
        assert_eq!(parse_start_payload("s"), None);
        assert_eq!(parse_start_payload(""), None);
    }
}
