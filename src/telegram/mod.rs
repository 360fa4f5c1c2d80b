//! Telegram-facing modules: bot setup, update handlers, and the feature
//! surfaces they route into.

pub mod admin;
pub mod bot;
pub mod content;
pub mod handlers;
pub mod membership;
pub mod menu;
pub mod notifications;
pub mod premium;
pub mod subscriptions;

pub use bot::{create_bot, setup_bot_commands, Command};
pub use handlers::{schema, HandlerDeps, HandlerError};
