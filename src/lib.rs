//! Kinoteka: a Telegram bot that serves movies and serials by numeric code,
//! gates access behind mandatory channel subscriptions, and sells premium
//! through Payme and manual receipts.

pub mod core;
pub mod payme;
pub mod session;
pub mod storage;
pub mod telegram;
pub mod web;

pub use crate::core::{init_logger, AppError, AppResult};
pub use crate::session::SessionStore;
pub use crate::storage::{create_pool, DbPool};
pub use crate::telegram::{create_bot, schema, HandlerDeps, HandlerError};
