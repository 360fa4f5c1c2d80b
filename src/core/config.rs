use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_URL environment variable; a `sqlite://` prefix is
/// tolerated and stripped so the same value works for ORM-style tooling.
/// Default: kinoteka.db
pub static DATABASE_PATH: Lazy<String> = Lazy::new(|| {
    let raw = env::var("DATABASE_URL").unwrap_or_else(|_| "kinoteka.db".to_string());
    raw.strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
        .unwrap_or(&raw)
        .to_string()
});

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kinoteka.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "kinoteka.log".to_string()));

/// Port for the payment HTTP API
/// Read from PORT environment variable
/// Default: 3000
pub static PORT: Lazy<u16> = Lazy::new(|| {
    env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
});

/// Invite link of the default database channel, created on first start when
/// no database channel exists yet.
/// Read from DEFAULT_DATABASE_CHANNEL_LINK environment variable
pub static DEFAULT_DATABASE_CHANNEL_LINK: Lazy<Option<String>> = Lazy::new(|| {
    env::var("DEFAULT_DATABASE_CHANNEL_LINK")
        .ok()
        .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
});

/// Display name for the default database channel
/// Read from DEFAULT_DATABASE_CHANNEL_NAME environment variable
pub static DEFAULT_DATABASE_CHANNEL_NAME: Lazy<String> = Lazy::new(|| {
    env::var("DEFAULT_DATABASE_CHANNEL_NAME").unwrap_or_else(|_| "Kino baza".to_string())
});

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    fn parse_admin_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Admin user IDs (comma-separated)
    /// Read from ADMIN_IDS environment variable
    pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMIN_IDS")
            .ok()
            .map(|raw| parse_admin_ids(&raw))
            .unwrap_or_default()
    });

    /// Admin user ID for direct notifications (new payments, errors)
    /// Read from ADMIN_USER_ID or fallback to first ADMIN_IDS entry
    /// Defaults to 0 if not set (no admin notifications)
    pub static ADMIN_USER_ID: Lazy<i64> = Lazy::new(|| {
        env::var("ADMIN_USER_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| ADMIN_IDS.first().copied())
            .unwrap_or(0)
    });

    #[cfg(test)]
    mod tests {
        use super::parse_admin_ids;
        use pretty_assertions::assert_eq;

        #[test]
        fn parses_comma_and_space_separated_ids() {
            assert_eq!(parse_admin_ids("1, 2 3\n4"), vec![1, 2, 3, 4]);
        }

        #[test]
        fn skips_garbage_entries() {
            assert_eq!(parse_admin_ids("12,abc, ,34"), vec![12, 34]);
        }
    }
}

/// Payme merchant configuration
pub mod payme {
    use once_cell::sync::Lazy;
    use std::env;

    /// Merchant ID issued by Payme
    /// Read from PAYME_MERCHANT_ID environment variable
    pub static MERCHANT_ID: Lazy<String> =
        Lazy::new(|| env::var("PAYME_MERCHANT_ID").unwrap_or_else(|_| String::new()));

    /// Merchant key used to verify webhook Basic auth
    /// Read from PAYME_MERCHANT_KEY environment variable
    pub static MERCHANT_KEY: Lazy<String> =
        Lazy::new(|| env::var("PAYME_MERCHANT_KEY").unwrap_or_else(|_| String::new()));

    /// Checkout endpoint the payment link points at
    /// Read from PAYME_ENDPOINT environment variable
    /// Default: https://checkout.paycom.uz
    pub static ENDPOINT: Lazy<String> = Lazy::new(|| {
        env::var("PAYME_ENDPOINT").unwrap_or_else(|_| "https://checkout.paycom.uz".to_string())
    });
}

/// Premium pricing defaults, in UZS. Used to seed premium_settings on first
/// start; after that the database row wins.
pub mod premium {
    use once_cell::sync::Lazy;
    use std::env;

    fn price_from_env(var: &str, default: i64) -> i64 {
        env::var(var).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    /// 30-day price, PREMIUM_PRICE_MONTHLY env var
    pub static MONTHLY: Lazy<i64> = Lazy::new(|| price_from_env("PREMIUM_PRICE_MONTHLY", 15_000));

    /// 90-day price, PREMIUM_PRICE_QUARTERLY env var
    pub static QUARTERLY: Lazy<i64> = Lazy::new(|| price_from_env("PREMIUM_PRICE_QUARTERLY", 40_000));

    /// 180-day price, PREMIUM_PRICE_HALF_YEAR env var
    pub static HALF_YEAR: Lazy<i64> = Lazy::new(|| price_from_env("PREMIUM_PRICE_HALF_YEAR", 75_000));

    /// 365-day price, PREMIUM_PRICE_YEARLY env var
    pub static YEARLY: Lazy<i64> = Lazy::new(|| price_from_env("PREMIUM_PRICE_YEARLY", 140_000));

    /// Card number shown for manual receipt payments, PREMIUM_CARD_NUMBER env var
    pub static CARD_NUMBER: Lazy<String> =
        Lazy::new(|| env::var("PREMIUM_CARD_NUMBER").unwrap_or_else(|_| String::new()));

    /// Card holder name shown next to the card number, PREMIUM_CARD_HOLDER env var
    pub static CARD_HOLDER: Lazy<String> =
        Lazy::new(|| env::var("PREMIUM_CARD_HOLDER").unwrap_or_else(|_| String::new()));
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Telegram API calls (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Retry configuration
pub mod retry {
    use super::Duration;

    /// Maximum number of retries for the startup get_me check
    pub const MAX_STARTUP_RETRIES: u32 = 5;

    /// Delay between startup retry attempts (in seconds)
    pub const STARTUP_RETRY_DELAY_SECS: u64 = 5;

    /// Startup retry delay duration
    pub fn startup_delay() -> Duration {
        Duration::from_secs(STARTUP_RETRY_DELAY_SECS)
    }
}
