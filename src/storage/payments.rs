//! Payment rows, status transitions, and premium pricing settings.

use rusqlite::{params, OptionalExtension, Result};

use crate::storage::db::DbConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Rejected,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> PaymentStatus {
        match raw {
            "paid" => PaymentStatus::Paid,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: i64,
    /// Telegram id of the paying user
    pub user_id: i64,
    /// Amount in UZS
    pub amount: i64,
    pub duration_days: i64,
    /// "manual" (receipt photo) or "payme"
    pub provider: String,
    pub receipt_file_id: Option<String>,
    pub status: PaymentStatus,
    pub payme_transaction_id: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
}

fn row_to_payment(row: &rusqlite::Row<'_>) -> Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        duration_days: row.get(3)?,
        provider: row.get(4)?,
        receipt_file_id: row.get(5)?,
        status: PaymentStatus::parse(&row.get::<_, String>(6)?),
        payme_transaction_id: row.get(7)?,
        created_at: row.get(8)?,
        processed_at: row.get(9)?,
    })
}

const PAYMENT_COLUMNS: &str = "id, user_id, amount, duration_days, provider, receipt_file_id, \
                               status, payme_transaction_id, created_at, processed_at";

pub fn create_payment(
    conn: &DbConnection,
    user_id: i64,
    amount: i64,
    duration_days: i64,
    provider: &str,
    receipt_file_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO payments (user_id, amount, duration_days, provider, receipt_file_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, amount, duration_days, provider, receipt_file_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_payment_by_id(conn: &DbConnection, id: i64) -> Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
        params![id],
        row_to_payment,
    )
    .optional()
}

pub fn find_payment_by_payme_transaction(conn: &DbConnection, transaction_id: &str) -> Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payme_transaction_id = ?1"),
        params![transaction_id],
        row_to_payment,
    )
    .optional()
}

pub fn find_payments_by_user(conn: &DbConnection, user_id: i64) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map(params![user_id], row_to_payment)?;
    rows.collect()
}

pub fn attach_payme_transaction(conn: &DbConnection, payment_id: i64, transaction_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE payments SET payme_transaction_id = ?2 WHERE id = ?1",
        params![payment_id, transaction_id],
    )?;
    Ok(())
}

/// Move a payment to a terminal (or back to pending) state.
/// Terminal states stamp processed_at.
pub fn set_payment_status(conn: &DbConnection, payment_id: i64, status: PaymentStatus) -> Result<()> {
    match status {
        PaymentStatus::Pending => {
            conn.execute(
                "UPDATE payments SET status = ?2, processed_at = NULL WHERE id = ?1",
                params![payment_id, status.as_str()],
            )?;
        }
        _ => {
            conn.execute(
                "UPDATE payments SET status = ?2, processed_at = datetime('now') WHERE id = ?1",
                params![payment_id, status.as_str()],
            )?;
        }
    }
    Ok(())
}

/// Premium pricing row (single row, id = 1).
#[derive(Debug, Clone)]
pub struct PremiumSettings {
    pub monthly_price: i64,
    pub quarterly_price: i64,
    pub half_year_price: i64,
    pub yearly_price: i64,
    pub card_number: Option<String>,
    pub card_holder: Option<String>,
}

impl PremiumSettings {
    /// Price for a plan by its duration in days; None for unknown durations.
    pub fn price_for_days(&self, days: i64) -> Option<i64> {
        match days {
            30 => Some(self.monthly_price),
            90 => Some(self.quarterly_price),
            180 => Some(self.half_year_price),
            365 => Some(self.yearly_price),
            _ => None,
        }
    }
}

/// Insert the env-seeded default pricing row if none exists yet.
pub fn seed_premium_settings(
    conn: &DbConnection,
    monthly: i64,
    quarterly: i64,
    half_year: i64,
    yearly: i64,
    card_number: &str,
    card_holder: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO premium_settings
            (id, monthly_price, quarterly_price, half_year_price, yearly_price, card_number, card_holder)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
        params![monthly, quarterly, half_year, yearly, card_number, card_holder],
    )?;
    Ok(())
}

pub fn get_premium_settings(conn: &DbConnection) -> Result<Option<PremiumSettings>> {
    conn.query_row(
        "SELECT monthly_price, quarterly_price, half_year_price, yearly_price, card_number, card_holder
         FROM premium_settings WHERE id = 1",
        [],
        |row| {
            Ok(PremiumSettings {
                monthly_price: row.get(0)?,
                quarterly_price: row.get(1)?,
                half_year_price: row.get(2)?,
                yearly_price: row.get(3)?,
                card_number: row.get(4)?,
                card_holder: row.get(5)?,
            })
        },
    )
    .optional()
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
    fn terminal_status_sets_processed_at() {
        let (_dir, conn) = test_conn();
        let id = create_payment(&conn, 42, 15_000, 30, "manual", Some("receipt")).unwrap();

        let pending = find_payment_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(pending.status, PaymentStatus::Pending);
        assert_eq!(pending.processed_at, None);

        set_payment_status(&conn, id, PaymentStatus::Paid).unwrap();
        let paid = find_payment_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert!(paid.processed_at.is_some());
    }

    #[test]
    fn cancelling_back_to_pending_clears_processed_at() {
        let (_dir, conn) = test_conn();
        let id = create_payment(&conn, 42, 15_000, 30, "payme", None).unwrap();
        set_payment_status(&conn, id, PaymentStatus::Cancelled).unwrap();
        set_payment_status(&conn, id, PaymentStatus::Pending).unwrap();

        let payment = find_payment_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.processed_at, None);
    }

    #[test]
    fn payme_transaction_lookup() {
        let (_dir, conn) = test_conn();
        let id = create_payment(&conn, 42, 40_000, 90, "payme", None).unwrap();
        attach_payme_transaction(&conn, id, "tx-123").unwrap();

        let payment = find_payment_by_payme_transaction(&conn, "tx-123").unwrap().unwrap();
        assert_eq!(payment.id, id);
        assert!(find_payment_by_payme_transaction(&conn, "tx-999").unwrap().is_none());
    }

    #[test]
    fn premium_settings_seed_is_idempotent() {
        let (_dir, conn) = test_conn();
        seed_premium_settings(&conn, 15_000, 40_000, 75_000, 140_000, "8600...", "ALI VALIYEV").unwrap();
        seed_premium_settings(&conn, 1, 2, 3, 4, "x", "y").unwrap();

        let settings = get_premium_settings(&conn).unwrap().unwrap();
        assert_eq!(settings.monthly_price, 15_000);
        assert_eq!(settings.price_for_days(90), Some(40_000));
        assert_eq!(settings.price_for_days(7), None);
    }
}
