//! End-to-end storage flows against a real SQLite file.

use pretty_assertions::assert_eq;

use kinoteka::storage::channels::{self, ChannelType, SubscriptionStatus};
use kinoteka::storage::payments::{self, PaymentStatus};
use kinoteka::storage::{content, create_pool, get_connection, users, DbConnection};

fn test_conn() -> (tempfile::TempDir, DbConnection) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();
    let conn = get_connection(&pool).unwrap();
    (dir, conn)
}

#[test]
fn member_limit_deactivates_full_channel() {
    let (_dir, conn) = test_conn();
    let id = channels::create_mandatory_channel(
        &conn,
        Some("-100123"),
        "Test kanal",
        "https://t.me/test",
        ChannelType::Public,
        Some(2),
    )
    .unwrap();

    for user in 1..=2 {
        channels::set_user_status(&conn, user, id, SubscriptionStatus::Joined).unwrap();
        channels::increment_member_count(&conn, id).unwrap();
    }

    let channel = channels::find_mandatory_by_id(&conn, id).unwrap().unwrap();
    assert_eq!(channel.current_members, 2);
    assert!(!channel.is_active);
    assert!(channels::find_all_mandatory(&conn).unwrap().is_empty());
}

#[test]
fn leaving_never_drives_counters_negative() {
    let (_dir, conn) = test_conn();
    let id = channels::create_mandatory_channel(
        &conn,
        Some("-100123"),
        "Test kanal",
        "https://t.me/test",
        ChannelType::Private,
        None,
    )
    .unwrap();

    channels::decrement_member_count(&conn, id).unwrap();
    channels::decrement_pending_requests(&conn, id).unwrap();

    let channel = channels::find_mandatory_by_id(&conn, id).unwrap().unwrap();
    assert_eq!(channel.current_members, 0);
    assert_eq!(channel.pending_requests, 0);
}

#[test]
fn join_request_satisfies_gate_until_approved() {
    let (_dir, conn) = test_conn();
    let id = channels::create_mandatory_channel(
        &conn,
        Some("-100555"),
        "Yopiq kanal",
        "https://t.me/+abc",
        ChannelType::PrivateWithAdminApproval,
        None,
    )
    .unwrap();

    channels::set_user_status(&conn, 7, id, SubscriptionStatus::Requested).unwrap();
    channels::create_join_request(&conn, 7, id).unwrap();
    channels::increment_pending_requests(&conn, id).unwrap();

    let status = channels::get_user_status(&conn, 7, id).unwrap().unwrap();
    assert!(status.satisfies_gate());
    assert!(channels::has_pending_request(&conn, 7, id).unwrap());

    // Admin approves inside Telegram: requested turns into joined.
    channels::decrement_pending_requests(&conn, id).unwrap();
    channels::approve_join_requests(&conn, 7, id).unwrap();
    channels::set_user_status(&conn, 7, id, SubscriptionStatus::Joined).unwrap();
    channels::increment_member_count(&conn, id).unwrap();

    assert!(!channels::has_pending_request(&conn, 7, id).unwrap());
    let channel = channels::find_mandatory_by_id(&conn, id).unwrap().unwrap();
    assert_eq!(channel.pending_requests, 0);
    assert_eq!(channel.current_members, 1);
}

#[test]
fn manual_payment_approval_grants_premium() {
    let (_dir, conn) = test_conn();
    users::find_or_create(&conn, 99, Some("Ali"), None, Some("ali")).unwrap();

    let payment_id = payments::create_payment(&conn, 99, 15_000, 30, "manual", Some("receipt_file")).unwrap();
    let payment = payments::find_payment_by_id(&conn, payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(!users::is_premium_active(&conn, 99).unwrap());

    payments::set_payment_status(&conn, payment_id, PaymentStatus::Paid).unwrap();
    users::grant_premium(&conn, 99, 30).unwrap();

    assert!(users::is_premium_active(&conn, 99).unwrap());
    let paid = payments::find_payment_by_id(&conn, payment_id).unwrap().unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert!(paid.processed_at.is_some());
}

#[test]
fn codes_are_unique_across_movies_and_serials() {
    let (_dir, conn) = test_conn();
    content::create_movie(&conn, 100, "Kino", None, None, None, None, Some("vid")).unwrap();
    let serial_id = content::create_serial(&conn, 200, "Serial", None, None, None, None).unwrap();
    content::add_episode(&conn, serial_id, 1, "ep1").unwrap();

    assert!(!content::is_code_available(&conn, 100).unwrap());
    assert!(!content::is_code_available(&conn, 200).unwrap());
    assert!(content::is_code_available(&conn, 101).unwrap());

    let nearest = content::find_nearest_available_codes(&conn, 100, 3).unwrap();
    assert_eq!(nearest.len(), 3);
    assert!(!nearest.contains(&100));
    assert!(!nearest.contains(&200));
}

#[test]
fn payment_history_is_newest_first() {
    let (_dir, conn) = test_conn();
    users::find_or_create(&conn, 5, None, None, None).unwrap();

    let first = payments::create_payment(&conn, 5, 15_000, 30, "payme", None).unwrap();
    let second = payments::create_payment(&conn, 5, 40_000, 90, "manual", None).unwrap();

    let history = payments::find_payments_by_user(&conn, 5).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second);
    assert_eq!(history[1].id, first);
}
