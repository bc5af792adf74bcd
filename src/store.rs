// 🗄️ Persistence collaborator - SQLite layout for entitlements, ledger,
// invite codes, and processed webhook events.
// The engine's decision logic never touches SQL directly; this module is
// the only writer, and it enforces the storage-side halves of the
// invariants: unique email, sticky setup-fee flag (MAX on upsert),
// append-only ledger (no update/delete exposed), and guarded invite
// redemption so concurrent redeems can never exceed the cap.

use crate::entitlement::{
    BillingGateway, ChargeRequest, CheckoutDecision, EntitlementRecord, LedgerEntry, Plan,
    SubscriptionStatus,
};
use crate::invite::InviteCode;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entitlements (
            user_id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            plan TEXT NOT NULL,
            setup_fee_paid INTEGER NOT NULL DEFAULT 0,
            subscription_status TEXT NOT NULL,
            amount REAL NOT NULL DEFAULT 0,
            next_billing_date TEXT,
            last_payment_date TEXT,
            subscription_id TEXT,
            customer_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Append-only audit trail: one row per successful charge.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payment_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT UNIQUE NOT NULL,
            user_id TEXT NOT NULL,
            amount REAL NOT NULL,
            included_setup_fee INTEGER NOT NULL,
            description TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS invite_codes (
            code TEXT PRIMARY KEY,
            max_uses INTEGER,
            current_uses INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            expires_at TEXT
        )",
        [],
    )?;

    // Webhook dedup under at-least-once delivery.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_events (
            fingerprint TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entitlements_subscription
         ON entitlements(subscription_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entitlements_customer
         ON entitlements(customer_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_user ON payment_ledger(user_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn entitlement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntitlementRecord> {
    let plan_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let next_billing: Option<String> = row.get(6)?;
    let last_payment: Option<String> = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(EntitlementRecord {
        user_id: row.get(0)?,
        email: row.get(1)?,
        plan: Plan::from_str(&plan_str).unwrap_or(Plan::None),
        setup_fee_paid: row.get::<_, i64>(3)? != 0,
        subscription_status: SubscriptionStatus::from_str(&status_str)
            .unwrap_or(SubscriptionStatus::None),
        amount: row.get(5)?,
        next_billing_date: parse_datetime(next_billing),
        last_payment_date: parse_datetime(last_payment),
        subscription_id: row.get(8)?,
        customer_id: row.get(9)?,
        created_at: parse_datetime(Some(created_at)).unwrap_or_else(Utc::now),
        updated_at: parse_datetime(Some(updated_at)).unwrap_or_else(Utc::now),
    })
}

const ENTITLEMENT_COLUMNS: &str = "user_id, email, plan, setup_fee_paid, subscription_status,
     amount, next_billing_date, last_payment_date, subscription_id, customer_id,
     created_at, updated_at";

fn find_entitlement_where(
    conn: &Connection,
    predicate: &str,
    value: &str,
) -> Result<Option<EntitlementRecord>> {
    let sql = format!(
        "SELECT {} FROM entitlements WHERE {} = ?1",
        ENTITLEMENT_COLUMNS, predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![value], entitlement_from_row)?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

// ============================================================================
// ENTITLEMENT LOOKUPS
// ============================================================================

pub fn find_entitlement_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<EntitlementRecord>> {
    find_entitlement_where(conn, "email", &email.trim().to_lowercase())
}

pub fn find_entitlement_by_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<EntitlementRecord>> {
    find_entitlement_where(conn, "subscription_id", subscription_id)
}

pub fn find_entitlement_by_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Option<EntitlementRecord>> {
    find_entitlement_where(conn, "customer_id", customer_id)
}

// ============================================================================
// ENTITLEMENT WRITES
// ============================================================================

/// Insert or update an entitlement record.
/// `setup_fee_paid` is written with MAX() so the flag can only move
/// off→on, even if a concurrent writer already set it.
pub fn upsert_entitlement(conn: &Connection, record: &EntitlementRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO entitlements (
            user_id, email, plan, setup_fee_paid, subscription_status,
            amount, next_billing_date, last_payment_date, subscription_id,
            customer_id, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(user_id) DO UPDATE SET
            plan = excluded.plan,
            setup_fee_paid = MAX(entitlements.setup_fee_paid, excluded.setup_fee_paid),
            subscription_status = excluded.subscription_status,
            amount = excluded.amount,
            next_billing_date = excluded.next_billing_date,
            last_payment_date = excluded.last_payment_date,
            subscription_id = excluded.subscription_id,
            customer_id = excluded.customer_id,
            updated_at = excluded.updated_at",
        params![
            record.user_id,
            record.email,
            record.plan.as_str(),
            record.setup_fee_paid as i64,
            record.subscription_status.as_str(),
            record.amount,
            record.next_billing_date.map(|dt| dt.to_rfc3339()),
            record.last_payment_date.map(|dt| dt.to_rfc3339()),
            record.subscription_id,
            record.customer_id,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
    .context("Failed to upsert entitlement")?;

    Ok(())
}

/// Webhook-driven status write. Only touches status, next billing date,
/// and updated_at; plan and the setup-fee flag are checkout-owned.
pub fn apply_reconciliation(
    conn: &Connection,
    user_id: &str,
    status: SubscriptionStatus,
    next_billing_date: Option<DateTime<Utc>>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE entitlements
         SET subscription_status = ?1, next_billing_date = ?2, updated_at = ?3
         WHERE user_id = ?4",
        params![
            status.as_str(),
            next_billing_date.map(|dt| dt.to_rfc3339()),
            Utc::now().to_rfc3339(),
            user_id,
        ],
    )?;

    if updated == 0 {
        return Err(anyhow!("no entitlement row for user {}", user_id));
    }

    Ok(())
}

// ============================================================================
// PAYMENT LEDGER (append-only)
// ============================================================================

pub fn insert_ledger_entry(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO payment_ledger (
            entry_id, user_id, amount, included_setup_fee, description, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.entry_id,
            entry.user_id,
            entry.amount,
            entry.included_setup_fee as i64,
            entry.description,
            entry.recorded_at.to_rfc3339(),
        ],
    )
    .context("Failed to append ledger entry")?;

    Ok(())
}

pub fn ledger_for_user(conn: &Connection, user_id: &str) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, user_id, amount, included_setup_fee, description, recorded_at
         FROM payment_ledger
         WHERE user_id = ?1
         ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map(params![user_id], |row| {
            let recorded_at: String = row.get(5)?;
            Ok(LedgerEntry {
                entry_id: row.get(0)?,
                user_id: row.get(1)?,
                amount: row.get(2)?,
                included_setup_fee: row.get::<_, i64>(3)? != 0,
                description: row.get(4)?,
                recorded_at: parse_datetime(Some(recorded_at)).unwrap_or_else(Utc::now),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(entries)
}

// ============================================================================
// PROCESSED WEBHOOK EVENTS
// ============================================================================

/// Record an event fingerprint. Returns false when the fingerprint was
/// already recorded (replay), using the primary key as the dedup guard.
pub fn record_processed_event(conn: &Connection, fingerprint: &str) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO processed_events (fingerprint, processed_at) VALUES (?1, ?2)",
        params![fingerprint, Utc::now().to_rfc3339()],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// INVITE CODES
// ============================================================================

pub fn insert_invite_code(conn: &Connection, code: &InviteCode) -> Result<()> {
    conn.execute(
        "INSERT INTO invite_codes (code, max_uses, current_uses, is_active, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(code) DO UPDATE SET
            max_uses = excluded.max_uses,
            is_active = excluded.is_active,
            expires_at = excluded.expires_at",
        params![
            code.code,
            code.max_uses,
            code.current_uses,
            code.is_active as i64,
            code.expires_at.map(|dt| dt.to_rfc3339()),
        ],
    )
    .context("Failed to insert invite code")?;

    Ok(())
}

/// Lookup expects the canonical (trimmed, upper-case) form.
pub fn find_invite_code(conn: &Connection, canonical: &str) -> Result<Option<InviteCode>> {
    let mut stmt = conn.prepare(
        "SELECT code, max_uses, current_uses, is_active, expires_at
         FROM invite_codes WHERE code = ?1",
    )?;

    let mut rows = stmt.query_map(params![canonical], |row| {
        let expires_at: Option<String> = row.get(4)?;
        Ok(InviteCode {
            code: row.get(0)?,
            max_uses: row.get(1)?,
            current_uses: row.get(2)?,
            is_active: row.get::<_, i64>(3)? != 0,
            expires_at: parse_datetime(expires_at),
        })
    })?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// Redeem one use of a code. The WHERE clause re-checks every redeemability
/// condition inside the UPDATE, so under concurrent redemptions no more
/// than max_uses rows ever increment. Returns false when the guard failed.
pub fn redeem_invite_code(conn: &Connection, canonical: &str, now: DateTime<Utc>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE invite_codes
         SET current_uses = current_uses + 1
         WHERE code = ?1
           AND is_active = 1
           AND (expires_at IS NULL OR expires_at > ?2)
           AND (max_uses IS NULL OR current_uses < max_uses)",
        params![canonical, now.to_rfc3339()],
    )?;

    Ok(updated == 1)
}

// ============================================================================
// CHECKOUT ORCHESTRATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub payment_method_token: String,
    pub email: String,
    pub plan: String,
    /// Caller-declared intent; pricing depends only on the plan and the
    /// stored setup-fee history, never on this flag.
    pub is_upgrade: bool,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub record: EntitlementRecord,
    pub ledger_entry: LedgerEntry,
}

/// Run a CheckoutRequested event end to end: price it against the stored
/// entitlement, charge through the gateway, then persist.
///
/// The whole sequence runs inside an immediate transaction: the write lock
/// is held from the pricing read until commit, so two racing checkouts for
/// the same user cannot both read `setup_fee_paid = false` and both price
/// the $25 fee. The read inside the transaction is the final consistency
/// check before charging; the upsert's MAX() guard backstops the flag.
///
/// A declined charge (or invalid plan) propagates as `EngineError` inside
/// the anyhow chain and rolls the transaction back - NO entitlement
/// mutation, no ledger entry.
pub fn run_checkout(
    conn: &Connection,
    gateway: &dyn BillingGateway,
    request: &CheckoutRequest,
    now: DateTime<Utc>,
) -> Result<CheckoutOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .context("Failed to begin checkout transaction")?;

    // Final consistency check before charging: the decision is priced from
    // a read under the write lock, never from a stale earlier snapshot.
    let existing = find_entitlement_by_email(&tx, &request.email)?;
    let decision = CheckoutDecision::decide(&request.plan, existing.as_ref())?;

    let confirmation = gateway.charge(&ChargeRequest {
        payment_method_token: request.payment_method_token.clone(),
        email: request.email.clone(),
        amount: decision.total_charge_today,
        description: decision.description(),
    })?;

    let (record, entry) = decision.apply(existing.as_ref(), &request.email, &confirmation, now);

    upsert_entitlement(&tx, &record)?;
    insert_ledger_entry(&tx, &entry)?;
    tx.commit()?;

    Ok(CheckoutOutcome {
        record,
        ledger_entry: entry,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::{ChargeConfirmation, PRO_MONTHLY_PRICE, SETUP_FEE};
    use crate::error::EngineError;
    use crate::invite;
    use crate::webhook::{self, BillingEvent, ReconcileOutcome};
    use chrono::Duration;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    struct ApproveAll;

    impl BillingGateway for ApproveAll {
        fn charge(&self, _request: &ChargeRequest) -> Result<ChargeConfirmation, EngineError> {
            Ok(ChargeConfirmation {
                subscription_id: "sub_test".to_string(),
                customer_id: "cus_test".to_string(),
            })
        }
    }

    struct DeclineAll;

    impl BillingGateway for DeclineAll {
        fn charge(&self, _request: &ChargeRequest) -> Result<ChargeConfirmation, EngineError> {
            Err(EngineError::Declined("card_declined".to_string()))
        }
    }

    fn checkout_request(plan: &str) -> CheckoutRequest {
        CheckoutRequest {
            payment_method_token: "tok_visa".to_string(),
            email: "user@example.com".to_string(),
            plan: plan.to_string(),
            is_upgrade: false,
        }
    }

    #[test]
    fn test_checkout_creates_record_and_ledger() {
        let conn = test_conn();
        let now = Utc::now();

        let outcome = run_checkout(&conn, &ApproveAll, &checkout_request("pro"), now).unwrap();

        assert_eq!(outcome.record.plan, Plan::Pro);
        assert_eq!(outcome.record.amount, PRO_MONTHLY_PRICE);
        assert!(outcome.record.setup_fee_paid);
        assert_eq!(outcome.ledger_entry.amount, PRO_MONTHLY_PRICE + SETUP_FEE);
        assert!(outcome.ledger_entry.included_setup_fee);

        let stored = find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(stored.plan, Plan::Pro);
        assert!(stored.setup_fee_paid);
        assert_eq!(stored.subscription_id.as_deref(), Some("sub_test"));

        let ledger = ledger_for_user(&conn, &stored.user_id).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].amount, 54.00);
    }

    #[test]
    fn test_decline_mutates_nothing() {
        let conn = test_conn();

        let err = run_checkout(&conn, &DeclineAll, &checkout_request("core"), Utc::now())
            .unwrap_err();
        let engine_err = err.downcast_ref::<EngineError>().unwrap();
        assert_eq!(engine_err, &EngineError::Declined("card_declined".to_string()));

        assert!(find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_setup_fee_charged_exactly_once_across_checkouts() {
        let conn = test_conn();
        let now = Utc::now();

        // pro (pays fee) -> core (keeps flag) -> pro (no fee again)
        run_checkout(&conn, &ApproveAll, &checkout_request("pro"), now).unwrap();
        run_checkout(&conn, &ApproveAll, &checkout_request("core"), now).unwrap();
        let third = run_checkout(&conn, &ApproveAll, &checkout_request("pro"), now).unwrap();

        assert!(!third.ledger_entry.included_setup_fee);
        assert_eq!(third.ledger_entry.amount, 29.00);

        let ledger = ledger_for_user(&conn, &third.record.user_id).unwrap();
        assert_eq!(ledger.len(), 3);
        let fee_entries = ledger.iter().filter(|e| e.included_setup_fee).count();
        assert_eq!(fee_entries, 1);
    }

    /// Gateway whose charge() fires a second checkout for the same user on
    /// the same connection, simulating a request that lands while the first
    /// one is mid-charge.
    struct RacingGateway<'a> {
        conn: &'a Connection,
        rival_outcome: std::cell::RefCell<Option<Result<CheckoutOutcome>>>,
    }

    impl BillingGateway for RacingGateway<'_> {
        fn charge(&self, _request: &ChargeRequest) -> Result<ChargeConfirmation, EngineError> {
            let rival =
                run_checkout(self.conn, &ApproveAll, &checkout_request("pro"), Utc::now());
            *self.rival_outcome.borrow_mut() = Some(rival);
            Ok(ChargeConfirmation {
                subscription_id: "sub_test".to_string(),
                customer_id: "cus_test".to_string(),
            })
        }
    }

    #[test]
    fn test_racing_checkouts_charge_setup_fee_once() {
        let conn = test_conn();
        let gateway = RacingGateway {
            conn: &conn,
            rival_outcome: std::cell::RefCell::new(None),
        };

        // The write lock is held from the pricing read through commit, so
        // the rival checkout cannot price a second setup fee in between.
        let outcome =
            run_checkout(&conn, &gateway, &checkout_request("pro"), Utc::now()).unwrap();
        assert!(outcome.ledger_entry.included_setup_fee);

        let rival = gateway.rival_outcome.borrow_mut().take().unwrap();
        assert!(rival.is_err());

        let ledger = ledger_for_user(&conn, &outcome.record.user_id).unwrap();
        let fee_entries = ledger.iter().filter(|e| e.included_setup_fee).count();
        assert_eq!(fee_entries, 1);

        let total: f64 = ledger.iter().map(|e| e.amount).sum();
        assert_eq!(total, PRO_MONTHLY_PRICE + SETUP_FEE);
    }

    #[test]
    fn test_upsert_never_regresses_setup_fee_flag() {
        let conn = test_conn();
        let now = Utc::now();

        let mut record = EntitlementRecord::new("user@example.com", now);
        record.setup_fee_paid = true;
        upsert_entitlement(&conn, &record).unwrap();

        // A stale writer tries to write the flag back to false.
        record.setup_fee_paid = false;
        upsert_entitlement(&conn, &record).unwrap();

        let stored = find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .unwrap();
        assert!(stored.setup_fee_paid);
    }

    #[test]
    fn test_invalid_plan_surfaces_typed_error() {
        let conn = test_conn();
        let err = run_checkout(&conn, &ApproveAll, &checkout_request("gold"), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_invite_redemption_capped_under_repeated_attempts() {
        let conn = test_conn();
        let now = Utc::now();

        insert_invite_code(
            &conn,
            &InviteCode {
                code: "LENDER3".to_string(),
                max_uses: Some(3),
                current_uses: 0,
                is_active: true,
                expires_at: None,
            },
        )
        .unwrap();

        let mut successes = 0;
        for _ in 0..10 {
            if redeem_invite_code(&conn, "LENDER3", now).unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);

        let code = find_invite_code(&conn, "LENDER3").unwrap().unwrap();
        assert_eq!(code.current_uses, 3);
        assert_eq!(
            invite::validate(Some(&code), now).reason,
            Some(invite::RejectionReason::Exhausted)
        );
    }

    #[test]
    fn test_processed_event_dedup() {
        let conn = test_conn();
        assert!(record_processed_event(&conn, "abc123").unwrap());
        assert!(!record_processed_event(&conn, "abc123").unwrap());
        assert!(record_processed_event(&conn, "def456").unwrap());
    }

    // ------------------------------------------------------------------
    // Webhook reconciliation against a live store
    // ------------------------------------------------------------------

    fn provisioned_conn() -> (Connection, String) {
        let conn = test_conn();
        let outcome =
            run_checkout(&conn, &ApproveAll, &checkout_request("core"), Utc::now()).unwrap();
        (conn, outcome.record.user_id)
    }

    fn updated_event(status: &str) -> BillingEvent {
        BillingEvent::SubscriptionUpdated {
            subscription_id: "sub_test".to_string(),
            customer_id: "cus_test".to_string(),
            provider_status: status.to_string(),
            period_end: Some(Utc::now() + Duration::days(30)),
        }
    }

    #[test]
    fn test_reconcile_updates_status() {
        let (conn, user_id) = provisioned_conn();

        let outcome = webhook::reconcile(&conn, &updated_event("past_due")).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                user_id: user_id.clone(),
                status: SubscriptionStatus::PastDue,
            }
        );

        let stored = find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_reconcile_replay_is_idempotent() {
        let (conn, _) = provisioned_conn();
        let event = updated_event("past_due");

        let first = webhook::reconcile(&conn, &event).unwrap();
        assert!(matches!(first, ReconcileOutcome::Applied { .. }));

        let second = webhook::reconcile(&conn, &event).unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyApplied);

        let stored = find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_failed_status_write_leaves_event_redeliverable() {
        let (conn, user_id) = provisioned_conn();
        let event = updated_event("past_due");

        // Make the status write fail underneath the reconciler.
        conn.execute_batch(
            "CREATE TRIGGER reject_entitlement_updates
             BEFORE UPDATE ON entitlements
             BEGIN SELECT RAISE(ABORT, 'write rejected'); END;",
        )
        .unwrap();
        assert!(webhook::reconcile(&conn, &event).is_err());
        conn.execute_batch("DROP TRIGGER reject_entitlement_updates")
            .unwrap();

        // The fingerprint rolled back with the failed write, so the
        // provider's redelivery applies instead of hitting the dedup guard.
        let outcome = webhook::reconcile(&conn, &event).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                user_id,
                status: SubscriptionStatus::PastDue,
            }
        );
    }

    #[test]
    fn test_reconcile_falls_back_to_customer_lookup() {
        let (conn, user_id) = provisioned_conn();

        let event = BillingEvent::SubscriptionUpdated {
            subscription_id: "sub_rotated".to_string(),
            customer_id: "cus_test".to_string(),
            provider_status: "active".to_string(),
            period_end: None,
        };

        let outcome = webhook::reconcile(&conn, &event).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                user_id,
                status: SubscriptionStatus::Active,
            }
        );
    }

    #[test]
    fn test_reconcile_unresolved_is_dropped_not_errored() {
        let conn = test_conn();

        let outcome = webhook::reconcile(&conn, &updated_event("active")).unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Unresolved { .. }));
    }

    #[test]
    fn test_subscription_deleted_clears_next_billing() {
        let (conn, _) = provisioned_conn();

        let event = BillingEvent::SubscriptionDeleted {
            subscription_id: "sub_test".to_string(),
            customer_id: "cus_test".to_string(),
        };
        webhook::reconcile(&conn, &event).unwrap();

        let stored = find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::Canceled);
        assert!(stored.next_billing_date.is_none());
    }

    #[test]
    fn test_terminal_payment_failure_clears_next_billing() {
        let (conn, _) = provisioned_conn();

        let event = BillingEvent::InvoicePaymentFailed {
            subscription_id: Some("sub_test".to_string()),
            customer_id: "cus_test".to_string(),
            final_attempt: true,
        };
        webhook::reconcile(&conn, &event).unwrap();

        let stored = find_entitlement_by_email(&conn, "user@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::PastDue);
        assert!(stored.next_billing_date.is_none());
    }

    #[test]
    fn test_unrecognized_event_is_ignored() {
        let (conn, _) = provisioned_conn();

        let outcome = webhook::reconcile(
            &conn,
            &BillingEvent::Unrecognized {
                event_type: "charge.refunded".to_string(),
            },
        )
        .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                event_type: "charge.refunded".to_string()
            }
        );
    }
}
