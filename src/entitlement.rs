// 💳 Entitlement State Machine - plan, setup fee, subscription status
// Pure decision logic: everything here computes what SHOULD happen to an
// entitlement record; the store applies it. The one invariant that matters
// most: the $25 setup fee is charged exactly once per account lifetime.
// `setup_fee_paid` is monotonic - read before deciding, written with OR
// semantics, never regressed to false.

use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CANONICAL PRICES
// ============================================================================

/// Monthly prices are canonical constants, never caller-supplied.
pub const CORE_MONTHLY_PRICE: f64 = 10.00;
pub const PRO_MONTHLY_PRICE: f64 = 29.00;

/// One-time enrollment fee for the pro plan.
pub const SETUP_FEE: f64 = 25.00;

pub const BILLING_CYCLE_DAYS: i64 = 30;

// ============================================================================
// PLAN & STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    None,
    Core,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::None => "none",
            Plan::Core => "core",
            Plan::Pro => "pro",
        }
    }

    pub fn from_str(s: &str) -> Option<Plan> {
        match s {
            "none" => Some(Plan::None),
            "core" => Some(Plan::Core),
            "pro" => Some(Plan::Pro),
            _ => None,
        }
    }

    /// Canonical recurring charge for this plan.
    pub fn monthly_price(&self) -> f64 {
        match self {
            Plan::None => 0.0,
            Plan::Core => CORE_MONTHLY_PRICE,
            Plan::Pro => PRO_MONTHLY_PRICE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<SubscriptionStatus> {
        match s {
            "none" => Some(SubscriptionStatus::None),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

// ============================================================================
// ENTITLEMENT RECORD
// ============================================================================

/// Persisted entitlement state for one user. Keyed by a uuid assigned at
/// first touch; email carries a unique index and is the checkout join key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub user_id: String,
    pub email: String,
    pub plan: Plan,
    /// Sticky: once true, never written back to false.
    pub setup_fee_paid: bool,
    pub subscription_status: SubscriptionStatus,
    /// Always the canonical price for `plan`.
    pub amount: f64,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntitlementRecord {
    /// Fresh record for a user with no entitlement yet.
    pub fn new(email: &str, now: DateTime<Utc>) -> Self {
        EntitlementRecord {
            user_id: uuid::Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            plan: Plan::None,
            setup_fee_paid: false,
            subscription_status: SubscriptionStatus::None,
            amount: 0.0,
            next_billing_date: None,
            last_payment_date: None,
            subscription_id: None,
            customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural invariants: plan none implies status none/canceled, and
    /// amount matches the canonical plan price.
    pub fn invariants_hold(&self) -> bool {
        let plan_status_ok = self.plan != Plan::None
            || matches!(
                self.subscription_status,
                SubscriptionStatus::None | SubscriptionStatus::Canceled
            );

        let amount_ok = (self.amount - self.plan.monthly_price()).abs() < 0.005;

        plan_status_ok && amount_ok
    }
}

// ============================================================================
// PAYMENT LEDGER
// ============================================================================

/// Append-only audit artifact for one successful charge. Never mutated or
/// deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub user_id: String,
    pub amount: f64,
    pub included_setup_fee: bool,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// BILLING GATEWAY SEAM
// ============================================================================

/// What the billing collaborator returns for a successful charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeConfirmation {
    pub subscription_id: String,
    pub customer_id: String,
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_method_token: String,
    pub email: String,
    pub amount: f64,
    pub description: String,
}

/// Billing collaborator boundary. Network implementations live outside the
/// engine; declines come back as `EngineError::Declined` with the provider's
/// reason intact.
pub trait BillingGateway {
    fn charge(&self, request: &ChargeRequest) -> Result<ChargeConfirmation, EngineError>;
}

// ============================================================================
// CHECKOUT DECISION
// ============================================================================

/// What a CheckoutRequested event should charge and write, computed BEFORE
/// talking to the billing collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutDecision {
    pub plan: Plan,
    /// Canonical recurring amount for the plan.
    pub amount: f64,
    pub needs_setup_fee: bool,
    /// Recurring amount plus the setup fee when owed.
    pub total_charge_today: f64,
}

impl CheckoutDecision {
    /// Validate the requested plan and price the checkout against the
    /// user's existing entitlement (if any). The existing record's
    /// `setup_fee_paid` is read here, before any charge, so a paid fee is
    /// never charged again - not even after a downgrade and re-upgrade.
    pub fn decide(
        requested_plan: &str,
        existing: Option<&EntitlementRecord>,
    ) -> Result<CheckoutDecision, EngineError> {
        let plan = match Plan::from_str(requested_plan.trim()) {
            Some(Plan::Core) => Plan::Core,
            Some(Plan::Pro) => Plan::Pro,
            _ => return Err(EngineError::InvalidPlan(requested_plan.to_string())),
        };

        let already_paid = existing.map(|record| record.setup_fee_paid).unwrap_or(false);
        let needs_setup_fee = plan == Plan::Pro && !already_paid;

        let amount = plan.monthly_price();
        let total_charge_today = amount + if needs_setup_fee { SETUP_FEE } else { 0.0 };

        Ok(CheckoutDecision {
            plan,
            amount,
            needs_setup_fee,
            total_charge_today,
        })
    }

    /// Human-readable charge description for the ledger and the gateway.
    pub fn description(&self) -> String {
        if self.needs_setup_fee {
            format!("{} plan + one-time setup fee", self.plan.as_str())
        } else {
            format!("{} plan", self.plan.as_str())
        }
    }

    /// Fold a confirmed charge into the entitlement record. Returns the
    /// updated record and the append-only ledger entry for the charge.
    pub fn apply(
        &self,
        existing: Option<&EntitlementRecord>,
        email: &str,
        confirmation: &ChargeConfirmation,
        now: DateTime<Utc>,
    ) -> (EntitlementRecord, LedgerEntry) {
        let mut record = match existing {
            Some(record) => record.clone(),
            None => EntitlementRecord::new(email, now),
        };

        record.plan = self.plan;
        record.amount = self.amount;
        record.subscription_status = SubscriptionStatus::Active;
        // OR-write: a previously paid fee survives any later checkout.
        record.setup_fee_paid = record.setup_fee_paid || self.needs_setup_fee;
        record.next_billing_date = Some(now + Duration::days(BILLING_CYCLE_DAYS));
        record.last_payment_date = Some(now);
        record.subscription_id = Some(confirmation.subscription_id.clone());
        record.customer_id = Some(confirmation.customer_id.clone());
        record.updated_at = now;

        debug_assert!(record.invariants_hold());

        let entry = LedgerEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            user_id: record.user_id.clone(),
            amount: self.total_charge_today,
            included_setup_fee: self.needs_setup_fee,
            description: self.description(),
            recorded_at: now,
        };

        (record, entry)
    }
}

// ============================================================================
// TESTS
// ============================================================================
