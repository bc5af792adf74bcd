// 🔁 Webhook Reconciler - billing provider events → entitlement state
// Events arrive at-least-once and are mapped onto the persisted entitlement
// record idempotently. Payloads parse into a closed tagged union; event
// types we do not handle become `Unrecognized` and are acked as no-ops, so
// the provider never retries them.
//
// Ordering is best-effort: replays dedup via a SHA-256 fingerprint, but a
// stale event arriving late is applied as-is. Billing state self-heals on
// the next webhook or the next checkout.

use crate::entitlement::SubscriptionStatus;
use crate::store;
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ============================================================================
// EVENT MODEL
// ============================================================================

/// Closed union of the provider lifecycle events the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    SubscriptionUpdated {
        subscription_id: String,
        customer_id: String,
        provider_status: String,
        period_end: Option<DateTime<Utc>>,
    },
    SubscriptionDeleted {
        subscription_id: String,
        customer_id: String,
    },
    InvoicePaymentFailed {
        subscription_id: Option<String>,
        customer_id: String,
        /// True when the provider has given up retrying the invoice.
        final_attempt: bool,
    },
    /// Anything else. Acked and dropped, never an error.
    Unrecognized { event_type: String },
}

impl BillingEvent {
    pub fn event_type(&self) -> &str {
        match self {
            BillingEvent::SubscriptionUpdated { .. } => "customer.subscription.updated",
            BillingEvent::SubscriptionDeleted { .. } => "customer.subscription.deleted",
            BillingEvent::InvoicePaymentFailed { .. } => "invoice.payment_failed",
            BillingEvent::Unrecognized { event_type } => event_type,
        }
    }

    /// Stable fingerprint for at-least-once dedup. Two deliveries of the
    /// same provider event hash identically; a later event with different
    /// content does not.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            BillingEvent::SubscriptionUpdated {
                subscription_id,
                customer_id,
                provider_status,
                period_end,
            } => {
                hasher.update(format!(
                    "updated:{}:{}:{}:{}",
                    subscription_id,
                    customer_id,
                    provider_status,
                    period_end.map(|t| t.timestamp()).unwrap_or(0)
                ));
            }
            BillingEvent::SubscriptionDeleted {
                subscription_id,
                customer_id,
            } => {
                hasher.update(format!("deleted:{}:{}", subscription_id, customer_id));
            }
            BillingEvent::InvoicePaymentFailed {
                subscription_id,
                customer_id,
                final_attempt,
            } => {
                hasher.update(format!(
                    "failed:{}:{}:{}",
                    subscription_id.as_deref().unwrap_or(""),
                    customer_id,
                    final_attempt
                ));
            }
            BillingEvent::Unrecognized { event_type } => {
                hasher.update(format!("unrecognized:{}", event_type));
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// STATUS MAPPING
// ============================================================================

/// Total mapping from provider status strings to internal status.
/// `active` → Active, `past_due`/`unpaid` → PastDue, everything else
/// (canceled, incomplete_expired, ...) → Canceled.
pub fn map_provider_status(provider_status: &str) -> SubscriptionStatus {
    match provider_status {
        "active" => SubscriptionStatus::Active,
        "past_due" | "unpaid" => SubscriptionStatus::PastDue,
        _ => SubscriptionStatus::Canceled,
    }
}

// ============================================================================
// PAYLOAD PARSING
// ============================================================================

fn data_object(payload: &Value) -> &Value {
    payload
        .get("data")
        .and_then(|d| d.get("object"))
        .unwrap_or(&Value::Null)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Parse a (signature-verified) provider payload into the event union.
/// Total over inputs: missing ids or unknown types land in `Unrecognized`
/// rather than failing, because the webhook endpoint must always ack.
pub fn parse_event(payload: &Value) -> BillingEvent {
    let event_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let object = data_object(payload);

    match event_type.as_str() {
        "customer.subscription.updated" => {
            let subscription_id = str_field(object, "id");
            let customer_id = str_field(object, "customer");
            match (subscription_id, customer_id) {
                (Some(subscription_id), Some(customer_id)) => {
                    let period_end = object
                        .get("current_period_end")
                        .and_then(|v| v.as_i64())
                        .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

                    BillingEvent::SubscriptionUpdated {
                        subscription_id,
                        customer_id,
                        provider_status: str_field(object, "status")
                            .unwrap_or_else(|| "canceled".to_string()),
                        period_end,
                    }
                }
                _ => BillingEvent::Unrecognized { event_type },
            }
        }
        "customer.subscription.deleted" => {
            let subscription_id = str_field(object, "id");
            let customer_id = str_field(object, "customer");
            match (subscription_id, customer_id) {
                (Some(subscription_id), Some(customer_id)) => BillingEvent::SubscriptionDeleted {
                    subscription_id,
                    customer_id,
                },
                _ => BillingEvent::Unrecognized { event_type },
            }
        }
        "invoice.payment_failed" => match str_field(object, "customer") {
            Some(customer_id) => BillingEvent::InvoicePaymentFailed {
                subscription_id: str_field(object, "subscription"),
                customer_id,
                final_attempt: object
                    .get("next_payment_attempt")
                    .map(|v| v.is_null())
                    .unwrap_or(true),
            },
            None => BillingEvent::Unrecognized { event_type },
        },
        _ => BillingEvent::Unrecognized { event_type },
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Entitlement record updated.
    Applied {
        user_id: String,
        status: SubscriptionStatus,
    },
    /// Same event seen before; nothing re-applied.
    AlreadyApplied,
    /// Neither subscription id nor customer id resolved to a record.
    /// Logged by the caller and dropped - no retry queue by design.
    Unresolved {
        subscription_id: Option<String>,
        customer_id: Option<String>,
    },
    /// Unhandled event type; acked as a no-op.
    Ignored { event_type: String },
}

/// Apply one provider event to the entitlement store.
///
/// Lookup order: subscription id first, then customer id. Replays
/// short-circuit on the recorded fingerprint. Terminal events (deletion,
/// final payment failure) clear `next_billing_date` rather than leaving it
/// stale.
pub fn reconcile(conn: &Connection, event: &BillingEvent) -> Result<ReconcileOutcome> {
    let (subscription_id, customer_id): (Option<&str>, Option<&str>) = match event {
        BillingEvent::Unrecognized { event_type } => {
            return Ok(ReconcileOutcome::Ignored {
                event_type: event_type.clone(),
            });
        }
        BillingEvent::SubscriptionUpdated {
            subscription_id,
            customer_id,
            ..
        }
        | BillingEvent::SubscriptionDeleted {
            subscription_id,
            customer_id,
        } => (Some(subscription_id.as_str()), Some(customer_id.as_str())),
        BillingEvent::InvoicePaymentFailed {
            subscription_id,
            customer_id,
            ..
        } => (subscription_id.as_deref(), Some(customer_id.as_str())),
    };

    let mut record = None;
    if let Some(id) = subscription_id {
        record = store::find_entitlement_by_subscription(conn, id)?;
    }
    if record.is_none() {
        if let Some(id) = customer_id {
            record = store::find_entitlement_by_customer(conn, id)?;
        }
    }

    let record = match record {
        Some(record) => record,
        None => {
            return Ok(ReconcileOutcome::Unresolved {
                subscription_id: subscription_id.map(String::from),
                customer_id: customer_id.map(String::from),
            });
        }
    };

    let (status, next_billing) = match event {
        BillingEvent::SubscriptionUpdated {
            provider_status,
            period_end,
            ..
        } => {
            let status = map_provider_status(provider_status);
            let next_billing = if status == SubscriptionStatus::Canceled {
                None
            } else {
                (*period_end).or(record.next_billing_date)
            };
            (status, next_billing)
        }
        BillingEvent::SubscriptionDeleted { .. } => (SubscriptionStatus::Canceled, None),
        BillingEvent::InvoicePaymentFailed { final_attempt, .. } => (
            SubscriptionStatus::PastDue,
            if *final_attempt {
                None
            } else {
                record.next_billing_date
            },
        ),
        BillingEvent::Unrecognized { .. } => unreachable!("handled above"),
    };

    // Fingerprint and status write commit together: a failed write rolls
    // the fingerprint back too, so redelivery can still apply the event.
    // Dedup happens only after the event resolved to a user, so an early
    // event for a not-yet-provisioned record can still apply on redelivery.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if !store::record_processed_event(&tx, &event.fingerprint())? {
        return Ok(ReconcileOutcome::AlreadyApplied);
    }
    store::apply_reconciliation(&tx, &record.user_id, status, next_billing)?;
    tx.commit()?;

    Ok(ReconcileOutcome::Applied {
        user_id: record.user_id,
        status,
    })
}

/// Parse-then-reconcile convenience for the webhook endpoint. Misses and
/// unknown types come back as outcomes, never as errors; only storage
/// faults fail.
pub fn reconcile_payload(conn: &Connection, payload: &Value) -> Result<ReconcileOutcome> {
    reconcile(conn, &parse_event(payload))
}

// ============================================================================
// TESTS
// ============================================================================
