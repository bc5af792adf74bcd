// Bankability Engine - Core Library
// Credit-report normalization, readiness scoring, and the entitlement /
// invite-code lifecycle. Exposes all modules for use in the CLI, the API
// server, and tests.

pub mod error;
pub mod report;
pub mod scoring;
pub mod recommendations;
pub mod entitlement;
pub mod webhook;
pub mod invite;
pub mod store;

// Re-export commonly used types
pub use error::EngineError;
pub use report::{normalize, CreditReport, Inquiry, TradeLine};
pub use scoring::{score, BankabilityScore, Category, CategoryBreakdown};
pub use recommendations::{recommend, Recommendation};
pub use entitlement::{
    BillingGateway, ChargeConfirmation, ChargeRequest, CheckoutDecision, EntitlementRecord,
    LedgerEntry, Plan, SubscriptionStatus, CORE_MONTHLY_PRICE, PRO_MONTHLY_PRICE, SETUP_FEE,
};
pub use webhook::{map_provider_status, parse_event, reconcile, BillingEvent, ReconcileOutcome};
pub use invite::{canonicalize, validate, InviteCode, RejectionReason, Validation};
pub use store::{
    find_entitlement_by_email, find_invite_code, insert_invite_code, redeem_invite_code,
    run_checkout, setup_database, CheckoutOutcome, CheckoutRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
