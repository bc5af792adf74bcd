// Bankability Engine - API Server
// Exposes the four outward-facing operations over HTTP. Collaborator
// transports (real bureau and billing gateways) are wired by environment;
// the `dev` modes stand in for them locally.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use bankability_engine::{
    canonicalize, normalize, recommend, score, BillingGateway, ChargeConfirmation, ChargeRequest,
    CheckoutRequest, EngineError, ReconcileOutcome,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    billing_mode: Option<String>,
    bureau_mode: Option<String>,
}

// ============================================================================
// Dev collaborators
// ============================================================================

/// Approve-all stand-in for the billing provider, selected by
/// BILLING_MODE=dev. Declines tokens prefixed "tok_declined" so decline
/// paths stay testable.
struct DevGateway;

impl BillingGateway for DevGateway {
    fn charge(&self, request: &ChargeRequest) -> Result<ChargeConfirmation, EngineError> {
        if request.payment_method_token.starts_with("tok_declined") {
            return Err(EngineError::Declined("card_declined".to_string()));
        }

        Ok(ChargeConfirmation {
            subscription_id: format!("sub_{}", uuid::Uuid::new_v4().simple()),
            customer_id: format!("cus_{}", uuid::Uuid::new_v4().simple()),
        })
    }
}

/// Deterministic sandbox bureau payload, selected by BUREAU_MODE=dev.
fn dev_bureau_pull(first_name: &str, last_name: &str) -> Value {
    json!({
        "firstName": first_name,
        "lastName": last_name,
        "creditScore": 705,
        "tradeLines": [
            {"creditorName": "Sandbox Bank Card", "balance": 1200, "creditLimit": 6000,
             "monthlyPayment": 45, "status": "Open"},
            {"creditorName": "Sandbox Auto Loan", "balance": 9800, "creditLimit": 0,
             "monthlyPayment": 310, "status": "Open"}
        ],
        "inquiries": [
            {"subscriberName": "Bankability Coaching", "inquiryDate": "2026-08-01",
             "inquiryType": "soft"}
        ]
    })
}

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreditPullBody {
    ssn: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    #[allow(dead_code)]
    address: Option<Value>,
}

/// POST /api/credit-pull-analysis
async fn credit_pull_analysis(
    State(state): State<AppState>,
    Json(body): Json<CreditPullBody>,
) -> impl IntoResponse {
    let (ssn, first_name, last_name, dob) = match (
        body.ssn.as_deref(),
        body.first_name.as_deref(),
        body.last_name.as_deref(),
        body.date_of_birth.as_deref(),
    ) {
        (Some(ssn), Some(first), Some(last), Some(dob))
            if !ssn.is_empty() && !first.is_empty() && !last.is_empty() && !dob.is_empty() =>
        {
            (ssn, first, last, dob)
        }
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "ssn, firstName, lastName, and dateOfBirth are required"})),
            );
        }
    };
    let _ = (ssn, dob); // consumed by the real bureau collaborator only

    let raw = match state.bureau_mode.as_deref() {
        Some("dev") => dev_bureau_pull(first_name, last_name),
        _ => {
            eprintln!("credit pull failed: bureau collaborator not configured");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Credit bureau service unavailable"})),
            );
        }
    };

    let report = match normalize(&raw) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("credit pull failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Credit bureau returned an unusable report"})),
            );
        }
    };

    let bankability = score(&report);
    let recommendations = recommend(&report, bankability.utilization, report.score);

    (
        StatusCode::OK,
        Json(json!({
            "report": report,
            "bankability_score": {
                "value": bankability.value,
                "utilization": bankability.utilization,
                "breakdown": bankability.breakdown,
                "recommendations": recommendations,
            }
        })),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    payment_method_token: Option<String>,
    email: Option<String>,
    plan: Option<String>,
    #[serde(default)]
    is_upgrade: bool,
}

/// POST /api/checkout
async fn checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> impl IntoResponse {
    let (token, email, plan) = match (body.payment_method_token, body.email, body.plan) {
        (Some(token), Some(email), Some(plan)) if !email.trim().is_empty() => {
            (token, email, plan)
        }
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "paymentMethodToken, email, and plan are required"})),
            );
        }
    };

    // Billing configuration gates the whole operation.
    let gateway: Box<dyn BillingGateway> = match state.billing_mode.as_deref() {
        Some("dev") => Box::new(DevGateway),
        _ => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Billing is not configured"})),
            );
        }
    };

    let request = CheckoutRequest {
        payment_method_token: token,
        email,
        plan,
        is_upgrade: body.is_upgrade,
    };

    let conn = state.db.lock().unwrap();
    match bankability_engine::run_checkout(&conn, gateway.as_ref(), &request, Utc::now()) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "subscriptionId": outcome.record.subscription_id,
                "customerId": outcome.record.customer_id,
                "userId": outcome.record.user_id,
                "user": outcome.record,
            })),
        ),
        Err(e) => match e.downcast_ref::<EngineError>() {
            Some(engine_err) if engine_err.is_validation() => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": engine_err.to_string()})),
            ),
            _ => {
                eprintln!("checkout failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Checkout could not be completed"})),
                )
            }
        },
    }
}

/// POST /api/billing-webhook
/// Signature verification happens at the edge before this handler; once the
/// payload parses, the provider always gets {received: true} - unknown event
/// types and unresolved records are no-ops, not errors.
async fn billing_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match bankability_engine::webhook::reconcile_payload(&conn, &payload) {
        Ok(outcome) => {
            match &outcome {
                ReconcileOutcome::Unresolved {
                    subscription_id,
                    customer_id,
                } => {
                    eprintln!(
                        "webhook unresolved: subscription={:?} customer={:?}",
                        subscription_id, customer_id
                    );
                }
                ReconcileOutcome::Ignored { event_type } => {
                    println!("webhook ignored event type: {}", event_type);
                }
                _ => {}
            }
            (StatusCode::OK, Json(json!({"received": true})))
        }
        Err(e) => {
            eprintln!("webhook reconciliation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Webhook processing failed"})),
            )
        }
    }
}

#[derive(Deserialize)]
struct InviteBody {
    code: Option<String>,
}

/// POST /api/invite-code/validate - read-only; never increments usage.
async fn validate_invite_code(
    State(state): State<AppState>,
    Json(body): Json<InviteBody>,
) -> impl IntoResponse {
    let canonical = match body.code.as_deref().map(canonicalize) {
        Some(Ok(canonical)) => canonical,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"valid": false, "error": "Invite code is required"})),
            );
        }
    };

    let conn = state.db.lock().unwrap();
    let found = match bankability_engine::find_invite_code(&conn, &canonical) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("invite lookup failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"valid": false, "error": "Could not validate invite code"})),
            );
        }
    };

    let validation = bankability_engine::validate(found.as_ref(), Utc::now());
    if validation.valid {
        (
            StatusCode::OK,
            Json(json!({"valid": true, "code": canonical})),
        )
    } else {
        let reason = validation.reason.expect("rejection carries a reason");
        (
            StatusCode::OK,
            Json(json!({
                "valid": false,
                "error": reason.as_str(),
                "message": reason.message(),
            })),
        )
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("🏦 Bankability Engine - API Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("BANKABILITY_DB").unwrap_or_else(|_| "bankability.db".to_string());
    let conn = Connection::open(&db_path).expect("Failed to open database");
    bankability_engine::setup_database(&conn).expect("Failed to initialize schema");
    println!("✓ Database ready: {}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        billing_mode: std::env::var("BILLING_MODE").ok(),
        bureau_mode: std::env::var("BUREAU_MODE").ok(),
    };

    if state.billing_mode.is_none() {
        println!("⚠ BILLING_MODE unset - /api/checkout will answer 503");
    }
    if state.bureau_mode.is_none() {
        println!("⚠ BUREAU_MODE unset - /api/credit-pull-analysis will answer 500");
    }

    let app = Router::new()
        .route("/api/credit-pull-analysis", post(credit_pull_analysis))
        .route("/api/checkout", post(checkout))
        .route("/api/billing-webhook", post(billing_webhook))
        .route("/api/invite-code/validate", post(validate_invite_code))
        .with_state(state)
        .layer(CorsLayer::permissive());

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   POST /api/credit-pull-analysis");
    println!("   POST /api/checkout");
    println!("   POST /api/billing-webhook");
    println!("   POST /api/invite-code/validate\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
