// 💡 Recommendation Generator - Rules as data
// Three fixed triggers in a fixed order (utilization, bureau score, account
// mix). The order is a deliberate simplicity choice, not a ranking model.

use crate::report::CreditReport;
use crate::scoring::UTILIZATION_ATTENTION_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Bureau score below this triggers the on-time-payment recommendation.
pub const LOW_BUREAU_SCORE_THRESHOLD: i64 = 680;

/// Fewer open accounts than this triggers the credit-mix recommendation.
pub const THIN_FILE_ACCOUNT_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
}

/// Derive improvement actions from a report and its computed inputs.
/// Bounded at three rules; returns an empty list when nothing fires.
pub fn recommend(report: &CreditReport, utilization: f64, score: i64) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if utilization > UTILIZATION_ATTENTION_THRESHOLD {
        recommendations.push(Recommendation {
            text: "Pay down revolving balances to bring credit utilization under 30%."
                .to_string(),
        });
    }

    if score < LOW_BUREAU_SCORE_THRESHOLD {
        recommendations.push(Recommendation {
            text: "Build a streak of on-time payments; payment history is the largest \
                   score factor."
                .to_string(),
        });
    }

    if report.accounts.len() < THIN_FILE_ACCOUNT_COUNT {
        recommendations.push(Recommendation {
            text: "Diversify your credit mix by adding another account type in good \
                   standing."
                .to_string(),
        });
    }

    recommendations
}
