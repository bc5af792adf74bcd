// 📊 Bankability Scorer - CreditReport → 1.0-10.0 readiness score
// Pure and deterministic: same report in, same score out, every time.
// The score measures funding readiness only; it never approves or denies
// anything.
//
// NOTE: two weight sets coexist on purpose. The score FORMULA weighs the
// bureau score 70% and utilization 30%. The breakdown DISPLAY table carries
// the fixed 35/15/15/10/10 category weights from the source display table.
// They are independent constants and are intentionally not reconciled.

use crate::report::CreditReport;
use serde::{Deserialize, Serialize};

// ============================================================================
// FORMULA CONSTANTS
// ============================================================================

/// Bureau score ceiling; divides the raw score down to a 10-point scale.
pub const BUREAU_SCORE_CEILING: f64 = 850.0;

/// Score-formula weights (out of 10 points total).
pub const SCORE_WEIGHT_BUREAU: f64 = 7.0;
pub const SCORE_WEIGHT_UTILIZATION: f64 = 3.0;

/// Utilization at or above this ratio flags the category for attention.
pub const UTILIZATION_ATTENTION_THRESHOLD: f64 = 0.30;

pub const SCORE_FLOOR: f64 = 1.0;
pub const SCORE_CEILING: f64 = 10.0;

// ============================================================================
// CATEGORY BREAKDOWN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PaymentHistory,
    Utilization,
    CreditAge,
    AccountMix,
    NewCredit,
}

impl Category {
    pub fn key(&self) -> &'static str {
        match self {
            Category::PaymentHistory => "payment_history",
            Category::Utilization => "utilization",
            Category::CreditAge => "credit_age",
            Category::AccountMix => "account_mix",
            Category::NewCredit => "new_credit",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::PaymentHistory => "Payment History",
            Category::Utilization => "Credit Utilization",
            Category::CreditAge => "Length of Credit History",
            Category::AccountMix => "Credit Mix",
            Category::NewCredit => "New Credit",
        }
    }

    /// Display weight (percent). Independent from the formula weights above.
    pub fn percentage_weight(&self) -> u8 {
        match self {
            Category::PaymentHistory => 35,
            Category::Utilization => 15,
            Category::CreditAge => 15,
            Category::AccountMix => 10,
            Category::NewCredit => 10,
        }
    }
}

/// Fixed category order for the breakdown.
pub const CATEGORIES: [Category; 5] = [
    Category::PaymentHistory,
    Category::Utilization,
    Category::CreditAge,
    Category::AccountMix,
    Category::NewCredit,
];

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBreakdown {
    pub key: &'static str,
    pub label: &'static str,
    pub percentage_weight: u8,
    pub status: &'static str,
}

// ============================================================================
// SCORE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BankabilityScore {
    /// Externally visible value, rounded to one decimal, in [1.0, 10.0].
    pub value: f64,

    /// Full-precision clamped value, kept for downstream reuse.
    pub raw: f64,

    /// Average utilization the formula used (0.0 when no limit-bearing
    /// accounts exist).
    pub utilization: f64,

    /// Fixed five-category display breakdown.
    pub breakdown: Vec<CategoryBreakdown>,
}

/// Compute the Bankability Score for a normalized report.
///
/// Formula: bureau score mapped onto a 10-point scale (÷85) at 70% weight,
/// plus inverse utilization at 30% weight, clamped to [1.0, 10.0].
/// Given a valid CreditReport this cannot fail.
pub fn score(report: &CreditReport) -> BankabilityScore {
    let utilization = report.utilization();

    let bureau_term = (report.score as f64 / BUREAU_SCORE_CEILING) * SCORE_WEIGHT_BUREAU;
    let utilization_term = (1.0 - utilization) * SCORE_WEIGHT_UTILIZATION;

    let raw = (bureau_term + utilization_term).clamp(SCORE_FLOOR, SCORE_CEILING);
    let value = (raw * 10.0).round() / 10.0;

    BankabilityScore {
        value,
        raw,
        utilization,
        breakdown: breakdown(utilization),
    }
}

/// Build the display breakdown. Only the utilization status is derived from
/// data; the other four carry the fixed statuses from the source display
/// table.
fn breakdown(utilization: f64) -> Vec<CategoryBreakdown> {
    CATEGORIES
        .iter()
        .map(|category| {
            let status = match category {
                Category::Utilization => {
                    if utilization < UTILIZATION_ATTENTION_THRESHOLD {
                        "excellent"
                    } else {
                        "needs_attention"
                    }
                }
                Category::PaymentHistory => "good",
                Category::CreditAge => "fair",
                Category::AccountMix => "fair",
                Category::NewCredit => "good",
            };

            CategoryBreakdown {
                key: category.key(),
                label: category.label(),
                percentage_weight: category.percentage_weight(),
                status,
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CreditReport, TradeLine};

    fn account(balance: f64, limit: f64) -> TradeLine {
        TradeLine {
            name: "Test".to_string(),
            balance,
            limit,
            monthly_payment: 0.0,
            status: "Open".to_string(),
        }
    }

    fn report(score: i64, accounts: Vec<TradeLine>) -> CreditReport {
        CreditReport {
            score,
            accounts,
            inquiries: vec![],
        }
    }

    #[test]
    fn test_example_scenario() {
        // score 720, one account at 20% utilization:
        // (720/850)*7 + 0.8*3 = 5.929 + 2.4 = 8.329 -> 8.3
        let result = score(&report(720, vec![account(1000.0, 5000.0)]));
        assert!((result.utilization - 0.2).abs() < 1e-9);
        assert_eq!(result.value, 8.3);
    }

    #[test]
    fn test_zero_accounts_scored_on_bureau_term_only() {
        let result = score(&report(720, vec![]));
        assert_eq!(result.utilization, 0.0);
        // (720/850)*7 + 1.0*3 = 8.929 -> 8.9
        assert_eq!(result.value, 8.9);
    }

    #[test]
    fn test_clamped_to_range_at_extremes() {
        // Worst case: score 0, fully utilized
        let worst = score(&report(0, vec![account(5000.0, 5000.0)]));
        assert_eq!(worst.value, 1.0);

        // Best case: score 850, no balances
        let best = score(&report(850, vec![account(0.0, 5000.0)]));
        assert_eq!(best.value, 10.0);

        // All limits zero: utilization term maxes out, no crash
        let zero_limits = score(&report(850, vec![account(900.0, 0.0)]));
        assert!(zero_limits.value >= 1.0 && zero_limits.value <= 10.0);
        assert_eq!(zero_limits.utilization, 0.0);
    }

    #[test]
    fn test_deterministic() {
        let r = report(640, vec![account(2000.0, 4000.0)]);
        assert_eq!(score(&r).value, score(&r).value);
        assert_eq!(score(&r).raw, score(&r).raw);
    }

    #[test]
    fn test_breakdown_is_fixed_table() {
        let result = score(&report(700, vec![]));

        assert_eq!(result.breakdown.len(), 5);
        assert_eq!(result.breakdown[0].key, "payment_history");
        assert_eq!(result.breakdown[0].percentage_weight, 35);
        assert_eq!(result.breakdown[1].key, "utilization");
        assert_eq!(result.breakdown[1].percentage_weight, 15);
        assert_eq!(result.breakdown[2].percentage_weight, 15);
        assert_eq!(result.breakdown[3].percentage_weight, 10);
        assert_eq!(result.breakdown[4].percentage_weight, 10);
        assert_eq!(result.breakdown[0].status, "good");
        assert_eq!(result.breakdown[2].status, "fair");
    }

    #[test]
    fn test_utilization_status_threshold() {
        let low = score(&report(700, vec![account(1000.0, 5000.0)]));
        assert_eq!(low.breakdown[1].status, "excellent");

        let high = score(&report(700, vec![account(4000.0, 5000.0)]));
        assert_eq!(high.breakdown[1].status, "needs_attention");
    }
}
