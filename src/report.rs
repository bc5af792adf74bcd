// 📋 Report Normalizer - Bureau payload → canonical CreditReport
// Bureau payloads are inconsistently populated, so extraction is deliberately
// lenient: a partial report must still produce a score rather than fail the
// whole pipeline. Only a missing score or missing subject name is fatal.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// CANONICAL REPORT
// ============================================================================

/// One trade line (open or closed account) from the bureau file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLine {
    pub name: String,
    pub balance: f64,
    pub limit: f64,
    pub monthly_payment: f64,
    pub status: String,
}

/// One credit inquiry. `inquiry_type` is "soft", "hard", or whatever the
/// bureau sent; unknown values are preserved, not rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inquiry {
    pub name: String,
    pub date: String,
    pub inquiry_type: String,
}

/// Normalized credit report. Constructed once per pull, immutable after.
/// Account/inquiry order is bureau order; it carries no meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReport {
    /// Bureau-reported score. Nominally 0-850 but treated as an opaque
    /// non-negative integer.
    pub score: i64,
    pub accounts: Vec<TradeLine>,
    pub inquiries: Vec<Inquiry>,
}

impl CreditReport {
    /// Average balance/limit over accounts with limit > 0.
    /// Zero-limit accounts are excluded (division-by-zero guard); with no
    /// usable accounts utilization is 0 so zero-account users are scored on
    /// the bureau term alone.
    pub fn utilization(&self) -> f64 {
        let mut sum = 0.0;
        let mut counted = 0usize;

        for account in &self.accounts {
            if account.limit > 0.0 {
                sum += account.balance / account.limit;
                counted += 1;
            }
        }

        if counted == 0 {
            0.0
        } else {
            sum / counted as f64
        }
    }
}

// ============================================================================
// EXTRACTION HELPERS
// ============================================================================

/// First present key wins. Bureaus disagree on field spellings.
fn pick<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    for key in keys {
        if let Some(found) = value.get(*key) {
            if !found.is_null() {
                return Some(found);
            }
        }
    }
    None
}

/// Money fields default to 0 and are clamped non-negative.
fn money(value: &Value, keys: &[&str]) -> f64 {
    let raw = match pick(value, keys) {
        Some(v) => v,
        None => return 0.0,
    };

    let parsed = if let Some(n) = raw.as_f64() {
        n
    } else if let Some(s) = raw.as_str() {
        // Tolerate "$1,234.56" style strings
        s.replace(['$', ','], "").trim().parse::<f64>().unwrap_or(0.0)
    } else {
        0.0
    };

    parsed.max(0.0)
}

fn text(value: &Value, keys: &[&str], default: &str) -> String {
    match pick(value, keys).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => default.to_string(),
    }
}

fn array<'a>(value: &'a Value, keys: &[&str]) -> Vec<&'a Value> {
    pick(value, keys)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Convert a raw bureau response into a canonical report.
///
/// Fails with `MalformedReport` only when the score field or the subject
/// name fields are absent. Every other missing sub-field is defaulted
/// (0 for money, "Unknown" for names, "soft" for inquiry type).
pub fn normalize(raw: &Value) -> Result<CreditReport, EngineError> {
    let score = pick(raw, &["creditScore", "score", "ficoScore"])
        .and_then(|v| v.as_i64())
        .ok_or_else(|| EngineError::MalformedReport("missing score field".to_string()))?;

    if score < 0 {
        return Err(EngineError::MalformedReport(format!(
            "negative score: {}",
            score
        )));
    }

    // Subject identity must be present even though the engine does not keep
    // it: a nameless report is a mismatched pull, not a sparse one.
    let has_name = pick(raw, &["firstName", "first_name"])
        .and_then(|v| v.as_str())
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
        && pick(raw, &["lastName", "last_name"])
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);

    if !has_name {
        return Err(EngineError::MalformedReport(
            "missing subject name fields".to_string(),
        ));
    }

    let accounts = array(raw, &["tradeLines", "trade_lines", "accounts"])
        .into_iter()
        .map(|line| TradeLine {
            name: text(line, &["creditorName", "name"], "Unknown"),
            balance: money(line, &["balance", "currentBalance"]),
            limit: money(line, &["creditLimit", "limit", "highCredit"]),
            monthly_payment: money(line, &["monthlyPayment", "payment"]),
            status: text(line, &["status", "accountStatus"], "Unknown"),
        })
        .collect();

    let inquiries = array(raw, &["inquiries", "creditInquiries"])
        .into_iter()
        .map(|inquiry| Inquiry {
            name: text(inquiry, &["subscriberName", "name"], "Unknown"),
            date: text(inquiry, &["inquiryDate", "date"], ""),
            inquiry_type: text(inquiry, &["inquiryType", "type"], "soft"),
        })
        .collect();

    Ok(CreditReport {
        score,
        accounts,
        inquiries,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject() -> Value {
        json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "creditScore": 720
        })
    }

    #[test]
    fn test_minimal_report_normalizes() {
        let report = normalize(&subject()).unwrap();
        assert_eq!(report.score, 720);
        assert!(report.accounts.is_empty());
        assert!(report.inquiries.is_empty());
    }

    #[test]
    fn test_missing_score_is_malformed() {
        let raw = json!({"firstName": "Ada", "lastName": "Lovelace"});
        let err = normalize(&raw).unwrap_err();
        assert!(matches!(err, EngineError::MalformedReport(_)));
    }

    #[test]
    fn test_missing_name_is_malformed() {
        let raw = json!({"creditScore": 700, "firstName": "Ada"});
        assert!(normalize(&raw).is_err());
    }

    #[test]
    fn test_sparse_trade_lines_default() {
        let mut raw = subject();
        raw["tradeLines"] = json!([
            {"creditorName": "Chase", "balance": 1000, "creditLimit": 5000},
            {}
        ]);

        let report = normalize(&raw).unwrap();
        assert_eq!(report.accounts.len(), 2);
        assert_eq!(report.accounts[0].name, "Chase");
        assert_eq!(report.accounts[1].name, "Unknown");
        assert_eq!(report.accounts[1].balance, 0.0);
        assert_eq!(report.accounts[1].limit, 0.0);
        assert_eq!(report.accounts[1].status, "Unknown");
    }

    #[test]
    fn test_money_string_and_negative_clamp() {
        let mut raw = subject();
        raw["accounts"] = json!([
            {"name": "Amex", "balance": "$1,250.50", "limit": -300}
        ]);

        let report = normalize(&raw).unwrap();
        assert_eq!(report.accounts[0].balance, 1250.50);
        assert_eq!(report.accounts[0].limit, 0.0);
    }

    #[test]
    fn test_inquiry_type_defaults_to_soft() {
        let mut raw = subject();
        raw["inquiries"] = json!([{"subscriberName": "Lender A"}]);

        let report = normalize(&raw).unwrap();
        assert_eq!(report.inquiries[0].inquiry_type, "soft");
    }

    #[test]
    fn test_utilization_skips_zero_limit_accounts() {
        let report = CreditReport {
            score: 700,
            accounts: vec![
                TradeLine {
                    name: "A".to_string(),
                    balance: 500.0,
                    limit: 1000.0,
                    monthly_payment: 25.0,
                    status: "Open".to_string(),
                },
                TradeLine {
                    name: "B".to_string(),
                    balance: 900.0,
                    limit: 0.0,
                    monthly_payment: 0.0,
                    status: "Open".to_string(),
                },
            ],
            inquiries: vec![],
        };

        assert_eq!(report.utilization(), 0.5);
    }

    #[test]
    fn test_utilization_zero_accounts() {
        let report = CreditReport {
            score: 700,
            accounts: vec![],
            inquiries: vec![],
        };
        assert_eq!(report.utilization(), 0.0);
    }
}
