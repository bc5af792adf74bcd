// 🎟️ Invite Code Gate - capped single-purpose tokens for lender onboarding
// Validation is read-only and repeatable; the checks short-circuit in a
// fixed order so the caller always gets the most precise reason. Redemption
// (incrementing the uses counter) is a separate store step performed only
// at final account activation.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// INVITE CODE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCode {
    /// Canonical form: trimmed, upper-case.
    pub code: String,
    /// None = unlimited.
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub current_uses: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl InviteCode {
    /// Redeemable iff active, unexpired, and under the use cap.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
            && self
                .max_uses
                .map(|cap| self.current_uses < cap)
                .unwrap_or(true)
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionReason {
    /// Code not found.
    Invalid,
    /// Code exists but was deactivated.
    Inactive,
    /// Code exists but expired.
    Expired,
    /// Use cap reached.
    Exhausted,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Invalid => "invalid",
            RejectionReason::Inactive => "inactive",
            RejectionReason::Expired => "expired",
            RejectionReason::Exhausted => "exhausted",
        }
    }

    /// Guided-flow message for the signup UI.
    pub fn message(&self) -> &'static str {
        match self {
            RejectionReason::Invalid => "Invalid invite code",
            RejectionReason::Inactive => "This invite code is no longer active",
            RejectionReason::Expired => "This invite code has expired",
            RejectionReason::Exhausted => "This invite code has reached its usage limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<RejectionReason>,
}

impl Validation {
    fn ok() -> Self {
        Validation {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: RejectionReason) -> Self {
        Validation {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Canonicalize raw input: trim and upper-case. Empty input fails fast
/// before any lookup happens.
pub fn canonicalize(raw: &str) -> Result<String, EngineError> {
    let canonical = raw.trim().to_uppercase();
    if canonical.is_empty() {
        return Err(EngineError::InvalidCode);
    }
    Ok(canonical)
}

/// Validate a looked-up code. Check order matters for reason precision:
/// not-found, inactive, expired, exhausted - first failure wins.
/// Never increments usage; probing is side-effect-free.
pub fn validate(found: Option<&InviteCode>, now: DateTime<Utc>) -> Validation {
    let code = match found {
        Some(code) => code,
        None => return Validation::rejected(RejectionReason::Invalid),
    };

    if !code.is_active {
        return Validation::rejected(RejectionReason::Inactive);
    }

    if let Some(expires_at) = code.expires_at {
        if expires_at <= now {
            return Validation::rejected(RejectionReason::Expired);
        }
    }

    if let Some(cap) = code.max_uses {
        if code.current_uses >= cap {
            return Validation::rejected(RejectionReason::Exhausted);
        }
    }

    Validation::ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn code() -> InviteCode {
        InviteCode {
            code: "LENDER2026".to_string(),
            max_uses: Some(5),
            current_uses: 0,
            is_active: true,
            expires_at: None,
        }
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("  lender2026 ").unwrap(), "LENDER2026");
        assert!(matches!(canonicalize("   "), Err(EngineError::InvalidCode)));
        assert!(matches!(canonicalize(""), Err(EngineError::InvalidCode)));
    }

    #[test]
    fn test_not_found_is_invalid() {
        let result = validate(None, Utc::now());
        assert!(!result.valid);
        assert_eq!(result.reason, Some(RejectionReason::Invalid));
    }

    #[test]
    fn test_happy_path() {
        let result = validate(Some(&code()), Utc::now());
        assert!(result.valid);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_inactive_beats_expired() {
        // Inactive AND expired: inactive is checked first.
        let mut c = code();
        c.is_active = false;
        c.expires_at = Some(Utc::now() - Duration::days(1));

        let result = validate(Some(&c), Utc::now());
        assert_eq!(result.reason, Some(RejectionReason::Inactive));
    }

    #[test]
    fn test_expired() {
        let mut c = code();
        c.expires_at = Some(Utc::now() - Duration::hours(1));
        assert_eq!(
            validate(Some(&c), Utc::now()).reason,
            Some(RejectionReason::Expired)
        );
    }

    #[test]
    fn test_exhausted_at_cap() {
        // maxUses=1, currentUses=1, active -> exhausted
        let mut c = code();
        c.max_uses = Some(1);
        c.current_uses = 1;

        let result = validate(Some(&c), Utc::now());
        assert!(!result.valid);
        assert_eq!(result.reason, Some(RejectionReason::Exhausted));
    }

    #[test]
    fn test_unlimited_uses() {
        let mut c = code();
        c.max_uses = None;
        c.current_uses = 1_000_000;
        assert!(validate(Some(&c), Utc::now()).valid);
    }

    #[test]
    fn test_validation_is_pure() {
        let c = code();
        let before = c.current_uses;
        for _ in 0..10 {
            validate(Some(&c), Utc::now());
        }
        assert_eq!(c.current_uses, before);
    }

    #[test]
    fn test_is_redeemable_mirrors_validation() {
        let now = Utc::now();
        assert!(code().is_redeemable(now));

        let mut exhausted = code();
        exhausted.max_uses = Some(1);
        exhausted.current_uses = 1;
        assert!(!exhausted.is_redeemable(now));
    }
}
