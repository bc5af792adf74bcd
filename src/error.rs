// Engine error taxonomy
// Typed failures the engine surfaces to its callers; transport-level
// concerns (HTTP codes, retries) belong to the consuming layer.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Bureau payload is missing the score or subject name fields.
    MalformedReport(String),

    /// Checkout requested a plan outside {core, pro}.
    InvalidPlan(String),

    /// Billing collaborator rejected the charge. The reason is passed
    /// through verbatim so the user can fix their payment method.
    Declined(String),

    /// Bureau or billing collaborator unreachable/misconfigured.
    /// Detail is for logs, never for the caller-facing message.
    UpstreamUnavailable(String),

    /// Invite code input was empty or unusable before lookup.
    InvalidCode,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MalformedReport(detail) => {
                write!(f, "malformed bureau report: {}", detail)
            }
            EngineError::InvalidPlan(plan) => write!(f, "invalid plan: {}", plan),
            EngineError::Declined(reason) => write!(f, "charge declined: {}", reason),
            EngineError::UpstreamUnavailable(detail) => {
                write!(f, "upstream unavailable: {}", detail)
            }
            EngineError::InvalidCode => write!(f, "invite code is required"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// True when the failure is the caller's fault (400-equivalent).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedReport(_)
                | EngineError::InvalidPlan(_)
                | EngineError::Declined(_)
                | EngineError::InvalidCode
        )
    }
}
