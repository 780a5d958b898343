//! Structured failure reasons for VAS transactions.
//!
//! Providers should report a [`FailureCode`] directly. When all we have is the
//! provider's free text, [`FailureCode::classify`] maps known wording onto a
//! code; unknown wording becomes [`FailureCode::Other`], which the scanner
//! treats as a legitimate failure.

use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    // Clear failures: nothing was delivered.
    InsufficientBalance,
    InvalidNumber,
    NetworkUnavailable,
    InvalidRequest,
    UserCancelled,
    Timeout,
    ConnectionError,
    // Suspicious: the provider may have delivered.
    PlanMismatch,
    PriceMismatch,
    ProviderReportedSuccess,
    DeliveredDifferent,
    InternalError,
    ProviderUnconfirmed,
    Other,
}

/// How the scanner should treat a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// The provider clearly did not deliver; never flagged.
    Clear,
    /// The provider may have delivered; flagged for review.
    Suspicious,
    /// Suspicious only when a provider was recorded for the attempt.
    SuspiciousWithProvider,
    /// Unknown wording; presumed legitimate.
    Unclassified,
}

const CLEAR_PHRASES: &[(&str, FailureCode)] = &[
    ("insufficient balance", FailureCode::InsufficientBalance),
    ("insufficient wallet balance", FailureCode::InsufficientBalance),
    ("insufficient funds", FailureCode::InsufficientBalance),
    ("invalid phone number", FailureCode::InvalidNumber),
    ("invalid number", FailureCode::InvalidNumber),
    ("network not active", FailureCode::NetworkUnavailable),
    ("network not found", FailureCode::NetworkUnavailable),
    ("invalid request", FailureCode::InvalidRequest),
    ("invalid data purchase request", FailureCode::InvalidRequest),
    ("user cancelled", FailureCode::UserCancelled),
    ("timeout", FailureCode::Timeout),
    ("connection error", FailureCode::ConnectionError),
];

const SUSPICIOUS_PHRASES: &[(&str, FailureCode)] = &[
    ("plan mismatch", FailureCode::PlanMismatch),
    ("price mismatch", FailureCode::PriceMismatch),
    ("successful payment", FailureCode::ProviderReportedSuccess),
    ("provider succeeded", FailureCode::ProviderReportedSuccess),
    ("delivered different", FailureCode::DeliveredDifferent),
    ("is not defined", FailureCode::InternalError),
    ("name error", FailureCode::InternalError),
    ("crash", FailureCode::InternalError),
    ("exception", FailureCode::InternalError),
];

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientBalance => "insufficient_balance",
            Self::InvalidNumber => "invalid_number",
            Self::NetworkUnavailable => "network_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::UserCancelled => "user_cancelled",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::PlanMismatch => "plan_mismatch",
            Self::PriceMismatch => "price_mismatch",
            Self::ProviderReportedSuccess => "provider_reported_success",
            Self::DeliveredDifferent => "delivered_different",
            Self::InternalError => "internal_error",
            Self::ProviderUnconfirmed => "provider_unconfirmed",
            Self::Other => "other",
        }
    }

    pub fn class(self) -> FailureClass {
        match self {
            Self::InsufficientBalance
            | Self::InvalidNumber
            | Self::NetworkUnavailable
            | Self::InvalidRequest
            | Self::UserCancelled
            | Self::Timeout
            | Self::ConnectionError => FailureClass::Clear,
            Self::PlanMismatch
            | Self::PriceMismatch
            | Self::ProviderReportedSuccess
            | Self::DeliveredDifferent
            | Self::InternalError => FailureClass::Suspicious,
            Self::ProviderUnconfirmed => FailureClass::SuspiciousWithProvider,
            Self::Other => FailureClass::Unclassified,
        }
    }

    /// Maps provider free text onto a code. Clear phrases win over
    /// suspicious ones.
    pub fn classify(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if let Some((_, code)) = CLEAR_PHRASES
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase))
        {
            return *code;
        }
        if let Some((_, code)) = SUSPICIOUS_PHRASES
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase))
        {
            return *code;
        }
        if lowered.contains("provider did not confirm") {
            return Self::ProviderUnconfirmed;
        }
        Self::Other
    }
}

impl TryFrom<&str> for FailureCode {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let code = match value {
            "insufficient_balance" => Self::InsufficientBalance,
            "invalid_number" => Self::InvalidNumber,
            "network_unavailable" => Self::NetworkUnavailable,
            "invalid_request" => Self::InvalidRequest,
            "user_cancelled" => Self::UserCancelled,
            "timeout" => Self::Timeout,
            "connection_error" => Self::ConnectionError,
            "plan_mismatch" => Self::PlanMismatch,
            "price_mismatch" => Self::PriceMismatch,
            "provider_reported_success" => Self::ProviderReportedSuccess,
            "delivered_different" => Self::DeliveredDifferent,
            "internal_error" => Self::InternalError,
            "provider_unconfirmed" => Self::ProviderUnconfirmed,
            "other" => Self::Other,
            other => {
                return Err(EngineError::InvalidName(format!(
                    "invalid failure code: {other}"
                )));
            }
        };
        Ok(code)
    }
}

/// Why a VAS transaction failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: FailureCode,
    pub message: String,
}

impl FailureReason {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds a reason from unstructured provider text.
    pub fn from_text(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: FailureCode::classify(&message),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_wording_is_never_suspicious() {
        for text in [
            "Insufficient wallet balance",
            "Invalid phone number supplied",
            "Gateway timeout after 30s",
            "User cancelled the request",
        ] {
            assert_eq!(FailureCode::classify(text).class(), FailureClass::Clear, "{text}");
        }
    }

    #[test]
    fn crash_and_mismatch_wording_is_suspicious() {
        assert_eq!(
            FailureCode::classify("Plan mismatch: got 1.5GB"),
            FailureCode::PlanMismatch
        );
        assert_eq!(
            FailureCode::classify("name 'mongo' is not defined"),
            FailureCode::InternalError
        );
        assert_eq!(
            FailureCode::classify("Webhook reported successful payment"),
            FailureCode::ProviderReportedSuccess
        );
    }

    #[test]
    fn unknown_wording_is_presumed_legitimate() {
        assert_eq!(FailureCode::classify("Declined"), FailureCode::Other);
        assert_eq!(FailureCode::Other.class(), FailureClass::Unclassified);
    }

    #[test]
    fn unconfirmed_needs_a_provider() {
        let code = FailureCode::classify("Provider did not confirm delivery");
        assert_eq!(code.class(), FailureClass::SuspiciousWithProvider);
    }
}
