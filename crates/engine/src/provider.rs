//! The boundary to external VAS providers.
//!
//! Implementations wrap a concrete gateway. The engine only sees a
//! [`ProviderOutcome`]; how a gateway maps its responses onto it is up to the
//! implementation. An outcome the gateway can't vouch for should be
//! [`ProviderOutcome::Ambiguous`], never a guess.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{FailureReason, VasKind};

/// What the engine asks a provider to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub transaction_id: Uuid,
    pub kind: VasKind,
    pub amount_minor: i64,
    pub plan: Option<String>,
    pub target: String,
}

/// What the provider says it delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredDetails {
    pub plan: Option<String>,
    pub amount_minor: i64,
}

impl DeliveredDetails {
    pub fn new(amount_minor: i64) -> Self {
        Self {
            plan: None,
            amount_minor,
        }
    }

    #[must_use]
    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderOutcome {
    Delivered(DeliveredDetails),
    Rejected(FailureReason),
    /// Accepted, but the result is not known yet.
    Ambiguous(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Other(String),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Name recorded on the transaction as its provider.
    fn name(&self) -> &str;

    async fn dispatch(&self, request: &PurchaseRequest) -> Result<ProviderOutcome, ProviderError>;
}
