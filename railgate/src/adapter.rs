//! The capability every rail integration provides to the router.

use async_trait::async_trait;

use crate::error::{RailError, Result};
use crate::proto::{RailPayload, RailPayment, RailRequest, SettlementEvent, StatusQuery, StatusReport};
use crate::rail::{PaymentMethod, Rail};

/// A payment rail.
///
/// Implementations own their assignment caches and used-transaction sets.
/// They are shared behind `Arc` and must tolerate concurrent calls.
#[async_trait]
pub trait RailAdapter: Send + Sync {
    /// Which rail this adapter serves.
    fn rail(&self) -> Rail;

    /// Whether credentials are present. Unconfigured adapters stay
    /// registered so the router can answer with [`RailError::NotConfigured`].
    fn is_configured(&self) -> bool;

    /// Whether `method` is offered on `network` right now.
    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        method.rail() == self.rail() && self.is_configured() && !network.is_empty()
    }

    /// Mints a payment, or serves a cached assignment for the same caller.
    ///
    /// # Errors
    ///
    /// Upstream and validation failures.
    async fn create_payment(&self, request: &RailRequest) -> Result<RailPayment>;

    /// Asks upstream where a payment stands.
    ///
    /// # Errors
    ///
    /// Upstream failures; the router reports those as pending.
    async fn check_status(&self, query: &StatusQuery) -> Result<StatusReport>;

    /// Removes the assignment behind `payload` from reuse. Idempotent.
    async fn mark_used(&self, payload: &RailPayload, email: Option<&str>);

    /// Authenticates and parses an inbound notification.
    ///
    /// `Ok(None)` means authentic but irrelevant (an event type we ignore).
    ///
    /// # Errors
    ///
    /// [`RailError::SignatureInvalid`] for bad signatures,
    /// [`RailError::Unsupported`] on rails without webhooks.
    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<Option<SettlementEvent>> {
        let _ = (signature, body);
        Err(RailError::Unsupported {
            rail: self.rail(),
            operation: "webhooks",
        })
    }

    /// Runs the assignment sweep. Returns how many entries were evicted.
    fn evict_stale(&self) -> usize;
}
