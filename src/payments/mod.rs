//! Payment processor boundary: hosted checkout sessions and signed webhooks.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

mod stripe;

pub use stripe::{verify_signature, StripeGateway, SIGNATURE_TOLERANCE_SECS};
#[cfg(test)]
pub(crate) use stripe::sign_payload;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: String,
    pub client_reference_id: String,
    pub name: String,
    pub description: String,
    pub image_url: String,
    /// Smallest currency unit.
    pub unit_amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("missing or malformed signature header")]
    MalformedHeader,
    #[error("no signatures found matching the expected signature for payload")]
    SignatureMismatch,
    #[error("timestamp outside the tolerance zone")]
    Expired,
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the processor's session object.
    async fn create_checkout_session(&self, req: CheckoutRequest) -> anyhow::Result<Value>;

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, WebhookError>;
}
