//! Payment gateway boundary.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod mercadopago;

pub use mercadopago::MercadoPagoGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway responded with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceRequest {
    pub amount: i64,
    pub description: String,
    /// Internal order id, echoed back as the payment's external reference.
    pub external_reference: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRedirect {
    pub preference_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub payment_id: String,
    pub status: String,
    pub external_reference: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a hosted checkout and returns where to send the customer.
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PaymentRedirect, GatewayError>;

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError>;
}
