//! MercadoPago REST client (checkout preferences and payment lookups).

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use super::{GatewayError, PaymentDetails, PaymentGateway, PaymentRedirect, PreferenceRequest};
use crate::config::MercadoPagoConfig;

#[derive(Debug, Clone)]
pub struct MercadoPagoGateway {
    client: reqwest::Client,
    access_token: Option<String>,
    api_base: String,
    site_url: String,
    notification_url: String,
}

#[derive(Debug, Serialize)]
struct PreferenceBody<'a> {
    items: [PreferenceItem<'a>; 1],
    back_urls: BackUrls,
    auto_return: &'static str,
    external_reference: String,
    notification_url: &'a str,
}

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    title: &'a str,
    unit_price: i64,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct BackUrls {
    success: String,
    failure: String,
    pending: String,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: Value,
    status: String,
    external_reference: Option<String>,
}

impl MercadoPagoGateway {
    pub fn new(config: &MercadoPagoConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: config.access_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            notification_url: config.notification_url.clone(),
        }
    }

    fn token(&self) -> Result<&str, GatewayError> {
        self.access_token.as_deref().ok_or(GatewayError::NotConfigured)
    }

    fn preference_body<'a>(&'a self, request: &'a PreferenceRequest) -> PreferenceBody<'a> {
        PreferenceBody {
            items: [PreferenceItem {
                title: &request.description,
                unit_price: request.amount,
                quantity: 1,
            }],
            back_urls: BackUrls {
                success: format!("{}/payment/success", self.site_url),
                failure: format!("{}/payment/failure", self.site_url),
                pending: format!("{}/payment/pending", self.site_url),
            },
            auto_return: "approved",
            external_reference: request.external_reference.to_string(),
            notification_url: &self.notification_url,
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let value: Value = response.json().await?;
    serde_json::from_value(value).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PaymentRedirect, GatewayError> {
        let token = self.token()?;
        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(token)
            .json(&self.preference_body(request))
            .send()
            .await?;
        let preference: PreferenceResponse = read_json(response).await?;

        Ok(PaymentRedirect {
            preference_id: preference.id,
            redirect_url: preference.init_point,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError> {
        let token = self.token()?;
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.api_base, payment_id))
            .bearer_auth(token)
            .send()
            .await?;
        let payment: PaymentResponse = read_json(response).await?;

        Ok(PaymentDetails {
            payment_id: id_to_string(&payment.id).unwrap_or_else(|| payment_id.to_string()),
            status: payment.status,
            external_reference: payment.external_reference.filter(|r| !r.is_empty()),
        })
    }
}

/// Gateway ids arrive as either JSON numbers or strings.
pub fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Verifies an `x-signature` header (`ts=<ts>,v1=<hex hmac>`) for a notification.
///
/// The signed manifest is `id:<data.id>;request-id:<x-request-id>;ts:<ts>;`,
/// omitting the request-id part when that header is absent.
pub fn verify_webhook_signature(
    signature_header: &str,
    request_id: Option<&str>,
    data_id: &str,
    secret: &str,
) -> Result<(), &'static str> {
    let mut timestamp = "";
    let mut signature = "";
    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("ts=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = v;
        }
    }

    if timestamp.is_empty() || signature.is_empty() {
        return Err("Invalid x-signature header");
    }

    let mut manifest = format!("id:{};", data_id.to_lowercase());
    if let Some(request_id) = request_id {
        manifest.push_str(&format!("request-id:{request_id};"));
    }
    manifest.push_str(&format!("ts:{timestamp};"));

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
    mac.update(manifest.as_bytes());

    let sig_bytes = hex::decode(signature).map_err(|_| "Invalid signature hex")?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| "Webhook signature mismatch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn gateway() -> MercadoPagoGateway {
        MercadoPagoGateway::new(&MercadoPagoConfig {
            access_token: None,
            api_base: "https://api.mercadopago.com/".into(),
            webhook_secret: None,
            site_url: "https://shop.example.com/".into(),
            notification_url: "https://api.example.com/api/payments/webhook".into(),
        })
    }

    #[test]
    fn preference_body_carries_order_reference_and_total() {
        let gateway = gateway();
        let order_id = Uuid::new_v4();
        let request = PreferenceRequest {
            amount: 5500,
            description: "Order #ORD-20261019-000001".into(),
            external_reference: order_id,
        };

        let body = serde_json::to_value(gateway.preference_body(&request)).unwrap();
        assert_eq!(body["external_reference"], order_id.to_string());
        assert_eq!(body["items"][0]["unit_price"], 5500);
        assert_eq!(body["items"][0]["quantity"], 1);
        assert_eq!(body["items"][0]["title"], "Order #ORD-20261019-000001");
        assert_eq!(body["auto_return"], "approved");
        assert_eq!(body["back_urls"]["success"], "https://shop.example.com/payment/success");
        assert_eq!(
            body["notification_url"],
            "https://api.example.com/api/payments/webhook"
        );
    }

    #[tokio::test]
    async fn unconfigured_gateway_refuses_calls() {
        let gateway = gateway();
        let err = gateway.get_payment("123").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured));
    }

    #[test]
    fn payment_ids_accept_numbers_and_strings() {
        assert_eq!(id_to_string(&serde_json::json!(123456)), Some("123456".into()));
        assert_eq!(id_to_string(&serde_json::json!("abc")), Some("abc".into()));
        assert_eq!(id_to_string(&serde_json::json!(null)), None);
        assert_eq!(id_to_string(&serde_json::json!("")), None);
    }

    #[test]
    fn signature_round_trip() {
        let secret = "topsecret";
        let manifest = "id:123;request-id:req-1;ts:1700000000;";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("ts=1700000000,v1={sig}");

        assert!(verify_webhook_signature(&header, Some("req-1"), "123", secret).is_ok());
        assert!(verify_webhook_signature(&header, Some("req-2"), "123", secret).is_err());
        assert!(verify_webhook_signature("v1=abc", None, "123", secret).is_err());
    }
}
