use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    gateway::mercadopago::id_to_string,
    models::{OrderStatus, PaymentStatus},
};

/// Gateway callback body: `{"type": "payment", "data": {"id": ...}}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentNotification {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NotificationData {
    #[schema(value_type = String)]
    pub id: Value,
}

impl PaymentNotification {
    pub fn is_payment(&self) -> bool {
        match self.kind.as_deref() {
            Some(kind) => kind == "payment",
            None => self
                .action
                .as_deref()
                .is_some_and(|action| action.starts_with("payment.")),
        }
    }

    pub fn payment_id(&self) -> Option<String> {
        self.data.as_ref().and_then(|data| id_to_string(&data.id))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub handled: bool,
    pub order_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl WebhookAck {
    pub fn ignored() -> Self {
        Self {
            handled: false,
            order_id: None,
            status: None,
            payment_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_payment_ids() {
        let numeric: PaymentNotification =
            serde_json::from_str(r#"{"type":"payment","data":{"id":123456}}"#).unwrap();
        assert!(numeric.is_payment());
        assert_eq!(numeric.payment_id().as_deref(), Some("123456"));

        let string: PaymentNotification =
            serde_json::from_str(r#"{"action":"payment.updated","data":{"id":"987"}}"#).unwrap();
        assert!(string.is_payment());
        assert_eq!(string.payment_id().as_deref(), Some("987"));
    }

    #[test]
    fn other_topics_are_not_payments() {
        let order: PaymentNotification =
            serde_json::from_str(r#"{"type":"merchant_order","data":{"id":1}}"#).unwrap();
        assert!(!order.is_payment());

        let empty: PaymentNotification = serde_json::from_str("{}").unwrap();
        assert!(!empty.is_payment());
        assert!(empty.payment_id().is_none());
    }
}
