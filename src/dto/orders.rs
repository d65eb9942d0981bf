use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{DeliveryType, Order, OrderItem, OrderStatus, PaymentMethod, ShippingAddress};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub delivery_type: DeliveryType,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentRedirectDto {
    pub preference_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Present for gateway payments; the caller opens `redirect_url`.
    pub payment: Option<PaymentRedirectDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderNotesRequest {
    pub admin_notes: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    /// Marks a paid order's payment as refunded.
    #[serde(default)]
    pub refund: bool,
    #[serde(default)]
    pub reason: Option<String>,
}
