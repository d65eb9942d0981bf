use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entity::{
        categories::Model as CategoryModel, order_items::Model as OrderItemModel,
        orders::Model as OrderModel, products::Model as ProductModel, users::Model as UserModel,
    },
    error::AppError,
};

/// Implements `as_str`, `Display` and `FromStr` over the wire vocabulary of an enum.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(AppError::BadRequest(format!(
                        "Invalid {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Ready,
    /// Reserved for delivery orders; no transition assigns it automatically.
    Shipped,
    Delivered,
    Cancelled,
}

wire_enum!(OrderStatus {
    Pending => "pending",
    Paid => "paid",
    Processing => "processing",
    Ready => "ready",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

wire_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Pickup,
    Delivery,
}

wire_enum!(DeliveryType {
    Pickup => "pickup",
    Delivery => "delivery",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentMethod {
    #[serde(rename = "mercadopago")]
    MercadoPago,
    #[serde(rename = "cash")]
    Cash,
}

wire_enum!(PaymentMethod {
    MercadoPago => "mercadopago",
    Cash => "cash",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total: i64,
    pub shipping_cost: i64,
    pub delivery_type: DeliveryType,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub gateway_payment_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub admin_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a purchased line; never follows later catalog edits.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub product_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for User {
    fn from(model: UserModel) -> Self {
        Self {
            id: model.id,
            email: model.email,
            full_name: model.full_name,
            phone: model.phone,
            role: model.role,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<CategoryModel> for Category {
    fn from(model: CategoryModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<ProductModel> for Product {
    fn from(model: ProductModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            stock: model.stock,
            image_url: model.image_url,
            category_id: model.category_id,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl TryFrom<OrderModel> for Order {
    type Error = AppError;

    fn try_from(model: OrderModel) -> Result<Self, Self::Error> {
        let shipping_address = model
            .shipping_address
            .map(serde_json::from_value::<ShippingAddress>)
            .transpose()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "order {} has a malformed shipping address: {e}",
                    model.id
                ))
            })?;

        Ok(Self {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            status: stored(&model.status)?,
            total: model.total,
            shipping_cost: model.shipping_cost,
            delivery_type: stored(&model.delivery_type)?,
            shipping_address,
            payment_method: stored(&model.payment_method)?,
            payment_status: stored(&model.payment_status)?,
            gateway_payment_id: model.gateway_payment_id,
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
            notes: model.notes,
            admin_notes: model.admin_notes,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

impl From<OrderItemModel> for OrderItem {
    fn from(model: OrderItemModel) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            product_name: model.product_name,
            product_price: model.product_price,
            quantity: model.quantity,
            subtotal: model.subtotal,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

// A stored value outside the vocabulary is a schema problem, not a client one.
fn stored<T: FromStr<Err = AppError>>(value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|e: AppError| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_matches_wire_values() {
        for wire in ["pending", "paid", "processing", "ready", "shipped", "delivered", "cancelled"] {
            let status: OrderStatus = wire.parse().unwrap();
            assert_eq!(status.as_str(), wire);
            assert_eq!(serde_json::to_string(&status).unwrap(), format!("\"{wire}\""));
        }
        let json = serde_json::to_string(&PaymentMethod::MercadoPago).unwrap();
        assert_eq!(json, "\"mercadopago\"");
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("completed".parse::<OrderStatus>().is_err());
        assert_eq!("refunded".parse::<PaymentStatus>().unwrap(), PaymentStatus::Refunded);
    }
}
