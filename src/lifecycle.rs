//! Order lifecycle rules: cost computation, checkout validation, payment
//! resolution and staff transitions.
//!
//! Everything here is pure; the services load the current row, ask these
//! functions what should change, then persist the answer with conditional
//! updates.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{DeliveryType, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress},
};

/// Flat fee charged on `delivery` orders unless configured otherwise.
pub const DEFAULT_DELIVERY_FEE: i64 = 2500;

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Position along the fulfillment path. `Cancelled` is off the path.
    fn stage(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Paid => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Ready => Some(3),
            OrderStatus::Shipped => Some(4),
            OrderStatus::Delivered => Some(5),
            OrderStatus::Cancelled => None,
        }
    }
}

pub fn shipping_cost(delivery_type: DeliveryType, delivery_fee: i64) -> i64 {
    match delivery_type {
        DeliveryType::Delivery => delivery_fee,
        DeliveryType::Pickup => 0,
    }
}

/// One purchased line, priced from the catalog at checkout time.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSnapshot {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_price: i64,
    pub quantity: i32,
}

impl LineSnapshot {
    pub fn subtotal(&self) -> AppResult<i64> {
        self.product_price
            .checked_mul(i64::from(self.quantity))
            .ok_or_else(|| AppError::BadRequest(format!("Line total overflows for {}", self.product_name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub items_subtotal: i64,
    pub shipping_cost: i64,
    pub total: i64,
}

pub fn compute_totals(
    lines: &[LineSnapshot],
    delivery_type: DeliveryType,
    delivery_fee: i64,
) -> AppResult<Totals> {
    if lines.is_empty() {
        return Err(AppError::BadRequest("Order has no items".into()));
    }

    let mut items_subtotal: i64 = 0;
    for line in lines {
        items_subtotal = items_subtotal
            .checked_add(line.subtotal()?)
            .ok_or_else(|| AppError::BadRequest("Order total overflows".into()))?;
    }
    let shipping_cost = shipping_cost(delivery_type, delivery_fee);
    let total = items_subtotal
        .checked_add(shipping_cost)
        .ok_or_else(|| AppError::BadRequest("Order total overflows".into()))?;

    Ok(Totals {
        items_subtotal,
        shipping_cost,
        total,
    })
}

/// Checks requested quantities and folds repeated products into one line.
pub fn merge_requested_lines(items: &[(Uuid, i32)]) -> AppResult<Vec<(Uuid, i32)>> {
    if items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut merged: Vec<(Uuid, i32)> = Vec::with_capacity(items.len());
    for &(product_id, quantity) in items {
        if quantity <= 0 {
            return Err(AppError::BadRequest(format!(
                "Quantity for product {product_id} must be positive"
            )));
        }
        match merged.iter_mut().find(|(id, _)| *id == product_id) {
            Some((_, existing)) => {
                *existing = existing
                    .checked_add(quantity)
                    .ok_or_else(|| AppError::BadRequest("Quantity too large".into()))?;
            }
            None => merged.push((product_id, quantity)),
        }
    }
    Ok(merged)
}

/// Returns the address to persist: required and complete for delivery, dropped for pickup.
pub fn normalize_shipping(
    delivery_type: DeliveryType,
    address: Option<ShippingAddress>,
) -> AppResult<Option<ShippingAddress>> {
    match delivery_type {
        DeliveryType::Pickup => Ok(None),
        DeliveryType::Delivery => {
            let address = address.ok_or_else(|| {
                AppError::BadRequest("Shipping address is required for delivery".into())
            })?;
            let address = ShippingAddress {
                street: address.street.trim().to_string(),
                city: address.city.trim().to_string(),
                postal_code: address.postal_code.trim().to_string(),
                phone: address.phone.trim().to_string(),
                notes: address
                    .notes
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
            };

            let missing: Vec<&str> = [
                ("street", &address.street),
                ("city", &address.city),
                ("postal_code", &address.postal_code),
                ("phone", &address.phone),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(field, _)| field)
            .collect();
            if !missing.is_empty() {
                return Err(AppError::BadRequest(format!(
                    "Missing shipping fields: {}",
                    missing.join(", ")
                )));
            }
            Ok(Some(address))
        }
    }
}

pub fn validate_payment_method(
    method: PaymentMethod,
    delivery_type: DeliveryType,
) -> AppResult<()> {
    if method == PaymentMethod::Cash && delivery_type == DeliveryType::Delivery {
        return Err(AppError::BadRequest(
            "Cash payment is only available for pickup orders".into(),
        ));
    }
    Ok(())
}

pub fn build_order_number(date: NaiveDate, sequence: i64) -> String {
    format!("ORD-{}-{:06}", date.format("%Y%m%d"), sequence)
}

/// Payment outcome as reported by the gateway, reduced to what the engine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Approved,
    Rejected,
    Refunded,
    InProgress,
}

impl PaymentOutcome {
    pub fn from_gateway_status(status: &str) -> Self {
        match status {
            "approved" => PaymentOutcome::Approved,
            "rejected" | "cancelled" => PaymentOutcome::Rejected,
            "refunded" | "charged_back" => PaymentOutcome::Refunded,
            _ => PaymentOutcome::InProgress,
        }
    }
}

/// What a payment notification changes on an order. `None` fields stay as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaymentResolution {
    /// Order status to set, applied only while the stored status is still `Pending`.
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub record_reference: bool,
    pub notify: bool,
}

impl PaymentResolution {
    pub fn is_noop(&self) -> bool {
        self.status.is_none() && self.payment_status.is_none() && !self.record_reference
    }
}

/// Decides how a gateway outcome applies to an order in its current state.
///
/// Re-applying a resolution to the state it produced yields a no-op, so
/// redelivered notifications never notify twice or move the order backwards.
pub fn resolve_payment(
    status: OrderStatus,
    payment_status: PaymentStatus,
    outcome: PaymentOutcome,
) -> PaymentResolution {
    match outcome {
        PaymentOutcome::Approved => match payment_status {
            PaymentStatus::Paid | PaymentStatus::Refunded => PaymentResolution::default(),
            PaymentStatus::Pending | PaymentStatus::Failed => PaymentResolution {
                status: (status == OrderStatus::Pending).then_some(OrderStatus::Paid),
                payment_status: Some(PaymentStatus::Paid),
                record_reference: true,
                notify: status != OrderStatus::Cancelled,
            },
        },
        PaymentOutcome::Rejected => match payment_status {
            PaymentStatus::Pending => PaymentResolution {
                payment_status: Some(PaymentStatus::Failed),
                ..PaymentResolution::default()
            },
            _ => PaymentResolution::default(),
        },
        PaymentOutcome::Refunded => match payment_status {
            PaymentStatus::Paid => PaymentResolution {
                payment_status: Some(PaymentStatus::Refunded),
                ..PaymentResolution::default()
            },
            _ => PaymentResolution::default(),
        },
        PaymentOutcome::InProgress => PaymentResolution::default(),
    }
}

/// A staff-requested status change. Any target is accepted; direction is
/// reported so callers can log overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    pub fn is_regression(&self) -> bool {
        match (self.from.stage(), self.to.stage()) {
            (Some(from), Some(to)) => to < from,
            // leaving cancelled reopens the order
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

pub fn staff_transition(from: OrderStatus, to: OrderStatus) -> StatusChange {
    StatusChange { from, to }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelPlan {
    pub payment_status: Option<PaymentStatus>,
}

pub fn refund_eligible(payment_status: PaymentStatus) -> bool {
    payment_status == PaymentStatus::Paid
}

pub fn plan_cancellation(
    status: OrderStatus,
    payment_status: PaymentStatus,
    refund: bool,
) -> AppResult<CancelPlan> {
    if !status.can_cancel() {
        return Err(AppError::BadRequest(format!(
            "Order in status '{status}' cannot be cancelled"
        )));
    }
    if refund && !refund_eligible(payment_status) {
        return Err(AppError::BadRequest(format!(
            "Order with payment status '{payment_status}' is not eligible for refund"
        )));
    }
    Ok(CancelPlan {
        payment_status: refund.then_some(PaymentStatus::Refunded),
    })
}
