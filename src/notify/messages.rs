use std::fmt::Write;

use super::EmailMessage;
use crate::{
    config::StoreSettings,
    models::{DeliveryType, Order, OrderItem, PaymentMethod, PaymentStatus},
};

/// Everything needed to render the confirmation pair for one order.
#[derive(Debug, Clone, Copy)]
pub struct OrderConfirmation<'a> {
    pub order: &'a Order,
    pub items: &'a [OrderItem],
    pub customer_name: &'a str,
    pub customer_email: &'a str,
    /// Profile phone, shown to staff when the order carries no shipping address.
    pub customer_phone: Option<&'a str>,
}

pub fn customer_message(store: &StoreSettings, confirmation: &OrderConfirmation<'_>) -> EmailMessage {
    let order = confirmation.order;
    let name = if confirmation.customer_name.trim().is_empty() {
        "customer"
    } else {
        confirmation.customer_name
    };
    let headline = match order.payment_status {
        PaymentStatus::Paid => "Your order has been confirmed!",
        _ => "We have received your order.",
    };

    let mut body = String::new();
    let _ = writeln!(body, "Hello {name},");
    let _ = writeln!(body);
    let _ = writeln!(body, "{headline}");
    let _ = writeln!(body);
    write_summary(&mut body, store, confirmation);
    let _ = writeln!(body);
    let _ = writeln!(body, "We will contact you soon to coordinate the delivery.");
    let _ = writeln!(body, "Thank you for shopping at {}.", store.name);

    EmailMessage {
        from: store.mail_from.clone(),
        to: confirmation.customer_email.to_string(),
        subject: format!("{} #{} - {}", subject_prefix(order), order.order_number, store.name),
        body,
    }
}

pub fn staff_message(store: &StoreSettings, confirmation: &OrderConfirmation<'_>) -> EmailMessage {
    let order = confirmation.order;

    let mut body = String::new();
    let _ = writeln!(body, "NEW ORDER #{}", order.order_number);
    let _ = writeln!(body, "Customer: {}", confirmation.customer_name);
    let _ = writeln!(body, "Email: {}", confirmation.customer_email);
    let phone = order
        .shipping_address
        .as_ref()
        .map(|address| address.phone.as_str())
        .or(confirmation.customer_phone)
        .filter(|phone| !phone.trim().is_empty());
    if let Some(phone) = phone {
        let _ = writeln!(body, "Phone: {phone}");
    }
    let _ = writeln!(body);
    write_summary(&mut body, store, confirmation);
    let _ = writeln!(body, "Payment method: {}", payment_method_label(order.payment_method));
    if !order.notes.trim().is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "CUSTOMER NOTES:");
        let _ = writeln!(body, "{}", order.notes.trim());
    }

    EmailMessage {
        from: store.staff_mail_from.clone(),
        to: store.staff_email.clone(),
        subject: format!("{} #{}", subject_prefix(order), order.order_number),
        body,
    }
}

fn subject_prefix(order: &Order) -> &'static str {
    match order.payment_status {
        PaymentStatus::Paid => "Order confirmed",
        _ => "Order received",
    }
}

fn write_summary(body: &mut String, store: &StoreSettings, confirmation: &OrderConfirmation<'_>) {
    let order = confirmation.order;
    let _ = writeln!(body, "Order number: #{}", order.order_number);
    let _ = writeln!(body, "Date: {}", order.created_at.format("%Y-%m-%d"));
    let _ = writeln!(body);
    let _ = writeln!(body, "ITEMS:");
    for item in confirmation.items {
        let _ = writeln!(
            body,
            "- {} x{} - {}",
            item.product_name,
            item.quantity,
            format_amount(item.subtotal)
        );
    }
    let _ = writeln!(body);
    let _ = writeln!(body, "DELIVERY:");
    let _ = writeln!(body, "{}", delivery_info(store, order));
    if order.shipping_cost > 0 {
        let _ = writeln!(body, "Shipping: {}", format_amount(order.shipping_cost));
    }
    let _ = writeln!(body);
    let _ = writeln!(body, "TOTAL: {}", format_amount(order.total));
    let _ = writeln!(body, "Payment status: {}", payment_status_label(order.payment_status));
}

fn delivery_info(store: &StoreSettings, order: &Order) -> String {
    match (order.delivery_type, &order.shipping_address) {
        (DeliveryType::Delivery, Some(address)) => {
            let mut info = format!("Ship to: {}, {} ({})", address.street, address.city, address.postal_code);
            if let Some(notes) = &address.notes {
                info.push_str(&format!("\nDelivery notes: {notes}"));
            }
            info
        }
        _ => format!("Store pickup: {}", store.pickup_address),
    }
}

fn payment_method_label(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::MercadoPago => "MercadoPago",
        PaymentMethod::Cash => "Cash on pickup",
    }
}

fn payment_status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Paid => "CONFIRMED",
        PaymentStatus::Pending => "pending",
        PaymentStatus::Failed => "failed",
        PaymentStatus::Refunded => "refunded",
    }
}

/// Formats whole currency units with thousands separators, e.g. `$12,500`.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::models::{OrderStatus, ShippingAddress};

    fn order(delivery_type: DeliveryType, payment_status: PaymentStatus) -> Order {
        let created = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-20261019-000007".into(),
            user_id: Uuid::new_v4(),
            status: OrderStatus::Paid,
            total: 5500,
            shipping_cost: if delivery_type == DeliveryType::Delivery { 2500 } else { 0 },
            delivery_type,
            shipping_address: (delivery_type == DeliveryType::Delivery).then(|| ShippingAddress {
                street: "Calle 7 1234".into(),
                city: "La Plata".into(),
                postal_code: "1900".into(),
                phone: "+54 221 555 0101".into(),
                notes: Some("Ring twice".into()),
            }),
            payment_method: PaymentMethod::MercadoPago,
            payment_status,
            gateway_payment_id: Some("98765".into()),
            paid_at: Some(created),
            notes: "Gift wrap please".into(),
            admin_notes: String::new(),
            created_at: created,
            updated_at: created,
        }
    }

    fn items(order_id: Uuid) -> Vec<OrderItem> {
        vec![OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: Some(Uuid::new_v4()),
            product_name: "Lavender oil".into(),
            product_price: 1000,
            quantity: 3,
            subtotal: 3000,
            created_at: Utc::now(),
        }]
    }

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(0), "$0");
        assert_eq!(format_amount(999), "$999");
        assert_eq!(format_amount(5500), "$5,500");
        assert_eq!(format_amount(1234567), "$1,234,567");
        assert_eq!(format_amount(-2500), "-$2,500");
    }

    #[test]
    fn customer_message_summarizes_delivery_order() {
        let store = StoreSettings::default();
        let order = order(DeliveryType::Delivery, PaymentStatus::Paid);
        let items = items(order.id);
        let msg = customer_message(
            &store,
            &OrderConfirmation {
                order: &order,
                items: &items,
                customer_name: "Ana",
                customer_email: "ana@example.com",
                customer_phone: None,
            },
        );

        assert_eq!(msg.to, "ana@example.com");
        assert!(msg.subject.starts_with("Order confirmed #ORD-20261019-000007"));
        assert!(msg.body.contains("Hello Ana"));
        assert!(msg.body.contains("- Lavender oil x3 - $3,000"));
        assert!(msg.body.contains("Ship to: Calle 7 1234, La Plata (1900)"));
        assert!(msg.body.contains("TOTAL: $5,500"));
        assert!(!msg.body.contains("Gift wrap"));
    }

    #[test]
    fn staff_message_includes_contact_and_notes() {
        let store = StoreSettings::default();
        let order = order(DeliveryType::Delivery, PaymentStatus::Paid);
        let items = items(order.id);
        let msg = staff_message(
            &store,
            &OrderConfirmation {
                order: &order,
                items: &items,
                customer_name: "Ana",
                customer_email: "ana@example.com",
                customer_phone: None,
            },
        );

        assert_eq!(msg.to, store.staff_email);
        assert!(msg.body.contains("Email: ana@example.com"));
        assert!(msg.body.contains("Phone: +54 221 555 0101"));
        assert!(msg.body.contains("CUSTOMER NOTES:\nGift wrap please"));
    }

    #[test]
    fn pickup_message_uses_store_address_and_pending_wording() {
        let store = StoreSettings::default();
        let order = order(DeliveryType::Pickup, PaymentStatus::Pending);
        let msg = customer_message(
            &store,
            &OrderConfirmation {
                order: &order,
                items: &[],
                customer_name: "",
                customer_email: "ana@example.com",
                customer_phone: None,
            },
        );

        assert!(msg.subject.starts_with("Order received"));
        assert!(msg.body.contains("Hello customer"));
        assert!(msg.body.contains(&format!("Store pickup: {}", store.pickup_address)));
        assert!(msg.body.contains("Payment status: pending"));
    }

    #[test]
    fn staff_message_falls_back_to_profile_phone_for_pickup() {
        let store = StoreSettings::default();
        let order = order(DeliveryType::Pickup, PaymentStatus::Pending);
        let with_phone = staff_message(
            &store,
            &OrderConfirmation {
                order: &order,
                items: &[],
                customer_name: "Ana",
                customer_email: "ana@example.com",
                customer_phone: Some("+54 221 555 0202"),
            },
        );
        assert!(with_phone.body.contains("Phone: +54 221 555 0202"));

        let without = staff_message(
            &store,
            &OrderConfirmation {
                order: &order,
                items: &[],
                customer_name: "Ana",
                customer_email: "ana@example.com",
                customer_phone: None,
            },
        );
        assert!(!without.body.contains("Phone:"));
    }
}
