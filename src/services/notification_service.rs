use sea_orm::EntityTrait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    entity::{orders::Entity as Orders, users::Entity as Users},
    error::{AppError, AppResult},
    models::{Order, OrderItem},
    notify::{
        EmailMessage,
        messages::{OrderConfirmation, customer_message, staff_message},
    },
    services::order_service::load_items,
    state::AppState,
};

/// Outcome of one confirmation dispatch. Deliveries are best-effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub customer_sent: bool,
    pub staff_sent: bool,
}

/// Loads the order and dispatches the customer and staff messages.
pub async fn send_order_confirmation(state: &AppState, order_id: Uuid) -> NotificationReport {
    let loaded = async {
        let order = Orders::find_by_id(order_id)
            .one(&state.orm)
            .await?
            .ok_or(AppError::NotFound)?;
        let order = Order::try_from(order)?;
        let items = load_items(&state.orm, order_id).await?;
        AppResult::Ok((order, items))
    }
    .await;

    match loaded {
        Ok((order, items)) => notify_order(state, &order, &items).await,
        Err(err) => {
            tracing::warn!(order_id = %order_id, error = %err, "order confirmation skipped");
            NotificationReport::default()
        }
    }
}

pub async fn notify_order(
    state: &AppState,
    order: &Order,
    items: &[OrderItem],
) -> NotificationReport {
    let customer = match Users::find_by_id(order.user_id).one(&state.orm).await {
        Ok(Some(customer)) => customer,
        Ok(None) => {
            tracing::warn!(order_id = %order.id, "order confirmation skipped: customer not found");
            return NotificationReport::default();
        }
        Err(err) => {
            tracing::warn!(order_id = %order.id, error = %err, "order confirmation skipped");
            return NotificationReport::default();
        }
    };

    let confirmation = OrderConfirmation {
        order,
        items,
        customer_name: &customer.full_name,
        customer_email: &customer.email,
        customer_phone: customer.phone.as_deref(),
    };

    let report = NotificationReport {
        customer_sent: deliver(state, order, &customer_message(&state.store, &confirmation)).await,
        staff_sent: deliver(state, order, &staff_message(&state.store, &confirmation)).await,
    };

    tracing::info!(
        order_id = %order.id,
        customer_sent = report.customer_sent,
        staff_sent = report.staff_sent,
        "order confirmation dispatched"
    );
    report
}

async fn deliver(state: &AppState, order: &Order, message: &EmailMessage) -> bool {
    match state.notifier.send(message).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                order_id = %order.id,
                to = %message.to,
                error = %err,
                "notification delivery failed"
            );
            false
        }
    }
}
