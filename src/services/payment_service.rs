//! Gateway callback handling.
//!
//! Notifications are delivered at least once and may arrive after staff have
//! moved the order along, so every write here is a compare-and-set against the
//! values the resolution was computed from.

use chrono::Utc;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QuerySelect, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit::audit_order,
    dto::webhook::{PaymentNotification, WebhookAck},
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    gateway::PaymentDetails,
    lifecycle::{PaymentOutcome, resolve_payment},
    models::{Order, OrderStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    services::notification_service,
    state::AppState,
};

pub async fn handle_notification(
    state: &AppState,
    notification: PaymentNotification,
) -> AppResult<ApiResponse<WebhookAck>> {
    if !notification.is_payment() {
        tracing::info!(
            kind = ?notification.kind,
            action = ?notification.action,
            "ignoring non-payment notification"
        );
        return Ok(ApiResponse::success(
            "Ignored",
            WebhookAck::ignored(),
            Some(Meta::empty()),
        ));
    }

    let payment_id = notification
        .payment_id()
        .ok_or_else(|| AppError::BadRequest("Notification has no payment id".into()))?;

    let details = state.gateway.get_payment(&payment_id).await?;
    let ack = apply_payment(state, &details).await?;

    Ok(ApiResponse::success("OK", ack, Some(Meta::empty())))
}

/// Applies fetched payment details to the referenced order.
pub async fn apply_payment(state: &AppState, details: &PaymentDetails) -> AppResult<WebhookAck> {
    let reference = details.external_reference.as_deref().ok_or_else(|| {
        AppError::UnresolvableReference(format!("payment {} has no reference", details.payment_id))
    })?;
    let order_id = Uuid::parse_str(reference)
        .map_err(|_| AppError::UnresolvableReference(reference.to_string()))?;
    let outcome = PaymentOutcome::from_gateway_status(&details.status);

    let txn = state.orm.begin().await?;

    let current = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::UnresolvableReference(reference.to_string()))?;
    let current = Order::try_from(current)?;

    let resolution = resolve_payment(current.status, current.payment_status, outcome);
    if resolution.is_noop() {
        txn.commit().await?;
        tracing::info!(
            order_id = %order_id,
            payment_id = %details.payment_id,
            gateway_status = %details.status,
            status = %current.status,
            payment_status = %current.payment_status,
            "payment notification already applied"
        );
        return Ok(ack(&current));
    }

    let now = Utc::now();
    let mut payment_applied = false;

    if let Some(payment_status) = resolution.payment_status {
        let mut update = Orders::update_many()
            .col_expr(OrderCol::PaymentStatus, Expr::value(payment_status.as_str()))
            .col_expr(OrderCol::UpdatedAt, Expr::value(now));
        if resolution.record_reference {
            update = update.col_expr(
                OrderCol::GatewayPaymentId,
                Expr::value(details.payment_id.clone()),
            );
        }
        if payment_status == PaymentStatus::Paid {
            update = update.col_expr(OrderCol::PaidAt, Expr::value(now));
        }
        let result = update
            .filter(OrderCol::Id.eq(order_id))
            .filter(OrderCol::PaymentStatus.eq(current.payment_status.as_str()))
            .exec(&txn)
            .await?;
        payment_applied = result.rows_affected == 1;
    }

    if let Some(status) = resolution.status {
        // only a still-pending order moves; staff edits win otherwise
        let result = Orders::update_many()
            .col_expr(OrderCol::Status, Expr::value(status.as_str()))
            .col_expr(OrderCol::UpdatedAt, Expr::value(now))
            .filter(OrderCol::Id.eq(order_id))
            .filter(OrderCol::Status.eq(OrderStatus::Pending.as_str()))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            tracing::debug!(order_id = %order_id, "order left pending before payment resolved");
        }
    }

    let updated = Orders::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::UnresolvableReference(reference.to_string()))?;
    txn.commit().await?;
    let updated = Order::try_from(updated)?;

    tracing::info!(
        order_id = %order_id,
        payment_id = %details.payment_id,
        gateway_status = %details.status,
        status = %updated.status,
        payment_status = %updated.payment_status,
        "payment resolved"
    );

    audit_order(
        &state.pool,
        None,
        "payment_resolved",
        serde_json::json!({
            "order_id": order_id,
            "payment_id": details.payment_id,
            "gateway_status": details.status,
            "status": updated.status,
            "payment_status": updated.payment_status,
        }),
    )
    .await;

    if resolution.notify && payment_applied {
        notification_service::send_order_confirmation(state, order_id).await;
    }

    Ok(ack(&updated))
}

fn ack(order: &Order) -> WebhookAck {
    WebhookAck {
        handled: true,
        order_id: Some(order.id),
        status: Some(order.status),
        payment_status: Some(order.payment_status),
    }
}
