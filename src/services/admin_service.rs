use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::audit_order,
    dto::orders::{
        CancelOrderRequest, OrderList, OrderWithItems, UpdateOrderNotesRequest,
        UpdateOrderStatusRequest,
    },
    entity::orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    lifecycle::{plan_cancellation, staff_transition},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{AdminOrderQuery, SortOrder},
    services::order_service::{load_items, orders_from_models},
    state::AppState,
};

const TERMINAL: [OrderStatus; 2] = [OrderStatus::Delivered, OrderStatus::Cancelled];

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: AdminOrderQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }
    if query.open_only.unwrap_or(false) {
        condition = condition.add(OrderCol::Status.is_not_in(TERMINAL.iter().map(|s| s.as_str())));
    }
    if let Some(from) = query.from {
        condition = condition.add(OrderCol::CreatedAt.gte(from));
    }
    if let Some(to) = query.to {
        condition = condition.add(OrderCol::CreatedAt.lt(to));
    }
    if let Some(user_id) = query.user_id {
        condition = condition.add(OrderCol::UserId.eq(user_id));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let meta = Meta::new(page, limit, total);

    let order_list = OrderList {
        items: orders_from_models(models)?,
    };

    Ok(ApiResponse::success("Orders", order_list, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let items = load_items(&state.orm, order.id).await?;

    let data = OrderWithItems {
        order: Order::try_from(order)?,
        items,
    };
    Ok(ApiResponse::success(
        "Order found",
        data,
        Some(Meta::empty()),
    ))
}

/// Sets any status on an order. Staff overrides are not sequenced; moves
/// backwards along the fulfillment path are allowed and logged.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let txn = state.orm.begin().await?;
    let existing = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    let current = Order::try_from(existing.clone())?;

    let change = staff_transition(current.status, payload.status);
    if change.is_noop() {
        txn.commit().await?;
        return Ok(ApiResponse::success(
            "Order unchanged",
            current,
            Some(Meta::empty()),
        ));
    }
    if change.is_regression() {
        tracing::warn!(
            order_id = %id,
            from = %change.from,
            to = %change.to,
            "order status moved backwards by staff"
        );
    }

    let mut active: OrderActive = existing.into();
    active.status = Set(change.to.as_str().into());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    audit_order(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        serde_json::json!({ "order_id": order.id, "from": change.from, "to": change.to }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        Order::try_from(order)?,
        Some(Meta::empty()),
    ))
}

pub async fn update_order_notes(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderNotesRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let existing = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: OrderActive = existing.into();
    active.admin_notes = Set(payload.admin_notes.trim().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    audit_order(
        &state.pool,
        Some(user.user_id),
        "order_notes_update",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        Order::try_from(order)?,
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let txn = state.orm.begin().await?;
    let existing = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    let current = Order::try_from(existing.clone())?;

    let plan = plan_cancellation(current.status, current.payment_status, payload.refund)?;

    let mut active: OrderActive = existing.into();
    active.status = Set(OrderStatus::Cancelled.as_str().into());
    if let Some(payment_status) = plan.payment_status {
        active.payment_status = Set(payment_status.as_str().into());
    }
    if let Some(reason) = payload.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        let notes = if current.admin_notes.is_empty() {
            format!("Cancelled: {reason}")
        } else {
            format!("{}\nCancelled: {reason}", current.admin_notes)
        };
        active.admin_notes = Set(notes);
    }
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %id,
        from = %current.status,
        refunded = plan.payment_status.is_some(),
        "order cancelled"
    );

    audit_order(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        serde_json::json!({
            "order_id": order.id,
            "from": current.status,
            "refund": payload.refund,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order cancelled",
        Order::try_from(order)?,
        Some(Meta::empty()),
    ))
}
