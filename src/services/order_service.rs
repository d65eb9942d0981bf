use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::audit_order,
    dto::orders::{
        CheckoutRequest, CheckoutResponse, OrderList, OrderWithItems, PaymentRedirectDto,
    },
    entity::{
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    gateway::{GatewayError, PreferenceRequest},
    lifecycle::{
        LineSnapshot, build_order_number, compute_totals, merge_requested_lines,
        normalize_shipping, validate_payment_method,
    },
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::notification_service,
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
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
    let orders = orders_from_models(models)?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Persists a new order with its item snapshots, then starts payment.
///
/// The order and its items are written in one transaction. For gateway
/// payments the redirect is requested only after commit, so a gateway
/// failure leaves a valid `pending` order that can be retried.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    let CheckoutRequest {
        items,
        delivery_type,
        shipping_address,
        payment_method,
        notes,
    } = payload;

    let requested: Vec<(Uuid, i32)> = items
        .iter()
        .map(|item| (item.product_id, item.quantity))
        .collect();
    let requested = merge_requested_lines(&requested)?;
    validate_payment_method(payment_method, delivery_type)?;
    let shipping_address = normalize_shipping(delivery_type, shipping_address)?;
    let notes = notes.map(|n| n.trim().to_string()).unwrap_or_default();

    let txn = state.orm.begin().await?;

    let product_ids: Vec<Uuid> = requested.iter().map(|(id, _)| *id).collect();
    let products = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .all(&txn)
        .await?;

    let mut lines = Vec::with_capacity(requested.len());
    for (product_id, quantity) in &requested {
        let product = products
            .iter()
            .find(|p| p.id == *product_id)
            .ok_or_else(|| AppError::BadRequest(format!("Product {product_id} does not exist")))?;
        lines.push(LineSnapshot {
            product_id: product.id,
            product_name: product.name.clone(),
            product_price: product.price,
            quantity: *quantity,
        });
    }

    let totals = compute_totals(&lines, delivery_type, state.store.delivery_fee)?;

    let sequence = next_order_sequence(&txn).await?;
    let order_id = Uuid::new_v4();
    let order_number = build_order_number(Utc::now().date_naive(), sequence);
    let shipping_json = shipping_address
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AppError::Internal(e.into()))?;

    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(order_number),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending.as_str().into()),
        total: Set(totals.total),
        shipping_cost: Set(totals.shipping_cost),
        delivery_type: Set(delivery_type.as_str().into()),
        shipping_address: Set(shipping_json),
        payment_method: Set(payment_method.as_str().into()),
        payment_status: Set(PaymentStatus::Pending.as_str().into()),
        gateway_payment_id: Set(None),
        paid_at: Set(None),
        notes: Set(notes),
        admin_notes: Set(String::new()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut item_rows = Vec::with_capacity(lines.len());
    for line in &lines {
        item_rows.push(OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(Some(line.product_id)),
            product_name: Set(line.product_name.clone()),
            product_price: Set(line.product_price),
            quantity: Set(line.quantity),
            subtotal: Set(line.subtotal()?),
            created_at: NotSet,
        });
    }
    OrderItems::insert_many(item_rows).exec(&txn).await?;

    let items = load_items(&txn, order.id).await?;

    // Dropping the transaction before this point rolls back the order too.
    txn.commit().await?;

    let order = Order::try_from(order)?;
    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total = order.total,
        payment_method = %order.payment_method,
        "order created"
    );

    audit_order(
        &state.pool,
        Some(user.user_id),
        "checkout",
        serde_json::json!({ "order_id": order.id, "order_number": order.order_number }),
    )
    .await;

    let payment = match order.payment_method {
        PaymentMethod::MercadoPago => {
            let redirect = initiate_payment(state, &order)
                .await
                .map_err(|source| AppError::PaymentInitiation {
                    order_id: order.id,
                    source,
                })?;
            Some(redirect)
        }
        PaymentMethod::Cash => {
            notification_service::notify_order(state, &order, &items).await;
            None
        }
    };

    Ok(ApiResponse::success(
        "Checkout success",
        CheckoutResponse {
            order,
            items,
            payment,
        },
        Some(Meta::empty()),
    ))
}

/// Requests a fresh redirect for one of the caller's unpaid gateway orders.
pub async fn retry_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<PaymentRedirectDto>> {
    let order = find_user_order(state, user, id).await?;
    let order = Order::try_from(order)?;

    if order.payment_method != PaymentMethod::MercadoPago {
        return Err(AppError::BadRequest("Order is not paid through the gateway".into()));
    }
    if order.status != OrderStatus::Pending
        || !matches!(order.payment_status, PaymentStatus::Pending | PaymentStatus::Failed)
    {
        return Err(AppError::BadRequest("Order is not awaiting payment".into()));
    }

    let redirect = initiate_payment(state, &order).await?;
    Ok(ApiResponse::success(
        "Payment initiated",
        redirect,
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_user_order(state, user, id).await?;
    let items = load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::try_from(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

async fn find_user_order(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

async fn initiate_payment(
    state: &AppState,
    order: &Order,
) -> Result<PaymentRedirectDto, GatewayError> {
    let request = PreferenceRequest {
        amount: order.total,
        description: format!("Order #{} - {}", order.order_number, state.store.name),
        external_reference: order.id,
    };
    let redirect = state.gateway.create_preference(&request).await.inspect_err(|err| {
        tracing::warn!(order_id = %order.id, error = %err, "payment initiation failed");
    })?;

    tracing::info!(
        order_id = %order.id,
        preference_id = %redirect.preference_id,
        "payment initiated"
    );
    Ok(PaymentRedirectDto {
        preference_id: redirect.preference_id,
        redirect_url: redirect.redirect_url,
    })
}

async fn next_order_sequence<C: ConnectionTrait>(conn: &C) -> AppResult<i64> {
    let row = conn
        .query_one(Statement::from_string(
            conn.get_database_backend(),
            "SELECT nextval('order_number_seq') AS seq",
        ))
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order number sequence returned no row")))?;
    Ok(row.try_get::<i64>("", "seq")?)
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItem>> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .order_by_asc(OrderItemCol::ProductName)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect();
    Ok(items)
}

pub(crate) fn orders_from_models(models: Vec<OrderModel>) -> AppResult<Vec<Order>> {
    models.into_iter().map(Order::try_from).collect()
}
