use axum::{Json, extract::State, http::HeaderMap};

use crate::{
    dto::webhook::{PaymentNotification, WebhookAck},
    error::{AppError, AppResult},
    gateway::mercadopago::verify_webhook_signature,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body = PaymentNotification,
    responses(
        (status = 200, description = "Notification processed or ignored", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Malformed notification"),
        (status = 401, description = "Invalid signature"),
        (status = 422, description = "Payment references no known order"),
        (status = 502, description = "Payment lookup failed")
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(notification): Json<PaymentNotification>,
) -> AppResult<Json<ApiResponse<WebhookAck>>> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing x-signature header".into()))?;
        let request_id = headers.get("x-request-id").and_then(|v| v.to_str().ok());
        let data_id = notification.payment_id().unwrap_or_default();

        if let Err(reason) = verify_webhook_signature(signature, request_id, &data_id, secret) {
            tracing::warn!(reason, "rejected payment notification");
            return Err(AppError::Unauthorized(reason.into()));
        }
    }

    let resp = payment_service::handle_notification(&state, notification).await?;
    Ok(Json(resp))
}
