use std::sync::Arc;

use crate::{
    config::{AppConfig, StoreSettings},
    db::{DbPool, OrmConn, orm_from_pool},
    gateway::{MercadoPagoGateway, PaymentGateway},
    notify::{LogSender, NotificationSender, ResendSender},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub store: StoreSettings,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationSender>,
    /// Secret for gateway callback signatures; verification is skipped when unset.
    pub webhook_secret: Option<String>,
}

impl AppState {
    /// Wires the live gateway and mail provider. Mail falls back to the log
    /// when no API key is configured.
    pub fn from_config(config: &AppConfig, pool: DbPool) -> Self {
        if config.mercadopago.access_token.is_none() {
            tracing::warn!("MERCADOPAGO_ACCESS_TOKEN is not set; gateway checkouts will fail");
        }
        let notifier: Arc<dyn NotificationSender> = match config.mail.api_key.as_deref() {
            Some(key) => Arc::new(ResendSender::new(key, &config.mail.api_base)),
            None => {
                tracing::warn!("RESEND_API_KEY is not set; order emails are logged only");
                Arc::new(LogSender)
            }
        };

        Self {
            orm: orm_from_pool(&pool),
            pool,
            store: config.store.clone(),
            gateway: Arc::new(MercadoPagoGateway::new(&config.mercadopago)),
            notifier,
            webhook_secret: config.mercadopago.webhook_secret.clone(),
        }
    }
}
