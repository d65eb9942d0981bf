use std::env;

use crate::lifecycle::DEFAULT_DELIVERY_FEE;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub store: StoreSettings,
    pub mercadopago: MercadoPagoConfig,
    pub mail: MailConfig,
}

/// Business settings the order services read at request time.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub name: String,
    pub delivery_fee: i64,
    pub pickup_address: String,
    pub staff_email: String,
    pub mail_from: String,
    pub staff_mail_from: String,
}

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: Option<String>,
    pub api_base: String,
    pub webhook_secret: Option<String>,
    pub site_url: String,
    pub notification_url: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: Option<String>,
    pub api_base: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            name: "Storefront".to_string(),
            delivery_fee: DEFAULT_DELIVERY_FEE,
            pickup_address: "Store counter".to_string(),
            staff_email: "staff@example.com".to_string(),
            mail_from: "Storefront <noreply@example.com>".to_string(),
            staff_mail_from: "Storefront orders <system@example.com>".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let defaults = StoreSettings::default();
        let delivery_fee = match env::var("DELIVERY_FEE") {
            Ok(raw) => {
                let fee = raw
                    .parse::<i64>()
                    .map_err(|e| anyhow::anyhow!("DELIVERY_FEE must be an integer: {e}"))?;
                anyhow::ensure!(fee >= 0, "DELIVERY_FEE must not be negative");
                fee
            }
            Err(_) => defaults.delivery_fee,
        };
        let name = env::var("STORE_NAME").unwrap_or(defaults.name);
        let store = StoreSettings {
            delivery_fee,
            pickup_address: env::var("STORE_PICKUP_ADDRESS").unwrap_or(defaults.pickup_address),
            staff_email: env::var("STAFF_EMAIL").unwrap_or(defaults.staff_email),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| format!("{name} <noreply@example.com>")),
            staff_mail_from: env::var("STAFF_MAIL_FROM")
                .unwrap_or_else(|_| format!("{name} orders <system@example.com>")),
            name,
        };

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{host}:{port}"));
        let mercadopago = MercadoPagoConfig {
            access_token: non_empty_var("MERCADOPAGO_ACCESS_TOKEN"),
            api_base: env::var("MERCADOPAGO_API_BASE")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            webhook_secret: non_empty_var("MERCADOPAGO_WEBHOOK_SECRET"),
            site_url: env::var("SITE_URL").unwrap_or_else(|_| public_base_url.clone()),
            notification_url: format!(
                "{}/api/payments/webhook",
                public_base_url.trim_end_matches('/')
            ),
        };

        let mail = MailConfig {
            api_key: non_empty_var("RESEND_API_KEY"),
            api_base: env::var("RESEND_API_BASE")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
        };

        Ok(Self {
            port,
            database_url,
            host,
            store,
            mercadopago,
            mail,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
