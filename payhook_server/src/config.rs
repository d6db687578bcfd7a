use std::env;

use chrono::Duration;
use log::*;
use payhook_common::Secret;

const DEFAULT_PHK_HOST: &str = "127.0.0.1";
const DEFAULT_PHK_PORT: u16 = 8260;
const DEFAULT_SMS_URL: &str = "https://textbelt.com/text";
const DEFAULT_OUTBOX_POLL: Duration = Duration::seconds(10);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Per-provider webhook credentials. A provider with no secret configured has its route disabled (500).
    pub providers: ProviderConfig,
    /// Outbound notification settings for the outbox dispatch worker.
    pub notify: NotifyConfig,
    /// How often the dispatch worker scans the outbox for pending rows.
    pub outbox_poll_interval: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub stripe_webhook_secret: Option<Secret<String>>,
    pub psifi_webhook_secret: Option<Secret<String>>,
    pub paygate_nonce_secret: Option<Secret<String>>,
}

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    /// Textbelt-style SMS gateway key. When absent, operator SMS notifications are skipped silently.
    pub sms_api_key: Option<Secret<String>>,
    pub sms_url: String,
    pub operator_phone: Option<String>,
    /// Endpoint that receives `{"sale_id": ...}` POSTs after a commission is processed.
    pub partner_notify_url: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { sms_api_key: None, sms_url: DEFAULT_SMS_URL.to_string(), operator_phone: None, partner_notify_url: None }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PHK_HOST.to_string(),
            port: DEFAULT_PHK_PORT,
            database_url: String::default(),
            providers: ProviderConfig::default(),
            notify: NotifyConfig::default(),
            outbox_poll_interval: DEFAULT_OUTBOX_POLL,
        }
    }
}

fn optional_secret(var: &str) -> Option<Secret<String>> {
    match env::var(var) {
        Ok(s) if !s.is_empty() => Some(Secret::new(s)),
        _ => {
            warn!("🪛️ {var} is not set. The corresponding webhook route will refuse requests.");
            None
        },
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PHK_HOST").ok().unwrap_or_else(|| DEFAULT_PHK_HOST.into());
        let port = env::var("PHK_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for PHK_PORT. {e} Using the default, {DEFAULT_PHK_PORT}, instead."
                    );
                    DEFAULT_PHK_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_PHK_PORT);
        let database_url = env::var("PHK_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PHK_DATABASE_URL is not set. Please set it to the URL for the payhook database.");
            String::default()
        });
        let providers = ProviderConfig {
            stripe_webhook_secret: optional_secret("PHK_STRIPE_WEBHOOK_SECRET"),
            psifi_webhook_secret: optional_secret("PHK_PSIFI_WEBHOOK_SECRET"),
            paygate_nonce_secret: optional_secret("PHK_PAYGATE365_NONCE_SECRET"),
        };
        let sms_api_key = match env::var("PHK_SMS_API_KEY") {
            Ok(s) if !s.is_empty() => Some(Secret::new(s)),
            _ => {
                info!("🪛️ PHK_SMS_API_KEY is not set. Operator SMS notifications are disabled.");
                None
            },
        };
        let notify = NotifyConfig {
            sms_api_key,
            sms_url: env::var("PHK_SMS_URL").ok().unwrap_or_else(|| DEFAULT_SMS_URL.into()),
            operator_phone: env::var("PHK_OPERATOR_PHONE").ok().filter(|s| !s.is_empty()),
            partner_notify_url: env::var("PHK_PARTNER_NOTIFY_URL").ok().filter(|s| !s.is_empty()),
        };
        let outbox_poll_interval = env::var("PHK_OUTBOX_POLL_SECS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Duration::seconds)
            .unwrap_or(DEFAULT_OUTBOX_POLL);
        Self { host, port, database_url, providers, notify, outbox_poll_interval }
    }
}
