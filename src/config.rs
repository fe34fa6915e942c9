use std::env;
use std::time::Duration;

/// Lower bound on the reconciliation interval. Anything shorter just burns
/// provider quota without converging faster.
pub const MIN_RECONCILE_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Provider credentials; `None` means payments are not configured and
    /// every payment endpoint fails fast with 503.
    pub tbank: Option<TbankConfig>,
    pub reconcile: ReconcileConfig,
    pub receipts: ReceiptConfig,
    /// Origins allowed as redirect targets for success/fail pages.
    pub allowed_origins: Vec<String>,
    /// Explicit webhook URL; falls back to `{base_url}/api/payments/notify`.
    pub notification_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TbankConfig {
    pub base_url: String,
    pub terminal_key: String,
    pub password: String,
    /// Hard deadline per provider call.
    pub timeout: Duration,
    /// Calls slower than this are logged but not failed.
    pub slow_threshold: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval: Duration,
    pub lookback: Duration,
    pub batch: i64,
}

#[derive(Debug, Clone)]
pub struct ReceiptConfig {
    pub enabled: bool,
    /// Provider tax code for line items (e.g. "none", "vat20").
    pub tax: Option<String>,
    /// Provider taxation system code (e.g. "usn_income").
    pub taxation: Option<String>,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Clamp a configured reconcile interval to the floor.
fn reconcile_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_RECONCILE_INTERVAL_SECS))
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("COURSEPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let tbank = match (env::var("TBANK_TERMINAL_KEY"), env::var("TBANK_PASSWORD")) {
            (Ok(terminal_key), Ok(password)) if !terminal_key.is_empty() && !password.is_empty() => {
                Some(TbankConfig {
                    base_url: env::var("TBANK_BASE_URL")
                        .unwrap_or_else(|_| "https://securepay.tinkoff.ru/v2".to_string()),
                    terminal_key,
                    password,
                    timeout: Duration::from_secs(env_u64("TBANK_TIMEOUT_SECS", 10)),
                    slow_threshold: Duration::from_millis(env_u64("TBANK_SLOW_MS", 1500)),
                })
            }
            _ => None,
        };

        let reconcile = ReconcileConfig {
            interval: reconcile_interval(env_u64("RECONCILE_INTERVAL_SECS", 300)),
            lookback: Duration::from_secs(env_u64("RECONCILE_LOOKBACK_HOURS", 168) * 3600),
            batch: env_u64("RECONCILE_BATCH", 20) as i64,
        };

        let receipts = ReceiptConfig {
            enabled: env::var("RECEIPTS_ENABLED")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
            tax: env::var("RECEIPT_TAX").ok().filter(|v| !v.is_empty()),
            taxation: env::var("RECEIPT_TAXATION").ok().filter(|v| !v.is_empty()),
        };

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "coursepay.db".to_string()),
            base_url,
            dev_mode,
            tbank,
            reconcile,
            receipts,
            allowed_origins,
            notification_url: env::var("NOTIFICATION_URL").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_interval_floor() {
        assert_eq!(reconcile_interval(0), Duration::from_secs(30));
        assert_eq!(reconcile_interval(5), Duration::from_secs(30));
        assert_eq!(reconcile_interval(30), Duration::from_secs(30));
        assert_eq!(reconcile_interval(300), Duration::from_secs(300));
    }
}
