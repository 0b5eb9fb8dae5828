//! Server & worker configuration

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-operation timeouts applied at every suspension point
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub db: Duration,
    pub health_db: Duration,
    pub keyspace: Duration,
    pub smtp: Duration,
    pub gateway: Duration,
    /// Whole-request deadline for synchronous endpoints
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            db: Duration::from_secs(5),
            health_db: Duration::from_secs(2),
            keyspace: Duration::from_secs(3),
            smtp: Duration::from_secs(30),
            gateway: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

/// VNPay merchant settings
#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub return_url: String,
}

/// MoMo merchant settings
#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub pay_url: String,
    pub return_url: String,
    pub ipn_url: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment: development | staging | production
    pub environment: String,
    /// SQLite path (`sqlite:` prefix optional)
    pub database_url: String,
    pub http_port: u16,
    /// HS256 secret for user tokens
    pub jwt_secret: String,
    /// Shared secret for service-to-service calls (`x-service-token`)
    pub service_token: String,
    pub vnpay: VnpayConfig,
    pub momo: MomoConfig,
    /// Gateway refund endpoint (`None` → refunds are settled locally)
    pub refund_api_url: Option<String>,
    /// Transactional email HTTP API (`None` → emails are only logged)
    pub email_api_url: Option<String>,
    pub email_api_key: String,
    pub email_from: String,
    pub reservation_ttl: Duration,
    pub shipping_flat_fee: Decimal,
    /// Max per-line price divergence before checkout fails with `price_changed`
    pub price_tolerance: Decimal,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub promotion_sweep_limit: i64,
    /// Max notifications per user per `notification:send_pending` run
    pub notification_user_rate_cap: usize,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
    pub timeouts: Timeouts,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = env_or("ENVIRONMENT", "development");

        let timeouts = Timeouts {
            db: Duration::from_millis(env_parse("DB_TIMEOUT_MS", 5_000)),
            health_db: Duration::from_millis(env_parse("HEALTH_DB_TIMEOUT_MS", 2_000)),
            keyspace: Duration::from_millis(env_parse("KEYSPACE_TIMEOUT_MS", 3_000)),
            smtp: Duration::from_millis(env_parse("SMTP_TIMEOUT_MS", 30_000)),
            gateway: Duration::from_millis(env_parse("GATEWAY_TIMEOUT_MS", 10_000)),
            request: Duration::from_millis(env_parse("REQUEST_TIMEOUT_MS", 30_000)),
        };

        Ok(Self {
            database_url: env_or("DATABASE_URL", "bookstore.db"),
            http_port: env_parse("HTTP_PORT", 8080),
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            service_token: Self::require_secret("SERVICE_TOKEN", &environment)?,
            vnpay: VnpayConfig {
                tmn_code: env_or("VNPAY_TMN_CODE", "DEVTMN01"),
                hash_secret: Self::require_secret("VNPAY_HASH_SECRET", &environment)?,
                pay_url: env_or(
                    "VNPAY_PAY_URL",
                    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html",
                ),
                return_url: env_or("VNPAY_RETURN_URL", "http://localhost:3000/payment/return"),
            },
            momo: MomoConfig {
                partner_code: env_or("MOMO_PARTNER_CODE", "MOMODEV"),
                access_key: env_or("MOMO_ACCESS_KEY", "dev-access-key"),
                secret_key: Self::require_secret("MOMO_SECRET_KEY", &environment)?,
                pay_url: env_or("MOMO_PAY_URL", "https://test-payment.momo.vn/v2/gateway/pay"),
                return_url: env_or("MOMO_RETURN_URL", "http://localhost:3000/payment/return"),
                ipn_url: env_or("MOMO_IPN_URL", "http://localhost:8080/api/v1/webhooks/momo"),
            },
            refund_api_url: env_opt("REFUND_API_URL"),
            email_api_url: env_opt("EMAIL_API_URL"),
            email_api_key: env_or("EMAIL_API_KEY", ""),
            email_from: env_or("EMAIL_FROM", "no-reply@bookstore.local"),
            reservation_ttl: Duration::from_secs(60 * env_parse("RESERVATION_TTL_MINUTES", 15u64)),
            shipping_flat_fee: env_parse("SHIPPING_FLAT_FEE", Decimal::ZERO),
            price_tolerance: env_parse("PRICE_TOLERANCE", Decimal::new(1, 2)),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 10),
            worker_poll_interval: Duration::from_millis(env_parse("WORKER_POLL_INTERVAL_MS", 1_000)),
            promotion_sweep_limit: env_parse("PROMOTION_SWEEP_LIMIT", 100),
            notification_user_rate_cap: env_parse("NOTIFICATION_USER_RATE_CAP", 5),
            log_level: env_or("LOG_LEVEL", "info"),
            log_json: env_parse("LOG_JSON", environment != "development"),
            log_dir: env_opt("LOG_DIR"),
            timeouts,
            environment,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Defaults for tests and local tooling
    pub fn for_tests() -> Self {
        Self {
            environment: "development".into(),
            database_url: "sqlite::memory:".into(),
            http_port: 0,
            jwt_secret: "test-jwt-secret-at-least-32-bytes-long".into(),
            service_token: "test-service-token".into(),
            vnpay: VnpayConfig {
                tmn_code: "TESTTMN1".into(),
                hash_secret: "vnpay-test-secret".into(),
                pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".into(),
                return_url: "http://localhost:3000/payment/return".into(),
            },
            momo: MomoConfig {
                partner_code: "MOMOTEST".into(),
                access_key: "momo-test-access".into(),
                secret_key: "momo-test-secret".into(),
                pay_url: "https://test-payment.momo.vn/v2/gateway/pay".into(),
                return_url: "http://localhost:3000/payment/return".into(),
                ipn_url: "http://localhost:8080/api/v1/webhooks/momo".into(),
            },
            refund_api_url: None,
            email_api_url: None,
            email_api_key: String::new(),
            email_from: "no-reply@bookstore.test".into(),
            reservation_ttl: Duration::from_secs(15 * 60),
            shipping_flat_fee: Decimal::ZERO,
            price_tolerance: Decimal::new(1, 2),
            worker_concurrency: 4,
            worker_poll_interval: Duration::from_millis(50),
            promotion_sweep_limit: 100,
            notification_user_rate_cap: 5,
            log_level: "debug".into(),
            log_json: false,
            log_dir: None,
            timeouts: Timeouts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let t = Timeouts::default();
        assert_eq!(t.db, Duration::from_secs(5));
        assert_eq!(t.health_db, Duration::from_secs(2));
        assert_eq!(t.keyspace, Duration::from_secs(3));
        assert_eq!(t.smtp, Duration::from_secs(30));
        assert_eq!(t.gateway, Duration::from_secs(10));

        let c = Config::for_tests();
        assert_eq!(c.reservation_ttl, Duration::from_secs(900));
        assert_eq!(c.price_tolerance, Decimal::new(1, 2));
    }

    #[test]
    fn test_require_secret_dev_fallback() {
        let v = Config::require_secret("BOOKSTORE_TEST_UNSET_SECRET", "development").unwrap();
        assert!(v.starts_with("dev-"));
        assert!(Config::require_secret("BOOKSTORE_TEST_UNSET_SECRET", "production").is_err());
    }
}
