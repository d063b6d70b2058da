use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

// Хранилище: postgres в проде, memory для локального запуска
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub pool_size: u32,
}

// Настройки Redis (кеш снимков зала, необязателен)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub snapshot_ttl_seconds: u64,
}

const MAX_HOLD_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

// Правила удержания мест
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub hold_window_seconds: u64,
    pub max_seats_per_booking: usize,
    pub sweep_interval_seconds: u64,
    pub currency: String,
}

impl BookingConfig {
    // Окно удержания как chrono-интервал; ограничено годом
    pub fn hold_window_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_window_seconds.min(MAX_HOLD_WINDOW_SECONDS) as i64)
    }

    // tokio::time::interval не принимает нулевой период
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_window_seconds: 600,
            max_seats_per_booking: 5,
            sweep_interval_seconds: 300,
            currency: "KZT".to_string(),
        }
    }
}

// Настройки платежного шлюза
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub success_url: String,
    pub fail_url: String,
    pub webhook_url: String,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Куда отправлять уведомления (booking.confirmed, show.created)
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
}

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing { name })
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = var_or(name, default);
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn positive_or(name: &'static str, default: &str) -> Result<u64, ConfigError> {
    match parse_or::<u64>(name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: StoreBackend = parse_or("STORE_BACKEND", "postgres")?;
        let database_url = optional("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing { name: "DATABASE_URL" });
        }

        Ok(Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parse_or("PORT", "8000")?,
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "booking_engine=debug,tower_http=debug"),
                log_format: parse_or("LOG_FORMAT", "pretty")?,
            },
            database: DatabaseConfig {
                backend,
                url: database_url,
                pool_size: parse_or("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
                snapshot_ttl_seconds: parse_or("SEAT_SNAPSHOT_TTL_SECONDS", "2")?,
            },
            booking: BookingConfig {
                hold_window_seconds: positive_or("HOLD_WINDOW_SECONDS", "600")?,
                max_seats_per_booking: parse_or("MAX_SEATS_PER_BOOKING", "5")?,
                sweep_interval_seconds: positive_or("SWEEP_INTERVAL_SECONDS", "300")?,
                currency: var_or("CURRENCY", "KZT"),
            },
            payment: PaymentConfig {
                merchant_id: required("MERCHANT_ID")?,
                merchant_password: required("MERCHANT_PASSWORD")?,
                gateway_url: var_or("PAYMENT_GATEWAY_URL", "https://gateway.hackload.com"),
                success_url: var_or(
                    "PAYMENT_SUCCESS_URL",
                    "https://your-domain.com/payment/success",
                ),
                fail_url: var_or("PAYMENT_FAIL_URL", "https://your-domain.com/payment/fail"),
                webhook_url: var_or(
                    "PAYMENT_WEBHOOK_URL",
                    "https://your-domain.com/api/webhook/payment",
                ),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parse_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
            notifications: NotificationConfig {
                webhook_url: optional("NOTIFICATION_WEBHOOK_URL"),
            },
        })
    }

    /// Конфигурация для тестов и локального запуска без внешних зависимостей.
    pub fn for_memory_store() -> Self {
        Config {
            app: AppConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                environment: "test".to_string(),
                rust_log: "booking_engine=debug".to_string(),
                log_format: LogFormat::Pretty,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Memory,
                url: None,
                pool_size: 1,
            },
            redis: RedisConfig {
                url: None,
                snapshot_ttl_seconds: 2,
            },
            booking: BookingConfig::default(),
            payment: PaymentConfig {
                merchant_id: "test-merchant".to_string(),
                merchant_password: "test-password".to_string(),
                gateway_url: "http://127.0.0.1:9".to_string(),
                success_url: "http://localhost/payment/success".to_string(),
                fail_url: "http://localhost/payment/fail".to_string(),
                webhook_url: "http://localhost/api/webhook/payment".to_string(),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
            },
            notifications: NotificationConfig { webhook_url: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_and_log_format_case_insensitively() {
        assert_eq!("Postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("mongo".parse::<StoreBackend>().is_err());
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
    }

    #[test]
    fn default_booking_rules_match_hold_policy() {
        let rules = BookingConfig::default();
        assert_eq!(rules.hold_window_delta(), chrono::Duration::minutes(10));
        assert_eq!(rules.max_seats_per_booking, 5);
        assert_eq!(rules.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn zero_sweep_interval_is_rejected_or_clamped() {
        // Имя переменной уникально для теста, чтобы не мешать параллельным тестам
        std::env::set_var("ZERO_SWEEP_INTERVAL_SECONDS", "0");
        assert!(matches!(
            positive_or("ZERO_SWEEP_INTERVAL_SECONDS", "300"),
            Err(ConfigError::Invalid { name: "ZERO_SWEEP_INTERVAL_SECONDS", .. })
        ));
        assert_eq!(positive_or("UNSET_SWEEP_INTERVAL_SECONDS", "300").unwrap(), 300);

        let rules = BookingConfig {
            sweep_interval_seconds: 0,
            ..BookingConfig::default()
        };
        assert_eq!(rules.sweep_interval(), Duration::from_secs(1));
    }
}
