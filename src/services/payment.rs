//! payment.rs
//!
//! Сервисный слой для взаимодействия с внешним платёжным шлюзом.
//!
//! Ключевые компоненты:
//! 1.  **PaymentGateway**: интерфейс коллаборатора. Создаётся один раз при старте
//!     процесса и передаётся в сервис бронирования и обработчик вебхуков.
//! 2.  **CircuitBreaker**: паттерн "Автоматический выключатель", чтобы не долбить
//!     неработающий шлюз.
//! 3.  **HttpPaymentGateway**: HTTP-клиент шлюза; подписывает запросы SHA-256
//!     токеном и проверяет токены входящих уведомлений.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::models::BookingId;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,
    #[error("payment gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment gateway rejected the request: {message}")]
    Rejected { message: String },
    #[error("payment gateway response carried no payment reference")]
    MissingReference,
}

/// Everything the gateway needs to open a checkout session for one booking.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub booking_id: BookingId,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub payment_reference: String,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    New,
    Authorized,
    Confirmed,
    Cancelled,
    Failed,
    Expired,
    Refunded,
    #[serde(other)]
    Unknown,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::New => "NEW",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Asynchronous status notification pushed by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub token: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;

    /// Checks the notification's signature against the merchant secret.
    fn verify_notification(&self, notification: &PaymentNotification) -> bool;
}

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим работы, запросы разрешены.
    Closed,
    /// Запросы запрещены после серии сбоев.
    Open,
    /// После таймаута в Open разрешаем пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    /// Счетчик последовательных сбоев.
    failure_count: AtomicU32,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.timeout_seconds))
    }

    /// Проверяет, можно ли выполнить следующий запрос к сервису.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.timeout_duration {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    failures, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn failures(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

// --- Модели данных для API платёжного шлюза ---

#[derive(Debug, Serialize)]
struct PaymentInitRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    amount: i64,
    #[serde(rename = "orderId")]
    order_id: String,
    currency: String,
    description: String,
    #[serde(rename = "successURL")]
    success_url: String,
    #[serde(rename = "failURL")]
    fail_url: String,
    #[serde(rename = "notificationURL")]
    notification_url: String,
    #[serde(rename = "paymentExpiry")]
    payment_expiry: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct PaymentInitResponse {
    success: bool,
    #[serde(rename = "paymentId")]
    payment_id: Option<String>,
    #[serde(rename = "paymentURL")]
    payment_url: Option<String>,
    code: Option<i32>,
    message: Option<String>,
}

/// Клиент для взаимодействия с API платёжного шлюза.
pub struct HttpPaymentGateway {
    team_slug: String,
    password: String,
    base_url: String,
    notification_url: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn from_config(
        config: &PaymentConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            team_slug: config.merchant_id.clone(),
            password: config.merchant_password.clone(),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            notification_url: config.webhook_url.clone(),
            http_client,
            circuit_breaker: CircuitBreaker::from_config(breaker),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Токен запроса на инициацию платежа.
    fn init_token(&self, amount: i64, currency: &str, order_id: &str) -> String {
        sha256_hex(&format!(
            "{}{}{}{}{}",
            amount, currency, order_id, self.password, self.team_slug
        ))
    }

    /// Токен, которым шлюз подписывает уведомления.
    pub fn notification_token(&self, payment_id: &str, status: PaymentStatus) -> String {
        sha256_hex(&format!(
            "{}{}{}{}",
            payment_id,
            status.as_str(),
            self.password,
            self.team_slug
        ))
    }

    /// Пропускает запрос через Circuit Breaker.
    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!("Payment gateway request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                Err(GatewayError::Transport(e))
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let order_id = format!("booking-{}", request.booking_id);
        let body = PaymentInitRequest {
            team_slug: self.team_slug.clone(),
            token: self.init_token(request.amount, &request.currency, &order_id),
            amount: request.amount,
            order_id,
            currency: request.currency.clone(),
            description: request.description.clone(),
            success_url: request.success_url.clone(),
            fail_url: request.cancel_url.clone(),
            notification_url: self.notification_url.clone(),
            payment_expiry: request.expires_at.to_rfc3339(),
            language: "ru".to_string(),
        };

        info!(
            booking_id = %request.booking_id,
            amount = request.amount,
            currency = %request.currency,
            "Creating payment session"
        );

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/PaymentInit/init", self.base_url))
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<PaymentInitResponse>()
                .await
        };
        let response = self.execute_with_circuit_breaker(operation).await?;

        if !response.success {
            let message = response.message.unwrap_or_else(|| "Неизвестная ошибка".to_string());
            error!(code = ?response.code, "Платежный шлюз вернул ошибку: {}", message);
            return Err(GatewayError::Rejected { message });
        }

        let payment_reference = response.payment_id.ok_or(GatewayError::MissingReference)?;
        Ok(CheckoutSession {
            payment_reference,
            redirect_url: response.payment_url,
        })
    }

    fn verify_notification(&self, notification: &PaymentNotification) -> bool {
        let expected = self.notification_token(&notification.payment_id, notification.status);
        constant_time_eq::constant_time_eq(expected.as_bytes(), notification.token.as_bytes())
    }
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
