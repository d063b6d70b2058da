use thiserror::Error;

use crate::models::{BookingStatus, SeatId};
use crate::services::payment::GatewayError;

/// Failure of the durable store. Operations that return it changed nothing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("event not found")]
    EventNotFound,
    #[error("seats unavailable: {}", seats.join(", "))]
    SeatsUnavailable { seats: Vec<SeatId> },
    #[error("too many seats requested: {requested} (max {max})")]
    TooManySeats { requested: usize, max: usize },
    #[error("invalid seat selection: {0}")]
    InvalidSeats(String),
    #[error("requester id must not be blank")]
    MissingRequester,
    #[error("payment session could not be created: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("booking not found")]
    BookingNotFound,
    #[error("booking is {status} and still holds its seats")]
    BookingActive { status: BookingStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("notification signature could not be verified")]
    InvalidSignature,
    #[error("malformed notification: {0}")]
    Malformed(String),
    #[error("unknown payment reference {0}")]
    UnknownPaymentReference(String),
    #[error("not ready for confirmation dispatch: {0}")]
    NotReady(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid event: {0}")]
    Invalid(String),
    #[error("event {0} could not be read back after creation")]
    NotReady(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
