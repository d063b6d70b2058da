pub mod catalog;
pub mod notification;
pub mod payment;
pub mod reservation;
pub mod scheduler;
pub mod webhook;

pub use catalog::EventCatalog;
pub use notification::{HttpDispatcher, LogDispatcher, Notification, NotificationDispatcher};
pub use payment::{HttpPaymentGateway, PaymentGateway};
pub use reservation::SeatReservationService;
pub use scheduler::ExpiryScheduler;
pub use webhook::PaymentWebhookProcessor;
