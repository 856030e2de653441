pub mod api;
pub mod app;
pub mod chat;
pub mod checkout;
pub mod identity;
pub mod message_log;
pub mod model;
pub mod pricing;
pub mod settings;
pub mod stomp;
pub mod storage;
pub mod transport;

pub use chat::{ChatError, ChatOptions, ChatSession, ChatView};
pub use checkout::{CheckoutCoordinator, CheckoutError, CheckoutView, PaymentOutcome};
pub use settings::Settings;
