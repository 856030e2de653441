use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::api::{BookingApi, HttpApi};
use crate::chat::{ChatOptions, ChatSession, ChatView};
use crate::message_log::LocalKey;
use crate::checkout::{CheckoutCoordinator, PaymentOutcome};
use crate::identity::{AuthTokenProvider, CartProvider, HttpCart, StaticToken};
use crate::model::{ConnectionState, MessageSender, RequestId};
use crate::settings::Settings;
use crate::storage::FileStore;
use crate::transport::StompTransport;

/// Everything the command-line front end needs to drive a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutPlan {
    pub invoice_id: i64,
    pub slot_id: i64,
    pub address_id: i64,
    pub car_id: i64,
    pub discount_code: Option<String>,
    pub payment_method_id: String,
}

pub struct App {
    settings: Settings,
    auth: Arc<dyn AuthTokenProvider>,
    api: Arc<dyn BookingApi>,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        info!("initializing client components");
        let auth: Arc<dyn AuthTokenProvider> =
            Arc::new(StaticToken::new(settings.auth_token.clone()));
        let api: Arc<dyn BookingApi> = Arc::new(
            HttpApi::new(
                &settings.api_base_url,
                settings.request_timeout(),
                Arc::clone(&auth),
            )
            .context("failed to build booking api client")?,
        );
        Ok(Self { settings, auth, api })
    }

    pub fn chat_session(&self) -> Result<ChatSession> {
        let transport = StompTransport::new(&self.settings.ws_url)
            .context("invalid chat websocket url")?;
        Ok(ChatSession::new(
            Arc::clone(&self.api),
            Arc::new(transport),
            Arc::clone(&self.auth),
            ChatOptions::from(&self.settings),
        ))
    }

    pub fn checkout(&self) -> Result<CheckoutCoordinator> {
        let store = FileStore::open(self.settings.selection_file())?;
        let cart: Arc<dyn CartProvider> = Arc::new(HttpCart::new(Arc::clone(&self.api)));
        Ok(CheckoutCoordinator::restore(
            Arc::clone(&self.api),
            cart,
            Arc::clone(&self.auth),
            Arc::new(store),
        ))
    }

    /// Interactive console: stdin lines are sent, the conversation is echoed to stdout.
    pub async fn run_chat(&self, request_id: RequestId) -> Result<()> {
        let session = self.chat_session()?;
        let mut updates = session.subscribe();
        session
            .open(Some(request_id))
            .map_err(|err| anyhow!("could not open chat: {err}"))?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut feed = ConsoleFeed::default();
        let mut last_status = ConnectionState::Disconnected;

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = updates.borrow_and_update().clone();
                    if view.status != last_status {
                        println!("-- {:?}", view.status);
                        last_status = view.status;
                    }
                    for line in feed.fresh_lines(&view) {
                        println!("{line}");
                    }
                }
                line = lines.next_line() => {
                    match line.context("failed to read stdin")? {
                        Some(text) if text.trim().is_empty() => continue,
                        Some(text) => {
                            if let Err(err) = session.send(&text) {
                                warn!(%err, "message not sent");
                                println!("!! {err}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        session.close();
        Ok(())
    }

    pub async fn list_slots(&self, brand_id: i64) -> Result<()> {
        let slots = self
            .api
            .slots(brand_id)
            .await
            .context("failed to fetch slots")?;
        if slots.is_empty() {
            println!("No slots available.");
        }
        for slot in slots {
            let marker = if slot.reserved { "taken" } else { "free" };
            println!(
                "{} - {} {}-{} ({marker})",
                slot.slot_id, slot.date, slot.time_from, slot.time_to
            );
        }
        Ok(())
    }

    pub async fn run_checkout(&self, plan: CheckoutPlan) -> Result<PaymentOutcome> {
        let checkout = self.checkout()?;

        if checkout.selection().selected_invoice_id != Some(plan.invoice_id) {
            checkout.select_item(plan.invoice_id);
        }
        if checkout.selection().selected_slot_id != Some(plan.slot_id)
            && !checkout.select_time_slot(plan.slot_id).await
        {
            return Err(anyhow!(notice_or(&checkout, "slot could not be locked")));
        }
        checkout.select_address_and_car(plan.address_id, plan.car_id);

        if let Some(code) = plan.discount_code.as_deref() {
            checkout.set_discount_code(code);
            checkout
                .apply_discount()
                .await
                .map_err(|err| anyhow!("{err}"))?;
        }
        if let Some(pricing) = checkout.pricing().await {
            println!(
                "Subtotal {:.2}, discount {:.2}, total {:.2}",
                pricing.subtotal, pricing.discount_value, pricing.total
            );
        }

        checkout
            .process_payment(&plan.payment_method_id)
            .await
            .map_err(|err| anyhow!("{err}"))
    }
}

fn notice_or(checkout: &CheckoutCoordinator, fallback: &str) -> String {
    checkout
        .notice()
        .map(|notice| notice.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Tracks what the chat console already showed.
#[derive(Debug, Default)]
struct ConsoleFeed {
    last_key: Option<LocalKey>,
    last_error: Option<String>,
}

impl ConsoleFeed {
    fn fresh_lines(&mut self, view: &ChatView) -> Vec<String> {
        let mut lines = Vec::new();
        for entry in view.log.entries() {
            if self.last_key.is_some_and(|last| entry.key <= last) {
                continue;
            }
            let message = &entry.message;
            let who = match message.sender {
                MessageSender::Consumer => "you",
                MessageSender::Provider => "provider",
            };
            let tick = if entry.pending { " …" } else { "" };
            lines.push(format!(
                "[{}] {who}: {}{tick}",
                message.created_at.format("%H:%M"),
                message.text
            ));
            self.last_key = Some(entry.key);
        }

        if view.error != self.last_error {
            if let Some(error) = &view.error {
                warn!(%error, "chat error");
            }
            self.last_error = view.error.clone();
        }
        lines
    }
}
