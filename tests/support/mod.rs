#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Notify};

use carwash_client::api::{ApiError, ApiResult, BookingApi};
use carwash_client::identity::CartProvider;
use carwash_client::model::{
    CartExtra, CartItem, ChatHistory, ChatMessage, Discount, MessageSender, PaymentReceipt,
    PaymentRequest, RequestId, TimeSlot, WireChatMessage,
};
use carwash_client::transport::{
    ChatTransport, ConnectRequest, Outbound, TransportError, TransportEvent, TransportLink,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Slots(i64),
    LockSlot(i64),
    ValidateDiscount(String, i64),
    MakePayment(PaymentRequest),
    ChatHistory(RequestId),
    Cart,
}

/// Scriptable booking backend.
pub struct FakeApi {
    pub calls: Mutex<Vec<Call>>,
    pub lock_ok: Mutex<bool>,
    pub slots: Mutex<Vec<TimeSlot>>,
    pub discount: Mutex<Option<Discount>>,
    pub payment: Mutex<Result<PaymentReceipt, String>>,
    pub history: Mutex<Result<Vec<WireChatMessage>, String>>,
    pub gate_history: bool,
    pub history_gate: Notify,
    pub gate_lock: bool,
    pub lock_gate: Notify,
    pub lock_started: Notify,
    pub gate_payment: bool,
    pub payment_gate: Notify,
    pub payment_started: Notify,
    pub cart_items: Mutex<Vec<CartItem>>,
    /// Number of upcoming cart fetches that fail.
    pub cart_failures: AtomicUsize,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            lock_ok: Mutex::new(true),
            slots: Mutex::new(Vec::new()),
            discount: Mutex::new(None),
            payment: Mutex::new(Ok(PaymentReceipt::default())),
            history: Mutex::new(Ok(Vec::new())),
            gate_history: false,
            history_gate: Notify::new(),
            gate_lock: false,
            lock_gate: Notify::new(),
            lock_started: Notify::new(),
            gate_payment: false,
            payment_gate: Notify::new(),
            payment_started: Notify::new(),
            cart_items: Mutex::new(Vec::new()),
            cart_failures: AtomicUsize::new(0),
        }
    }
}

impl FakeApi {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn payments(&self) -> Vec<PaymentRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::MakePayment(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BookingApi for FakeApi {
    async fn slots(&self, brand_id: i64) -> ApiResult<Vec<TimeSlot>> {
        self.record(Call::Slots(brand_id));
        Ok(self.slots.lock().unwrap().clone())
    }

    async fn lock_slot(&self, slot_id: i64) -> ApiResult<()> {
        self.record(Call::LockSlot(slot_id));
        if self.gate_lock {
            self.lock_started.notify_one();
            self.lock_gate.notified().await;
        }
        if *self.lock_ok.lock().unwrap() {
            Ok(())
        } else {
            Err(ApiError::Rejected("slot already reserved".into()))
        }
    }

    async fn validate_discount(&self, code: &str, brand_id: i64) -> ApiResult<Discount> {
        self.record(Call::ValidateDiscount(code.to_string(), brand_id));
        self.discount
            .lock()
            .unwrap()
            .ok_or_else(|| ApiError::Rejected("invalid code".into()))
    }

    async fn make_payment(&self, request: &PaymentRequest) -> ApiResult<PaymentReceipt> {
        self.record(Call::MakePayment(request.clone()));
        if self.gate_payment {
            self.payment_started.notify_one();
            self.payment_gate.notified().await;
        }
        self.payment
            .lock()
            .unwrap()
            .clone()
            .map_err(ApiError::Rejected)
    }

    async fn chat_history(&self, request_id: RequestId) -> ApiResult<ChatHistory> {
        self.record(Call::ChatHistory(request_id));
        if self.gate_history {
            self.history_gate.notified().await;
        }
        self.history
            .lock()
            .unwrap()
            .clone()
            .map(|messages| ChatHistory { messages })
            .map_err(ApiError::Rejected)
    }

    async fn cart(&self) -> ApiResult<Vec<CartItem>> {
        self.record(Call::Cart);
        let failing = self
            .cart_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ApiError::Rejected("cart unavailable".into()));
        }
        Ok(self.cart_items.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeCart {
    items: Mutex<HashMap<i64, CartItem>>,
    refreshes: AtomicUsize,
    pub gate_items: bool,
    pub item_gate: Notify,
    pub item_started: Notify,
}

impl FakeCart {
    pub fn with(items: impl IntoIterator<Item = CartItem>) -> Self {
        let cart = Self::default();
        {
            let mut map = cart.items.lock().unwrap();
            for item in items {
                map.insert(item.invoice_id, item);
            }
        }
        cart
    }

    pub fn gated(mut self) -> Self {
        self.gate_items = true;
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CartProvider for FakeCart {
    async fn item(&self, invoice_id: i64) -> Option<CartItem> {
        if self.gate_items {
            self.item_started.notify_one();
            self.item_gate.notified().await;
        }
        self.items.lock().unwrap().get(&invoice_id).cloned()
    }

    async fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn item(invoice_id: i64, brand_id: i64, price: f64, extras: &[f64]) -> CartItem {
    CartItem {
        invoice_id,
        brand_id,
        service_name: "Exterior wash".into(),
        item_price: price,
        extras: extras
            .iter()
            .map(|price| CartExtra {
                name: "extra".into(),
                item_extra_price: *price,
            })
            .collect(),
    }
}

pub fn slot(slot_id: i64) -> TimeSlot {
    TimeSlot {
        slot_id,
        date: "2026-10-20".into(),
        time_from: "10:00".into(),
        time_to: "10:30".into(),
        reserved: false,
    }
}

/// Test side of one established link.
pub struct LinkHandle {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub published: mpsc::UnboundedReceiver<String>,
}

/// Transport whose connects succeed or fail per script (default: succeed).
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<(), String>>>,
    links: Mutex<VecDeque<LinkHandle>>,
    attempts: AtomicUsize,
    requests: Mutex<Vec<ConnectRequest>>,
    pub link_ready: Notify,
}

impl FakeTransport {
    pub fn scripted(script: impl IntoIterator<Item = Result<(), String>>) -> Self {
        let transport = Self::default();
        transport.script.lock().unwrap().extend(script);
        transport
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn take_link(&self) -> Option<LinkHandle> {
        self.links.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if let Err(reason) = next {
            return Err(TransportError::Handshake(reason));
        }

        let (event_tx, events) = mpsc::unbounded_channel();
        let (out_tx, published) = mpsc::unbounded_channel();
        self.links.lock().unwrap().push_back(LinkHandle {
            events: event_tx,
            published,
        });
        self.link_ready.notify_one();
        Ok(TransportLink {
            events,
            outbound: Outbound::new(out_tx),
        })
    }
}

pub fn live(id: i64, sender: MessageSender, text: &str) -> TransportEvent {
    TransportEvent::Message(ChatMessage {
        message_id: Some(id),
        sender,
        text: text.to_string(),
        conversation_id: 12,
        created_at: Utc::now(),
    })
}

pub fn wire(id: i64, sender: MessageSender, text: &str) -> WireChatMessage {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "messageSender": sender,
        "content": text,
        "requestId": 12
    }))
    .unwrap()
}
