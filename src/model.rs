use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Booking request id; also the id of the chat conversation scoped to it.
pub type RequestId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSender {
    Consumer,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: Option<i64>,
    pub sender: MessageSender,
    pub text: String,
    pub conversation_id: RequestId,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Locally authored message that has not been confirmed by the server yet.
    pub fn optimistic(conversation_id: RequestId, text: impl Into<String>) -> Self {
        Self {
            message_id: None,
            sender: MessageSender::Consumer,
            text: text.into(),
            conversation_id,
            created_at: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.message_id.is_some()
    }
}

/// Message shape shared by the history endpoint and live topic frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChatMessage {
    #[serde(default, alias = "messageId")]
    pub id: Option<i64>,
    pub message_sender: MessageSender,
    pub content: String,
    #[serde(default, alias = "requestID")]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireChatMessage {
    pub fn into_message(self, fallback_conversation: RequestId) -> ChatMessage {
        ChatMessage {
            message_id: self.id,
            sender: self.message_sender,
            text: self.content,
            conversation_id: self.request_id.unwrap_or(fallback_conversation),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub messages: Vec<WireChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    #[serde(alias = "id")]
    pub slot_id: i64,
    pub date: String,
    pub time_from: String,
    pub time_to: String,
    #[serde(default, deserialize_with = "flag")]
    pub reserved: bool,
}

/// The slot API reports `reserved` either as a JSON boolean or as 0/1.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    #[serde(default)]
    pub discount_amount: f64,
    #[serde(default)]
    pub discount_type: Option<DiscountType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartExtra {
    #[serde(default)]
    pub name: String,
    pub item_extra_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub invoice_id: i64,
    pub brand_id: i64,
    #[serde(default)]
    pub service_name: String,
    pub item_price: f64,
    #[serde(default)]
    pub extras: Vec<CartExtra>,
}

/// Client-side checkout context for one cart line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CartSelection {
    pub selected_invoice_id: Option<i64>,
    pub selected_slot_id: Option<i64>,
    pub slot_details: Option<TimeSlot>,
    pub is_slot_locked: bool,
    pub selected_address_id: Option<i64>,
    pub selected_car_id: Option<i64>,
    pub selection_confirmed: bool,
    pub discount_code: String,
    pub discount_amount: f64,
    pub discount_type: Option<DiscountType>,
    /// Code the applied amount/type were validated for.
    pub applied_discount_code: Option<String>,
}

impl CartSelection {
    pub fn for_item(invoice_id: i64) -> Self {
        Self {
            selected_invoice_id: Some(invoice_id),
            ..Self::default()
        }
    }

    pub fn discount(&self) -> Discount {
        Discount {
            discount_amount: self.discount_amount,
            discount_type: self.discount_type,
        }
    }

    pub fn ready_for_payment(&self) -> bool {
        self.selected_invoice_id.is_some()
            && self.selected_slot_id.is_some()
            && self.selected_address_id.is_some()
            && self.selected_car_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment_method_id: String,
    pub invoice_id: i64,
    pub slot_id: i64,
    pub discount_code: Option<String>,
    pub user_address: i64,
    pub user_car: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaymentReceipt {
    #[serde(default, alias = "redirectUrl")]
    pub redirect_url: Option<String>,
}

/// Response wrapper used by every REST endpoint of the booking backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub content: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}
