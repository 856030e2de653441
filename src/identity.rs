use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::BookingApi;
use crate::model::CartItem;

/// Source of the bearer token used by every authenticated call.
pub trait AuthTokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Token fixed at construction time, optionally replaced on sign-in/sign-out.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn replace(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }
}

impl AuthTokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }
}

/// Read access to the consumer's cart lines.
#[async_trait]
pub trait CartProvider: Send + Sync {
    async fn item(&self, invoice_id: i64) -> Option<CartItem>;

    /// Re-fetch the cart after it changed server-side (e.g. a settled payment).
    async fn refresh(&self);
}

/// Cart provider backed by the booking REST API, cached between refreshes.
pub struct HttpCart {
    api: Arc<dyn BookingApi>,
    items: tokio::sync::RwLock<Option<Vec<CartItem>>>,
}

impl HttpCart {
    pub fn new(api: Arc<dyn BookingApi>) -> Self {
        Self {
            api,
            items: tokio::sync::RwLock::new(None),
        }
    }

    /// Fetches the cart and caches it. A failed fetch leaves the cache as it was.
    async fn load(&self) -> Option<Vec<CartItem>> {
        match self.api.cart().await {
            Ok(items) => {
                debug!(count = items.len(), "cart loaded");
                *self.items.write().await = Some(items.clone());
                Some(items)
            }
            Err(err) => {
                warn!(?err, "failed to load cart");
                None
            }
        }
    }
}

#[async_trait]
impl CartProvider for HttpCart {
    async fn item(&self, invoice_id: i64) -> Option<CartItem> {
        {
            let cached = self.items.read().await;
            if let Some(items) = cached.as_ref() {
                return items.iter().find(|i| i.invoice_id == invoice_id).cloned();
            }
        }

        self.load()
            .await?
            .into_iter()
            .find(|i| i.invoice_id == invoice_id)
    }

    async fn refresh(&self) {
        self.load().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_counts_as_signed_out() {
        assert_eq!(StaticToken::new(Some("  ".into())).token(), None);
        assert_eq!(StaticToken::new(None).token(), None);

        let provider = StaticToken::new(Some("abc".into()));
        assert_eq!(provider.token().as_deref(), Some("abc"));
        provider.replace(None);
        assert_eq!(provider.token(), None);
    }
}
