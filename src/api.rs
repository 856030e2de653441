use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::identity::AuthTokenProvider;
use crate::model::{
    CartItem, ChatHistory, Discount, Envelope, PaymentReceipt, PaymentRequest, RequestId,
    TimeSlot,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// REST boundary consumed by the checkout coordinator and the chat history bootstrap.
#[async_trait]
pub trait BookingApi: Send + Sync {
    async fn slots(&self, brand_id: i64) -> ApiResult<Vec<TimeSlot>>;
    async fn lock_slot(&self, slot_id: i64) -> ApiResult<()>;
    async fn validate_discount(&self, code: &str, brand_id: i64) -> ApiResult<Discount>;
    async fn make_payment(&self, request: &PaymentRequest) -> ApiResult<PaymentReceipt>;
    async fn chat_history(&self, request_id: RequestId) -> ApiResult<ChatHistory>;
    async fn cart(&self) -> ApiResult<Vec<CartItem>>;
}

pub struct HttpApi {
    client: Client,
    base: Url,
    auth: Arc<dyn AuthTokenProvider>,
}

impl HttpApi {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        auth: Arc<dyn AuthTokenProvider>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base = Url::parse(base_url)?;
        Ok(Self { client, base, auth })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> ApiResult<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| ApiError::Decode(format!("invalid endpoint {path}: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorized(&self, method: Method, url: Url) -> ApiResult<RequestBuilder> {
        let token = self.auth.token().ok_or(ApiError::Unauthenticated)?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn call<T>(&self, request: RequestBuilder, what: &str) -> ApiResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthenticated);
        }

        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body).map_err(|err| {
            ApiError::Decode(format!("{what} returned {status} with unreadable body: {err}"))
        })?;

        if !status.is_success() || !envelope.success {
            let reason = envelope
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("{what} failed with status {status}"));
            return Err(ApiError::Rejected(reason));
        }

        debug!(%status, what, "booking api call succeeded");
        Ok(envelope.content)
    }
}

#[async_trait]
impl BookingApi for HttpApi {
    async fn slots(&self, brand_id: i64) -> ApiResult<Vec<TimeSlot>> {
        let url = self.endpoint("consumer/getSlot", &[("brandId", brand_id.to_string())])?;
        let request = self.authorized(Method::GET, url)?;
        Ok(self.call(request, "getSlot").await?.unwrap_or_default())
    }

    async fn lock_slot(&self, slot_id: i64) -> ApiResult<()> {
        let url = self.endpoint("consumer/lockSlot", &[("slotId", slot_id.to_string())])?;
        let request = self.authorized(Method::PUT, url)?;
        self.call::<Value>(request, "lockSlot").await?;
        Ok(())
    }

    async fn validate_discount(&self, code: &str, brand_id: i64) -> ApiResult<Discount> {
        let url = self.endpoint(
            "consumer/validateDiscount",
            &[
                ("discountCode", code.to_string()),
                ("brandId", brand_id.to_string()),
            ],
        )?;
        let request = self.authorized(Method::GET, url)?;
        self.call(request, "validateDiscount")
            .await?
            .ok_or_else(|| ApiError::Decode("validateDiscount returned no content".into()))
    }

    async fn make_payment(&self, payment: &PaymentRequest) -> ApiResult<PaymentReceipt> {
        let url = self.endpoint("payment/consumer/card/makePayment", &[])?;
        let request = self.authorized(Method::POST, url)?.json(payment);
        Ok(self.call(request, "makePayment").await?.unwrap_or_default())
    }

    async fn chat_history(&self, request_id: RequestId) -> ApiResult<ChatHistory> {
        let url = self.endpoint("chat/", &[("requestID", request_id.to_string())])?;
        let request = self.authorized(Method::GET, url)?;
        Ok(self.call(request, "chat history").await?.unwrap_or_default())
    }

    async fn cart(&self) -> ApiResult<Vec<CartItem>> {
        let url = self.endpoint("consumer/getCart", &[])?;
        let request = self.authorized(Method::GET, url)?;
        Ok(self.call(request, "getCart").await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticToken;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(
            base,
            Duration::from_secs(1),
            Arc::new(StaticToken::new(Some("t".into()))),
        )
        .unwrap()
    }

    #[test]
    fn endpoints_keep_base_path_and_encode_query() {
        let api = api("https://api.example.com/v1/");
        let url = api
            .endpoint(
                "consumer/validateDiscount",
                &[("discountCode", "SAVE 10".into()), ("brandId", "4".into())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/consumer/validateDiscount?discountCode=SAVE+10&brandId=4"
        );

        let url = api.endpoint("chat/", &[("requestID", "12".into())]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/chat/?requestID=12");
    }

    #[test]
    fn missing_token_is_reported_before_any_request() {
        let api = HttpApi::new(
            "https://api.example.com/",
            Duration::from_secs(1),
            Arc::new(StaticToken::new(None)),
        )
        .unwrap();
        let url = api.endpoint("consumer/lockSlot", &[]).unwrap();
        assert!(matches!(
            api.authorized(Method::PUT, url),
            Err(ApiError::Unauthenticated)
        ));
    }
}
