use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use thiserror::Error;

use nerdy_common::config::VapidConfig;
use nerdy_common::types::{PushPayload, Subscription};

/// Failures that prevent a dispatcher from being built at all.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid VAPID private key: {0}")]
    Vapid(web_push::WebPushError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The push service accepted the message (2xx).
    Delivered,
    /// The endpoint is gone (404/410) or can never be encrypted to; the
    /// subscription must be retired.
    PermanentlyFailed { status: Option<u16>, reason: String },
    /// Any other failure, including timeouts; may be retried.
    TransientFailure { status: Option<u16>, reason: String },
}

impl DeliveryResult {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryResult::TransientFailure { .. })
    }

    fn transient(reason: impl Into<String>) -> Self {
        DeliveryResult::TransientFailure {
            status: None,
            reason: reason.into(),
        }
    }

    fn permanent(reason: impl Into<String>) -> Self {
        DeliveryResult::PermanentlyFailed {
            status: None,
            reason: reason.into(),
        }
    }
}

/// Classify a push service HTTP status.
pub fn classify_status(status: u16) -> DeliveryResult {
    match status {
        200..=299 => DeliveryResult::Delivered,
        404 | 410 => DeliveryResult::PermanentlyFailed {
            status: Some(status),
            reason: "endpoint gone".to_string(),
        },
        _ => DeliveryResult::TransientFailure {
            status: Some(status),
            reason: format!("push service responded {status}"),
        },
    }
}

/// Anything that can deliver a payload to a subscription.
pub trait PushDelivery: Send + Sync + 'static {
    type Fut<'a>: Future<Output = DeliveryResult> + Send + 'a
    where
        Self: 'a;

    fn deliver<'a>(&'a self, subscription: &'a Subscription, payload: &'a PushPayload) -> Self::Fut<'a>;
}

/// Web-push delivery: `aes128gcm` payload encryption and VAPID signing via
/// the `web-push` crate, transport via `reqwest`.
#[derive(Clone)]
pub struct WebPushDispatcher {
    client: reqwest::Client,
    vapid: VapidConfig,
    ttl: u32,
}

impl WebPushDispatcher {
    /// Build a dispatcher. Fails if the VAPID private key cannot be decoded.
    pub fn new(vapid: VapidConfig, timeout: Duration, ttl: u32) -> Result<Self, DispatchError> {
        web_push::VapidSignatureBuilder::from_base64_no_sub(
            &vapid.private_key,
            web_push::URL_SAFE_NO_PAD,
        )
        .map_err(DispatchError::Vapid)?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, vapid, ttl })
    }

    /// Encrypt and sign `body` for one subscription.
    fn build_message(
        &self,
        subscription: &Subscription,
        body: &[u8],
    ) -> Result<web_push::WebPushMessage, DeliveryResult> {
        let info = web_push::SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.keys.p256dh.clone(),
            subscription.keys.auth.clone(),
        );

        let mut builder = web_push::WebPushMessageBuilder::new(&info)
            .map_err(|e| DeliveryResult::permanent(format!("invalid endpoint: {e}")))?;
        builder.set_ttl(self.ttl);
        builder.set_payload(web_push::ContentEncoding::Aes128Gcm, body);

        let mut signature = web_push::VapidSignatureBuilder::from_base64(
            &self.vapid.private_key,
            web_push::URL_SAFE_NO_PAD,
            &info,
        )
        .map_err(|e| DeliveryResult::transient(format!("VAPID signing failed: {e}")))?;
        signature.add_claim("sub", self.vapid.subject.as_str());
        let signature = signature
            .build()
            .map_err(|e| DeliveryResult::transient(format!("VAPID signing failed: {e}")))?;
        builder.set_vapid_signature(signature);

        // Only the subscriber's key material can make encryption fail here.
        builder
            .build()
            .map_err(|e| DeliveryResult::permanent(format!("invalid subscription keys: {e}")))
    }

    async fn send(&self, subscription: &Subscription, payload: &PushPayload) -> DeliveryResult {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => return DeliveryResult::transient(format!("payload encoding failed: {e}")),
        };

        let message = match self.build_message(subscription, &body) {
            Ok(message) => message,
            Err(result) => return result,
        };

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(encrypted) = message.payload {
            request = request
                .header(CONTENT_ENCODING, "aes128gcm")
                .header(CONTENT_TYPE, "application/octet-stream");
            for (name, value) in encrypted.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(encrypted.content);
        }

        match request.send().await {
            Ok(response) => classify_status(response.status().as_u16()),
            Err(e) if e.is_timeout() => DeliveryResult::transient("request timed out"),
            Err(e) => DeliveryResult::transient(format!("request failed: {e}")),
        }
    }
}

impl PushDelivery for WebPushDispatcher {
    type Fut<'a>
        = Pin<Box<dyn Future<Output = DeliveryResult> + Send + 'a>>
    where
        Self: 'a;

    fn deliver<'a>(&'a self, subscription: &'a Subscription, payload: &'a PushPayload) -> Self::Fut<'a> {
        Box::pin(async move {
            let result = self.send(subscription, payload).await;
            tracing::debug!(
                subscription_id = %subscription.id,
                tag = %payload.tag,
                result = ?result,
                "Push delivery attempted"
            );
            result
        })
    }
}
