//! Push delivery for milestone notifications.
//!
//! - `dispatcher`: encrypts, signs and sends one web-push message, classifying the response
//! - `retry`: bounded exponential backoff around a dispatcher
//! - `receiver`: the client-side contract the service worker implements for these payloads

pub mod dispatcher;
pub mod receiver;
pub mod retry;

pub use dispatcher::{DeliveryResult, DispatchError, PushDelivery, WebPushDispatcher};
pub use retry::{RetryPolicy, deliver_with_retry};
