//! Client-side contract for milestone push payloads.
//!
//! Models what the service worker does with a payload: render the system
//! notification, route clicks to a window, and handle messages posted by the
//! page, including a best-effort local scheduling fallback used when no
//! backend is reachable. Nothing scheduled here survives a restart.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use nerdy_common::types::PushData;

pub const DEFAULT_TITLE: &str = "Nerdy Birthdays";
pub const DEFAULT_BODY: &str = "A nerdy milestone is coming up!";
pub const DEFAULT_ICON: &str = "/icons/icon-192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72.png";
pub const DEFAULT_TAG: &str = "nerdy-milestone";
pub const RESULTS_PATH: &str = "/results.html";

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: PushData,
    pub actions: Vec<NotificationAction>,
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedNotification {
    pub title: String,
    pub options: NotificationOptions,
}

/// Payload as received; every field is optional on the wire.
#[derive(Debug, Default, Deserialize)]
struct IncomingPayload {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    badge: Option<String>,
    tag: Option<String>,
    #[serde(default)]
    data: PushData,
}

fn render(incoming: IncomingPayload) -> RenderedNotification {
    RenderedNotification {
        title: incoming.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        options: NotificationOptions {
            body: incoming.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: incoming.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            badge: incoming.badge.unwrap_or_else(|| DEFAULT_BADGE.to_string()),
            tag: incoming.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            data: incoming.data,
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: "View milestones".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
            require_interaction: false,
            vibrate: vec![100, 50, 100],
        },
    }
}

/// Turn raw push data into a notification.
///
/// JSON payloads are read field by field; anything that is not JSON becomes
/// the body of a default notification.
pub fn parse_push(data: Option<&[u8]>) -> RenderedNotification {
    let Some(bytes) = data.filter(|b| !b.is_empty()) else {
        return render(IncomingPayload::default());
    };

    match serde_json::from_slice::<IncomingPayload>(bytes) {
        Ok(incoming) => render(incoming),
        Err(_) => render(IncomingPayload {
            body: Some(String::from_utf8_lossy(bytes).into_owned()),
            ..IncomingPayload::default()
        }),
    }
}

/// A window controlled by the service worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
    pub id: String,
    pub url: String,
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Close the notification and do nothing else.
    Ignore,
    /// Focus an already open results window.
    Focus { window_id: String },
    /// Open a new window at this URL.
    Open { url: String },
}

/// URL a click should lead to, derived from the payload's deep-link data.
pub fn target_url(data: &PushData) -> String {
    match (&data.url, &data.family) {
        (Some(url), _) => url.clone(),
        (None, Some(_)) => RESULTS_PATH.to_string(),
        (None, None) => "/".to_string(),
    }
}

/// Path part of an absolute or root-relative URL, without query or fragment.
fn page_path(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Route a click. `action` is empty for a click on the notification body.
///
/// Only a window already showing the results page (or the page the deep link
/// names) is focused; anything else opens a new window.
pub fn route_click(action: &str, data: &PushData, windows: &[ClientWindow]) -> ClickOutcome {
    if action == ACTION_DISMISS {
        return ClickOutcome::Ignore;
    }

    let deep_link = data.url.as_deref().map(page_path);

    let shows_results = |window: &&ClientWindow| {
        let path = page_path(&window.url);
        path == RESULTS_PATH || deep_link.as_deref() == Some(path.as_str())
    };

    match windows.iter().find(shows_results) {
        Some(window) => ClickOutcome::Focus {
            window_id: window.id.clone(),
        },
        None => ClickOutcome::Open {
            url: target_url(data),
        },
    }
}

/// Messages a page may post to the service worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SkipWaiting,
    ScheduleNotification {
        title: String,
        body: String,
        icon: Option<String>,
        tag: Option<String>,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
        #[serde(default)]
        data: PushData,
    },
}

pub trait TimeProvider: Clone + Send + Sync + 'static {
    type Sleep<'a>: Future<Output = ()> + Send + 'a
    where
        Self: 'a;

    fn now(&self) -> DateTime<Utc>;
    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl TimeProvider for TokioTimeProvider {
    type Sleep<'a>
        = tokio::time::Sleep
    where
        Self: 'a;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        tokio::time::sleep(duration)
    }
}

/// Where rendered notifications end up (the OS notification tray).
pub trait NotificationSink: Clone + Send + Sync + 'static {
    fn show(&self, notification: RenderedNotification);
}

pub struct ScheduledHandle {
    pub tag: String,
    pub fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

impl ScheduledHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.handle.await
    }
}

/// Result of handling a `ClientMessage`.
pub enum MessageOutcome {
    /// Activate the waiting service worker immediately.
    SkipWaiting,
    Scheduled(ScheduledHandle),
}

/// In-memory fallback scheduler for notifications requested by the page.
#[derive(Debug, Clone)]
pub struct LocalScheduler<T, S> {
    time: T,
    sink: S,
}

impl<T, S> LocalScheduler<T, S>
where
    T: TimeProvider,
    S: NotificationSink,
{
    pub fn new(time: T, sink: S) -> Self {
        Self { time, sink }
    }

    pub fn handle_message(&self, message: ClientMessage) -> MessageOutcome {
        match message {
            ClientMessage::SkipWaiting => MessageOutcome::SkipWaiting,
            ClientMessage::ScheduleNotification {
                title,
                body,
                icon,
                tag,
                timestamp,
                data,
            } => {
                let notification = render(IncomingPayload {
                    title: Some(title),
                    body: Some(body),
                    icon,
                    badge: None,
                    tag,
                    data,
                });
                let fire_at = Utc
                    .timestamp_millis_opt(timestamp)
                    .single()
                    .unwrap_or_else(|| self.time.now());
                MessageOutcome::Scheduled(self.schedule(notification, fire_at))
            }
        }
    }

    pub fn schedule(&self, notification: RenderedNotification, fire_at: DateTime<Utc>) -> ScheduledHandle {
        let time = self.time.clone();
        let sink = self.sink.clone();
        let tag = notification.options.tag.clone();
        let notification = Arc::new(notification);

        let handle = tokio::spawn(async move {
            if let Some(delay) = compute_delay(&time, fire_at) {
                time.sleep(delay).await;
            }
            sink.show((*notification).clone());
        });

        ScheduledHandle {
            tag,
            fire_at,
            handle,
        }
    }
}

fn compute_delay<T: TimeProvider>(time: &T, at: DateTime<Utc>) -> Option<Duration> {
    (at - time.now()).to_std().ok().filter(|d| !d.is_zero())
}
