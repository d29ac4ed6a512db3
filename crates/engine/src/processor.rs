//! Scan pipeline.
//!
//! One tick:
//! 1. Takes the run lock (a busy lock skips the tick)
//! 2. Resolves the scan window from the stored watermark
//! 3. Scans for pending notifications
//! 4. Dispatches them per subscription on a bounded pool: claim, render,
//!    deliver with retry, then record, retire or release
//! 5. Stores the new watermark and releases the lock

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use nerdy_common::config::AppConfig;
use nerdy_common::error::AppError;
use nerdy_common::types::{FamilyEntry, PendingNotification, PushData, PushPayload};
use nerdy_milestones::MilestoneSource;
use nerdy_milestones::format::plural;
use nerdy_notifier::{DeliveryResult, PushDelivery, RetryPolicy, deliver_with_retry};

use crate::ledger::DedupLedger;
use crate::lock::RunLock;
use crate::scanner::{MilestoneScanner, ScanWindow};
use crate::subscription::SubscriptionStore;
use crate::watermark::{MILESTONE_SCAN, ScanWatermark};

/// Static parts of a rendered notification.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub icon: String,
    pub badge: String,
    pub results_path: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            icon: "/icons/icon-192.png".to_string(),
            badge: "/icons/badge-72.png".to_string(),
            results_path: "/results.html".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Scan cadence, also the reach of the very first window
    pub scan_interval: Duration,
    /// Furthest back a late tick may reach
    pub max_catchup: Duration,
    /// Subscriptions dispatched in parallel
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub render: RenderSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            scan_interval: Duration::from_std(config.scan_interval())?,
            max_catchup: Duration::from_std(config.scan_max_catchup())?,
            concurrency: config.dispatch_concurrency.max(1),
            retry: RetryPolicy::new(
                config.push_max_attempts,
                std::time::Duration::from_millis(config.push_initial_backoff_ms),
            ),
            render: RenderSettings {
                icon: config.app_icon_url.clone(),
                badge: config.app_badge_url.clone(),
                results_path: config.results_path.clone(),
            },
        })
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::minutes(5),
            max_catchup: Duration::hours(6),
            concurrency: 8,
            retry: RetryPolicy::default(),
            render: RenderSettings::default(),
        }
    }
}

/// Counts for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The run lock was held elsewhere and nothing was done
    pub skipped: bool,
    pub window: Option<ScanWindow>,
    /// Watermark stored at the end of the tick
    pub watermark: Option<DateTime<Utc>>,
    pub pending: usize,
    pub delivered: usize,
    /// Claims lost to another worker
    pub duplicates: usize,
    /// Dropped after exhausting the retry budget
    pub transient_drops: usize,
    pub retired_subscriptions: usize,
    /// Left unsent because their subscription was retired this tick
    pub abandoned: usize,
    /// Storage failures and crashed workers
    pub errors: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Result of working through one subscription's batch.
#[derive(Debug, Default)]
struct BatchOutcome {
    delivered: usize,
    duplicates: usize,
    transient_drops: usize,
    retired: bool,
    abandoned: usize,
    errors: usize,
    /// Earliest fire time that must be retried by a later tick
    retry_from: Option<DateTime<Utc>>,
}

impl BatchOutcome {
    fn hold_back(&mut self, fire_at: DateTime<Utc>) {
        self.retry_from = Some(self.retry_from.map_or(fire_at, |at| at.min(fire_at)));
    }
}

impl TickReport {
    fn absorb(&mut self, outcome: BatchOutcome) {
        self.delivered += outcome.delivered;
        self.duplicates += outcome.duplicates;
        self.transient_drops += outcome.transient_drops;
        self.retired_subscriptions += usize::from(outcome.retired);
        self.abandoned += outcome.abandoned;
        self.errors += outcome.errors;
    }
}

/// Human-readable offset for a lead time in minutes.
pub fn relative_lead(lead_minutes: u32) -> String {
    let lead = u64::from(lead_minutes);
    if lead == 0 {
        "happening now".to_string()
    } else if lead % 1440 == 0 {
        format!("in {}", plural(lead / 1440, "day", "days"))
    } else if lead % 60 == 0 {
        format!("in {}", plural(lead / 60, "hour", "hours"))
    } else {
        format!("in {}", plural(lead, "minute", "minutes"))
    }
}

/// Render the push payload for a pending notification.
pub fn render_payload(pending: &PendingNotification, settings: &RenderSettings) -> PushPayload {
    let name = &pending.person_name;
    let label = &pending.milestone.label;

    let (title, body) = if pending.lead_minutes == 0 {
        (
            format!("{name} is {label}!"),
            format!("{name} is {label}, happening now."),
        )
    } else {
        (
            format!("{name} will be {label}"),
            format!("{name} will be {label} {}.", relative_lead(pending.lead_minutes)),
        )
    };

    PushPayload {
        title,
        body,
        icon: settings.icon.clone(),
        badge: settings.badge.clone(),
        tag: format!("milestone:{}", pending.dedup_key()),
        data: PushData {
            url: Some(format!("{}?member={}", settings.results_path, pending.member_id)),
            family: Some(vec![FamilyEntry {
                name: name.clone(),
                birth: pending.birth.to_string(),
            }]),
        },
    }
}

pub struct ScanPipeline<M, D> {
    pool: SqlitePool,
    scanner: MilestoneScanner<M>,
    dispatcher: Arc<D>,
    lock: RunLock,
    settings: Arc<PipelineSettings>,
}

impl<M, D> ScanPipeline<M, D>
where
    M: MilestoneSource,
    D: PushDelivery,
{
    pub fn new(
        pool: SqlitePool,
        source: M,
        dispatcher: D,
        lock: RunLock,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            scanner: MilestoneScanner::new(source),
            dispatcher: Arc::new(dispatcher),
            lock,
            settings: Arc::new(settings),
        }
    }

    /// Run one scan tick as of `now`.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> anyhow::Result<TickReport> {
        let Some(lease) = self.lock.try_acquire().await? else {
            tracing::info!("Previous scan still running, skipping tick");
            return Ok(TickReport::skipped());
        };

        let result = self.run_locked(now).await;

        if let Err(e) = lease.release().await {
            tracing::warn!(error = %e, "Failed to release run lock");
        }

        result
    }

    async fn run_locked(&self, now: DateTime<Utc>) -> anyhow::Result<TickReport> {
        let watermark = ScanWatermark::load(&self.pool, MILESTONE_SCAN).await?;
        let window = ScanWindow::resolve(
            watermark,
            now,
            self.settings.scan_interval,
            self.settings.max_catchup,
        );

        let scan = self.scanner.scan(&self.pool, &window).await?;
        let mut report = TickReport {
            window: Some(window),
            pending: scan.pending.len(),
            ..TickReport::default()
        };

        // Lowest watermark that still re-covers unfinished work. A subscription
        // that failed to scan is retried from the window start.
        let mut held = (scan.failed_subscriptions > 0).then_some(window.start);
        report.errors += scan.failed_subscriptions;

        let mut batches: BTreeMap<String, Vec<PendingNotification>> = BTreeMap::new();
        for pending in scan.pending {
            batches
                .entry(pending.subscription_id.clone())
                .or_default()
                .push(pending);
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (subscription_id, batch) in batches {
            let permit = semaphore.clone().acquire_owned().await?;
            let pool = self.pool.clone();
            let dispatcher = self.dispatcher.clone();
            let settings = self.settings.clone();

            tasks.spawn(async move {
                let _permit = permit;
                process_batch(&pool, dispatcher.as_ref(), &settings, &subscription_id, batch).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    // The window excludes its start, so step back just before the fire time.
                    if let Some(at) = outcome.retry_from {
                        let mark = at - Duration::seconds(1);
                        held = Some(held.map_or(mark, |h| h.min(mark)));
                    }
                    report.absorb(outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch worker crashed");
                    report.errors += 1;
                    held = Some(held.map_or(window.start, |h| h.min(window.start)));
                }
            }
        }

        let next = held.map_or(window.end, |h| h.min(window.end));
        ScanWatermark::store(&self.pool, MILESTONE_SCAN, next).await?;
        report.watermark = Some(next);

        tracing::info!(
            window_start = %window.start,
            window_end = %window.end,
            pending = report.pending,
            delivered = report.delivered,
            duplicates = report.duplicates,
            transient_drops = report.transient_drops,
            retired = report.retired_subscriptions,
            errors = report.errors,
            "Scan tick complete"
        );

        Ok(report)
    }
}

/// Work through one subscription's notifications in order.
async fn process_batch<D: PushDelivery>(
    pool: &SqlitePool,
    dispatcher: &D,
    settings: &PipelineSettings,
    subscription_id: &str,
    batch: Vec<PendingNotification>,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    let subscription = match SubscriptionStore::get(pool, subscription_id).await {
        Ok(sub) => sub,
        Err(AppError::NotFound(_)) => {
            tracing::debug!(subscription_id, "Subscription removed before dispatch");
            return outcome;
        }
        Err(e) => {
            tracing::error!(subscription_id, error = %e, "Failed to load subscription");
            outcome.errors += 1;
            if let Some(first) = batch.first() {
                outcome.hold_back(first.fire_at());
            }
            return outcome;
        }
    };

    let total = batch.len();
    for (index, pending) in batch.into_iter().enumerate() {
        let key = pending.dedup_key();

        match DedupLedger::try_claim(pool, &key, &pending.milestone.label).await {
            Ok(true) => {}
            Ok(false) => {
                outcome.duplicates += 1;
                continue;
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to claim notification");
                outcome.errors += 1;
                outcome.hold_back(pending.fire_at());
                continue;
            }
        }

        let payload = render_payload(&pending, &settings.render);
        let attempted = deliver_with_retry(dispatcher, &subscription, &payload, &settings.retry).await;

        match attempted.result {
            DeliveryResult::Delivered => {
                outcome.delivered += 1;
                tracing::info!(
                    key = %key,
                    milestone = %pending.milestone.label,
                    attempts = attempted.attempts,
                    "Notification delivered"
                );
                if let Err(e) = DedupLedger::record(pool, &key, &payload.title, &payload.body, Utc::now()).await {
                    tracing::error!(key = %key, error = %e, "Failed to record delivered notification");
                    outcome.errors += 1;
                }
            }
            DeliveryResult::PermanentlyFailed { status, reason } => {
                tracing::warn!(
                    subscription_id,
                    status = ?status,
                    reason = %reason,
                    "Push endpoint permanently failed, retiring subscription"
                );
                if let Err(e) = SubscriptionStore::delete(pool, subscription_id).await {
                    tracing::error!(subscription_id, error = %e, "Failed to retire subscription");
                    outcome.errors += 1;
                }
                outcome.retired = true;
                outcome.abandoned = total - index - 1;
                break;
            }
            DeliveryResult::TransientFailure { status, reason } => {
                tracing::warn!(
                    key = %key,
                    status = ?status,
                    reason = %reason,
                    attempts = attempted.attempts,
                    "Delivery failed after retries, dropping for this tick"
                );
                outcome.transient_drops += 1;
                outcome.hold_back(pending.fire_at());
                if let Err(e) = DedupLedger::release(pool, &key).await {
                    tracing::error!(key = %key, error = %e, "Failed to release claim");
                    outcome.errors += 1;
                }
            }
        }
    }

    outcome
}
