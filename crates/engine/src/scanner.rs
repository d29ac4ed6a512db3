//! Milestone scanner: turns stored birthdays into pending notifications.
//!
//! The scanner is read-only. It consults the milestone source for every
//! family member of every active subscription and keeps each (milestone,
//! lead time) pair whose fire time `milestone.at - lead` falls inside the
//! scan window and whose dedup key is not yet in the ledger.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use nerdy_common::error::AppError;
use nerdy_common::types::{FamilyMember, PendingNotification, Subscription};
use nerdy_milestones::MilestoneSource;

use crate::family::FamilyMemberStore;
use crate::ledger::DedupLedger;
use crate::subscription::SubscriptionStore;

/// Half-open time range `(start, end]` of fire times handled by one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScanWindow {
    /// Window for a scan at `now`.
    ///
    /// Starts at the watermark (or one interval back on the first run), but
    /// never further back than `max_catchup`.
    pub fn resolve(
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        interval: Duration,
        max_catchup: Duration,
    ) -> Self {
        let start = watermark
            .unwrap_or(now - interval)
            .max(now - max_catchup)
            .min(now);
        Self { start, end: now }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Pending notifications of one scan.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Sorted by fire time
    pub pending: Vec<PendingNotification>,
    /// Subscriptions that could not be scanned because of storage errors
    pub failed_subscriptions: usize,
}

/// Candidates for one subscription, before the ledger is consulted.
///
/// The source is asked once per member for everything between the window
/// start and the window end plus the largest lead time; each milestone is
/// then matched against every lead time.
pub fn candidates<M: MilestoneSource + ?Sized>(
    source: &M,
    subscription: &Subscription,
    members: &[FamilyMember],
    window: &ScanWindow,
) -> Vec<PendingNotification> {
    if window.is_empty() {
        return Vec::new();
    }

    let max_lead = Duration::minutes(i64::from(subscription.notification_times.max_minutes()));
    let horizon = (window.end - window.start) + max_lead;

    let mut found = Vec::new();
    for member in members {
        let milestones = source.due_milestones(member.birth.as_utc(), window.start, horizon);
        for milestone in milestones {
            for &lead in subscription.notification_times.minutes() {
                let fire_at = milestone.at - Duration::minutes(i64::from(lead));
                if window.contains(fire_at) {
                    found.push(PendingNotification {
                        subscription_id: subscription.id.clone(),
                        member_id: member.id,
                        person_name: member.name.clone(),
                        birth: member.birth,
                        milestone: milestone.clone(),
                        lead_minutes: lead,
                    });
                }
            }
        }
    }
    found
}

pub struct MilestoneScanner<M> {
    source: M,
}

impl<M: MilestoneSource> MilestoneScanner<M> {
    pub fn new(source: M) -> Self {
        Self { source }
    }

    /// Everything due in `window` that has not been claimed yet.
    ///
    /// A storage error while scanning one subscription is logged and counted;
    /// the other subscriptions are still scanned.
    pub async fn scan(&self, pool: &SqlitePool, window: &ScanWindow) -> Result<ScanResult, AppError> {
        let mut result = ScanResult::default();
        if window.is_empty() {
            return Ok(result);
        }

        let subscriptions = SubscriptionStore::list_active(pool).await?;

        for subscription in &subscriptions {
            match self.scan_subscription(pool, subscription, window).await {
                Ok(pending) => result.pending.extend(pending),
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to scan subscription"
                    );
                    result.failed_subscriptions += 1;
                }
            }
        }

        result.pending.sort_by(|a, b| {
            a.fire_at()
                .cmp(&b.fire_at())
                .then_with(|| a.dedup_key().cmp(&b.dedup_key()))
        });

        tracing::debug!(
            window_start = %window.start,
            window_end = %window.end,
            subscriptions = subscriptions.len(),
            pending = result.pending.len(),
            "Scan complete"
        );

        Ok(result)
    }

    async fn scan_subscription(
        &self,
        pool: &SqlitePool,
        subscription: &Subscription,
        window: &ScanWindow,
    ) -> Result<Vec<PendingNotification>, AppError> {
        let members = FamilyMemberStore::list_for(pool, &subscription.id).await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let mut pending = Vec::new();
        for candidate in candidates(&self.source, subscription, &members, window) {
            if DedupLedger::exists(pool, &candidate.dedup_key()).await? {
                tracing::debug!(key = %candidate.dedup_key(), "Already in ledger");
                continue;
            }
            pending.push(candidate);
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nerdy_common::types::{BirthInstant, Milestone, MilestoneKind, NotificationTimes, PushKeys};

    /// Reports the same milestones for everyone.
    struct Fixed(Vec<DateTime<Utc>>);

    impl MilestoneSource for Fixed {
        fn due_milestones(
            &self,
            _birth: DateTime<Utc>,
            as_of: DateTime<Utc>,
            horizon: Duration,
        ) -> Vec<Milestone> {
            self.0
                .iter()
                .filter(|at| **at > as_of && **at <= as_of + horizon)
                .map(|at| Milestone {
                    kind: MilestoneKind::Days,
                    label: "10,000 days old".to_string(),
                    at: *at,
                })
                .collect()
        }
    }

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2029, 12, 31, h, m, 0).unwrap()
    }

    fn milestone_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn subscription(times: Vec<u32>) -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            endpoint: "https://push.example/1".to_string(),
            keys: PushKeys {
                p256dh: "p".to_string(),
                auth: "a".to_string(),
            },
            notification_times: NotificationTimes::new(times).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn members() -> Vec<FamilyMember> {
        vec![FamilyMember {
            id: 1,
            subscription_id: "sub-1".to_string(),
            name: "Ada".to_string(),
            birth: BirthInstant::parse("2002-08-16").unwrap(),
            created_at: Utc::now(),
        }]
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> ScanWindow {
        ScanWindow { start, end }
    }

    #[test]
    fn test_first_window_reaches_back_one_interval() {
        let w = ScanWindow::resolve(None, t(23, 0), Duration::minutes(5), Duration::hours(6));
        assert_eq!(w, window(t(22, 55), t(23, 0)));
    }

    #[test]
    fn test_window_starts_at_watermark() {
        let w = ScanWindow::resolve(Some(t(22, 0)), t(23, 0), Duration::minutes(5), Duration::hours(6));
        assert_eq!(w.start, t(22, 0));
    }

    #[test]
    fn test_window_catchup_is_capped() {
        let w = ScanWindow::resolve(Some(t(1, 0)), t(23, 0), Duration::minutes(5), Duration::hours(6));
        assert_eq!(w.start, t(17, 0));
    }

    #[test]
    fn test_future_watermark_gives_empty_window() {
        let w = ScanWindow::resolve(Some(t(23, 30)), t(23, 0), Duration::minutes(5), Duration::hours(6));
        assert!(w.is_empty());
    }

    #[test]
    fn test_window_is_half_open() {
        let w = window(t(22, 55), t(23, 0));
        assert!(!w.contains(t(22, 55)));
        assert!(w.contains(t(23, 0)));
    }

    #[test]
    fn test_candidate_for_matching_lead_time() {
        let source = Fixed(vec![milestone_at()]);
        let found = candidates(&source, &subscription(vec![60, 0]), &members(), &window(t(22, 55), t(23, 0)));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].lead_minutes, 60);
        assert_eq!(found[0].fire_at(), t(23, 0));
        assert_eq!(found[0].person_name, "Ada");
    }

    #[test]
    fn test_no_candidate_between_windows() {
        let source = Fixed(vec![milestone_at()]);
        let found = candidates(&source, &subscription(vec![60, 0]), &members(), &window(t(23, 0), t(23, 30)));
        assert!(found.is_empty());
    }

    #[test]
    fn test_candidates_only_inside_lead_windows() {
        let source = Fixed(vec![milestone_at()]);
        let sub = subscription(vec![1440, 60, 0]);
        let step = Duration::minutes(5);

        let mut fired = Vec::new();
        let mut start = milestone_at() - Duration::days(2);
        while start < milestone_at() + Duration::hours(1) {
            let w = window(start, start + step);
            for p in candidates(&source, &sub, &members(), &w) {
                fired.push((p.lead_minutes, p.fire_at()));
            }
            start += step;
        }

        assert_eq!(
            fired,
            vec![
                (1440, milestone_at() - Duration::days(1)),
                (60, milestone_at() - Duration::hours(1)),
                (0, milestone_at()),
            ]
        );
    }

    #[test]
    fn test_wide_window_covers_several_lead_times() {
        let source = Fixed(vec![milestone_at()]);
        let found = candidates(&source, &subscription(vec![60, 0]), &members(), &window(t(22, 0), milestone_at()));
        let leads: Vec<u32> = found.iter().map(|p| p.lead_minutes).collect();
        assert_eq!(leads, vec![60, 0]);
    }
}
