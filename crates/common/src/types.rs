use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Lead times applied when a subscriber does not choose their own.
pub const DEFAULT_NOTIFICATION_TIMES: [u32; 3] = [1440, 60, 0];

/// Upper bound on the number of lead times per subscription.
pub const MAX_NOTIFICATION_TIMES: usize = 8;

/// Longest supported lead time (30 days), in minutes.
pub const MAX_LEAD_MINUTES: u32 = 43_200;

/// Storage format of `family_members.birth_datetime`.
const BIRTH_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Typed representation of a subscription's `notification_times` JSON.
///
/// Distinct minute values, sorted descending (earliest reminder first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct NotificationTimes(Vec<u32>);

impl NotificationTimes {
    pub fn new(mut minutes: Vec<u32>) -> Result<Self, AppError> {
        minutes.sort_unstable_by(|a, b| b.cmp(a));
        minutes.dedup();

        if minutes.is_empty() {
            return Err(AppError::Validation(
                "notification_times must contain at least one lead time".to_string(),
            ));
        }
        if minutes.len() > MAX_NOTIFICATION_TIMES {
            return Err(AppError::Validation(format!(
                "notification_times accepts at most {} lead times",
                MAX_NOTIFICATION_TIMES
            )));
        }
        if let Some(too_far) = minutes.iter().find(|m| **m > MAX_LEAD_MINUTES) {
            return Err(AppError::Validation(format!(
                "Lead time {} exceeds the maximum of {} minutes",
                too_far, MAX_LEAD_MINUTES
            )));
        }

        Ok(Self(minutes))
    }

    /// Parse the JSON column value, applying the same validation as writes.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let minutes: Vec<u32> = serde_json::from_str(raw).map_err(|e| {
            AppError::Validation(format!("notification_times is not a JSON array of minutes: {e}"))
        })?;
        Self::new(minutes)
    }

    pub fn to_json(&self) -> String {
        // A Vec<u32> always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn minutes(&self) -> &[u32] {
        &self.0
    }

    /// Largest lead time, which bounds how far ahead the scanner must look.
    pub fn max_minutes(&self) -> u32 {
        self.0.first().copied().unwrap_or(0)
    }
}

impl Default for NotificationTimes {
    fn default() -> Self {
        Self(DEFAULT_NOTIFICATION_TIMES.to_vec())
    }
}

impl TryFrom<Vec<u32>> for NotificationTimes {
    type Error = AppError;

    fn try_from(minutes: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<NotificationTimes> for Vec<u32> {
    fn from(times: NotificationTimes) -> Self {
        times.0
    }
}

/// Browser-issued encryption keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A registered push subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// UUID v5 of the endpoint
    pub id: String,
    pub endpoint: String,
    pub keys: PushKeys,
    pub notification_times: NotificationTimes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw `subscriptions` row, before `notification_times` is validated.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub notification_times: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = AppError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            notification_times: NotificationTimes::from_json(&row.notification_times)?,
            id: row.id,
            endpoint: row.endpoint,
            keys: PushKeys {
                p256dh: row.p256dh,
                auth: row.auth,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Birth date with minute precision, interpreted as UTC.
///
/// A date without a time of day is born at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BirthInstant(NaiveDateTime);

impl BirthInstant {
    /// Parse `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM[:SS]`. Seconds are truncated.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(Self(date.and_time(NaiveTime::MIN)));
        }
        for format in [BIRTH_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
                return Self::from_naive(dt);
            }
        }
        Err(AppError::Validation(format!(
            "Invalid birth date '{raw}', expected YYYY-MM-DD or YYYY-MM-DDTHH:MM"
        )))
    }

    /// Combine a date and an optional `HH:MM` time of day.
    pub fn from_parts(date: &str, time: Option<&str>) -> Result<Self, AppError> {
        match time.map(str::trim).filter(|t| !t.is_empty()) {
            Some(time) => Self::parse(&format!("{}T{}", date.trim(), time)),
            None => Self::parse(date),
        }
    }

    fn from_naive(dt: NaiveDateTime) -> Result<Self, AppError> {
        dt.with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .map(Self)
            .ok_or_else(|| AppError::Validation("Birth time out of range".to_string()))
    }

    pub fn as_utc(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl std::fmt::Display for BirthInstant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(BIRTH_FORMAT))
    }
}

impl Serialize for BirthInstant {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BirthInstant {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BirthInstant::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A person whose milestones a subscriber follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMember {
    pub id: i64,
    pub subscription_id: String,
    pub name: String,
    pub birth: BirthInstant,
    pub created_at: DateTime<Utc>,
}

/// Raw `family_members` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FamilyMemberRow {
    pub id: i64,
    pub subscription_id: String,
    pub name: String,
    pub birth_datetime: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FamilyMemberRow> for FamilyMember {
    type Error = AppError;

    fn try_from(row: FamilyMemberRow) -> Result<Self, Self::Error> {
        Ok(Self {
            birth: BirthInstant::parse(&row.birth_datetime)?,
            id: row.id,
            subscription_id: row.subscription_id,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

/// Family of noteworthy instants a milestone belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    PlanetaryYear,
}

impl std::fmt::Display for MilestoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MilestoneKind::Seconds => write!(f, "seconds"),
            MilestoneKind::Minutes => write!(f, "minutes"),
            MilestoneKind::Hours => write!(f, "hours"),
            MilestoneKind::Days => write!(f, "days"),
            MilestoneKind::Weeks => write!(f, "weeks"),
            MilestoneKind::PlanetaryYear => write!(f, "planetary_year"),
        }
    }
}

/// A computed noteworthy instant, e.g. "1,000,000,000 seconds old".
///
/// Recomputed on every scan, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub kind: MilestoneKind,
    pub label: String,
    pub at: DateTime<Utc>,
}

/// A milestone whose lead-time window fell inside the current scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotification {
    pub subscription_id: String,
    pub member_id: i64,
    pub person_name: String,
    pub birth: BirthInstant,
    pub milestone: Milestone,
    pub lead_minutes: u32,
}

impl PendingNotification {
    /// Instant at which this reminder becomes due.
    pub fn fire_at(&self) -> DateTime<Utc> {
        self.milestone.at - chrono::Duration::minutes(i64::from(self.lead_minutes))
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            subscription_id: self.subscription_id.clone(),
            person_name: self.person_name.clone(),
            milestone_at: self.milestone.at,
            lead_minutes: self.lead_minutes,
        }
    }
}

/// Uniquely identifies one deliverable notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub subscription_id: String,
    pub person_name: String,
    pub milestone_at: DateTime<Utc>,
    pub lead_minutes: u32,
}

impl DedupKey {
    /// Canonical text form of the milestone instant used in the unique index.
    pub fn milestone_at_text(&self) -> String {
        self.milestone_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.subscription_id,
            self.person_name,
            self.milestone_at_text(),
            self.lead_minutes
        )
    }
}

/// A finalised `notification_log` row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationLogEntry {
    pub id: i64,
    pub subscription_id: String,
    pub person_name: String,
    pub milestone_at: String,
    pub milestone_label: String,
    pub lead_minutes: i64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Person reference carried in a payload so the client can restore its results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyEntry {
    pub name: String,
    pub birth: String,
}

/// Deep-link data attached to a push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<Vec<FamilyEntry>>,
}

/// JSON body delivered to the service worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    #[serde(default)]
    pub data: PushData,
}
