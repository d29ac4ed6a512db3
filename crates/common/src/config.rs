use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// VAPID credentials used to sign web-push requests.
#[derive(Debug, Clone, Deserialize)]
pub struct VapidConfig {
    /// Raw P-256 private key, base64url without padding
    pub private_key: String,
    /// Matching public key handed to browsers when they subscribe
    pub public_key: String,
    /// Contact URI (`mailto:` or `https:`) sent in the `sub` claim
    pub subject: String,
}

/// Outcome of reading the VAPID variables, which are all-or-nothing.
#[derive(Debug, Clone)]
pub enum VapidStatus {
    Missing,
    Incomplete,
    Ready(VapidConfig),
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite connection string
    pub database_url: String,

    /// Maximum number of SQLite connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Redis connection string; enables the distributed scan lock when set
    pub redis_url: Option<String>,

    /// Scan cadence in seconds (default: 300)
    pub scan_interval_secs: u64,

    /// Furthest a late scan may reach back, in seconds (default: 6h)
    pub scan_max_catchup_secs: u64,

    /// Number of subscriptions dispatched in parallel per tick (default: 8)
    pub dispatch_concurrency: usize,

    /// Per-request push timeout in seconds (default: 10)
    pub push_timeout_secs: u64,

    /// Delivery attempts per notification before it is dropped (default: 3)
    pub push_max_attempts: u32,

    /// Backoff before the first retry in milliseconds, doubled per retry (default: 1000)
    pub push_initial_backoff_ms: u64,

    /// TTL header sent to the push service in seconds (default: 86400)
    pub push_ttl_secs: u32,

    pub vapid_private_key: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_subject: Option<String>,

    /// Icon shown with each notification
    pub app_icon_url: String,

    /// Monochrome badge shown in the status bar
    pub app_badge_url: String,

    /// Page opened when a notification is clicked
    pub results_path: String,

    /// Port the API server listens on (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            database_url: string_or("DATABASE_URL", "sqlite://nerdy.db"),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            scan_interval_secs: parse_or(&lookup, "SCAN_INTERVAL_SECS", 300)?,
            scan_max_catchup_secs: parse_or(&lookup, "SCAN_MAX_CATCHUP_SECS", 21_600)?,
            dispatch_concurrency: parse_or(&lookup, "DISPATCH_CONCURRENCY", 8)?,
            push_timeout_secs: parse_or(&lookup, "PUSH_TIMEOUT_SECS", 10)?,
            push_max_attempts: parse_or(&lookup, "PUSH_MAX_ATTEMPTS", 3)?,
            push_initial_backoff_ms: parse_or(&lookup, "PUSH_INITIAL_BACKOFF_MS", 1000)?,
            push_ttl_secs: parse_or(&lookup, "PUSH_TTL_SECS", 86_400)?,
            vapid_private_key: lookup("VAPID_PRIVATE_KEY"),
            vapid_public_key: lookup("VAPID_PUBLIC_KEY"),
            vapid_subject: lookup("VAPID_SUBJECT"),
            app_icon_url: string_or("APP_ICON_URL", "/icons/icon-192.png"),
            app_badge_url: string_or("APP_BADGE_URL", "/icons/badge-72.png"),
            results_path: string_or("RESULTS_PATH", "/results.html"),
            api_port: parse_or(&lookup, "API_PORT", 3000)?,
        })
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn scan_max_catchup(&self) -> Duration {
        Duration::from_secs(self.scan_max_catchup_secs)
    }

    pub fn vapid(&self) -> VapidStatus {
        let private_key = self.vapid_private_key.as_ref();
        let public_key = self.vapid_public_key.as_ref();
        let subject = self.vapid_subject.as_ref();
        let has_any = private_key.is_some() || public_key.is_some() || subject.is_some();

        match (private_key, public_key, subject) {
            (Some(private_key), Some(public_key), Some(subject)) => VapidStatus::Ready(VapidConfig {
                private_key: private_key.clone(),
                public_key: public_key.clone(),
                subject: subject.clone(),
            }),
            _ if has_any => VapidStatus::Incomplete,
            _ => VapidStatus::Missing,
        }
    }

    /// VAPID credentials for sending, or a `Config` error when they are not all set.
    pub fn require_vapid(&self) -> Result<VapidConfig, AppError> {
        match self.vapid() {
            VapidStatus::Ready(vapid) => Ok(vapid),
            VapidStatus::Missing => Err(AppError::Config(
                "VAPID_PRIVATE_KEY, VAPID_PUBLIC_KEY and VAPID_SUBJECT must be set to send push notifications"
                    .to_string(),
            )),
            VapidStatus::Incomplete => Err(AppError::Config(
                "Incomplete VAPID configuration: VAPID_PRIVATE_KEY, VAPID_PUBLIC_KEY and VAPID_SUBJECT must all be set"
                    .to_string(),
            )),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| {
                AppError::Config(format!("{key} must be a valid {}", std::any::type_name::<T>())).into()
            }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite://nerdy.db");
        assert_eq!(config.scan_interval_secs, 300);
        assert_eq!(config.push_max_attempts, 3);
        assert_eq!(config.push_initial_backoff_ms, 1000);
        assert_eq!(config.dispatch_concurrency, 8);
        assert!(config.redis_url.is_none());
        assert!(matches!(config.vapid(), VapidStatus::Missing));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = config_from(&[("SCAN_INTERVAL_SECS", "five")]).unwrap_err();
        assert!(err.to_string().contains("SCAN_INTERVAL_SECS"));
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Config(_))));
    }

    #[test]
    fn test_partial_vapid_is_incomplete() {
        let config = config_from(&[("VAPID_PRIVATE_KEY", "abc")]).unwrap();
        assert!(matches!(config.vapid(), VapidStatus::Incomplete));
        assert!(matches!(config.require_vapid(), Err(AppError::Config(_))));
        assert!(matches!(config_from(&[]).unwrap().require_vapid(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_full_vapid_is_ready() {
        let config = config_from(&[
            ("VAPID_PRIVATE_KEY", "private"),
            ("VAPID_PUBLIC_KEY", "public"),
            ("VAPID_SUBJECT", "mailto:ops@example.com"),
        ])
        .unwrap();
        match config.vapid() {
            VapidStatus::Ready(vapid) => assert_eq!(vapid.subject, "mailto:ops@example.com"),
            other => panic!("expected ready VAPID config, got {other:?}"),
        }
        assert_eq!(config.require_vapid().unwrap().public_key, "public");
    }

    #[test]
    fn test_blank_redis_url_is_ignored() {
        let config = config_from(&[("REDIS_URL", "  ")]).unwrap();
        assert!(config.redis_url.is_none());
    }
}
