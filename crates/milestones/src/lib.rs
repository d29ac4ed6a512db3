pub mod counted;
pub mod format;
pub mod planetary;

#[cfg(test)]
mod milestone_tests;

use chrono::{DateTime, Duration, Utc};
use nerdy_common::types::Milestone;

/// Ages past this are never reported.
pub const MAX_AGE_SECS: i64 = 4_733_640_000; // 150 Julian years

/// Computes the noteworthy instants of a life.
///
/// This is the collaborator the scanner consults on every tick. It must be
/// pure: the same inputs always yield the same milestones.
pub trait MilestoneSource: Send + Sync {
    /// All milestones with `as_of < at <= as_of + horizon`, sorted by instant.
    fn due_milestones(
        &self,
        birth: DateTime<Utc>,
        as_of: DateTime<Utc>,
        horizon: Duration,
    ) -> Vec<Milestone>;
}

/// Trait that every family of milestones must implement.
pub trait MilestoneCalculator: Send + Sync {
    /// Milestones strictly after `from` and at or before `to`.
    fn milestones_between(
        &self,
        birth: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Milestone>;

    /// Human-readable name for this calculator (e.g., "seconds").
    fn name(&self) -> &'static str;
}

/// Registry of all milestone calculators, used by the scanner.
pub struct MilestoneRegistry {
    calculators: Vec<Box<dyn MilestoneCalculator>>,
}

impl MilestoneRegistry {
    /// Create a registry with every built-in calculator.
    pub fn new() -> Self {
        Self {
            calculators: vec![
                Box::new(counted::CountedUnit::seconds()),
                Box::new(counted::CountedUnit::minutes()),
                Box::new(counted::CountedUnit::hours()),
                Box::new(counted::CountedUnit::days()),
                Box::new(counted::CountedUnit::weeks()),
                Box::new(planetary::PlanetaryYears::new()),
            ],
        }
    }

    /// Create a registry from an explicit set of calculators.
    pub fn with_calculators(calculators: Vec<Box<dyn MilestoneCalculator>>) -> Self {
        Self { calculators }
    }
}

impl Default for MilestoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MilestoneSource for MilestoneRegistry {
    fn due_milestones(
        &self,
        birth: DateTime<Utc>,
        as_of: DateTime<Utc>,
        horizon: Duration,
    ) -> Vec<Milestone> {
        if horizon <= Duration::zero() {
            return Vec::new();
        }
        let until = as_of + horizon;

        let mut milestones: Vec<Milestone> = self
            .calculators
            .iter()
            .flat_map(|calculator| {
                let found = calculator.milestones_between(birth, as_of, until);
                if !found.is_empty() {
                    tracing::trace!(
                        calculator = calculator.name(),
                        count = found.len(),
                        "Milestones in range"
                    );
                }
                found
            })
            .collect();

        milestones.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.label.cmp(&b.label)));
        milestones.dedup_by(|a, b| a.at == b.at && a.label == b.label);
        milestones
    }
}
