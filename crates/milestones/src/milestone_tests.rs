//! Registry-level tests: merging, ordering and range semantics across all
//! built-in calculators.

use chrono::{DateTime, Duration, TimeZone, Utc};

use nerdy_common::types::{Milestone, MilestoneKind};

use crate::counted::CountedUnit;
use crate::{MAX_AGE_SECS, MilestoneCalculator, MilestoneRegistry, MilestoneSource};

// ───────────────────────────── helpers ──────────────────────────────

fn birth() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1995, 3, 14, 15, 9, 0).unwrap()
}

/// A calculator that always reports one fixed milestone.
struct Fixed(DateTime<Utc>);

impl MilestoneCalculator for Fixed {
    fn milestones_between(
        &self,
        _birth: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Milestone> {
        if self.0 > from && self.0 <= to {
            vec![Milestone {
                kind: MilestoneKind::Days,
                label: "fixed".to_string(),
                at: self.0,
            }]
        } else {
            vec![]
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

// ═══════════════════════════════════════════════════════════════════
//  MilestoneRegistry
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_registry_returns_sorted_milestones() {
    let registry = MilestoneRegistry::new();
    let found = registry.due_milestones(birth(), birth(), Duration::days(365 * 40));
    assert!(found.len() > 50, "expected plenty of milestones, got {}", found.len());
    assert!(found.windows(2).all(|w| w[0].at <= w[1].at));
}

#[test]
fn test_registry_respects_half_open_range() {
    let registry = MilestoneRegistry::new();
    let as_of = birth() + Duration::days(5_000);
    let horizon = Duration::days(2_000);
    let found = registry.due_milestones(birth(), as_of, horizon);
    assert!(found.iter().all(|m| m.at > as_of && m.at <= as_of + horizon));
}

#[test]
fn test_registry_includes_10000_days() {
    let registry = MilestoneRegistry::new();
    let at = birth() + Duration::days(10_000);
    let found = registry.due_milestones(birth(), at - Duration::hours(1), Duration::hours(1));
    assert!(found.iter().any(|m| m.label == "10,000 days old" && m.at == at));
}

#[test]
fn test_registry_empty_for_non_positive_horizon() {
    let registry = MilestoneRegistry::new();
    assert!(registry.due_milestones(birth(), birth(), Duration::zero()).is_empty());
    assert!(
        registry
            .due_milestones(birth(), birth(), Duration::days(-1))
            .is_empty()
    );
}

#[test]
fn test_registry_never_exceeds_max_age() {
    let registry = MilestoneRegistry::new();
    let as_of = birth() + Duration::seconds(MAX_AGE_SECS);
    assert!(
        registry
            .due_milestones(birth(), as_of, Duration::days(3_650))
            .is_empty()
    );
}

#[test]
fn test_registry_deduplicates_identical_milestones() {
    let at = birth() + Duration::days(7);
    let registry = MilestoneRegistry::with_calculators(vec![Box::new(Fixed(at)), Box::new(Fixed(at))]);
    let found = registry.due_milestones(birth(), birth(), Duration::days(30));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].at, at);
}

#[test]
fn test_registry_is_deterministic() {
    let registry = MilestoneRegistry::new();
    let as_of = birth() + Duration::days(9_000);
    let first = registry.due_milestones(birth(), as_of, Duration::days(900));
    let second = registry.due_milestones(birth(), as_of, Duration::days(900));
    assert_eq!(first, second);
}

#[test]
fn test_split_ranges_cover_the_whole_range_exactly_once() {
    let unit = CountedUnit::hours();
    let start = birth();
    let mid = birth() + Duration::days(3_000);
    let end = birth() + Duration::days(6_000);

    let whole = unit.milestones_between(birth(), start, end);
    let mut halves = unit.milestones_between(birth(), start, mid);
    halves.extend(unit.milestones_between(birth(), mid, end));

    assert_eq!(whole, halves);
}
