use chrono::{DateTime, Duration, Utc};

use nerdy_common::types::{Milestone, MilestoneKind};

use crate::format::thousands;
use crate::{MAX_AGE_SECS, MilestoneCalculator};

/// Milestones counted in a fixed unit of time.
///
/// Noteworthy counts are:
/// - round numbers `d × 10^k` at or above a per-unit floor (1,000 days, 100,000,000 seconds)
/// - repdigits with at least a per-unit number of digits (11,111 days)
/// - powers of two, for units that opt in (2^30 seconds)
pub struct CountedUnit {
    kind: MilestoneKind,
    name: &'static str,
    /// Sorted ascending by offset; offsets never exceed `MAX_AGE_SECS`.
    marks: Vec<(i64, String)>,
}

struct UnitSpec {
    kind: MilestoneKind,
    name: &'static str,
    unit_secs: i64,
    min_round: u64,
    min_repdigit_len: u32,
    powers_of_two_from: Option<u32>,
}

impl CountedUnit {
    pub fn seconds() -> Self {
        Self::build(UnitSpec {
            kind: MilestoneKind::Seconds,
            name: "seconds",
            unit_secs: 1,
            min_round: 100_000_000,
            min_repdigit_len: 9,
            powers_of_two_from: Some(25),
        })
    }

    pub fn minutes() -> Self {
        Self::build(UnitSpec {
            kind: MilestoneKind::Minutes,
            name: "minutes",
            unit_secs: 60,
            min_round: 1_000_000,
            min_repdigit_len: 7,
            powers_of_two_from: None,
        })
    }

    pub fn hours() -> Self {
        Self::build(UnitSpec {
            kind: MilestoneKind::Hours,
            name: "hours",
            unit_secs: 3_600,
            min_round: 10_000,
            min_repdigit_len: 5,
            powers_of_two_from: None,
        })
    }

    pub fn days() -> Self {
        Self::build(UnitSpec {
            kind: MilestoneKind::Days,
            name: "days",
            unit_secs: 86_400,
            min_round: 1_000,
            min_repdigit_len: 4,
            powers_of_two_from: None,
        })
    }

    pub fn weeks() -> Self {
        Self::build(UnitSpec {
            kind: MilestoneKind::Weeks,
            name: "weeks",
            unit_secs: 604_800,
            min_round: 100,
            min_repdigit_len: 3,
            powers_of_two_from: None,
        })
    }

    fn build(spec: UnitSpec) -> Self {
        let mut marks: Vec<(i64, String)> = Vec::new();
        let mut push = |count: u64, label: String| {
            let offset = i64::try_from(count)
                .ok()
                .and_then(|c| c.checked_mul(spec.unit_secs));
            if let Some(offset) = offset
                && offset <= MAX_AGE_SECS
                && !marks.iter().any(|(existing, _)| *existing == offset)
            {
                marks.push((offset, label));
            }
        };

        let mut power = 1u64;
        for _ in 0..=18 {
            for digit in 1..=9u64 {
                let count = digit * power;
                if count >= spec.min_round {
                    push(count, format!("{} {} old", thousands(count), spec.name));
                }
            }
            power = power.saturating_mul(10);
        }

        for len in spec.min_repdigit_len..=18 {
            let ones = (10u64.pow(len) - 1) / 9;
            for digit in 1..=9u64 {
                let count = digit * ones;
                push(count, format!("{} {} old", thousands(count), spec.name));
            }
        }

        if let Some(from) = spec.powers_of_two_from {
            for exponent in from..63 {
                let count = 1u64 << exponent;
                push(
                    count,
                    format!("2^{} {} old ({})", exponent, spec.name, thousands(count)),
                );
            }
        }

        marks.sort_by_key(|(offset, _)| *offset);

        Self {
            kind: spec.kind,
            name: spec.name,
            marks,
        }
    }
}

impl MilestoneCalculator for CountedUnit {
    fn milestones_between(
        &self,
        birth: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Milestone> {
        if to <= birth {
            return Vec::new();
        }

        // Skip everything at or before `from` without computing instants.
        let elapsed = (from - birth).num_seconds();
        let start = self.marks.partition_point(|(offset, _)| *offset < elapsed);

        self.marks[start..]
            .iter()
            .map(|(offset, label)| (birth + Duration::seconds(*offset), label))
            .skip_while(|(at, _)| *at <= from)
            .take_while(|(at, _)| *at <= to)
            .map(|(at, label)| Milestone {
                kind: self.kind,
                label: label.clone(),
                at,
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn birth() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_marks_are_sorted_and_bounded() {
        for unit in [
            CountedUnit::seconds(),
            CountedUnit::minutes(),
            CountedUnit::hours(),
            CountedUnit::days(),
            CountedUnit::weeks(),
        ] {
            assert!(!unit.marks.is_empty(), "{} has no marks", unit.name);
            assert!(unit.marks.windows(2).all(|w| w[0].0 < w[1].0));
            assert!(unit.marks.iter().all(|(offset, _)| *offset <= MAX_AGE_SECS));
        }
    }

    #[test]
    fn test_billion_seconds() {
        let unit = CountedUnit::seconds();
        let at = birth() + Duration::seconds(1_000_000_000);
        let found = unit.milestones_between(birth(), at - Duration::seconds(1), at);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "1,000,000,000 seconds old");
        assert_eq!(found[0].at, at);
        assert_eq!(found[0].kind, MilestoneKind::Seconds);
    }

    #[test]
    fn test_range_is_exclusive_at_start() {
        let unit = CountedUnit::days();
        let at = birth() + Duration::days(10_000);
        assert!(unit.milestones_between(birth(), at, at + Duration::hours(1)).is_empty());
        assert_eq!(unit.milestones_between(birth(), at - Duration::hours(1), at).len(), 1);
    }

    #[test]
    fn test_repdigit_days() {
        let unit = CountedUnit::days();
        let at = birth() + Duration::days(11_111);
        let found = unit.milestones_between(birth(), at - Duration::minutes(1), at);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "11,111 days old");
    }

    #[test]
    fn test_power_of_two_seconds() {
        let unit = CountedUnit::seconds();
        let at = birth() + Duration::seconds(1 << 30);
        let found = unit.milestones_between(birth(), at - Duration::seconds(1), at);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "2^30 seconds old (1,073,741,824)");
    }

    #[test]
    fn test_nothing_before_birth() {
        let unit = CountedUnit::weeks();
        let before = birth() - Duration::days(30);
        assert!(unit.milestones_between(birth(), before, birth()).is_empty());
    }
}
