use chrono::{DateTime, Duration, Utc};

use nerdy_common::types::{Milestone, MilestoneKind};

use crate::format::plural;
use crate::{MAX_AGE_SECS, MilestoneCalculator};

/// Sidereal orbital periods in Earth days.
const PLANETS: [(&str, f64); 5] = [
    ("Mercury", 87.969),
    ("Venus", 224.701),
    ("Mars", 686.980),
    ("Jupiter", 4_332.589),
    ("Saturn", 10_759.22),
];

/// Birthdays on other planets: one per completed orbit.
pub struct PlanetaryYears {
    /// (planet, orbital period in whole seconds)
    periods: Vec<(&'static str, i64)>,
}

impl PlanetaryYears {
    pub fn new() -> Self {
        Self {
            periods: PLANETS
                .iter()
                .map(|(planet, days)| (*planet, (days * 86_400.0).round() as i64))
                .collect(),
        }
    }
}

impl Default for PlanetaryYears {
    fn default() -> Self {
        Self::new()
    }
}

impl MilestoneCalculator for PlanetaryYears {
    fn milestones_between(
        &self,
        birth: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Milestone> {
        let mut milestones = Vec::new();
        if to <= birth {
            return milestones;
        }

        let elapsed = (from - birth).num_seconds().max(0);
        for (planet, period) in &self.periods {
            let mut orbit = (elapsed / period).max(1);
            loop {
                let offset = orbit * period;
                if offset > MAX_AGE_SECS {
                    break;
                }
                let at = birth + Duration::seconds(offset);
                if at > to {
                    break;
                }
                if at > from {
                    milestones.push(Milestone {
                        kind: MilestoneKind::PlanetaryYear,
                        label: format!(
                            "{} old on {}",
                            plural(orbit as u64, "year", "years"),
                            planet
                        ),
                        at,
                    });
                }
                orbit += 1;
            }
        }

        milestones.sort_by_key(|m| m.at);
        milestones
    }

    fn name(&self) -> &'static str {
        "planetary years"
    }
}
