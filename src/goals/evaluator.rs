use crate::goals::model::{Entry, Goal, GoalKind};
use crate::goals::period::boundaries;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub completed: bool,
    pub actual: f64,
    pub target: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Decide completion of `goal` for the period containing `at`.
///
/// Habit and metric goals only count entries with `occurred_at` inside the
/// cadence period; entries outside it are ignored, so callers may pass a
/// superset. Milestone and one-time goals ignore `entries` and `at`.
pub fn evaluate(goal: &Goal, entries: &[Entry], at: DateTime<Utc>) -> GoalProgress {
    match &goal.kind {
        GoalKind::Milestone { milestones } => {
            let done = milestones.iter().filter(|milestone| milestone.done).count();
            let total = milestones.len();
            GoalProgress {
                completed: total > 0 && done == total,
                actual: done as f64,
                target: total as f64,
                unit: None,
            }
        }
        GoalKind::OneTime { completed, .. } => GoalProgress {
            completed: *completed,
            actual: if *completed { 1.0 } else { 0.0 },
            target: 1.0,
            unit: None,
        },
        GoalKind::Habit {
            cadence,
            target_count,
        } => {
            let period = boundaries(*cadence, at);
            let actual = entries
                .iter()
                .filter(|entry| period.contains(entry.occurred_at))
                .count() as f64;
            let target = f64::from(*target_count);
            GoalProgress {
                completed: actual >= target,
                actual,
                target,
                unit: None,
            }
        }
        GoalKind::Metric {
            cadence,
            target_quantity,
            unit,
        } => {
            let period = boundaries(*cadence, at);
            let actual = entries
                .iter()
                .filter(|entry| period.contains(entry.occurred_at))
                .map(|entry| entry.quantity.filter(|value| !value.is_nan()).unwrap_or(0.0))
                .sum::<f64>();
            GoalProgress {
                completed: actual >= *target_quantity,
                actual,
                target: *target_quantity,
                unit: Some(unit.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::model::Milestone;
    use crate::goals::period::Cadence;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn goal(kind: GoalKind) -> Goal {
        Goal {
            id: 1,
            owner_id: "u1".to_string(),
            title: "goal".to_string(),
            kind,
            archived: false,
            created_at: utc(2025, 1, 1, 0),
            updated_at: utc(2025, 1, 1, 0),
        }
    }

    fn entry(id: i64, occurred_at: DateTime<Utc>, quantity: Option<f64>) -> Entry {
        Entry {
            id,
            goal_id: 1,
            owner_id: "u1".to_string(),
            occurred_at,
            quantity,
        }
    }

    fn milestone(id: i64, done: bool) -> Milestone {
        Milestone {
            id,
            goal_id: 1,
            title: format!("step {id}"),
            order: id,
            done,
            done_at: done.then(|| utc(2025, 1, 2, 0)),
        }
    }

    #[test]
    fn weekly_habit_counts_monday_through_sunday() {
        let habit = goal(GoalKind::Habit {
            cadence: Cadence::Week,
            target_count: 2,
        });
        let entries = vec![
            entry(1, utc(2025, 1, 6, 10), None),
            entry(2, utc(2025, 1, 12, 23), None),
        ];

        let progress = evaluate(&habit, &entries, utc(2025, 1, 10, 0));
        assert_eq!(
            progress,
            GoalProgress {
                completed: true,
                actual: 2.0,
                target: 2.0,
                unit: None
            }
        );
    }

    #[test]
    fn habit_ignores_entries_outside_window() {
        let habit = goal(GoalKind::Habit {
            cadence: Cadence::Day,
            target_count: 1,
        });
        let at = utc(2025, 2, 3, 12);
        let mut entries = vec![
            entry(1, utc(2025, 2, 2, 23), None),
            // the period end is exclusive
            entry(2, utc(2025, 2, 4, 0), None),
        ];

        let before = evaluate(&habit, &entries, at);
        assert_eq!(before.actual, 0.0);
        assert!(!before.completed);

        entries.push(entry(3, utc(2025, 2, 3, 0), None));
        let after = evaluate(&habit, &entries, at);
        assert_eq!(after.actual, 1.0);
        assert!(after.completed);
    }

    #[test]
    fn habit_actual_never_decreases_when_entries_are_added() {
        let habit = goal(GoalKind::Habit {
            cadence: Cadence::Month,
            target_count: 10,
        });
        let at = utc(2025, 4, 15, 0);
        let mut entries = Vec::new();
        let mut previous = 0.0;

        for day in 1..=30 {
            entries.push(entry(day, utc(2025, 4, day as u32, 8), None));
            let progress = evaluate(&habit, &entries, at);
            assert!(progress.actual >= previous);
            previous = progress.actual;
        }
        assert_eq!(previous, 30.0);
    }

    #[test]
    fn metric_sums_quantities_treating_missing_as_zero() {
        let metric = goal(GoalKind::Metric {
            cadence: Cadence::Week,
            target_quantity: 100.0,
            unit: "pages".to_string(),
        });
        let entries = vec![
            entry(1, utc(2025, 1, 6, 9), Some(40.0)),
            entry(2, utc(2025, 1, 7, 9), None),
            entry(3, utc(2025, 1, 8, 9), Some(f64::NAN)),
            entry(4, utc(2025, 1, 9, 9), Some(35.5)),
            entry(5, utc(2025, 1, 13, 0), Some(500.0)),
        ];

        let progress = evaluate(&metric, &entries, utc(2025, 1, 9, 12));
        assert_eq!(progress.actual, 75.5);
        assert_eq!(progress.target, 100.0);
        assert!(!progress.completed);
        assert_eq!(progress.unit.as_deref(), Some("pages"));
    }

    #[test]
    fn milestone_completion_requires_every_step() {
        let partial = goal(GoalKind::Milestone {
            milestones: vec![milestone(1, true), milestone(2, false)],
        });
        let progress = evaluate(&partial, &[], utc(2025, 1, 1, 0));
        assert_eq!((progress.actual, progress.target), (1.0, 2.0));
        assert!(!progress.completed);

        let done = goal(GoalKind::Milestone {
            milestones: vec![milestone(1, true), milestone(2, true)],
        });
        assert!(evaluate(&done, &[], utc(2025, 1, 1, 0)).completed);

        let empty = goal(GoalKind::Milestone {
            milestones: Vec::new(),
        });
        let progress = evaluate(&empty, &[], utc(2025, 1, 1, 0));
        assert!(!progress.completed);
        assert_eq!(progress.target, 0.0);
    }

    #[test]
    fn one_time_goal_reflects_completed_flag() {
        let open = goal(GoalKind::OneTime {
            due_at: None,
            completed: false,
            completed_at: None,
        });
        let progress = evaluate(&open, &[], utc(2025, 1, 1, 0));
        assert_eq!((progress.completed, progress.actual, progress.target), (false, 0.0, 1.0));

        let closed = goal(GoalKind::OneTime {
            due_at: None,
            completed: true,
            completed_at: Some(utc(2025, 1, 1, 0)),
        });
        assert!(evaluate(&closed, &[], utc(2025, 1, 1, 0)).completed);
    }

    #[test]
    fn progress_serializes_unit_only_for_metrics() {
        let json = serde_json::to_value(GoalProgress {
            completed: false,
            actual: 1.0,
            target: 3.0,
            unit: None,
        })
        .unwrap();
        assert!(json.get("unit").is_none());
    }
}
