pub mod evaluator;
pub mod model;
pub mod period;

pub use evaluator::{GoalProgress, evaluate};
pub use model::{Entry, Goal, GoalKind, GoalType, Milestone, NewGoal};
pub use period::boundaries;

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};

/// Load a live goal with its milestones. Archived goals read as missing.
pub fn load_goal(database: &Database, goal_id: i64) -> CoreResult<Goal> {
    let row = database
        .goal_row(goal_id)?
        .filter(|row| !row.archived)
        .ok_or_else(|| CoreError::NotFound(format!("goal {goal_id}")))?;

    let milestones = if row.goal_type == GoalType::Milestone.as_str() {
        database.milestones_for_goal(goal_id)?
    } else {
        Vec::new()
    };

    row.into_goal(milestones)
}

/// Completion of a goal for the period containing `at`.
pub fn goal_progress(database: &Database, goal_id: i64, at: DateTime<Utc>) -> CoreResult<GoalProgress> {
    let goal = load_goal(database, goal_id)?;

    let entries = match goal.kind.cadence() {
        Some(cadence) => {
            let period = boundaries(cadence, at);
            database.entries_between(goal_id, Some(period.start), Some(period.end))?
        }
        None => Vec::new(),
    };

    Ok(evaluate(&goal, &entries, at))
}

pub fn create_goal(database: &mut Database, goal: NewGoal, now: DateTime<Utc>) -> CoreResult<Goal> {
    let validated = goal.validate()?;
    let goal_id = database.insert_goal(&validated, now)?;
    load_goal(database, goal_id)
}

pub fn list_goals(database: &Database, owner_id: &str) -> CoreResult<Vec<Goal>> {
    database
        .goal_rows_for_owner(owner_id, false)?
        .into_iter()
        .map(|row| {
            let milestones = if row.goal_type == GoalType::Milestone.as_str() {
                database.milestones_for_goal(row.id)?
            } else {
                Vec::new()
            };
            row.into_goal(milestones)
        })
        .collect()
}

pub fn archive_goal(database: &Database, goal_id: i64, now: DateTime<Utc>) -> CoreResult<()> {
    load_goal(database, goal_id)?;
    database.archive_goal(goal_id, now)?;
    Ok(())
}

pub fn set_one_time_completed(
    database: &Database,
    goal_id: i64,
    completed: bool,
    now: DateTime<Utc>,
) -> CoreResult<Goal> {
    let goal = load_goal(database, goal_id)?;
    if goal.kind.goal_type() != GoalType::OneTime {
        return Err(CoreError::InvalidInput(format!(
            "goal {goal_id} is a {} goal; only one_time goals are completed directly",
            goal.kind.goal_type().as_str()
        )));
    }

    database.set_goal_completed(goal_id, completed, now)?;
    load_goal(database, goal_id)
}

/// Quantity stored for an entry of `kind`: habits ignore it, metrics require a
/// finite value, other goal types take no entries.
fn entry_quantity(goal: &Goal, quantity: Option<f64>) -> CoreResult<Option<f64>> {
    match &goal.kind {
        GoalKind::Habit { .. } => Ok(None),
        GoalKind::Metric { .. } => match quantity {
            Some(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(CoreError::InvalidInput(format!(
                "metric goal {} entries need a finite quantity",
                goal.id
            ))),
        },
        GoalKind::Milestone { .. } | GoalKind::OneTime { .. } => Err(CoreError::InvalidInput(format!(
            "{} goal {} does not take entries",
            goal.kind.goal_type().as_str(),
            goal.id
        ))),
    }
}

pub fn add_entry(
    database: &Database,
    goal_id: i64,
    occurred_at: DateTime<Utc>,
    quantity: Option<f64>,
    now: DateTime<Utc>,
) -> CoreResult<Entry> {
    let goal = load_goal(database, goal_id)?;
    let quantity = entry_quantity(&goal, quantity)?;

    let entry_id = database.insert_entry(goal_id, &goal.owner_id, occurred_at, quantity, now)?;
    database
        .entry(entry_id)?
        .ok_or_else(|| CoreError::NotFound(format!("entry {entry_id}")))
}

pub fn update_entry(
    database: &Database,
    entry_id: i64,
    occurred_at: Option<DateTime<Utc>>,
    quantity: Option<f64>,
) -> CoreResult<Entry> {
    let entry = database
        .entry(entry_id)?
        .ok_or_else(|| CoreError::NotFound(format!("entry {entry_id}")))?;
    let goal = load_goal(database, entry.goal_id)?;
    let quantity = entry_quantity(&goal, quantity.or(entry.quantity))?;

    database.update_entry(entry_id, occurred_at.unwrap_or(entry.occurred_at), quantity)?;
    database
        .entry(entry_id)?
        .ok_or_else(|| CoreError::NotFound(format!("entry {entry_id}")))
}

pub fn delete_entry(database: &Database, entry_id: i64) -> CoreResult<()> {
    if !database.delete_entry(entry_id)? {
        return Err(CoreError::NotFound(format!("entry {entry_id}")));
    }
    Ok(())
}

pub fn list_entries(
    database: &Database,
    goal_id: i64,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> CoreResult<Vec<Entry>> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(CoreError::InvalidInput(format!(
                "range start {from} is after its end {to}"
            )));
        }
    }

    load_goal(database, goal_id)?;
    Ok(database.entries_between(goal_id, from, to)?)
}

pub fn toggle_milestone(
    database: &Database,
    milestone_id: i64,
    done: bool,
    now: DateTime<Utc>,
) -> CoreResult<Milestone> {
    let milestone = database
        .milestone(milestone_id)?
        .ok_or_else(|| CoreError::NotFound(format!("milestone {milestone_id}")))?;
    load_goal(database, milestone.goal_id)?;

    database.set_milestone_done(milestone_id, done, now)?;
    database
        .milestone(milestone_id)?
        .ok_or_else(|| CoreError::NotFound(format!("milestone {milestone_id}")))
}

pub fn reorder_milestones(database: &mut Database, goal_id: i64, ordered_ids: &[i64]) -> CoreResult<Vec<Milestone>> {
    let goal = load_goal(database, goal_id)?;
    if !matches!(goal.kind, GoalKind::Milestone { .. }) {
        return Err(CoreError::InvalidInput(format!("goal {goal_id} has no milestones")));
    }

    if !database.reorder_milestones(goal_id, ordered_ids)? {
        return Err(CoreError::InvalidInput(format!(
            "milestone ids must be exactly the milestones of goal {goal_id}"
        )));
    }

    Ok(database.milestones_for_goal(goal_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let database = Database::open(&dir.path().join("shelf.db")).unwrap();
        (dir, database)
    }

    fn new_goal(goal_type: GoalType) -> NewGoal {
        NewGoal {
            owner_id: "u1".to_string(),
            title: "Reading habit".to_string(),
            goal_type,
            cadence: None,
            target_count: None,
            target_quantity: None,
            unit: None,
            due_at: None,
            milestones: Vec::new(),
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn weekly_habit_counts_entries_of_the_iso_week() {
        let (_dir, mut database) = open();
        let goal = create_goal(
            &mut database,
            NewGoal {
                cadence: Some("week".to_string()),
                target_count: Some(2),
                ..new_goal(GoalType::Habit)
            },
            Utc::now(),
        )
        .unwrap();

        for day in [5, 6, 12, 13] {
            add_entry(&database, goal.id, utc(2025, 1, day, 12), Some(3.0), Utc::now()).unwrap();
        }

        let progress = goal_progress(&database, goal.id, utc(2025, 1, 10, 9)).unwrap();
        assert!(progress.completed);
        assert_eq!((progress.actual, progress.target), (2.0, 2.0));
        assert_eq!(progress.unit, None);

        let stored = list_entries(&database, goal.id, None, None).unwrap();
        assert!(stored.iter().all(|entry| entry.quantity.is_none()));
    }

    #[test]
    fn metric_entries_need_a_finite_quantity() {
        let (_dir, mut database) = open();
        let goal = create_goal(
            &mut database,
            NewGoal {
                cadence: Some("day".to_string()),
                target_quantity: Some(30.0),
                unit: Some("pages".to_string()),
                ..new_goal(GoalType::Metric)
            },
            Utc::now(),
        )
        .unwrap();
        let at = utc(2025, 2, 3, 20);

        assert!(matches!(
            add_entry(&database, goal.id, at, None, Utc::now()),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            add_entry(&database, goal.id, at, Some(f64::NAN), Utc::now()),
            Err(CoreError::InvalidInput(_))
        ));

        let entry = add_entry(&database, goal.id, at, Some(12.5), Utc::now()).unwrap();
        update_entry(&database, entry.id, None, Some(31.0)).unwrap();

        let progress = goal_progress(&database, goal.id, at).unwrap();
        assert!(progress.completed);
        assert_eq!(progress.actual, 31.0);
        assert_eq!(progress.unit.as_deref(), Some("pages"));

        delete_entry(&database, entry.id).unwrap();
        assert!(matches!(delete_entry(&database, entry.id), Err(CoreError::NotFound(_))));
        assert_eq!(goal_progress(&database, goal.id, at).unwrap().actual, 0.0);
    }

    #[test]
    fn archived_and_unknown_goals_are_not_found() {
        let (_dir, mut database) = open();
        let goal = create_goal(&mut database, new_goal(GoalType::OneTime), Utc::now()).unwrap();

        archive_goal(&database, goal.id, Utc::now()).unwrap();
        assert!(matches!(goal_progress(&database, goal.id, Utc::now()), Err(CoreError::NotFound(_))));
        assert!(matches!(goal_progress(&database, 999, Utc::now()), Err(CoreError::NotFound(_))));
        assert!(list_goals(&database, "u1").unwrap().is_empty());
    }

    #[test]
    fn one_time_completion_round_trips() {
        let (_dir, mut database) = open();
        let goal = create_goal(&mut database, new_goal(GoalType::OneTime), Utc::now()).unwrap();

        let done = set_one_time_completed(&database, goal.id, true, Utc::now()).unwrap();
        assert!(matches!(done.kind, GoalKind::OneTime { completed: true, completed_at: Some(_), .. }));
        assert!(goal_progress(&database, goal.id, Utc::now()).unwrap().completed);

        let undone = set_one_time_completed(&database, goal.id, false, Utc::now()).unwrap();
        assert!(matches!(undone.kind, GoalKind::OneTime { completed: false, completed_at: None, .. }));
    }

    #[test]
    fn milestone_progress_follows_toggles() {
        let (_dir, mut database) = open();
        let goal = create_goal(
            &mut database,
            NewGoal {
                milestones: vec!["read".to_string(), "discuss".to_string()],
                ..new_goal(GoalType::Milestone)
            },
            Utc::now(),
        )
        .unwrap();
        let GoalKind::Milestone { milestones } = &goal.kind else {
            panic!("expected milestone goal");
        };

        let toggled = toggle_milestone(&database, milestones[0].id, true, Utc::now()).unwrap();
        assert!(toggled.done && toggled.done_at.is_some());
        let progress = goal_progress(&database, goal.id, Utc::now()).unwrap();
        assert!(!progress.completed);
        assert_eq!((progress.actual, progress.target), (1.0, 2.0));

        toggle_milestone(&database, milestones[1].id, true, Utc::now()).unwrap();
        assert!(goal_progress(&database, goal.id, Utc::now()).unwrap().completed);

        assert!(matches!(
            reorder_milestones(&mut database, goal.id, &[milestones[0].id]),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            set_one_time_completed(&database, goal.id, true, Utc::now()),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn list_entries_rejects_inverted_range() {
        let (_dir, mut database) = open();
        let goal = create_goal(
            &mut database,
            NewGoal {
                cadence: Some("month".to_string()),
                target_count: Some(4),
                ..new_goal(GoalType::Habit)
            },
            Utc::now(),
        )
        .unwrap();

        let result = list_entries(&database, goal.id, Some(utc(2025, 3, 2, 0)), Some(utc(2025, 3, 1, 0)));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }
}
