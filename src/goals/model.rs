use crate::error::{CoreError, CoreResult};
use crate::goals::period::Cadence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Habit,
    Metric,
    Milestone,
    OneTime,
}

impl GoalType {
    pub fn as_str(self) -> &'static str {
        match self {
            GoalType::Habit => "habit",
            GoalType::Metric => "metric",
            GoalType::Milestone => "milestone",
            GoalType::OneTime => "one_time",
        }
    }

    pub fn parse(raw: &str) -> CoreResult<Self> {
        match raw {
            "habit" => Ok(GoalType::Habit),
            "metric" => Ok(GoalType::Metric),
            "milestone" => Ok(GoalType::Milestone),
            "one_time" => Ok(GoalType::OneTime),
            _ => Err(CoreError::InvalidGoal(format!("unknown goal type '{raw}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    Count,
    Sum,
}

impl Measure {
    pub fn as_str(self) -> &'static str {
        match self {
            Measure::Count => "count",
            Measure::Sum => "sum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: i64,
    pub goal_id: i64,
    pub title: String,
    pub order: i64,
    pub done: bool,
    pub done_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: i64,
    pub goal_id: i64,
    pub owner_id: String,
    pub occurred_at: DateTime<Utc>,
    pub quantity: Option<f64>,
}

/// Variant-specific goal data. Each variant only carries the fields it uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalKind {
    #[serde(rename_all = "camelCase")]
    Habit { cadence: Cadence, target_count: u32 },
    #[serde(rename_all = "camelCase")]
    Metric {
        cadence: Cadence,
        target_quantity: f64,
        unit: String,
    },
    Milestone { milestones: Vec<Milestone> },
    #[serde(rename_all = "camelCase")]
    OneTime {
        due_at: Option<DateTime<Utc>>,
        completed: bool,
        completed_at: Option<DateTime<Utc>>,
    },
}

impl GoalKind {
    pub fn goal_type(&self) -> GoalType {
        match self {
            GoalKind::Habit { .. } => GoalType::Habit,
            GoalKind::Metric { .. } => GoalType::Metric,
            GoalKind::Milestone { .. } => GoalType::Milestone,
            GoalKind::OneTime { .. } => GoalType::OneTime,
        }
    }

    pub fn measure(&self) -> Option<Measure> {
        match self {
            GoalKind::Habit { .. } => Some(Measure::Count),
            GoalKind::Metric { .. } => Some(Measure::Sum),
            GoalKind::Milestone { .. } | GoalKind::OneTime { .. } => None,
        }
    }

    pub fn cadence(&self) -> Option<Cadence> {
        match self {
            GoalKind::Habit { cadence, .. } | GoalKind::Metric { cadence, .. } => Some(*cadence),
            GoalKind::Milestone { .. } | GoalKind::OneTime { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: i64,
    pub owner_id: String,
    pub title: String,
    #[serde(flatten)]
    pub kind: GoalKind,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flat goal row as stored; decoding it enforces the per-type invariants.
#[derive(Debug, Clone)]
pub struct GoalRow {
    pub id: i64,
    pub owner_id: String,
    pub title: String,
    pub goal_type: String,
    pub measure: Option<String>,
    pub cadence: Option<String>,
    pub target_count: Option<i64>,
    pub target_quantity: Option<f64>,
    pub unit: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GoalRow {
    pub fn into_goal(self, milestones: Vec<Milestone>) -> CoreResult<Goal> {
        let goal_type = GoalType::parse(&self.goal_type)?;

        let kind = match goal_type {
            GoalType::Habit => {
                let cadence = self.required_cadence()?;
                self.expect_measure(Measure::Count)?;
                let target_count = self
                    .target_count
                    .and_then(|value| u32::try_from(value).ok())
                    .ok_or_else(|| {
                        CoreError::InvalidGoal(format!("habit goal {} has no target count", self.id))
                    })?;
                GoalKind::Habit {
                    cadence,
                    target_count,
                }
            }
            GoalType::Metric => {
                let cadence = self.required_cadence()?;
                self.expect_measure(Measure::Sum)?;
                let target_quantity = self.target_quantity.ok_or_else(|| {
                    CoreError::InvalidGoal(format!("metric goal {} has no target quantity", self.id))
                })?;
                let unit = self.unit.clone().ok_or_else(|| {
                    CoreError::InvalidGoal(format!("metric goal {} has no unit", self.id))
                })?;
                GoalKind::Metric {
                    cadence,
                    target_quantity,
                    unit,
                }
            }
            GoalType::Milestone => GoalKind::Milestone { milestones },
            GoalType::OneTime => GoalKind::OneTime {
                due_at: self.due_at,
                completed: self.completed,
                completed_at: self.completed_at,
            },
        };

        Ok(Goal {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            kind,
            archived: self.archived,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn required_cadence(&self) -> CoreResult<Cadence> {
        self.cadence
            .as_deref()
            .ok_or_else(|| {
                CoreError::InvalidGoal(format!(
                    "{} goal {} has no cadence",
                    self.goal_type, self.id
                ))
            })?
            .parse()
    }

    fn expect_measure(&self, expected: Measure) -> CoreResult<()> {
        match self.measure.as_deref() {
            Some(raw) if raw == expected.as_str() => Ok(()),
            other => Err(CoreError::InvalidGoal(format!(
                "{} goal {} has unrecognized measure {:?}",
                self.goal_type, self.id, other
            ))),
        }
    }
}

/// Input for creating a goal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGoal {
    pub owner_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    pub cadence: Option<String>,
    pub target_count: Option<u32>,
    pub target_quantity: Option<f64>,
    pub unit: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub milestones: Vec<String>,
}

/// A `NewGoal` that passed validation; ready to be written.
#[derive(Debug, Clone)]
pub struct ValidatedGoal {
    pub owner_id: String,
    pub title: String,
    pub goal_type: GoalType,
    pub measure: Option<Measure>,
    pub cadence: Option<Cadence>,
    pub target_count: Option<u32>,
    pub target_quantity: Option<f64>,
    pub unit: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub milestones: Vec<String>,
}

impl NewGoal {
    pub fn validate(self) -> CoreResult<ValidatedGoal> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(CoreError::InvalidGoal("title must not be empty".to_string()));
        }
        let owner_id = self.owner_id.trim().to_string();
        if owner_id.is_empty() {
            return Err(CoreError::InvalidGoal("owner id must not be empty".to_string()));
        }

        let cadence = self.cadence.as_deref().map(str::parse::<Cadence>).transpose()?;
        let mut validated = ValidatedGoal {
            owner_id,
            title,
            goal_type: self.goal_type,
            measure: None,
            cadence: None,
            target_count: None,
            target_quantity: None,
            unit: None,
            due_at: None,
            milestones: Vec::new(),
        };

        match self.goal_type {
            GoalType::Habit => {
                validated.cadence = Some(cadence.ok_or_else(|| {
                    CoreError::InvalidGoal("habit goals require a cadence".to_string())
                })?);
                validated.measure = Some(Measure::Count);
                validated.target_count = Some(
                    self.target_count
                        .filter(|count| *count > 0)
                        .ok_or_else(|| {
                            CoreError::InvalidGoal(
                                "habit goals require a positive targetCount".to_string(),
                            )
                        })?,
                );
            }
            GoalType::Metric => {
                validated.cadence = Some(cadence.ok_or_else(|| {
                    CoreError::InvalidGoal("metric goals require a cadence".to_string())
                })?);
                validated.measure = Some(Measure::Sum);
                validated.target_quantity = Some(
                    self.target_quantity
                        .filter(|quantity| quantity.is_finite() && *quantity > 0.0)
                        .ok_or_else(|| {
                            CoreError::InvalidGoal(
                                "metric goals require a positive targetQuantity".to_string(),
                            )
                        })?,
                );
                validated.unit = Some(
                    self.unit
                        .map(|unit| unit.trim().to_string())
                        .filter(|unit| !unit.is_empty())
                        .ok_or_else(|| {
                            CoreError::InvalidGoal("metric goals require a unit".to_string())
                        })?,
                );
            }
            GoalType::Milestone => {
                let milestones = self
                    .milestones
                    .into_iter()
                    .map(|title| title.trim().to_string())
                    .filter(|title| !title.is_empty())
                    .collect::<Vec<_>>();
                if milestones.is_empty() {
                    return Err(CoreError::InvalidGoal(
                        "milestone goals require at least one milestone".to_string(),
                    ));
                }
                validated.milestones = milestones;
            }
            GoalType::OneTime => {
                validated.due_at = self.due_at;
            }
        }

        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(goal_type: &str) -> GoalRow {
        GoalRow {
            id: 1,
            owner_id: "u1".to_string(),
            title: "Read daily".to_string(),
            goal_type: goal_type.to_string(),
            measure: Some("count".to_string()),
            cadence: Some("day".to_string()),
            target_count: Some(1),
            target_quantity: None,
            unit: None,
            due_at: None,
            completed: false,
            completed_at: None,
            archived: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn new_goal(goal_type: GoalType) -> NewGoal {
        NewGoal {
            owner_id: "u1".to_string(),
            title: "Pages".to_string(),
            goal_type,
            cadence: None,
            target_count: None,
            target_quantity: None,
            unit: None,
            due_at: None,
            milestones: Vec::new(),
        }
    }

    #[test]
    fn decodes_habit_row() {
        let goal = row("habit").into_goal(Vec::new()).expect("habit decodes");
        assert_eq!(
            goal.kind,
            GoalKind::Habit {
                cadence: Cadence::Day,
                target_count: 1
            }
        );
        assert_eq!(goal.kind.measure(), Some(Measure::Count));
    }

    #[test]
    fn habit_without_cadence_is_invalid_goal() {
        let mut habit = row("habit");
        habit.cadence = None;
        assert!(matches!(habit.into_goal(Vec::new()), Err(CoreError::InvalidGoal(_))));
    }

    #[test]
    fn unknown_cadence_literal_is_invalid_cadence() {
        let mut habit = row("habit");
        habit.cadence = Some("fortnight".to_string());
        assert!(matches!(habit.into_goal(Vec::new()), Err(CoreError::InvalidCadence(_))));
    }

    #[test]
    fn mismatched_measure_is_invalid_goal() {
        let mut metric = row("metric");
        metric.target_quantity = Some(10.0);
        metric.unit = Some("pages".to_string());
        assert!(matches!(metric.clone().into_goal(Vec::new()), Err(CoreError::InvalidGoal(_))));

        metric.measure = Some("median".to_string());
        assert!(matches!(metric.into_goal(Vec::new()), Err(CoreError::InvalidGoal(_))));
    }

    #[test]
    fn validate_derives_measure_from_type() {
        let mut metric = new_goal(GoalType::Metric);
        metric.cadence = Some("week".to_string());
        metric.target_quantity = Some(120.0);
        metric.unit = Some(" pages ".to_string());

        let validated = metric.validate().expect("metric is valid");
        assert_eq!(validated.measure, Some(Measure::Sum));
        assert_eq!(validated.cadence, Some(Cadence::Week));
        assert_eq!(validated.unit.as_deref(), Some("pages"));
    }

    #[test]
    fn validate_rejects_incomplete_goals() {
        let mut habit = new_goal(GoalType::Habit);
        habit.target_count = Some(3);
        assert!(matches!(habit.validate(), Err(CoreError::InvalidGoal(_))));

        let mut milestone = new_goal(GoalType::Milestone);
        milestone.milestones = vec!["  ".to_string()];
        assert!(matches!(milestone.validate(), Err(CoreError::InvalidGoal(_))));

        let mut bad_cadence = new_goal(GoalType::Habit);
        bad_cadence.cadence = Some("year".to_string());
        bad_cadence.target_count = Some(1);
        assert!(matches!(bad_cadence.validate(), Err(CoreError::InvalidCadence(_))));
    }
}
