//! Status transition table for progress-record events.
//!
//! | event                             | finished_count | active | finished |
//! |-----------------------------------|----------------|--------|----------|
//! | create finished                   | +1             |        | x        |
//! | create reading                    |                | x      |          |
//! | update X -> finished              | +1             | x      | x        |
//! | update finished -> Y              | -1             | x      | x        |
//! | update X -> reading, reading -> Y |                | x      |          |
//! | delete finished                   | -1             |        | x        |
//! | delete reading                    |                | x      |          |
//!
//! Creates, deletes and percentage changes additionally refresh the reader
//! count and percentage sum of the book.

use crate::progress::{ProgressSnapshot, ProgressStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsPlan {
    /// -1, 0 or +1 applied to the user's finished counter.
    pub finished_delta: i64,
    pub set_last_finished: bool,
    pub recompute_active: bool,
    pub recompute_finished: bool,
    pub recompute_readers: bool,
}

impl StatsPlan {
    pub fn touches_book(&self) -> bool {
        self.recompute_active || self.recompute_finished || self.recompute_readers
    }
}

pub fn plan(before: Option<&ProgressSnapshot>, after: Option<&ProgressSnapshot>) -> StatsPlan {
    let old = before.map(|snapshot| snapshot.status);
    let new = after.map(|snapshot| snapshot.status);

    let was_finished = old == Some(ProgressStatus::Finished);
    let is_finished = new == Some(ProgressStatus::Finished);
    let finished_delta = match (was_finished, is_finished) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    };

    let (recompute_active, recompute_finished) = match (old, new) {
        (None, None) => (false, false),
        (None, Some(status)) | (Some(status), None) => (
            status == ProgressStatus::Reading,
            status == ProgressStatus::Finished,
        ),
        (Some(old), Some(new)) if old == new => (false, false),
        (Some(old), Some(new)) => {
            let finished_side = old == ProgressStatus::Finished || new == ProgressStatus::Finished;
            let reading_side = old == ProgressStatus::Reading || new == ProgressStatus::Reading;
            (finished_side || reading_side, finished_side)
        }
    };

    let percent_changed = match (before, after) {
        (Some(before), Some(after)) => before.percent_complete != after.percent_complete,
        (None, None) => false,
        _ => true,
    };

    StatsPlan {
        finished_delta,
        set_last_finished: finished_delta > 0,
        recompute_active,
        recompute_finished,
        recompute_readers: percent_changed || before.is_none() != after.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Privacy;
    use chrono::Utc;

    fn snapshot(status: ProgressStatus, percent: Option<f64>) -> ProgressSnapshot {
        ProgressSnapshot {
            user_id: "u1".to_string(),
            book_id: 7,
            status,
            percent_complete: percent,
            privacy: Privacy::Public,
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
        }
    }

    fn status_plan(before: Option<ProgressStatus>, after: Option<ProgressStatus>) -> StatsPlan {
        let before = before.map(|status| snapshot(status, Some(50.0)));
        let after = after.map(|status| snapshot(status, Some(50.0)));
        plan(before.as_ref(), after.as_ref())
    }

    use ProgressStatus::{Finished, NotStarted, Reading};

    #[test]
    fn create_finished_counts_and_refreshes_finished_readers() {
        let plan = status_plan(None, Some(Finished));
        assert_eq!(plan.finished_delta, 1);
        assert!(plan.set_last_finished);
        assert!(!plan.recompute_active);
        assert!(plan.recompute_finished);
    }

    #[test]
    fn create_reading_refreshes_active_readers() {
        let plan = status_plan(None, Some(Reading));
        assert_eq!(plan.finished_delta, 0);
        assert!(plan.recompute_active);
        assert!(!plan.recompute_finished);
    }

    #[test]
    fn create_not_started_only_refreshes_reader_count() {
        let plan = status_plan(None, Some(NotStarted));
        assert_eq!(plan.finished_delta, 0);
        assert!(!plan.recompute_active && !plan.recompute_finished);
        assert!(plan.recompute_readers);
        assert!(plan.touches_book());
    }

    #[test]
    fn update_into_finished_refreshes_both_counters() {
        for from in [NotStarted, Reading] {
            let plan = status_plan(Some(from), Some(Finished));
            assert_eq!(plan.finished_delta, 1, "{from:?}");
            assert!(plan.set_last_finished);
            assert!(plan.recompute_active && plan.recompute_finished);
        }
    }

    #[test]
    fn update_out_of_finished_decrements() {
        for to in [NotStarted, Reading] {
            let plan = status_plan(Some(Finished), Some(to));
            assert_eq!(plan.finished_delta, -1, "{to:?}");
            assert!(!plan.set_last_finished);
            assert!(plan.recompute_active && plan.recompute_finished);
        }
    }

    #[test]
    fn update_touching_reading_refreshes_active_only() {
        for (from, to) in [(NotStarted, Reading), (Reading, NotStarted)] {
            let plan = status_plan(Some(from), Some(to));
            assert_eq!(plan.finished_delta, 0);
            assert!(plan.recompute_active);
            assert!(!plan.recompute_finished);
        }
    }

    #[test]
    fn delete_mirrors_create() {
        let finished = status_plan(Some(Finished), None);
        assert_eq!(finished.finished_delta, -1);
        assert!(finished.recompute_finished && !finished.recompute_active);
        assert!(finished.recompute_readers);

        let reading = status_plan(Some(Reading), None);
        assert_eq!(reading.finished_delta, 0);
        assert!(reading.recompute_active && !reading.recompute_finished);
    }

    #[test]
    fn unchanged_status_only_reacts_to_percentage() {
        let same = status_plan(Some(Reading), Some(Reading));
        assert_eq!(same, StatsPlan::default());
        assert!(!same.touches_book());

        let before = snapshot(Reading, Some(20.0));
        let after = snapshot(Reading, Some(35.0));
        let moved = plan(Some(&before), Some(&after));
        assert_eq!(moved.finished_delta, 0);
        assert!(moved.recompute_readers);
        assert!(moved.touches_book());
    }

    #[test]
    fn empty_event_is_a_no_op() {
        assert_eq!(plan(None, None), StatsPlan::default());
    }
}
