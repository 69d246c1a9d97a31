//! Status management utilities.
//!
//! Condition bookkeeping for `ClusterStatus`: conditions are keyed by type,
//! at most one entry exists per type, and timestamps only move when the
//! entry actually changes.

use crate::crd::{ClusterCondition, ClusterConditionType, ClusterStatus, ConditionStatus};

/// Source of the current time for condition timestamps.
pub trait Clock {
    /// Current time formatted as an RFC 3339 timestamp.
    fn now(&self) -> String;
}

/// Wall-clock time in UTC, second precision.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        jiff::Timestamp::now()
            .strftime("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    }
}

/// Insert or update a condition, keyed by its type.
///
/// - No entry of that type: the candidate is appended as-is.
/// - Status differs: status, transition and update times change.
/// - Reason or message differs: both are replaced and the update time changes.
///
/// Returns `true` when the list was modified.
pub fn upsert_condition(
    conditions: &mut Vec<ClusterCondition>,
    new_condition: ClusterCondition,
    clock: &dyn Clock,
) -> bool {
    let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == new_condition.r#type)
    else {
        conditions.push(new_condition);
        return true;
    };

    let status_changed = existing.status != new_condition.status;
    let details_changed =
        existing.reason != new_condition.reason || existing.message != new_condition.message;
    if !status_changed && !details_changed {
        return false;
    }

    let now = clock.now();
    if status_changed {
        existing.status = new_condition.status;
        existing.last_transition_time = now.clone();
    }
    if details_changed {
        existing.reason = new_condition.reason;
        existing.message = new_condition.message;
    }
    existing.last_update_time = now;
    true
}

impl ClusterStatus {
    /// Look up a condition and its position by type.
    pub fn get_condition(
        &self,
        condition_type: ClusterConditionType,
    ) -> Option<(usize, &ClusterCondition)> {
        self.conditions
            .iter()
            .enumerate()
            .find(|(_, c)| c.r#type == condition_type)
    }

    /// Insert or update a condition. See [`upsert_condition`].
    pub fn set_condition(&mut self, condition: ClusterCondition, clock: &dyn Clock) -> bool {
        upsert_condition(&mut self.conditions, condition, clock)
    }

    /// Set a condition to True with empty reason and message.
    pub fn set_condition_true(
        &mut self,
        condition_type: ClusterConditionType,
        clock: &dyn Clock,
    ) -> bool {
        self.set_condition(
            ClusterCondition::new(condition_type, ConditionStatus::True, "", ""),
            clock,
        )
    }

    /// Set a condition to False with empty reason and message.
    pub fn set_condition_false(
        &mut self,
        condition_type: ClusterConditionType,
        clock: &dyn Clock,
    ) -> bool {
        self.set_condition(
            ClusterCondition::new(condition_type, ConditionStatus::False, "", ""),
            clock,
        )
    }

    pub fn set_pods_ready_condition_true(&mut self, clock: &dyn Clock) -> bool {
        self.set_condition_true(ClusterConditionType::PodsReady, clock)
    }

    pub fn set_pods_ready_condition_false(&mut self, clock: &dyn Clock) -> bool {
        self.set_condition_false(ClusterConditionType::PodsReady, clock)
    }
}

/// Check if a condition type is true
pub fn is_condition_true(
    conditions: &[ClusterCondition],
    condition_type: ClusterConditionType,
) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == ConditionStatus::True)
}

/// Get the reason for a condition
pub fn get_condition_reason(
    conditions: &[ClusterCondition],
    condition_type: ClusterConditionType,
) -> Option<&str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Clock returning "t1", "t2", ... on successive calls.
    struct TickingClock(Cell<u32>);

    impl TickingClock {
        fn new() -> Self {
            Self(Cell::new(0))
        }
    }

    impl Clock for TickingClock {
        fn now(&self) -> String {
            self.0.set(self.0.get() + 1);
            format!("t{}", self.0.get())
        }
    }

    #[test]
    fn test_append_leaves_timestamps_blank() {
        let clock = TickingClock::new();
        let mut status = ClusterStatus::default();

        assert!(status.set_pods_ready_condition_true(&clock));
        assert_eq!(status.conditions.len(), 1);
        let condition = &status.conditions[0];
        assert_eq!(condition.status, ConditionStatus::True);
        assert!(condition.last_update_time.is_empty());
        assert!(condition.last_transition_time.is_empty());
    }

    #[test]
    fn test_set_true_twice_then_false() {
        let clock = TickingClock::new();
        let mut status = ClusterStatus::default();

        status.set_pods_ready_condition_true(&clock);
        let before = status.conditions[0].clone();

        assert!(!status.set_pods_ready_condition_true(&clock));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0], before);

        assert!(status.set_pods_ready_condition_false(&clock));
        assert_eq!(status.conditions.len(), 1);
        let after = &status.conditions[0];
        assert_eq!(after.status, ConditionStatus::False);
        assert_eq!(after.last_transition_time, "t1");
        assert_eq!(after.last_update_time, "t1");
    }

    #[test]
    fn test_reason_change_only_moves_update_time() {
        let clock = TickingClock::new();
        let mut status = ClusterStatus::default();
        status.set_pods_ready_condition_true(&clock);
        status.set_pods_ready_condition_false(&clock);
        let transition = status.conditions[0].last_transition_time.clone();

        let changed = status.set_condition(
            ClusterCondition::new(
                ClusterConditionType::PodsReady,
                ConditionStatus::False,
                "PodsNotReady",
                "2/3 pods ready",
            ),
            &clock,
        );

        assert!(changed);
        let condition = &status.conditions[0];
        assert_eq!(condition.reason, "PodsNotReady");
        assert_eq!(condition.message, "2/3 pods ready");
        assert_eq!(condition.last_transition_time, transition);
        assert_eq!(condition.last_update_time, "t2");
    }

    #[test]
    fn test_status_and_reason_change_together() {
        let clock = TickingClock::new();
        let mut conditions = vec![ClusterCondition::new(
            ClusterConditionType::PodsReady,
            ConditionStatus::True,
            "",
            "",
        )];

        let changed = upsert_condition(
            &mut conditions,
            ClusterCondition::new(
                ClusterConditionType::PodsReady,
                ConditionStatus::False,
                "PodsNotReady",
                "",
            ),
            &clock,
        );

        assert!(changed);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].reason, "PodsNotReady");
        assert!(!conditions[0].last_transition_time.is_empty());
        assert!(!conditions[0].last_update_time.is_empty());
    }

    #[test]
    fn test_distinct_types_are_kept_in_order() {
        let clock = TickingClock::new();
        let mut status = ClusterStatus::default();
        status.set_condition_true(ClusterConditionType::Upgrading, &clock);
        status.set_pods_ready_condition_false(&clock);
        status.set_condition_false(ClusterConditionType::Upgrading, &clock);

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].r#type, ClusterConditionType::Upgrading);
        assert_eq!(status.conditions[1].r#type, ClusterConditionType::PodsReady);

        let (index, condition) = status.get_condition(ClusterConditionType::PodsReady).unwrap();
        assert_eq!(index, 1);
        assert_eq!(condition.status, ConditionStatus::False);
    }

    #[test]
    fn test_condition_queries() {
        let clock = TickingClock::new();
        let mut status = ClusterStatus::default();
        assert!(!is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));

        status.set_condition(
            ClusterCondition::new(
                ClusterConditionType::PodsReady,
                ConditionStatus::True,
                "AllPodsReady",
                "",
            ),
            &clock,
        );
        assert!(is_condition_true(
            &status.conditions,
            ClusterConditionType::PodsReady
        ));
        assert_eq!(
            get_condition_reason(&status.conditions, ClusterConditionType::PodsReady),
            Some("AllPodsReady")
        );
        assert_eq!(
            get_condition_reason(&status.conditions, ClusterConditionType::Upgrading),
            None
        );
    }

    #[test]
    fn test_system_clock_format() {
        let now = SystemClock.now();
        assert_eq!(now.len(), "2024-01-01T00:00:00Z".len());
        assert!(now.ends_with('Z'));
        assert!(now.parse::<jiff::Timestamp>().is_ok());
    }
}
