// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for nautilus-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of the
//! default merger, the condition tracker and toleration validation.

#[path = "../common/mod.rs"]
mod common;

use std::cell::Cell;

use k8s_openapi::api::core::v1::Toleration;
use proptest::prelude::*;

use common::NautilusClusterBuilder;
use nautilus_operator::controller::status::{Clock, upsert_condition};
use nautilus_operator::controller::validation::{ValidationError, validate_tolerations};
use nautilus_operator::crd::{
    ClusterCondition, ClusterConditionType, ConditionStatus, DefaultingConfig, WithDefaults,
};

/// Clock returning a fresh timestamp on every read.
struct CountingClock {
    ticks: Cell<u64>,
}

impl Clock for CountingClock {
    fn now(&self) -> String {
        let t = self.ticks.get() + 1;
        self.ticks.set(t);
        format!("t{t}")
    }
}

fn any_condition_type() -> impl Strategy<Value = ClusterConditionType> {
    prop_oneof![
        Just(ClusterConditionType::PodsReady),
        Just(ClusterConditionType::Upgrading),
    ]
}

fn any_condition_status() -> impl Strategy<Value = ConditionStatus> {
    prop_oneof![
        Just(ConditionStatus::True),
        Just(ConditionStatus::False),
        Just(ConditionStatus::Unknown),
    ]
}

fn any_condition() -> impl Strategy<Value = ClusterCondition> {
    (
        any_condition_type(),
        any_condition_status(),
        "[A-Za-z]{0,8}",
        "[a-z ]{0,12}",
    )
        .prop_map(|(t, s, reason, message)| ClusterCondition::new(t, s, &reason, &message))
}

fn any_toleration() -> impl Strategy<Value = Toleration> {
    (
        "[a-z]{1,6}",
        prop_oneof![Just("Exists"), Just("Equal")],
        prop_oneof![Just(String::new()), "[a-z]{1,6}"],
    )
        .prop_map(|(key, op, value)| Toleration {
            key: Some(key),
            operator: Some(op.to_string()),
            value: Some(value),
            ..Default::default()
        })
}

proptest! {
    /// A second defaulting pass never changes anything.
    #[test]
    fn test_defaulting_is_idempotent(
        bookies in -5..20i32,
        nodes in -5..20i32,
        controllers in -5..20i32,
        test_mode in any::<bool>(),
        with_options in any::<bool>(),
    ) {
        let mut builder = NautilusClusterBuilder::new("example")
            .bookies(bookies)
            .nodes(nodes)
            .controllers(controllers);
        if with_options {
            builder = builder.bookkeeper_option("journalMaxSizeMB", "2048");
        }
        let mut cluster = builder.build();
        let config = if test_mode {
            DefaultingConfig::test_mode()
        } else {
            DefaultingConfig::default()
        };

        cluster.spec.with_defaults(&config);
        let snapshot = cluster.spec.clone();
        prop_assert!(!cluster.spec.with_defaults(&config));
        prop_assert_eq!(cluster.spec, snapshot);
    }

    /// Minimums are enforced unless test mode relaxes them.
    #[test]
    fn test_bookie_minimum(bookies in 0..10i32) {
        let mut cluster = NautilusClusterBuilder::new("example").bookies(bookies).build();
        cluster.spec.with_defaults(&DefaultingConfig::default());
        let replicas = cluster.spec.bookkeeper.unwrap().replicas;
        prop_assert_eq!(replicas, bookies.max(3));
    }

    /// Any sequence of upserts leaves at most one entry per type.
    #[test]
    fn test_condition_types_stay_unique(
        updates in proptest::collection::vec(any_condition(), 0..30)
    ) {
        let clock = CountingClock { ticks: Cell::new(0) };
        let mut conditions = Vec::new();
        for update in updates {
            upsert_condition(&mut conditions, update, &clock);
        }

        prop_assert!(conditions.len() <= 2);
        let pods_ready = conditions
            .iter()
            .filter(|c| c.r#type == ClusterConditionType::PodsReady)
            .count();
        prop_assert!(pods_ready <= 1);
    }

    /// The transition time moves exactly when the status changes.
    #[test]
    fn test_transition_time_tracks_status(
        first in any_condition(),
        second in any_condition(),
    ) {
        let clock = CountingClock { ticks: Cell::new(0) };
        let mut conditions = vec![first.clone()];
        let changed = upsert_condition(&mut conditions, second.clone(), &clock);

        if first.r#type != second.r#type {
            prop_assert!(changed);
            prop_assert_eq!(conditions.len(), 2);
            prop_assert_eq!(&conditions[1], &second);
            return Ok(());
        }

        let updated = &conditions[0];
        prop_assert_eq!(updated.status, second.status);
        prop_assert_eq!(&updated.reason, &second.reason);
        if first.status == second.status {
            prop_assert_eq!(&updated.last_transition_time, &first.last_transition_time);
        } else {
            prop_assert!(!updated.last_transition_time.is_empty());
            prop_assert_ne!(&updated.last_transition_time, &first.last_transition_time);
        }
        let same = first.status == second.status
            && first.reason == second.reason
            && first.message == second.message;
        prop_assert_eq!(changed, !same);
    }

    /// Toleration validation fails exactly for Exists with a non-empty value.
    #[test]
    fn test_toleration_validation(
        tolerations in proptest::collection::vec(any_toleration(), 0..6)
    ) {
        let first_bad = tolerations.iter().find(|t| {
            t.operator.as_deref() == Some("Exists")
                && t.value.as_deref().is_some_and(|v| !v.is_empty())
        });

        match (validate_tolerations(&tolerations), first_bad) {
            (Ok(()), None) => {}
            (Err(ValidationError::TolerationValue { key }), Some(bad)) => {
                prop_assert_eq!(Some(key), bad.key.clone());
            }
            (result, bad) => {
                prop_assert!(false, "unexpected outcome {:?} for {:?}", result, bad);
            }
        }
    }
}
