//! Diff engine for comparing desired vs observed unit counts.
//!
//! This module decides whether an instance must grow, shrink or stay as it is,
//! and names exactly which units to add or remove.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::model::{Instance, Unit, unit_index, unit_name};

/// Engine for computing diffs between desired and observed states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// The corrective action for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ScaleDecision {
    /// Create `count` units.
    Grow {
        /// Number of units to create.
        count: u32,
    },
    /// Delete `count` units.
    Shrink {
        /// Number of units to delete.
        count: u32,
    },
    /// Nothing to do.
    #[serde(rename = "none")]
    NoOp,
}

/// Complete diff for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitDiff {
    /// Desired number of units.
    pub desired: u32,
    /// The decision.
    pub decision: ScaleDecision,
    /// Names of live units, in index order.
    pub live: Vec<String>,
    /// Names of terminating units.
    pub terminating: Vec<String>,
    /// Names to create, in creation order.
    pub to_create: Vec<String>,
    /// Names to delete, in deletion order.
    pub to_delete: Vec<String>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decides how to move from `current` units to `desired` units.
    #[must_use]
    pub const fn decide(desired: u32, current: u32) -> ScaleDecision {
        if current < desired {
            ScaleDecision::Grow {
                count: desired - current,
            }
        } else if current > desired {
            ScaleDecision::Shrink {
                count: current - desired,
            }
        } else {
            ScaleDecision::NoOp
        }
    }

    /// Orders the live units of `instance`: canonical names by ascending
    /// index first, then every other name alphabetically.
    #[must_use]
    pub fn order_live(instance: &str, units: &[Unit]) -> Vec<String> {
        let mut live: Vec<(Option<u32>, &str)> = units
            .iter()
            .filter(|u| u.is_live())
            .map(|u| (unit_index(instance, u.name()), u.name()))
            .collect();

        live.sort_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.1.cmp(b.1),
        });

        live.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    /// Computes the diff between the instance's desired size and its units.
    #[must_use]
    pub fn compute_diff(&self, instance: &Instance, observed: &[Unit]) -> UnitDiff {
        let name = instance.name();
        let desired = instance.desired_size();
        let live = Self::order_live(name, observed);
        let terminating: Vec<String> = observed
            .iter()
            .filter(|u| !u.is_live())
            .map(|u| u.name().to_string())
            .collect();

        let current = u32::try_from(live.len()).unwrap_or(u32::MAX);
        let decision = Self::decide(desired, current);

        let (to_create, to_delete) = match decision {
            ScaleDecision::Grow { count } => {
                let taken: BTreeSet<&str> = observed.iter().map(Unit::name).collect();
                (allocate_names(name, current, count, &taken), Vec::new())
            }
            ScaleDecision::Shrink { count } => {
                let excess = live.iter().rev().take(count as usize).cloned().collect();
                (Vec::new(), excess)
            }
            ScaleDecision::NoOp => (Vec::new(), Vec::new()),
        };

        debug!(
            "Diff for {}: desired={desired} live={current} terminating={} -> {decision}",
            instance.key(),
            terminating.len()
        );

        UnitDiff {
            desired,
            decision,
            live,
            terminating,
            to_create,
            to_delete,
        }
    }
}

/// Allocates `count` canonical names starting at index `start`, skipping any
/// name already in `taken`.
fn allocate_names(instance: &str, start: u32, count: u32, taken: &BTreeSet<&str>) -> Vec<String> {
    let mut names = Vec::with_capacity(count as usize);
    let mut index = start;
    while names.len() < count as usize {
        let candidate = unit_name(instance, index);
        if !taken.contains(candidate.as_str()) {
            names.push(candidate);
        }
        match index.checked_add(1) {
            Some(next) => index = next,
            None => break,
        }
    }
    names
}

impl UnitDiff {
    /// Returns true if no action is needed.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        matches!(self.decision, ScaleDecision::NoOp)
    }
}

impl fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grow { count } => write!(f, "grow by {count}"),
            Self::Shrink { count } => write!(f, "shrink by {count}"),
            Self::NoOp => write!(f, "no change"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MEMBERSHIP_LABEL, ObjectKey, ObjectMeta, UnitSpec};
    use chrono::Utc;

    fn instance(size: u32) -> Instance {
        let mut instance = Instance::new(&ObjectKey::new("default", "app"), size);
        instance.metadata.uid = Some(String::from("uid-1"));
        instance
    }

    fn unit(name: &str) -> Unit {
        let mut metadata = ObjectMeta::named(&ObjectKey::new("default", name));
        metadata
            .labels
            .insert(MEMBERSHIP_LABEL.to_string(), String::from("app"));
        Unit::new(metadata, UnitSpec::default())
    }

    fn terminating(name: &str) -> Unit {
        let mut unit = unit(name);
        unit.metadata.deletion_timestamp = Some(Utc::now());
        unit
    }

    #[test]
    fn test_decide() {
        assert_eq!(DiffEngine::decide(3, 0), ScaleDecision::Grow { count: 3 });
        assert_eq!(DiffEngine::decide(1, 3), ScaleDecision::Shrink { count: 2 });
        assert_eq!(DiffEngine::decide(2, 2), ScaleDecision::NoOp);
        assert_eq!(DiffEngine::decide(0, 0), ScaleDecision::NoOp);
    }

    #[test]
    fn test_grow_from_empty() {
        let diff = DiffEngine::new().compute_diff(&instance(3), &[]);

        assert_eq!(diff.decision, ScaleDecision::Grow { count: 3 });
        assert_eq!(diff.to_create, vec!["app-pod-0", "app-pod-1", "app-pod-2"]);
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn test_shrink_takes_highest_indices() {
        let observed = [unit("app-pod-1"), unit("app-pod-0"), unit("app-pod-2")];
        let diff = DiffEngine::new().compute_diff(&instance(1), &observed);

        assert_eq!(diff.decision, ScaleDecision::Shrink { count: 2 });
        assert_eq!(diff.to_delete, vec!["app-pod-2", "app-pod-1"]);
    }

    #[test]
    fn test_shrink_prefers_unindexed_units() {
        let observed = [unit("app-pod-0"), unit("app-pod-1"), unit("app-pod-01"), unit("app-manual")];
        let diff = DiffEngine::new().compute_diff(&instance(2), &observed);

        assert_eq!(diff.live, vec!["app-pod-0", "app-pod-1", "app-manual", "app-pod-01"]);
        assert_eq!(diff.to_delete, vec!["app-pod-01", "app-manual"]);
    }

    #[test]
    fn test_grow_skips_taken_names() {
        // app-pod-0 was deleted out of band; app-pod-1 and app-pod-2 remain.
        let observed = [unit("app-pod-1"), unit("app-pod-2")];
        let diff = DiffEngine::new().compute_diff(&instance(3), &observed);

        assert_eq!(diff.decision, ScaleDecision::Grow { count: 1 });
        assert_eq!(diff.to_create, vec!["app-pod-3"]);
    }

    #[test]
    fn test_terminating_units_not_counted() {
        let observed = [unit("app-pod-0"), terminating("app-pod-1")];
        let diff = DiffEngine::new().compute_diff(&instance(2), &observed);

        assert_eq!(diff.live, vec!["app-pod-0"]);
        assert_eq!(diff.terminating, vec!["app-pod-1"]);
        assert_eq!(diff.to_create, vec!["app-pod-2"]);
    }

    #[test]
    fn test_converged() {
        let observed = [unit("app-pod-0"), unit("app-pod-1")];
        let diff = DiffEngine::new().compute_diff(&instance(2), &observed);

        assert!(diff.is_converged());
        assert!(diff.to_create.is_empty());
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn test_shrink_to_zero() {
        let observed = [unit("app-pod-0"), unit("app-pod-1")];
        let diff = DiffEngine::new().compute_diff(&instance(0), &observed);

        assert_eq!(diff.to_delete, vec!["app-pod-1", "app-pod-0"]);
    }
}
