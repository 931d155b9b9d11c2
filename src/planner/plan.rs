//! Scale plan types and construction.
//!
//! This module turns a [`UnitDiff`] into concrete create and delete actions,
//! rendering the manifest of every unit to create.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::UnitTemplate;
use crate::error::Result;
use crate::model::{
    Container, Instance, MEMBERSHIP_LABEL, ObjectKey, ObjectMeta, OwnerReference, Unit, UnitSpec,
};

use super::diff::{ScaleDecision, UnitDiff};

/// A complete scale plan for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct ScalePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Instance the plan applies to.
    pub instance: ObjectKey,
    /// Decision the plan implements.
    pub decision: ScaleDecision,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
    /// Names held by observed units or claimed by planned creates.
    #[serde(skip)]
    pub reserved_names: BTreeSet<String>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Unit the action applies to.
    pub unit: ObjectKey,
    /// Reason for this action.
    pub reason: String,
    /// Manifest to submit (creates only).
    #[serde(skip)]
    pub manifest: Option<Unit>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new unit.
    CreateUnit,
    /// Delete an existing unit.
    DeleteUnit,
}

impl ScalePlan {
    /// Creates a new plan from a diff.
    ///
    /// # Errors
    ///
    /// Returns an error if units must be created but the instance has no uid
    /// to link them to.
    pub fn from_diff(diff: &UnitDiff, instance: &Instance, template: &UnitTemplate) -> Result<Self> {
        let key = instance.key();
        let mut actions = Vec::with_capacity(diff.to_create.len() + diff.to_delete.len());

        if !diff.to_create.is_empty() {
            let owner = instance.controller_reference()?;
            let reason = format!("desired size {} above {} live", diff.desired, diff.live.len());
            for name in &diff.to_create {
                let manifest = render_unit(&key.sibling(name.as_str()), instance.name(), &owner, template);
                actions.push(PlannedAction {
                    action_type: ActionType::CreateUnit,
                    unit: manifest.key(),
                    reason: reason.clone(),
                    manifest: Some(manifest),
                });
            }
        }

        let reason = format!("desired size {} below {} live", diff.desired, diff.live.len());
        for name in &diff.to_delete {
            actions.push(PlannedAction {
                action_type: ActionType::DeleteUnit,
                unit: key.sibling(name.as_str()),
                reason: reason.clone(),
                manifest: None,
            });
        }

        let reserved_names = diff
            .live
            .iter()
            .chain(&diff.terminating)
            .chain(&diff.to_create)
            .cloned()
            .collect();

        Ok(Self {
            created_at: Utc::now(),
            instance: key,
            decision: diff.decision,
            actions,
            reserved_names,
        })
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == ActionType::CreateUnit)
            .count()
    }

    /// Returns the number of delete actions.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == ActionType::DeleteUnit)
            .count()
    }
}

/// Renders the manifest of a unit owned by `instance`.
fn render_unit(key: &ObjectKey, instance: &str, owner: &OwnerReference, template: &UnitTemplate) -> Unit {
    let mut metadata = ObjectMeta::named(key);
    metadata
        .labels
        .insert(MEMBERSHIP_LABEL.to_string(), instance.to_string());
    metadata.owner_references.push(owner.clone());

    Unit::new(
        metadata,
        UnitSpec {
            containers: vec![Container {
                name: template.container_name.clone(),
                image: template.image.clone(),
                command: template.command.clone(),
            }],
        },
    )
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::CreateUnit => format!("Create unit '{}'", self.unit.name),
            ActionType::DeleteUnit => format!("Delete unit '{}'", self.unit.name),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateUnit => "create",
            Self::DeleteUnit => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.unit.name)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ScalePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required for {}", self.instance);
        }

        writeln!(f, "Scale plan for {} ({}):", self.instance, self.decision)?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DiffEngine;

    fn instance(size: u32) -> Instance {
        let mut instance = Instance::new(&ObjectKey::new("default", "app"), size);
        instance.metadata.uid = Some(String::from("uid-1"));
        instance
    }

    #[test]
    fn test_create_actions_carry_ownership() {
        let instance = instance(2);
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        assert_eq!(plan.create_count(), 2);
        let manifest = plan.actions[0].manifest.as_ref().unwrap();
        assert_eq!(manifest.name(), "app-pod-0");
        assert_eq!(manifest.member_of(), Some("app"));

        let owner = manifest.metadata.controller_ref().unwrap();
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.name, "app");
        assert!(owner.block_owner_deletion);

        let container = &manifest.spec.containers[0];
        assert_eq!(container.image, "busybox");
        assert_eq!(container.command, vec!["sleep", "3600"]);
    }

    #[test]
    fn test_missing_uid_fails_only_on_create() {
        let mut instance = instance(1);
        instance.metadata.uid = None;
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        assert!(ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).is_err());

        instance.spec.size = 0;
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_display() {
        let instance = instance(1);
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        let text = plan.to_string();
        assert!(text.contains("grow by 1"));
        assert!(text.contains("create app-pod-0"));
    }
}
