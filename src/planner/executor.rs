//! Plan executor for applying scale plans.
//!
//! Actions run one at a time in plan order. The first failure aborts the
//! rest of the batch; the next reconciliation pass recomputes what is left.
//! A create whose name is held by an object outside the instance moves on to
//! the next free index within the same pass.

use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::error::{OperatorError, ReconcileError};
use crate::model::{Unit, unit_name};
use crate::store::UnitStore;

use super::plan::{ActionType, PlannedAction, ScalePlan};

/// Names tried per create before an `AlreadyExists` is surfaced.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Executor for scale plans.
#[derive(Debug)]
pub struct PlanExecutor<'a, U: UnitStore + ?Sized> {
    /// Unit store to act on.
    store: &'a U,
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Units created.
    pub created: Vec<String>,
    /// Units deleted, including ones that were already gone.
    pub deleted: Vec<String>,
    /// Actions not attempted because an earlier action failed.
    pub skipped: usize,
    /// The failure that aborted the batch.
    pub error: Option<OperatorError>,
}

impl ExecutionResult {
    /// Returns true if every action succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.error.is_none()
    }
}

impl<'a, U: UnitStore + ?Sized> PlanExecutor<'a, U> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(store: &'a U) -> Self {
        Self { store }
    }

    /// Executes a scale plan.
    pub async fn execute(&self, plan: &ScalePlan) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        if plan.is_empty() {
            return result;
        }

        info!(
            "Executing scale plan for {} with {} actions",
            plan.instance,
            plan.actions.len()
        );

        let mut reserved = plan.reserved_names.clone();
        for (idx, action) in plan.actions.iter().enumerate() {
            if let Err(e) = self
                .execute_action(action, &plan.instance.name, &mut reserved, &mut result)
                .await
            {
                let skipped = plan.actions.len() - idx - 1;
                warn!(
                    "{} failed, skipping {skipped} remaining actions: {e}",
                    action.description()
                );
                result.skipped = skipped;
                result.error = Some(e);
                break;
            }
        }

        result
    }

    async fn execute_action(
        &self,
        action: &PlannedAction,
        instance: &str,
        reserved: &mut BTreeSet<String>,
        result: &mut ExecutionResult,
    ) -> Result<(), OperatorError> {
        match action.action_type {
            ActionType::CreateUnit => {
                let Some(manifest) = &action.manifest else {
                    return Err(ReconcileError::ActionFailed {
                        action: action.action_type.to_string(),
                        unit: action.unit.name.clone(),
                        reason: String::from("missing unit manifest"),
                    }
                    .into());
                };
                let name = self.create_unit(manifest, instance, reserved).await?;
                result.created.push(name);
            }
            ActionType::DeleteUnit => match self.store.delete(&action.unit).await {
                Ok(()) => {
                    info!("Deleted unit {}", action.unit);
                    result.deleted.push(action.unit.name.clone());
                }
                Err(e) if e.is_not_found() => {
                    info!("Unit {} already gone", action.unit);
                    result.deleted.push(action.unit.name.clone());
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    async fn create_unit(
        &self,
        manifest: &Unit,
        instance: &str,
        reserved: &mut BTreeSet<String>,
    ) -> Result<String, OperatorError> {
        let mut unit = manifest.clone();
        let mut attempts = 1;

        loop {
            match self.store.create(&unit).await {
                Ok(()) => {
                    info!("Created unit {}", unit.key());
                    return Ok(unit.name().to_string());
                }
                Err(e) if e.is_already_exists() && attempts < MAX_NAME_ATTEMPTS => {
                    let name = next_free_name(instance, reserved);
                    warn!("Unit {} is taken by another object, trying '{name}'", unit.key());
                    reserved.insert(name.clone());
                    unit.metadata.name = name;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Returns the lowest-index unit name not in `reserved`.
fn next_free_name(instance: &str, reserved: &BTreeSet<String>) -> String {
    (0..=u32::MAX)
        .map(|idx| unit_name(instance, idx))
        .find(|name| !reserved.contains(name))
        .unwrap_or_else(|| unit_name(instance, u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitTemplate;
    use crate::error::StoreError;
    use crate::model::{Instance, ObjectKey, ObjectMeta, Unit, UnitSpec};
    use crate::planner::DiffEngine;
    use crate::store::MockUnitStore;

    fn instance(size: u32) -> Instance {
        let mut instance = Instance::new(&ObjectKey::new("default", "app"), size);
        instance.metadata.uid = Some(String::from("uid-1"));
        instance
    }

    fn unit(name: &str) -> Unit {
        Unit::new(ObjectMeta::named(&ObjectKey::new("default", name)), UnitSpec::default())
    }

    #[tokio::test]
    async fn test_create_aborts_on_first_failure() {
        let instance = instance(3);
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        let mut store = MockUnitStore::new();
        let mut calls = 0;
        store.expect_create().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(())
            } else {
                Err(StoreError::unavailable("connection refused").into())
            }
        });

        let result = PlanExecutor::new(&store).execute(&plan).await;

        assert_eq!(result.created, vec!["app-pod-0"]);
        assert_eq!(result.skipped, 1);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_delete_not_found_counts_as_done() {
        let instance = instance(0);
        let observed = [unit("app-pod-0"), unit("app-pod-1")];
        let diff = DiffEngine::new().compute_diff(&instance, &observed);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        let mut store = MockUnitStore::new();
        store
            .expect_delete()
            .withf(|key| key.name == "app-pod-1")
            .times(1)
            .returning(|key| Err(StoreError::not_found("Pod", key).into()));
        store
            .expect_delete()
            .withf(|key| key.name == "app-pod-0")
            .times(1)
            .returning(|_| Ok(()));

        let result = PlanExecutor::new(&store).execute(&plan).await;

        assert!(result.success());
        assert_eq!(result.deleted, vec!["app-pod-1", "app-pod-0"]);
    }

    #[tokio::test]
    async fn test_taken_name_moves_to_next_free_index() {
        let instance = instance(2);
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        let mut store = MockUnitStore::new();
        store
            .expect_create()
            .withf(|unit| unit.name() == "app-pod-0")
            .times(1)
            .returning(|unit| Err(StoreError::already_exists("Unit", unit.key()).into()));
        store
            .expect_create()
            .withf(|unit| unit.name() == "app-pod-2" || unit.name() == "app-pod-1")
            .times(2)
            .returning(|_| Ok(()));

        let result = PlanExecutor::new(&store).execute(&plan).await;

        assert!(result.success());
        assert_eq!(result.created, vec!["app-pod-2", "app-pod-1"]);
    }

    #[tokio::test]
    async fn test_taken_names_give_up_after_limit() {
        let instance = instance(1);
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        let mut store = MockUnitStore::new();
        store
            .expect_create()
            .times(MAX_NAME_ATTEMPTS)
            .returning(|unit| Err(StoreError::already_exists("Unit", unit.key()).into()));

        let result = PlanExecutor::new(&store).execute(&plan).await;

        assert!(result.created.is_empty());
        assert!(result.error.as_ref().is_some_and(OperatorError::is_already_exists));
    }

    #[tokio::test]
    async fn test_empty_plan_makes_no_calls() {
        let instance = instance(0);
        let diff = DiffEngine::new().compute_diff(&instance, &[]);
        let plan = ScalePlan::from_diff(&diff, &instance, &UnitTemplate::default()).unwrap();

        let store = MockUnitStore::new();
        let result = PlanExecutor::new(&store).execute(&plan).await;

        assert!(result.success());
        assert!(result.created.is_empty() && result.deleted.is_empty());
    }
}
