//! Reconciler for maintaining desired state.
//!
//! This module implements one reconciliation pass for a single instance:
//! read the instance and its units, compute the diff, create or delete units,
//! then project the live unit set into the instance status. Passes hold no
//! state of their own, so any pass can be abandoned and re-run.

mod projector;
mod reader;

pub use projector::StatusProjector;
pub use reader::{ObservedState, StateReader};

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::UnitTemplate;
use crate::error::Result;
use crate::model::ObjectKey;
use crate::planner::{DiffEngine, PlanExecutor, ScaleDecision, ScalePlan, UnitDiff};
use crate::store::{InstanceStore, UnitStore};

/// Reconciler for maintaining desired state.
pub struct Reconciler<I: InstanceStore + ?Sized, U: UnitStore + ?Sized> {
    /// Instance store.
    instances: Arc<I>,
    /// Unit store.
    units: Arc<U>,
    /// Template for created units.
    template: UnitTemplate,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ReconcileOutcome {
    /// The instance no longer exists.
    Deleted {
        /// Instance key.
        key: ObjectKey,
    },
    /// The pass ran to completion.
    Reconciled(ReconciliationResult),
}

/// Result of a completed reconciliation pass.
#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    /// Instance key.
    pub key: ObjectKey,
    /// Desired number of units.
    pub desired: u32,
    /// Decision taken.
    pub decision: ScaleDecision,
    /// Units created.
    pub created: Vec<String>,
    /// Units deleted.
    pub deleted: Vec<String>,
    /// Live units written to status.
    pub observed_units: Vec<String>,
    /// Whether the live count now matches the desired count.
    pub converged: bool,
}

/// Dry-run view of what a pass would do.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    /// Instance key.
    pub key: ObjectKey,
    /// Units listed in the stored status.
    pub reported_units: Vec<String>,
    /// Diff against the observed units.
    pub diff: UnitDiff,
    /// Actions a pass would take.
    pub plan: ScalePlan,
}

impl<I: InstanceStore + ?Sized, U: UnitStore + ?Sized> Reconciler<I, U> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(instances: Arc<I>, units: Arc<U>, template: UnitTemplate) -> Self {
        Self {
            instances,
            units,
            template,
            diff_engine: DiffEngine::new(),
        }
    }

    /// Runs one reconciliation pass for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading, a lifecycle action or the status write
    /// fails. Status is still projected after a failed lifecycle action, and
    /// the lifecycle error takes precedence.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        info!("Starting reconciliation for {key}");

        let reader = StateReader::new(&*self.instances, &*self.units);
        let Some(observed) = reader.read(key).await? else {
            info!("Instance {key} is gone, nothing to reconcile");
            return Ok(ReconcileOutcome::Deleted { key: key.clone() });
        };

        let diff = self.diff_engine.compute_diff(&observed.instance, &observed.units);
        info!(
            "Instance {key}: desired {}, live {} -> {}",
            diff.desired,
            diff.live.len(),
            diff.decision
        );

        let (created, deleted, lifecycle_error) =
            match ScalePlan::from_diff(&diff, &observed.instance, &self.template) {
                Ok(plan) => {
                    let execution = PlanExecutor::new(&*self.units).execute(&plan).await;
                    (execution.created, execution.deleted, execution.error)
                }
                Err(e) => (Vec::new(), Vec::new(), Some(e)),
            };

        let projection = StatusProjector::new(&*self.instances, &*self.units)
            .project(key)
            .await;

        let observed_units = match (lifecycle_error, projection) {
            (None, Ok(units)) => units,
            (None, Err(e)) => return Err(e),
            (Some(e), Ok(_)) => return Err(e),
            (Some(e), Err(projection_error)) => {
                warn!("Status projection for {key} also failed: {projection_error}");
                return Err(e);
            }
        };

        let converged = observed_units.len() == diff.desired as usize;
        info!(
            "Reconciled {key}: created {}, deleted {}, {} live",
            created.len(),
            deleted.len(),
            observed_units.len()
        );

        Ok(ReconcileOutcome::Reconciled(ReconciliationResult {
            key: key.clone(),
            desired: diff.desired,
            decision: diff.decision,
            created,
            deleted,
            observed_units,
            converged,
        }))
    }

    /// Computes what a pass for `key` would do without changing anything.
    ///
    /// Returns `None` if the instance does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or units would be created for an
    /// instance without a uid.
    pub async fn plan(&self, key: &ObjectKey) -> Result<Option<PlanReport>> {
        let reader = StateReader::new(&*self.instances, &*self.units);
        let Some(observed) = reader.read(key).await? else {
            return Ok(None);
        };

        let diff = self.diff_engine.compute_diff(&observed.instance, &observed.units);
        let plan = ScalePlan::from_diff(&diff, &observed.instance, &self.template)?;

        Ok(Some(PlanReport {
            key: key.clone(),
            reported_units: observed.instance.status.observed_units,
            diff,
            plan,
        }))
    }
}

impl ReconcileOutcome {
    /// Returns the instance key.
    #[must_use]
    pub const fn key(&self) -> &ObjectKey {
        match self {
            Self::Deleted { key } => key,
            Self::Reconciled(result) => &result.key,
        }
    }
}

impl PlanReport {
    /// Returns true if the live count matches the desired count.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.diff.is_converged()
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.converged { "converged" } else { "converging" };
        writeln!(f, "Reconciled {} ({state}):", self.key)?;
        writeln!(f, "  Decision: {}", self.decision)?;
        writeln!(f, "  Created: {}", self.created.len())?;
        writeln!(f, "  Deleted: {}", self.deleted.len())?;
        writeln!(f, "  Units ({}/{}):", self.observed_units.len(), self.desired)?;
        for unit in &self.observed_units {
            writeln!(f, "    - {unit}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deleted { key } => writeln!(f, "Instance {key} not found, nothing to do"),
            Self::Reconciled(result) => write!(f, "{result}"),
        }
    }
}
