//! Planning module for scale operations.
//!
//! This module compares desired and observed unit counts and turns the
//! difference into an ordered list of create and delete actions.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffEngine, ScaleDecision, UnitDiff};
pub use executor::{ExecutionResult, PlanExecutor};
pub use plan::{ActionType, PlannedAction, ScalePlan};
