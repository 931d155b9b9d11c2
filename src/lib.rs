// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests unwrap freely and mockall generates undocumented items
#![cfg_attr(test, allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # AppInstance Operator
//!
//! A declarative, idempotent replica controller: every `AppInstance` declares
//! a desired size N, and the operator keeps exactly N worker units in
//! existence and lists them in the instance status.
//!
//! ## Overview
//!
//! The system is built around the concept of **desired state reconciliation**:
//!
//! 1. **Read**: fetch the instance and the units labeled `app=<name>`
//! 2. **Diff**: compare the live unit count to the desired size
//! 3. **Act**: create or delete the missing or surplus units
//! 4. **Project**: write the names of the live units into the status
//!
//! Passes are level-triggered and idempotent: running one again with no
//! intervening change does nothing, and a failed pass is simply retried.
//!
//! ## Modules
//!
//! - [`model`]: Instances, units and object metadata
//! - [`store`]: Store traits plus the in-memory and file-backed backends
//! - [`kube`]: Kubernetes API server backend
//! - [`planner`]: Diff computation and plan execution
//! - [`reconciler`]: The reconciliation pass
//! - [`controller`]: Work queue, backoff and trigger sources
//! - [`config`]: Configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   backend: kube
//!   api_server: https://10.0.0.1:6443
//!   token_file: /var/run/secrets/kubernetes.io/serviceaccount/token
//!
//! unit:
//!   image: busybox
//!   command: ["sleep", "3600"]
//!
//! controller:
//!   workers: 4
//!   resync_interval_secs: 30
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod kube;
pub mod model;
pub mod planner;
pub mod reconciler;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, OperatorConfig};
pub use controller::{Backoff, Controller, WorkQueue};
pub use error::{OperatorError, Result};
pub use kube::{KubeClient, KubeCluster};
pub use model::{Instance, ObjectKey, Unit};
pub use planner::{DiffEngine, PlanExecutor, ScalePlan};
pub use reconciler::{ReconcileOutcome, ReconciliationResult, Reconciler};
pub use store::{Cluster, InstanceStore, LocalCluster, MemoryCluster, UnitStore};
