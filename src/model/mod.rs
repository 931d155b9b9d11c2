//! Data model for instances and their units.
//!
//! Field names follow the Kubernetes wire format so the same types serve the
//! API server backend and the local stores.

mod instance;
mod meta;
mod unit;

pub use instance::{INSTANCE_API_VERSION, INSTANCE_KIND, Instance, InstanceSpec, InstanceStatus};
pub use meta::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta, OwnerReference, is_dns_label};
pub use unit::{Container, MEMBERSHIP_LABEL, Unit, UnitSpec, unit_index, unit_name};
