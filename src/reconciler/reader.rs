//! Reads the desired and observed state of one instance.

use tracing::debug;

use crate::error::Result;
use crate::model::{Instance, ObjectKey, Unit};
use crate::store::{InstanceStore, UnitStore};

/// An instance together with the units currently labeled as its members.
#[derive(Debug, Clone)]
pub struct ObservedState {
    /// The instance.
    pub instance: Instance,
    /// Member units, terminating ones included.
    pub units: Vec<Unit>,
}

/// Fetches an instance and its member units.
#[derive(Debug)]
pub struct StateReader<'a, I: InstanceStore + ?Sized, U: UnitStore + ?Sized> {
    instances: &'a I,
    units: &'a U,
}

impl<'a, I: InstanceStore + ?Sized, U: UnitStore + ?Sized> StateReader<'a, I, U> {
    /// Creates a new state reader.
    #[must_use]
    pub const fn new(instances: &'a I, units: &'a U) -> Self {
        Self { instances, units }
    }

    /// Reads the state of `key`.
    ///
    /// Returns `None` if the instance does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if either store call fails.
    pub async fn read(&self, key: &ObjectKey) -> Result<Option<ObservedState>> {
        let Some(instance) = self.instances.get(key).await? else {
            debug!("Instance {key} not found");
            return Ok(None);
        };

        let units = self.units.list(key).await?;
        debug!("Instance {key} has {} member units", units.len());

        Ok(Some(ObservedState { instance, units }))
    }
}
