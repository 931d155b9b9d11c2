//! Projects the live unit set into the instance status.

use tracing::debug;

use crate::error::Result;
use crate::model::{InstanceStatus, ObjectKey};
use crate::planner::DiffEngine;
use crate::store::{InstanceStore, UnitStore};

/// Writes the names of an instance's live units into its status.
#[derive(Debug)]
pub struct StatusProjector<'a, I: InstanceStore + ?Sized, U: UnitStore + ?Sized> {
    instances: &'a I,
    units: &'a U,
}

impl<'a, I: InstanceStore + ?Sized, U: UnitStore + ?Sized> StatusProjector<'a, I, U> {
    /// Creates a new status projector.
    #[must_use]
    pub const fn new(instances: &'a I, units: &'a U) -> Self {
        Self { instances, units }
    }

    /// Re-lists the units of `key` and writes the live ones to its status.
    ///
    /// The status is written even when it already matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit query or the status write fails.
    pub async fn project(&self, key: &ObjectKey) -> Result<Vec<String>> {
        let units = self.units.list(key).await?;
        let observed_units = DiffEngine::order_live(&key.name, &units);

        let status = InstanceStatus { observed_units };
        self.instances.update_status(key, &status).await?;
        debug!("Projected {} live units into status of {key}", status.observed_units.len());

        Ok(status.observed_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{MEMBERSHIP_LABEL, ObjectMeta, Unit, UnitSpec};
    use crate::store::{MockInstanceStore, MockUnitStore};
    use chrono::Utc;

    fn unit(name: &str, terminating: bool) -> Unit {
        let mut metadata = ObjectMeta::named(&ObjectKey::new("default", name));
        metadata
            .labels
            .insert(MEMBERSHIP_LABEL.to_string(), String::from("app"));
        if terminating {
            metadata.deletion_timestamp = Some(Utc::now());
        }
        Unit::new(metadata, UnitSpec::default())
    }

    #[tokio::test]
    async fn test_projects_live_units_in_order() {
        let mut units = MockUnitStore::new();
        units.expect_list().returning(|_| {
            Ok(vec![
                unit("app-pod-2", false),
                unit("app-pod-0", false),
                unit("app-pod-1", true),
            ])
        });
        let mut instances = MockInstanceStore::new();
        instances
            .expect_update_status()
            .withf(|_, status| status.observed_units == ["app-pod-0", "app-pod-2"])
            .times(1)
            .returning(|_, _| Ok(()));

        let projector = StatusProjector::new(&instances, &units);
        let names = projector.project(&ObjectKey::new("default", "app")).await.unwrap();

        assert_eq!(names, vec!["app-pod-0", "app-pod-2"]);
    }

    #[tokio::test]
    async fn test_writes_empty_status() {
        let mut units = MockUnitStore::new();
        units.expect_list().returning(|_| Ok(Vec::new()));
        let mut instances = MockInstanceStore::new();
        instances
            .expect_update_status()
            .withf(|_, status| status.observed_units.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));

        let projector = StatusProjector::new(&instances, &units);
        assert!(projector.project(&ObjectKey::new("default", "app")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_write_failure() {
        let mut units = MockUnitStore::new();
        units.expect_list().returning(|_| Ok(Vec::new()));
        let mut instances = MockInstanceStore::new();
        instances
            .expect_update_status()
            .returning(|_, _| Err(StoreError::unavailable("etcd timeout").into()));

        let projector = StatusProjector::new(&instances, &units);
        assert!(projector.project(&ObjectKey::new("default", "app")).await.is_err());
    }
}
