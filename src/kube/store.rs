//! Cluster backend talking to a Kubernetes API server.
//!
//! Instances are custom resources addressed through [`ResourceConfig`];
//! units are core `v1` pods selected by the membership label.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::client::KubeClient;
use super::types::{DeleteOptions, ObjectList, PartialObject, PropagationPolicy};
use crate::config::ResourceConfig;
use crate::error::Result;
use crate::model::{Instance, InstanceStatus, MEMBERSHIP_LABEL, ObjectKey, Unit};
use crate::store::{Cluster, InstanceAdmin, InstanceLister, InstanceStore, UnitStore};

/// Kubernetes-backed cluster.
#[derive(Debug, Clone)]
pub struct KubeCluster {
    client: KubeClient,
    resource: ResourceConfig,
}

impl KubeCluster {
    /// Creates a cluster backend over an API client.
    #[must_use]
    pub const fn new(client: KubeClient, resource: ResourceConfig) -> Self {
        Self { client, resource }
    }

    /// Returns the API client.
    #[must_use]
    pub const fn client(&self) -> &KubeClient {
        &self.client
    }

    fn instances_path(&self, namespace: Option<&str>) -> String {
        let ResourceConfig {
            group,
            version,
            plural,
            ..
        } = &self.resource;
        match namespace {
            Some(ns) => format!("/apis/{group}/{version}/namespaces/{ns}/{plural}"),
            None => format!("/apis/{group}/{version}/{plural}"),
        }
    }

    fn instance_path(&self, key: &ObjectKey) -> String {
        format!("{}/{}", self.instances_path(Some(&key.namespace)), key.name)
    }

    fn pods_path(namespace: &str) -> String {
        format!("/api/v1/namespaces/{namespace}/pods")
    }

    fn new_instance(&self, key: &ObjectKey, size: u32) -> Instance {
        let mut instance = Instance::new(key, size);
        instance.api_version = self.resource.api_version();
        instance.kind.clone_from(&self.resource.kind);
        instance
    }
}

/// Turns a not-found error into `None`.
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl InstanceStore for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Instance>> {
        found(self.client.get(&self.instance_path(key), &[]).await)
    }

    async fn update_status(&self, key: &ObjectKey, status: &InstanceStatus) -> Result<()> {
        let path = format!("{}/status", self.instance_path(key));
        let _: Instance = self
            .client
            .merge_patch(&path, &json!({ "status": status }))
            .await?;
        debug!("Patched status of {key}");
        Ok(())
    }
}

#[async_trait]
impl UnitStore for KubeCluster {
    async fn list(&self, owner: &ObjectKey) -> Result<Vec<Unit>> {
        let selector = format!("{MEMBERSHIP_LABEL}={}", owner.name);
        let list: ObjectList<Unit> = self
            .client
            .get(&Self::pods_path(&owner.namespace), &[("labelSelector", selector.as_str())])
            .await?;
        Ok(list.items)
    }

    async fn create(&self, unit: &Unit) -> Result<()> {
        let _: Unit = self
            .client
            .post(&Self::pods_path(&unit.metadata.namespace), unit)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let path = format!("{}/{}", Self::pods_path(&key.namespace), key.name);
        self.client
            .delete(
                &path,
                &DeleteOptions {
                    propagation_policy: PropagationPolicy::Background,
                },
            )
            .await
    }
}

#[async_trait]
impl InstanceLister for KubeCluster {
    async fn list_keys(&self, namespace: Option<&str>) -> Result<Vec<ObjectKey>> {
        let list: ObjectList<PartialObject> =
            self.client.get(&self.instances_path(namespace), &[]).await?;
        let mut keys: Vec<ObjectKey> = list.items.iter().map(|o| o.metadata.key()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl InstanceAdmin for KubeCluster {
    async fn apply_instance(&self, key: &ObjectKey, size: u32) -> Result<Instance> {
        if self.get(key).await?.is_some() {
            let instance = self
                .client
                .merge_patch(&self.instance_path(key), &json!({ "spec": { "size": size } }))
                .await?;
            info!("Updated {key} to size {size}");
            return Ok(instance);
        }

        let instance = self
            .client
            .post(
                &self.instances_path(Some(&key.namespace)),
                &self.new_instance(key, size),
            )
            .await?;
        info!("Created {key} with size {size}");
        Ok(instance)
    }

    async fn delete_instance(&self, key: &ObjectKey) -> Result<bool> {
        let options = DeleteOptions {
            propagation_policy: PropagationPolicy::Background,
        };
        let deleted = found(self.client.delete(&self.instance_path(key), &options).await)?;
        Ok(deleted.is_some())
    }
}

impl Cluster for KubeCluster {
    fn backend_type(&self) -> &'static str {
        "kube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectMeta, UnitSpec};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INSTANCE_PATH: &str = "/apis/mygroup.mydomain.com/v1alpha1/namespaces/default/appinstances/app";
    const MERGE_PATCH_TYPE: &str = "application/merge-patch+json";

    fn cluster(server: &MockServer) -> KubeCluster {
        let client = KubeClient::new(&server.uri(), Some(String::from("token"))).unwrap();
        KubeCluster::new(client, ResourceConfig::default())
    }

    fn instance_body(size: u32) -> serde_json::Value {
        json!({
            "apiVersion": "mygroup.mydomain.com/v1alpha1",
            "kind": "AppInstance",
            "metadata": {"name": "app", "namespace": "default", "uid": "uid-1", "resourceVersion": "7"},
            "spec": {"size": size}
        })
    }

    #[tokio::test]
    async fn test_get_missing_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "kind": "Status", "reason": "NotFound", "code": 404
            })))
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let instance = cluster.get(&ObjectKey::new("default", "app")).await.unwrap();

        assert!(instance.is_none());
    }

    #[tokio::test]
    async fn test_get_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_body(3)))
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let instance = cluster
            .get(&ObjectKey::new("default", "app"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(instance.desired_size(), 3);
        assert_eq!(instance.metadata.uid.as_deref(), Some("uid-1"));
    }

    #[tokio::test]
    async fn test_list_units_by_label() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .and(query_param("labelSelector", "app=app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "PodList",
                "items": [{
                    "metadata": {"name": "app-pod-0", "namespace": "default", "labels": {"app": "app"}},
                    "spec": {"containers": [{"name": "busybox", "image": "busybox", "imagePullPolicy": "Always"}]},
                    "status": {"phase": "Running"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let units = cluster.list(&ObjectKey::new("default", "app")).await.unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name(), "app-pod-0");
        assert!(units[0].is_live());
    }

    #[tokio::test]
    async fn test_create_unit() {
        let server = MockServer::start().await;
        let mut metadata = ObjectMeta::named(&ObjectKey::new("default", "app-pod-0"));
        metadata
            .labels
            .insert(MEMBERSHIP_LABEL.to_string(), String::from("app"));
        let unit = Unit::new(metadata, UnitSpec::default());

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/pods"))
            .and(body_json(serde_json::to_value(&unit).unwrap()))
            .respond_with(ResponseTemplate::new(201).set_body_json(&unit))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        cluster.create(&unit).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_unit_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/pods/app-pod-4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let err = cluster
            .delete(&ObjectKey::new("default", "app-pod-4"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_status_patches_subresource() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{INSTANCE_PATH}/status")))
            .and(header("content-type", MERGE_PATCH_TYPE))
            .and(body_json(json!({"status": {"nodes": ["app-pod-0", "app-pod-1"]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_body(2)))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let status = InstanceStatus {
            observed_units: vec![String::from("app-pod-0"), String::from("app-pod-1")],
        };
        cluster
            .update_status(&ObjectKey::new("default", "app"), &status)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_keys_all_namespaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/mygroup.mydomain.com/v1alpha1/appinstances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"metadata": {"name": "web", "namespace": "team-b"}},
                    {"metadata": {"name": "app", "namespace": "team-a"}}
                ]
            })))
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let keys = cluster.list_keys(None).await.unwrap();

        assert_eq!(
            keys,
            vec![ObjectKey::new("team-a", "app"), ObjectKey::new("team-b", "web")]
        );
    }

    #[tokio::test]
    async fn test_apply_creates_missing_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/apis/mygroup.mydomain.com/v1alpha1/namespaces/default/appinstances"))
            .respond_with(ResponseTemplate::new(201).set_body_json(instance_body(2)))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let instance = cluster
            .apply_instance(&ObjectKey::new("default", "app"), 2)
            .await
            .unwrap();

        assert_eq!(instance.desired_size(), 2);
    }

    #[tokio::test]
    async fn test_apply_patches_existing_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_body(2)))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(INSTANCE_PATH))
            .and(body_json(json!({"spec": {"size": 5}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_body(5)))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        let instance = cluster
            .apply_instance(&ObjectKey::new("default", "app"), 5)
            .await
            .unwrap();

        assert_eq!(instance.desired_size(), 5);
    }

    #[tokio::test]
    async fn test_delete_instance() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(INSTANCE_PATH))
            .and(body_json(json!({"propagationPolicy": "Background"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "Status"})))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        assert!(cluster.delete_instance(&ObjectKey::new("default", "app")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_instance() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cluster = cluster(&server);
        assert!(!cluster.delete_instance(&ObjectKey::new("default", "app")).await.unwrap());
    }
}
