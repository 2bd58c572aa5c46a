//! Abstraction over the orchestration substrate the registry and the
//! provisioner both depend on: a place to put/get/delete typed resources and
//! small opaque records. Kept behind a trait so `registry.rs` and
//! `provisioner.rs` can be tested without a live cluster, and so the broker
//! can run against any orchestration substrate addressable by
//! group/version/kind + namespace + name.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A Kubernetes-style group/version/kind triple identifying a resource type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        GroupVersionKind { group: group.into(), version: version.into(), kind: kind.into() }
    }

    pub fn core(version: impl Into<String>, kind: impl Into<String>) -> Self {
        GroupVersionKind { group: String::new(), version: version.into(), kind: kind.into() }
    }

    /// Parse a wire-format `apiVersion` (`"group/version"` or bare `"version"`
    /// for the core group) alongside its `kind`.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => GroupVersionKind::new(group, version, kind),
            None => GroupVersionKind::core(api_version, kind),
        }
    }

    /// The wire-format `apiVersion` string for this GVK.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// A fully-qualified resource address: type, namespace, name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub gvk: GroupVersionKind,
    pub namespace: String,
    pub name: String,
}

/// The surface the provisioner and the registry need from the orchestration
/// substrate. Implementations are responsible for authentication, retries on
/// transient transport errors, and translating substrate-native errors into
/// `ErrorKind::ResourceConflict` / `ResourceNotFound` / `Internal`.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Create a resource, failing with `ResourceConflict` if one with the
    /// same id already exists.
    async fn create(&self, id: &ResourceId, body: Value) -> Result<Value>;

    /// Replace a resource's spec in place (used for plan/parameter updates).
    async fn update(&self, id: &ResourceId, body: Value) -> Result<Value>;

    /// Fetch a resource's current representation, `None` if absent.
    async fn get(&self, id: &ResourceId) -> Result<Option<Value>>;

    /// Delete a resource. Idempotent: absence is success, not an error.
    async fn delete(&self, id: &ResourceId) -> Result<()>;

    /// Read an opaque byte-string record (the registry's storage primitive).
    async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Write an opaque byte-string record, overwriting any existing value.
    async fn put_record(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Delete an opaque record. Idempotent.
    async fn delete_record(&self, name: &str) -> Result<()>;
}

/// Lets a store be shared (e.g. between the registry and the provisioner)
/// without every `ResourceStore` impl needing to be `Clone` itself.
#[async_trait]
impl<T: ResourceStore + ?Sized> ResourceStore for Arc<T> {
    async fn create(&self, id: &ResourceId, body: Value) -> Result<Value> {
        (**self).create(id, body).await
    }

    async fn update(&self, id: &ResourceId, body: Value) -> Result<Value> {
        (**self).update(id, body).await
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<Value>> {
        (**self).get(id).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        (**self).delete(id).await
    }

    async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).get_record(name).await
    }

    async fn put_record(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        (**self).put_record(name, bytes).await
    }

    async fn delete_record(&self, name: &str) -> Result<()> {
        (**self).delete_record(name).await
    }
}

/// A live `kube`-backed implementation talking to a Kubernetes API server
/// through its dynamic (GVK-addressed) client.
pub mod kube_store {
    use super::*;
    use kube::{
        api::{Api, DynamicObject, Patch, PatchParams, PostParams},
        discovery::{ApiResource, Scope},
        Client,
    };

    use crate::error::ErrorKind;

    /// Records (registry entries) are stored as `ConfigMap` data entries
    /// under a single well-known map per namespace, keyed by record name.
    const RECORDS_CONFIGMAP: &str = "broker-registry";

    pub struct KubeResourceStore {
        client: Client,
        records_namespace: String,
    }

    impl KubeResourceStore {
        pub fn new(client: Client, records_namespace: impl Into<String>) -> Self {
            KubeResourceStore { client, records_namespace: records_namespace.into() }
        }

        fn api_resource(gvk: &GroupVersionKind) -> ApiResource {
            ApiResource {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                api_version: if gvk.group.is_empty() { gvk.version.clone() } else { format!("{}/{}", gvk.group, gvk.version) },
                kind: gvk.kind.clone(),
                plural: format!("{}s", gvk.kind.to_lowercase()),
            }
        }

        fn api_for(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
            let ar = Self::api_resource(gvk);
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }

        async fn configmaps(&self) -> Api<k8s_openapi::api::core::v1::ConfigMap> {
            Api::namespaced(self.client.clone(), &self.records_namespace)
        }
    }

    #[async_trait]
    impl ResourceStore for KubeResourceStore {
        async fn create(&self, id: &ResourceId, body: Value) -> Result<Value> {
            let api = self.api_for(&id.gvk, &id.namespace);
            let obj: DynamicObject = serde_json::from_value(body)?;
            let created = api.create(&PostParams::default(), &obj).await.map_err(|e| map_kube_err(e, id))?;
            Ok(serde_json::to_value(created)?)
        }

        async fn update(&self, id: &ResourceId, body: Value) -> Result<Value> {
            let api = self.api_for(&id.gvk, &id.namespace);
            let patched = api
                .patch(&id.name, &PatchParams::apply("broker"), &Patch::Apply(&body))
                .await
                .map_err(|e| map_kube_err(e, id))?;
            Ok(serde_json::to_value(patched)?)
        }

        async fn get(&self, id: &ResourceId) -> Result<Option<Value>> {
            let api = self.api_for(&id.gvk, &id.namespace);
            match api.get_opt(&id.name).await.map_err(|e| map_kube_err(e, id))? {
                Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
                None => Ok(None),
            }
        }

        async fn delete(&self, id: &ResourceId) -> Result<()> {
            let api = self.api_for(&id.gvk, &id.namespace);
            match api.delete(&id.name, &Default::default()).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                Err(e) => Err(ErrorKind::Internal(format!("delete {} failed: {}", id.name, e)).into()),
            }
        }

        async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
            let api = self.configmaps().await;
            let cm = match api.get_opt(RECORDS_CONFIGMAP).await.map_err(|e| ErrorKind::Internal(e.to_string()))? {
                Some(cm) => cm,
                None => return Ok(None),
            };
            Ok(cm.data.as_ref().and_then(|d| d.get(name)).map(|s| s.as_bytes().to_vec()))
        }

        async fn put_record(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
            let api = self.configmaps().await;
            let value = String::from_utf8(bytes).map_err(|e| ErrorKind::Internal(e.to_string()))?;
            let patch = serde_json::json!({"data": {name: value}});
            api.patch(RECORDS_CONFIGMAP, &PatchParams::apply("broker"), &Patch::Merge(&patch))
                .await
                .map_err(|e| ErrorKind::Internal(format!("put_record {} failed: {}", name, e)))?;
            Ok(())
        }

        async fn delete_record(&self, name: &str) -> Result<()> {
            let api = self.configmaps().await;
            let patch = serde_json::json!({"data": {name: Value::Null}});
            match api.patch(RECORDS_CONFIGMAP, &PatchParams::apply("broker"), &Patch::Merge(&patch)).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                Err(e) => Err(ErrorKind::Internal(format!("delete_record {} failed: {}", name, e)).into()),
            }
        }
    }

    fn map_kube_err(e: kube::Error, id: &ResourceId) -> crate::error::Error {
        match &e {
            kube::Error::Api(ae) if ae.code == 404 => ErrorKind::ResourceNotFound(id.name.clone()).into(),
            kube::Error::Api(ae) if ae.code == 409 => ErrorKind::ResourceConflict(id.name.clone()).into(),
            _ => ErrorKind::Internal(format!("kube error on {}: {}", id.name, e)).into(),
        }
    }

    // Scope is imported to document that dynamic resources here are always
    // namespace-scoped; the broker never manages cluster-scoped resources.
    #[allow(dead_code)]
    fn _assert_namespaced(_s: Scope) {}
}
