//! The provision/update/deprovision/bind/unbind engine: render a plan's
//! templates, drive them against the resource store, and compensate with a
//! best-effort rollback on partial failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{Config, ConfigBinding, ConditionCheck, ReadinessCheck, TemplateList};
use crate::error::{Error, ErrorKind, Result};
use crate::params::{self, EvalContext, Evaluated};
use crate::registry::{Entry, Registry};
use crate::resource_store::{GroupVersionKind, ResourceId, ResourceStore};

/// One resource the provisioner created, recorded on the registry entry so a
/// later delete (or a rollback) knows what to remove.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreatedResource {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl CreatedResource {
    fn from_id(id: &ResourceId) -> Self {
        CreatedResource { api_version: id.gvk.api_version(), kind: id.gvk.kind.clone(), namespace: id.namespace.clone(), name: id.name.clone() }
    }

    fn to_id(&self) -> ResourceId {
        ResourceId { gvk: GroupVersionKind::from_api_version(&self.api_version, self.kind.clone()), namespace: self.namespace.clone(), name: self.name.clone() }
    }
}

/// Outcome of evaluating a template list's readiness checks. Not-ready is not an error: the client is expected to keep polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    InProgress(String),
}

/// Read the `apiVersion`/`kind`/`metadata.name`/`metadata.namespace` of a
/// freshly rendered resource to determine where it lives in the store.
fn resource_identity(resource: &Value, default_namespace: &str) -> Result<ResourceId> {
    let api_version = resource
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::from(ErrorKind::ConfigurationError("rendered resource is missing 'apiVersion'".into())))?;
    let kind = resource
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::from(ErrorKind::ConfigurationError("rendered resource is missing 'kind'".into())))?;
    let metadata = resource
        .get("metadata")
        .ok_or_else(|| Error::from(ErrorKind::ConfigurationError("rendered resource is missing 'metadata'".into())))?;
    let name = metadata
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::from(ErrorKind::ConfigurationError("rendered resource is missing 'metadata.name'".into())))?;
    let namespace = metadata.get("namespace").and_then(Value::as_str).unwrap_or(default_namespace);
    Ok(ResourceId { gvk: GroupVersionKind::from_api_version(api_version, kind), namespace: namespace.to_string(), name: name.to_string() })
}

/// Evaluate every registry-value pipeline of `list` in order, writing each
/// result straight to `entry`. Operator-authored like everything else in
/// `Config`, but still subject to the reserved-key write restriction -
/// `dashboard-url` and friends are written by the provisioner itself, not by
/// a registry-value pipeline.
fn evaluate_registry_values(config: &Config, list: &TemplateList, request_parameters: &Value, entry: &mut Entry) -> Result<()> {
    for rv in &list.registry_values {
        let evaluated = {
            let ctx = EvalContext { request_parameters, entry: &*entry };
            let render_template = |n: &str, c: &EvalContext| -> Result<Value> {
                let mut scratch = c.entry.clone();
                params::render_named_template(&config.templates, n, c.request_parameters, &mut scratch, false)
            };
            rv.source.evaluate(&ctx, &render_template)?
        };
        if let Evaluated::Value(v) = evaluated {
            entry.set_checked(&rv.key, v)?;
        }
    }
    Ok(())
}

/// Three-way merge of a freshly-rendered template against the live resource,
/// keyed on the previously-rendered snapshot.
/// Objects recurse key by key, starting from `theirs` so substrate-managed
/// fields absent from `ours` (status, resourceVersion, ...) survive; any key
/// `ours` actually renders wins at the leaf, including when both sides changed
/// it from `base`. Non-object values are replaced wholesale by `ours`.
fn three_way_merge(base: &Value, ours: &Value, theirs: &Value) -> Value {
    match (ours, theirs) {
        (Value::Object(o), Value::Object(t)) => {
            let base_map = base.as_object();
            let mut out = t.clone();
            for (k, ov) in o {
                let bv = base_map.and_then(|b| b.get(k)).cloned().unwrap_or(Value::Null);
                let tv = out.get(k).cloned().unwrap_or(Value::Null);
                out.insert(k.clone(), three_way_merge(&bv, ov, &tv));
            }
            Value::Object(out)
        }
        _ => ours.clone(),
    }
}

/// Retry `f` a bounded number of times, but only for transient error kinds.
async fn with_retry<F, Fut, T>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < MAX_ATTEMPTS && e.kind().is_transient() => {
                warn!("transient resource-store error on attempt {}/{}: {}", attempt, MAX_ATTEMPTS, e);
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn find_condition(resource: &Value, condition_type: &str) -> Option<String> {
    resource
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn expect_string(v: Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(ErrorKind::ConfigurationError(format!("expected a templated string, got {}", other)).into()),
    }
}

/// Materializes (or revises, or tears down) the resource set a service
/// instance or binding is configured to have, against `S`.
pub struct Provisioner<S: ResourceStore> {
    store: Arc<S>,
    registry: Registry<S>,
}

impl<S: ResourceStore> Clone for Provisioner<S> {
    fn clone(&self) -> Self {
        Provisioner { store: self.store.clone(), registry: self.registry.clone() }
    }
}

impl<S: ResourceStore> Provisioner<S> {
    pub fn new(store: S) -> Self {
        let store = Arc::new(store);
        Provisioner { registry: Registry::from_arc(store.clone()), store }
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Resolve the offering/plan, select the configuration binding, run its
    /// registry-value pipelines, and commit the entry durably so the async
    /// phase can recover after a restart.
    pub async fn prepare_instance(
        &self,
        config: &Config,
        entry: &mut Entry,
        service_id: &str,
        plan_id: &str,
        namespace: &str,
        context: &Value,
        request_parameters: &Value,
    ) -> Result<ConfigBinding> {
        let (service, plan) = config.resolve(service_id, plan_id)?;
        let binding = config.binding_for(service, plan)?.clone();

        entry.set("service-id", json!(service_id))?;
        entry.set("plan-id", json!(plan_id))?;
        entry.set("namespace", json!(namespace))?;
        entry.set("context", context.clone())?;
        entry.set("parameters", request_parameters.clone())?;

        evaluate_registry_values(config, &binding.instance, request_parameters, entry)?;

        self.registry.commit(entry).await?;
        Ok(binding)
    }

    /// PrepareInstance's binding-side counterpart: same shape, scoped to the
    /// `serviceBinding` template list and carrying the parent instance id.
    pub async fn prepare_binding(
        &self,
        config: &Config,
        entry: &mut Entry,
        instance_id: &str,
        service_id: &str,
        plan_id: &str,
        namespace: &str,
        request_parameters: &Value,
    ) -> Result<TemplateList> {
        let (service, plan) = config.resolve(service_id, plan_id)?;
        let binding = config.binding_for(service, plan)?;
        let binding_list = binding.binding.clone().ok_or_else(|| {
            Error::from(ErrorKind::ConfigurationError(format!(
                "service '{}' plan '{}' is not bindable",
                service.name, plan.name
            )))
        })?;

        entry.set("instance-id", json!(instance_id))?;
        entry.set("service-id", json!(service_id))?;
        entry.set("plan-id", json!(plan_id))?;
        entry.set("namespace", json!(namespace))?;
        entry.set("parameters", request_parameters.clone())?;

        evaluate_registry_values(config, &binding_list, request_parameters, entry)?;

        self.registry.commit(entry).await?;
        Ok(binding_list)
    }

    /// Render and create every template in `list`, in order. On any create
    /// failure, compensates by deleting everything created so far in reverse
    /// order (best-effort) before returning the error.
    async fn create_templates(&self, config: &Config, list: &TemplateList, entry: &mut Entry) -> Result<Vec<CreatedResource>> {
        let request_parameters = entry.get_json::<Value>("parameters")?.unwrap_or(Value::Null);
        let namespace = entry.get_string("namespace")?.unwrap_or_default();
        let mut created = Vec::with_capacity(list.templates.len());

        for name in &list.templates {
            let tpl = config
                .templates
                .get(name)
                .ok_or_else(|| Error::from(ErrorKind::Internal(format!("template '{}' vanished after configuration validation", name))))?;
            let rendered = params::render_named_template(&config.templates, name, &request_parameters, entry, false)?;
            let id = resource_identity(&rendered, &namespace)?;

            if tpl.singleton && with_retry(|| self.store.get(&id)).await?.is_some() {
                debug!("singleton resource {}/{} already exists, skipping create", id.namespace, id.name);
                continue;
            }

            match with_retry(|| self.store.create(&id, rendered.clone())).await {
                Ok(_) => created.push(CreatedResource::from_id(&id)),
                Err(e) => {
                    self.rollback(&created).await;
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    async fn rollback(&self, created: &[CreatedResource]) {
        for cr in created.iter().rev() {
            let id = cr.to_id();
            if let Err(e) = self.store.delete(&id).await {
                warn!("compensating delete of {}/{} failed (best-effort): {}", id.namespace, id.name, e);
            }
        }
    }

    /// Provision: create every template in `list.instance`, then evaluate
    /// readiness. Persists `created-resources` and a terminal
    /// `operation-status` on `entry` regardless of outcome, committing even
    /// on failure so polls after a crash still see the terminal state.
    pub async fn provision(&self, config: &Config, binding: &ConfigBinding, mut entry: Entry) -> Result<Entry> {
        match self.create_templates(config, &binding.instance, &mut entry).await {
            Ok(created) => {
                entry.set("created-resources", serde_json::to_value(&created)?)?;
                let readiness = self.check_readiness(&binding.instance.checks, &entry).await?;
                entry.set(
                    "operation-status",
                    json!(match readiness {
                        Readiness::Ready => "succeeded",
                        Readiness::InProgress(_) => "in_progress",
                    }),
                )?;
                self.registry.commit(&mut entry).await?;
                Ok(entry)
            }
            Err(e) => {
                entry.set("operation-status", json!(format!("failed: {}", e)))?;
                if let Err(commit_err) = self.registry.commit(&mut entry).await {
                    warn!("failed to persist failed provision status: {}", commit_err);
                }
                Err(e)
            }
        }
    }

    /// Bind: same create-and-compensate flow as `provision`, but with no
    /// readiness checks.
    pub async fn bind(&self, config: &Config, list: &TemplateList, mut entry: Entry) -> Result<Entry> {
        match self.create_templates(config, list, &mut entry).await {
            Ok(created) => {
                entry.set("created-resources", serde_json::to_value(&created)?)?;
                entry.set("operation-status", json!("succeeded"))?;
                self.registry.commit(&mut entry).await?;
                Ok(entry)
            }
            Err(e) => {
                entry.set("operation-status", json!(format!("failed: {}", e)))?;
                if let Err(commit_err) = self.registry.commit(&mut entry).await {
                    warn!("failed to persist failed bind status: {}", commit_err);
                }
                Err(e)
            }
        }
    }

    async fn update_templates(&self, config: &Config, list: &TemplateList, entry: &mut Entry) -> Result<BTreeMap<String, Value>> {
        let previous: BTreeMap<String, Value> = entry.get_json("rendered-templates")?.unwrap_or_default();
        let request_parameters = entry.get_json::<Value>("parameters")?.unwrap_or(Value::Null);
        let namespace = entry.get_string("namespace")?.unwrap_or_default();
        let mut snapshots = BTreeMap::new();

        for name in &list.templates {
            let ours = params::render_named_template(&config.templates, name, &request_parameters, entry, true)?;
            let id = resource_identity(&ours, &namespace)?;
            let theirs = with_retry(|| self.store.get(&id))
                .await?
                .ok_or_else(|| Error::from(ErrorKind::ResourceNotFound(format!("{}/{}", id.namespace, id.name))))?;
            let base = previous.get(name).cloned().unwrap_or(Value::Null);
            let merged = three_way_merge(&base, &ours, &theirs);
            with_retry(|| self.store.update(&id, merged.clone())).await?;
            snapshots.insert(name.clone(), ours);
        }
        Ok(snapshots)
    }

    /// Update: re-render and three-way-merge every template, then apply
    /// `new_plan_id` atomically only once that succeeds.
    pub async fn update(&self, config: &Config, binding: &ConfigBinding, new_plan_id: Option<&str>, mut entry: Entry) -> Result<Entry> {
        match self.update_templates(config, &binding.instance, &mut entry).await {
            Ok(snapshots) => {
                entry.set("rendered-templates", serde_json::to_value(&snapshots)?)?;
                if let Some(plan_id) = new_plan_id {
                    entry.set("plan-id", json!(plan_id))?;
                }
                entry.set("operation-status", json!("succeeded"))?;
                self.registry.commit(&mut entry).await?;
                Ok(entry)
            }
            Err(e) => {
                entry.set("operation-status", json!(format!("failed: {}", e)))?;
                if let Err(commit_err) = self.registry.commit(&mut entry).await {
                    warn!("failed to persist failed update status: {}", commit_err);
                }
                Err(e)
            }
        }
    }

    /// Delete: delete every tracked resource in reverse
    /// creation order, idempotently, then destroy the registry entry. Shared
    /// by deprovision and unbind — both are "tear down what was created and
    /// drop the entry".
    pub async fn delete(&self, mut entry: Entry) -> Result<()> {
        let created: Vec<CreatedResource> = entry.get_json("created-resources")?.unwrap_or_default();
        for cr in created.iter().rev() {
            if let Err(e) = with_retry(|| self.store.delete(&cr.to_id())).await {
                entry.set("operation-status", json!(format!("failed: {}", e)))?;
                let _ = self.registry.commit(&mut entry).await;
                return Err(e);
            }
        }
        self.registry.destroy(&entry).await
    }

    /// Single-shot evaluation of every check in `checks`, stopping at the
    /// first non-ready result.
    pub async fn check_readiness(&self, checks: &[ReadinessCheck], entry: &Entry) -> Result<Readiness> {
        let request_parameters = entry.get_json::<Value>("parameters")?.unwrap_or(Value::Null);
        for check in checks {
            let cc = &check.condition;
            let ctx = EvalContext { request_parameters: &request_parameters, entry };
            let api_version = expect_string(params::render_snippet(&cc.api_version, &ctx)?)?;
            let kind = expect_string(params::render_snippet(&cc.kind, &ctx)?)?;
            let name = expect_string(params::render_snippet(&cc.name, &ctx)?)?;
            let namespace = expect_string(params::render_snippet(&cc.namespace, &ctx)?)?;

            let id = ResourceId { gvk: GroupVersionKind::from_api_version(&api_version, kind), namespace, name };
            let resource = match self.store.get(&id).await? {
                Some(r) => r,
                None => return Ok(Readiness::InProgress(format!("resource {}/{} not found", id.namespace, id.name))),
            };
            match find_condition(&resource, &cc.condition_type) {
                None => return Ok(Readiness::InProgress(format!("no status condition of type '{}' on {}/{}", cc.condition_type, id.namespace, id.name))),
                Some(status) if status == cc.status => continue,
                Some(status) => {
                    return Ok(Readiness::InProgress(format!(
                        "condition '{}' on {}/{} has status '{}', want '{}'",
                        cc.condition_type, id.namespace, id.name, status, cc.status
                    )))
                }
            }
        }
        Ok(Readiness::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigBinding, RegistryValuePipeline, Template};
    use crate::params::Source;
    use crate::registry::EntryKind;
    use crate::resource_store::test_support::InMemoryStore;
    use std::collections::BTreeMap;

    fn deployment_template(name: &str, singleton: bool) -> Template {
        Template {
            resource: json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": name},
            }),
            parameters: vec![],
            singleton,
        }
    }

    fn config_with_templates(templates: BTreeMap<String, Template>, instance: TemplateList) -> Config {
        Config {
            services: vec![crate::config::ServiceOffering {
                id: "svc-1".into(),
                name: "svc".into(),
                description: "d".into(),
                bindable: false,
                tags: vec![],
                dashboard_client: None,
                plan_updatable: false,
                plans: vec![crate::config::Plan {
                    id: "plan-1".into(),
                    name: "plan".into(),
                    description: "d".into(),
                    bindable: None,
                    schemas: None,
                    maintenance_info: None,
                    plan_updatable: None,
                    metadata: Value::Null,
                }],
                metadata: Value::Null,
            }],
            templates,
            bindings: vec![ConfigBinding { service_name: "svc".into(), plan_name: "plan".into(), instance, binding: None }],
        }
    }

    #[tokio::test]
    async fn provision_creates_resource_and_records_it() {
        let mut templates = BTreeMap::new();
        templates.insert("deployment".to_string(), deployment_template("web", false));
        let config = config_with_templates(templates, TemplateList { registry_values: vec![], templates: vec!["deployment".into()], checks: vec![] });

        let provisioner = Provisioner::new(InMemoryStore::default());
        let mut entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        let binding = provisioner
            .prepare_instance(&config, &mut entry, "svc-1", "plan-1", "ns", &json!({}), &json!({}))
            .await
            .unwrap();

        let entry = provisioner.provision(&config, &binding, entry).await.unwrap();
        assert_eq!(entry.get("operation-status"), Some(&json!("succeeded")));
        let created: Vec<CreatedResource> = entry.get_json("created-resources").unwrap().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "web");
    }

    #[tokio::test]
    async fn singleton_template_is_created_only_once_across_instances() {
        let mut templates = BTreeMap::new();
        templates.insert("shared".to_string(), deployment_template("shared-db", true));
        let config = config_with_templates(templates, TemplateList { registry_values: vec![], templates: vec!["shared".into()], checks: vec![] });

        let store = InMemoryStore::default();
        let provisioner = Provisioner::new(store);

        for instance_id in ["inst-a", "inst-b"] {
            let mut entry = provisioner.registry().open(EntryKind::ServiceInstance, instance_id).await.unwrap();
            let binding = provisioner
                .prepare_instance(&config, &mut entry, "svc-1", "plan-1", "ns", &json!({}), &json!({}))
                .await
                .unwrap();
            let entry = provisioner.provision(&config, &binding, entry).await.unwrap();
            assert_eq!(entry.get("operation-status"), Some(&json!("succeeded")));
        }

        let id = ResourceId { gvk: GroupVersionKind::from_api_version("apps/v1", "Deployment"), namespace: "ns".into(), name: "shared-db".into() };
        assert!(provisioner.store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_failure_rolls_back_earlier_resources_in_reverse_order() {
        let mut templates = BTreeMap::new();
        templates.insert("first".to_string(), deployment_template("first-dep", false));
        templates.insert("second".to_string(), deployment_template("first-dep", false));
        let config = config_with_templates(
            templates,
            TemplateList { registry_values: vec![], templates: vec!["first".into(), "second".into()], checks: vec![] },
        );

        let provisioner = Provisioner::new(InMemoryStore::default());
        let mut entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        let binding = provisioner
            .prepare_instance(&config, &mut entry, "svc-1", "plan-1", "ns", &json!({}), &json!({}))
            .await
            .unwrap();

        let result = provisioner.provision(&config, &binding, entry).await;
        assert!(result.is_err());

        let id = ResourceId { gvk: GroupVersionKind::from_api_version("apps/v1", "Deployment"), namespace: "ns".into(), name: "first-dep".into() };
        assert!(provisioner.store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn generate_password_pipeline_writes_registry_value_during_prepare() {
        let templates = BTreeMap::new();
        let instance = TemplateList {
            registry_values: vec![RegistryValuePipeline { key: "pwd".into(), source: Source::GeneratePassword { length: 23, dictionary: None } }],
            templates: vec![],
            checks: vec![],
        };
        let config = config_with_templates(templates, instance);

        let provisioner = Provisioner::new(InMemoryStore::default());
        let mut entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        provisioner.prepare_instance(&config, &mut entry, "svc-1", "plan-1", "ns", &json!({}), &json!({})).await.unwrap();

        match entry.get("pwd") {
            Some(Value::String(s)) => assert_eq!(s.len(), 23),
            other => panic!("expected a 23-char password, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn delete_removes_created_resources_and_destroys_entry() {
        let mut templates = BTreeMap::new();
        templates.insert("deployment".to_string(), deployment_template("web", false));
        let config = config_with_templates(templates, TemplateList { registry_values: vec![], templates: vec!["deployment".into()], checks: vec![] });

        let provisioner = Provisioner::new(InMemoryStore::default());
        let mut entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        let binding = provisioner
            .prepare_instance(&config, &mut entry, "svc-1", "plan-1", "ns", &json!({}), &json!({}))
            .await
            .unwrap();
        let entry = provisioner.provision(&config, &binding, entry).await.unwrap();

        provisioner.delete(entry).await.unwrap();

        let id = ResourceId { gvk: GroupVersionKind::from_api_version("apps/v1", "Deployment"), namespace: "ns".into(), name: "web".into() };
        assert!(provisioner.store.get(&id).await.unwrap().is_none());
        let reopened = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        assert!(!reopened.exists());
    }

    #[tokio::test]
    async fn update_three_way_merge_preserves_substrate_owned_status() {
        let mut templates = BTreeMap::new();
        templates.insert("deployment".to_string(), deployment_template("web", false));
        let config = config_with_templates(templates, TemplateList { registry_values: vec![], templates: vec!["deployment".into()], checks: vec![] });

        let provisioner = Provisioner::new(InMemoryStore::default());
        let mut entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        let binding = provisioner
            .prepare_instance(&config, &mut entry, "svc-1", "plan-1", "ns", &json!({}), &json!({}))
            .await
            .unwrap();
        let entry = provisioner.provision(&config, &binding, entry).await.unwrap();

        let id = ResourceId { gvk: GroupVersionKind::from_api_version("apps/v1", "Deployment"), namespace: "ns".into(), name: "web".into() };
        let mut live = provisioner.store.get(&id).await.unwrap().unwrap();
        live["status"] = json!({"readyReplicas": 3});
        provisioner.store.update(&id, live).await.unwrap();

        let entry = provisioner.update(&config, &binding, None, entry).await.unwrap();
        assert_eq!(entry.get("operation-status"), Some(&json!("succeeded")));

        let merged = provisioner.store.get(&id).await.unwrap().unwrap();
        assert_eq!(merged["status"]["readyReplicas"], json!(3));
        assert_eq!(merged["metadata"]["name"], json!("web"));
    }

    #[tokio::test]
    async fn check_readiness_reports_in_progress_when_resource_is_missing() {
        let provisioner = Provisioner::new(InMemoryStore::default());
        let entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        let checks = vec![ReadinessCheck {
            condition: ConditionCheck {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                name: "web".into(),
                namespace: "ns".into(),
                condition_type: "Available".into(),
                status: "True".into(),
                timeout_seconds: None,
            },
        }];
        match provisioner.check_readiness(&checks, &entry).await.unwrap() {
            Readiness::InProgress(_) => {}
            Readiness::Ready => panic!("expected in-progress for a missing resource"),
        }
    }

    #[tokio::test]
    async fn check_readiness_is_ready_when_condition_matches() {
        let provisioner = Provisioner::new(InMemoryStore::default());
        let id = ResourceId { gvk: GroupVersionKind::from_api_version("apps/v1", "Deployment"), namespace: "ns".into(), name: "web".into() };
        provisioner
            .store
            .create(&id, json!({"status": {"conditions": [{"type": "Available", "status": "True"}]}}))
            .await
            .unwrap();

        let entry = provisioner.registry().open(EntryKind::ServiceInstance, "inst-1").await.unwrap();
        let checks = vec![ReadinessCheck {
            condition: ConditionCheck {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                name: "web".into(),
                namespace: "ns".into(),
                condition_type: "Available".into(),
                status: "True".into(),
                timeout_seconds: None,
            },
        }];
        assert_eq!(provisioner.check_readiness(&checks, &entry).await.unwrap(), Readiness::Ready);
    }
}
