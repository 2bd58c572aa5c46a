//! The declarative broker configuration and its validator: a single
//! `verify()` walking every invariant and `bail!`ing on the first violation,
//! returning a `Condition` rather than aborting the process.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{ErrorKind, Result};

/// A single readiness check.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReadinessCheck {
    /// Currently the only check kind: read a resource, inspect a status condition.
    pub condition: ConditionCheck,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConditionCheck {
    pub api_version: String,
    pub kind: String,
    /// Templated - resolved against the registry/parameters at poll time.
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    /// Deadline override in seconds. Defaults to one minute when absent.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ConditionCheck {
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS)
    }
}

/// A named JSON value a pipeline commits to the registry before resources are
/// rendered.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistryValuePipeline {
    pub key: String,
    pub source: crate::params::Source,
}

/// An ordered set of registry pipelines, templates, and checks evaluated for
/// either an instance or a binding.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TemplateList {
    #[serde(default)]
    pub registry_values: Vec<RegistryValuePipeline>,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub checks: Vec<ReadinessCheck>,
}

/// A configuration binding: joins `(service.name, plan.name)` to the
/// instance/binding template lists.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConfigBinding {
    pub service_name: String,
    pub plan_name: String,
    pub instance: TemplateList,
    #[serde(default)]
    pub binding: Option<TemplateList>,
}

/// A named resource template.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Template {
    /// The serialized resource blob, any type the resource store supports.
    pub resource: Value,
    #[serde(default)]
    pub parameters: Vec<crate::params::Parameter>,
    #[serde(default)]
    pub singleton: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DashboardClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MaintenanceInfo {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SchemaSet {
    #[serde(default)]
    pub service_instance: Option<InstanceSchemas>,
    #[serde(default)]
    pub service_binding: Option<BindingSchemas>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct InstanceSchemas {
    #[serde(default)]
    pub create: Option<ParameterSchema>,
    #[serde(default)]
    pub update: Option<ParameterSchema>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BindingSchemas {
    #[serde(default)]
    pub create: Option<ParameterSchema>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ParameterSchema {
    pub parameters: Value,
}

/// A plan within a service offering.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub bindable: Option<bool>,
    #[serde(default)]
    pub schemas: Option<SchemaSet>,
    #[serde(default)]
    pub maintenance_info: Option<MaintenanceInfo>,
    #[serde(default)]
    pub plan_updatable: Option<bool>,
    #[serde(default)]
    pub metadata: Value,
}

/// A service offering.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dashboard_client: Option<DashboardClient>,
    #[serde(default)]
    pub plan_updatable: bool,
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub metadata: Value,
}

impl ServiceOffering {
    /// Effective `plan_updatable` for `plan`, defaulting to the offering's
    /// own value when the plan doesn't override it.
    pub fn plan_updatable_for(&self, plan: &Plan) -> bool {
        plan.plan_updatable.unwrap_or(self.plan_updatable)
    }

    /// Effective `bindable` for `plan`.
    pub fn bindable_for(&self, plan: &Plan) -> bool {
        plan.bindable.unwrap_or(self.bindable)
    }
}

/// The broker's entire declarative configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub services: Vec<ServiceOffering>,
    pub templates: BTreeMap<String, Template>,
    pub bindings: Vec<ConfigBinding>,
}

/// Reported by the configuration store after (re)validating a configuration
/// Reported after (re)validating a configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub valid: bool,
    pub reason: String,
}

impl Condition {
    pub fn valid() -> Self {
        Condition { valid: true, reason: "Validated".into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Condition { valid: false, reason: reason.into() }
    }
}

impl Config {
    /// Resolve the service offering + plan for an OSB `(service_id, plan_id)` pair.
    pub fn resolve(&self, service_id: &str, plan_id: &str) -> Result<(&ServiceOffering, &Plan)> {
        for svc in &self.services {
            if svc.id != service_id {
                continue;
            }
            for plan in &svc.plans {
                if plan.id == plan_id {
                    return Ok((svc, plan));
                }
            }
        }
        Err(ErrorKind::ConfigurationError(format!(
            "no service/plan found for service_id={} plan_id={}",
            service_id, plan_id
        ))
        .into())
    }

    /// Find the configuration binding matching `(service.name, plan.name)`
    /// (exactly one per pair, already checked at
    /// validation time).
    pub fn binding_for(&self, service: &ServiceOffering, plan: &Plan) -> Result<&ConfigBinding> {
        self.bindings
            .iter()
            .find(|b| b.service_name == service.name && b.plan_name == plan.name)
            .ok_or_else(|| {
                ErrorKind::ConfigurationError(format!(
                    "no configuration binding for service '{}' plan '{}'",
                    service.name, plan.name
                ))
                .into()
            })
    }

    /// Run every validation rule. Returns the first violation found as an
    /// `Err`.
    pub fn verify(&self) -> Result<()> {
        if self.services.is_empty() {
            bail!(ErrorKind::ConfigurationError("catalog must not be empty".into()));
        }

        let mut seen_pairs = BTreeSet::new();
        for svc in &self.services {
            let mut seen_plan_ids = BTreeSet::new();
            for plan in &svc.plans {
                if !seen_plan_ids.insert(plan.id.clone()) {
                    bail!(ErrorKind::ConfigurationError(format!(
                        "plan id '{}' duplicated within service '{}'",
                        plan.id, svc.name
                    )));
                }
                let pair = (svc.id.clone(), plan.id.clone());
                if !seen_pairs.insert(pair) {
                    bail!(ErrorKind::ConfigurationError(format!(
                        "(service.id, plan.id) = ({}, {}) is not globally unique",
                        svc.id, plan.id
                    )));
                }

                let matches: Vec<&ConfigBinding> = self
                    .bindings
                    .iter()
                    .filter(|b| b.service_name == svc.name && b.plan_name == plan.name)
                    .collect();
                if matches.len() != 1 {
                    bail!(ErrorKind::ConfigurationError(format!(
                        "service '{}' plan '{}' must have exactly one configuration binding, found {}",
                        svc.name,
                        plan.name,
                        matches.len()
                    )));
                }
                let binding = matches[0];

                for name in &binding.instance.templates {
                    if !self.templates.contains_key(name) {
                        bail!(ErrorKind::ConfigurationError(format!(
                            "instance template '{}' referenced by service '{}' plan '{}' does not exist",
                            name, svc.name, plan.name
                        )));
                    }
                }

                if svc.bindable_for(plan) {
                    let b = binding.binding.as_ref().ok_or_else(|| {
                        ErrorKind::ConfigurationError(format!(
                            "service '{}' plan '{}' is bindable but has no serviceBinding template list",
                            svc.name, plan.name
                        ))
                    })?;
                    for name in &b.templates {
                        if !self.templates.contains_key(name) {
                            bail!(ErrorKind::ConfigurationError(format!(
                                "binding template '{}' referenced by service '{}' plan '{}' does not exist",
                                name, svc.name, plan.name
                            )));
                        }
                    }
                }
            }
        }

        // Parameter pipelines must be syntactically parseable and generator
        // parameters legal.
        for tpl in self.templates.values() {
            for param in &tpl.parameters {
                param.verify_syntax()?;
            }
        }
        for binding in &self.bindings {
            for tl in [Some(&binding.instance), binding.binding.as_ref()].into_iter().flatten() {
                for rv in &tl.registry_values {
                    rv.source.verify_syntax()?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Source;
    use serde_json::json;

    fn minimal_config() -> Config {
        let mut templates = BTreeMap::new();
        templates.insert(
            "deployment".to_string(),
            Template { resource: json!({"kind": "Deployment"}), parameters: vec![], singleton: false },
        );
        Config {
            services: vec![ServiceOffering {
                id: "svc-1".into(),
                name: "svc".into(),
                description: "d".into(),
                bindable: false,
                tags: vec![],
                dashboard_client: None,
                plan_updatable: false,
                plans: vec![Plan {
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
            bindings: vec![ConfigBinding {
                service_name: "svc".into(),
                plan_name: "plan".into(),
                instance: TemplateList { registry_values: vec![], templates: vec!["deployment".into()], checks: vec![] },
                binding: None,
            }],
        }
    }

    #[test]
    fn minimal_config_verifies() {
        minimal_config().verify().unwrap();
    }

    #[test]
    fn rejects_dangling_template_reference() {
        let mut cfg = minimal_config();
        cfg.bindings[0].instance.templates.push("missing".into());
        assert!(cfg.verify().is_err());
    }

    #[test]
    fn rejects_bindable_plan_without_binding_template_list() {
        let mut cfg = minimal_config();
        cfg.services[0].bindable = true;
        assert!(cfg.verify().is_err());
    }

    #[test]
    fn rejects_missing_binding_for_service_plan_pair() {
        let mut cfg = minimal_config();
        cfg.bindings.clear();
        assert!(cfg.verify().is_err());
    }

    #[test]
    fn plan_updatable_defaults_to_offering_value() {
        let cfg = minimal_config();
        let svc = &cfg.services[0];
        let plan = &svc.plans[0];
        assert_eq!(svc.plan_updatable_for(plan), false);
    }

    #[test]
    fn source_with_unparseable_format_string_fails_verification() {
        let mut cfg = minimal_config();
        cfg.templates.get_mut("deployment").unwrap().parameters.push(crate::params::Parameter {
            required: false,
            default: None,
            source: Source::Format { string: "{{ unterminated".into(), parameters: vec![] },
            destinations: vec![],
        });
        assert!(cfg.verify().is_err());
    }
}
