//! Renders the active configuration's catalog into the wire shape `GET /v2/catalog` returns.
//!
//! The internal `Config` model uses plain Rust field names (`plan_updatable`,
//! `dashboard_client`); the wire format keeps a few historical irregularities
//! (`plan_updateable`, with the extra `e`) that aren't worth carrying into
//! the Rust API, so this module does the one-shot rename on the way out.

use serde_json::{json, Map, Value};

use crate::config::{Config, Plan, ServiceOffering};

pub fn render(config: &Config) -> Value {
    json!({
        "services": config.services.iter().map(render_service).collect::<Vec<_>>(),
    })
}

/// Recursively snake_case object keys: a tree walk over the serialized
/// catalog value, renaming map keys only. Arrays recurse into their
/// elements; non-map scalars pass through unchanged.
fn snake_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(to_snake_case(&k), snake_case_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(snake_case_keys).collect()),
        other => other,
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn render_service(svc: &ServiceOffering) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), json!(svc.id));
    obj.insert("name".into(), json!(svc.name));
    obj.insert("description".into(), json!(svc.description));
    obj.insert("bindable".into(), json!(svc.bindable));
    obj.insert("plan_updateable".into(), json!(svc.plan_updatable));
    if !svc.tags.is_empty() {
        obj.insert("tags".into(), json!(svc.tags));
    }
    if let Some(dc) = &svc.dashboard_client {
        obj.insert(
            "dashboard_client".into(),
            json!({"id": dc.id, "secret": dc.secret, "redirect_uri": dc.redirect_uri}),
        );
    }
    if svc.metadata != Value::Null {
        obj.insert("metadata".into(), snake_case_keys(svc.metadata.clone()));
    }
    obj.insert("plans".into(), json!(svc.plans.iter().map(|p| render_plan(svc, p)).collect::<Vec<_>>()));
    Value::Object(obj)
}

fn render_plan(svc: &ServiceOffering, plan: &Plan) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), json!(plan.id));
    obj.insert("name".into(), json!(plan.name));
    obj.insert("description".into(), json!(plan.description));
    obj.insert("bindable".into(), json!(svc.bindable_for(plan)));
    obj.insert("plan_updateable".into(), json!(svc.plan_updatable_for(plan)));
    if plan.metadata != Value::Null {
        obj.insert("metadata".into(), snake_case_keys(plan.metadata.clone()));
    }
    if let Some(mi) = &plan.maintenance_info {
        obj.insert("maintenance_info".into(), json!({"version": mi.version, "description": mi.description}));
    }
    if let Some(schemas) = &plan.schemas {
        let mut schemas_obj = Map::new();
        if let Some(si) = &schemas.service_instance {
            let mut instance_obj = Map::new();
            if let Some(c) = &si.create {
                instance_obj.insert("create".into(), json!({"parameters": c.parameters}));
            }
            if let Some(u) = &si.update {
                instance_obj.insert("update".into(), json!({"parameters": u.parameters}));
            }
            schemas_obj.insert("service_instance".into(), Value::Object(instance_obj));
        }
        if let Some(sb) = &schemas.service_binding {
            let mut binding_obj = Map::new();
            if let Some(c) = &sb.create {
                binding_obj.insert("create".into(), json!({"parameters": c.parameters}));
            }
            schemas_obj.insert("service_binding".into(), Value::Object(binding_obj));
        }
        obj.insert("schemas".into(), Value::Object(schemas_obj));
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBinding, MaintenanceInfo, Template, TemplateList};
    use std::collections::BTreeMap;

    fn config_with(plan_updatable: bool, plan_override: Option<bool>) -> Config {
        let mut templates = BTreeMap::new();
        templates.insert("t".to_string(), Template { resource: json!({}), parameters: vec![], singleton: false });
        Config {
            services: vec![ServiceOffering {
                id: "s".into(),
                name: "s".into(),
                description: "d".into(),
                bindable: false,
                tags: vec!["tag1".into()],
                dashboard_client: None,
                plan_updatable,
                plans: vec![Plan {
                    id: "p".into(),
                    name: "p".into(),
                    description: "d".into(),
                    bindable: None,
                    schemas: None,
                    maintenance_info: Some(MaintenanceInfo { version: "1.0".into(), description: None }),
                    plan_updatable: plan_override,
                    metadata: Value::Null,
                }],
                metadata: Value::Null,
            }],
            templates,
            bindings: vec![ConfigBinding {
                service_name: "s".into(),
                plan_name: "p".into(),
                instance: TemplateList { registry_values: vec![], templates: vec!["t".into()], checks: vec![] },
                binding: None,
            }],
        }
    }

    #[test]
    fn renames_plan_updatable_to_wire_spelling() {
        let rendered = render(&config_with(true, None));
        assert_eq!(rendered["services"][0]["plan_updateable"], json!(true));
        assert_eq!(rendered["services"][0]["plans"][0]["plan_updateable"], json!(true));
    }

    #[test]
    fn plan_level_override_wins_over_service_default() {
        let rendered = render(&config_with(true, Some(false)));
        assert_eq!(rendered["services"][0]["plans"][0]["plan_updateable"], json!(false));
    }

    #[test]
    fn maintenance_info_is_rendered_when_present() {
        let rendered = render(&config_with(false, None));
        assert_eq!(rendered["services"][0]["plans"][0]["maintenance_info"]["version"], json!("1.0"));
    }

    #[test]
    fn opaque_metadata_keys_are_recursively_snake_cased() {
        let mut cfg = config_with(false, None);
        cfg.services[0].metadata = json!({"displayName": "Demo", "nested": {"imageUrl": "x", "list": [{"longDescription": "y"}]}});
        let rendered = render(&cfg);
        let metadata = &rendered["services"][0]["metadata"];
        assert_eq!(metadata["display_name"], json!("Demo"));
        assert_eq!(metadata["nested"]["image_url"], json!("x"));
        assert_eq!(metadata["nested"]["list"][0]["long_description"], json!("y"));
    }
}
