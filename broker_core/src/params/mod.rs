//! Parameter sources, destinations and the evaluation pipeline. Modeled as
//! a tagged sum type with one variant per source kind rather than an
//! inheritance hierarchy.

mod lang;
mod password;
mod keygen;
mod certgen;

pub use keygen::{KeyEncoding, KeyType};
pub use password::generate_password;

use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::node;
use crate::registry::Entry;

/// A single accessor: where a value is read from before any formatting.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Accessor {
    /// `{parameter: "/<JSON-Pointer>"}` — a node in the raw request `parameters` object.
    Parameter { parameter: String },
    /// `{registry: "<name>"}` — a registry key on the current entry.
    Registry { registry: String },
}

impl Accessor {
    fn evaluate(&self, ctx: &EvalContext) -> Result<Option<Value>> {
        match self {
            Accessor::Parameter { parameter } => Ok(node::get_pointer(ctx.request_parameters, parameter).cloned()),
            Accessor::Registry { registry } => {
                if registry == "parameters" {
                    return Err(ErrorKind::ConfigurationError(
                        "'parameters' is a reserved registry key and is not user-addressable as a source".into(),
                    )
                    .into());
                }
                Ok(ctx.entry.get(registry).cloned())
            }
        }
    }
}

/// A literal default value substituted when a source evaluates to absent.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum Literal {
    String(String),
    Bool(bool),
    Int(i64),
    Object(Value),
}

impl From<Literal> for Value {
    fn from(l: Literal) -> Value {
        match l {
            Literal::String(s) => Value::String(s),
            Literal::Bool(b) => Value::Bool(b),
            Literal::Int(i) => Value::Number(i.into()),
            Literal::Object(v) => v,
        }
    }
}

/// Key-generation configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GenerateKeySpec {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub encoding: KeyEncoding,
    #[serde(default)]
    pub bits: Option<u32>,
}

/// Certificate usage.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertUsage {
    Ca,
    Server,
    Client,
}

/// CA key+certificate pair referenced by accessor.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CaRef {
    pub key: Accessor,
    pub certificate: Accessor,
}

/// Certificate generation configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GenerateCertificateSpec {
    pub key: Accessor,
    pub common_name: String,
    /// Lifetime in seconds.
    pub lifetime_seconds: i64,
    pub usage: CertUsage,
    #[serde(default)]
    pub sans: Vec<String>,
    #[serde(default)]
    pub ca: Option<CaRef>,
}

/// A parameter's evaluation source — exactly one of six kinds.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Source {
    Accessor(Accessor),
    Format {
        string: String,
        #[serde(default)]
        parameters: Vec<Accessor>,
    },
    GeneratePassword {
        length: usize,
        #[serde(default)]
        dictionary: Option<String>,
    },
    GenerateKey(GenerateKeySpec),
    GenerateCertificate(GenerateCertificateSpec),
    Template {
        template: String,
    },
}

impl Source {
    /// Catch obviously-malformed sources at configuration-validation time.
    pub fn verify_syntax(&self) -> Result<()> {
        match self {
            Source::Format { string, .. } => {
                let mut tera = tera::Tera::default();
                tera.add_raw_template("__verify", string)
                    .map_err(|e| Error::from(ErrorKind::ConfigurationError(format!("invalid format string: {}", e))))?;
                Ok(())
            }
            Source::GeneratePassword { length, .. } => {
                if *length == 0 {
                    bail!(ErrorKind::ConfigurationError("generatePassword length must be >= 1".into()));
                }
                Ok(())
            }
            Source::GenerateKey(spec) => keygen::verify_combination(spec),
            Source::GenerateCertificate(_) => Ok(()),
            Source::Accessor(_) | Source::Template { .. } => Ok(()),
        }
    }

    /// Evaluate this source in `ctx`, rendering embedded templates through
    /// `render_template` (supplied by the caller so the provisioner controls
    /// recursion against the live `Config`).
    pub fn evaluate(&self, ctx: &EvalContext, render_template: &dyn Fn(&str, &EvalContext) -> Result<Value>) -> Result<Evaluated> {
        match self {
            Source::Accessor(a) => match a.evaluate(ctx)? {
                Some(v) => Ok(Evaluated::Value(v)),
                None => Ok(Evaluated::Absent),
            },
            Source::Format { string, parameters } => {
                let mut values = Vec::with_capacity(parameters.len());
                for p in parameters {
                    match p.evaluate(ctx)? {
                        Some(v) => values.push(v),
                        None => return Ok(Evaluated::Absent),
                    }
                }
                let rendered = lang::render_format(string, &values, ctx, render_template)?;
                Ok(Evaluated::Value(Value::String(rendered)))
            }
            Source::GeneratePassword { length, dictionary } => {
                let dict = dictionary.clone().unwrap_or_else(|| {
                    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_string()
                });
                Ok(Evaluated::Value(Value::String(password::generate_password(*length, &dict)?)))
            }
            Source::GenerateKey(spec) => Ok(Evaluated::Value(Value::String(keygen::generate(spec)?))),
            Source::GenerateCertificate(spec) => {
                let subject_key_pem = match spec.key.evaluate(ctx)? {
                    Some(Value::String(s)) => s,
                    Some(_) => {
                        return Err(ErrorKind::ConfigurationError("generateCertificate key accessor did not yield a string".into()).into())
                    }
                    None => return Ok(Evaluated::Absent),
                };
                let ca = match &spec.ca {
                    None => None,
                    Some(caref) => {
                        let key = match caref.key.evaluate(ctx)? {
                            Some(Value::String(s)) => s,
                            _ => return Ok(Evaluated::Absent),
                        };
                        let cert = match caref.certificate.evaluate(ctx)? {
                            Some(Value::String(s)) => s,
                            _ => return Ok(Evaluated::Absent),
                        };
                        Some((key, cert))
                    }
                };
                let pem = certgen::generate(&subject_key_pem, spec, ca.as_ref().map(|(k, c)| (k.as_str(), c.as_str())))?;
                Ok(Evaluated::Value(Value::String(pem)))
            }
            Source::Template { template } => render_template(template, ctx).map(Evaluated::Value),
        }
    }
}

/// Where an evaluated parameter value is written.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    Path { path: String },
    Registry { registry: String },
}

/// A full parameter: source, optional default/required, one or more destinations.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Parameter {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Literal>,
    pub source: Source,
    pub destinations: Vec<Destination>,
}

impl Parameter {
    pub fn verify_syntax(&self) -> Result<()> {
        self.source.verify_syntax()
    }

    /// Evaluate this parameter, returning `None` when it should be skipped
    /// entirely (absent, not required, no default).
    pub fn evaluate(
        &self,
        ctx: &EvalContext,
        render_template: &dyn Fn(&str, &EvalContext) -> Result<Value>,
        is_update: bool,
    ) -> Result<Option<Value>> {
        match self.source.evaluate(ctx, render_template)? {
            Evaluated::Value(v) => Ok(Some(v)),
            Evaluated::Absent => {
                if let Some(default) = &self.default {
                    return Ok(Some(default.clone().into()));
                }
                if self.required {
                    let kind = if is_update {
                        ErrorKind::ValidationError("required parameter is absent".into())
                    } else {
                        ErrorKind::ConfigurationError("required parameter is absent".into())
                    };
                    return Err(kind.into());
                }
                Ok(None)
            }
        }
    }
}

/// Apply an evaluated value to all of a parameter's destinations.
pub fn apply_destinations(destinations: &[Destination], value: &Value, resource: &mut Value, entry: &mut Entry) -> Result<()> {
    for dest in destinations {
        match dest {
            Destination::Path { path } => node::set_pointer(resource, path, value.clone())?,
            Destination::Registry { registry } => entry.set_checked(registry, value.clone())?,
        }
    }
    Ok(())
}

/// The result of evaluating a `Source`.
pub enum Evaluated {
    Value(Value),
    Absent,
}

/// Everything a `Source` needs to resolve against: the raw request
/// parameters object and the current registry entry.
pub struct EvalContext<'a> {
    pub request_parameters: &'a Value,
    pub entry: &'a Entry,
}

/// Render a standalone template snippet (no positional accessors, just
/// `registry()`/`parameter()`/`list()`/`default()` in scope). Used wherever
/// a resource field is itself a template string rather than a `Source`, e.g.
/// a readiness check's templated name/namespace. `snippet()` is not
/// available in this context - there is no enclosing template to recurse
/// into a `Config` for.
pub fn render_snippet(template: &str, ctx: &EvalContext) -> Result<Value> {
    let no_snippets = |_: &str, _: &EvalContext| -> Result<Value> {
        Err(ErrorKind::ConfigurationError("snippet() is not available when templating a readiness check".into()).into())
    };
    lang::render_format(template, &[], ctx, &no_snippets).map(Value::String)
}

/// Fully render a named template: its static resource blob with every one of
/// its parameters' destinations applied, in order.
///
/// Used both as the top-level entry point the provisioner calls per
/// instance/binding template, and - through the `render_template` callback
/// threaded into every `Source::evaluate` - recursively for `Source::Template`
/// embeds and `snippet()` calls. Recursive calls render against a scratch
/// clone of `entry` (`Destination::Registry` writes from a nested/embedded
/// template don't propagate to the real entry - only a top-level template
/// list entry's own destinations do); `is_update` only applies at the top
/// level, nested renders always evaluate as if provisioning.
pub fn render_named_template(
    templates: &std::collections::BTreeMap<String, crate::config::Template>,
    name: &str,
    request_parameters: &Value,
    entry: &mut Entry,
    is_update: bool,
) -> Result<Value> {
    let tpl = templates
        .get(name)
        .cloned()
        .ok_or_else(|| Error::from(ErrorKind::Internal(format!("template '{}' vanished after configuration validation", name))))?;
    let mut resource = tpl.resource.clone();

    for param in &tpl.parameters {
        let value = {
            let ctx = EvalContext { request_parameters, entry: &*entry };
            let render_template = |n: &str, c: &EvalContext| -> Result<Value> {
                let mut scratch = c.entry.clone();
                render_named_template(templates, n, c.request_parameters, &mut scratch, false)
            };
            param.evaluate(&ctx, &render_template, is_update)?
        };
        if let Some(v) = value {
            apply_destinations(&param.destinations, &v, &mut resource, entry)?;
        }
    }
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Entry, EntryKind};
    use serde_json::json;

    fn noop_render(_: &str, _: &EvalContext) -> Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn accessor_on_missing_parameter_is_absent() {
        let entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let src = Source::Accessor(Accessor::Parameter { parameter: "/missing".into() });
        match src.evaluate(&ctx, &noop_render).unwrap() {
            Evaluated::Absent => {}
            _ => panic!("expected absent"),
        }
    }

    #[test]
    fn format_source_requires_all_accessors_present() {
        let mut entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        entry.set("host", json!("db.local")).unwrap();
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let src = Source::Format {
            string: "postgres://{{ p0 }}/missing".into(),
            parameters: vec![Accessor::Registry { registry: "host".into() }, Accessor::Parameter { parameter: "/nope".into() }],
        };
        match src.evaluate(&ctx, &noop_render).unwrap() {
            Evaluated::Absent => {}
            _ => panic!("expected absent due to missing second accessor"),
        }
    }

    #[test]
    fn reading_parameters_reserved_key_as_registry_source_fails() {
        let entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let src = Source::Accessor(Accessor::Registry { registry: "parameters".into() });
        assert!(src.evaluate(&ctx, &noop_render).is_err());
    }

    #[test]
    fn generate_password_has_requested_length() {
        let entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let src = Source::GeneratePassword { length: 23, dictionary: None };
        match src.evaluate(&ctx, &noop_render).unwrap() {
            Evaluated::Value(Value::String(s)) => assert_eq!(s.len(), 23),
            _ => panic!("expected a password string"),
        }
    }
}
