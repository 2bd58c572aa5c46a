//! The minimal expression/template language the parameter pipeline embeds:
//! a one-shot `tera::Tera` instance per render, with `registry`, `parameter`,
//! `snippet`, `default` and `list` registered as custom functions.
//! `printf`-style interpolation and ordinary string helpers (`upper`,
//! `trim`, ...) are tera builtins and need no extra wiring.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;
use tera::{Function, Tera};

use crate::error::{Error, ErrorKind, Result};
use crate::node;
use crate::params::EvalContext;

struct RegistryFn {
    entry: HashMap<String, Value>,
}
impl Function for RegistryFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = args.get("name").and_then(Value::as_str).ok_or("registry() requires a 'name' argument")?;
        Ok(self.entry.get(name).cloned().unwrap_or(Value::Null))
    }
}

struct ParameterFn {
    request_parameters: Value,
}
impl Function for ParameterFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let pointer = args.get("pointer").and_then(Value::as_str).ok_or("parameter() requires a 'pointer' argument")?;
        Ok(node::get_pointer(&self.request_parameters, pointer).cloned().unwrap_or(Value::Null))
    }
}

struct ListFn;
impl Function for ListFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let mut items: Vec<(usize, Value)> = args
            .iter()
            .filter_map(|(k, v)| k.strip_prefix('a').and_then(|n| n.parse::<usize>().ok()).map(|n| (n, v.clone())))
            .collect();
        items.sort_by_key(|(n, _)| *n);
        Ok(Value::Array(items.into_iter().map(|(_, v)| v).collect()))
    }
}

struct DefaultFn;
impl Function for DefaultFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let literal = args.get("literal").cloned().unwrap_or(Value::Null);
        let arg = args.get("arg").cloned().unwrap_or(Value::Null);
        let is_empty = matches!(&arg, Value::Null) || matches!(&arg, Value::String(s) if s.is_empty());
        Ok(if is_empty { literal } else { arg })
    }
}

/// `snippet(name="...")` calls are expanded before the template ever reaches
/// `tera`: the named template is fully rendered (recursively, through the
/// same `render_template` callback `Source::Template` uses) and spliced in
/// as its JSON text, since `tera::Function` implementations must be
/// `'static` and can't borrow `ctx` for the duration of one render.
fn expand_snippets(template: &str, ctx: &EvalContext, render_template: &dyn Fn(&str, &EvalContext) -> Result<Value>) -> Result<String> {
    let re = Regex::new(r#"\{\{\s*snippet\(\s*name\s*=\s*"([^"]+)"\s*\)\s*\}\}"#).expect("static snippet regex is valid");
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let whole = caps.get(0).expect("capture group 0 always matches");
        out.push_str(&template[last..whole.start()]);
        let name = &caps[1];
        let value = render_template(name, ctx)?;
        out.push_str(&serde_json::to_string(&value)?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Render `template` with `ctx` in scope: positional accessor results are
/// bound as `p0`, `p1`, ... and `p` (the full list), and `registry`,
/// `parameter`, `list`, `default` are available as functions (`snippet` is
/// handled by `expand_snippets` before `tera` ever sees the template).
pub fn render_format(template: &str, values: &[Value], ctx: &EvalContext, render_template: &dyn Fn(&str, &EvalContext) -> Result<Value>) -> Result<String> {
    let expanded = expand_snippets(template, ctx, render_template)?;

    let mut tera = Tera::default();
    tera.add_raw_template("__format", &expanded)
        .map_err(|e| Error::from(ErrorKind::ConfigurationError(format!("invalid format template: {}", e))))?;

    let entry_map: HashMap<String, Value> = ctx.entry.snapshot();
    tera.register_function("registry", RegistryFn { entry: entry_map });
    tera.register_function("parameter", ParameterFn { request_parameters: ctx.request_parameters.clone() });
    tera.register_function("list", ListFn);
    tera.register_function("default", DefaultFn);

    let mut tctx = tera::Context::new();
    for (i, v) in values.iter().enumerate() {
        tctx.insert(format!("p{}", i), v);
    }
    tctx.insert("p", values);

    tera.render("__format", &tctx).map_err(|e| Error::from(ErrorKind::ConfigurationError(format!("template render failed: {}", e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Entry, EntryKind};
    use serde_json::json;

    fn no_snippets(_: &str, _: &EvalContext) -> Result<Value> {
        Err(ErrorKind::ConfigurationError("no snippets in this test".into()).into())
    }

    #[test]
    fn substitutes_positional_parameters() {
        let entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let out = render_format("postgres://{{ p0 }}:{{ p1 }}/db", &[json!("host"), json!(5432)], &ctx, &no_snippets).unwrap();
        assert_eq!(out, "postgres://host:5432/db");
    }

    #[test]
    fn registry_function_reads_entry_snapshot() {
        let mut entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        entry.set("host", json!("db.local")).unwrap();
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let out = render_format("{{ registry(name=\"host\") }}", &[], &ctx, &no_snippets).unwrap();
        assert_eq!(out, "db.local");
    }

    #[test]
    fn snippet_embeds_rendered_template_as_json_text() {
        let entry = Entry::new_scratch(EntryKind::ServiceInstance, "id".into());
        let params = json!({});
        let ctx = EvalContext { request_parameters: &params, entry: &entry };
        let render_template = |name: &str, _: &EvalContext| -> Result<Value> {
            assert_eq!(name, "labels");
            Ok(json!({"app": "demo"}))
        };
        let out = render_format(r#"{"labels": {{ snippet(name="labels") }}}"#, &[], &ctx, &render_template).unwrap();
        assert_eq!(out, r#"{"labels": {"app":"demo"}}"#);
    }
}
