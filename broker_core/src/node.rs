//! JSON-pointer tree manipulation for the parameter pipeline.
//!
//! `serde_json::Value` already is a dynamically-typed tree, so this module
//! only adds the write-side RFC 6901 operations `serde_json` itself doesn't
//! provide: creating intermediate objects along the path, and appending via
//! the `-` token.

use crate::error::{Error, ErrorKind, Result};
use serde_json::Value;

/// Split a JSON Pointer (leading `/` required, RFC 6901 `~1`/`~0` escapes
/// honored) into its unescaped tokens.
fn tokenize(pointer: &str) -> Result<Vec<String>> {
    if pointer.is_empty() {
        return Ok(vec![]);
    }
    if !pointer.starts_with('/') {
        return Err(ErrorKind::ConfigurationError(format!("invalid JSON pointer '{}'", pointer)).into());
    }
    Ok(pointer[1..]
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Patch `root` at `pointer`, creating intermediate objects as needed.
///
/// The trailing token may be:
/// - an object key (created if absent),
/// - `-` to append to an array,
/// - a decimal array index `<= len` (inserts/extends by at most one, RFC
///   6902 "add" semantics; an index more than one past the end is an error
///   rather than silently clamped).
pub fn set_pointer(root: &mut Value, pointer: &str, value: Value) -> Result<()> {
    let tokens = tokenize(pointer)?;
    if tokens.is_empty() {
        *root = value;
        return Ok(());
    }
    set_rec(root, &tokens, value)
}

fn set_rec(cur: &mut Value, tokens: &[String], value: Value) -> Result<()> {
    let (head, rest) = (&tokens[0], &tokens[1..]);

    if rest.is_empty() {
        return set_leaf(cur, head, value);
    }

    // Need an intermediate container at `head`. Decide object vs array by
    // whether the *next* token looks like an array operator.
    let next_is_array_token = rest[0] == "-" || rest[0].parse::<usize>().is_ok();
    ensure_container(cur, head, next_is_array_token)?;
    let child = get_mut_container(cur, head)?;
    set_rec(child, rest, value)
}

fn set_leaf(cur: &mut Value, token: &str, value: Value) -> Result<()> {
    match cur {
        Value::Object(map) => {
            map.insert(token.to_string(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if token == "-" {
                arr.push(value);
                return Ok(());
            }
            let idx: usize = token
                .parse()
                .map_err(|_| Error::from(ErrorKind::ConfigurationError(format!("invalid array index '{}'", token))))?;
            if idx == arr.len() {
                arr.push(value);
            } else if idx < arr.len() {
                arr[idx] = value;
            } else {
                return Err(ErrorKind::ConfigurationError(format!(
                    "array index {} out of bounds (len {})",
                    idx,
                    arr.len()
                ))
                .into());
            }
            Ok(())
        }
        Value::Null => {
            // Bare null placeholder: decide shape from the token itself.
            if token == "-" || token.parse::<usize>().is_ok() {
                let mut arr = vec![];
                if token != "-" {
                    // index must be 0 to extend an empty array
                    if token != "0" {
                        return Err(ErrorKind::ConfigurationError(format!(
                            "array index {} out of bounds (len 0)",
                            token
                        ))
                        .into());
                    }
                }
                arr.push(value);
                *cur = Value::Array(arr);
            } else {
                let mut map = serde_json::Map::new();
                map.insert(token.to_string(), value);
                *cur = Value::Object(map);
            }
            Ok(())
        }
        other => Err(ErrorKind::ConfigurationError(format!(
            "cannot set key '{}' on non-container value {:?}",
            token, other
        ))
        .into()),
    }
}

fn ensure_container(cur: &mut Value, token: &str, as_array: bool) -> Result<()> {
    if matches!(cur, Value::Null) {
        *cur = Value::Object(serde_json::Map::new());
    }
    match cur {
        Value::Object(map) => {
            let entry = map.entry(token.to_string()).or_insert(Value::Null);
            if matches!(entry, Value::Null) {
                *entry = if as_array {
                    Value::Array(vec![])
                } else {
                    Value::Object(serde_json::Map::new())
                };
            }
            Ok(())
        }
        Value::Array(arr) => {
            let idx: usize = if token == "-" {
                arr.len()
            } else {
                token
                    .parse()
                    .map_err(|_| Error::from(ErrorKind::ConfigurationError(format!("invalid array index '{}'", token))))?
            };
            while arr.len() <= idx {
                arr.push(Value::Null);
            }
            if matches!(arr[idx], Value::Null) {
                arr[idx] = if as_array {
                    Value::Array(vec![])
                } else {
                    Value::Object(serde_json::Map::new())
                };
            }
            Ok(())
        }
        other => Err(ErrorKind::ConfigurationError(format!("cannot descend into non-container value {:?}", other)).into()),
    }
}

fn get_mut_container<'a>(cur: &'a mut Value, token: &str) -> Result<&'a mut Value> {
    match cur {
        Value::Object(map) => map
            .get_mut(token)
            .ok_or_else(|| ErrorKind::Internal("container vanished after ensure_container".into()).into()),
        Value::Array(arr) => {
            let idx: usize = if token == "-" { arr.len() - 1 } else { token.parse().unwrap_or(0) };
            arr.get_mut(idx)
                .ok_or_else(|| ErrorKind::Internal("container vanished after ensure_container".into()).into())
        }
        _ => Err(ErrorKind::Internal("non-container after ensure_container".into()).into()),
    }
}

/// Read a node at `pointer`, returning `None` if any segment of the path is absent.
pub fn get_pointer<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() {
        return Some(root);
    }
    root.pointer(pointer)
}
