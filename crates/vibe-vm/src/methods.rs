//! Methods callable on strings, lists and maps (`obj.method(...)`)

use crate::environment::Args;
use crate::error::{VmError, VmResult};
use crate::filters::{capitalize_str, map_items, title_str};
use crate::value::Value;

/// Dispatch `receiver.name(args)`
pub fn call_method(receiver: Value, name: &str, args: &Args) -> VmResult<Value> {
    match &receiver {
        Value::String(s) | Value::Safe(s) => string_method(s, name, args),
        Value::List(items) => list_method(items, name, args),
        Value::Map(map) => match name {
            "items" => Ok(map_items(map)),
            "keys" => Ok(map.keys().map(|k| Value::String(k.clone())).collect()),
            "values" => Ok(map.values().cloned().collect()),
            "get" => {
                let key = required(args, 0, "key", name)?.to_string();
                Ok(map
                    .get(&key)
                    .cloned()
                    .or_else(|| args.lookup(1, "default").cloned())
                    .unwrap_or(Value::None))
            }
            _ => Err(unknown(name, &receiver)),
        },
        _ => Err(unknown(name, &receiver)),
    }
}

fn unknown(method: &str, receiver: &Value) -> VmError {
    VmError::UnknownMethod {
        method: method.to_string(),
        type_name: receiver.type_name(),
    }
}

fn required<'a>(args: &'a Args, idx: usize, arg: &str, method: &str) -> VmResult<&'a Value> {
    args.lookup(idx, arg).ok_or_else(|| {
        VmError::type_error(format!("{}() missing required argument '{}'", method, arg))
    })
}

fn required_str<'a>(args: &'a Args, idx: usize, arg: &str, method: &str) -> VmResult<&'a str> {
    let value = required(args, idx, arg, method)?;
    value.as_str().ok_or_else(|| {
        VmError::type_error(format!(
            "{}() argument '{}' must be a string, not {}",
            method,
            arg,
            value.type_name()
        ))
    })
}

fn strip_with<'s>(s: &'s str, chars: Option<&str>, left: bool, right: bool) -> &'s str {
    let matches = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let s = if left { s.trim_start_matches(matches) } else { s };
    if right { s.trim_end_matches(matches) } else { s }
}

fn string_method(s: &str, name: &str, args: &Args) -> VmResult<Value> {
    let chars = args.lookup(0, "chars").and_then(Value::as_str);
    Ok(match name {
        "upper" => Value::String(s.to_uppercase()),
        "lower" => Value::String(s.to_lowercase()),
        "title" => Value::String(title_str(s)),
        "capitalize" => Value::String(capitalize_str(s)),
        "strip" => Value::from(strip_with(s, chars, true, true)),
        "lstrip" => Value::from(strip_with(s, chars, true, false)),
        "rstrip" => Value::from(strip_with(s, chars, false, true)),
        "split" => {
            let maxsplit = args
                .lookup(1, "maxsplit")
                .and_then(Value::as_i64)
                .and_then(|n| usize::try_from(n).ok());
            let parts: Vec<&str> = match (args.lookup(0, "sep").and_then(Value::as_str), maxsplit) {
                (Some(sep), Some(n)) => s.splitn(n + 1, sep).collect(),
                (Some(sep), None) => s.split(sep).collect(),
                (None, Some(n)) => split_whitespace_n(s, n),
                (None, None) => s.split_whitespace().collect(),
            };
            parts.into_iter().map(Value::from).collect()
        }
        "replace" => {
            let old = required_str(args, 0, "old", name)?;
            let new = required(args, 1, "new", name)?.to_string();
            match args.lookup(2, "count").and_then(Value::as_i64) {
                Some(n) if n >= 0 => {
                    Value::String(s.replacen(old, &new, usize::try_from(n).unwrap_or(0)))
                }
                _ => Value::String(s.replace(old, &new)),
            }
        }
        "startswith" => Value::Bool(s.starts_with(required_str(args, 0, "prefix", name)?)),
        "endswith" => Value::Bool(s.ends_with(required_str(args, 0, "suffix", name)?)),
        "join" => {
            let items = required(args, 0, "iterable", name)?.iter_items()?;
            let parts: Vec<String> = items.into_iter().map(Value::into_string).collect();
            Value::String(parts.join(s))
        }
        "count" => Value::from(s.matches(required_str(args, 0, "sub", name)?).count()),
        "find" | "index" => {
            let sub = required_str(args, 0, "sub", name)?;
            match s.find(sub) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None if name == "find" => Value::Int(-1),
                None => return Err(VmError::callback("substring not found")),
            }
        }
        _ => return Err(unknown(name, &Value::from(s))),
    })
}

fn split_whitespace_n(s: &str, n: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == n {
            parts.push(rest);
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    parts
}

fn list_method(items: &[Value], name: &str, args: &Args) -> VmResult<Value> {
    match name {
        "count" => {
            let needle = required(args, 0, "value", name)?;
            Ok(Value::from(items.iter().filter(|item| *item == needle).count()))
        }
        "index" => {
            let needle = required(args, 0, "value", name)?;
            items
                .iter()
                .position(|item| item == needle)
                .map(Value::from)
                .ok_or_else(|| VmError::callback(format!("{} is not in list", needle)))
        }
        _ => Err(VmError::UnknownMethod {
            method: name.to_string(),
            type_name: "list",
        }),
    }
}
