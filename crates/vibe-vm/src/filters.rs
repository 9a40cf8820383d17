//! Built-in filters
//!
//! The specialized filter opcodes call the same functions as the registry
//! entries. Functions that can prove their input already satisfies the
//! result return it unchanged.

use std::cmp::Ordering;

use crate::environment::{Args, Environment};
use crate::error::{VmError, VmResult};
use crate::ops;
use crate::value::{Value, ValueMap};

/// Register every built-in filter on `env`
pub(crate) fn register(env: &mut Environment) {
    env.add_filter("upper", upper);
    env.add_filter("lower", lower);
    env.add_filter("capitalize", capitalize);
    env.add_filter("title", title);
    env.add_filter("trim", trim);
    env.add_filter("escape", escape);
    env.add_filter("e", escape);
    env.add_filter("safe", safe);
    env.add_filter("length", length);
    env.add_filter("count", length);
    env.add_filter("first", first);
    env.add_filter("last", last);
    env.add_filter("default", default);
    env.add_filter("d", default);
    env.add_filter("string", string);
    env.add_filter("int", int);
    env.add_filter("float", float);
    env.add_filter("join", join);
    env.add_filter("reverse", reverse);
    env.add_filter("sort", sort);
    env.add_filter("replace", replace);
    env.add_filter("list", list);
    env.add_filter("abs", abs);
    env.add_filter("round", round);
    env.add_filter("sum", sum);
    env.add_filter("wordcount", wordcount);
    env.add_filter("truncate", truncate);
    env.add_filter("center", center);
    env.add_filter("indent", indent);
    env.add_filter("dictsort", dictsort);
    env.add_filter("unique", unique);
}

// ==================== Escaping ====================

/// Append `s` to `out` with HTML special characters replaced
pub fn escape_into(out: &mut String, s: &str) {
    let mut last = 0;
    for (i, b) in s.bytes().enumerate() {
        let replacement = match b {
            b'&' => "&amp;",
            b'<' => "&lt;",
            b'>' => "&gt;",
            b'"' => "&#34;",
            b'\'' => "&#39;",
            _ => continue,
        };
        out.push_str(&s[last..i]);
        out.push_str(replacement);
        last = i + 1;
    }
    out.push_str(&s[last..]);
}

fn needs_escape(s: &str) -> bool {
    s.bytes().any(|b| matches!(b, b'&' | b'<' | b'>' | b'"' | b'\''))
}

/// `escape` / `e`
pub fn escape(value: Value, _: &Args) -> VmResult<Value> {
    Ok(match value {
        Value::Safe(_) => value,
        Value::String(s) if !needs_escape(&s) => Value::Safe(s),
        other => {
            let text = other.into_string();
            let mut out = String::with_capacity(text.len() + 8);
            escape_into(&mut out, &text);
            Value::Safe(out)
        }
    })
}

/// `safe`
pub fn safe(value: Value, _: &Args) -> VmResult<Value> {
    Ok(match value {
        Value::Safe(_) => value,
        other => Value::Safe(other.into_string()),
    })
}

// ==================== Strings ====================

/// Rebuild a string value, keeping its safe marker
fn map_text(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::Safe(s) => Value::Safe(f(&s)),
        other => Value::String(f(&other.into_string())),
    }
}

/// `upper`
pub fn upper(value: Value, _: &Args) -> VmResult<Value> {
    if value.as_str().is_some_and(|s| !s.chars().any(char::is_lowercase)) {
        return Ok(value);
    }
    Ok(map_text(value, str::to_uppercase))
}

/// `lower`
pub fn lower(value: Value, _: &Args) -> VmResult<Value> {
    if value.as_str().is_some_and(|s| !s.chars().any(char::is_uppercase)) {
        return Ok(value);
    }
    Ok(map_text(value, str::to_lowercase))
}

/// First character upper case, the rest lower case
pub(crate) fn capitalize_str(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Every word capitalized
pub(crate) fn title_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if boundary {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        boundary = !c.is_alphanumeric();
    }
    out
}

/// `capitalize`
pub fn capitalize(value: Value, _: &Args) -> VmResult<Value> {
    Ok(map_text(value, capitalize_str))
}

/// `title`
pub fn title(value: Value, _: &Args) -> VmResult<Value> {
    Ok(map_text(value, title_str))
}

/// `trim(chars=None)`
pub fn trim(value: Value, args: &Args) -> VmResult<Value> {
    let chars = args.lookup(0, "chars").and_then(Value::as_str);
    if let Some(s) = value.as_str() {
        let trimmed = match chars {
            Some(set) => s.trim_matches(|c| set.contains(c)),
            None => s.trim(),
        };
        if trimmed.len() == s.len() {
            return Ok(value);
        }
    }
    Ok(map_text(value, |s| match chars {
        Some(set) => s.trim_matches(|c| set.contains(c)).to_string(),
        None => s.trim().to_string(),
    }))
}

/// `replace(old, new, count=None)`
pub fn replace(value: Value, args: &Args) -> VmResult<Value> {
    let old = args
        .lookup(0, "old")
        .and_then(Value::as_str)
        .ok_or_else(|| VmError::type_error("replace() requires a string 'old' argument"))?;
    let new = args.lookup(1, "new").map(Value::to_string).unwrap_or_default();
    let count = args.lookup(2, "count").and_then(Value::as_i64);
    Ok(map_text(value, |s| match count {
        Some(n) => s.replacen(old, &new, usize::try_from(n).unwrap_or(0)),
        None => s.replace(old, &new),
    }))
}

/// `wordcount`
pub fn wordcount(value: Value, _: &Args) -> VmResult<Value> {
    Ok(Value::from(value.to_string().split_whitespace().count()))
}

/// `truncate(length=255, killwords=false, end='...', leeway=5)`
pub fn truncate(value: Value, args: &Args) -> VmResult<Value> {
    let length = int_arg(args, 0, "length", 255)?;
    let killwords = args.lookup(1, "killwords").is_some_and(Value::is_truthy);
    let end = args
        .lookup(2, "end")
        .map(Value::to_string)
        .unwrap_or_else(|| "...".to_string());
    let leeway = int_arg(args, 3, "leeway", 5)?;

    let text = value.into_string();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= length.saturating_add(leeway) {
        return Ok(Value::String(text));
    }
    let keep = length.saturating_sub(end.chars().count());
    let head: String = chars[..keep.min(chars.len())].iter().collect();
    let head = if killwords {
        head
    } else {
        match head.rfind(' ') {
            Some(idx) => head[..idx].to_string(),
            None => head,
        }
    };
    Ok(Value::String(head + &end))
}

/// `center(width=80)`
pub fn center(value: Value, args: &Args) -> VmResult<Value> {
    let width = int_arg(args, 0, "width", 80)?;
    let text = value.into_string();
    let len = text.chars().count();
    if len >= width {
        return Ok(Value::String(text));
    }
    let total = width - len;
    ops::checked_len(total, 1, "center")?;
    let left = total / 2 + (total & width & 1);
    let right = total - left;
    Ok(Value::String(format!(
        "{}{}{}",
        " ".repeat(left),
        text,
        " ".repeat(right)
    )))
}

/// `indent(width=4, first=false, blank=false)`
pub fn indent(value: Value, args: &Args) -> VmResult<Value> {
    let pad = match args.lookup(0, "width") {
        Some(Value::String(s) | Value::Safe(s)) => s.clone(),
        Some(v) => {
            let width = usize::try_from(v.as_i64().unwrap_or(4)).unwrap_or(0);
            " ".repeat(ops::checked_len(width, 1, "indent")?)
        }
        None => "    ".to_string(),
    };
    let first = args.lookup(1, "first").is_some_and(Value::is_truthy);
    let blank = args.lookup(2, "blank").is_some_and(Value::is_truthy);
    Ok(map_text(value, |s| {
        let mut out = String::with_capacity(s.len());
        for (i, line) in s.split('\n').enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let indent = (i > 0 || first) && (blank || !line.trim().is_empty());
            if indent {
                out.push_str(&pad);
            }
            out.push_str(line);
        }
        out
    }))
}

// ==================== Sequences ====================

/// `length` / `count`
pub fn length(value: Value, _: &Args) -> VmResult<Value> {
    match value.len() {
        Some(n) => Ok(Value::from(n)),
        None if value.is_undefined() => Ok(Value::Int(0)),
        None => Err(VmError::type_error(format!(
            "object of type '{}' has no len()",
            value.type_name()
        ))),
    }
}

/// `first`
pub fn first(value: Value, _: &Args) -> VmResult<Value> {
    Ok(match value {
        Value::List(items) => items.into_iter().next().unwrap_or_default(),
        Value::String(s) | Value::Safe(s) => s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or_default(),
        Value::Map(map) => map.into_keys().next().map(Value::String).unwrap_or_default(),
        _ => Value::Undefined,
    })
}

/// `last`
pub fn last(value: Value, _: &Args) -> VmResult<Value> {
    Ok(match value {
        Value::List(mut items) => items.pop().unwrap_or_default(),
        Value::String(s) | Value::Safe(s) => s
            .chars()
            .next_back()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or_default(),
        Value::Map(map) => map.into_keys().next_back().map(Value::String).unwrap_or_default(),
        _ => Value::Undefined,
    })
}

/// `join(d='', attribute=None)`
pub fn join(value: Value, args: &Args) -> VmResult<Value> {
    let sep = args.lookup(0, "d").map(Value::to_string).unwrap_or_default();
    let attribute = args.kwarg("attribute").map(Value::to_string);
    let mut out = String::new();
    for (i, item) in value.iter_items()?.into_iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        let item = match &attribute {
            Some(attr) => get_attr(&item, attr),
            None => item,
        };
        out.push_str(&item.to_string());
    }
    Ok(Value::String(out))
}

/// `reverse`
pub fn reverse(value: Value, _: &Args) -> VmResult<Value> {
    match value {
        Value::String(s) | Value::Safe(s) => Ok(Value::String(s.chars().rev().collect())),
        other => {
            let mut items = other.iter_items()?;
            items.reverse();
            Ok(Value::List(items))
        }
    }
}

/// `list`
pub fn list(value: Value, _: &Args) -> VmResult<Value> {
    match value {
        Value::List(_) => Ok(value),
        other => Ok(Value::List(other.iter_items()?)),
    }
}

fn sort_key(value: &Value, case_sensitive: bool, attribute: Option<&str>) -> Value {
    let value = match attribute {
        Some(attr) => get_attr(value, attr),
        None => value.clone(),
    };
    match value {
        Value::String(s) | Value::Safe(s) if !case_sensitive => Value::String(s.to_lowercase()),
        other => other,
    }
}

/// `sort(reverse=false, case_sensitive=false, attribute=None)`
pub fn sort(value: Value, args: &Args) -> VmResult<Value> {
    let descending = args.lookup(0, "reverse").is_some_and(Value::is_truthy);
    let case_sensitive = args.lookup(1, "case_sensitive").is_some_and(Value::is_truthy);
    let attribute = args.lookup(2, "attribute").and_then(Value::as_str);

    let mut keyed: Vec<(Value, Value)> = value
        .iter_items()?
        .into_iter()
        .map(|item| (sort_key(&item, case_sensitive, attribute), item))
        .collect();
    let mut failed = None;
    keyed.sort_by(|(a, _), (b, _)| {
        a.compare(b).unwrap_or_else(|| {
            if failed.is_none() {
                failed = Some((a.type_name(), b.type_name()));
            }
            Ordering::Equal
        })
    });
    if let Some((a, b)) = failed {
        return Err(VmError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a, b
        )));
    }
    let mut items: Vec<Value> = keyed.into_iter().map(|(_, item)| item).collect();
    if descending {
        items.reverse();
    }
    Ok(Value::List(items))
}

/// `unique(case_sensitive=false)`
pub fn unique(value: Value, args: &Args) -> VmResult<Value> {
    let case_sensitive = args.lookup(0, "case_sensitive").is_some_and(Value::is_truthy);
    let mut seen: Vec<Value> = Vec::new();
    let mut out = Vec::new();
    for item in value.iter_items()? {
        let key = sort_key(&item, case_sensitive, None);
        if !seen.contains(&key) {
            seen.push(key);
            out.push(item);
        }
    }
    Ok(Value::List(out))
}

/// `dictsort(case_sensitive=false, by='key', reverse=false)`
pub fn dictsort(value: Value, args: &Args) -> VmResult<Value> {
    let Value::Map(map) = value else {
        return Err(VmError::type_error(format!(
            "dictsort expects a mapping, got {}",
            value.type_name()
        )));
    };
    let case_sensitive = args.lookup(0, "case_sensitive").is_some_and(Value::is_truthy);
    let by_value = match args.lookup(1, "by").and_then(Value::as_str) {
        None | Some("key") => false,
        Some("value") => true,
        Some(other) => {
            return Err(VmError::callback(format!(
                "dictsort: 'by' must be 'key' or 'value', not '{}'",
                other
            )));
        }
    };
    let descending = args.lookup(2, "reverse").is_some_and(Value::is_truthy);

    let pairs: Vec<Value> = map
        .into_iter()
        .map(|(k, v)| Value::List(vec![Value::String(k), v]))
        .collect();
    let mut sort_args = Args::default();
    sort_args.kwargs.insert("reverse".into(), Value::Bool(descending));
    sort_args
        .kwargs
        .insert("case_sensitive".into(), Value::Bool(case_sensitive));
    sort_args
        .kwargs
        .insert("attribute".into(), Value::from(if by_value { "1" } else { "0" }));
    sort(Value::List(pairs), &sort_args)
}

/// `sum(attribute=None, start=0)`
pub fn sum(value: Value, args: &Args) -> VmResult<Value> {
    let attribute = args.lookup(0, "attribute").and_then(Value::as_str);
    let mut total = args.lookup(1, "start").cloned().unwrap_or(Value::Int(0));
    for item in value.iter_items()? {
        let item = match attribute {
            Some(attr) => get_attr(&item, attr),
            None => item,
        };
        total = ops::add(total, item)?;
    }
    Ok(total)
}

// ==================== Conversion ====================

/// `default(default_value='', boolean=false)`
pub fn default(value: Value, args: &Args) -> VmResult<Value> {
    let boolean = args.lookup(1, "boolean").is_some_and(Value::is_truthy);
    if value.is_undefined() || (boolean && !value.is_truthy()) {
        return Ok(args
            .lookup(0, "default_value")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())));
    }
    Ok(value)
}

/// `string`
pub fn string(value: Value, _: &Args) -> VmResult<Value> {
    Ok(match value {
        Value::String(_) | Value::Safe(_) => value,
        other => Value::String(other.to_string()),
    })
}

/// `int(default=0, base=10)`
pub fn int(value: Value, args: &Args) -> VmResult<Value> {
    let fallback = args.lookup(0, "default").cloned().unwrap_or(Value::Int(0));
    let base = args.lookup(1, "base").and_then(Value::as_i64).unwrap_or(10);
    Ok(match value {
        Value::Int(_) => value,
        Value::Bool(b) => Value::Int(i64::from(b)),
        Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
        Value::String(s) | Value::Safe(s) => parse_int(s.trim(), base).unwrap_or(fallback),
        _ => fallback,
    })
}

fn parse_int(s: &str, base: i64) -> Option<Value> {
    let radix = u32::try_from(base).ok().filter(|r| (2..=36).contains(r))?;
    if let Ok(n) = i64::from_str_radix(s, radix) {
        return Some(Value::Int(n));
    }
    if radix == 10 {
        let f: f64 = s.parse().ok()?;
        return f.is_finite().then(|| Value::Int(f.trunc() as i64));
    }
    None
}

/// `float(default=0.0)`
pub fn float(value: Value, args: &Args) -> VmResult<Value> {
    let fallback = args.lookup(0, "default").cloned().unwrap_or(Value::Float(0.0));
    Ok(match value {
        Value::Float(_) => value,
        Value::Int(n) => Value::Float(n as f64),
        Value::Bool(b) => Value::Float(f64::from(u8::from(b))),
        Value::String(s) | Value::Safe(s) => {
            s.trim().parse::<f64>().map(Value::Float).unwrap_or(fallback)
        }
        _ => fallback,
    })
}

/// `abs`
pub fn abs(value: Value, _: &Args) -> VmResult<Value> {
    match value {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or(VmError::IntegerOverflow("abs")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(VmError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

/// `round(precision=0, method='common')`
pub fn round(value: Value, args: &Args) -> VmResult<Value> {
    let x = value.as_f64().ok_or_else(|| {
        VmError::type_error(format!("cannot round a {}", value.type_name()))
    })?;
    let precision = args.lookup(0, "precision").and_then(Value::as_i64).unwrap_or(0);
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(0));
    let scaled = x * factor;
    let rounded = match args.lookup(1, "method").and_then(Value::as_str) {
        None | Some("common") => scaled.round(),
        Some("ceil") => scaled.ceil(),
        Some("floor") => scaled.floor(),
        Some(other) => {
            return Err(VmError::callback(format!(
                "round: method must be 'common', 'ceil' or 'floor', not '{}'",
                other
            )));
        }
    };
    Ok(Value::Float(rounded / factor))
}

// ==================== Helpers ====================

fn int_arg(args: &Args, idx: usize, name: &str, fallback: usize) -> VmResult<usize> {
    match args.lookup(idx, name) {
        None => Ok(fallback),
        Some(v) => v
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                VmError::type_error(format!(
                    "'{}' must be a non-negative integer, got {}",
                    name,
                    v.type_name()
                ))
            }),
    }
}

/// Attribute or item lookup used by `attribute=` arguments and `GET_ATTR`.
///
/// Dotted paths and integer segments index into nested values.
pub fn get_attr(value: &Value, path: &str) -> Value {
    let mut current = value.clone();
    for part in path.split('.') {
        current = match (&current, part.parse::<i64>()) {
            (Value::List(items), Ok(idx)) => index_list(items, idx).cloned().unwrap_or_default(),
            (Value::Map(map), _) => map.get(part).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        };
    }
    current
}

/// Python-style index, negative counting from the end
pub(crate) fn index_list(items: &[Value], idx: i64) -> Option<&Value> {
    let len = i64::try_from(items.len()).ok()?;
    let idx = if idx < 0 { idx + len } else { idx };
    usize::try_from(idx).ok().and_then(|i| items.get(i))
}

/// Map with `[key, value]` pairs, as produced by `items()`
pub(crate) fn map_items(map: &ValueMap) -> Value {
    map.iter()
        .map(|(k, v)| Value::List(vec![Value::String(k.clone()), v.clone()]))
        .collect()
}
