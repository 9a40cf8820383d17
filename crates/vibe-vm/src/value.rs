//! Runtime values
//!
//! Values are plain owned enums. Reading a variable, a loop item or a stack
//! entry clones it; nothing is shared between renders.
//!
//! ## Rendering
//!
//! ```text
//! undefined   ""
//! none        "none"
//! true/false  "true" / "false"
//! 2.0         "2.0"
//! [1, 'a']    "[1, 'a']"
//! {'k': 1}    "{'k': 1}"
//! ```

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use vibe_syntax::{Expr, Literal};

use crate::error::{VmError, VmResult};
use crate::pending::PendingValue;

/// Name-keyed map preserving insertion order
pub type ValueMap = IndexMap<String, Value>;

/// A template runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Missing variable or attribute
    #[default]
    Undefined,
    /// `none`
    None,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text subject to autoescaping
    String(String),
    /// Text already escaped, emitted verbatim
    Safe(String),
    /// Ordered sequence
    List(Vec<Value>),
    /// String-keyed mapping
    Map(ValueMap),
    /// Reference to a compiled macro body
    Macro(u32),
    /// Result of an async filter or test that has not resolved yet
    Pending(PendingValue),
}

impl Value {
    /// Build a string value
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Build a safe (pre-escaped) string value
    pub fn safe(s: impl Into<String>) -> Self {
        Self::Safe(s.into())
    }

    /// Evaluate a literal expression from the constant pool
    pub fn from_constant(expr: &Expr) -> VmResult<Self> {
        Ok(match expr {
            Expr::Literal(Literal::None) => Self::None,
            Expr::Literal(Literal::Bool(b)) => Self::Bool(*b),
            Expr::Literal(Literal::Int(n)) => Self::Int(*n),
            Expr::Literal(Literal::Float(f)) => Self::Float(*f),
            Expr::Literal(Literal::String(s)) => Self::String(s.clone()),
            Expr::List(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_constant)
                    .collect::<VmResult<_>>()?,
            ),
            Expr::Dict(pairs) => {
                let mut map = ValueMap::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = Self::from_constant(key)?;
                    map.insert(key.to_string(), Self::from_constant(value)?);
                }
                Self::Map(map)
            }
            _ => return Err(VmError::type_error("constant pool entry is not a literal")),
        })
    }

    /// Type name used in error messages and by `type_name`-style checks
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) | Self::Safe(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Macro(_) => "macro",
            Self::Pending(_) => "pending",
        }
    }

    /// Check if undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check if none
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Check if a string (escaped or not)
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_) | Self::Safe(_))
    }

    /// Check if an integer or float (booleans excluded)
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Check if marked safe
    #[inline]
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe(_))
    }

    /// Truthiness as used by conditions and `and`/`or`
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) | Self::Safe(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Macro(_) | Self::Pending(_) => true,
        }
    }

    /// Borrow the text of a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Safe(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; booleans count as 0/1
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any number or boolean
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Take the map out of a map value
    pub fn into_map(self) -> Option<ValueMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Text form, consuming strings without copying
    pub fn into_string(self) -> String {
        match self {
            Self::String(s) | Self::Safe(s) => s,
            other => other.to_string(),
        }
    }

    /// Number of items, characters or entries
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) | Self::Safe(s) => Some(s.chars().count()),
            Self::List(items) => Some(items.len()),
            Self::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Items produced when iterating: list items, map keys or characters.
    /// Undefined iterates as empty.
    pub fn iter_items(&self) -> VmResult<Vec<Value>> {
        match self {
            Self::List(items) => Ok(items.clone()),
            Self::Map(map) => Ok(map.keys().map(|k| Value::String(k.clone())).collect()),
            Self::String(s) | Self::Safe(s) => {
                Ok(s.chars().map(|c| Value::String(c.to_string())).collect())
            }
            Self::Undefined => Ok(Vec::new()),
            other => Err(VmError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=` and sorting.
    ///
    /// Numbers compare across int and float; strings and lists compare
    /// lexicographically. Other pairs are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::String(a) | Self::Safe(a), Self::String(b) | Self::Safe(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (
                Self::Int(_) | Self::Float(_) | Self::Bool(_),
                Self::Int(_) | Self::Float(_) | Self::Bool(_),
            ) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            _ => None,
        }
    }

    /// Quoted form used inside list and map displays
    fn write_repr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Safe(s) => {
                f.write_str("'")?;
                for c in s.chars() {
                    match c {
                        '\'' => f.write_str("\\'")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => fmt::Write::write_char(f, c)?,
                    }
                }
                f.write_str("'")
            }
            Self::Undefined => f.write_str("undefined"),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => Ok(()),
            Self::None => f.write_str("none"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(x) => fmt_float(*x, f),
            Self::String(s) | Self::Safe(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_repr(f)?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{}': ", key)?;
                    value.write_repr(f)?;
                }
                f.write_str("}")
            }
            Self::Macro(idx) => write!(f, "<macro {}>", idx),
            Self::Pending(_) => f.write_str("<pending>"),
        }
    }
}

fn fmt_float(x: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if x.is_nan() {
        f.write_str("nan")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "inf" } else { "-inf" })
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        write!(f, "{:.1}", x)
    } else {
        write!(f, "{}", x)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Safe(s) => write!(f, "Safe({:?})", s),
            Self::Pending(p) => write!(f, "Pending({:?})", p.key()),
            other => other.write_repr(f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Self::String(a) | Self::Safe(a), Self::String(b) | Self::Safe(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Macro(a), Self::Macro(b)) => a == b,
            (Self::Pending(a), Self::Pending(b)) => a.key() == b.key(),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Self::Float(n as f64), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::None, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::List(iter.into_iter().collect())
    }
}
