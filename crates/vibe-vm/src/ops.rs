//! Operator semantics
//!
//! Arithmetic follows Python: `/` is true division, `//` and `%` floor,
//! integer results are checked for overflow.

use vibe_syntax::{BinaryOp, UnaryOp};

use crate::error::{VmError, VmResult};
use crate::value::Value;

/// Largest string (in bytes) or list a repetition or padding may build
pub const MAX_REPEAT_LEN: usize = 1 << 20;

/// Numeric view of an operand
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(Self::Int(*n)),
            Value::Bool(b) => Some(Self::Int(i64::from(*b))),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(n) => n as f64,
            Self::Float(f) => f,
        }
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> VmError {
    VmError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn numbers(op: &str, left: &Value, right: &Value) -> VmResult<(Num, Num)> {
    match (Num::of(left), Num::of(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(unsupported(op, left, right)),
    }
}

/// Apply a binary operator to two values
pub fn binary(op: BinaryOp, left: Value, right: Value) -> VmResult<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => sub(left, right),
        BinaryOp::Mul => mul(left, right),
        BinaryOp::Div => div(left, right),
        BinaryOp::FloorDiv => floor_div(left, right),
        BinaryOp::Mod => modulo(left, right),
        BinaryOp::Pow => pow(left, right),
        BinaryOp::Concat => Ok(Value::String(format!("{}{}", left, right))),
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt => compare(op, &left, &right, |o| o.is_lt()),
        BinaryOp::Le => compare(op, &left, &right, |o| o.is_le()),
        BinaryOp::Gt => compare(op, &left, &right, |o| o.is_gt()),
        BinaryOp::Ge => compare(op, &left, &right, |o| o.is_ge()),
        BinaryOp::In => contains(&right, &left).map(Value::Bool),
        BinaryOp::NotIn => contains(&right, &left).map(|found| Value::Bool(!found)),
        BinaryOp::And => Ok(if left.is_truthy() { right } else { left }),
        BinaryOp::Or => Ok(if left.is_truthy() { left } else { right }),
    }
}

/// Apply a unary operator
pub fn unary(op: UnaryOp, operand: Value) -> VmResult<Value> {
    match (op, Num::of(&operand)) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!operand.is_truthy())),
        (UnaryOp::Neg, Some(Num::Int(n))) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(VmError::IntegerOverflow("negation")),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Num::Int(n))) => Ok(Value::Int(n)),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (_, None) => Err(VmError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            operand.type_name()
        ))),
    }
}

/// `+`
pub fn add(left: Value, right: Value) -> VmResult<Value> {
    match (left, right) {
        (Value::String(mut a), b) if !b.is_undefined() => {
            use std::fmt::Write;
            let _ = write!(a, "{}", b);
            Ok(Value::String(a))
        }
        (Value::Safe(a), Value::Safe(b)) => Ok(Value::Safe(a + &b)),
        (a, b) if (a.is_string() || b.is_string()) && !a.is_undefined() && !b.is_undefined() => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (a, b) => match numbers("+", &a, &b)? {
            (Num::Int(x), Num::Int(y)) => x
                .checked_add(y)
                .map(Value::Int)
                .ok_or(VmError::IntegerOverflow("addition")),
            (x, y) => Ok(Value::Float(x.as_f64() + y.as_f64())),
        },
    }
}

/// `-`
pub fn sub(left: Value, right: Value) -> VmResult<Value> {
    match numbers("-", &left, &right)? {
        (Num::Int(x), Num::Int(y)) => x
            .checked_sub(y)
            .map(Value::Int)
            .ok_or(VmError::IntegerOverflow("subtraction")),
        (x, y) => Ok(Value::Float(x.as_f64() - y.as_f64())),
    }
}

/// `*`
pub fn mul(left: Value, right: Value) -> VmResult<Value> {
    match (&left, &right) {
        (Value::String(s) | Value::Safe(s), Value::Int(n))
        | (Value::Int(n), Value::String(s) | Value::Safe(s)) => {
            let times = usize::try_from(*n).unwrap_or(0);
            checked_len(s.len(), times, "string repetition")?;
            return Ok(Value::String(s.repeat(times)));
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let times = usize::try_from(*n).unwrap_or(0);
            let mut out = Vec::with_capacity(checked_len(items.len(), times, "list repetition")?);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::List(out));
        }
        _ => {}
    }
    match numbers("*", &left, &right)? {
        (Num::Int(x), Num::Int(y)) => x
            .checked_mul(y)
            .map(Value::Int)
            .ok_or(VmError::IntegerOverflow("multiplication")),
        (x, y) => Ok(Value::Float(x.as_f64() * y.as_f64())),
    }
}

/// Length of `times` copies of `len` items, refused past [`MAX_REPEAT_LEN`]
pub(crate) fn checked_len(len: usize, times: usize, what: &'static str) -> VmResult<usize> {
    len.checked_mul(times)
        .filter(|&total| total <= MAX_REPEAT_LEN)
        .ok_or(VmError::TooLarge {
            what,
            limit: MAX_REPEAT_LEN,
        })
}

/// `/`, always a float
pub fn div(left: Value, right: Value) -> VmResult<Value> {
    let (x, y) = numbers("/", &left, &right)?;
    let divisor = y.as_f64();
    if divisor == 0.0 {
        return Err(VmError::DivisionByZero);
    }
    Ok(Value::Float(x.as_f64() / divisor))
}

/// `//`
pub fn floor_div(left: Value, right: Value) -> VmResult<Value> {
    match numbers("//", &left, &right)? {
        (Num::Int(_), Num::Int(0)) => Err(VmError::DivisionByZero),
        (Num::Int(x), Num::Int(y)) => {
            let q = x.checked_div(y).ok_or(VmError::IntegerOverflow("floor division"))?;
            let adjust = x % y != 0 && ((x < 0) != (y < 0));
            Ok(Value::Int(if adjust { q - 1 } else { q }))
        }
        (x, y) => {
            let (a, b) = (x.as_f64(), y.as_f64());
            if b == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(Value::Float((a / b).floor()))
        }
    }
}

/// `%`, sign follows the divisor
pub fn modulo(left: Value, right: Value) -> VmResult<Value> {
    match numbers("%", &left, &right)? {
        (Num::Int(_), Num::Int(0)) => Err(VmError::DivisionByZero),
        (Num::Int(x), Num::Int(y)) => {
            let r = x.checked_rem(y).ok_or(VmError::IntegerOverflow("modulo"))?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        (x, y) => {
            let (a, b) = (x.as_f64(), y.as_f64());
            if b == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(Value::Float(a - b * (a / b).floor()))
        }
    }
}

/// `**`
pub fn pow(left: Value, right: Value) -> VmResult<Value> {
    match numbers("**", &left, &right)? {
        (Num::Int(base), Num::Int(exp)) if exp >= 0 => int_pow(base, exp).map(Value::Int),
        (x, y) => Ok(Value::Float(x.as_f64().powf(y.as_f64()))),
    }
}

/// Exponentiation by repeated squaring
fn int_pow(mut base: i64, mut exp: i64) -> VmResult<i64> {
    let overflow = || VmError::IntegerOverflow("exponentiation");
    let mut acc: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.checked_mul(base).ok_or_else(overflow)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = base.checked_mul(base).ok_or_else(overflow)?;
        }
    }
    Ok(acc)
}

fn compare(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    accept: fn(std::cmp::Ordering) -> bool,
) -> VmResult<Value> {
    left.compare(right).map(|o| Value::Bool(accept(o))).ok_or_else(|| {
        VmError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    })
}

/// Membership test for `in`
pub fn contains(haystack: &Value, needle: &Value) -> VmResult<bool> {
    match haystack {
        Value::String(s) | Value::Safe(s) => match needle.as_str() {
            Some(n) => Ok(s.contains(n)),
            None => Err(VmError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                needle.type_name()
            ))),
        },
        Value::List(items) => Ok(items.contains(needle)),
        Value::Map(map) => Ok(needle.as_str().is_some_and(|k| map.contains_key(k))),
        Value::Undefined => Ok(false),
        other => Err(VmError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// `obj[key]`; missing keys and out-of-range indices are undefined
pub fn get_item(object: &Value, key: &Value) -> VmResult<Value> {
    match (object, key) {
        (Value::List(items), Value::Int(_) | Value::Bool(_)) => Ok(key
            .as_i64()
            .and_then(|idx| crate::filters::index_list(items, idx))
            .cloned()
            .unwrap_or_default()),
        (Value::String(s) | Value::Safe(s), Value::Int(idx)) => {
            let len = s.chars().count() as i64;
            let idx = if *idx < 0 { idx + len } else { *idx };
            Ok(usize::try_from(idx)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default())
        }
        (Value::Map(map), key) => Ok(map.get(&key.to_string()).cloned().unwrap_or_default()),
        (Value::Undefined, _) => Ok(Value::Undefined),
        (Value::List(_) | Value::String(_) | Value::Safe(_), key) => Err(VmError::type_error(
            format!("indices must be integers, not {}", key.type_name()),
        )),
        (other, _) => Err(VmError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `obj[start:stop:step]` with Python bound clamping
pub fn slice(
    object: Value,
    start: Option<Value>,
    stop: Option<Value>,
    step: Option<Value>,
) -> VmResult<Value> {
    let bound = |v: Option<Value>| -> VmResult<Option<i64>> {
        match v {
            None | Some(Value::None) => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                VmError::type_error(format!(
                    "slice indices must be integers or none, not {}",
                    v.type_name()
                ))
            }),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(VmError::ZeroSliceStep);
    }
    let (start, stop) = (bound(start)?, bound(stop)?);
    match object {
        Value::List(items) => {
            let picked = slice_indices(items.len(), start, stop, step);
            Ok(Value::List(picked.into_iter().filter_map(|i| items.get(i).cloned()).collect()))
        }
        Value::String(s) | Value::Safe(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), start, stop, step);
            Ok(Value::String(picked.into_iter().filter_map(|i| chars.get(i)).collect()))
        }
        Value::Undefined => Ok(Value::Undefined),
        other => Err(VmError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Positions selected by a slice over a sequence of `len` items
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |idx: i64, lo: i64, hi: i64| {
        let idx = if idx < 0 { idx + len } else { idx };
        idx.clamp(lo, hi)
    };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map_or(0, |s| clamp(s, 0, len));
        let end = stop.map_or(len, |s| clamp(s, 0, len));
        while i < end {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let mut i = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let end = stop.map_or(-1, |s| clamp(s, -1, len - 1));
        while i > end {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add() {
        assert_eq!(add(Value::Int(1), Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(add(Value::from("a"), Value::from("b")), Ok(Value::from("ab")));
        assert_eq!(add(Value::from("n"), Value::Int(1)), Ok(Value::from("n1")));
        assert_eq!(add(Value::Int(1), Value::Float(0.5)), Ok(Value::Float(1.5)));
        assert_eq!(
            add(Value::from(vec![1]), Value::from(vec![2])),
            Ok(Value::from(vec![1, 2]))
        );
        assert!(add(Value::Undefined, Value::Int(1)).is_err());
        assert_eq!(
            add(Value::Int(i64::MAX), Value::Int(1)),
            Err(VmError::IntegerOverflow("addition"))
        );
    }

    #[test]
    fn test_division() {
        assert_eq!(div(Value::Int(1), Value::Int(2)), Ok(Value::Float(0.5)));
        assert_eq!(div(Value::Int(1), Value::Int(0)), Err(VmError::DivisionByZero));
        assert_eq!(floor_div(Value::Int(-7), Value::Int(2)), Ok(Value::Int(-4)));
        assert_eq!(modulo(Value::Int(-7), Value::Int(3)), Ok(Value::Int(2)));
        assert_eq!(modulo(Value::Int(7), Value::Int(-3)), Ok(Value::Int(-2)));
        assert_eq!(modulo(Value::Float(7.5), Value::Int(2)), Ok(Value::Float(1.5)));
        assert_eq!(modulo(Value::Int(1), Value::Int(0)), Err(VmError::DivisionByZero));
    }

    #[test]
    fn test_pow() {
        assert_eq!(pow(Value::Int(2), Value::Int(10)), Ok(Value::Int(1024)));
        assert_eq!(pow(Value::Int(2), Value::Int(-1)), Ok(Value::Float(0.5)));
        assert!(pow(Value::Int(10), Value::Int(40)).is_err());
    }

    #[test]
    fn test_repeat() {
        assert_eq!(mul(Value::from("ab"), Value::Int(3)), Ok(Value::from("ababab")));
        assert_eq!(mul(Value::Int(-1), Value::from("ab")), Ok(Value::from("")));
    }

    #[test]
    fn test_repeat_too_large() {
        let too_large = |what: &'static str| VmError::TooLarge {
            what,
            limit: MAX_REPEAT_LEN,
        };
        assert_eq!(
            mul(Value::from("ab"), Value::Int(i64::MAX)),
            Err(too_large("string repetition"))
        );
        assert_eq!(
            mul(Value::Int(i64::MAX), Value::from(vec![1, 2])),
            Err(too_large("list repetition"))
        );
        let limit = MAX_REPEAT_LEN as i64;
        assert!(mul(Value::from("a"), Value::Int(limit + 1)).is_err());
        assert_eq!(
            mul(Value::from(vec![0]), Value::Int(2)),
            Ok(Value::from(vec![0, 0]))
        );
    }

    #[test]
    fn test_comparison_and_membership() {
        assert_eq!(
            binary(BinaryOp::Lt, Value::Int(1), Value::Float(1.5)),
            Ok(Value::Bool(true))
        );
        assert!(binary(BinaryOp::Lt, Value::Int(1), Value::from("a")).is_err());
        assert_eq!(
            binary(BinaryOp::In, Value::from("ell"), Value::from("hello")),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            binary(BinaryOp::NotIn, Value::Int(4), Value::from(vec![1, 2])),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            binary(BinaryOp::Concat, Value::Int(1), Value::from("x")),
            Ok(Value::from("1x"))
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnaryOp::Neg, Value::Int(3)), Ok(Value::Int(-3)));
        assert_eq!(unary(UnaryOp::Not, Value::from("")), Ok(Value::Bool(true)));
        assert!(unary(UnaryOp::Neg, Value::from("x")).is_err());
    }

    #[test]
    fn test_get_item() {
        let list = Value::from(vec![1, 2, 3]);
        assert_eq!(get_item(&list, &Value::Int(-1)), Ok(Value::Int(3)));
        assert_eq!(get_item(&list, &Value::Int(9)), Ok(Value::Undefined));
        assert!(get_item(&list, &Value::from("a")).is_err());
        assert_eq!(get_item(&Value::from("héllo"), &Value::Int(1)), Ok(Value::from("é")));
        assert!(get_item(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_slice() {
        let list = Value::from(vec![0, 1, 2, 3, 4]);
        let s = |a: Option<i64>, b: Option<i64>, c: Option<i64>| {
            slice(list.clone(), a.map(Value::Int), b.map(Value::Int), c.map(Value::Int))
        };
        assert_eq!(s(Some(1), Some(3), None), Ok(Value::from(vec![1, 2])));
        assert_eq!(s(None, None, Some(-1)), Ok(Value::from(vec![4, 3, 2, 1, 0])));
        assert_eq!(s(Some(-2), None, None), Ok(Value::from(vec![3, 4])));
        assert_eq!(s(None, None, Some(2)), Ok(Value::from(vec![0, 2, 4])));
        assert_eq!(s(Some(10), None, None), Ok(Value::List(vec![])));
        assert_eq!(s(None, None, Some(0)), Err(VmError::ZeroSliceStep));
        assert_eq!(s(Some(1), None, Some(i64::MAX)), Ok(Value::from(vec![1])));
        assert_eq!(s(Some(3), None, Some(i64::MIN)), Ok(Value::from(vec![3])));
        assert_eq!(
            s(Some(i64::MIN), Some(i64::MAX), Some(i64::MAX)),
            Ok(Value::from(vec![0]))
        );
        assert_eq!(
            slice(Value::from("hello"), None, None, Some(Value::Int(-1))),
            Ok(Value::from("olleh"))
        );
    }
}
