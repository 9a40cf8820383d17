//! Built-in tests for `is` expressions

use std::cmp::Ordering;

use crate::environment::{Args, Environment};
use crate::error::{VmError, VmResult};
use crate::ops;
use crate::value::Value;

/// Register every built-in test on `env`
pub(crate) fn register(env: &mut Environment) {
    env.add_test("defined", |v, _| Ok(!v.is_undefined()));
    env.add_test("undefined", |v, _| Ok(v.is_undefined()));
    env.add_test("none", |v, _| Ok(v.is_none()));
    env.add_test("boolean", |v, _| Ok(matches!(v, Value::Bool(_))));
    env.add_test("true", |v, _| Ok(matches!(v, Value::Bool(true))));
    env.add_test("false", |v, _| Ok(matches!(v, Value::Bool(false))));
    env.add_test("integer", |v, _| Ok(matches!(v, Value::Int(_))));
    env.add_test("float", |v, _| Ok(matches!(v, Value::Float(_))));
    env.add_test("number", |v, _| Ok(v.is_number()));
    env.add_test("string", |v, _| Ok(v.is_string()));
    env.add_test("mapping", |v, _| Ok(matches!(v, Value::Map(_))));
    env.add_test("sequence", |v, _| {
        Ok(v.is_string() || matches!(v, Value::List(_)))
    });
    env.add_test("iterable", |v, _| {
        Ok(v.is_string() || matches!(v, Value::List(_) | Value::Map(_)))
    });
    env.add_test("even", |v, _| Ok(integer(v, "even")? % 2 == 0));
    env.add_test("odd", |v, _| Ok(integer(v, "odd")? % 2 != 0));
    env.add_test("divisibleby", divisible_by);
    env.add_test("lower", |v, _| {
        Ok(v.as_str().is_some_and(|s| !s.chars().any(char::is_uppercase)))
    });
    env.add_test("upper", |v, _| {
        Ok(v.as_str().is_some_and(|s| !s.chars().any(char::is_lowercase)))
    });
    env.add_test("in", |v, args| ops::contains(operand(args, "in")?, v));

    for name in ["eq", "equalto", "=="] {
        env.add_test(name, |v, args| Ok(v == operand(args, "eq")?));
    }
    for name in ["ne", "!="] {
        env.add_test(name, |v, args| Ok(v != operand(args, "ne")?));
    }
    let comparisons: [(&'static str, fn(Ordering) -> bool); 10] = [
        ("lt", Ordering::is_lt),
        ("<", Ordering::is_lt),
        ("lessthan", Ordering::is_lt),
        ("le", Ordering::is_le),
        ("<=", Ordering::is_le),
        ("gt", Ordering::is_gt),
        (">", Ordering::is_gt),
        ("greaterthan", Ordering::is_gt),
        ("ge", Ordering::is_ge),
        (">=", Ordering::is_ge),
    ];
    for (name, accept) in comparisons {
        env.add_test(name, move |v, args| {
            let other = operand(args, name)?;
            v.compare(other).map(accept).ok_or_else(|| {
                VmError::type_error(format!(
                    "cannot compare {} with {}",
                    v.type_name(),
                    other.type_name()
                ))
            })
        });
    }
}

fn integer(value: &Value, test: &str) -> VmResult<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(VmError::type_error(format!(
            "test '{}' requires an integer, got {}",
            test,
            other.type_name()
        ))),
    }
}

fn operand<'a>(args: &'a Args, test: &str) -> VmResult<&'a Value> {
    args.get(0)
        .ok_or_else(|| VmError::type_error(format!("test '{}' requires an argument", test)))
}

fn divisible_by(value: &Value, args: &Args) -> VmResult<bool> {
    let n = integer(value, "divisibleby")?;
    let d = integer(operand(args, "divisibleby")?, "divisibleby")?;
    if d == 0 {
        return Err(VmError::DivisionByZero);
    }
    Ok(n % d == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, value: Value, args: Vec<Value>) -> bool {
        let env = Environment::new();
        let test = env.test(name).unwrap();
        (test.sync_fn.as_ref().unwrap())(&value, &Args::positional(args)).unwrap()
    }

    #[test]
    fn test_type_tests() {
        assert!(check("defined", Value::Int(1), vec![]));
        assert!(check("undefined", Value::Undefined, vec![]));
        assert!(check("none", Value::None, vec![]));
        assert!(check("number", Value::Float(1.0), vec![]));
        assert!(!check("number", Value::Bool(true), vec![]));
        assert!(check("sequence", Value::from("ab"), vec![]));
        assert!(!check("mapping", Value::from(vec![1]), vec![]));
    }

    #[test]
    fn test_numeric_tests() {
        assert!(check("even", Value::Int(4), vec![]));
        assert!(check("odd", Value::Int(-3), vec![]));
        assert!(check("divisibleby", Value::Int(9), vec![Value::Int(3)]));
        assert!(check("lt", Value::Int(1), vec![Value::Int(2)]));
        assert!(check(">=", Value::Int(2), vec![Value::Float(2.0)]));
    }

    #[test]
    fn test_membership_and_case() {
        assert!(check("in", Value::Int(2), vec![Value::from(vec![1, 2])]));
        assert!(check("lower", Value::from("abc"), vec![]));
        assert!(!check("upper", Value::from("aBC"), vec![]));
        assert!(check("eq", Value::from("x"), vec![Value::from("x")]));
    }
}
