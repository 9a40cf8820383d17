//! Built-in global functions

use crate::environment::{Args, Environment};
use crate::error::{VmError, VmResult};
use crate::value::{Value, ValueMap};

/// Largest list `range` will build
pub const MAX_RANGE: usize = 100_000;

pub(crate) fn register(env: &mut Environment) {
    env.add_function("range", range);
    env.add_function("dict", dict);
}

/// `range([start,] stop[, step])`
pub fn range(args: &Args) -> VmResult<Value> {
    let ints = args
        .args
        .iter()
        .map(|v| {
            v.as_i64().ok_or_else(|| {
                VmError::type_error(format!(
                    "range() arguments must be integers, got {}",
                    v.type_name()
                ))
            })
        })
        .collect::<VmResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(VmError::type_error(format!(
                "range() expects 1 to 3 arguments, got {}",
                ints.len()
            )));
        }
    };
    if step == 0 {
        return Err(VmError::callback("range() step must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        if items.len() >= MAX_RANGE {
            return Err(VmError::callback(format!(
                "range() would produce more than {} items",
                MAX_RANGE
            )));
        }
        items.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::List(items))
}

/// `dict(**kwargs)`
pub fn dict(args: &Args) -> VmResult<Value> {
    let mut map = ValueMap::with_capacity(args.kwargs.len());
    for (key, value) in &args.kwargs {
        map.insert(key.clone(), value.clone());
    }
    Ok(Value::Map(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(args: &[i64]) -> Args {
        Args::positional(args.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn test_range_forms() {
        assert_eq!(range(&ints(&[3])).unwrap(), Value::from(vec![0, 1, 2]));
        assert_eq!(range(&ints(&[2, 5])).unwrap(), Value::from(vec![2, 3, 4]));
        assert_eq!(range(&ints(&[5, 0, -2])).unwrap(), Value::from(vec![5, 3, 1]));
        assert_eq!(range(&ints(&[0])).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_range_errors() {
        assert!(range(&ints(&[0, 5, 0])).is_err());
        assert!(range(&ints(&[])).is_err());
        assert!(range(&ints(&[i64::MAX])).is_err());
    }

    #[test]
    fn test_dict() {
        let mut args = Args::default();
        args.kwargs.insert("a".into(), Value::Int(1));
        assert_eq!(dict(&args).unwrap().to_string(), "{'a': 1}");
    }
}
