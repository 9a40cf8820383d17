//! Operators and slicing return errors instead of panicking, whatever the operands

use proptest::prelude::*;
use vibe_compiler::Compiler;
use vibe_vm::ops::{self, MAX_REPEAT_LEN};
use vibe_vm::{Environment, Value, ValueMap, Vm, VmError};

fn render(source: &str) -> Option<Result<String, VmError>> {
    let ast = vibe_syntax::parse(source).ok()?;
    let code = Compiler::compile(&ast, source).ok()?;
    let env = Environment::new();
    let context = ValueMap::new();
    Some(Vm::new(&code, &env, &context).render())
}

/// Literal operand as template source; `i64::MIN` has no literal form
fn operand() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i64>().prop_map(|n| format!("({})", n.max(i64::MIN + 1))),
        (-1000i64..1000).prop_map(|n| n.to_string()),
        (-1.0e6f64..1.0e6).prop_map(|f| format!("({:.3})", f)),
        "[a-z]{0,4}".prop_map(|s| format!("'{}'", s)),
        prop::collection::vec(-5i64..5, 0..4).prop_map(|v| format!("{:?}", v)),
        Just("none".to_string()),
        Just("true".to_string()),
        Just("missing".to_string()),
    ]
}

fn operator() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "+", "-", "*", "/", "//", "%", "**", "~", "==", "!=", "<", ">=", "in", "and", "or",
    ])
}

fn bound() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        Just(None),
        (-8i64..8).prop_map(Some),
        any::<i64>().prop_map(Some),
    ]
}

proptest! {
    #[test]
    fn binary_operators_never_panic(left in operand(), op in operator(), right in operand()) {
        let source = format!("{{{{ {} {} {} }}}}", left, op, right);
        let _ = render(&source);
    }

    #[test]
    fn unary_and_chained_operators_never_panic(
        a in operand(),
        b in operand(),
        c in operand(),
        operators in prop::collection::vec(operator(), 2),
    ) {
        let source = format!("{{{{ -{} {} {} {} not {} }}}}", a, operators[0], b, operators[1], c);
        let _ = render(&source);
    }

    #[test]
    fn slices_stay_in_bounds(
        items in prop::collection::vec(any::<i64>(), 0..8),
        start in bound(),
        stop in bound(),
        step in bound(),
    ) {
        let list = Value::from(items.clone());
        match ops::slice(list, start.map(Value::Int), stop.map(Value::Int), step.map(Value::Int)) {
            Ok(Value::List(picked)) => {
                prop_assert!(picked.len() <= items.len());
                prop_assert!(picked.iter().all(|v| matches!(v, Value::Int(n) if items.contains(n))));
            }
            Ok(other) => prop_assert!(false, "unexpected {:?}", other),
            Err(err) => prop_assert_eq!(err, VmError::ZeroSliceStep),
        }

        let text: String = items.iter().map(|n| char::from(b'a' + (n.unsigned_abs() % 26) as u8)).collect();
        let sliced = ops::slice(Value::from(text.as_str()), start.map(Value::Int), stop.map(Value::Int), step.map(Value::Int));
        if let Ok(Value::String(s)) = sliced {
            prop_assert!(s.chars().count() <= text.chars().count());
        }
    }

    #[test]
    fn repetition_is_bounded(text in "[a-z]{0,3}", times in any::<i64>()) {
        match ops::mul(Value::from(text.as_str()), Value::Int(times)) {
            Ok(Value::String(s)) => {
                prop_assert!(s.len() <= MAX_REPEAT_LEN);
                prop_assert_eq!(s.len(), text.len() * usize::try_from(times).unwrap_or(0));
            }
            Ok(other) => prop_assert!(false, "unexpected {:?}", other),
            Err(err) => {
                let is_too_large = matches!(err, VmError::TooLarge { .. });
                prop_assert!(is_too_large);
            }
        }
    }
}

#[test]
fn extreme_slices_and_repetition_render_errors_or_values() {
    assert_eq!(
        render("{{ [1, 2, 3][1::9223372036854775807] }}").unwrap(),
        Ok("[2]".to_string())
    );
    assert_eq!(render("{{ 'abc'[::-9223372036854775807] }}").unwrap(), Ok("c".to_string()));
    assert!(matches!(
        render("{{ 'ab' * 9223372036854775807 }}").unwrap(),
        Err(VmError::TooLarge { .. })
    ));
    assert!(matches!(
        render("{{ [1] * 9223372036854775807 }}").unwrap(),
        Err(VmError::TooLarge { .. })
    ));
    assert!(matches!(
        render("{{ 'x'|center(9223372036854775807) }}").unwrap(),
        Err(VmError::TooLarge { .. })
    ));
}
