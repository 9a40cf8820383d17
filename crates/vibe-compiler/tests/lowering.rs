//! Structural properties of generated bytecode

use proptest::prelude::*;
use vibe_bytecode::{Bytecode, Opcode};
use vibe_compiler::Compiler;

fn check_jumps(code: &Bytecode<'_>) {
    for (pc, instr) in code.instructions().iter().enumerate() {
        if instr.opcode.is_jump() {
            assert!(
                (instr.operand as usize) <= code.len(),
                "jump at {} targets {} past end {}",
                pc,
                instr.operand,
                code.len()
            );
        }
        if instr.opcode == Opcode::ForLoopEnd {
            assert_eq!(code.loop_end(instr.operand as usize), Some(pc));
        }
        if matches!(instr.opcode, Opcode::BreakLoop | Opcode::ContinueLoop) {
            assert_eq!(
                code.instructions()[instr.operand as usize].opcode,
                Opcode::ForLoopEnd
            );
        }
    }
}

fn template() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        "[a-z ]{0,5}",
        Just("{{ x }}".to_string()),
        Just("{{ a and b or c }}".to_string()),
        Just("{{ x|default('d')|upper }}".to_string()),
        Just("{{ loop.index if loop is defined else 0 }}".to_string()),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("{{% if c %}}{}{{% else %}}{}{{% endif %}}", a, b)),
            inner
                .clone()
                .prop_map(|a| format!("{{% for x in xs %}}{}{{% break %}}{{% endfor %}}", a)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!(
                "{{% for y in ys %}}{{% if y %}}{{% continue %}}{{% endif %}}{}{{% else %}}{}{{% endfor %}}",
                a, b
            )),
            inner
                .clone()
                .prop_map(|a| format!("{{% with w = 1 %}}{}{{% endwith %}}", a)),
            (inner.clone(), inner).prop_map(|(a, b)| format!("{}{}", a, b)),
        ]
    })
}

proptest! {
    #[test]
    fn every_jump_is_patched_and_in_range(source in template()) {
        let ast = vibe_syntax::parse(&source).unwrap();
        let code = Compiler::compile(&ast, &source).unwrap();
        check_jumps(&code);
    }
}

#[test]
fn test_macro_bodies_are_skipped_and_registered() {
    let source = "{% macro a() %}A{% endmacro %}{% macro b(x=[1, 2]) %}{{ a() }}{% endmacro %}{{ b() }}";
    let ast = vibe_syntax::parse(source).unwrap();
    let code = Compiler::compile(&ast, source).unwrap();
    check_jumps(&code);
    assert_eq!(code.macros().len(), 2);
    for def in code.macros() {
        let skip = &code.instructions()[def.body_start as usize - 1];
        assert_eq!(skip.opcode, Opcode::Jump);
        assert_eq!(skip.operand, def.body_end);
    }
}

#[test]
fn test_owned_copy_matches_borrowed() {
    let source = "{{ [1, 2, 3]|join(', ') }}{{ 2.5 }}";
    let ast = vibe_syntax::parse(source).unwrap();
    let borrowed = Compiler::compile(&ast, source).unwrap();
    let owned = borrowed.into_owned();
    drop(ast);
    assert_eq!(owned.constants().len(), 2);
    assert!(owned.to_string().contains("LOAD_CONST"));
}
