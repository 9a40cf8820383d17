//! Persisted format and pool tests

use proptest::prelude::*;
use vibe_bytecode::{
    Bytecode, BytecodeError, CompiledMacro, ConstantPool, Header, Instruction, InternPool,
    MacroParamEntry, Opcode, fnv1a64,
};
use vibe_syntax::Expr;

fn sample(source: &str) -> Bytecode<'static> {
    let mut strings = InternPool::new();
    let hello = strings.insert("Hello ");
    let mut names = InternPool::new();
    let items = names.insert("items");
    let item = names.insert("item");
    let m = names.insert("m");
    let a = names.insert("a");
    let mut constants = ConstantPool::new();
    let five = constants.add_owned(Expr::int(5));
    let list = constants.add_owned(Expr::List(vec![Expr::int(1), Expr::string("x")]));

    let instructions = vec![
        Instruction::new(Opcode::EmitText, hello),
        Instruction::new(Opcode::LoadConst, list),
        Instruction::simple(Opcode::Pop),
        Instruction::new(Opcode::LoadVar, items),
        Instruction::new(Opcode::ForLoopStart, item),
        Instruction::new(Opcode::LoadVar, item),
        Instruction::simple(Opcode::Emit),
        Instruction::new(Opcode::ForLoopEnd, 4),
        Instruction::new(Opcode::Jump, 11),
        Instruction::new(Opcode::LoadVar, a),
        Instruction::simple(Opcode::Return),
        Instruction::new(Opcode::DefineMacro, 0),
        Instruction::simple(Opcode::End),
    ];
    let macros = vec![CompiledMacro {
        name: m,
        params: vec![MacroParamEntry {
            name: a,
            default: Some(five),
        }],
        body_start: 9,
        body_end: 11,
        catch_varargs: false,
        catch_kwargs: true,
    }];
    Bytecode::new(
        instructions,
        constants,
        strings,
        names,
        macros,
        fnv1a64(source.as_bytes()),
    )
    .unwrap()
}

#[test]
fn test_roundtrip_preserves_everything() {
    let source = "Hello {% for item in items %}{{ item }}{% endfor %}";
    let original = sample(source);
    let bytes = original.to_bytes().unwrap();
    let restored = Bytecode::from_bytes(&bytes).unwrap();

    assert_eq!(restored, original);
    assert_eq!(restored.checksum(), fnv1a64(source.as_bytes()));
    assert!(restored.is_fresh(source));
    assert!(!restored.is_fresh("changed"));
    assert_eq!(restored.loop_end(4), Some(7));
}

#[test]
fn test_header_prefix() {
    let bytes = sample("x").to_bytes().unwrap();
    assert_eq!(&bytes[..4], b"VJBC");
    let header = Header::read(&mut &bytes[..]).unwrap();
    assert_eq!(header.version, vibe_bytecode::BYTECODE_VERSION);
    assert!(header.is_fresh("x"));
}

#[test]
fn test_corrupt_opcode_rejected() {
    let mut bytes = sample("x").to_bytes().unwrap();
    // first instruction's opcode byte follows the header and count
    bytes[Header::SIZE + 4] = 0xEE;
    assert!(matches!(
        Bytecode::from_bytes(&bytes),
        Err(BytecodeError::InvalidOpcode(0xEE))
    ));
}

#[test]
fn test_truncated_body_rejected() {
    let bytes = sample("x").to_bytes().unwrap();
    let cut = &bytes[..bytes.len() - 3];
    assert!(matches!(
        Bytecode::from_bytes(cut),
        Err(BytecodeError::UnexpectedEnd)
    ));
}

proptest! {
    #[test]
    fn pool_never_holds_duplicates(words in proptest::collection::vec("[a-c]{0,3}", 0..40)) {
        let mut pool = InternPool::new();
        let indices: Vec<u32> = words.iter().map(|w| pool.insert(w)).collect();
        for (word, idx) in words.iter().zip(&indices) {
            prop_assert_eq!(pool.get(*idx), Some(word.as_str()));
        }
        let mut seen: Vec<&str> = pool.iter().collect();
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);
    }

    #[test]
    fn reading_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = Bytecode::from_bytes(&bytes);
    }
}
