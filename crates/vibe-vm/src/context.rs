//! Per-render variable storage: frames, scopes and loop states

use rustc_hash::FxHashMap;
use vibe_bytecode::LoopAttr;

use crate::value::{Value, ValueMap};

/// Variables keyed by name pool index
pub(crate) type Scope = FxHashMap<u32, Value>;

/// Iteration state of one active `for` loop
#[derive(Debug)]
pub(crate) struct LoopState {
    /// Index of the `FOR_LOOP_START` instruction
    pub start: usize,
    /// Name index of the loop variable
    pub var: u32,
    pub items: Vec<Value>,
    /// Zero-based position of the current item
    pub index: usize,
    /// Scope count of the frame before the loop scope was pushed
    pub scope_depth: usize,
}

impl LoopState {
    pub fn current(&self) -> Value {
        self.items.get(self.index).cloned().unwrap_or_default()
    }

    pub fn attr(&self, attr: LoopAttr) -> Value {
        let len = self.items.len();
        match attr {
            LoopAttr::Index => Value::from(self.index + 1),
            LoopAttr::Index0 => Value::from(self.index),
            LoopAttr::RevIndex => Value::from(len - self.index),
            LoopAttr::RevIndex0 => Value::from(len - self.index - 1),
            LoopAttr::First => Value::Bool(self.index == 0),
            LoopAttr::Last => Value::Bool(self.index + 1 == len),
            LoopAttr::Length => Value::from(len),
            // Only non-recursive loops exist, so depth is always the first level.
            LoopAttr::Depth => Value::Int(1),
            LoopAttr::PrevItem => self
                .index
                .checked_sub(1)
                .and_then(|i| self.items.get(i))
                .cloned()
                .unwrap_or_default(),
            LoopAttr::NextItem => self.items.get(self.index + 1).cloned().unwrap_or_default(),
        }
    }

    /// Every attribute as a map, for `loop` read as a plain variable
    pub fn to_value(&self) -> Value {
        let map: ValueMap = LoopAttr::ALL
            .iter()
            .map(|attr| (attr.name().to_string(), self.attr(*attr)))
            .collect();
        Value::Map(map)
    }
}

/// Call-block body handed to a macro invocation
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallerRef {
    /// Macro pool index of the caller body
    pub body: u32,
    /// Frame executing the `{% call %}` statement
    pub frame: usize,
}

/// Variable environment of the template body or of one macro invocation
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub scopes: Vec<Scope>,
    pub loops: Vec<LoopState>,
    /// Caller bodies resolve names through the frame of their call site
    pub parent: Option<usize>,
    /// Body bound to `caller()` inside this macro invocation
    pub caller: Option<CallerRef>,
}

impl Frame {
    pub fn new(scope: Scope, parent: Option<usize>, caller: Option<CallerRef>) -> Self {
        Self {
            scopes: vec![scope],
            loops: Vec::new(),
            parent,
            caller,
        }
    }

    /// Innermost binding of `name`
    pub fn lookup(&self, name: u32) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name))
    }

    /// Bind `name` in the innermost scope
    pub fn store(&mut self, name: u32, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name, value);
            }
            None => self.scopes.push(Scope::from_iter([(name, value)])),
        }
    }
}
