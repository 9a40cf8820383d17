//! Macro pool entries

use serde::{Deserialize, Serialize};

/// One declared macro parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroParamEntry {
    /// Name pool index of the parameter
    pub name: u32,
    /// Constant pool index of a literal default.
    ///
    /// Non-literal defaults are evaluated by a prologue at the start of the
    /// body and leave this empty.
    pub default: Option<u32>,
}

/// A macro or caller body compiled into the instruction stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledMacro {
    /// Name pool index (`caller` for call-block bodies)
    pub name: u32,
    /// Declared parameters in order
    pub params: Vec<MacroParamEntry>,
    /// First instruction of the body
    pub body_start: u32,
    /// One past the body's `RETURN`
    pub body_end: u32,
    /// The body reads `varargs`
    pub catch_varargs: bool,
    /// The body reads `kwargs`
    pub catch_kwargs: bool,
}

impl CompiledMacro {
    /// Body instruction range
    #[inline]
    pub fn body(&self) -> std::ops::Range<usize> {
        self.body_start as usize..self.body_end as usize
    }
}
