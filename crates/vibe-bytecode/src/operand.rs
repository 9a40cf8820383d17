//! Operand layouts
//!
//! Opcodes that need more than one small number pack them into the 32-bit
//! operand. Calls, filters and tests use [`CallOperand`]: the pool index in
//! bits 16..32, positional argument count in bits 8..16 and keyword argument
//! count in bits 0..8.

/// Packed operand for call, filter and test opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallOperand {
    /// Name pool index (ignored by opcodes that call a value)
    pub name: u16,
    /// Positional arguments on the stack
    pub argc: u8,
    /// Keyword arguments on the stack (each a value/name pair)
    pub kwargc: u8,
}

impl CallOperand {
    /// Create a packed call operand
    #[inline]
    pub const fn new(name: u16, argc: u8, kwargc: u8) -> Self {
        Self { name, argc, kwargc }
    }

    /// Pack into an instruction operand
    #[inline]
    pub const fn pack(self) -> u32 {
        ((self.name as u32) << 16) | ((self.argc as u32) << 8) | self.kwargc as u32
    }

    /// Unpack from an instruction operand
    #[inline]
    pub const fn unpack(operand: u32) -> Self {
        Self {
            name: (operand >> 16) as u16,
            argc: (operand >> 8) as u8,
            kwargc: operand as u8,
        }
    }
}

/// Which slice bounds are present on the stack for `SLICE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SliceFlags {
    /// `start` was given
    pub start: bool,
    /// `stop` was given
    pub stop: bool,
    /// `step` was given
    pub step: bool,
}

impl SliceFlags {
    /// Pack into an instruction operand
    #[inline]
    pub const fn pack(self) -> u32 {
        (self.start as u32) | ((self.stop as u32) << 1) | ((self.step as u32) << 2)
    }

    /// Unpack from an instruction operand
    #[inline]
    pub const fn unpack(operand: u32) -> Self {
        Self {
            start: operand & 1 != 0,
            stop: operand & 2 != 0,
            step: operand & 4 != 0,
        }
    }
}

/// Loop attribute selected by `LOOP_ATTR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoopAttr {
    /// 1-based position
    Index = 0,
    /// 0-based position
    Index0 = 1,
    /// 1-based position from the end
    RevIndex = 2,
    /// 0-based position from the end
    RevIndex0 = 3,
    /// First iteration
    First = 4,
    /// Last iteration
    Last = 5,
    /// Item count
    Length = 6,
    /// Nesting depth, 1-based
    Depth = 7,
    /// Previous item (undefined on the first iteration)
    PrevItem = 8,
    /// Next item (undefined on the last iteration)
    NextItem = 9,
}

impl LoopAttr {
    /// Every attribute, in operand order
    pub const ALL: [LoopAttr; 10] = [
        Self::Index,
        Self::Index0,
        Self::RevIndex,
        Self::RevIndex0,
        Self::First,
        Self::Last,
        Self::Length,
        Self::Depth,
        Self::PrevItem,
        Self::NextItem,
    ];

    /// Look up by source name (`loop.index` etc.)
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "index" => Self::Index,
            "index0" => Self::Index0,
            "revindex" => Self::RevIndex,
            "revindex0" => Self::RevIndex0,
            "first" => Self::First,
            "last" => Self::Last,
            "length" => Self::Length,
            "depth" => Self::Depth,
            "previtem" => Self::PrevItem,
            "nextitem" => Self::NextItem,
            _ => return None,
        })
    }

    /// Decode an operand
    #[inline]
    pub fn from_operand(operand: u32) -> Option<Self> {
        Self::ALL.get(operand as usize).copied()
    }

    /// Source name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Index0 => "index0",
            Self::RevIndex => "revindex",
            Self::RevIndex0 => "revindex0",
            Self::First => "first",
            Self::Last => "last",
            Self::Length => "length",
            Self::Depth => "depth",
            Self::PrevItem => "previtem",
            Self::NextItem => "nextitem",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_operand_layout() {
        let op = CallOperand::new(0x1234, 3, 2);
        assert_eq!(op.pack(), 0x1234_0302);
        assert_eq!(CallOperand::unpack(0x1234_0302), op);
    }

    #[test]
    fn test_slice_flags() {
        let flags = SliceFlags {
            start: true,
            stop: false,
            step: true,
        };
        assert_eq!(flags.pack(), 0b101);
        assert_eq!(SliceFlags::unpack(0b101), flags);
    }

    #[test]
    fn test_loop_attr_ids_match_order() {
        for (i, attr) in LoopAttr::ALL.iter().enumerate() {
            assert_eq!(*attr as usize, i);
            assert_eq!(LoopAttr::from_name(attr.name()), Some(*attr));
        }
        assert_eq!(LoopAttr::from_operand(10), None);
        assert_eq!(LoopAttr::from_name("cycle"), None);
    }
}
