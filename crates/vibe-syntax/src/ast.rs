//! Template syntax tree

/// A parsed template: the statement list of its top level
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemplateAst {
    /// Top-level statements in source order
    pub body: Vec<Stmt>,
}

impl TemplateAst {
    /// Create a template from its statements
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body }
    }
}

/// Literal scalar values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `none`
    None,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal
    String(String),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `~`
    Concat,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `and` (short-circuit)
    And,
    /// `or` (short-circuit)
    Or,
}

impl BinaryOp {
    /// Stable numeric id, used as the operand of generic `BIN_OP`
    pub fn id(self) -> u32 {
        match self {
            Self::Add => 0,
            Self::Sub => 1,
            Self::Mul => 2,
            Self::Div => 3,
            Self::FloorDiv => 4,
            Self::Mod => 5,
            Self::Pow => 6,
            Self::Concat => 7,
            Self::Eq => 8,
            Self::Ne => 9,
            Self::Lt => 10,
            Self::Le => 11,
            Self::Gt => 12,
            Self::Ge => 13,
            Self::In => 14,
            Self::NotIn => 15,
            Self::And => 16,
            Self::Or => 17,
        }
    }

    /// Inverse of [`BinaryOp::id`]
    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::Add,
            1 => Self::Sub,
            2 => Self::Mul,
            3 => Self::Div,
            4 => Self::FloorDiv,
            5 => Self::Mod,
            6 => Self::Pow,
            7 => Self::Concat,
            8 => Self::Eq,
            9 => Self::Ne,
            10 => Self::Lt,
            11 => Self::Le,
            12 => Self::Gt,
            13 => Self::Ge,
            14 => Self::In,
            15 => Self::NotIn,
            16 => Self::And,
            17 => Self::Or,
            _ => return None,
        })
    }

    /// Source spelling
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::Concat => "~",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `not`
    Not,
    /// `-`
    Neg,
    /// `+`
    Pos,
}

impl UnaryOp {
    /// Stable numeric id, used as the operand of generic `UNARY_OP`
    pub fn id(self) -> u32 {
        match self {
            Self::Not => 0,
            Self::Neg => 1,
            Self::Pos => 2,
        }
    }

    /// Inverse of [`UnaryOp::id`]
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Not),
            1 => Some(Self::Neg),
            2 => Some(Self::Pos),
            _ => None,
        }
    }
}

/// Keyword argument `name=value`
#[derive(Debug, Clone, PartialEq)]
pub struct Kwarg {
    /// Argument name
    pub name: String,
    /// Argument value
    pub value: Expr,
}

/// A call expression `callee(args, name=value)`
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    /// Called expression
    pub callee: Box<Expr>,
    /// Positional arguments
    pub args: Vec<Expr>,
    /// Keyword arguments
    pub kwargs: Vec<Kwarg>,
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Scalar literal
    Literal(Literal),
    /// `[a, b]` (also tuples `(a, b)`)
    List(Vec<Expr>),
    /// `{k: v}`
    Dict(Vec<(Expr, Expr)>),
    /// Variable reference
    Name(String),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// `object.name`
    Attribute {
        /// Receiver
        object: Box<Expr>,
        /// Attribute name
        name: String,
    },
    /// `object[index]`
    Item {
        /// Receiver
        object: Box<Expr>,
        /// Subscript
        index: Box<Expr>,
    },
    /// `object[start:stop:step]`
    Slice {
        /// Receiver
        object: Box<Expr>,
        /// Start bound
        start: Option<Box<Expr>>,
        /// Stop bound
        stop: Option<Box<Expr>>,
        /// Step
        step: Option<Box<Expr>>,
    },
    /// Function, method or macro call
    Call(CallExpr),
    /// `value|name(args)`
    Filter {
        /// Filtered value
        value: Box<Expr>,
        /// Filter name
        name: String,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        kwargs: Vec<Kwarg>,
    },
    /// `value is [not] name(args)`
    Test {
        /// Tested value
        value: Box<Expr>,
        /// Test name
        name: String,
        /// Arguments
        args: Vec<Expr>,
        /// `is not`
        negated: bool,
    },
    /// `then if condition else otherwise`
    Conditional {
        /// Condition
        condition: Box<Expr>,
        /// Value when true
        then: Box<Expr>,
        /// Value when false (undefined if absent)
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Shorthand for a string literal
    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Literal::String(s.into()))
    }

    /// Shorthand for an integer literal
    pub fn int(n: i64) -> Self {
        Self::Literal(Literal::Int(n))
    }

    /// Shorthand for a name reference
    pub fn name(n: impl Into<String>) -> Self {
        Self::Name(n.into())
    }

    /// Shorthand for a binary operation
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// True for literals and list/dict displays made only of literals.
    ///
    /// Such expressions can be evaluated without any runtime context and are
    /// eligible for the constant pool.
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::List(items) => items.iter().all(Expr::is_constant),
            Self::Dict(pairs) => pairs
                .iter()
                .all(|(k, v)| matches!(k, Self::Literal(Literal::String(_))) && v.is_constant()),
            _ => false,
        }
    }

    /// `loop.<attr>` access, returning the attribute name
    pub fn as_loop_attribute(&self) -> Option<&str> {
        match self {
            Self::Attribute { object, name } if matches!(&**object, Self::Name(n) if n == "loop") => {
                Some(name)
            }
            _ => None,
        }
    }
}

/// One `if`/`elif` arm
#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    /// Condition
    pub condition: Expr,
    /// Body
    pub body: Vec<Stmt>,
}

/// Loop target
#[derive(Debug, Clone, PartialEq)]
pub enum ForTarget {
    /// `for x in ...`
    Name(String),
    /// `for k, v in ...`
    Tuple(Vec<String>),
}

/// `{% for %}` statement
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// Loop variable(s)
    pub target: ForTarget,
    /// Iterated expression
    pub iter: Expr,
    /// Loop body
    pub body: Vec<Stmt>,
    /// `{% else %}` body, run when the iterable is empty
    pub otherwise: Option<Vec<Stmt>>,
}

/// Macro or caller parameter
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    /// Parameter name
    pub name: String,
    /// Default value
    pub default: Option<Expr>,
}

/// `{% macro %}` definition
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    /// Macro name
    pub name: String,
    /// Declared parameters
    pub params: Vec<MacroParam>,
    /// Body
    pub body: Vec<Stmt>,
}

/// `name [as alias]` in a from-import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportName {
    /// Exported name
    pub name: String,
    /// Local alias
    pub alias: Option<String>,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Literal template text
    Text(String),
    /// `{{ expr }}`
    Output(Expr),
    /// `{% if %}...{% elif %}...{% else %}...{% endif %}`
    If {
        /// `if` and `elif` arms in order
        branches: Vec<IfBranch>,
        /// `else` body
        otherwise: Option<Vec<Stmt>>,
    },
    /// `{% for %}`
    For(ForLoop),
    /// `{% set name = expr %}`
    Set {
        /// Assigned name
        target: String,
        /// Value
        value: Expr,
    },
    /// `{% set name %}...{% endset %}`
    SetBlock {
        /// Assigned name
        target: String,
        /// Captured body
        body: Vec<Stmt>,
    },
    /// `{% with a = 1 %}...{% endwith %}`
    With {
        /// Scoped assignments
        bindings: Vec<(String, Expr)>,
        /// Body
        body: Vec<Stmt>,
    },
    /// `{% macro %}`
    Macro(MacroDef),
    /// `{% call(params) m(args) %}...{% endcall %}`
    CallBlock {
        /// Macro invocation
        call: CallExpr,
        /// Parameters of the caller body
        params: Vec<MacroParam>,
        /// Caller body
        body: Vec<Stmt>,
    },
    /// `{% break %}`
    Break,
    /// `{% continue %}`
    Continue,
    /// `{% include %}`
    Include {
        /// Template name expression
        template: Expr,
        /// `ignore missing`
        ignore_missing: bool,
    },
    /// `{% import 'x' as y %}`
    Import {
        /// Template name expression
        template: Expr,
        /// Module alias
        alias: String,
    },
    /// `{% from 'x' import a, b as c %}`
    FromImport {
        /// Template name expression
        template: Expr,
        /// Imported names
        names: Vec<ImportName>,
    },
    /// `{% extends %}`
    Extends {
        /// Parent template expression
        template: Expr,
    },
    /// `{% block name %}`
    Block {
        /// Block name
        name: String,
        /// Body
        body: Vec<Stmt>,
    },
    /// `{% filter name %}...{% endfilter %}`
    FilterBlock {
        /// Filter name
        filter: String,
        /// Filter arguments
        args: Vec<Expr>,
        /// Body
        body: Vec<Stmt>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_op_ids_roundtrip() {
        for id in 0..18 {
            let op = BinaryOp::from_id(id).unwrap();
            assert_eq!(op.id(), id);
        }
        assert!(BinaryOp::from_id(18).is_none());
    }

    #[test]
    fn test_is_constant() {
        assert!(Expr::int(1).is_constant());
        assert!(Expr::List(vec![Expr::int(1), Expr::string("a")]).is_constant());
        assert!(!Expr::List(vec![Expr::name("x")]).is_constant());
        assert!(!Expr::Dict(vec![(Expr::name("k"), Expr::int(1))]).is_constant());
    }

    #[test]
    fn test_loop_attribute() {
        let e = Expr::Attribute {
            object: Box::new(Expr::name("loop")),
            name: "index".into(),
        };
        assert_eq!(e.as_loop_attribute(), Some("index"));
        let e = Expr::Attribute {
            object: Box::new(Expr::name("item")),
            name: "index".into(),
        };
        assert_eq!(e.as_loop_attribute(), None);
    }
}
