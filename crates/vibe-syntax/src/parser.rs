//! Recursive-descent template parser

use crate::ast::*;
use crate::error::{SyntaxError, SyntaxResult};
use crate::lexer::{LexerOptions, SpannedToken, Token, tokenize};

/// Names that end an expression when they appear where an operand could follow
const RESERVED: &[&str] = &["and", "or", "not", "in", "is", "if", "else"];

/// Deepest nesting of blocks, brackets and unary operators
pub const MAX_NESTING: usize = 64;

/// Most operators chained on the current path (`a + b + ...`, `x.y.z`)
pub const MAX_CHAIN: usize = 1024;

/// Template parser
pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    /// Enclosing `for` loops at the current point (reset inside macros)
    loop_depth: usize,
    /// Current nesting, bounded by [`MAX_NESTING`]
    depth: usize,
    /// Chained operators on the current path, bounded by [`MAX_CHAIN`]
    links: usize,
}

impl Parser {
    /// Tokenize `source` and prepare a parser over it
    pub fn new(source: &str, options: &LexerOptions) -> SyntaxResult<Self> {
        Ok(Self {
            tokens: tokenize(source, options)?,
            pos: 0,
            loop_depth: 0,
            depth: 0,
            links: 0,
        })
    }

    /// Parse the whole template
    pub fn parse(mut self) -> SyntaxResult<TemplateAst> {
        let body = self.subparse(&[])?;
        Ok(TemplateAst::new(body))
    }

    // ==================== Token helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    /// Go one level deeper, failing past [`MAX_NESTING`]
    fn descend(&mut self) -> SyntaxResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(SyntaxError::TooDeep {
                limit: MAX_NESTING,
                line: self.line(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `f` one level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> SyntaxResult<T>) -> SyntaxResult<T> {
        self.descend()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Add one operator to the current chain, failing past [`MAX_CHAIN`]
    fn link(&mut self) -> SyntaxResult<()> {
        if self.links >= MAX_CHAIN {
            return Err(SyntaxError::TooDeep {
                limit: MAX_CHAIN,
                line: self.line(),
            });
        }
        self.links += 1;
        Ok(())
    }

    /// Run a left-associative chain; the links it adds are released when
    /// the chain ends
    fn chain(&mut self, f: impl FnOnce(&mut Self) -> SyntaxResult<Expr>) -> SyntaxResult<Expr> {
        let links = self.links;
        let result = f(self);
        self.links = links;
        result
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> SyntaxResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(SyntaxError::unexpected(
                token.to_string(),
                self.peek().to_string(),
                self.line(),
            ))
        }
    }

    fn peek_name(&self) -> Option<&str> {
        match self.peek() {
            Token::Name(n) => Some(n),
            _ => None,
        }
    }

    fn eat_name(&mut self, keyword: &str) -> bool {
        if self.peek_name() == Some(keyword) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_name(&mut self) -> SyntaxResult<String> {
        match self.next() {
            Token::Name(n) => Ok(n),
            other => Err(SyntaxError::unexpected(
                "name",
                other.to_string(),
                self.line(),
            )),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> SyntaxResult<()> {
        if self.eat_name(keyword) {
            Ok(())
        } else {
            Err(SyntaxError::unexpected(
                format!("'{}'", keyword),
                self.peek().to_string(),
                self.line(),
            ))
        }
    }

    // ==================== Statements ====================

    /// Parse statements until a block tag whose keyword is in `end`.
    ///
    /// On return the parser is positioned on that keyword (the `{%` has been
    /// consumed). With an empty `end` list, parses to end of input.
    fn subparse(&mut self, end: &[&str]) -> SyntaxResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek().clone() {
                Token::Eof => {
                    if end.is_empty() {
                        return Ok(body);
                    }
                    return Err(SyntaxError::UnexpectedEof {
                        expected: end.join(" or "),
                    });
                }
                Token::Text(text) => {
                    self.next();
                    body.push(Stmt::Text(text));
                }
                Token::VariableStart => {
                    self.next();
                    let expr = self.parse_expr()?;
                    self.expect(Token::VariableEnd)?;
                    body.push(Stmt::Output(expr));
                }
                Token::BlockStart => {
                    self.next();
                    if let Some(name) = self.peek_name()
                        && end.contains(&name)
                    {
                        return Ok(body);
                    }
                    body.push(self.nested(Self::parse_statement)?);
                }
                other => {
                    return Err(SyntaxError::unexpected(
                        "template data or tag",
                        other.to_string(),
                        self.line(),
                    ));
                }
            }
        }
    }

    /// Consume `keyword [extra names] %}` closing a block
    fn close_block(&mut self, keyword: &str) -> SyntaxResult<()> {
        self.expect_keyword(keyword)?;
        // `{% endmacro name %}` / `{% endblock name %}`
        if matches!(self.peek(), Token::Name(_)) {
            self.next();
        }
        self.expect(Token::BlockEnd)
    }

    fn parse_statement(&mut self) -> SyntaxResult<Stmt> {
        let line = self.line();
        let keyword = self.expect_name()?;
        match keyword.as_str() {
            "if" => self.parse_if(),
            "for" => self.parse_for(),
            "set" => self.parse_set(),
            "with" => self.parse_with(),
            "macro" => self.parse_macro(),
            "call" => self.parse_call_block(),
            "break" | "continue" => {
                if self.loop_depth == 0 {
                    return Err(SyntaxError::invalid(
                        format!("'{}' outside of a loop", keyword),
                        line,
                    ));
                }
                self.expect(Token::BlockEnd)?;
                Ok(if keyword == "break" {
                    Stmt::Break
                } else {
                    Stmt::Continue
                })
            }
            "include" => {
                let template = self.parse_expr()?;
                let mut ignore_missing = false;
                if self.eat_name("ignore") {
                    self.expect_keyword("missing")?;
                    ignore_missing = true;
                }
                self.skip_context_modifier();
                self.expect(Token::BlockEnd)?;
                Ok(Stmt::Include {
                    template,
                    ignore_missing,
                })
            }
            "import" => {
                let template = self.parse_expr()?;
                self.expect_keyword("as")?;
                let alias = self.expect_name()?;
                self.skip_context_modifier();
                self.expect(Token::BlockEnd)?;
                Ok(Stmt::Import { template, alias })
            }
            "from" => {
                let template = self.parse_expr()?;
                self.expect_keyword("import")?;
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name()?;
                    let alias = if self.eat_name("as") {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push(ImportName { name, alias });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.skip_context_modifier();
                self.expect(Token::BlockEnd)?;
                Ok(Stmt::FromImport { template, names })
            }
            "extends" => {
                let template = self.parse_expr()?;
                self.expect(Token::BlockEnd)?;
                Ok(Stmt::Extends { template })
            }
            "block" => {
                let name = self.expect_name()?;
                while self.eat_name("scoped") || self.eat_name("required") {}
                self.expect(Token::BlockEnd)?;
                let body = self.subparse(&["endblock"])?;
                self.close_block("endblock")?;
                Ok(Stmt::Block { name, body })
            }
            "filter" => {
                let filter = self.expect_name()?;
                let args = if self.peek() == &Token::LParen {
                    self.parse_call_args()?.0
                } else {
                    Vec::new()
                };
                self.expect(Token::BlockEnd)?;
                let body = self.subparse(&["endfilter"])?;
                self.close_block("endfilter")?;
                Ok(Stmt::FilterBlock { filter, args, body })
            }
            _ => Err(SyntaxError::UnknownTag {
                name: keyword,
                line,
            }),
        }
    }

    fn skip_context_modifier(&mut self) {
        if matches!(self.peek_name(), Some("with" | "without"))
            && matches!(self.peek_at(1), Token::Name(n) if n == "context")
        {
            self.next();
            self.next();
        }
    }

    fn parse_if(&mut self) -> SyntaxResult<Stmt> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut condition = self.parse_expr()?;
        loop {
            self.expect(Token::BlockEnd)?;
            let body = self.subparse(&["elif", "else", "endif"])?;
            branches.push(IfBranch { condition, body });
            match self.expect_name()?.as_str() {
                "elif" => condition = self.parse_expr()?,
                "else" => {
                    self.expect(Token::BlockEnd)?;
                    otherwise = Some(self.subparse(&["endif"])?);
                    self.close_block("endif")?;
                    break;
                }
                _ => {
                    self.expect(Token::BlockEnd)?;
                    break;
                }
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn parse_for(&mut self) -> SyntaxResult<Stmt> {
        let parenthesized = self.eat(&Token::LParen);
        let mut names = vec![self.expect_name()?];
        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Token::Name(n) if n != "in") {
                names.push(self.expect_name()?);
            }
        }
        if parenthesized {
            self.expect(Token::RParen)?;
        }
        let target = if names.len() == 1 && !parenthesized {
            ForTarget::Name(names.remove(0))
        } else {
            ForTarget::Tuple(names)
        };

        self.expect_keyword("in")?;
        let iter = self.parse_or()?;
        if self.peek_name() == Some("if") || self.peek_name() == Some("recursive") {
            return Err(SyntaxError::invalid(
                "loop filters and recursive loops are not supported",
                self.line(),
            ));
        }
        self.expect(Token::BlockEnd)?;

        self.loop_depth += 1;
        let body = self.subparse(&["else", "endfor"]);
        self.loop_depth -= 1;
        let body = body?;

        let otherwise = if self.eat_name("else") {
            self.expect(Token::BlockEnd)?;
            Some(self.subparse(&["endfor"])?)
        } else {
            None
        };
        self.close_block("endfor")?;
        Ok(Stmt::For(ForLoop {
            target,
            iter,
            body,
            otherwise,
        }))
    }

    fn parse_set(&mut self) -> SyntaxResult<Stmt> {
        let target = self.expect_name()?;
        if self.eat(&Token::Assign) {
            let value = self.parse_expr()?;
            self.expect(Token::BlockEnd)?;
            return Ok(Stmt::Set { target, value });
        }
        self.expect(Token::BlockEnd)?;
        let body = self.subparse(&["endset"])?;
        self.close_block("endset")?;
        Ok(Stmt::SetBlock { target, body })
    }

    fn parse_with(&mut self) -> SyntaxResult<Stmt> {
        let mut bindings = Vec::new();
        while self.peek() != &Token::BlockEnd {
            if !bindings.is_empty() {
                self.expect(Token::Comma)?;
            }
            let name = self.expect_name()?;
            self.expect(Token::Assign)?;
            bindings.push((name, self.parse_expr()?));
        }
        self.expect(Token::BlockEnd)?;
        let body = self.subparse(&["endwith"])?;
        self.close_block("endwith")?;
        Ok(Stmt::With { bindings, body })
    }

    fn parse_params(&mut self) -> SyntaxResult<Vec<MacroParam>> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.eat(&Token::RParen) {
            if !params.is_empty() {
                self.expect(Token::Comma)?;
                if self.eat(&Token::RParen) {
                    break;
                }
            }
            let name = self.expect_name()?;
            let default = if self.eat(&Token::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(MacroParam { name, default });
        }
        Ok(params)
    }

    /// Parse a macro or caller body with loop tracking suspended
    fn parse_callable_body(&mut self, end: &str) -> SyntaxResult<Vec<Stmt>> {
        let saved = std::mem::take(&mut self.loop_depth);
        let body = self.subparse(&[end]);
        self.loop_depth = saved;
        let body = body?;
        self.close_block(end)?;
        Ok(body)
    }

    fn parse_macro(&mut self) -> SyntaxResult<Stmt> {
        let name = self.expect_name()?;
        let params = self.parse_params()?;
        self.expect(Token::BlockEnd)?;
        let body = self.parse_callable_body("endmacro")?;
        Ok(Stmt::Macro(MacroDef { name, params, body }))
    }

    fn parse_call_block(&mut self) -> SyntaxResult<Stmt> {
        let params = if self.peek() == &Token::LParen {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let line = self.line();
        let call = match self.parse_expr()? {
            Expr::Call(call) => call,
            _ => return Err(SyntaxError::invalid("expected call expression", line)),
        };
        self.expect(Token::BlockEnd)?;
        let body = self.parse_callable_body("endcall")?;
        Ok(Stmt::CallBlock { call, params, body })
    }

    // ==================== Expressions ====================

    /// Parse a full expression including `a if b else c`
    pub fn parse_expr(&mut self) -> SyntaxResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> SyntaxResult<Expr> {
        let then = self.parse_or()?;
        if self.eat_name("if") {
            let condition = self.parse_or()?;
            let otherwise = if self.eat_name("else") {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise,
            });
        }
        Ok(then)
    }

    fn parse_or(&mut self) -> SyntaxResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_and()?;
            while p.eat_name("or") {
                p.link()?;
                let right = p.parse_and()?;
                left = Expr::binary(BinaryOp::Or, left, right);
            }
            Ok(left)
        })
    }

    fn parse_and(&mut self) -> SyntaxResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_not()?;
            while p.eat_name("and") {
                p.link()?;
                let right = p.parse_not()?;
                left = Expr::binary(BinaryOp::And, left, right);
            }
            Ok(left)
        })
    }

    fn parse_not(&mut self) -> SyntaxResult<Expr> {
        if self.eat_name("not") {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> SyntaxResult<Expr> {
        self.chain(Self::parse_compare_chain)
    }

    fn parse_compare_chain(&mut self) -> SyntaxResult<Expr> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::Name(n) if n == "in" => BinaryOp::In,
                Token::Name(n)
                    if n == "not" && matches!(self.peek_at(1), Token::Name(m) if m == "in") =>
                {
                    self.next();
                    BinaryOp::NotIn
                }
                Token::Name(n) if n == "is" => {
                    self.next();
                    self.link()?;
                    left = self.parse_test(left)?;
                    continue;
                }
                _ => return Ok(left),
            };
            self.next();
            self.link()?;
            let right = self.parse_concat()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_test(&mut self, value: Expr) -> SyntaxResult<Expr> {
        let negated = self.eat_name("not");
        let name = self.expect_name()?;
        let args = match self.peek() {
            Token::LParen => self.parse_call_args()?.0,
            Token::Int(_) | Token::Float(_) | Token::Str(_) => vec![self.parse_primary()?],
            Token::Name(n) if !RESERVED.contains(&n.as_str()) => vec![self.parse_postfix()?],
            _ => Vec::new(),
        };
        Ok(Expr::Test {
            value: Box::new(value),
            name,
            args,
            negated,
        })
    }

    fn parse_concat(&mut self) -> SyntaxResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_math1()?;
            while p.eat(&Token::Tilde) {
                p.link()?;
                let right = p.parse_math1()?;
                left = Expr::binary(BinaryOp::Concat, left, right);
            }
            Ok(left)
        })
    }

    fn parse_math1(&mut self) -> SyntaxResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_math2()?;
            loop {
                let op = match p.peek() {
                    Token::Plus => BinaryOp::Add,
                    Token::Minus => BinaryOp::Sub,
                    _ => return Ok(left),
                };
                p.next();
                p.link()?;
                let right = p.parse_math2()?;
                left = Expr::binary(op, left, right);
            }
        })
    }

    fn parse_math2(&mut self) -> SyntaxResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_unary()?;
            loop {
                let op = match p.peek() {
                    Token::Star => BinaryOp::Mul,
                    Token::Slash => BinaryOp::Div,
                    Token::SlashSlash => BinaryOp::FloorDiv,
                    Token::Percent => BinaryOp::Mod,
                    _ => return Ok(left),
                };
                p.next();
                p.link()?;
                let right = p.parse_unary()?;
                left = Expr::binary(op, left, right);
            }
        })
    }

    fn parse_unary(&mut self) -> SyntaxResult<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.parse_pow(),
        };
        self.next();
        let operand = self.nested(Self::parse_unary)?;
        // Fold `-5` into a literal so the generator can pick a fast load.
        if let (UnaryOp::Neg, Expr::Literal(lit)) = (op, &operand) {
            match lit {
                Literal::Int(n) => return Ok(Expr::int(n.wrapping_neg())),
                Literal::Float(f) => return Ok(Expr::Literal(Literal::Float(-f))),
                _ => {}
            }
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_pow(&mut self) -> SyntaxResult<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::StarStar) {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> SyntaxResult<Expr> {
        self.chain(Self::parse_postfix_chain)
    }

    fn parse_postfix_chain(&mut self) -> SyntaxResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if matches!(
                self.peek(),
                Token::Dot | Token::LBracket | Token::LParen | Token::Pipe
            ) {
                self.link()?;
            }
            match self.peek() {
                Token::Dot => {
                    self.next();
                    expr = match self.next() {
                        Token::Name(name) => Expr::Attribute {
                            object: Box::new(expr),
                            name,
                        },
                        Token::Int(n) => Expr::Item {
                            object: Box::new(expr),
                            index: Box::new(Expr::int(n)),
                        },
                        other => {
                            return Err(SyntaxError::unexpected(
                                "attribute name",
                                other.to_string(),
                                self.line(),
                            ));
                        }
                    };
                }
                Token::LBracket => {
                    self.next();
                    expr = self.parse_subscript(expr)?;
                }
                Token::LParen => {
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call(CallExpr {
                        callee: Box::new(expr),
                        args,
                        kwargs,
                    });
                }
                Token::Pipe => {
                    self.next();
                    let name = self.expect_name()?;
                    let (args, kwargs) = if self.peek() == &Token::LParen {
                        self.parse_call_args()?
                    } else {
                        (Vec::new(), Vec::new())
                    };
                    expr = Expr::Filter {
                        value: Box::new(expr),
                        name,
                        args,
                        kwargs,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_subscript(&mut self, object: Expr) -> SyntaxResult<Expr> {
        let mut bounds: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut part = 0;
        let mut is_slice = false;
        loop {
            match self.peek() {
                Token::RBracket => {
                    self.next();
                    break;
                }
                Token::Colon => {
                    self.next();
                    is_slice = true;
                    part += 1;
                    if part > 2 {
                        return Err(SyntaxError::invalid("too many slice parts", self.line()));
                    }
                }
                _ if bounds[part].is_some() => {
                    return Err(SyntaxError::unexpected(
                        "']' or ':'",
                        self.peek().to_string(),
                        self.line(),
                    ));
                }
                _ => bounds[part] = Some(Box::new(self.parse_expr()?)),
            }
        }
        let [start, stop, step] = bounds;
        if is_slice {
            return Ok(Expr::Slice {
                object: Box::new(object),
                start,
                stop,
                step,
            });
        }
        let index = start.ok_or_else(|| SyntaxError::invalid("empty subscript", self.line()))?;
        Ok(Expr::Item {
            object: Box::new(object),
            index,
        })
    }

    fn parse_call_args(&mut self) -> SyntaxResult<(Vec<Expr>, Vec<Kwarg>)> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        let mut first = true;
        while !self.eat(&Token::RParen) {
            if !first {
                self.expect(Token::Comma)?;
                if self.eat(&Token::RParen) {
                    break;
                }
            }
            first = false;
            if let (Token::Name(name), Token::Assign) = (self.peek(), self.peek_at(1)) {
                let name = name.clone();
                self.next();
                self.next();
                kwargs.push(Kwarg {
                    name,
                    value: self.parse_expr()?,
                });
            } else {
                if !kwargs.is_empty() {
                    return Err(SyntaxError::invalid(
                        "positional argument follows keyword argument",
                        self.line(),
                    ));
                }
                args.push(self.parse_expr()?);
            }
        }
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> SyntaxResult<Expr> {
        let line = self.line();
        match self.next() {
            Token::Name(name) => Ok(match name.as_str() {
                "true" | "True" => Expr::Literal(Literal::Bool(true)),
                "false" | "False" => Expr::Literal(Literal::Bool(false)),
                "none" | "None" => Expr::Literal(Literal::None),
                _ => Expr::Name(name),
            }),
            Token::Int(n) => Ok(Expr::int(n)),
            Token::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Token::Str(mut s) => {
                // adjacent string literals concatenate
                while let Token::Str(next) = self.peek() {
                    s.push_str(next);
                    self.next();
                }
                Ok(Expr::string(s))
            }
            Token::LParen => {
                if self.eat(&Token::RParen) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.peek() == &Token::RParen {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::List(items))
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while !self.eat(&Token::RBracket) {
                    if !items.is_empty() {
                        self.expect(Token::Comma)?;
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                    }
                    items.push(self.parse_expr()?);
                }
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let mut pairs = Vec::new();
                while !self.eat(&Token::RBrace) {
                    if !pairs.is_empty() {
                        self.expect(Token::Comma)?;
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                    }
                    let key = self.parse_expr()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                }
                Ok(Expr::Dict(pairs))
            }
            other => Err(SyntaxError::unexpected(
                "expression",
                other.to_string(),
                line,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn expr(src: &str) -> Expr {
        match parse(&format!("{{{{ {} }}}}", src)).unwrap().body.remove(0) {
            Stmt::Output(e) => e,
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Expr::binary(
                BinaryOp::Add,
                Expr::int(1),
                Expr::binary(BinaryOp::Mul, Expr::int(2), Expr::int(3))
            )
        );
    }

    #[test]
    fn test_negative_literal_folded() {
        assert_eq!(expr("-1"), Expr::int(-1));
    }

    #[test]
    fn test_filter_chain() {
        let e = expr("name|upper|default('x')");
        match e {
            Expr::Filter { name, args, value, .. } => {
                assert_eq!(name, "default");
                assert_eq!(args, vec![Expr::string("x")]);
                assert!(matches!(*value, Expr::Filter { ref name, .. } if name == "upper"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_is_not_test() {
        match expr("x is not divisibleby 3") {
            Expr::Test {
                name,
                negated,
                args,
                ..
            } => {
                assert_eq!(name, "divisibleby");
                assert!(negated);
                assert_eq!(args, vec![Expr::int(3)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_in() {
        assert_eq!(
            expr("a not in b"),
            Expr::binary(BinaryOp::NotIn, Expr::name("a"), Expr::name("b"))
        );
    }

    #[test]
    fn test_slice() {
        assert!(matches!(
            expr("items[1:]"),
            Expr::Slice {
                start: Some(_),
                stop: None,
                step: None,
                ..
            }
        ));
    }

    #[test]
    fn test_call_kwargs() {
        match expr("m(1, b=2)") {
            Expr::Call(call) => {
                assert_eq!(call.args.len(), 1);
                assert_eq!(call.kwargs[0].name, "b");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let ast = parse("{% if a %}A{% elif b %}B{% else %}C{% endif %}").unwrap();
        match &ast.body[0] {
            Stmt::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.as_ref().unwrap(), &vec![Stmt::Text("C".into())]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_else() {
        let ast = parse("{% for x in xs %}A{% else %}B{% endfor %}").unwrap();
        match &ast.body[0] {
            Stmt::For(f) => {
                assert_eq!(f.target, ForTarget::Name("x".into()));
                assert!(f.otherwise.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tuple_target() {
        let ast = parse("{% for k, v in items %}{% endfor %}").unwrap();
        assert!(matches!(
            &ast.body[0],
            Stmt::For(ForLoop { target: ForTarget::Tuple(names), .. }) if names.len() == 2
        ));
    }

    #[test]
    fn test_macro_and_call_block() {
        let ast = parse(
            "{% macro m(a, b=5) %}{{ a }}{% endmacro %}{% call(x) m(1) %}{{ x }}{% endcall %}",
        )
        .unwrap();
        match &ast.body[0] {
            Stmt::Macro(def) => {
                assert_eq!(def.name, "m");
                assert_eq!(def.params[1].default, Some(Expr::int(5)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&ast.body[1], Stmt::CallBlock { params, .. } if params.len() == 1));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(matches!(
            parse("{% break %}"),
            Err(SyntaxError::Invalid { .. })
        ));
    }

    #[test]
    fn test_break_inside_macro_in_loop_rejected() {
        let src = "{% for x in xs %}{% macro m() %}{% break %}{% endmacro %}{% endfor %}";
        assert!(parse(src).is_err());
    }

    #[test]
    fn test_unclosed_block() {
        assert!(matches!(
            parse("{% if x %}"),
            Err(SyntaxError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            parse("{% frobnicate %}"),
            Err(SyntaxError::UnknownTag { .. })
        ));
    }

    #[test]
    fn test_set_forms() {
        let ast = parse("{% set x = 1 %}{% set y %}body{% endset %}").unwrap();
        assert!(matches!(&ast.body[0], Stmt::Set { target, .. } if target == "x"));
        assert!(matches!(&ast.body[1], Stmt::SetBlock { target, .. } if target == "y"));
    }

    #[test]
    fn test_conditional_expression() {
        assert!(matches!(
            expr("'a' if x else 'b'"),
            Expr::Conditional {
                otherwise: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{{{{ {}1{} }}}}", "(".repeat(n), ")".repeat(n));
        assert!(parse(&nested(MAX_NESTING - 2)).is_ok());
        assert!(matches!(
            parse(&nested(MAX_NESTING)),
            Err(SyntaxError::TooDeep { limit: MAX_NESTING, .. })
        ));

        let blocks = |n: usize| format!("{}x{}", "{% if a %}".repeat(n), "{% endif %}".repeat(n));
        assert!(parse(&blocks(MAX_NESTING - 1)).is_ok());
        assert!(matches!(
            parse(&blocks(MAX_NESTING + 1)),
            Err(SyntaxError::TooDeep { .. })
        ));

        assert!(matches!(
            parse(&format!("{{{{ {}1 }}}}", "-".repeat(MAX_NESTING + 1))),
            Err(SyntaxError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_chain_limit() {
        let sum = |n: usize| format!("{{{{ 1{} }}}}", " + 1".repeat(n));
        assert!(parse(&sum(MAX_CHAIN)).is_ok());
        assert!(matches!(
            parse(&sum(MAX_CHAIN + 1)),
            Err(SyntaxError::TooDeep { limit: MAX_CHAIN, .. })
        ));
        assert!(parse(&format!("{{{{ x{} }}}}", "|upper".repeat(MAX_CHAIN + 1))).is_err());
        // each chain releases its links
        let line = format!("{{{{ 1{} }}}}", " ~ 1".repeat(MAX_CHAIN / 2));
        assert!(parse(&line.repeat(4)).is_ok());
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parse_never_panics(src in "[a-z{}%#()|.,'\" 0-9+*-]{0,40}") {
            let _ = crate::parse(&src);
        }

        #[test]
        fn plain_text_roundtrips(text in "[a-zA-Z0-9 ,.!?]{1,40}") {
            let ast = crate::parse(&text).unwrap();
            prop_assert_eq!(ast.body, vec![crate::Stmt::Text(text)]);
        }
    }
}
