//! Syntax tree to bytecode lowering

use rustc_hash::FxHashSet;
use vibe_bytecode::{
    Bytecode, CallOperand, CompiledMacro, LoopAttr, MacroParamEntry, Opcode, SliceFlags, fnv1a64,
};
use vibe_syntax::{
    BinaryOp, CallExpr, Expr, ForLoop, ForTarget, IfBranch, Kwarg, Literal, MacroParam, Stmt,
    TemplateAst, UnaryOp,
};

use crate::codegen::CodeGen;
use crate::error::{CompileError, CompileResult};
use crate::scope::ScopeChain;
use crate::visit::{each_stmt, reads_name};

/// Jumps waiting for the end of the innermost loop
#[derive(Debug, Default)]
struct LoopInfo {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
}

/// Template compiler
pub struct Compiler<'a> {
    code: CodeGen<'a>,
    scopes: ScopeChain,
    loops: Vec<LoopInfo>,
    /// Names defined by `{% macro %}` anywhere in the template
    template_macros: FxHashSet<&'a str>,
    /// Nesting of macro and caller bodies being compiled
    macro_depth: usize,
}

impl<'a> Compiler<'a> {
    /// Compile `ast`, recording the checksum of `source` for cache validation
    pub fn compile(ast: &'a TemplateAst, source: &str) -> CompileResult<Bytecode<'a>> {
        let mut compiler = Self::new(ast);
        compiler.compile_body(&ast.body)?;
        compiler.code.emit_simple(Opcode::End);
        let bytecode = compiler.code.finish(fnv1a64(source.as_bytes()))?;
        tracing::trace!(
            instructions = bytecode.len(),
            strings = bytecode.strings().len(),
            names = bytecode.names().len(),
            constants = bytecode.constants().len(),
            macros = bytecode.macros().len(),
            "compiled template"
        );
        Ok(bytecode)
    }

    fn new(ast: &'a TemplateAst) -> Self {
        let mut template_macros = FxHashSet::default();
        each_stmt(&ast.body, &mut |stmt| {
            if let Stmt::Macro(def) = stmt {
                template_macros.insert(def.name.as_str());
            }
        });
        let mut scopes = ScopeChain::new();
        scopes.enter();
        Self {
            code: CodeGen::new(),
            scopes,
            loops: Vec::new(),
            template_macros,
            macro_depth: 0,
        }
    }

    // ==================== Statements ====================

    fn compile_body(&mut self, body: &'a [Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &'a Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Text(text) => {
                if !text.is_empty() {
                    let idx = self.code.add_string(text)?;
                    self.code.emit(Opcode::EmitText, idx);
                }
            }
            Stmt::Output(Expr::Literal(Literal::String(text))) => {
                let idx = self.code.add_string(text)?;
                self.code.emit(Opcode::EmitText, idx);
            }
            Stmt::Output(expr) => {
                self.compile_expr(expr)?;
                self.code.emit_simple(Opcode::Emit);
            }
            Stmt::If {
                branches,
                otherwise,
            } => self.compile_if(branches, otherwise.as_deref())?,
            Stmt::For(for_loop) => self.compile_for(for_loop)?,
            Stmt::Set { target, value } => {
                self.compile_expr(value)?;
                self.store(target)?;
            }
            Stmt::With { bindings, body } => self.compile_with(bindings, body)?,
            Stmt::Macro(def) => {
                let name = self.code.add_name(&def.name)?;
                let idx = self.compile_callable(name as u32, &def.params, &def.body)?;
                self.code.emit(Opcode::DefineMacro, idx);
            }
            Stmt::CallBlock { call, params, body } => self.compile_call_block(call, params, body)?,
            Stmt::Break | Stmt::Continue => {
                let jump = self.code.emit_jump(if matches!(stmt, Stmt::Break) {
                    Opcode::BreakLoop
                } else {
                    Opcode::ContinueLoop
                });
                let info = self
                    .loops
                    .last_mut()
                    .ok_or_else(|| CompileError::unsupported("break or continue outside a loop"))?;
                if matches!(stmt, Stmt::Break) {
                    info.break_jumps.push(jump);
                } else {
                    info.continue_jumps.push(jump);
                }
            }
            Stmt::Block { body, .. } => self.compile_body(body)?,
            Stmt::SetBlock { .. }
            | Stmt::Include { .. }
            | Stmt::Import { .. }
            | Stmt::FromImport { .. }
            | Stmt::Extends { .. }
            | Stmt::FilterBlock { .. } => {
                tracing::debug!(statement = stmt_kind(stmt), "statement not lowered to bytecode");
            }
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        branches: &'a [IfBranch],
        otherwise: Option<&'a [Stmt]>,
    ) -> CompileResult<()> {
        let mut end_jumps = Vec::with_capacity(branches.len());
        for (i, branch) in branches.iter().enumerate() {
            self.compile_expr(&branch.condition)?;
            let next = self.code.emit_jump(Opcode::JumpIfFalse);
            self.compile_body(&branch.body)?;
            let is_last = i + 1 == branches.len() && otherwise.is_none();
            if !is_last {
                end_jumps.push(self.code.emit_jump(Opcode::Jump));
            }
            self.code.patch_to_here(next)?;
        }
        if let Some(body) = otherwise {
            self.compile_body(body)?;
        }
        for jump in end_jumps {
            self.code.patch_to_here(jump)?;
        }
        Ok(())
    }

    /// Layout:
    ///
    /// ```text
    ///       <iter>
    /// S:    FOR_LOOP_START var
    ///       <body>
    /// E:    FOR_LOOP_END S
    ///       JUMP X          ; normal exit skips the else body
    ///       <else body>     ; an empty iterable resumes here (E + 2)
    /// X:
    /// ```
    fn compile_for(&mut self, for_loop: &'a ForLoop) -> CompileResult<()> {
        let var = match &for_loop.target {
            ForTarget::Name(name) => name,
            ForTarget::Tuple(_) => {
                tracing::debug!(statement = "for", "multi-target loop not lowered to bytecode");
                return Ok(());
            }
        };
        self.compile_expr(&for_loop.iter)?;
        let name = self.code.add_name(var)?;
        let start = self.code.emit(Opcode::ForLoopStart, name as u32);

        self.scopes.enter();
        self.scopes.declare_named(var);
        self.loops.push(LoopInfo::default());
        let body = self.compile_body(&for_loop.body);
        let info = self.loops.pop().unwrap_or_default();
        self.scopes.exit();
        body?;

        let end = self.code.emit(Opcode::ForLoopEnd, start as u32);
        for jump in info.break_jumps.into_iter().chain(info.continue_jumps) {
            self.code.patch_jump(jump, end)?;
        }

        let skip_else = self.code.emit_jump(Opcode::Jump);
        if let Some(body) = &for_loop.otherwise {
            self.compile_body(body)?;
        }
        self.code.patch_to_here(skip_else)
    }

    fn compile_with(&mut self, bindings: &'a [(String, Expr)], body: &'a [Stmt]) -> CompileResult<()> {
        // Values see the enclosing scope, so evaluate all of them first.
        for (_, value) in bindings {
            self.compile_expr(value)?;
        }

        // Slots are shared by the whole render, so macro frames never use them.
        let use_slots = self.macro_depth == 0
            && self.scopes.free_slots() >= bindings.len()
            && !needs_named_scope(body);
        self.scopes.enter();
        if !use_slots {
            self.code.emit_simple(Opcode::PushScope);
        }
        for (name, _) in bindings.iter().rev() {
            if use_slots {
                let slot = self
                    .scopes
                    .declare_slot(name)
                    .ok_or_else(|| CompileError::internal("local slots exhausted"))?;
                self.code.emit(Opcode::StoreLocal, slot as u32);
            } else {
                self.scopes.declare_named(name);
                let idx = self.code.add_name(name)?;
                self.code.emit(Opcode::StoreVar, idx as u32);
            }
        }
        let result = self.compile_body(body);
        self.scopes.exit();
        result?;
        if !use_slots {
            self.code.emit_simple(Opcode::PopScope);
        }
        Ok(())
    }

    /// Emit a macro or caller body behind a skip jump and register it.
    ///
    /// Literal defaults go to the constant pool. Other defaults become a
    /// prologue that fills the parameter when the call left it undefined.
    fn compile_callable(
        &mut self,
        name: u32,
        params: &'a [MacroParam],
        body: &'a [Stmt],
    ) -> CompileResult<u32> {
        let skip = self.code.emit_jump(Opcode::Jump);
        let body_start = self.code.current_index();

        let saved_loops = std::mem::take(&mut self.loops);
        self.macro_depth += 1;
        self.scopes.enter();
        for param in params {
            self.scopes.declare_named(&param.name);
        }
        for name in ["varargs", "kwargs", "caller"] {
            self.scopes.declare_named(name);
        }

        let result = self
            .compile_params(params)
            .and_then(|entries| self.compile_body(body).map(|()| entries));

        self.scopes.exit();
        self.macro_depth -= 1;
        self.loops = saved_loops;
        let params = result?;

        self.code.emit_simple(Opcode::Return);
        let body_end = self.code.current_index();
        self.code.patch_to_here(skip)?;

        Ok(self.code.add_macro(CompiledMacro {
            name,
            params,
            body_start: body_start as u32,
            body_end: body_end as u32,
            catch_varargs: reads_name(body, "varargs"),
            catch_kwargs: reads_name(body, "kwargs"),
        }))
    }

    fn compile_params(&mut self, params: &'a [MacroParam]) -> CompileResult<Vec<MacroParamEntry>> {
        let mut entries = Vec::with_capacity(params.len());
        for param in params {
            let name = self.code.add_name(&param.name)? as u32;
            let default = match &param.default {
                Some(expr) if expr.is_constant() => Some(self.code.add_constant(expr)?),
                Some(expr) => {
                    self.code.emit(Opcode::LoadVar, name);
                    self.code.emit_simple(Opcode::TestDefined);
                    let filled = self.code.emit_jump(Opcode::JumpIfTrue);
                    self.compile_expr(expr)?;
                    self.code.emit(Opcode::StoreVar, name);
                    self.code.patch_to_here(filled)?;
                    None
                }
                None => None,
            };
            entries.push(MacroParamEntry { name, default });
        }
        Ok(entries)
    }

    fn compile_call_block(
        &mut self,
        call: &'a CallExpr,
        params: &'a [MacroParam],
        body: &'a [Stmt],
    ) -> CompileResult<()> {
        let Expr::Name(callee) = &*call.callee else {
            return Err(CompileError::unsupported("call block target must be a macro name"));
        };
        let caller_name = self.code.add_name("caller")? as u32;
        let caller = self.compile_callable(caller_name, params, body)?;

        let (argc, kwargc) = self.compile_args(&call.args, &call.kwargs)?;
        let name = self.code.add_name(callee)?;
        self.code.emit(Opcode::SetCaller, caller);
        self.code.emit(
            Opcode::CallMacroWithCaller,
            CallOperand::new(name, argc, kwargc).pack(),
        );
        self.code.emit_simple(Opcode::Emit);
        Ok(())
    }

    fn store(&mut self, target: &str) -> CompileResult<()> {
        if let Some(slot) = self.scopes.resolve_slot(target) {
            self.code.emit(Opcode::StoreLocal, slot as u32);
        } else {
            let idx = self.code.add_name(target)?;
            self.code.emit(Opcode::StoreVar, idx as u32);
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &'a Expr) -> CompileResult<()> {
        match expr {
            Expr::Literal(lit) => self.compile_literal(expr, lit)?,
            Expr::List(items) => {
                if !items.is_empty() && expr.is_constant() {
                    let idx = self.code.add_constant(expr)?;
                    self.code.emit(Opcode::LoadConst, idx);
                } else {
                    for item in items {
                        self.compile_expr(item)?;
                    }
                    self.code.emit(Opcode::BuildList, items.len() as u32);
                }
            }
            Expr::Dict(pairs) => {
                if !pairs.is_empty() && expr.is_constant() {
                    let idx = self.code.add_constant(expr)?;
                    self.code.emit(Opcode::LoadConst, idx);
                } else {
                    for (key, value) in pairs {
                        self.compile_expr(key)?;
                        self.compile_expr(value)?;
                    }
                    self.code.emit(Opcode::BuildMap, pairs.len() as u32);
                }
            }
            Expr::Name(name) => {
                if let Some(slot) = self.scopes.resolve_slot(name) {
                    self.code.emit(Opcode::LoadLocal, slot as u32);
                } else {
                    let idx = self.code.add_name(name)?;
                    self.code.emit(Opcode::LoadVar, idx as u32);
                }
            }
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right)?,
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Not => self.code.emit_simple(Opcode::Not),
                    UnaryOp::Neg => self.code.emit_simple(Opcode::Neg),
                    UnaryOp::Pos => self.code.emit(Opcode::UnaryOp, op.id()),
                };
            }
            Expr::Attribute { object, name } => {
                if let Some(attr) = self.loop_attribute(expr) {
                    self.code.emit(Opcode::LoopAttr, attr as u32);
                } else {
                    self.compile_expr(object)?;
                    let idx = self.code.add_name(name)?;
                    self.code.emit(Opcode::GetAttr, idx as u32);
                }
            }
            Expr::Item { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.code.emit_simple(Opcode::GetItem);
            }
            Expr::Slice {
                object,
                start,
                stop,
                step,
            } => {
                self.compile_expr(object)?;
                for bound in [start, stop, step].into_iter().flatten() {
                    self.compile_expr(bound)?;
                }
                let flags = SliceFlags {
                    start: start.is_some(),
                    stop: stop.is_some(),
                    step: step.is_some(),
                };
                self.code.emit(Opcode::Slice, flags.pack());
            }
            Expr::Call(call) => self.compile_call(call)?,
            Expr::Filter {
                value,
                name,
                args,
                kwargs,
            } => self.compile_filter(value, name, args, kwargs)?,
            Expr::Test {
                value,
                name,
                args,
                negated,
            } => {
                self.compile_expr(value)?;
                match (name.as_str(), args.is_empty()) {
                    ("defined", true) => {
                        self.code.emit_simple(Opcode::TestDefined);
                    }
                    ("none", true) => {
                        self.code.emit_simple(Opcode::TestNone);
                    }
                    _ => {
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        let argc = u8::try_from(args.len()).map_err(|_| CompileError::TooManyArguments)?;
                        let idx = self.code.add_name(name)?;
                        self.code
                            .emit(Opcode::Test, CallOperand::new(idx, argc, 0).pack());
                    }
                }
                if *negated {
                    self.code.emit_simple(Opcode::Not);
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.compile_expr(condition)?;
                let else_jump = self.code.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(then)?;
                let end_jump = self.code.emit_jump(Opcode::Jump);
                self.code.patch_to_here(else_jump)?;
                match otherwise {
                    Some(otherwise) => self.compile_expr(otherwise)?,
                    None => {
                        self.code.emit_simple(Opcode::LoadUndefined);
                    }
                }
                self.code.patch_to_here(end_jump)?;
            }
        }
        Ok(())
    }

    fn compile_literal(&mut self, expr: &'a Expr, lit: &'a Literal) -> CompileResult<()> {
        match lit {
            Literal::None => {
                self.code.emit_simple(Opcode::LoadNone);
            }
            Literal::Bool(true) => {
                self.code.emit_simple(Opcode::LoadTrue);
            }
            Literal::Bool(false) => {
                self.code.emit_simple(Opcode::LoadFalse);
            }
            Literal::Int(n) => self.code.emit_int(*n)?,
            Literal::Float(_) => {
                let idx = self.code.add_constant(expr)?;
                self.code.emit(Opcode::LoadConst, idx);
            }
            Literal::String(s) => {
                let idx = self.code.add_string(s)?;
                self.code.emit(Opcode::LoadString, idx);
            }
        }
        Ok(())
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &'a Expr, right: &'a Expr) -> CompileResult<()> {
        self.compile_expr(left)?;
        let short_circuit = match op {
            BinaryOp::And => Some(Opcode::JumpIfFalseOrPop),
            BinaryOp::Or => Some(Opcode::JumpIfTrueOrPop),
            _ => None,
        };
        if let Some(jump_op) = short_circuit {
            let jump = self.code.emit_jump(jump_op);
            self.compile_expr(right)?;
            return self.code.patch_to_here(jump);
        }

        self.compile_expr(right)?;
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Ne => Opcode::Ne,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Ge => Opcode::Ge,
            _ => {
                self.code.emit(Opcode::BinOp, op.id());
                return Ok(());
            }
        };
        self.code.emit_simple(opcode);
        Ok(())
    }

    /// `loop.<attr>` inside a loop, unless `loop` is a user binding
    fn loop_attribute(&self, expr: &Expr) -> Option<LoopAttr> {
        if self.loops.is_empty() || self.scopes.resolve("loop").is_some() {
            return None;
        }
        LoopAttr::from_name(expr.as_loop_attribute()?)
    }

    /// Push positional then keyword arguments; each keyword is its value
    /// followed by the name index as an integer.
    fn compile_args(&mut self, args: &'a [Expr], kwargs: &'a [Kwarg]) -> CompileResult<(u8, u8)> {
        let argc = u8::try_from(args.len()).map_err(|_| CompileError::TooManyArguments)?;
        let kwargc = u8::try_from(kwargs.len()).map_err(|_| CompileError::TooManyArguments)?;
        for arg in args {
            self.compile_expr(arg)?;
        }
        for kwarg in kwargs {
            self.compile_expr(&kwarg.value)?;
            let idx = self.code.add_name(&kwarg.name)?;
            self.code.emit_int(idx as i64)?;
        }
        Ok((argc, kwargc))
    }

    fn compile_call(&mut self, call: &'a CallExpr) -> CompileResult<()> {
        match &*call.callee {
            Expr::Name(name) => {
                let opcode = if name == "caller" && self.macro_depth > 0 {
                    Opcode::InvokeCaller
                } else if self.template_macros.contains(name.as_str()) {
                    Opcode::CallMacro
                } else {
                    Opcode::CallFunction
                };
                let (argc, kwargc) = self.compile_args(&call.args, &call.kwargs)?;
                let idx = if opcode == Opcode::InvokeCaller {
                    0
                } else {
                    self.code.add_name(name)?
                };
                self.code
                    .emit(opcode, CallOperand::new(idx, argc, kwargc).pack());
            }
            Expr::Attribute { object, name }
                if name == "cycle"
                    && call.kwargs.is_empty()
                    && matches!(&**object, Expr::Name(n) if n == "loop")
                    && !self.loops.is_empty()
                    && self.scopes.resolve("loop").is_none() =>
            {
                for arg in &call.args {
                    self.compile_expr(arg)?;
                }
                self.code.emit(Opcode::LoopCycle, call.args.len() as u32);
            }
            Expr::Attribute { object, name } => {
                self.compile_expr(object)?;
                let (argc, kwargc) = self.compile_args(&call.args, &call.kwargs)?;
                let idx = self.code.add_name(name)?;
                self.code
                    .emit(Opcode::CallMethod, CallOperand::new(idx, argc, kwargc).pack());
            }
            _ => return Err(CompileError::unsupported("call of a computed expression")),
        }
        Ok(())
    }

    fn compile_filter(
        &mut self,
        value: &'a Expr,
        name: &str,
        args: &'a [Expr],
        kwargs: &'a [Kwarg],
    ) -> CompileResult<()> {
        self.compile_expr(value)?;
        let specialized = Opcode::for_filter(name).filter(|op| {
            kwargs.is_empty()
                && match op {
                    Opcode::FilterDefault => {
                        args.len() <= 2 && args.iter().all(|a| matches!(a, Expr::Literal(_)))
                    }
                    _ => args.is_empty(),
                }
        });
        if let Some(opcode) = specialized {
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.code.emit(opcode, args.len() as u32);
            return Ok(());
        }
        let (argc, kwargc) = self.compile_args(args, kwargs)?;
        let idx = self.code.add_name(name)?;
        self.code
            .emit(Opcode::Filter, CallOperand::new(idx, argc, kwargc).pack());
        Ok(())
    }
}

/// True if `body` needs the `with` block to own a runtime scope: macros and
/// call blocks cannot see local slots, and assignments must stay inside the
/// block (or inside a nested loop) instead of reaching an enclosing scope
fn needs_named_scope(body: &[Stmt]) -> bool {
    let mut found = false;
    each_stmt(body, &mut |stmt| {
        if matches!(
            stmt,
            Stmt::Macro(_) | Stmt::CallBlock { .. } | Stmt::Set { .. } | Stmt::SetBlock { .. }
        ) {
            found = true;
        }
    });
    found
}

fn stmt_kind(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::SetBlock { .. } => "set block",
        Stmt::Include { .. } => "include",
        Stmt::Import { .. } => "import",
        Stmt::FromImport { .. } => "from import",
        Stmt::Extends { .. } => "extends",
        Stmt::FilterBlock { .. } => "filter block",
        _ => "statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_syntax::parse;

    fn opcodes(source: &str) -> Vec<Opcode> {
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        code.instructions().iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_text_and_output() {
        assert_eq!(
            opcodes("Hello {{ name }}!"),
            vec![
                Opcode::EmitText,
                Opcode::LoadVar,
                Opcode::Emit,
                Opcode::EmitText,
                Opcode::End
            ]
        );
    }

    #[test]
    fn test_specialized_arithmetic() {
        assert_eq!(
            opcodes("{{ 1 + 2 }}"),
            vec![
                Opcode::LoadOne,
                Opcode::LoadInt,
                Opcode::Add,
                Opcode::Emit,
                Opcode::End
            ]
        );
        assert!(opcodes("{{ a // b }}").contains(&Opcode::BinOp));
    }

    #[test]
    fn test_specialized_filters() {
        assert!(opcodes("{{ x|upper }}").contains(&Opcode::FilterUpper));
        assert!(opcodes("{{ x|default('n/a') }}").contains(&Opcode::FilterDefault));
        // non-literal default falls back to the generic opcode
        assert!(opcodes("{{ x|default(y) }}").contains(&Opcode::Filter));
        assert!(opcodes("{{ x|join(', ') }}").contains(&Opcode::Filter));
    }

    #[test]
    fn test_loop_layout_and_side_table() {
        let source = "{% for x in xs %}{{ loop.index }}{% else %}none{% endfor %}";
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        let ops: Vec<_> = code.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadVar,
                Opcode::ForLoopStart,
                Opcode::LoopAttr,
                Opcode::Emit,
                Opcode::ForLoopEnd,
                Opcode::Jump,
                Opcode::EmitText,
                Opcode::End
            ]
        );
        assert_eq!(code.loop_end(1), Some(4));
        assert_eq!(code.instructions()[4].operand, 1);
        assert_eq!(code.instructions()[5].operand, 7);
    }

    #[test]
    fn test_break_targets_matching_end() {
        let source =
            "{% for a in xs %}{% for b in ys %}{% break %}{% endfor %}{% continue %}{% endfor %}";
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        let instrs = code.instructions();
        let brk = instrs.iter().position(|i| i.opcode == Opcode::BreakLoop).unwrap();
        let cont = instrs
            .iter()
            .position(|i| i.opcode == Opcode::ContinueLoop)
            .unwrap();
        let inner_start = instrs
            .iter()
            .rposition(|i| i.opcode == Opcode::ForLoopStart)
            .unwrap();
        assert_eq!(instrs[brk].operand as usize, code.loop_end(inner_start).unwrap());
        assert_eq!(instrs[cont].operand as usize, code.loop_end(1).unwrap());
    }

    #[test]
    fn test_short_circuit() {
        assert_eq!(
            opcodes("{{ a and b }}"),
            vec![
                Opcode::LoadVar,
                Opcode::JumpIfFalseOrPop,
                Opcode::LoadVar,
                Opcode::Emit,
                Opcode::End
            ]
        );
    }

    #[test]
    fn test_macro_lowering() {
        let source = "{% macro m(a, b=5) %}{{ a }}{{ varargs }}{% endmacro %}{{ m(1) }}";
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        let def = &code.macros()[0];
        assert_eq!(code.name(def.name), Some("m"));
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params[0].default, None);
        let five = def.params[1].default.unwrap();
        assert_eq!(code.constant(five), Some(&Expr::int(5)));
        assert!(def.catch_varargs);
        assert!(!def.catch_kwargs);

        let instrs = code.instructions();
        assert_eq!(instrs[0].opcode, Opcode::Jump);
        assert_eq!(instrs[0].operand, def.body_end);
        assert_eq!(instrs[def.body_end as usize - 1].opcode, Opcode::Return);
        assert_eq!(instrs[def.body_end as usize].opcode, Opcode::DefineMacro);
        assert!(instrs.iter().any(|i| i.opcode == Opcode::CallMacro));
    }

    #[test]
    fn test_call_block_lowering() {
        let source = "{% macro w() %}[{{ caller() }}]{% endmacro %}{% call w() %}x{% endcall %}";
        let ops = opcodes(source);
        assert!(ops.contains(&Opcode::InvokeCaller));
        let set = ops.iter().position(|&o| o == Opcode::SetCaller).unwrap();
        assert_eq!(ops[set + 1], Opcode::CallMacroWithCaller);
    }

    #[test]
    fn test_with_uses_slots() {
        let ops = opcodes("{% with a = 1 %}{{ a }}{% endwith %}{{ a }}");
        assert_eq!(
            ops,
            vec![
                Opcode::LoadOne,
                Opcode::StoreLocal,
                Opcode::LoadLocal,
                Opcode::Emit,
                Opcode::LoadVar,
                Opcode::Emit,
                Opcode::End
            ]
        );
    }

    #[test]
    fn test_with_around_macro_uses_scope() {
        let ops = opcodes("{% with a = 1 %}{% macro m() %}{{ a }}{% endmacro %}{% endwith %}");
        assert!(ops.contains(&Opcode::PushScope));
        assert!(ops.contains(&Opcode::PopScope));
        assert!(!ops.contains(&Opcode::LoadLocal));
    }

    #[test]
    fn test_with_containing_set_uses_scope() {
        for source in [
            "{% with a = 1 %}{% set b = 2 %}{% endwith %}",
            "{% with a = 0 %}{% for x in [5] %}{% set a = x %}{% endfor %}{% endwith %}",
        ] {
            let ops = opcodes(source);
            assert!(ops.contains(&Opcode::PushScope), "{}", source);
            assert!(!ops.contains(&Opcode::StoreLocal), "{}", source);
        }
    }

    #[test]
    fn test_loop_var_shadows_slot() {
        let ops = opcodes("{% with x = 1 %}{% for x in xs %}{{ x }}{% endfor %}{% endwith %}");
        let start = ops.iter().position(|&o| o == Opcode::ForLoopStart).unwrap();
        assert_eq!(ops[start + 1], Opcode::LoadVar);
    }

    #[test]
    fn test_keyword_arguments_push_name_index() {
        let source = "{{ f(1, sep='-') }}";
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        let call = code
            .instructions()
            .iter()
            .find(|i| i.opcode == Opcode::CallFunction)
            .unwrap();
        let operand = CallOperand::unpack(call.operand);
        assert_eq!((operand.argc, operand.kwargc), (1, 1));
        assert_eq!(code.name(operand.name as u32), Some("f"));
    }

    #[test]
    fn test_skipped_statements_compile() {
        let ops = opcodes("{% include 'x.html' %}{% set y %}b{% endset %}ok");
        assert_eq!(ops, vec![Opcode::EmitText, Opcode::End]);
    }

    #[test]
    fn test_string_dedup() {
        let source = "a{{ x }}a{{ 'a' }}";
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        assert_eq!(code.strings().len(), 1);
    }

    #[test]
    fn test_checksum_recorded() {
        let source = "{{ x }}";
        let ast = parse(source).unwrap();
        let code = Compiler::compile(&ast, source).unwrap();
        assert_eq!(code.checksum(), fnv1a64(source.as_bytes()));
    }
}
