//! Bytecode interpreter
//!
//! A VM renders one template once. It borrows the container, the
//! environment and the context; everything it allocates (stack, frames,
//! loop states, slots, output) is owned and dropped when the render ends.

use std::fmt::Write as _;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use vibe_bytecode::{
    Bytecode, CallOperand, Instruction, LoopAttr, MAX_LOCAL_SLOTS, Opcode, SliceFlags,
};
use vibe_syntax::{BinaryOp, UnaryOp};

use crate::context::{CallerRef, Frame, LoopState, Scope};
use crate::environment::{Args, Environment};
use crate::error::{VmError, VmResult};
use crate::filters::{self, escape_into};
use crate::methods::call_method;
use crate::ops;
use crate::pending::PendingValue;
use crate::value::{Value, ValueMap};

/// Results of async calls resolved by earlier render attempts, by call key
pub type Resolved = FxHashMap<String, Value>;

/// Outcome of an async render attempt
#[derive(Debug)]
pub enum AsyncRender {
    /// Rendering finished
    Done(String),
    /// A pending value reached the output; resolve it and render again
    Pending(PendingValue),
}

/// Why the dispatch loop stopped early
enum Halt {
    Error(VmError),
    Suspend(PendingValue),
}

impl From<VmError> for Halt {
    fn from(err: VmError) -> Self {
        Self::Error(err)
    }
}

type Flow<T> = Result<T, Halt>;

/// How a run of the dispatch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Return,
    End,
}

/// Stack virtual machine for one render
pub struct Vm<'a> {
    code: &'a Bytecode<'a>,
    env: &'a Environment,
    context: &'a ValueMap,
    resolved: Option<&'a Resolved>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    slots: Vec<Value>,
    output: String,
    /// Caller body registered by `SET_CALLER` for the next call
    pending_caller: Option<u32>,
    async_mode: bool,
}

impl<'a> Vm<'a> {
    /// Create a VM over `code`
    pub fn new(code: &'a Bytecode<'a>, env: &'a Environment, context: &'a ValueMap) -> Self {
        Self {
            code,
            env,
            context,
            resolved: None,
            stack: Vec::with_capacity(16),
            frames: vec![Frame::new(Scope::default(), None, None)],
            slots: vec![Value::Undefined; MAX_LOCAL_SLOTS],
            output: String::new(),
            pending_caller: None,
            async_mode: false,
        }
    }

    /// Reuse results of async calls resolved by a previous attempt
    pub fn with_resolved(mut self, resolved: &'a Resolved) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Render synchronously
    pub fn render(mut self) -> VmResult<String> {
        tracing::trace!(instructions = self.code.len(), "render start");
        match self.run(0) {
            Ok(_) => {
                tracing::trace!(bytes = self.output.len(), "render finished");
                Ok(self.output)
            }
            Err(Halt::Error(err)) => Err(err),
            Err(Halt::Suspend(pending)) => Err(VmError::PendingInSyncRender(pending.key().to_string())),
        }
    }

    /// Render once, stopping at the first pending value that reaches output
    pub fn render_async(mut self) -> VmResult<AsyncRender> {
        self.async_mode = true;
        tracing::trace!(instructions = self.code.len(), "async render start");
        match self.run(0) {
            Ok(_) => Ok(AsyncRender::Done(self.output)),
            Err(Halt::Error(err)) => Err(err),
            Err(Halt::Suspend(pending)) => {
                tracing::debug!(key = pending.key(), "render suspended on pending value");
                Ok(AsyncRender::Pending(pending))
            }
        }
    }

    // ==================== Dispatch ====================

    fn run(&mut self, start: usize) -> Flow<Exit> {
        let code = self.code;
        let mut pc = start;
        loop {
            let Some(Instruction { opcode, operand }) = code.instruction(pc) else {
                return Ok(Exit::End);
            };
            let at = pc;
            pc += 1;

            match opcode {
                // ==================== Constants ====================
                Opcode::LoadNone => self.stack.push(Value::None),
                Opcode::LoadTrue => self.stack.push(Value::Bool(true)),
                Opcode::LoadFalse => self.stack.push(Value::Bool(false)),
                Opcode::LoadZero => self.stack.push(Value::Int(0)),
                Opcode::LoadOne => self.stack.push(Value::Int(1)),
                Opcode::LoadMinusOne => self.stack.push(Value::Int(-1)),
                Opcode::LoadUndefined => self.stack.push(Value::Undefined),
                Opcode::LoadInt => self.stack.push(Value::Int(i64::from(operand as i32))),
                Opcode::LoadString => {
                    let s = self.string(opcode, operand, at)?;
                    self.stack.push(Value::string(s));
                }
                Opcode::LoadConst => {
                    let expr = code
                        .constant(operand)
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    self.stack.push(Value::from_constant(expr)?);
                }
                Opcode::BuildList => {
                    let items = self.pop_n(operand as usize, at)?;
                    self.stack.push(Value::List(items));
                }
                Opcode::BuildMap => {
                    let flat = self.pop_n(operand as usize * 2, at)?;
                    let mut map = ValueMap::with_capacity(operand as usize);
                    let mut iter = flat.into_iter();
                    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                        map.insert(key.into_string(), value);
                    }
                    self.stack.push(Value::Map(map));
                }

                // ==================== Output ====================
                Opcode::EmitText => {
                    let s = self.string(opcode, operand, at)?;
                    self.output.push_str(s);
                }
                Opcode::Emit => {
                    let value = self.pop(at)?;
                    self.write_value(value);
                }

                // ==================== Variables ====================
                Opcode::LoadVar => {
                    let value = self.load_var(operand, opcode, at)?;
                    self.stack.push(value);
                }
                Opcode::StoreVar => {
                    let value = self.pop(at)?;
                    self.frame_mut().store(operand, value);
                }
                Opcode::LoadLocal => {
                    let value = self
                        .slots
                        .get(operand as usize)
                        .cloned()
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    self.stack.push(value);
                }
                Opcode::StoreLocal => {
                    let value = self.pop(at)?;
                    let slot = self
                        .slots
                        .get_mut(operand as usize)
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    *slot = value;
                }
                Opcode::PushScope => self.frame_mut().scopes.push(Scope::default()),
                Opcode::PopScope => {
                    let frame = self.frame_mut();
                    if frame.scopes.len() <= 1 {
                        return Err(VmError::invalid_operand(opcode, operand, at).into());
                    }
                    frame.scopes.pop();
                }

                // ==================== Operators ====================
                Opcode::BinOp => {
                    let op = BinaryOp::from_id(operand)
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    self.binary(at, |l, r| ops::binary(op, l, r))?;
                }
                Opcode::Add => self.binary(at, ops::add)?,
                Opcode::Sub => self.binary(at, ops::sub)?,
                Opcode::Mul => self.binary(at, ops::mul)?,
                Opcode::Div => self.binary(at, ops::div)?,
                Opcode::Eq => self.binary(at, |l, r| Ok(Value::Bool(l == r)))?,
                Opcode::Ne => self.binary(at, |l, r| Ok(Value::Bool(l != r)))?,
                Opcode::Lt => self.binary(at, |l, r| ops::binary(BinaryOp::Lt, l, r))?,
                Opcode::Le => self.binary(at, |l, r| ops::binary(BinaryOp::Le, l, r))?,
                Opcode::Gt => self.binary(at, |l, r| ops::binary(BinaryOp::Gt, l, r))?,
                Opcode::Ge => self.binary(at, |l, r| ops::binary(BinaryOp::Ge, l, r))?,
                Opcode::UnaryOp => {
                    let op = UnaryOp::from_id(operand)
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    let value = self.pop(at)?;
                    self.stack.push(ops::unary(op, value)?);
                }
                Opcode::Not => {
                    let value = self.pop(at)?;
                    self.stack.push(Value::Bool(!value.is_truthy()));
                }
                Opcode::Neg => {
                    let value = self.pop(at)?;
                    self.stack.push(ops::unary(UnaryOp::Neg, value)?);
                }

                // ==================== Access ====================
                Opcode::GetAttr => {
                    let name = self.name(opcode, operand, at)?;
                    let object = self.pop(at)?;
                    self.stack.push(filters::get_attr(&object, name));
                }
                Opcode::GetItem => {
                    let key = self.pop(at)?;
                    let object = self.pop(at)?;
                    self.stack.push(ops::get_item(&object, &key)?);
                }
                Opcode::Slice => {
                    let flags = SliceFlags::unpack(operand);
                    let step = if flags.step { Some(self.pop(at)?) } else { None };
                    let stop = if flags.stop { Some(self.pop(at)?) } else { None };
                    let start = if flags.start { Some(self.pop(at)?) } else { None };
                    let object = self.pop(at)?;
                    self.stack.push(ops::slice(object, start, stop, step)?);
                }
                Opcode::LoopAttr => {
                    let attr = LoopAttr::from_operand(operand)
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    let value = self.current_loop(at)?.attr(attr);
                    self.stack.push(value);
                }
                Opcode::LoopCycle => {
                    let choices = self.pop_n(operand as usize, at)?;
                    if choices.is_empty() {
                        return Err(VmError::callback("loop.cycle() requires at least one value").into());
                    }
                    let index = self.current_loop(at)?.index;
                    let value = choices.into_iter().nth(index % operand as usize).unwrap_or_default();
                    self.stack.push(value);
                }

                // ==================== Calls ====================
                Opcode::CallFunction => {
                    let call = CallOperand::unpack(operand);
                    let args = self.pop_args(call, at)?;
                    let value = self.call_function(call.name as u32, args, opcode, at)?;
                    self.stack.push(value);
                }
                Opcode::CallMethod => {
                    let call = CallOperand::unpack(operand);
                    let method = self.name(opcode, call.name as u32, at)?;
                    let args = self.pop_args(call, at)?;
                    let receiver = self.pop(at)?;
                    self.stack.push(call_method(receiver, method, &args)?);
                }
                Opcode::CallMacro | Opcode::CallMacroWithCaller => {
                    let call = CallOperand::unpack(operand);
                    let args = self.pop_args(call, at)?;
                    let caller = if opcode == Opcode::CallMacroWithCaller {
                        let body = self.pending_caller.take().ok_or(VmError::NoCaller)?;
                        Some(CallerRef {
                            body,
                            frame: self.frames.len() - 1,
                        })
                    } else {
                        None
                    };
                    let value = self.call_macro(call.name as u32, args, caller, opcode, at)?;
                    self.stack.push(value);
                }
                Opcode::SetCaller => {
                    if code.macro_def(operand).is_none() {
                        return Err(VmError::invalid_operand(opcode, operand, at).into());
                    }
                    self.pending_caller = Some(operand);
                }
                Opcode::InvokeCaller => {
                    let call = CallOperand::unpack(operand);
                    let args = self.pop_args(call, at)?;
                    let caller = self.active_caller().ok_or(VmError::NoCaller)?;
                    let value = self.invoke_macro(caller.body, args, None, Some(caller.frame))?;
                    self.stack.push(value);
                }
                Opcode::DefineMacro => {
                    let def = code
                        .macro_def(operand)
                        .ok_or_else(|| VmError::invalid_operand(opcode, operand, at))?;
                    self.frame_mut().store(def.name, Value::Macro(operand));
                }
                Opcode::Return => return Ok(Exit::Return),

                // ==================== Filters and tests ====================
                Opcode::Filter => {
                    let call = CallOperand::unpack(operand);
                    let name = self.name(opcode, call.name as u32, at)?;
                    let args = self.pop_args(call, at)?;
                    let value = self.pop(at)?;
                    let result = self.apply_filter(name, value, args)?;
                    self.stack.push(result);
                }
                Opcode::FilterUpper => self.unary_filter(at, filters::upper)?,
                Opcode::FilterLower => self.unary_filter(at, filters::lower)?,
                Opcode::FilterEscape => self.unary_filter(at, filters::escape)?,
                Opcode::FilterTrim => self.unary_filter(at, filters::trim)?,
                Opcode::FilterFirst => self.unary_filter(at, filters::first)?,
                Opcode::FilterLast => self.unary_filter(at, filters::last)?,
                Opcode::FilterLength => self.unary_filter(at, filters::length)?,
                Opcode::FilterString => self.unary_filter(at, filters::string)?,
                Opcode::FilterInt => self.unary_filter(at, filters::int)?,
                Opcode::FilterDefault => {
                    let args = Args::positional(self.pop_n(operand as usize, at)?);
                    let value = self.pop(at)?;
                    self.stack.push(filters::default(value, &args)?);
                }
                Opcode::Test => {
                    let call = CallOperand::unpack(operand);
                    let name = self.name(opcode, call.name as u32, at)?;
                    let args = self.pop_args(call, at)?;
                    let value = self.pop(at)?;
                    let result = self.apply_test(name, value, args)?;
                    self.stack.push(result);
                }
                Opcode::TestDefined => {
                    let value = self.pop(at)?;
                    self.stack.push(Value::Bool(!value.is_undefined()));
                }
                Opcode::TestNone => {
                    let value = self.pop(at)?;
                    self.stack.push(Value::Bool(value.is_none()));
                }

                // ==================== Control flow ====================
                Opcode::Jump => pc = operand as usize,
                Opcode::JumpIfFalse => {
                    if !self.pop(at)?.is_truthy() {
                        pc = operand as usize;
                    }
                }
                Opcode::JumpIfTrue => {
                    if self.pop(at)?.is_truthy() {
                        pc = operand as usize;
                    }
                }
                Opcode::JumpIfFalseOrPop => {
                    if self.peek(at)?.is_truthy() {
                        self.stack.pop();
                    } else {
                        pc = operand as usize;
                    }
                }
                Opcode::JumpIfTrueOrPop => {
                    if self.peek(at)?.is_truthy() {
                        pc = operand as usize;
                    } else {
                        self.stack.pop();
                    }
                }
                Opcode::ForLoopStart => pc = self.loop_start(operand, at)?,
                Opcode::ForLoopEnd => pc = self.loop_end(operand as usize, at)?.unwrap_or(pc),
                Opcode::BreakLoop => {
                    self.exit_loop(at)?;
                    pc = operand as usize + 1;
                }
                Opcode::ContinueLoop => pc = operand as usize,
                Opcode::Pop => {
                    self.pop(at)?;
                }
                Opcode::End => return Ok(Exit::End),
            }
        }
    }

    // ==================== Stack ====================

    /// Pop one value; consuming a pending value suspends the render
    fn pop(&mut self, pc: usize) -> Flow<Value> {
        match self.stack.pop() {
            Some(Value::Pending(pending)) => Err(Halt::Suspend(pending)),
            Some(value) => Ok(value),
            None => Err(VmError::StackUnderflow { pc }.into()),
        }
    }

    fn peek(&self, pc: usize) -> Flow<&Value> {
        match self.stack.last() {
            Some(Value::Pending(pending)) => Err(Halt::Suspend(pending.clone())),
            Some(value) => Ok(value),
            None => Err(VmError::StackUnderflow { pc }.into()),
        }
    }

    /// Pop `n` values, returned in push order
    fn pop_n(&mut self, n: usize, pc: usize) -> Flow<Vec<Value>> {
        let Some(at) = self.stack.len().checked_sub(n) else {
            return Err(VmError::StackUnderflow { pc }.into());
        };
        let values = self.stack.split_off(at);
        if let Some(Value::Pending(pending)) = values.iter().find(|v| matches!(v, Value::Pending(_))) {
            return Err(Halt::Suspend(pending.clone()));
        }
        Ok(values)
    }

    /// Pop call arguments: positionals, then (value, name index) keyword pairs
    fn pop_args(&mut self, call: CallOperand, pc: usize) -> Flow<Args> {
        let pairs = self.pop_n(call.kwargc as usize * 2, pc)?;
        let mut kwargs = IndexMap::with_capacity(call.kwargc as usize);
        let mut iter = pairs.into_iter();
        while let (Some(value), Some(name)) = (iter.next(), iter.next()) {
            let idx = name
                .as_i64()
                .and_then(|n| u32::try_from(n).ok())
                .and_then(|n| self.code.name(n))
                .ok_or_else(|| {
                    VmError::type_error(format!("invalid keyword argument name at instruction {}", pc))
                })?;
            kwargs.insert(idx.to_string(), value);
        }
        let args = self.pop_n(call.argc as usize, pc)?;
        Ok(Args { args, kwargs })
    }

    fn binary(&mut self, pc: usize, op: impl FnOnce(Value, Value) -> VmResult<Value>) -> Flow<()> {
        let right = self.pop(pc)?;
        let left = self.pop(pc)?;
        self.stack.push(op(left, right)?);
        Ok(())
    }

    fn unary_filter(&mut self, pc: usize, filter: fn(Value, &Args) -> VmResult<Value>) -> Flow<()> {
        let value = self.pop(pc)?;
        self.stack.push(filter(value, &Args::default())?);
        Ok(())
    }

    // ==================== Pools ====================

    fn string(&self, opcode: Opcode, operand: u32, pc: usize) -> VmResult<&'a str> {
        self.code
            .string(operand)
            .ok_or_else(|| VmError::invalid_operand(opcode, operand, pc))
    }

    fn name(&self, opcode: Opcode, operand: u32, pc: usize) -> VmResult<&'a str> {
        self.code
            .name(operand)
            .ok_or_else(|| VmError::invalid_operand(opcode, operand, pc))
    }

    // ==================== Variables ====================

    fn frame(&self) -> &Frame {
        // The root frame lives for the whole render.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Resolve a name: current frame and its call-site parents, template
    /// scope, render context, environment globals
    fn lookup(&self, name: u32) -> Option<Value> {
        let mut frame = Some(self.frames.len() - 1);
        while let Some(idx) = frame {
            if let Some(value) = self.frames[idx].lookup(name) {
                return Some(value.clone());
            }
            frame = self.frames[idx].parent;
        }
        if let Some(value) = self.frames[0].scopes.first().and_then(|s| s.get(&name)) {
            return Some(value.clone());
        }
        let text = self.code.name(name)?;
        self.context
            .get(text)
            .or_else(|| self.env.global(text))
            .cloned()
    }

    fn load_var(&self, name: u32, opcode: Opcode, pc: usize) -> VmResult<Value> {
        if let Some(value) = self.lookup(name) {
            return Ok(value);
        }
        if self.name(opcode, name, pc)? == "loop"
            && let Some(state) = self.visible_loop()
        {
            return Ok(state.to_value());
        }
        Ok(Value::Undefined)
    }

    /// Innermost loop of the current frame or of a caller body's call site
    fn visible_loop(&self) -> Option<&LoopState> {
        let mut frame = Some(self.frames.len() - 1);
        while let Some(idx) = frame {
            if let Some(state) = self.frames[idx].loops.last() {
                return Some(state);
            }
            frame = self.frames[idx].parent;
        }
        None
    }

    fn current_loop(&self, pc: usize) -> VmResult<&LoopState> {
        self.frame().loops.last().ok_or(VmError::NoActiveLoop(pc))
    }

    fn write_value(&mut self, value: Value) {
        match value {
            Value::Undefined => {}
            Value::Safe(s) => self.output.push_str(&s),
            Value::String(s) if self.env.autoescape() => escape_into(&mut self.output, &s),
            Value::String(s) => self.output.push_str(&s),
            other if self.env.autoescape() => escape_into(&mut self.output, &other.to_string()),
            other => {
                let _ = write!(self.output, "{}", other);
            }
        }
    }

    // ==================== Loops ====================

    /// Begin a loop at `FOR_LOOP_START`; returns the next pc
    fn loop_start(&mut self, var: u32, pc: usize) -> Flow<usize> {
        let iterable = self.pop(pc)?;
        let items = iterable.iter_items()?;
        if items.is_empty() {
            let end = self.code.loop_end(pc).ok_or(VmError::NoActiveLoop(pc))?;
            let mut next = end + 1;
            if self
                .code
                .instruction(next)
                .is_some_and(|i| i.opcode == Opcode::Jump)
            {
                next += 1;
            }
            return Ok(next);
        }

        let frame = self.frame_mut();
        let scope_depth = frame.scopes.len();
        let state = LoopState {
            start: pc,
            var,
            items,
            index: 0,
            scope_depth,
        };
        frame.scopes.push(Scope::from_iter([(var, state.current())]));
        frame.loops.push(state);
        Ok(pc + 1)
    }

    /// Advance at `FOR_LOOP_END`; returns the loop body pc, or `None` when
    /// the loop finished
    fn loop_end(&mut self, start: usize, pc: usize) -> Flow<Option<usize>> {
        let frame = self.frame_mut();
        let Some(state) = frame.loops.last_mut().filter(|s| s.start == start) else {
            return Err(VmError::NoActiveLoop(pc).into());
        };
        state.index += 1;
        let depth = state.scope_depth;
        if state.index < state.items.len() {
            let binding = (state.var, state.current());
            frame.scopes.truncate(depth);
            frame.scopes.push(Scope::from_iter([binding]));
            Ok(Some(start + 1))
        } else {
            frame.loops.pop();
            frame.scopes.truncate(depth);
            Ok(None)
        }
    }

    fn exit_loop(&mut self, pc: usize) -> Flow<()> {
        let frame = self.frame_mut();
        let state = frame.loops.pop().ok_or(VmError::NoActiveLoop(pc))?;
        frame.scopes.truncate(state.scope_depth);
        Ok(())
    }

    // ==================== Macros ====================

    fn call_function(&mut self, name: u32, args: Args, opcode: Opcode, pc: usize) -> Flow<Value> {
        if let Some(Value::Macro(idx)) = self.lookup(name) {
            return self.invoke_macro(idx, args, None, None);
        }
        let text = self.name(opcode, name, pc)?;
        match self.env.function(text) {
            Some(f) => Ok(f(&args)?),
            None => Err(VmError::UnknownFunction(text.to_string()).into()),
        }
    }

    fn call_macro(
        &mut self,
        name: u32,
        args: Args,
        caller: Option<CallerRef>,
        opcode: Opcode,
        pc: usize,
    ) -> Flow<Value> {
        match self.lookup(name) {
            Some(Value::Macro(idx)) => self.invoke_macro(idx, args, caller, None),
            _ if caller.is_none() => self.call_function(name, args, opcode, pc),
            _ => Err(VmError::UnknownMacro(self.name(opcode, name, pc)?.to_string()).into()),
        }
    }

    /// `caller` of the nearest macro invocation visible from the current frame
    fn active_caller(&self) -> Option<CallerRef> {
        let mut frame = Some(self.frames.len() - 1);
        while let Some(idx) = frame {
            if let Some(caller) = self.frames[idx].caller {
                return Some(caller);
            }
            frame = self.frames[idx].parent;
        }
        None
    }

    /// Run a macro or caller body in a fresh frame and return its output as
    /// a safe string.
    ///
    /// Parameters bind keyword first, then positional, then the compiled
    /// default; anything else is undefined. Extra arguments land in
    /// `varargs` and `kwargs`.
    fn invoke_macro(
        &mut self,
        idx: u32,
        args: Args,
        caller: Option<CallerRef>,
        parent: Option<usize>,
    ) -> Flow<Value> {
        let code = self.code;
        let limit = self.env.max_recursion();
        if self.frames.len() > limit {
            return Err(VmError::RecursionLimit(limit).into());
        }
        let def = code
            .macro_def(idx)
            .ok_or_else(|| VmError::invalid_operand(Opcode::CallMacro, idx, 0))?;

        let Args {
            args: mut positional,
            mut kwargs,
        } = args;
        let extra = positional.split_off(positional.len().min(def.params.len()));
        let mut positional = positional.into_iter();

        let mut scope = Scope::default();
        for param in &def.params {
            let passed = positional.next();
            let name = code.name(param.name).unwrap_or_default();
            let value = match (kwargs.shift_remove(name), passed, param.default) {
                (Some(value), _, _) | (None, Some(value), _) => value,
                (None, None, Some(constant)) => {
                    let expr = code.constant(constant).ok_or_else(|| {
                        VmError::invalid_operand(Opcode::CallMacro, constant, def.body_start as usize)
                    })?;
                    Value::from_constant(expr)?
                }
                (None, None, None) => Value::Undefined,
            };
            scope.insert(param.name, value);
        }
        if let Some(varargs) = code.names().find("varargs") {
            scope.insert(varargs, Value::List(extra));
        }
        if let Some(name) = code.names().find("kwargs") {
            scope.insert(name, Value::Map(kwargs));
        }

        self.frames.push(Frame::new(scope, parent, caller));
        let saved = std::mem::take(&mut self.output);
        let result = self.run(def.body_start as usize);
        let body = std::mem::replace(&mut self.output, saved);
        self.frames.pop();
        result?;
        Ok(Value::Safe(body))
    }

    // ==================== Filters and tests ====================

    fn apply_filter(&mut self, name: &str, value: Value, args: Args) -> Flow<Value> {
        let filter = self
            .env
            .filter(name)
            .ok_or_else(|| VmError::UnknownFilter(name.to_string()))?;
        if let Some(f) = &filter.sync_fn {
            return Ok(f(value, &args)?);
        }
        let Some(f) = &filter.async_fn else {
            return Err(VmError::UnknownFilter(name.to_string()).into());
        };
        let key = format!("filter:{}\0{:?}\0{:?}", name, value, args);
        if let Some(value) = self.resolved.and_then(|r| r.get(&key)) {
            return Ok(value.clone());
        }
        self.poll_once(key, f(value, args))
    }

    fn apply_test(&mut self, name: &str, value: Value, args: Args) -> Flow<Value> {
        let test = self
            .env
            .test(name)
            .ok_or_else(|| VmError::UnknownTest(name.to_string()))?;
        if let Some(f) = &test.sync_fn {
            return Ok(Value::Bool(f(&value, &args)?));
        }
        let Some(f) = &test.async_fn else {
            return Err(VmError::UnknownTest(name.to_string()).into());
        };
        let key = format!("test:{}\0{:?}\0{:?}", name, value, args);
        if let Some(value) = self.resolved.and_then(|r| r.get(&key)) {
            return Ok(value.clone());
        }
        let future = f(value, args).map(|r| r.map(Value::Bool)).boxed();
        self.poll_once(key, future)
    }

    /// Poll an async result once with a no-op waker
    fn poll_once(&self, key: String, mut future: BoxFuture<'static, VmResult<Value>>) -> Flow<Value> {
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => Ok(result?),
            Poll::Pending if self.async_mode => Ok(Value::Pending(PendingValue::new(key, future))),
            Poll::Pending => Err(VmError::PendingInSyncRender(key).into()),
        }
    }
}

/// Render `code`, awaiting pending values and re-rendering until the output
/// contains none
pub async fn render_resolving(
    code: &Bytecode<'_>,
    env: &Environment,
    context: &ValueMap,
) -> VmResult<String> {
    let mut resolved = Resolved::default();
    loop {
        let attempt = Vm::new(code, env, context)
            .with_resolved(&resolved)
            .render_async()?;
        match attempt {
            AsyncRender::Done(output) => return Ok(output),
            AsyncRender::Pending(pending) => {
                let key = pending.key().to_string();
                if resolved.contains_key(&key) {
                    return Err(VmError::callback(format!(
                        "async result for '{}' was not reused",
                        key
                    )));
                }
                let value = pending.await?;
                resolved.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_bytecode::{ConstantPool, InternPool};

    fn bytecode(instructions: Vec<Instruction>, strings: &[&str]) -> Bytecode<'static> {
        let strings: InternPool = strings.iter().map(|s| s.to_string()).collect();
        Bytecode::new(
            instructions,
            ConstantPool::new(),
            strings,
            InternPool::new(),
            Vec::new(),
            0,
        )
        .unwrap()
    }

    fn run(code: &Bytecode<'_>) -> VmResult<String> {
        let env = Environment::new();
        let context = ValueMap::new();
        Vm::new(code, &env, &context).render()
    }

    #[test]
    fn test_emit_text() {
        let code = bytecode(
            vec![
                Instruction::new(Opcode::EmitText, 0),
                Instruction::simple(Opcode::End),
            ],
            &["hi"],
        );
        assert_eq!(run(&code).unwrap(), "hi");
    }

    #[test]
    fn test_stack_underflow_is_error() {
        let code = bytecode(vec![Instruction::simple(Opcode::Add)], &[]);
        assert_eq!(run(&code), Err(VmError::StackUnderflow { pc: 0 }));
    }

    #[test]
    fn test_runs_off_end() {
        let code = bytecode(
            vec![
                Instruction::simple(Opcode::LoadOne),
                Instruction::simple(Opcode::Emit),
            ],
            &[],
        );
        assert_eq!(run(&code).unwrap(), "1");
    }

    #[test]
    fn test_invalid_string_operand() {
        let code = bytecode(vec![Instruction::new(Opcode::EmitText, 3)], &[]);
        assert!(matches!(run(&code), Err(VmError::InvalidOperand { pc: 0, .. })));
    }

    #[test]
    fn test_loop_instruction_outside_loop() {
        let code = bytecode(vec![Instruction::new(Opcode::LoopAttr, 0)], &[]);
        assert_eq!(run(&code), Err(VmError::NoActiveLoop(0)));
    }
}
