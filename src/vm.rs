// File: src/vm.rs
//
// Stack-based bytecode interpreter: call frames, the operand stack, the
// arithmetic/comparison dispatch, and the call boundary that hands
// individual basic blocks to the JIT when it is enabled. Recursive Rust
// calls back the interpreter's own call stack one frame per language-level
// call, so every active frame's locals and operand stack are simply alive
// on the host stack for the duration of that call — the roots registry
// below is how the collector is told where to look.

use colored::Colorize;
use std::rc::Rc;

use crate::bytecode::{decode_at, ElementKind, FunctionInfo, Module, OpCode, Value};
use crate::errors::RuntimeFault;
use crate::heap::{Heap, RootView};
use crate::jit;

/// Tuning knobs the caller controls at construction time.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub jit_enabled: bool,
    pub initial_heap_threshold: u32,
    pub trace: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self { jit_enabled: true, initial_heap_threshold: 8, trace: false }
    }
}

/// One active call's locals and operand stack. Exactly what the collector
/// scans as roots for the duration this frame is alive.
pub struct Frame {
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn new(local_count: u16, args: Vec<Value>) -> Self {
        let mut locals = vec![Value::Null; local_count as usize];
        for (slot, value) in locals.iter_mut().zip(args) {
            *slot = value;
        }
        Self { locals, stack: Vec::new() }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeFault> {
        self.stack.pop().ok_or_else(RuntimeFault::stack_underflow)
    }

    /// Reads the top of the stack without removing it — `JumpIfFalse`'s
    /// condition stays on the stack for the short-circuit `and`/`or`
    /// encodings, which rely on the untaken branch's operand surviving.
    fn peek(&self) -> Result<&Value, RuntimeFault> {
        self.stack.last().ok_or_else(RuntimeFault::stack_underflow)
    }

    fn local(&self, slot: usize) -> Result<Value, RuntimeFault> {
        self.locals.get(slot).cloned().ok_or_else(|| RuntimeFault::local_slot_out_of_range(slot))
    }

    fn set_local(&mut self, slot: usize, value: Value) -> Result<(), RuntimeFault> {
        let target = self
            .locals
            .get_mut(slot)
            .ok_or_else(|| RuntimeFault::local_slot_out_of_range(slot))?;
        *target = value;
        Ok(())
    }

    /// Grants the JIT direct access to the raw locals/operand-stack storage
    /// it copies into and out of its machine-word scratch buffers. Nothing
    /// outside the crate sees this — every other caller goes through
    /// `push`/`pop`/`local`/`set_local`.
    pub(crate) fn raw_parts(&mut self) -> (&mut Vec<Value>, &mut Vec<Value>) {
        (&mut self.locals, &mut self.stack)
    }
}

/// Builds the root-view list the collector scans from every frame
/// currently on the call stack. `roots` holds one raw pointer per active
/// frame, pushed in `Vm::invoke` and popped again once that call returns
/// — never across a `?`-propagated fault, since the push/pop pair always
/// executes around a plain (non-`?`) call to `run`.
fn build_root_views(roots: &[*const Frame]) -> Vec<RootView<'_>> {
    roots
        .iter()
        .map(|&ptr| {
            // SAFETY: every pointer in `roots` was pushed by a `Vm::invoke`
            // frame that is still executing further down the same call
            // stack, so the `Frame` it points at is alive and not aliased
            // mutably anywhere else at the moment the collector runs.
            let frame = unsafe { &*ptr };
            RootView { locals: &frame.locals, stack: &frame.stack }
        })
        .collect()
}

/// The execution core: a compiled module, the GC heap, and the options
/// that govern JIT use and diagnostics. Single-threaded — there is no
/// concurrency model beyond the recursive call stack.
pub struct Vm {
    module: Rc<Module>,
    heap: Heap,
    options: VmOptions,
    jit: jit::JitCache,
}

impl Vm {
    pub fn new(module: Module, options: VmOptions) -> Self {
        let mut heap = Heap::new();
        heap.set_threshold(options.initial_heap_threshold);
        Self { module: Rc::new(module), heap, options, jit: jit::JitCache::new() }
    }

    pub fn heap_object_count(&self) -> usize {
        self.heap.num_objects()
    }

    /// Calls `name` with `args`, running it to completion (or to the first
    /// fault) with a fresh roots registry.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeFault> {
        let mut roots: Vec<*const Frame> = Vec::new();
        self.invoke(name, args, &mut roots)
    }

    /// Looks up `name`, checks arity, and runs its chunk. The frame's
    /// pointer is pushed onto `roots` before `run` starts and popped
    /// immediately after — `run`'s result is captured into a local instead
    /// of being returned via `?`, so this pairing holds even on a fault.
    fn invoke(
        &mut self,
        name: &str,
        args: Vec<Value>,
        roots: &mut Vec<*const Frame>,
    ) -> Result<Value, RuntimeFault> {
        let module = Rc::clone(&self.module);
        let info = module.functions.get(name).ok_or_else(|| RuntimeFault::unknown_function(name))?;
        if args.len() != info.param_count {
            return Err(RuntimeFault::arity_mismatch(name, info.param_count, args.len()));
        }

        if self.options.trace {
            eprintln!("{} {}({})", "call".cyan().bold(), name, args.len());
        }

        let mut frame = Frame::new(info.local_count, args);
        roots.push(&frame as *const Frame);
        let result = self.run(info, &mut frame, roots);
        roots.pop();

        if self.options.trace {
            match &result {
                Ok(v) => eprintln!("{} {} -> {}", "return".cyan().bold(), name, v),
                Err(e) => eprintln!("{} {} -> {}", "fault".red().bold(), name, e),
            }
        }

        result
    }

    /// The dispatch loop for one function's chunk. Returns the value
    /// popped by the `Return` instruction that ends execution.
    fn run(
        &mut self,
        info: &FunctionInfo,
        frame: &mut Frame,
        roots: &mut Vec<*const Frame>,
    ) -> Result<Value, RuntimeFault> {
        let code = &info.chunk.code;
        let mut ip: usize = 0;

        loop {
            if self.options.jit_enabled {
                match self.jit.try_execute_block(code, &info.chunk.constants, ip, frame) {
                    Ok(Some(outcome)) => {
                        if let Some(value) = outcome.returned {
                            return Ok(value);
                        }
                        ip = outcome.next_ip;
                        continue;
                    }
                    Ok(None) => {}
                    Err(fault) => {
                        if self.options.trace {
                            eprintln!("{} {}", "jit fallback".yellow(), fault);
                        }
                    }
                }
            }

            let instr = decode_at(code, ip)
                .ok_or_else(|| RuntimeFault::jump_target_out_of_range(ip))?;

            if self.options.trace {
                eprintln!("  {:>5} {:?}({})", ip, instr.op, instr.operand);
            }

            match instr.op {
                OpCode::Const => {
                    let value = info
                        .chunk
                        .constants
                        .get(instr.operand as usize)
                        .cloned()
                        .ok_or_else(|| RuntimeFault::constant_index_out_of_range(instr.operand as usize))?;
                    frame.push(value);
                }
                OpCode::LoadLocal => frame.push(frame.local(instr.operand as usize)?),
                OpCode::StoreLocal => {
                    let value = frame.pop()?;
                    frame.set_local(instr.operand as usize, value)?;
                }
                OpCode::Pop => {
                    frame.pop()?;
                }
                OpCode::Add => binary_arith(frame, |a, b| a.wrapping_add(b), |a, b| a + b)?,
                OpCode::Sub => binary_arith(frame, |a, b| a.wrapping_sub(b), |a, b| a - b)?,
                OpCode::Mul => binary_arith(frame, |a, b| a.wrapping_mul(b), |a, b| a * b)?,
                OpCode::Div => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    frame.push(int_or_float_checked(
                        lhs,
                        rhs,
                        |a, b| {
                            if b == 0 {
                                Err(RuntimeFault::division_by_zero())
                            } else {
                                Ok(a.wrapping_div(b))
                            }
                        },
                        |a, b| Ok(a / b),
                    )?)
                }
                OpCode::Mod => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    frame.push(int_or_float_checked(
                        lhs,
                        rhs,
                        |a, b| {
                            if b == 0 {
                                Err(RuntimeFault::modulo_by_zero())
                            } else {
                                Ok(a.wrapping_rem(b))
                            }
                        },
                        |a, b| Ok(a % b),
                    )?)
                }
                OpCode::Pow => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    frame.push(match (lhs, rhs) {
                        (Value::Int(a), Value::Int(b)) => {
                            Value::Int(if b < 0 { 0 } else { a.wrapping_pow(b as u32) })
                        }
                        (Value::Float(a), Value::Float(b)) => Value::Float(a.powf(b)),
                        (a, b) => {
                            return Err(RuntimeFault::type_mismatch(a.type_name(), b.type_name()))
                        }
                    });
                }
                OpCode::Neg => {
                    let v = frame.pop()?;
                    frame.push(match v {
                        Value::Int(a) => Value::Int(a.wrapping_neg()),
                        Value::Float(a) => Value::Float(-a),
                        other => return Err(RuntimeFault::type_mismatch("int or float", other.type_name())),
                    });
                }
                OpCode::Not => {
                    let v = frame.pop()?;
                    match v {
                        Value::Bool(b) => frame.push(Value::Bool(!b)),
                        other => return Err(RuntimeFault::type_mismatch("bool", other.type_name())),
                    }
                }
                OpCode::Eq => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    frame.push(Value::Bool(lhs == rhs));
                }
                OpCode::Ne => {
                    let rhs = frame.pop()?;
                    let lhs = frame.pop()?;
                    frame.push(Value::Bool(lhs != rhs));
                }
                OpCode::Lt => compare(frame, |a, b| a < b, |a, b| a < b)?,
                OpCode::Le => compare(frame, |a, b| a <= b, |a, b| a <= b)?,
                OpCode::Gt => compare(frame, |a, b| a > b, |a, b| a > b)?,
                OpCode::Ge => compare(frame, |a, b| a >= b, |a, b| a >= b)?,
                OpCode::Jump => {
                    ip = instr.operand as usize;
                    continue;
                }
                OpCode::JumpIfFalse => {
                    let cond = frame.peek()?;
                    let taken = match cond {
                        Value::Bool(b) => !*b,
                        _ => return Err(RuntimeFault::non_bool_condition()),
                    };
                    if taken {
                        ip = instr.operand as usize;
                        continue;
                    }
                }
                OpCode::Call => {
                    let name = match info.chunk.constants.get(instr.operand as usize) {
                        Some(Value::Str(s)) => s.clone(),
                        Some(_) => return Err(RuntimeFault::call_target_not_string()),
                        None => return Err(RuntimeFault::constant_index_out_of_range(instr.operand as usize)),
                    };
                    let param_count = module_param_count(&self.module, &name)?;
                    let mut args = Vec::with_capacity(param_count);
                    for _ in 0..param_count {
                        args.push(frame.pop()?);
                    }
                    args.reverse();
                    let returned = self.invoke(&name, args, roots)?;
                    frame.push(returned);
                }
                OpCode::Return => {
                    return Ok(frame.stack.pop().unwrap_or(Value::Null));
                }
                OpCode::ArrayNew => {
                    let length = frame.pop()?;
                    let kind = frame.pop()?;
                    let len = match length {
                        Value::Int(n) if n >= 0 => n as usize,
                        Value::Int(_) => return Err(RuntimeFault::array_index_out_of_bounds(-1, 0)),
                        other => return Err(RuntimeFault::type_mismatch("int", other.type_name())),
                    };
                    let kind = match kind {
                        Value::Int(tag) => ElementKind::from_tag(tag)
                            .ok_or_else(|| RuntimeFault::type_mismatch("element kind tag", "int"))?,
                        other => return Err(RuntimeFault::type_mismatch("int", other.type_name())),
                    };
                    let views = build_root_views(roots.as_slice());
                    let handle = self.heap.allocate_array(len, kind.zero_value(), &views);
                    frame.push(Value::Object(handle));
                }
                OpCode::ArrayGet => {
                    let index = frame.pop()?;
                    let array = frame.pop()?;
                    let (handle, idx) = array_index(array, index)?;
                    let len = self.heap.len(handle).ok_or_else(RuntimeFault::not_an_array)?;
                    if idx >= len {
                        return Err(RuntimeFault::array_index_out_of_bounds(idx as i64, len));
                    }
                    let value = self.heap.get(handle, idx).expect("index checked above");
                    frame.push(value);
                }
                OpCode::ArraySet => {
                    let value = frame.pop()?;
                    let index = frame.pop()?;
                    let array = frame.pop()?;
                    let (handle, idx) = array_index(array, index)?;
                    let len = self.heap.len(handle).ok_or_else(RuntimeFault::not_an_array)?;
                    if idx >= len {
                        return Err(RuntimeFault::array_index_out_of_bounds(idx as i64, len));
                    }
                    self.heap.set(handle, idx, value).expect("index checked above");
                }
                OpCode::ArraySwapJit => {
                    let index = frame.pop()?;
                    let array = frame.pop()?;
                    let (handle, idx) = array_index(array, index)?;
                    let len = self.heap.len(handle).ok_or_else(RuntimeFault::not_an_array)?;
                    if idx + 1 >= len {
                        return Err(RuntimeFault::array_index_out_of_bounds(idx as i64, len));
                    }
                    self.heap.swap_adjacent(handle, idx).expect("index checked above");
                }
            }

            ip += instr.size;
        }
    }
}

fn module_param_count(module: &Module, name: &str) -> Result<usize, RuntimeFault> {
    module
        .functions
        .get(name)
        .map(|f| f.param_count)
        .ok_or_else(|| RuntimeFault::unknown_function(name))
}

fn array_index(array: Value, index: Value) -> Result<(crate::heap::ObjRef, usize), RuntimeFault> {
    let handle = match array {
        Value::Object(h) => h,
        other => return Err(RuntimeFault::type_mismatch("array", other.type_name())),
    };
    let idx = match index {
        Value::Int(i) if i >= 0 => i as usize,
        Value::Int(i) => return Err(RuntimeFault::array_index_out_of_bounds(i, 0)),
        other => return Err(RuntimeFault::type_mismatch("int", other.type_name())),
    };
    Ok((handle, idx))
}

/// Shared shape for `Add`/`Sub`/`Mul`: same-kind `Int`/`Int` or
/// `Float`/`Float` only, everything else is a type error. Integer overflow
/// wraps rather than trapping or promoting.
fn binary_arith(
    frame: &mut Frame,
    int_op: impl FnOnce(i64, i64) -> i64,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> Result<(), RuntimeFault> {
    let rhs = frame.pop()?;
    let lhs = frame.pop()?;
    let result = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Value::Int(int_op(a, b)),
        (Value::Float(a), Value::Float(b)) => Value::Float(float_op(a, b)),
        (a, b) => return Err(RuntimeFault::type_mismatch(a.type_name(), b.type_name())),
    };
    frame.push(result);
    Ok(())
}

fn int_or_float_checked(
    lhs: Value,
    rhs: Value,
    int_op: impl FnOnce(i64, i64) -> Result<i64, RuntimeFault>,
    float_op: impl FnOnce(f64, f64) -> Result<f64, RuntimeFault>,
) -> Result<Value, RuntimeFault> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(a, b)?)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(a, b)?)),
        (a, b) => Err(RuntimeFault::type_mismatch(a.type_name(), b.type_name())),
    }
}

fn compare(
    frame: &mut Frame,
    int_op: impl FnOnce(i64, i64) -> bool,
    float_op: impl FnOnce(f64, f64) -> bool,
) -> Result<(), RuntimeFault> {
    let rhs = frame.pop()?;
    let lhs = frame.pop()?;
    let result = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(a, b),
        (Value::Float(a), Value::Float(b)) => float_op(a, b),
        (a, b) => return Err(RuntimeFault::type_mismatch(a.type_name(), b.type_name())),
    };
    frame.push(Value::Bool(result));
    Ok(())
}
