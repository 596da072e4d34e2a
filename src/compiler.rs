// File: src/compiler.rs
//
// Lowers a validated `ast::Program` into a `bytecode::Module`: one `Chunk`
// per function, a deduplicating constant pool, and a local-slot count.
// Two-pass at program scope (register signatures, then compile bodies) so
// forward and mutually recursive calls resolve regardless of declaration
// order, grounded on the original `backend.Compiler.CompileProgram`.

use crate::ast::{BinOp, Expr, FunctionDecl, Literal, Program, Stmt, TypeKind, UnOp};
use crate::bytecode::{Chunk, ElementKind, FunctionInfo, Module, OpCode, Value};
use crate::errors::CompileError;

/// Lowers a whole program into a ready-to-run `Module`.
pub fn compile(program: &Program) -> Result<Module, CompileError> {
    let mut module = Module::new();

    for decl in &program.functions {
        if module.functions.contains_key(&decl.name) {
            return Err(CompileError::duplicate_function(&decl.name));
        }
        let info = FunctionInfo {
            name: decl.name.clone(),
            param_count: decl.params.len(),
            param_types: decl.params.iter().map(|p| p.ty.clone()).collect(),
            return_type: decl.return_type.clone(),
            chunk: Chunk::new(),
            local_count: 0,
        };
        module.functions.insert(decl.name.clone(), info);
    }

    for decl in &program.functions {
        let chunk = FunctionCompiler::new(&module).compile_function(decl)?;
        let info = module.functions.get_mut(&decl.name).expect("registered above");
        info.local_count = chunk.local_count;
        info.chunk = chunk.finish()?;
    }

    Ok(module)
}

struct Local {
    name: String,
    slot: u16,
}

/// Where a `continue` inside the current loop should land. `while` loops
/// know their re-check position immediately; `for` loops only know it once
/// the step section has been compiled, so `continue` jumps are collected
/// and patched afterwards — see the open-question resolution in
/// DESIGN.md for why this lands on the step section rather than the test.
enum ContinueTarget {
    Known(u16),
    Pending(Vec<usize>),
}

struct LoopScope {
    continue_target: ContinueTarget,
    break_jumps: Vec<usize>,
}

struct FunctionCompiler<'m> {
    module: &'m Module,
    chunk: Chunk,
    locals: Vec<Local>,
    loops: Vec<LoopScope>,
}

impl<'m> FunctionCompiler<'m> {
    fn new(module: &'m Module) -> Self {
        Self { module, chunk: Chunk::new(), locals: Vec::new(), loops: Vec::new() }
    }

    fn compile_function(mut self, decl: &FunctionDecl) -> Result<Chunk, CompileError> {
        for param in &decl.params {
            self.add_local(param.name.clone());
        }
        self.compile_block(&decl.body)?;

        // Safety terminator: every chunk returns Null if control falls off
        // the end, even though the upstream validator guarantees non-void
        // functions already return on every path.
        self.emit_const(Value::Null);
        self.chunk.write_op(OpCode::Return);

        Ok(self.chunk)
    }

    fn add_local(&mut self, name: String) -> u16 {
        let slot = self.locals.len() as u16;
        self.locals.push(Local { name, slot });
        self.chunk.local_count = self.chunk.local_count.max(slot + 1);
        slot
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| l.slot)
    }

    fn local_names(&self) -> Vec<String> {
        self.locals.iter().map(|l| l.name.clone()).collect()
    }

    fn emit_const(&mut self, value: Value) {
        let idx = self.chunk.add_constant(value);
        self.chunk.write_op(OpCode::Const);
        self.chunk.write_uint16(idx);
    }

    /// Emits `op` followed by a placeholder `u16` operand, returning the
    /// offset of that operand for a later `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.chunk.write_op(op);
        let offset = self.chunk.code.len();
        self.chunk.write_uint16(0);
        offset
    }

    fn patch_jump(&mut self, offset: usize) -> Result<(), CompileError> {
        let target = self.chunk.code.len();
        self.patch_jump_to(offset, target)
    }

    fn patch_jump_to(&mut self, offset: usize, target: usize) -> Result<(), CompileError> {
        if target > u16::MAX as usize {
            return Err(CompileError::jump_offset_too_large(target));
        }
        self.chunk.patch_uint16(offset, target as u16);
        Ok(())
    }

    fn compile_block(&mut self, block: &[Stmt]) -> Result<(), CompileError> {
        for stmt in block {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::VarDecl { name, value, .. } => {
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit_const(Value::Null),
                }
                let slot = self.add_local(name.clone());
                self.chunk.write_op(OpCode::StoreLocal);
                self.chunk.write_byte(slot as u8);
            }
            Stmt::Assign { target, value } => self.compile_assign(target, value)?,
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.chunk.write_op(OpCode::Pop);
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => self.emit_const(Value::Null),
                }
                self.chunk.write_op(OpCode::Return);
            }
            Stmt::If { cond, then_branch, else_branch } => {
                self.compile_if(cond, then_branch, else_branch.as_deref())?
            }
            Stmt::While { cond, body } => self.compile_while(cond, body)?,
            Stmt::For { init, cond, step, body } => {
                self.compile_for(init.as_deref(), cond.as_ref(), step.as_deref(), body)?
            }
            Stmt::Break => {
                let offset = self.emit_jump(OpCode::Jump);
                let scope = self
                    .loops
                    .last_mut()
                    .ok_or_else(CompileError::break_outside_loop)?;
                scope.break_jumps.push(offset);
            }
            Stmt::Continue => self.compile_continue()?,
            Stmt::Block(block) => self.compile_block(block)?,
        }
        Ok(())
    }

    fn compile_continue(&mut self) -> Result<(), CompileError> {
        let known_target = match self.loops.last() {
            Some(scope) => match &scope.continue_target {
                ContinueTarget::Known(addr) => Some(*addr),
                ContinueTarget::Pending(_) => None,
            },
            None => return Err(CompileError::continue_outside_loop()),
        };
        match known_target {
            Some(addr) => {
                self.chunk.write_op(OpCode::Jump);
                self.chunk.write_uint16(addr);
            }
            None => {
                let offset = self.emit_jump(OpCode::Jump);
                if let ContinueTarget::Pending(jumps) =
                    &mut self.loops.last_mut().expect("checked above").continue_target
                {
                    jumps.push(offset);
                }
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Ident(name) => {
                self.compile_expr(value)?;
                let slot = self.resolve_local(name).ok_or_else(|| {
                    CompileError::unknown_variable_in(name, &self.local_names())
                })?;
                self.chunk.write_op(OpCode::StoreLocal);
                self.chunk.write_byte(slot as u8);
            }
            Expr::Index { target: array, index } => {
                self.compile_expr(array)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.chunk.write_op(OpCode::ArraySet);
            }
            _ => return Err(CompileError::invalid_assignment_target()),
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_branch: &[Stmt],
        else_branch: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        self.compile_expr(cond)?;
        let jump_to_else = self.emit_jump(OpCode::JumpIfFalse);
        self.chunk.write_op(OpCode::Pop);
        self.compile_block(then_branch)?;

        let jump_after_else = self.emit_jump(OpCode::Jump);
        self.patch_jump(jump_to_else)?;
        self.chunk.write_op(OpCode::Pop);

        if let Some(else_branch) = else_branch {
            self.compile_block(else_branch)?;
        }
        self.patch_jump(jump_after_else)
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let loop_start = self.chunk.code.len() as u16;
        self.compile_expr(cond)?;
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.chunk.write_op(OpCode::Pop);

        self.loops.push(LoopScope {
            continue_target: ContinueTarget::Known(loop_start),
            break_jumps: Vec::new(),
        });
        self.compile_block(body)?;
        let scope = self.loops.pop().expect("pushed above");

        self.chunk.write_op(OpCode::Jump);
        self.chunk.write_uint16(loop_start);

        let after_loop = self.chunk.code.len();
        self.patch_jump_to(exit_jump, after_loop)?;
        self.chunk.write_op(OpCode::Pop);

        // `break` jumps land here, after the Pop above, not at `after_loop`.
        // The normal exit still has the peeked condition on the stack for
        // that Pop to consume; a `break` fires from inside the body, where
        // the condition was already popped before the body ran, so landing
        // on the same Pop would underflow the stack.
        let after_pop = self.chunk.code.len();
        for bj in scope.break_jumps {
            self.patch_jump_to(bj, after_pop)?;
        }
        Ok(())
    }

    /// `init` is lowered once; the test is re-evaluated at `loop_start` each
    /// iteration (omitted entirely, with no trailing `Pop`, when absent);
    /// `step` runs after the body, then control jumps back to `loop_start`.
    fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Stmt>,
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }

        let loop_start = self.chunk.code.len() as u16;
        let exit_jump = if let Some(cond) = cond {
            self.compile_expr(cond)?;
            let offset = self.emit_jump(OpCode::JumpIfFalse);
            self.chunk.write_op(OpCode::Pop);
            Some(offset)
        } else {
            None
        };

        self.loops.push(LoopScope {
            continue_target: ContinueTarget::Pending(Vec::new()),
            break_jumps: Vec::new(),
        });
        self.compile_block(body)?;

        let step_start = self.chunk.code.len();
        let scope = self.loops.pop().expect("pushed above");
        if let ContinueTarget::Pending(jumps) = scope.continue_target {
            for j in jumps {
                self.patch_jump_to(j, step_start)?;
            }
        }

        if let Some(step) = step {
            self.compile_stmt(step)?;
        }

        self.chunk.write_op(OpCode::Jump);
        self.chunk.write_uint16(loop_start);

        let after_loop = self.chunk.code.len();
        if let Some(exit_jump) = exit_jump {
            self.patch_jump_to(exit_jump, after_loop)?;
            self.chunk.write_op(OpCode::Pop);
        }

        // As in `compile_while`: when there's a condition (and thus a Pop to
        // skip), `break` must land after it, not at the same offset as the
        // normal exit — the body already popped the peeked condition before
        // a `break` could fire.
        let after_pop = self.chunk.code.len();
        for bj in scope.break_jumps {
            self.patch_jump_to(bj, after_pop)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(lit) => self.compile_literal(lit),
            Expr::Ident(name) => {
                let slot = self.resolve_local(name).ok_or_else(|| {
                    CompileError::unknown_variable_in(name, &self.local_names())
                })?;
                self.chunk.write_op(OpCode::LoadLocal);
                self.chunk.write_byte(slot as u8);
                Ok(())
            }
            Expr::Binary { op: BinOp::And, left, right } => self.compile_and(left, right),
            Expr::Binary { op: BinOp::Or, left, right } => self.compile_or(left, right),
            Expr::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.chunk.write_op(binop_opcode(*op));
                Ok(())
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.chunk.write_op(match op {
                    UnOp::Neg => OpCode::Neg,
                    UnOp::Not => OpCode::Not,
                });
                Ok(())
            }
            Expr::Call { callee, args } => self.compile_call(callee, args),
            Expr::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.chunk.write_op(OpCode::ArrayGet);
                Ok(())
            }
            Expr::NewArray { element_type, length } => {
                let kind = ElementKind::from_type(element_type);
                self.emit_const(Value::Int(kind.tag()));
                self.compile_expr(length)?;
                self.chunk.write_op(OpCode::ArrayNew);
                Ok(())
            }
        }
    }

    fn compile_literal(&mut self, lit: &Literal) -> Result<(), CompileError> {
        let value = match lit {
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Str(s) => Value::Str(std::rc::Rc::from(s.as_str())),
            Literal::Char(c) => Value::Char(*c),
            Literal::Null => Value::Null,
        };
        self.emit_const(value);
        Ok(())
    }

    /// `a and b` — `a; JumpIfFalse end; Pop; b; end:`. The peek-without-pop
    /// semantics of `JumpIfFalse` leaves the falsey `a` on the stack as the
    /// expression's result when the jump is taken.
    fn compile_and(&mut self, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let jump_to_end = self.emit_jump(OpCode::JumpIfFalse);
        self.chunk.write_op(OpCode::Pop);
        self.compile_expr(right)?;
        self.patch_jump(jump_to_end)
    }

    /// `a or b` — `a; JumpIfFalse right; Jump end; right: Pop; b; end:`.
    fn compile_or(&mut self, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let jump_to_right = self.emit_jump(OpCode::JumpIfFalse);
        let jump_to_end = self.emit_jump(OpCode::Jump);
        self.patch_jump(jump_to_right)?;
        self.chunk.write_op(OpCode::Pop);
        self.compile_expr(right)?;
        self.patch_jump(jump_to_end)
    }

    fn compile_call(&mut self, callee: &str, args: &[Expr]) -> Result<(), CompileError> {
        if !self.module.functions.contains_key(callee) {
            let names: Vec<String> = self.module.functions.keys().cloned().collect();
            return Err(CompileError::unknown_function_in(callee, &names));
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        let idx = self.chunk.add_constant(Value::Str(std::rc::Rc::from(callee)));
        self.chunk.write_op(OpCode::Call);
        self.chunk.write_uint16(idx);
        Ok(())
    }
}

fn binop_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Sub,
        BinOp::Mul => OpCode::Mul,
        BinOp::Div => OpCode::Div,
        BinOp::Mod => OpCode::Mod,
        BinOp::Pow => OpCode::Pow,
        BinOp::Eq => OpCode::Eq,
        BinOp::Ne => OpCode::Ne,
        BinOp::Lt => OpCode::Lt,
        BinOp::Le => OpCode::Le,
        BinOp::Gt => OpCode::Gt,
        BinOp::Ge => OpCode::Ge,
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops compiled separately"),
    }
}

#[allow(dead_code)]
fn param_type_name(ty: &TypeKind) -> &'static str {
    match ty {
        TypeKind::Int => "int",
        TypeKind::Float => "float",
        TypeKind::Bool => "bool",
        TypeKind::Str => "string",
        TypeKind::Char => "char",
        TypeKind::Array(_) => "array",
        TypeKind::Void => "void",
    }
}
