// File: src/errors.rs
//
// Structured error types for the three fault domains of the execution core:
// compile-time errors, runtime faults, and JIT infrastructure faults.

use colored::Colorize;
use std::fmt;

/// Errors raised while lowering an `ast::Program` into a `bytecode::Module`.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    UnknownVariable,
    UnknownFunction,
    InvalidAssignmentTarget,
    JumpOffsetTooLarge,
    DuplicateFunction,
    ChunkTooLarge,
    BreakOutsideLoop,
    ContinueOutsideLoop,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CompileErrorKind::UnknownVariable => "unknown variable",
            CompileErrorKind::UnknownFunction => "unknown function",
            CompileErrorKind::InvalidAssignmentTarget => "invalid assignment target",
            CompileErrorKind::JumpOffsetTooLarge => "jump offset too large",
            CompileErrorKind::DuplicateFunction => "duplicate function",
            CompileErrorKind::ChunkTooLarge => "chunk exceeds 65535 bytes",
            CompileErrorKind::BreakOutsideLoop => "break outside loop",
            CompileErrorKind::ContinueOutsideLoop => "continue outside loop",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub suggestion: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Unknown identifier, with an optional "did you mean" computed against
    /// every name in scope (the teacher's `errors.rs` pattern, here actually
    /// consulted by the compiler instead of sitting unused).
    pub fn unknown_variable(name: &str) -> Self {
        Self::new(CompileErrorKind::UnknownVariable, format!("variable '{}' is not defined", name))
    }

    pub fn unknown_variable_in(name: &str, candidates: &[String]) -> Self {
        let err = Self::unknown_variable(name);
        match find_closest_match(name, candidates) {
            Some(suggestion) => err.with_suggestion(suggestion),
            None => err,
        }
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(CompileErrorKind::UnknownFunction, format!("function '{}' is not defined", name))
    }

    pub fn unknown_function_in(name: &str, candidates: &[String]) -> Self {
        let err = Self::unknown_function(name);
        match find_closest_match(name, candidates) {
            Some(suggestion) => err.with_suggestion(suggestion),
            None => err,
        }
    }

    pub fn invalid_assignment_target() -> Self {
        Self::new(CompileErrorKind::InvalidAssignmentTarget, "left-hand side of assignment is not assignable")
    }

    pub fn jump_offset_too_large(offset: usize) -> Self {
        Self::new(
            CompileErrorKind::JumpOffsetTooLarge,
            format!("jump offset {} does not fit in 16 bits", offset),
        )
    }

    pub fn duplicate_function(name: &str) -> Self {
        Self::new(CompileErrorKind::DuplicateFunction, format!("function '{}' is defined more than once", name))
    }

    pub fn chunk_too_large(len: usize) -> Self {
        Self::new(CompileErrorKind::ChunkTooLarge, format!("chunk is {} bytes, limit is 65535", len))
    }

    pub fn break_outside_loop() -> Self {
        Self::new(CompileErrorKind::BreakOutsideLoop, "'break' used outside of a loop")
    }

    pub fn continue_outside_loop() -> Self {
        Self::new(CompileErrorKind::ContinueOutsideLoop, "'continue' used outside of a loop")
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", "compile error".red().bold(), self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({} '{}'?)", "did you mean".bright_green(), suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Errors raised by the VM while executing a compiled `Module`.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeFaultKind {
    ArityMismatch,
    UnknownFunction,
    StackUnderflow,
    LocalSlotOutOfRange,
    ConstantIndexOutOfRange,
    JumpTargetOutOfRange,
    CallTargetNotString,
    TypeMismatch,
    DivisionByZero,
    ModuloByZero,
    NonBoolCondition,
    ArrayIndexOutOfBounds,
    NotAnArray,
}

impl fmt::Display for RuntimeFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RuntimeFaultKind::ArityMismatch => "arity mismatch",
            RuntimeFaultKind::UnknownFunction => "unknown function",
            RuntimeFaultKind::StackUnderflow => "stack underflow",
            RuntimeFaultKind::LocalSlotOutOfRange => "local slot out of range",
            RuntimeFaultKind::ConstantIndexOutOfRange => "constant index out of range",
            RuntimeFaultKind::JumpTargetOutOfRange => "jump target out of range",
            RuntimeFaultKind::CallTargetNotString => "call target is not a function name",
            RuntimeFaultKind::TypeMismatch => "type mismatch",
            RuntimeFaultKind::DivisionByZero => "division by zero",
            RuntimeFaultKind::ModuloByZero => "modulo by zero",
            RuntimeFaultKind::NonBoolCondition => "condition did not evaluate to a bool",
            RuntimeFaultKind::ArrayIndexOutOfBounds => "array index out of bounds",
            RuntimeFaultKind::NotAnArray => "value is not an array",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeFault {
    pub kind: RuntimeFaultKind,
    pub message: String,
}

impl RuntimeFault {
    pub fn new(kind: RuntimeFaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn arity_mismatch(name: &str, expected: usize, got: usize) -> Self {
        Self::new(
            RuntimeFaultKind::ArityMismatch,
            format!("'{}' expects {} argument(s), got {}", name, expected, got),
        )
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(RuntimeFaultKind::UnknownFunction, format!("no function named '{}'", name))
    }

    pub fn stack_underflow() -> Self {
        Self::new(RuntimeFaultKind::StackUnderflow, "operand stack underflow")
    }

    pub fn local_slot_out_of_range(slot: usize) -> Self {
        Self::new(RuntimeFaultKind::LocalSlotOutOfRange, format!("local slot {} out of range", slot))
    }

    pub fn constant_index_out_of_range(idx: usize) -> Self {
        Self::new(RuntimeFaultKind::ConstantIndexOutOfRange, format!("constant index {} out of range", idx))
    }

    pub fn jump_target_out_of_range(target: usize) -> Self {
        Self::new(RuntimeFaultKind::JumpTargetOutOfRange, format!("jump target {} out of range", target))
    }

    pub fn call_target_not_string() -> Self {
        Self::new(RuntimeFaultKind::CallTargetNotString, "Call constant is not a string")
    }

    pub fn type_mismatch(expected: &str, got: &str) -> Self {
        Self::new(RuntimeFaultKind::TypeMismatch, format!("expected {}, got {}", expected, got))
    }

    pub fn division_by_zero() -> Self {
        Self::new(RuntimeFaultKind::DivisionByZero, "division by zero")
    }

    pub fn modulo_by_zero() -> Self {
        Self::new(RuntimeFaultKind::ModuloByZero, "modulo by zero")
    }

    pub fn non_bool_condition() -> Self {
        Self::new(RuntimeFaultKind::NonBoolCondition, "conditional expression did not evaluate to a bool")
    }

    pub fn array_index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            RuntimeFaultKind::ArrayIndexOutOfBounds,
            format!("index {} out of bounds for array of length {}", index, len),
        )
    }

    pub fn not_an_array() -> Self {
        Self::new(RuntimeFaultKind::NotAnArray, "array operation on a non-array value")
    }
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", "runtime fault".red().bold(), self.message)
    }
}

impl std::error::Error for RuntimeFault {}

/// Infrastructure faults from the JIT's interaction with the operating system.
/// Never fatal — the VM catches these at the call boundary and falls back to
/// interpreting the offending basic block.
#[derive(Debug, Clone, PartialEq)]
pub enum JitFaultKind {
    PageAllocFailed,
    ProtectionTransitionFailed,
}

impl fmt::Display for JitFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JitFaultKind::PageAllocFailed => "page allocation failed",
            JitFaultKind::ProtectionTransitionFailed => "mprotect transition failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JitFault {
    pub kind: JitFaultKind,
    pub message: String,
}

impl JitFault {
    pub fn new(kind: JitFaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn page_alloc_failed(errno: i32) -> Self {
        Self::new(JitFaultKind::PageAllocFailed, format!("mmap failed, errno {}", errno))
    }

    pub fn protection_transition_failed(errno: i32) -> Self {
        Self::new(JitFaultKind::ProtectionTransitionFailed, format!("mprotect failed, errno {}", errno))
    }
}

impl fmt::Display for JitFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", "jit fault".yellow().bold(), self.message)
    }
}

impl std::error::Error for JitFault {}

/// Computes the Levenshtein distance between two strings.
/// Used for "did you mean?" suggestions in compile error messages.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );
        }
    }

    matrix[len1][len2]
}

/// Find the closest match from a list of candidates using Levenshtein distance.
/// Returns None if no candidate is within distance 3.
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate.as_str());
        }
    }

    best_match
}
