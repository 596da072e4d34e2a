// File: src/ast.rs
//
// The syntax tree this crate accepts as input. There is no lexer or parser
// here — these types are the boundary contract the (external) front end is
// assumed to produce: well-scoped names, unique function names, and
// non-void functions that return on every path. The compiler in
// `compiler.rs` trusts that contract and does not re-check it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Int,
    Float,
    Bool,
    Str,
    Char,
    Array(Box<TypeKind>),
    Void,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeKind,
    pub body: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FunctionDecl>,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    VarDecl { name: String, ty: TypeKind, value: Option<Expr> },
    Assign { target: Expr, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    If { cond: Expr, then_branch: Block, else_branch: Option<Block> },
    While { cond: Expr, body: Block },
    For { init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Box<Stmt>>, body: Block },
    Break,
    Continue,
    Block(Block),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Char(u8),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    Call { callee: String, args: Vec<Expr> },
    /// `target[index]` — reads when it appears as an expression, or the
    /// assignment target when it appears on the left of `Stmt::Assign`.
    Index { target: Box<Expr>, index: Box<Expr> },
    /// `new int[length]` — allocates a fresh heap array of `length` Nulls
    /// (or zero-valued elements per `element_type`).
    NewArray { element_type: TypeKind, length: Box<Expr> },
}
