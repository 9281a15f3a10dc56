// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/ast.rs - 例程语言语法树
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
  None,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Pos,
  Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  FloorDiv,
  Mod,
  Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
  And,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
  Eq,
  NotEq,
  Lt,
  LtE,
  Gt,
  GtE,
  In,
  NotIn,
  Is,
  IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
  Positional(Expr),
  Keyword(String, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Index {
  Single(Expr),
  Slice {
    lower: Option<Expr>,
    upper: Option<Expr>,
    step: Option<Expr>,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
  Literal(String),
  Field { expr: Expr, spec: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
  pub target: Target,
  pub iter: Expr,
  pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
  pub name: String,
  pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaDef {
  pub params: Vec<Parameter>,
  pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
  pub name: String,
  pub params: Vec<Parameter>,
  pub body: Vec<Stmt>,
  pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Const(Const),
  Name(String),
  FString(Vec<FPart>),
  List(Vec<Expr>),
  Tuple(Vec<Expr>),
  Dict(Vec<(Expr, Expr)>),
  Unary(UnaryOp, Box<Expr>),
  /// 同一优先级的左结合运算链
  Binary(Box<Expr>, Vec<(BinOp, Expr)>),
  /// 至少两个操作数
  Bool(BoolOp, Vec<Expr>),
  Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
  IfElse {
    test: Box<Expr>,
    body: Box<Expr>,
    orelse: Box<Expr>,
  },
  Lambda(Rc<LambdaDef>),
  Call {
    func: Box<Expr>,
    args: Vec<Arg>,
  },
  Attribute(Box<Expr>, String),
  Subscript(Box<Expr>, Box<Index>),
  ListComp {
    element: Box<Expr>,
    generators: Vec<Comprehension>,
  },
  DictComp {
    key: Box<Expr>,
    value: Box<Expr>,
    generators: Vec<Comprehension>,
  },
}

/// 赋值目标
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
  Name(String),
  Tuple(Vec<Target>),
  Subscript(Expr, Index),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
  pub line: usize,
  pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
  Expr(Expr),
  Assign {
    targets: Vec<Target>,
    value: Expr,
  },
  AugAssign {
    target: Target,
    op: BinOp,
    value: Expr,
  },
  If {
    branches: Vec<(Expr, Vec<Stmt>)>,
    orelse: Vec<Stmt>,
  },
  While {
    test: Expr,
    body: Vec<Stmt>,
  },
  For {
    target: Target,
    iter: Expr,
    body: Vec<Stmt>,
  },
  Return(Option<Expr>),
  Assert {
    test: Expr,
    message: Option<Expr>,
  },
  FunctionDef(Rc<FunctionDef>),
  Import(String),
  Break,
  Continue,
  Pass,
}
