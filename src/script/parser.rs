// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/parser.rs - 例程语言语法分析（递归下降）
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

use super::{
  ast::{
    Arg, BinOp, BoolOp, CmpOp, Comprehension, Const, Expr, FPart, FunctionDef, Index, LambdaDef,
    Parameter, Stmt, StmtKind, Target, UnaryOp,
  },
  error::ScriptError,
  lexer::{self, Spanned, Token},
};

const KEYWORDS: &[&str] = &[
  "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
  "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
  "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
  "yield",
];

const UNSUPPORTED: &[&str] = &[
  "class", "try", "with", "async", "await", "del", "global", "nonlocal", "raise", "yield",
];

/// 括号、一元运算、后缀与代码块的最大嵌套层数
const MAX_NESTING: usize = 64;

type Result<T> = std::result::Result<T, ScriptError>;

/// 解析完整的例程源码
pub fn parse_module(source: &str) -> Result<Vec<Stmt>> {
  let tokens = lexer::tokenize(source)?;
  Parser::new(tokens).module()
}

/// 解析单个表达式，行号用于报错
pub fn parse_expression_at(source: &str, line: usize) -> Result<Expr> {
  parse_field(source, line, 0)
}

/// f-string 字段沿用外层的嵌套深度
fn parse_field(source: &str, line: usize, depth: usize) -> Result<Expr> {
  let tokens = lexer::tokenize_at(source.trim(), line)?;
  let mut parser = Parser::new(tokens);
  parser.depth = depth;
  let expr = parser.testlist()?;
  match parser.peek() {
    Token::Newline | Token::Eof => Ok(expr),
    other => Err(ScriptError::syntax(
      format!("invalid syntax near {}", describe(other)),
      line,
    )),
  }
}

fn describe(token: &Token) -> String {
  match token {
    Token::Name(name) => format!("'{}'", name),
    Token::Int(v) => v.to_string(),
    Token::Float(v) => v.to_string(),
    Token::Str(_) | Token::FStr(_) => "string literal".to_string(),
    Token::Op(op) => format!("'{}'", op),
    Token::Newline => "end of line".to_string(),
    Token::Indent => "indent".to_string(),
    Token::Dedent => "dedent".to_string(),
    Token::Eof => "end of input".to_string(),
  }
}

fn to_target(expr: Expr, line: usize) -> Result<Target> {
  match expr {
    Expr::Name(name) => Ok(Target::Name(name)),
    Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
      items
        .into_iter()
        .map(|e| to_target(e, line))
        .collect::<Result<_>>()?,
    )),
    Expr::Subscript(object, index) => Ok(Target::Subscript(*object, *index)),
    Expr::Attribute(..) => Err(ScriptError::syntax("cannot assign to attribute", line)),
    _ => Err(ScriptError::syntax("cannot assign to expression", line)),
  }
}

fn push_literal(parts: &mut Vec<FPart>, text: &str) {
  if text.is_empty() {
    return;
  }
  if let Some(FPart::Literal(last)) = parts.last_mut() {
    last.push_str(text);
  } else {
    parts.push(FPart::Literal(text.to_string()));
  }
}

fn binary_chain(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
  if rest.is_empty() {
    first
  } else {
    Expr::Binary(Box::new(first), rest)
  }
}

fn bool_chain(op: BoolOp, first: Expr, rest: Vec<Expr>) -> Expr {
  if rest.is_empty() {
    return first;
  }
  let mut operands = Vec::with_capacity(rest.len() + 1);
  operands.push(first);
  operands.extend(rest);
  Expr::Bool(op, operands)
}

/// 拆分 f-string：`{{`/`}}` 转义，`{expr:spec}` 为格式化字段，`!r`/`!s` 转换被忽略
fn parse_fstring(content: &str, line: usize, nesting: usize) -> Result<Vec<FPart>> {
  let chars: Vec<char> = content.chars().collect();
  let mut parts = Vec::new();
  let mut literal = String::new();
  let mut i = 0;

  while i < chars.len() {
    match chars[i] {
      '{' if chars.get(i + 1) == Some(&'{') => {
        literal.push('{');
        i += 2;
      }
      '}' if chars.get(i + 1) == Some(&'}') => {
        literal.push('}');
        i += 2;
      }
      '}' => return Err(ScriptError::syntax("f-string: single '}' is not allowed", line)),
      '{' => {
        let start = i + 1;
        let mut j = start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut colon = None;
        let mut bang = None;

        loop {
          let Some(&c) = chars.get(j) else {
            return Err(ScriptError::syntax("f-string: expecting '}'", line));
          };
          if let Some(q) = quote {
            if c == q {
              quote = None;
            }
          } else {
            match c {
              '\'' | '"' => quote = Some(c),
              '(' | '[' | '{' => depth += 1,
              ')' | ']' => depth = depth.saturating_sub(1),
              '}' if depth == 0 => break,
              '}' => depth -= 1,
              ':' if depth == 0 && colon.is_none() => colon = Some(j),
              '!' if depth == 0 && colon.is_none() && chars.get(j + 1) != Some(&'=') => {
                bang = Some(j)
              }
              _ => {}
            }
          }
          j += 1;
        }

        let expr_end = bang.or(colon).unwrap_or(j);
        let text: String = chars[start..expr_end].iter().collect();
        let text = text.trim().trim_end_matches('=').trim_end();
        if text.is_empty() {
          return Err(ScriptError::syntax("f-string: empty expression not allowed", line));
        }
        let spec = colon.map(|k| chars[k + 1..j].iter().collect::<String>());

        push_literal(&mut parts, &literal);
        literal.clear();
        parts.push(FPart::Field {
          expr: parse_field(text, line, nesting + 1)?,
          spec,
        });
        i = j + 1;
      }
      c => {
        literal.push(c);
        i += 1;
      }
    }
  }
  push_literal(&mut parts, &literal);
  Ok(parts)
}

struct Parser {
  tokens: Vec<Spanned>,
  pos: usize,
  depth: usize,
}

impl Parser {
  fn new(tokens: Vec<Spanned>) -> Self {
    Parser {
      tokens,
      pos: 0,
      depth: 0,
    }
  }

  fn descend(&mut self) -> Result<()> {
    if self.depth >= MAX_NESTING {
      return self.error(format!("too many nested levels (limit {})", MAX_NESTING));
    }
    self.depth += 1;
    Ok(())
  }

  /// 在加深一层后解析，超过上限时报语法错误
  fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
    self.descend()?;
    let result = parse(self);
    self.depth -= 1;
    result
  }

  fn peek(&self) -> &Token {
    self
      .tokens
      .get(self.pos)
      .map(|s| &s.token)
      .unwrap_or(&Token::Eof)
  }

  fn peek_next(&self) -> &Token {
    self
      .tokens
      .get(self.pos + 1)
      .map(|s| &s.token)
      .unwrap_or(&Token::Eof)
  }

  fn line(&self) -> usize {
    self
      .tokens
      .get(self.pos)
      .or_else(|| self.tokens.last())
      .map(|s| s.line)
      .unwrap_or(1)
  }

  fn advance(&mut self) -> Token {
    let token = self.peek().clone();
    if self.pos < self.tokens.len() {
      self.pos += 1;
    }
    token
  }

  fn error<T>(&self, message: impl Into<String>) -> Result<T> {
    Err(ScriptError::syntax(message, self.line()))
  }

  fn unexpected<T>(&self) -> Result<T> {
    self.error(format!("invalid syntax near {}", describe(self.peek())))
  }

  fn check_op(&self, op: &str) -> bool {
    matches!(self.peek(), Token::Op(o) if *o == op)
  }

  fn eat_op(&mut self, op: &str) -> bool {
    if self.check_op(op) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn expect_op(&mut self, op: &str) -> Result<()> {
    if self.eat_op(op) {
      Ok(())
    } else {
      self.error(format!("expected '{}', found {}", op, describe(self.peek())))
    }
  }

  fn check_kw(&self, keyword: &str) -> bool {
    matches!(self.peek(), Token::Name(n) if n == keyword)
  }

  fn eat_kw(&mut self, keyword: &str) -> bool {
    if self.check_kw(keyword) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn expect_kw(&mut self, keyword: &str) -> Result<()> {
    if self.eat_kw(keyword) {
      Ok(())
    } else {
      self.error(format!("expected '{}', found {}", keyword, describe(self.peek())))
    }
  }

  fn expect_name(&mut self) -> Result<String> {
    match self.peek() {
      Token::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
        let name = name.clone();
        self.pos += 1;
        Ok(name)
      }
      _ => self.unexpected(),
    }
  }

  fn starts_expression(&self) -> bool {
    match self.peek() {
      Token::Name(name) => {
        !KEYWORDS.contains(&name.as_str())
          || matches!(name.as_str(), "None" | "True" | "False" | "not" | "lambda")
      }
      Token::Int(_) | Token::Float(_) | Token::Str(_) | Token::FStr(_) => true,
      Token::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "..."),
      _ => false,
    }
  }

  fn module(&mut self) -> Result<Vec<Stmt>> {
    let mut body = Vec::new();
    loop {
      match self.peek() {
        Token::Eof => break,
        Token::Newline => self.pos += 1,
        _ => body.extend(self.statement()?),
      }
    }
    Ok(body)
  }

  fn statement(&mut self) -> Result<Vec<Stmt>> {
    if let Token::Name(name) = self.peek() {
      match name.as_str() {
        "if" => return Ok(vec![self.if_statement()?]),
        "while" => return Ok(vec![self.while_statement()?]),
        "for" => return Ok(vec![self.for_statement()?]),
        "def" => return Ok(vec![self.function_def()?]),
        kw if UNSUPPORTED.contains(&kw) => {
          return self.error(format!("'{}' statements are not supported", kw));
        }
        _ => {}
      }
    }
    if *self.peek() == Token::Indent {
      return self.error("unexpected indent");
    }
    self.simple_statements()
  }

  fn simple_statements(&mut self) -> Result<Vec<Stmt>> {
    let mut stmts = vec![self.simple_statement()?];
    while self.eat_op(";") {
      if matches!(self.peek(), Token::Newline | Token::Eof) {
        break;
      }
      stmts.push(self.simple_statement()?);
    }
    match self.peek() {
      Token::Newline => {
        self.pos += 1;
        Ok(stmts)
      }
      Token::Eof => Ok(stmts),
      _ => self.unexpected(),
    }
  }

  fn at_statement_end(&self) -> bool {
    matches!(self.peek(), Token::Newline | Token::Eof) || self.check_op(";")
  }

  fn aug_op(&mut self) -> Option<BinOp> {
    let op = match self.peek() {
      Token::Op("+=") => BinOp::Add,
      Token::Op("-=") => BinOp::Sub,
      Token::Op("*=") => BinOp::Mul,
      Token::Op("/=") => BinOp::Div,
      Token::Op("//=") => BinOp::FloorDiv,
      Token::Op("%=") => BinOp::Mod,
      Token::Op("**=") => BinOp::Pow,
      _ => return None,
    };
    self.pos += 1;
    Some(op)
  }

  fn dotted_name(&mut self) -> Result<String> {
    let mut name = self.expect_name()?;
    while self.eat_op(".") {
      name.push('.');
      name.push_str(&self.expect_name()?);
    }
    Ok(name)
  }

  fn simple_statement(&mut self) -> Result<Stmt> {
    let line = self.line();
    let kind = if self.eat_kw("pass") {
      StmtKind::Pass
    } else if self.eat_kw("break") {
      StmtKind::Break
    } else if self.eat_kw("continue") {
      StmtKind::Continue
    } else if self.eat_kw("return") {
      if self.at_statement_end() {
        StmtKind::Return(None)
      } else {
        StmtKind::Return(Some(self.testlist()?))
      }
    } else if self.eat_kw("assert") {
      let test = self.test()?;
      let message = if self.eat_op(",") {
        Some(self.test()?)
      } else {
        None
      };
      StmtKind::Assert { test, message }
    } else if self.eat_kw("import") {
      let module = self.dotted_name()?;
      while !self.at_statement_end() {
        self.advance();
      }
      StmtKind::Import(module)
    } else if self.eat_kw("from") {
      let module = self.dotted_name()?;
      self.expect_kw("import")?;
      while !self.at_statement_end() {
        self.advance();
      }
      StmtKind::Import(module)
    } else {
      self.expression_statement(line)?
    };
    Ok(Stmt { line, kind })
  }

  fn expression_statement(&mut self, line: usize) -> Result<StmtKind> {
    let expr = self.testlist()?;

    if self.check_op("=") {
      let mut exprs = vec![expr];
      while self.eat_op("=") {
        exprs.push(self.testlist()?);
      }
      let Some(value) = exprs.pop() else {
        return self.unexpected();
      };
      let targets = exprs
        .into_iter()
        .map(|e| to_target(e, line))
        .collect::<Result<_>>()?;
      return Ok(StmtKind::Assign { targets, value });
    }

    if let Some(op) = self.aug_op() {
      let target = match to_target(expr, line)? {
        Target::Tuple(_) => {
          return Err(ScriptError::syntax(
            "illegal expression for augmented assignment",
            line,
          ));
        }
        target => target,
      };
      let value = self.testlist()?;
      return Ok(StmtKind::AugAssign { target, op, value });
    }

    // 带类型注解的赋值：`count: int = 0`
    if let Expr::Name(name) = &expr
      && self.eat_op(":")
    {
      let name = name.clone();
      self.test()?;
      if self.eat_op("=") {
        let value = self.testlist()?;
        return Ok(StmtKind::Assign {
          targets: vec![Target::Name(name)],
          value,
        });
      }
      return Ok(StmtKind::Pass);
    }

    Ok(StmtKind::Expr(expr))
  }

  fn block(&mut self) -> Result<Vec<Stmt>> {
    self.nested(Self::suite)
  }

  fn suite(&mut self) -> Result<Vec<Stmt>> {
    self.expect_op(":")?;
    if *self.peek() != Token::Newline {
      return self.simple_statements();
    }
    self.pos += 1;
    if *self.peek() != Token::Indent {
      return self.error("expected an indented block");
    }
    self.pos += 1;

    let mut body = Vec::new();
    loop {
      match self.peek() {
        Token::Dedent => {
          self.pos += 1;
          break;
        }
        Token::Eof => break,
        Token::Newline => self.pos += 1,
        _ => body.extend(self.statement()?),
      }
    }
    Ok(body)
  }

  fn if_statement(&mut self) -> Result<Stmt> {
    let line = self.line();
    self.expect_kw("if")?;
    let test = self.test()?;
    let body = self.block()?;

    let mut branches = vec![(test, body)];
    let mut orelse = Vec::new();
    loop {
      if self.eat_kw("elif") {
        let test = self.test()?;
        let body = self.block()?;
        branches.push((test, body));
      } else if self.eat_kw("else") {
        orelse = self.block()?;
        break;
      } else {
        break;
      }
    }
    Ok(Stmt {
      line,
      kind: StmtKind::If { branches, orelse },
    })
  }

  fn while_statement(&mut self) -> Result<Stmt> {
    let line = self.line();
    self.expect_kw("while")?;
    let test = self.test()?;
    let body = self.block()?;
    if self.check_kw("else") {
      return self.error("'while ... else' is not supported");
    }
    Ok(Stmt {
      line,
      kind: StmtKind::While { test, body },
    })
  }

  fn for_statement(&mut self) -> Result<Stmt> {
    let line = self.line();
    self.expect_kw("for")?;
    let target = self.target_list()?;
    self.expect_kw("in")?;
    let iter = self.testlist()?;
    let body = self.block()?;
    if self.check_kw("else") {
      return self.error("'for ... else' is not supported");
    }
    Ok(Stmt {
      line,
      kind: StmtKind::For { target, iter, body },
    })
  }

  fn function_def(&mut self) -> Result<Stmt> {
    let line = self.line();
    self.expect_kw("def")?;
    let name = self.expect_name()?;
    self.expect_op("(")?;
    let params = self.parameters(")")?;
    self.expect_op(")")?;
    if self.eat_op("->") {
      self.test()?;
    }
    let body = self.block()?;
    Ok(Stmt {
      line,
      kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
        name,
        params,
        body,
        line,
      })),
    })
  }

  fn parameters(&mut self, close: &str) -> Result<Vec<Parameter>> {
    let mut params: Vec<Parameter> = Vec::new();
    while !self.check_op(close) {
      if self.check_op("*") || self.check_op("**") {
        return self.error("variadic parameters are not supported");
      }
      let name = self.expect_name()?;
      if close == ")" && self.eat_op(":") {
        self.test()?;
      }
      let default = if self.eat_op("=") {
        Some(self.test()?)
      } else {
        None
      };
      if default.is_none() && params.iter().any(|p| p.default.is_some()) {
        return self.error("non-default argument follows default argument");
      }
      if params.iter().any(|p| p.name == name) {
        return self.error(format!("duplicate argument '{}' in function definition", name));
      }
      params.push(Parameter { name, default });
      if !self.eat_op(",") {
        break;
      }
    }
    Ok(params)
  }

  fn target_list(&mut self) -> Result<Target> {
    let line = self.line();
    let first = self.arith()?;
    if !self.check_op(",") {
      return to_target(first, line);
    }
    let mut items = vec![first];
    while self.eat_op(",") {
      if self.check_kw("in") {
        break;
      }
      items.push(self.arith()?);
    }
    to_target(Expr::Tuple(items), line)
  }

  fn testlist(&mut self) -> Result<Expr> {
    let first = self.test()?;
    if !self.check_op(",") {
      return Ok(first);
    }
    let mut items = vec![first];
    while self.eat_op(",") {
      if !self.starts_expression() {
        break;
      }
      items.push(self.test()?);
    }
    Ok(Expr::Tuple(items))
  }

  fn test(&mut self) -> Result<Expr> {
    self.nested(Self::conditional)
  }

  fn conditional(&mut self) -> Result<Expr> {
    if self.check_kw("lambda") {
      return self.lambda();
    }
    let expr = self.or_test()?;
    if self.eat_kw("if") {
      let test = self.or_test()?;
      self.expect_kw("else")?;
      let orelse = self.test()?;
      return Ok(Expr::IfElse {
        test: Box::new(test),
        body: Box::new(expr),
        orelse: Box::new(orelse),
      });
    }
    Ok(expr)
  }

  fn lambda(&mut self) -> Result<Expr> {
    self.expect_kw("lambda")?;
    let params = self.parameters(":")?;
    self.expect_op(":")?;
    let body = self.test()?;
    Ok(Expr::Lambda(Rc::new(LambdaDef { params, body })))
  }

  fn or_test(&mut self) -> Result<Expr> {
    let first = self.and_test()?;
    let mut operands = Vec::new();
    while self.eat_kw("or") {
      operands.push(self.and_test()?);
    }
    Ok(bool_chain(BoolOp::Or, first, operands))
  }

  fn and_test(&mut self) -> Result<Expr> {
    let first = self.not_test()?;
    let mut operands = Vec::new();
    while self.eat_kw("and") {
      operands.push(self.not_test()?);
    }
    Ok(bool_chain(BoolOp::And, first, operands))
  }

  fn not_test(&mut self) -> Result<Expr> {
    if self.eat_kw("not") {
      let operand = self.nested(Self::not_test)?;
      return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
    }
    self.comparison()
  }

  fn comparison(&mut self) -> Result<Expr> {
    let left = self.arith()?;
    let mut rest = Vec::new();
    loop {
      let op = match self.peek() {
        Token::Op("==") => CmpOp::Eq,
        Token::Op("!=") => CmpOp::NotEq,
        Token::Op("<") => CmpOp::Lt,
        Token::Op("<=") => CmpOp::LtE,
        Token::Op(">") => CmpOp::Gt,
        Token::Op(">=") => CmpOp::GtE,
        Token::Name(n) if n == "in" => CmpOp::In,
        Token::Name(n) if n == "not" && matches!(self.peek_next(), Token::Name(m) if m == "in") => {
          self.pos += 1;
          CmpOp::NotIn
        }
        Token::Name(n) if n == "is" => {
          if matches!(self.peek_next(), Token::Name(m) if m == "not") {
            self.pos += 1;
            CmpOp::IsNot
          } else {
            CmpOp::Is
          }
        }
        _ => break,
      };
      self.pos += 1;
      rest.push((op, self.arith()?));
    }

    if rest.is_empty() {
      Ok(left)
    } else {
      Ok(Expr::Compare(Box::new(left), rest))
    }
  }

  fn arith(&mut self) -> Result<Expr> {
    let first = self.term()?;
    let mut rest = Vec::new();
    loop {
      let op = if self.eat_op("+") {
        BinOp::Add
      } else if self.eat_op("-") {
        BinOp::Sub
      } else {
        break;
      };
      rest.push((op, self.term()?));
    }
    Ok(binary_chain(first, rest))
  }

  fn term(&mut self) -> Result<Expr> {
    let first = self.factor()?;
    let mut rest = Vec::new();
    loop {
      let op = if self.eat_op("*") {
        BinOp::Mul
      } else if self.eat_op("/") {
        BinOp::Div
      } else if self.eat_op("//") {
        BinOp::FloorDiv
      } else if self.eat_op("%") {
        BinOp::Mod
      } else {
        break;
      };
      rest.push((op, self.factor()?));
    }
    Ok(binary_chain(first, rest))
  }

  fn factor(&mut self) -> Result<Expr> {
    if self.eat_op("-") {
      return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Self::factor)?)));
    }
    if self.eat_op("+") {
      return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.nested(Self::factor)?)));
    }
    self.power()
  }

  fn power(&mut self) -> Result<Expr> {
    let base = self.atom_expr()?;
    if self.eat_op("**") {
      let exponent = self.nested(Self::factor)?;
      return Ok(Expr::Binary(Box::new(base), vec![(BinOp::Pow, exponent)]));
    }
    Ok(base)
  }

  fn atom_expr(&mut self) -> Result<Expr> {
    let outer = self.depth;
    let mut expr = self.atom()?;
    loop {
      if self.check_op("(") || self.check_op("[") || self.check_op(".") {
        // 每个后缀都让求值多嵌套一层
        self.descend()?;
      }
      if self.eat_op("(") {
        let args = self.call_args()?;
        expr = Expr::Call {
          func: Box::new(expr),
          args,
        };
      } else if self.eat_op("[") {
        let index = self.subscript()?;
        self.expect_op("]")?;
        expr = Expr::Subscript(Box::new(expr), Box::new(index));
      } else if self.eat_op(".") {
        let name = self.expect_name()?;
        expr = Expr::Attribute(Box::new(expr), name);
      } else {
        break;
      }
    }
    self.depth = outer;
    Ok(expr)
  }

  fn call_args(&mut self) -> Result<Vec<Arg>> {
    let mut args = Vec::new();
    while !self.check_op(")") {
      if self.check_op("*") || self.check_op("**") {
        return self.error("argument unpacking is not supported");
      }

      let keyword = match (self.peek(), self.peek_next()) {
        (Token::Name(name), Token::Op("=")) if !KEYWORDS.contains(&name.as_str()) => {
          Some(name.clone())
        }
        _ => None,
      };

      if let Some(name) = keyword {
        self.pos += 2;
        let value = self.test()?;
        args.push(Arg::Keyword(name, value));
      } else {
        if args.iter().any(|a| matches!(a, Arg::Keyword(..))) {
          return self.error("positional argument follows keyword argument");
        }
        let value = self.test()?;
        if self.check_kw("for") {
          let generators = self.comprehension_clauses()?;
          args.push(Arg::Positional(Expr::ListComp {
            element: Box::new(value),
            generators,
          }));
        } else {
          args.push(Arg::Positional(value));
        }
      }

      if !self.eat_op(",") {
        break;
      }
    }
    self.expect_op(")")?;
    Ok(args)
  }

  fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>> {
    let mut generators = Vec::new();
    while self.eat_kw("for") {
      let target = self.target_list()?;
      self.expect_kw("in")?;
      let iter = self.or_test()?;
      let mut conditions = Vec::new();
      while self.eat_kw("if") {
        conditions.push(self.or_test()?);
      }
      generators.push(Comprehension {
        target,
        iter,
        conditions,
      });
    }
    Ok(generators)
  }

  fn subscript(&mut self) -> Result<Index> {
    let lower = if self.check_op(":") {
      None
    } else {
      let first = self.test()?;
      if self.check_op(",") {
        let mut items = vec![first];
        while self.eat_op(",") {
          if self.check_op("]") {
            break;
          }
          items.push(self.test()?);
        }
        return Ok(Index::Single(Expr::Tuple(items)));
      }
      if !self.check_op(":") {
        return Ok(Index::Single(first));
      }
      Some(first)
    };
    self.expect_op(":")?;

    let upper = if self.check_op(":") || self.check_op("]") {
      None
    } else {
      Some(self.test()?)
    };
    let step = if self.eat_op(":") && !self.check_op("]") {
      Some(self.test()?)
    } else {
      None
    };
    Ok(Index::Slice { lower, upper, step })
  }

  fn strings(&mut self) -> Result<Expr> {
    let line = self.line();
    let mut parts = Vec::new();
    let mut formatted = false;
    loop {
      match self.peek() {
        Token::Str(text) => {
          let text = text.clone();
          push_literal(&mut parts, &text);
        }
        Token::FStr(text) => {
          let text = text.clone();
          formatted = true;
          for part in parse_fstring(&text, line, self.depth)? {
            match part {
              FPart::Literal(text) => push_literal(&mut parts, &text),
              field => parts.push(field),
            }
          }
        }
        _ => break,
      }
      self.pos += 1;
    }

    if formatted {
      return Ok(Expr::FString(parts));
    }
    let text = match parts.pop() {
      Some(FPart::Literal(text)) => text,
      _ => String::new(),
    };
    Ok(Expr::Const(Const::Str(Rc::from(text))))
  }

  fn atom(&mut self) -> Result<Expr> {
    match self.peek() {
      Token::Str(_) | Token::FStr(_) => return self.strings(),
      Token::Name(name) if KEYWORDS.contains(&name.as_str()) => {
        let expr = match name.as_str() {
          "None" => Expr::Const(Const::None),
          "True" => Expr::Const(Const::Bool(true)),
          "False" => Expr::Const(Const::Bool(false)),
          _ => return self.unexpected(),
        };
        self.pos += 1;
        return Ok(expr);
      }
      _ => {}
    }

    match self.advance() {
      Token::Int(v) => Ok(Expr::Const(Const::Int(v))),
      Token::Float(v) => Ok(Expr::Const(Const::Float(v))),
      Token::Name(name) => Ok(Expr::Name(name)),
      Token::Op("...") => Ok(Expr::Const(Const::None)),
      Token::Op("(") => {
        if self.eat_op(")") {
          return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.check_kw("for") {
          let generators = self.comprehension_clauses()?;
          self.expect_op(")")?;
          return Ok(Expr::ListComp {
            element: Box::new(first),
            generators,
          });
        }
        if !self.check_op(",") {
          self.expect_op(")")?;
          return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
          if self.check_op(")") {
            break;
          }
          items.push(self.test()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
      }
      Token::Op("[") => {
        if self.eat_op("]") {
          return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.check_kw("for") {
          let generators = self.comprehension_clauses()?;
          self.expect_op("]")?;
          return Ok(Expr::ListComp {
            element: Box::new(first),
            generators,
          });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
          if self.check_op("]") {
            break;
          }
          items.push(self.test()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
      }
      Token::Op("{") => {
        if self.eat_op("}") {
          return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.test()?;
        if !self.eat_op(":") {
          return self.error("set literals are not supported");
        }
        let value = self.test()?;
        if self.check_kw("for") {
          let generators = self.comprehension_clauses()?;
          self.expect_op("}")?;
          return Ok(Expr::DictComp {
            key: Box::new(key),
            value: Box::new(value),
            generators,
          });
        }
        let mut pairs = vec![(key, value)];
        while self.eat_op(",") {
          if self.check_op("}") {
            break;
          }
          let key = self.test()?;
          self.expect_op(":")?;
          let value = self.test()?;
          pairs.push((key, value));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(pairs))
      }
      _ => {
        self.pos = self.pos.saturating_sub(1);
        self.unexpected()
      }
    }
  }
}
