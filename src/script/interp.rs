// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/interp.rs - 例程语言解释器
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

use std::{
  rc::Rc,
  time::{Duration, Instant},
};

use tracing::debug;

use super::{
  ast::{Arg, BinOp, BoolOp, Comprehension, Const, Expr, FPart, Index, Parameter, Stmt, StmtKind, Target, UnaryOp},
  builtins,
  error::{ErrorKind, ScriptError},
  value::{self, Dict, Env, Function, Range, Scope, Value},
};
use crate::capability::{self, CapabilitySurface, Host};

type Result<T> = std::result::Result<T, ScriptError>;

/// 每隔多少步检查一次墙钟时间
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// 例程执行上限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionLimits {
  pub max_steps: u64,
  pub max_collection_len: usize,
  pub max_depth: usize,
  pub timeout: Duration,
}

impl Default for ExecutionLimits {
  fn default() -> Self {
    ExecutionLimits {
      max_steps: 5_000_000,
      max_collection_len: 1_000_000,
      max_depth: 64,
      timeout: Duration::from_secs(30),
    }
  }
}

enum Flow {
  Normal,
  Break,
  Continue,
  Return(Value),
}

/// 可迭代对象的元素；`range` 按需生成
pub enum Items {
  Range { range: Range, next: usize, len: usize },
  Values(std::vec::IntoIter<Value>),
}

impl Iterator for Items {
  type Item = Value;

  fn next(&mut self) -> Option<Value> {
    match self {
      Items::Range { range, next, len } => {
        if *next >= *len {
          return None;
        }
        let value = Value::Int(range.get(*next));
        *next += 1;
        Some(value)
      }
      Items::Values(values) => values.next(),
    }
  }
}

pub struct Interpreter<'a> {
  surface: &'a CapabilitySurface,
  host: &'a mut dyn Host,
  limits: ExecutionLimits,
  steps: u64,
  started: Instant,
  depth: usize,
  captured: Vec<Env>,
}

fn raise<T>(kind: ErrorKind, message: impl Into<String>) -> Result<T> {
  Err(ScriptError::raise(kind, message))
}

fn normalize_index(index: i64, len: usize, what: &str) -> Result<usize> {
  let len = len as i64;
  let i = if index < 0 { index + len } else { index };
  if i < 0 || i >= len {
    return raise(ErrorKind::IndexError, format!("{} index out of range", what));
  }
  Ok(i as usize)
}

fn index_of(key: &Value, len: usize, what: &str) -> Result<usize> {
  let Some(index) = key.as_int() else {
    return raise(
      ErrorKind::TypeError,
      format!(
        "{} indices must be integers or slices, not {}",
        what,
        key.type_name()
      ),
    );
  };
  normalize_index(index, len, what)
}

pub(super) fn get_item(container: &Value, key: &Value) -> Result<Value> {
  match container {
    Value::List(items) => {
      let items = items.borrow();
      let i = index_of(key, items.len(), "list")?;
      Ok(items[i].clone())
    }
    Value::Tuple(items) => {
      let i = index_of(key, items.len(), "tuple")?;
      Ok(items[i].clone())
    }
    Value::Str(text) => {
      let chars: Vec<char> = text.chars().collect();
      let i = index_of(key, chars.len(), "string")?;
      Ok(Value::str(chars[i].to_string()))
    }
    Value::Range(range) => {
      let i = index_of(key, range.len(), "range object")?;
      Ok(Value::Int(range.get(i)))
    }
    Value::Dict(dict) => {
      key.check_hashable()?;
      match dict.borrow().get(key) {
        Some(value) => Ok(value),
        None => raise(ErrorKind::KeyError, key.repr()),
      }
    }
    other => raise(
      ErrorKind::TypeError,
      format!("'{}' object is not subscriptable", other.type_name()),
    ),
  }
}

fn set_item(container: &Value, key: Value, value: Value) -> Result<()> {
  match container {
    Value::List(items) => {
      let len = items.borrow().len();
      let i = index_of(&key, len, "list assignment")?;
      items.borrow_mut()[i] = value;
      Ok(())
    }
    Value::Dict(dict) => dict.borrow_mut().insert(key, value),
    other => raise(
      ErrorKind::TypeError,
      format!("'{}' object does not support item assignment", other.type_name()),
    ),
  }
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
  let len = len as i64;
  if step > 0 {
    let clamp = |v: i64| if v < 0 { (v + len).max(0) } else { v.min(len) };
    let start = lower.map(clamp).unwrap_or(0);
    let stop = upper.map(clamp).unwrap_or(len);
    (start..stop).step_by(step as usize).map(|i| i as usize).collect()
  } else {
    let clamp = |v: i64| if v < 0 { (v + len).max(-1) } else { v.min(len - 1) };
    let start = lower.map(clamp).unwrap_or(len - 1);
    let stop = upper.map(clamp).unwrap_or(-1);
    let mut out = Vec::new();
    let mut i = start;
    while i > stop {
      out.push(i as usize);
      i += step;
    }
    out
  }
}

fn slice_value(container: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Value> {
  let step = step.unwrap_or(1);
  if step == 0 {
    return raise(ErrorKind::ValueError, "slice step cannot be zero");
  }
  match container {
    Value::List(items) => {
      let items = items.borrow();
      let picked = slice_indices(items.len(), lower, upper, step)
        .into_iter()
        .map(|i| items[i].clone())
        .collect();
      Ok(Value::list(picked))
    }
    Value::Tuple(items) => {
      let picked = slice_indices(items.len(), lower, upper, step)
        .into_iter()
        .map(|i| items[i].clone())
        .collect();
      Ok(Value::tuple(picked))
    }
    Value::Str(text) => {
      let chars: Vec<char> = text.chars().collect();
      let picked: String = slice_indices(chars.len(), lower, upper, step)
        .into_iter()
        .map(|i| chars[i])
        .collect();
      Ok(Value::str(picked))
    }
    other => raise(
      ErrorKind::TypeError,
      format!("'{}' object is not subscriptable", other.type_name()),
    ),
  }
}

fn image_attribute(width: u32, height: u32, name: &str) -> Option<Value> {
  match name {
    "width" => Some(Value::Int(width as i64)),
    "height" => Some(Value::Int(height as i64)),
    "size" => Some(Value::tuple(vec![
      Value::Int(width as i64),
      Value::Int(height as i64),
    ])),
    _ => None,
  }
}

impl<'a> Interpreter<'a> {
  pub fn new(surface: &'a CapabilitySurface, host: &'a mut dyn Host, limits: ExecutionLimits) -> Self {
    Interpreter {
      surface,
      host,
      limits,
      steps: 0,
      started: Instant::now(),
      depth: 0,
      captured: Vec::new(),
    }
  }

  pub fn limits(&self) -> &ExecutionLimits {
    &self.limits
  }

  pub fn steps(&self) -> u64 {
    self.steps
  }

  pub(super) fn emit(&mut self, text: &str) {
    self.host.emit(text);
  }

  pub(super) fn check_len(&self, len: usize) -> Result<()> {
    if len > self.limits.max_collection_len {
      return Err(ScriptError::too_large(len, self.limits.max_collection_len));
    }
    Ok(())
  }

  fn tick(&mut self) -> Result<()> {
    self.steps += 1;
    if self.steps > self.limits.max_steps {
      return Err(ScriptError::step_budget(self.limits.max_steps));
    }
    if self.steps % DEADLINE_CHECK_INTERVAL == 0 && self.started.elapsed() > self.limits.timeout {
      return Err(ScriptError::deadline(self.limits.timeout));
    }
    Ok(())
  }

  /// 执行模块顶层语句，返回其全局作用域
  pub fn run_module(&mut self, body: &[Stmt]) -> Result<Env> {
    let globals = Scope::root();
    self.captured.push(globals.clone());
    match self.exec_block(body, &globals)? {
      Flow::Normal => Ok(globals),
      Flow::Return(_) => Err(ScriptError::syntax("'return' outside function", 0)),
      Flow::Break | Flow::Continue => Err(ScriptError::syntax("'break' outside loop", 0)),
    }
  }

  pub(super) fn items(&self, value: &Value) -> Result<Items> {
    let values = match value {
      Value::Range(range) => {
        return Ok(Items::Range {
          range: *range,
          next: 0,
          len: range.len(),
        });
      }
      Value::List(items) => items.borrow().clone(),
      Value::Tuple(items) => items.to_vec(),
      Value::Str(text) => text.chars().map(|c| Value::str(c.to_string())).collect(),
      Value::Dict(dict) => dict.borrow().keys(),
      other => {
        return raise(
          ErrorKind::TypeError,
          format!("'{}' object is not iterable", other.type_name()),
        );
      }
    };
    Ok(Items::Values(values.into_iter()))
  }

  /// 展开为向量（`range` 受集合长度上限约束）
  pub(super) fn iterate(&self, value: &Value) -> Result<Vec<Value>> {
    if let Value::Range(range) = value {
      self.check_len(range.len())?;
    }
    Ok(self.items(value)?.collect())
  }

  fn exec_block(&mut self, body: &[Stmt], env: &Env) -> Result<Flow> {
    for stmt in body {
      let flow = self.exec(stmt, env).map_err(|e| e.at(stmt.line))?;
      if !matches!(flow, Flow::Normal) {
        return Ok(flow);
      }
    }
    Ok(Flow::Normal)
  }

  fn exec(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow> {
    self.tick()?;
    match &stmt.kind {
      StmtKind::Expr(expr) => {
        self.eval(expr, env)?;
      }
      StmtKind::Assign { targets, value } => {
        let value = self.eval(value, env)?;
        for target in targets {
          self.assign(target, value.clone(), env)?;
        }
      }
      StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, env)?,
      StmtKind::If { branches, orelse } => {
        for (test, body) in branches {
          if self.eval(test, env)?.truthy() {
            return self.exec_block(body, env);
          }
        }
        return self.exec_block(orelse, env);
      }
      StmtKind::While { test, body } => loop {
        self.tick()?;
        if !self.eval(test, env)?.truthy() {
          break;
        }
        match self.exec_block(body, env)? {
          Flow::Break => break,
          Flow::Normal | Flow::Continue => {}
          flow @ Flow::Return(_) => return Ok(flow),
        }
      },
      StmtKind::For { target, iter, body } => {
        let iterable = self.eval(iter, env)?;
        for item in self.items(&iterable)? {
          self.assign(target, item, env)?;
          match self.exec_block(body, env)? {
            Flow::Break => break,
            Flow::Normal | Flow::Continue => {}
            flow @ Flow::Return(_) => return Ok(flow),
          }
        }
      }
      StmtKind::Return(value) => {
        let value = match value {
          Some(expr) => self.eval(expr, env)?,
          None => Value::None,
        };
        return Ok(Flow::Return(value));
      }
      StmtKind::Assert { test, message } => {
        if !self.eval(test, env)?.truthy() {
          let message = match message {
            Some(expr) => self.eval(expr, env)?.to_str(),
            None => String::new(),
          };
          return raise(ErrorKind::AssertionError, message);
        }
      }
      StmtKind::FunctionDef(def) => {
        self.captured.push(env.clone());
        env.set(
          &def.name,
          Value::Function(Function::Def {
            def: def.clone(),
            env: env.clone(),
          }),
        );
      }
      StmtKind::Import(module) => {
        return raise(
          ErrorKind::ImportError,
          format!("import of '{}' is not allowed", module),
        );
      }
      StmtKind::Break => return Ok(Flow::Break),
      StmtKind::Continue => return Ok(Flow::Continue),
      StmtKind::Pass => {}
    }
    Ok(Flow::Normal)
  }

  fn assign(&mut self, target: &Target, value: Value, env: &Env) -> Result<()> {
    match target {
      Target::Name(name) => {
        env.set(name, value);
        Ok(())
      }
      Target::Tuple(targets) => {
        let items = self.iterate(&value)?;
        if items.len() < targets.len() {
          return raise(
            ErrorKind::ValueError,
            format!(
              "not enough values to unpack (expected {}, got {})",
              targets.len(),
              items.len()
            ),
          );
        }
        if items.len() > targets.len() {
          return raise(
            ErrorKind::ValueError,
            format!("too many values to unpack (expected {})", targets.len()),
          );
        }
        for (target, item) in targets.iter().zip(items) {
          self.assign(target, item, env)?;
        }
        Ok(())
      }
      Target::Subscript(object, Index::Single(key)) => {
        let container = self.eval(object, env)?;
        let key = self.eval(key, env)?;
        set_item(&container, key, value)
      }
      Target::Subscript(_, Index::Slice { .. }) => {
        raise(ErrorKind::TypeError, "slice assignment is not supported")
      }
    }
  }

  fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr, env: &Env) -> Result<()> {
    match target {
      Target::Name(name) => {
        let current = self.lookup(name, env)?;
        let rhs = self.eval(value, env)?;
        let updated = self.augmented(op, current, rhs)?;
        env.set(name, updated);
        Ok(())
      }
      Target::Subscript(object, Index::Single(key)) => {
        let container = self.eval(object, env)?;
        let key = self.eval(key, env)?;
        let current = get_item(&container, &key)?;
        let rhs = self.eval(value, env)?;
        let updated = self.augmented(op, current, rhs)?;
        set_item(&container, key, updated)
      }
      _ => raise(ErrorKind::TypeError, "illegal target for augmented assignment"),
    }
  }

  /// `list += iterable` 原地扩展，其余等价于二元运算
  fn augmented(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, &current) {
      let extra = self.iterate(&rhs)?;
      self.check_len(items.borrow().len() + extra.len())?;
      items.borrow_mut().extend(extra);
      return Ok(current);
    }
    value::binary(op, &current, &rhs, self.limits.max_collection_len)
  }

  fn lookup(&self, name: &str, env: &Env) -> Result<Value> {
    if let Some(value) = env.get(name) {
      return Ok(value);
    }
    if let Some(value) = self.surface.lookup(name) {
      return Ok(value);
    }
    raise(
      ErrorKind::NameError,
      format!("name '{}' is not defined", name),
    )
  }

  fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value> {
    match expr {
      Expr::Const(constant) => Ok(match constant {
        Const::None => Value::None,
        Const::Bool(b) => Value::Bool(*b),
        Const::Int(i) => Value::Int(*i),
        Const::Float(f) => Value::Float(*f),
        Const::Str(s) => Value::Str(s.clone()),
      }),
      Expr::Name(name) => self.lookup(name, env),
      Expr::FString(parts) => {
        let mut out = String::new();
        for part in parts {
          match part {
            FPart::Literal(text) => out.push_str(text),
            FPart::Field { expr, spec } => {
              let value = self.eval(expr, env)?;
              out.push_str(&value::format_value(&value, spec.as_deref().unwrap_or(""))?);
            }
          }
        }
        self.check_len(out.len())?;
        Ok(Value::str(out))
      }
      Expr::List(items) => {
        let items = self.eval_all(items, env)?;
        Ok(Value::list(items))
      }
      Expr::Tuple(items) => {
        let items = self.eval_all(items, env)?;
        Ok(Value::tuple(items))
      }
      Expr::Dict(pairs) => {
        let mut dict = Dict::default();
        for (key, value) in pairs {
          let key = self.eval(key, env)?;
          let value = self.eval(value, env)?;
          dict.insert(key, value)?;
        }
        Ok(Value::dict(dict))
      }
      Expr::Unary(op, operand) => {
        let operand = self.eval(operand, env)?;
        match (op, &operand) {
          (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
          (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
          (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
          (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(|| ScriptError::raise(ErrorKind::OverflowError, "integer result too large")),
          (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
          (_, v) => raise(
            ErrorKind::TypeError,
            format!("bad operand type for unary operator: '{}'", v.type_name()),
          ),
        }
      }
      Expr::Binary(first, rest) => {
        let mut left = self.eval(first, env)?;
        for (op, right) in rest {
          let right = self.eval(right, env)?;
          left = value::binary(*op, &left, &right, self.limits.max_collection_len)?;
        }
        Ok(left)
      }
      Expr::Bool(op, operands) => {
        let mut last = Value::None;
        for operand in operands {
          last = self.eval(operand, env)?;
          match (op, last.truthy()) {
            (BoolOp::And, false) | (BoolOp::Or, true) => break,
            _ => {}
          }
        }
        Ok(last)
      }
      Expr::Compare(first, rest) => {
        let mut left = self.eval(first, env)?;
        for (op, right) in rest {
          let right = self.eval(right, env)?;
          if !value::compare(*op, &left, &right)? {
            return Ok(Value::Bool(false));
          }
          left = right;
        }
        Ok(Value::Bool(true))
      }
      Expr::IfElse { test, body, orelse } => {
        if self.eval(test, env)?.truthy() {
          self.eval(body, env)
        } else {
          self.eval(orelse, env)
        }
      }
      Expr::Lambda(def) => {
        self.captured.push(env.clone());
        Ok(Value::Function(Function::Lambda {
          def: def.clone(),
          env: env.clone(),
        }))
      }
      Expr::Call { func, args } => {
        let func = self.eval(func, env)?;
        let mut positional = Vec::new();
        let mut keywords: Vec<(String, Value)> = Vec::new();
        for arg in args {
          match arg {
            Arg::Positional(expr) => positional.push(self.eval(expr, env)?),
            Arg::Keyword(name, expr) => {
              if keywords.iter().any(|(k, _)| k == name) {
                return raise(
                  ErrorKind::TypeError,
                  format!("keyword argument repeated: {}", name),
                );
              }
              keywords.push((name.clone(), self.eval(expr, env)?));
            }
          }
        }
        self.call(&func, positional, keywords)
      }
      Expr::Attribute(object, name) => {
        let object = self.eval(object, env)?;
        self.get_attribute(object, name)
      }
      Expr::Subscript(object, index) => {
        let container = self.eval(object, env)?;
        match index.as_ref() {
          Index::Single(key) => {
            let key = self.eval(key, env)?;
            get_item(&container, &key)
          }
          Index::Slice { lower, upper, step } => {
            let lower = self.slice_bound(lower.as_ref(), env)?;
            let upper = self.slice_bound(upper.as_ref(), env)?;
            let step = self.slice_bound(step.as_ref(), env)?;
            slice_value(&container, lower, upper, step)
          }
        }
      }
      Expr::ListComp {
        element,
        generators,
      } => {
        let scope = Scope::child(env);
        let mut out = Vec::new();
        self.comprehend(generators, &scope, &mut |interp, scope| {
          out.push(interp.eval(element, scope)?);
          interp.check_len(out.len())
        })?;
        Ok(Value::list(out))
      }
      Expr::DictComp {
        key,
        value,
        generators,
      } => {
        let scope = Scope::child(env);
        let mut dict = Dict::default();
        self.comprehend(generators, &scope, &mut |interp, scope| {
          let k = interp.eval(key, scope)?;
          let v = interp.eval(value, scope)?;
          dict.insert(k, v)?;
          interp.check_len(dict.len())
        })?;
        Ok(Value::dict(dict))
      }
    }
  }

  fn eval_all(&mut self, exprs: &[Expr], env: &Env) -> Result<Vec<Value>> {
    self.check_len(exprs.len())?;
    exprs.iter().map(|e| self.eval(e, env)).collect()
  }

  fn slice_bound(&mut self, expr: Option<&Expr>, env: &Env) -> Result<Option<i64>> {
    let Some(expr) = expr else { return Ok(None) };
    match self.eval(expr, env)? {
      Value::None => Ok(None),
      v => match v.as_int() {
        Some(i) => Ok(Some(i)),
        None => raise(
          ErrorKind::TypeError,
          "slice indices must be integers or None",
        ),
      },
    }
  }

  fn comprehend(
    &mut self,
    generators: &[Comprehension],
    env: &Env,
    sink: &mut dyn FnMut(&mut Self, &Env) -> Result<()>,
  ) -> Result<()> {
    let Some((first, rest)) = generators.split_first() else {
      return sink(self, env);
    };
    let iterable = self.eval(&first.iter, env)?;
    for item in self.items(&iterable)? {
      self.tick()?;
      self.assign(&first.target, item, env)?;
      let mut keep = true;
      for condition in &first.conditions {
        if !self.eval(condition, env)?.truthy() {
          keep = false;
          break;
        }
      }
      if keep {
        self.comprehend(rest, env, sink)?;
      }
    }
    Ok(())
  }

  fn get_attribute(&mut self, object: Value, name: &str) -> Result<Value> {
    let type_name = object.type_name();
    let is_method = match &object {
      Value::Region(region) => {
        if let Some(value) = capability::region_attribute(region, name) {
          return Ok(value);
        }
        capability::is_region_method(name)
      }
      Value::Image(info) => {
        if let Some(value) = image_attribute(info.width, info.height, name) {
          return Ok(value);
        }
        false
      }
      other => builtins::has_method(other, name),
    };

    if is_method {
      return Ok(Value::Function(Function::Method {
        receiver: Box::new(object),
        name: Rc::from(name),
      }));
    }
    raise(
      ErrorKind::AttributeError,
      format!("'{}' object has no attribute '{}'", type_name, name),
    )
  }

  fn enter(&mut self) -> Result<()> {
    if self.depth >= self.limits.max_depth {
      return raise(ErrorKind::RecursionError, "maximum recursion depth exceeded");
    }
    self.depth += 1;
    Ok(())
  }

  fn bind(
    &mut self,
    name: &str,
    params: &[Parameter],
    defining: &Env,
    scope: &Env,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
  ) -> Result<()> {
    if args.len() > params.len() {
      return raise(
        ErrorKind::TypeError,
        format!(
          "{}() takes {} positional arguments but {} were given",
          name,
          params.len(),
          args.len()
        ),
      );
    }

    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);
    for (key, value) in kwargs {
      match params.iter().position(|p| p.name == key) {
        Some(i) if slots[i].is_none() => slots[i] = Some(value),
        Some(_) => {
          return raise(
            ErrorKind::TypeError,
            format!("{}() got multiple values for argument '{}'", name, key),
          );
        }
        None => {
          return raise(
            ErrorKind::TypeError,
            format!("{}() got an unexpected keyword argument '{}'", name, key),
          );
        }
      }
    }

    for (param, slot) in params.iter().zip(slots) {
      let value = match (slot, &param.default) {
        (Some(value), _) => value,
        (None, Some(default)) => self.eval(default, defining)?,
        (None, None) => {
          return raise(
            ErrorKind::TypeError,
            format!(
              "{}() missing required positional argument: '{}'",
              name, param.name
            ),
          );
        }
      };
      scope.set(&param.name, value);
    }
    Ok(())
  }

  /// 调用任意可调用值
  pub fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value> {
    self.tick()?;
    let Value::Function(function) = func else {
      return raise(
        ErrorKind::TypeError,
        format!("'{}' object is not callable", func.type_name()),
      );
    };

    match function {
      Function::Builtin(builtin) => builtins::call(self, *builtin, args, kwargs),
      Function::Capability(cap) => {
        debug!("例程调用 {}", cap.name());
        capability::call(*cap, args, kwargs, &mut *self.host)
      }
      Function::Def { def, env } => {
        let scope = Scope::child(env);
        self.bind(&def.name, &def.params, env, &scope, args, kwargs)?;
        self.enter()?;
        let result = self.exec_block(&def.body, &scope);
        self.depth -= 1;
        match result? {
          Flow::Return(value) => Ok(value),
          Flow::Normal => Ok(Value::None),
          Flow::Break | Flow::Continue => Err(ScriptError::syntax("'break' outside loop", def.line)),
        }
      }
      Function::Lambda { def, env } => {
        let scope = Scope::child(env);
        self.bind("<lambda>", &def.params, env, &scope, args, kwargs)?;
        self.enter()?;
        let result = self.eval(&def.body, &scope);
        self.depth -= 1;
        result
      }
      Function::Method { receiver, name } => self.call_method(receiver, name, args, kwargs),
    }
  }

  fn call_method(
    &mut self,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
  ) -> Result<Value> {
    match receiver {
      Value::Region(region) => {
        capability::region_method(region, name, args, kwargs, &mut *self.host)
      }
      other => builtins::method(self, other, name, args, kwargs),
    }
  }
}

impl Drop for Interpreter<'_> {
  fn drop(&mut self) {
    for env in self.captured.drain(..) {
      env.clear();
    }
  }
}
