// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/value.rs - 例程语言运行时值与运算
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
  cell::RefCell,
  cmp::Ordering,
  collections::HashMap,
  fmt,
  rc::Rc,
};

use super::{
  ast::{BinOp, CmpOp, FunctionDef, LambdaDef},
  builtins::Builtin,
  error::{ErrorKind, ScriptError},
};
use crate::{capability::Capability, region::Region, utils::format_float};

type Result<T> = std::result::Result<T, ScriptError>;

const MAX_REPR_DEPTH: usize = 16;

/// 变量作用域；读取时沿外层查找，写入只落在本层
#[derive(Default)]
pub struct Scope {
  vars: RefCell<HashMap<String, Value>>,
  parent: Option<Env>,
}

pub type Env = Rc<Scope>;

impl Scope {
  pub fn root() -> Env {
    Rc::new(Scope::default())
  }

  pub fn child(parent: &Env) -> Env {
    Rc::new(Scope {
      vars: RefCell::new(HashMap::new()),
      parent: Some(parent.clone()),
    })
  }

  pub fn get(&self, name: &str) -> Option<Value> {
    if let Some(value) = self.vars.borrow().get(name) {
      return Some(value.clone());
    }
    self.parent.as_ref().and_then(|p| p.get(name))
  }

  pub fn set(&self, name: &str, value: Value) {
    self.vars.borrow_mut().insert(name.to_string(), value);
  }

  /// 断开闭包与作用域之间的引用环
  pub fn clear(&self) {
    let vars = std::mem::take(&mut *self.vars.borrow_mut());
    drop(vars);
  }
}

/// 例程传入的图像，只暴露尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
  pub start: i64,
  pub stop: i64,
  pub step: i64,
}

impl Range {
  pub fn len(&self) -> usize {
    let span = if self.step > 0 {
      (self.stop as i128 - self.start as i128 + self.step as i128 - 1) / self.step as i128
    } else {
      (self.start as i128 - self.stop as i128 - self.step as i128 - 1) / -(self.step as i128)
    };
    span.max(0) as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, index: usize) -> i64 {
    self.start + self.step * index as i64
  }

  fn contains(&self, value: i64) -> bool {
    let offset = value as i128 - self.start as i128;
    let in_bounds = if self.step > 0 {
      value >= self.start && value < self.stop
    } else {
      value <= self.start && value > self.stop
    };
    in_bounds && offset % self.step as i128 == 0
  }
}

#[derive(Clone)]
pub enum Function {
  Builtin(Builtin),
  Capability(Capability),
  Def { def: Rc<FunctionDef>, env: Env },
  Lambda { def: Rc<LambdaDef>, env: Env },
  Method { receiver: Box<Value>, name: Rc<str> },
}

impl Function {
  pub fn name(&self) -> String {
    match self {
      Function::Builtin(b) => b.name().to_string(),
      Function::Capability(c) => c.name().to_string(),
      Function::Def { def, .. } => def.name.clone(),
      Function::Lambda { .. } => "<lambda>".to_string(),
      Function::Method { receiver, name } => format!("{}.{}", receiver.type_name(), name),
    }
  }
}

impl fmt::Debug for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<function {}>", self.name())
  }
}

/// 键按插入顺序保存
#[derive(Debug, Clone, Default)]
pub struct Dict {
  entries: Vec<(Value, Value)>,
}

impl Dict {
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn position(&self, key: &Value) -> Option<usize> {
    self.entries.iter().position(|(k, _)| k.py_eq(key))
  }

  pub fn get(&self, key: &Value) -> Option<Value> {
    self.position(key).map(|i| self.entries[i].1.clone())
  }

  pub fn contains(&self, key: &Value) -> bool {
    self.position(key).is_some()
  }

  pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
    key.check_hashable()?;
    match self.position(&key) {
      Some(i) => self.entries[i].1 = value,
      None => self.entries.push((key, value)),
    }
    Ok(())
  }

  pub fn remove(&mut self, key: &Value) -> Option<Value> {
    self.position(key).map(|i| self.entries.remove(i).1)
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn keys(&self) -> Vec<Value> {
    self.entries.iter().map(|(k, _)| k.clone()).collect()
  }

  pub fn values(&self) -> Vec<Value> {
    self.entries.iter().map(|(_, v)| v.clone()).collect()
  }

  pub fn items(&self) -> impl Iterator<Item = &(Value, Value)> {
    self.entries.iter()
  }
}

#[derive(Clone, Debug)]
pub enum Value {
  None,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(Rc<str>),
  List(Rc<RefCell<Vec<Value>>>),
  Tuple(Rc<[Value]>),
  Dict(Rc<RefCell<Dict>>),
  Range(Range),
  Region(Region),
  Image(ImageInfo),
  Function(Function),
}

fn numeric(value: &Value) -> Option<f64> {
  match value {
    Value::Bool(b) => Some(*b as i64 as f64),
    Value::Int(i) => Some(*i as f64),
    Value::Float(f) => Some(*f),
    _ => None,
  }
}

fn overflow() -> ScriptError {
  ScriptError::raise(ErrorKind::OverflowError, "integer result too large")
}

fn zero_division(message: &str) -> ScriptError {
  ScriptError::raise(ErrorKind::ZeroDivisionError, message)
}

fn floor_div(a: i64, b: i64) -> Result<i64> {
  if b == 0 {
    return Err(zero_division("integer division or modulo by zero"));
  }
  let q = a.checked_div(b).ok_or_else(overflow)?;
  if a % b != 0 && ((a < 0) != (b < 0)) {
    Ok(q - 1)
  } else {
    Ok(q)
  }
}

fn floor_mod(a: i64, b: i64) -> Result<i64> {
  if b == 0 {
    return Err(zero_division("integer division or modulo by zero"));
  }
  let r = a.checked_rem(b).unwrap_or(0);
  if r != 0 && ((r < 0) != (b < 0)) {
    Ok(r + b)
  } else {
    Ok(r)
  }
}

fn repeat<T: Clone>(items: &[T], times: i64, max_len: usize) -> Result<Vec<T>> {
  let times = times.max(0) as usize;
  let len = items.len().saturating_mul(times);
  if len > max_len {
    return Err(ScriptError::too_large(len, max_len));
  }
  let mut out = Vec::with_capacity(len);
  for _ in 0..times {
    out.extend_from_slice(items);
  }
  Ok(out)
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
  if len > max_len {
    Err(ScriptError::too_large(len, max_len))
  } else {
    Ok(())
  }
}

impl Value {
  pub fn str(text: impl AsRef<str>) -> Self {
    Value::Str(Rc::from(text.as_ref()))
  }

  pub fn list(items: Vec<Value>) -> Self {
    Value::List(Rc::new(RefCell::new(items)))
  }

  pub fn tuple(items: Vec<Value>) -> Self {
    Value::Tuple(Rc::from(items))
  }

  pub fn dict(dict: Dict) -> Self {
    Value::Dict(Rc::new(RefCell::new(dict)))
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Value::None => "NoneType",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::Float(_) => "float",
      Value::Str(_) => "str",
      Value::List(_) => "list",
      Value::Tuple(_) => "tuple",
      Value::Dict(_) => "dict",
      Value::Range(_) => "range",
      Value::Region(_) => "ImagePatch",
      Value::Image(_) => "Image",
      Value::Function(Function::Builtin(_)) | Value::Function(Function::Capability(_)) => {
        "builtin_function_or_method"
      }
      Value::Function(Function::Method { .. }) => "method",
      Value::Function(_) => "function",
    }
  }

  pub fn truthy(&self) -> bool {
    match self {
      Value::None => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0,
      Value::Str(s) => !s.is_empty(),
      Value::List(items) => !items.borrow().is_empty(),
      Value::Tuple(items) => !items.is_empty(),
      Value::Dict(dict) => !dict.borrow().is_empty(),
      Value::Range(range) => !range.is_empty(),
      Value::Region(_) | Value::Image(_) | Value::Function(_) => true,
    }
  }

  /// 整数语义（布尔值按 0/1 计）
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Bool(b) => Some(*b as i64),
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    numeric(self)
  }

  pub fn check_hashable(&self) -> Result<()> {
    match self {
      Value::List(_) | Value::Dict(_) => Err(ScriptError::type_error(format!(
        "unhashable type: '{}'",
        self.type_name()
      ))),
      Value::Tuple(items) => items.iter().try_for_each(Value::check_hashable),
      _ => Ok(()),
    }
  }

  pub fn repr(&self) -> String {
    self.render(true, 0)
  }

  /// `str(value)`
  pub fn to_str(&self) -> String {
    self.render(false, 0)
  }

  fn render(&self, quoted: bool, depth: usize) -> String {
    if depth > MAX_REPR_DEPTH {
      return "...".to_string();
    }
    let join = |items: &[Value]| {
      items
        .iter()
        .map(|v| v.render(true, depth + 1))
        .collect::<Vec<_>>()
        .join(", ")
    };

    match self {
      Value::None => "None".to_string(),
      Value::Bool(true) => "True".to_string(),
      Value::Bool(false) => "False".to_string(),
      Value::Int(i) => i.to_string(),
      Value::Float(f) => format_float(*f),
      Value::Str(s) if quoted => quote(s),
      Value::Str(s) => s.to_string(),
      Value::List(items) => format!("[{}]", join(items.borrow().as_slice())),
      Value::Tuple(items) if items.len() == 1 => format!("({},)", join(&items[..])),
      Value::Tuple(items) => format!("({})", join(&items[..])),
      Value::Dict(dict) => {
        let body = dict
          .borrow()
          .items()
          .map(|(k, v)| format!("{}: {}", k.render(true, depth + 1), v.render(true, depth + 1)))
          .collect::<Vec<_>>()
          .join(", ");
        format!("{{{}}}", body)
      }
      Value::Range(r) if r.step == 1 => format!("range({}, {})", r.start, r.stop),
      Value::Range(r) => format!("range({}, {}, {})", r.start, r.stop, r.step),
      Value::Region(region) => region.to_string(),
      Value::Image(info) => format!("<Image {}x{}>", info.width, info.height),
      Value::Function(function) => format!("{:?}", function),
    }
  }

  pub fn py_eq(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::None, Value::None) => true,
      (Value::Str(a), Value::Str(b)) => a == b,
      (Value::List(a), Value::List(b)) => {
        Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
      }
      (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
      (Value::Dict(a), Value::Dict(b)) => {
        if Rc::ptr_eq(a, b) {
          return true;
        }
        let (a, b) = (a.borrow(), b.borrow());
        a.len() == b.len()
          && a
            .items()
            .all(|(k, v)| b.get(k).is_some_and(|other| other.py_eq(v)))
      }
      (Value::Range(a), Value::Range(b)) => a == b,
      (Value::Region(a), Value::Region(b)) => a == b,
      (Value::Image(a), Value::Image(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (a, b) => match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
      },
    }
  }

  /// 同一对象（`is`）
  pub fn is_same(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::None, Value::None) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
      (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
      (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
      (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
      _ => false,
    }
  }

  /// 顺序比较；NaN 参与时返回 `None`
  pub fn py_cmp(&self, other: &Value, op: &str) -> Result<Option<Ordering>> {
    match (self, other) {
      (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
      (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
      (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow(), op),
      (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b, op),
      (a, b) => match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
        _ => Err(ScriptError::type_error(format!(
          "'{}' not supported between instances of '{}' and '{}'",
          op,
          a.type_name(),
          b.type_name()
        ))),
      },
    }
  }

  pub fn contains(&self, item: &Value) -> Result<bool> {
    match self {
      Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
      Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
      Value::Dict(dict) => Ok(dict.borrow().contains(item)),
      Value::Range(range) => Ok(item.as_int().is_some_and(|i| range.contains(i))),
      Value::Str(haystack) => match item {
        Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
        other => Err(ScriptError::type_error(format!(
          "'in <string>' requires string as left operand, not {}",
          other.type_name()
        ))),
      },
      other => Err(ScriptError::type_error(format!(
        "argument of type '{}' is not iterable",
        other.type_name()
      ))),
    }
  }
}

fn quote(text: &str) -> String {
  let delimiter = if text.contains('\'') && !text.contains('"') {
    '"'
  } else {
    '\''
  };
  let mut out = String::with_capacity(text.len() + 2);
  out.push(delimiter);
  for c in text.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      '\r' => out.push_str("\\r"),
      c if c == delimiter => {
        out.push('\\');
        out.push(c);
      }
      c => out.push(c),
    }
  }
  out.push(delimiter);
  out
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
  a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value], op: &str) -> Result<Option<Ordering>> {
  for (x, y) in a.iter().zip(b) {
    if !x.py_eq(y) {
      return x.py_cmp(y, op);
    }
  }
  Ok(Some(a.len().cmp(&b.len())))
}

fn op_symbol(op: BinOp) -> &'static str {
  match op {
    BinOp::Add => "+",
    BinOp::Sub => "-",
    BinOp::Mul => "*",
    BinOp::Div => "/",
    BinOp::FloorDiv => "//",
    BinOp::Mod => "%",
    BinOp::Pow => "**",
  }
}

/// 二元算术运算；`max_len` 限制拼接或重复得到的序列长度
pub fn binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Result<Value> {
  if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
    return int_binary(op, a, b);
  }

  match (op, left, right) {
    (BinOp::Add, Value::Str(a), Value::Str(b)) => {
      check_len(a.len() + b.len(), max_len)?;
      return Ok(Value::str(format!("{}{}", a, b)));
    }
    (BinOp::Add, Value::List(a), Value::List(b)) => {
      let mut items = a.borrow().clone();
      items.extend(b.borrow().iter().cloned());
      check_len(items.len(), max_len)?;
      return Ok(Value::list(items));
    }
    (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
      check_len(a.len() + b.len(), max_len)?;
      let items: Vec<Value> = a.iter().chain(b.iter()).cloned().collect();
      return Ok(Value::tuple(items));
    }
    (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
      let times = n.as_int().unwrap_or(0);
      let chars: Vec<char> = s.chars().collect();
      let repeated: String = repeat(&chars, times, max_len)?.into_iter().collect();
      return Ok(Value::str(repeated));
    }
    (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
      if n.as_int().is_some() =>
    {
      let items = items.borrow().clone();
      return Ok(Value::list(repeat(&items, n.as_int().unwrap_or(0), max_len)?));
    }
    (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
      if n.as_int().is_some() =>
    {
      return Ok(Value::tuple(repeat(items, n.as_int().unwrap_or(0), max_len)?));
    }
    _ => {}
  }

  let (Some(a), Some(b)) = (numeric(left), numeric(right)) else {
    return Err(ScriptError::type_error(format!(
      "unsupported operand type(s) for {}: '{}' and '{}'",
      op_symbol(op),
      left.type_name(),
      right.type_name()
    )));
  };
  float_binary(op, a, b)
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value> {
  let value = match op {
    BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
    BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
    BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
    BinOp::Div => {
      if b == 0 {
        return Err(zero_division("division by zero"));
      }
      return Ok(Value::Float(a as f64 / b as f64));
    }
    BinOp::FloorDiv => floor_div(a, b)?,
    BinOp::Mod => floor_mod(a, b)?,
    BinOp::Pow => {
      if b < 0 {
        return float_binary(op, a as f64, b as f64);
      }
      let exponent = u32::try_from(b).map_err(|_| overflow())?;
      a.checked_pow(exponent).ok_or_else(overflow)?
    }
  };
  Ok(Value::Int(value))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Value> {
  let value = match op {
    BinOp::Add => a + b,
    BinOp::Sub => a - b,
    BinOp::Mul => a * b,
    BinOp::Div => {
      if b == 0.0 {
        return Err(zero_division("float division by zero"));
      }
      a / b
    }
    BinOp::FloorDiv => {
      if b == 0.0 {
        return Err(zero_division("float floor division by zero"));
      }
      (a / b).floor()
    }
    BinOp::Mod => {
      if b == 0.0 {
        return Err(zero_division("float modulo"));
      }
      a - b * (a / b).floor()
    }
    BinOp::Pow => {
      if a == 0.0 && b < 0.0 {
        return Err(zero_division("0.0 cannot be raised to a negative power"));
      }
      a.powf(b)
    }
  };
  Ok(Value::Float(value))
}

/// 比较运算（链式比较由解释器展开）
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
  let ordered = |symbol: &str, accept: fn(Ordering) -> bool| -> Result<bool> {
    Ok(left.py_cmp(right, symbol)?.is_some_and(accept))
  };
  match op {
    CmpOp::Eq => Ok(left.py_eq(right)),
    CmpOp::NotEq => Ok(!left.py_eq(right)),
    CmpOp::Lt => ordered("<", Ordering::is_lt),
    CmpOp::LtE => ordered("<=", Ordering::is_le),
    CmpOp::Gt => ordered(">", Ordering::is_gt),
    CmpOp::GtE => ordered(">=", Ordering::is_ge),
    CmpOp::In => right.contains(left),
    CmpOp::NotIn => Ok(!right.contains(left)?),
    CmpOp::Is => Ok(left.is_same(right)),
    CmpOp::IsNot => Ok(!left.is_same(right)),
  }
}

struct FormatSpec {
  fill: char,
  align: Option<char>,
  sign: Option<char>,
  width: usize,
  grouping: bool,
  precision: Option<usize>,
  kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<FormatSpec> {
  let invalid = || ScriptError::value_error(format!("Invalid format specifier '{}'", spec));
  let chars: Vec<char> = spec.chars().collect();
  let mut i = 0;
  let mut parsed = FormatSpec {
    fill: ' ',
    align: None,
    sign: None,
    width: 0,
    grouping: false,
    precision: None,
    kind: None,
  };

  let is_align = |c: &char| matches!(c, '<' | '>' | '^' | '=');
  if chars.len() >= 2 && is_align(&chars[1]) {
    parsed.fill = chars[0];
    parsed.align = Some(chars[1]);
    i = 2;
  } else if chars.first().is_some_and(is_align) {
    parsed.align = chars.first().copied();
    i = 1;
  }
  if let Some(&c) = chars.get(i)
    && matches!(c, '+' | '-' | ' ')
  {
    parsed.sign = Some(c);
    i += 1;
  }
  if chars.get(i) == Some(&'0') {
    parsed.fill = '0';
    if parsed.align.is_none() {
      parsed.align = Some('=');
    }
    i += 1;
  }
  let start = i;
  while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
    i += 1;
  }
  if i > start {
    let digits: String = chars[start..i].iter().collect();
    parsed.width = digits.parse().map_err(|_| invalid())?;
  }
  if chars.get(i) == Some(&',') {
    parsed.grouping = true;
    i += 1;
  }
  if chars.get(i) == Some(&'.') {
    i += 1;
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
      i += 1;
    }
    let digits: String = chars[start..i].iter().collect();
    parsed.precision = Some(digits.parse().map_err(|_| invalid())?);
  }
  if let Some(&c) = chars.get(i) {
    parsed.kind = Some(c);
    i += 1;
  }
  if i != chars.len() {
    return Err(invalid());
  }
  Ok(parsed)
}

fn group_thousands(digits: &str) -> String {
  let (int_part, rest) = match digits.find('.') {
    Some(p) => digits.split_at(p),
    None => (digits, ""),
  };
  let mut out = String::new();
  for (i, c) in int_part.chars().enumerate() {
    if i > 0 && (int_part.len() - i) % 3 == 0 {
      out.push(',');
    }
    out.push(c);
  }
  out.push_str(rest);
  out
}

fn python_exponent(text: String) -> String {
  match text.split_once('e') {
    Some((mantissa, exponent)) => {
      let exponent: i32 = exponent.parse().unwrap_or(0);
      let sign = if exponent < 0 { '-' } else { '+' };
      format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
    None => text,
  }
}

/// 按格式说明（`.2f`、`>5`、`d` 等）格式化，用于 f-string 与 `str.format`
pub fn format_value(value: &Value, spec: &str) -> Result<String> {
  if spec.is_empty() {
    return Ok(value.to_str());
  }
  let spec = parse_spec(spec)?;
  let unknown = |code: char| {
    ScriptError::value_error(format!(
      "Unknown format code '{}' for object of type '{}'",
      code,
      value.type_name()
    ))
  };

  let is_number = numeric(value).is_some();
  let (negative, body) = match spec.kind {
    Some(code @ ('f' | 'F' | 'e' | 'E' | '%')) => {
      let x = numeric(value).ok_or_else(|| unknown(code))?;
      let precision = spec.precision.unwrap_or(6);
      let magnitude = x.abs();
      let body = match code {
        'e' | 'E' => python_exponent(format!("{:.*e}", precision, magnitude)),
        '%' => format!("{:.*}%", precision, magnitude * 100.0),
        _ => format!("{:.*}", precision, magnitude),
      };
      let body = if code == 'E' { body.to_uppercase() } else { body };
      (x.is_sign_negative() && x != 0.0, body)
    }
    Some('d') => {
      let i = value.as_int().ok_or_else(|| unknown('d'))?;
      (i < 0, i.unsigned_abs().to_string())
    }
    Some('s') | None if !is_number => {
      let text = value.to_str();
      let text = match spec.precision {
        Some(p) => text.chars().take(p).collect(),
        None => text,
      };
      (false, text)
    }
    None => match (value, spec.precision) {
      (Value::Float(x), Some(p)) => (x.is_sign_negative() && *x != 0.0, format!("{:.*}", p, x.abs())),
      (Value::Float(x), None) => (x.is_sign_negative() && *x != 0.0, format_float(x.abs())),
      _ => {
        let i = value.as_int().unwrap_or(0);
        (i < 0, i.unsigned_abs().to_string())
      }
    },
    Some(code) => return Err(unknown(code)),
  };

  let body = if spec.grouping { group_thousands(&body) } else { body };
  let sign = match (negative, spec.sign) {
    (true, _) => "-",
    (false, Some('+')) if is_number => "+",
    (false, Some(' ')) if is_number => " ",
    _ => "",
  };

  let len = sign.chars().count() + body.chars().count();
  let pad = spec.width.saturating_sub(len);
  let fill = |n: usize| std::iter::repeat_n(spec.fill, n).collect::<String>();
  let align = spec.align.unwrap_or(if is_number { '>' } else { '<' });
  Ok(match align {
    '<' => format!("{}{}{}", sign, body, fill(pad)),
    '^' => format!("{}{}{}{}", fill(pad / 2), sign, body, fill(pad - pad / 2)),
    '=' => format!("{}{}{}", sign, fill(pad), body),
    _ => format!("{}{}{}", fill(pad), sign, body),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truthiness_follows_python() {
    assert!(!Value::None.truthy());
    assert!(!Value::Int(0).truthy());
    assert!(!Value::str("").truthy());
    assert!(!Value::list(vec![]).truthy());
    assert!(Value::list(vec![Value::None]).truthy());
    assert!(Value::Float(0.1).truthy());
  }

  #[test]
  fn repr_and_str() {
    let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.0)]);
    assert_eq!(list.repr(), "[1, 'a', 2.0]");
    assert_eq!(Value::str("it's").repr(), "\"it's\"");
    assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
    assert_eq!(Value::Bool(true).to_str(), "True");
    assert_eq!(Value::str("plain").to_str(), "plain");
  }

  #[test]
  fn arithmetic_semantics() {
    let max = 1000;
    let eval = |op, a: i64, b: i64| binary(op, &Value::Int(a), &Value::Int(b), max).unwrap();
    assert!(eval(BinOp::FloorDiv, -7, 2).py_eq(&Value::Int(-4)));
    assert!(eval(BinOp::Mod, -7, 3).py_eq(&Value::Int(2)));
    assert!(eval(BinOp::Div, 7, 2).py_eq(&Value::Float(3.5)));
    assert!(eval(BinOp::Pow, 2, 10).py_eq(&Value::Int(1024)));
    assert!(
      binary(BinOp::Add, &Value::Bool(true), &Value::Int(1), max)
        .unwrap()
        .py_eq(&Value::Int(2))
    );

    let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), max).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ZeroDivisionError));

    let err = binary(BinOp::Add, &Value::Int(1), &Value::str("a"), max).unwrap_err();
    assert_eq!(
      err.to_string(),
      "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
    );
  }

  #[test]
  fn repetition_respects_length_limit() {
    let list = Value::list(vec![Value::Int(0)]);
    assert!(binary(BinOp::Mul, &list, &Value::Int(10), 10).is_ok());
    assert!(matches!(
      binary(BinOp::Mul, &list, &Value::Int(11), 10),
      Err(ScriptError::ResourceExhausted { .. })
    ));
  }

  #[test]
  fn comparisons() {
    assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
    assert!(compare(CmpOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap());
    assert!(compare(CmpOp::In, &Value::str("app"), &Value::str("apple")).unwrap());
    assert!(
      compare(
        CmpOp::Lt,
        &Value::tuple(vec![Value::Int(1), Value::Int(2)]),
        &Value::tuple(vec![Value::Int(1), Value::Int(3)])
      )
      .unwrap()
    );
    assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
    assert!(compare(CmpOp::Lt, &Value::str("a"), &Value::Int(1)).is_err());
  }

  #[test]
  fn format_specs() {
    assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
    assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
    assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
    assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
    assert_eq!(format_value(&Value::str("ab"), "^6").unwrap(), "  ab  ");
    assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
    assert_eq!(format_value(&Value::Float(1500.0), ".2e").unwrap(), "1.50e+03");
    assert!(format_value(&Value::Float(1.5), "d").is_err());
  }

  #[test]
  fn range_length_and_membership() {
    let r = Range { start: 0, stop: 10, step: 3 };
    assert_eq!(r.len(), 4);
    assert!(r.contains(9));
    assert!(!r.contains(10));
    let r = Range { start: 5, stop: 0, step: -2 };
    assert_eq!(r.len(), 3);
    assert_eq!(r.get(2), 1);
  }
}
