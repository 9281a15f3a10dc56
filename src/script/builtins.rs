// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/builtins.rs - 例程可用的内建函数与方法
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

use std::cmp::Ordering;

use super::{
  ast::BinOp,
  error::{ErrorKind, ScriptError},
  interp::Interpreter,
  value::{self, Dict, Range, Value},
};

type Result<T> = std::result::Result<T, ScriptError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
  Print,
  Len,
  Str,
  Int,
  Float,
  Bool,
  Abs,
  Min,
  Max,
  Sum,
  Round,
  Range,
  Sorted,
  Reversed,
  Enumerate,
  Zip,
  List,
  Tuple,
  Dict,
  Any,
  All,
  IsInstance,
}

impl Builtin {
  pub const ALL: [Builtin; 22] = [
    Builtin::Print,
    Builtin::Len,
    Builtin::Str,
    Builtin::Int,
    Builtin::Float,
    Builtin::Bool,
    Builtin::Abs,
    Builtin::Min,
    Builtin::Max,
    Builtin::Sum,
    Builtin::Round,
    Builtin::Range,
    Builtin::Sorted,
    Builtin::Reversed,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::List,
    Builtin::Tuple,
    Builtin::Dict,
    Builtin::Any,
    Builtin::All,
    Builtin::IsInstance,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Builtin::Print => "print",
      Builtin::Len => "len",
      Builtin::Str => "str",
      Builtin::Int => "int",
      Builtin::Float => "float",
      Builtin::Bool => "bool",
      Builtin::Abs => "abs",
      Builtin::Min => "min",
      Builtin::Max => "max",
      Builtin::Sum => "sum",
      Builtin::Round => "round",
      Builtin::Range => "range",
      Builtin::Sorted => "sorted",
      Builtin::Reversed => "reversed",
      Builtin::Enumerate => "enumerate",
      Builtin::Zip => "zip",
      Builtin::List => "list",
      Builtin::Tuple => "tuple",
      Builtin::Dict => "dict",
      Builtin::Any => "any",
      Builtin::All => "all",
      Builtin::IsInstance => "isinstance",
    }
  }
}

const LIST_METHODS: &[&str] = &[
  "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy", "clear",
];

const DICT_METHODS: &[&str] = &[
  "keys", "values", "items", "get", "pop", "update", "copy", "clear", "setdefault",
];

const STR_METHODS: &[&str] = &[
  "lower", "upper", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith", "endswith", "find",
  "count", "format", "capitalize", "title", "isdigit", "isalpha",
];

pub fn has_method(receiver: &Value, name: &str) -> bool {
  match receiver {
    Value::List(_) => LIST_METHODS.contains(&name),
    Value::Dict(_) => DICT_METHODS.contains(&name),
    Value::Str(_) => STR_METHODS.contains(&name),
    _ => false,
  }
}

/// 调用参数，按名字取出关键字参数后检查剩余
struct CallArgs {
  name: String,
  positional: Vec<Value>,
  keywords: Vec<(String, Value)>,
}

impl CallArgs {
  fn new(name: impl Into<String>, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
    CallArgs {
      name: name.into(),
      positional,
      keywords,
    }
  }

  /// 取出关键字参数，显式传入的 `None` 视作未传
  fn keyword(&mut self, key: &str) -> Option<Value> {
    let i = self.keywords.iter().position(|(k, _)| k == key)?;
    match self.keywords.remove(i).1 {
      Value::None => None,
      value => Some(value),
    }
  }

  fn no_keywords(&self) -> Result<()> {
    match self.keywords.first() {
      Some((key, _)) => Err(ScriptError::type_error(format!(
        "{}() got an unexpected keyword argument '{}'",
        self.name, key
      ))),
      None => Ok(()),
    }
  }

  fn between(self, min: usize, max: usize) -> Result<Vec<Value>> {
    self.no_keywords()?;
    let given = self.positional.len();
    if given < min || given > max {
      let expected = if min == max {
        format!("exactly {}", min)
      } else if given < min {
        format!("at least {}", min)
      } else {
        format!("at most {}", max)
      };
      return Err(ScriptError::type_error(format!(
        "{}() takes {} argument(s) ({} given)",
        self.name, expected, given
      )));
    }
    Ok(self.positional)
  }

  fn exact<const N: usize>(self) -> Result<[Value; N]> {
    let values = self.between(N, N)?;
    <[Value; N]>::try_from(values)
      .map_err(|_| ScriptError::raise(ErrorKind::RuntimeError, "argument count mismatch"))
  }

  /// 取出至多 N 个位置参数，缺省位置为 `None`
  fn optional<const N: usize>(self) -> Result<[Option<Value>; N]> {
    let values = self.between(0, N)?;
    let mut out: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (slot, value) in out.iter_mut().zip(values) {
      *slot = Some(value);
    }
    Ok(out)
  }
}

fn int_arg(value: &Value, what: &str) -> Result<i64> {
  value.as_int().ok_or_else(|| {
    ScriptError::type_error(format!(
      "'{}' object cannot be interpreted as an integer ({})",
      value.type_name(),
      what
    ))
  })
}

fn str_arg<'v>(value: &'v Value, what: &str) -> Result<&'v str> {
  match value {
    Value::Str(text) => Ok(text),
    other => Err(ScriptError::type_error(format!(
      "{} must be str, not {}",
      what,
      other.type_name()
    ))),
  }
}

fn length(value: &Value) -> Result<usize> {
  Ok(match value {
    Value::Str(text) => text.chars().count(),
    Value::List(items) => items.borrow().len(),
    Value::Tuple(items) => items.len(),
    Value::Dict(dict) => dict.borrow().len(),
    Value::Range(range) => range.len(),
    other => {
      return Err(ScriptError::type_error(format!(
        "object of type '{}' has no len()",
        other.type_name()
      )));
    }
  })
}

fn parse_int(text: &str) -> Result<i64> {
  let cleaned = text.trim().replace('_', "");
  cleaned.parse::<i64>().map_err(|_| {
    ScriptError::value_error(format!(
      "invalid literal for int() with base 10: '{}'",
      text
    ))
  })
}

fn parse_float(text: &str) -> Result<f64> {
  let cleaned = text.trim().to_lowercase();
  let parsed = match cleaned.as_str() {
    "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
    "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
    "nan" | "+nan" | "-nan" => Some(f64::NAN),
    other => other.replace('_', "").parse::<f64>().ok(),
  };
  parsed.ok_or_else(|| {
    ScriptError::value_error(format!("could not convert string to float: '{}'", text))
  })
}

fn to_int(value: &Value) -> Result<i64> {
  match value {
    Value::Float(f) => {
      if f.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
      }
      if f.is_infinite() || f.abs() >= i64::MAX as f64 {
        return Err(ScriptError::raise(
          ErrorKind::OverflowError,
          "cannot convert float infinity to integer",
        ));
      }
      Ok(f.trunc() as i64)
    }
    Value::Str(text) => parse_int(text),
    other => other.as_int().ok_or_else(|| {
      ScriptError::type_error(format!(
        "int() argument must be a string or a number, not '{}'",
        other.type_name()
      ))
    }),
  }
}

fn to_float(value: &Value) -> Result<f64> {
  match value {
    Value::Str(text) => parse_float(text),
    other => other.as_f64().ok_or_else(|| {
      ScriptError::type_error(format!(
        "float() argument must be a string or a number, not '{}'",
        other.type_name()
      ))
    }),
  }
}

fn round_value(number: &Value, digits: Option<Value>) -> Result<Value> {
  let digits = match digits {
    Some(d) => Some(int_arg(&d, "ndigits")?),
    None => None,
  };
  match (number, digits) {
    (Value::Float(f), None) => to_int(&Value::Float(f.round_ties_even())).map(Value::Int),
    (Value::Float(f), Some(d)) => {
      let factor = 10f64.powi(d.clamp(-308, 308) as i32);
      Ok(Value::Float((f * factor).round_ties_even() / factor))
    }
    (other, _) => match other.as_int() {
      Some(i) => Ok(Value::Int(i)),
      None => Err(ScriptError::type_error(format!(
        "type {} doesn't define __round__ method",
        other.type_name()
      ))),
    },
  }
}

/// 稳定排序；比较失败时返回第一次遇到的错误
pub(super) fn sort_values(
  interp: &mut Interpreter<'_>,
  items: Vec<Value>,
  key: Option<Value>,
  reverse: bool,
) -> Result<Vec<Value>> {
  let keys = match &key {
    Some(func) => items
      .iter()
      .map(|item| interp.call(func, vec![item.clone()], vec![]))
      .collect::<Result<Vec<_>>>()?,
    None => items.clone(),
  };

  let mut order: Vec<usize> = (0..items.len()).collect();
  let mut failure: Option<ScriptError> = None;
  order.sort_by(|&a, &b| {
    let ordering = match keys[a].py_cmp(&keys[b], "<") {
      Ok(ordering) => ordering.unwrap_or(Ordering::Equal),
      Err(e) => {
        if failure.is_none() {
          failure = Some(e);
        }
        Ordering::Equal
      }
    };
    if reverse { ordering.reverse() } else { ordering }
  });
  if let Some(e) = failure {
    return Err(e);
  }
  Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn extreme(interp: &mut Interpreter<'_>, mut call: CallArgs, want: Ordering) -> Result<Value> {
  let key = call.keyword("key");
  let default = call.keyword("default");
  call.no_keywords()?;
  let name = call.name.clone();

  let candidates = match call.positional.len() {
    0 => {
      return Err(ScriptError::type_error(format!(
        "{} expected at least 1 argument, got 0",
        name
      )));
    }
    1 => interp.iterate(&call.positional[0])?,
    _ => call.positional,
  };

  let mut best: Option<(Value, Value)> = None;
  for item in candidates {
    let k = match &key {
      Some(func) => interp.call(func, vec![item.clone()], vec![])?,
      None => item.clone(),
    };
    let replace = match &best {
      None => true,
      Some((_, best_key)) => k.py_cmp(best_key, if want == Ordering::Less { "<" } else { ">" })? == Some(want),
    };
    if replace {
      best = Some((item, k));
    }
  }

  match (best, default) {
    (Some((item, _)), _) => Ok(item),
    (None, Some(default)) => Ok(default),
    (None, None) => Err(ScriptError::value_error(format!(
      "{}() arg is an empty sequence",
      name
    ))),
  }
}

fn build_dict(interp: &mut Interpreter<'_>, source: Option<Value>, extra: Vec<(String, Value)>) -> Result<Dict> {
  let mut dict = match source {
    Some(Value::Dict(existing)) => existing.borrow().clone(),
    Some(pairs) => {
      let mut dict = Dict::default();
      for pair in interp.iterate(&pairs)? {
        let parts = interp.iterate(&pair)?;
        let [key, value] = <[Value; 2]>::try_from(parts).map_err(|parts| {
          ScriptError::value_error(format!(
            "dictionary update sequence element has length {}; 2 is required",
            parts.len()
          ))
        })?;
        dict.insert(key, value)?;
      }
      dict
    }
    None => Dict::default(),
  };
  for (key, value) in extra {
    dict.insert(Value::str(key), value)?;
  }
  Ok(dict)
}

fn type_matches(value: &Value, type_name: &str) -> bool {
  match type_name {
    "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
    "float" => matches!(value, Value::Float(_)),
    other => value.type_name() == other,
  }
}

pub fn call(
  interp: &mut Interpreter<'_>,
  builtin: Builtin,
  args: Vec<Value>,
  kwargs: Vec<(String, Value)>,
) -> Result<Value> {
  let mut call = CallArgs::new(builtin.name(), args, kwargs);
  let value = match builtin {
    Builtin::Print => {
      let sep = call.keyword("sep").map(|v| v.to_str()).unwrap_or_else(|| " ".to_string());
      let end = call.keyword("end").map(|v| v.to_str()).unwrap_or_else(|| "\n".to_string());
      call.no_keywords()?;
      let parts: Vec<String> = call.positional.iter().map(Value::to_str).collect();
      let text = parts.join(&sep) + &end;
      interp.emit(&text);
      Value::None
    }
    Builtin::Len => {
      let [x] = call.exact()?;
      Value::Int(length(&x)? as i64)
    }
    Builtin::Str => match call.optional::<1>()? {
      [Some(x)] => Value::str(x.to_str()),
      [None] => Value::str(""),
    },
    Builtin::Int => match call.optional::<1>()? {
      [Some(x)] => Value::Int(to_int(&x)?),
      [None] => Value::Int(0),
    },
    Builtin::Float => match call.optional::<1>()? {
      [Some(x)] => Value::Float(to_float(&x)?),
      [None] => Value::Float(0.0),
    },
    Builtin::Bool => match call.optional::<1>()? {
      [Some(x)] => Value::Bool(x.truthy()),
      [None] => Value::Bool(false),
    },
    Builtin::Abs => {
      let [x] = call.exact()?;
      match x {
        Value::Float(f) => Value::Float(f.abs()),
        other => match other.as_int() {
          Some(i) => Value::Int(i.checked_abs().ok_or_else(|| {
            ScriptError::raise(ErrorKind::OverflowError, "integer result too large")
          })?),
          None => {
            return Err(ScriptError::type_error(format!(
              "bad operand type for abs(): '{}'",
              other.type_name()
            )));
          }
        },
      }
    }
    Builtin::Min => extreme(interp, call, Ordering::Less)?,
    Builtin::Max => extreme(interp, call, Ordering::Greater)?,
    Builtin::Sum => {
      let start = call.keyword("start");
      let [iterable, second] = call.optional::<2>()?;
      let Some(iterable) = iterable else {
        return Err(ScriptError::type_error("sum() takes at least 1 positional argument (0 given)"));
      };
      let mut total = second.or(start).unwrap_or(Value::Int(0));
      for item in interp.iterate(&iterable)? {
        total = value::binary(BinOp::Add, &total, &item, interp.limits().max_collection_len)?;
      }
      total
    }
    Builtin::Round => {
      let digits = call.keyword("ndigits");
      let [number, second] = call.optional::<2>()?;
      let Some(number) = number else {
        return Err(ScriptError::type_error("round() missing required argument 'number'"));
      };
      round_value(&number, second.filter(|v| !matches!(v, Value::None)).or(digits))?
    }
    Builtin::Range => {
      let values = call.between(1, 3)?;
      let ints = values
        .iter()
        .map(|v| int_arg(v, "range"))
        .collect::<Result<Vec<_>>>()?;
      let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
      };
      if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
      }
      Value::Range(Range { start, stop, step })
    }
    Builtin::Sorted => {
      let key = call.keyword("key");
      let reverse = call.keyword("reverse").is_some_and(|v| v.truthy());
      let [iterable] = call.exact()?;
      let items = interp.iterate(&iterable)?;
      Value::list(sort_values(interp, items, key, reverse)?)
    }
    Builtin::Reversed => {
      let [sequence] = call.exact()?;
      let mut items = interp.iterate(&sequence)?;
      items.reverse();
      Value::list(items)
    }
    Builtin::Enumerate => {
      let start = call.keyword("start");
      let [iterable, second] = call.optional::<2>()?;
      let Some(iterable) = iterable else {
        return Err(ScriptError::type_error("enumerate() missing required argument 'iterable'"));
      };
      let start = match second.or(start) {
        Some(v) => int_arg(&v, "start")?,
        None => 0,
      };
      let items = interp.iterate(&iterable)?;
      Value::list(
        items
          .into_iter()
          .enumerate()
          .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i64), item]))
          .collect(),
      )
    }
    Builtin::Zip => {
      call.no_keywords()?;
      let columns = call
        .positional
        .iter()
        .map(|v| interp.iterate(v))
        .collect::<Result<Vec<_>>>()?;
      let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
      Value::list(
        (0..rows)
          .map(|r| Value::tuple(columns.iter().map(|c| c[r].clone()).collect()))
          .collect(),
      )
    }
    Builtin::List => match call.optional::<1>()? {
      [Some(x)] => Value::list(interp.iterate(&x)?),
      [None] => Value::list(Vec::new()),
    },
    Builtin::Tuple => match call.optional::<1>()? {
      [Some(x)] => Value::tuple(interp.iterate(&x)?),
      [None] => Value::tuple(Vec::new()),
    },
    Builtin::Dict => {
      let extra = std::mem::take(&mut call.keywords);
      let [source] = call.optional::<1>()?;
      Value::dict(build_dict(interp, source, extra)?)
    }
    Builtin::Any => {
      let [iterable] = call.exact()?;
      Value::Bool(interp.iterate(&iterable)?.iter().any(Value::truthy))
    }
    Builtin::All => {
      let [iterable] = call.exact()?;
      Value::Bool(interp.iterate(&iterable)?.iter().all(Value::truthy))
    }
    Builtin::IsInstance => {
      let [object, class] = call.exact()?;
      let classes = match &class {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
      };
      let mut matched = false;
      for class in &classes {
        let Value::Function(function) = class else {
          return Err(ScriptError::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
          ));
        };
        if type_matches(&object, &function.name()) {
          matched = true;
        }
      }
      Value::Bool(matched)
    }
  };
  Ok(value)
}

/// 调用 list / dict / str 的方法
pub fn method(
  interp: &mut Interpreter<'_>,
  receiver: &Value,
  name: &str,
  args: Vec<Value>,
  kwargs: Vec<(String, Value)>,
) -> Result<Value> {
  let call = CallArgs::new(format!("{}.{}", receiver.type_name(), name), args, kwargs);
  match receiver {
    Value::List(list) => list_method(interp, list, name, call),
    Value::Dict(dict) => dict_method(interp, dict, name, call),
    Value::Str(text) => str_method(interp, text, name, call),
    other => Err(ScriptError::raise(
      ErrorKind::AttributeError,
      format!("'{}' object has no attribute '{}'", other.type_name(), name),
    )),
  }
}

fn no_such_method(type_name: &str, name: &str) -> ScriptError {
  ScriptError::raise(
    ErrorKind::AttributeError,
    format!("'{}' object has no attribute '{}'", type_name, name),
  )
}

fn list_method(
  interp: &mut Interpreter<'_>,
  list: &std::rc::Rc<std::cell::RefCell<Vec<Value>>>,
  name: &str,
  mut call: CallArgs,
) -> Result<Value> {
  let len = list.borrow().len();
  let value = match name {
    "append" => {
      let [item] = call.exact()?;
      interp.check_len(len + 1)?;
      list.borrow_mut().push(item);
      Value::None
    }
    "extend" => {
      let [iterable] = call.exact()?;
      let items = interp.iterate(&iterable)?;
      interp.check_len(len + items.len())?;
      list.borrow_mut().extend(items);
      Value::None
    }
    "insert" => {
      let [index, item] = call.exact()?;
      let index = int_arg(&index, "index")?;
      let at = if index < 0 {
        (index + len as i64).max(0) as usize
      } else {
        (index as usize).min(len)
      };
      interp.check_len(len + 1)?;
      list.borrow_mut().insert(at, item);
      Value::None
    }
    "pop" => {
      let [index] = call.optional::<1>()?;
      if len == 0 {
        return Err(ScriptError::raise(ErrorKind::IndexError, "pop from empty list"));
      }
      let index = match index {
        Some(v) => int_arg(&v, "index")?,
        None => -1,
      };
      let i = if index < 0 { index + len as i64 } else { index };
      if i < 0 || i >= len as i64 {
        return Err(ScriptError::raise(ErrorKind::IndexError, "pop index out of range"));
      }
      list.borrow_mut().remove(i as usize)
    }
    "remove" => {
      let [item] = call.exact()?;
      let position = list.borrow().iter().position(|v| v.py_eq(&item));
      match position {
        Some(i) => {
          list.borrow_mut().remove(i);
          Value::None
        }
        None => return Err(ScriptError::value_error("list.remove(x): x not in list")),
      }
    }
    "index" => {
      let [item] = call.exact()?;
      let position = list.borrow().iter().position(|v| v.py_eq(&item));
      match position {
        Some(i) => Value::Int(i as i64),
        None => return Err(ScriptError::value_error(format!("{} is not in list", item.repr()))),
      }
    }
    "count" => {
      let [item] = call.exact()?;
      let count = list.borrow().iter().filter(|v| v.py_eq(&item)).count();
      Value::Int(count as i64)
    }
    "sort" => {
      let key = call.keyword("key");
      let reverse = call.keyword("reverse").is_some_and(|v| v.truthy());
      call.between(0, 0)?;
      let items = list.borrow().clone();
      let sorted = sort_values(interp, items, key, reverse)?;
      *list.borrow_mut() = sorted;
      Value::None
    }
    "reverse" => {
      call.between(0, 0)?;
      list.borrow_mut().reverse();
      Value::None
    }
    "copy" => {
      call.between(0, 0)?;
      Value::list(list.borrow().clone())
    }
    "clear" => {
      call.between(0, 0)?;
      list.borrow_mut().clear();
      Value::None
    }
    other => return Err(no_such_method("list", other)),
  };
  Ok(value)
}

fn dict_method(
  interp: &mut Interpreter<'_>,
  dict: &std::rc::Rc<std::cell::RefCell<Dict>>,
  name: &str,
  mut call: CallArgs,
) -> Result<Value> {
  let value = match name {
    "keys" => {
      call.between(0, 0)?;
      Value::list(dict.borrow().keys())
    }
    "values" => {
      call.between(0, 0)?;
      Value::list(dict.borrow().values())
    }
    "items" => {
      call.between(0, 0)?;
      let items = dict
        .borrow()
        .items()
        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
        .collect();
      Value::list(items)
    }
    "get" => {
      let values = call.between(1, 2)?;
      let key = &values[0];
      key.check_hashable()?;
      let found = dict.borrow().get(key);
      found.or_else(|| values.get(1).cloned()).unwrap_or(Value::None)
    }
    "setdefault" => {
      let values = call.between(1, 2)?;
      let key = values[0].clone();
      key.check_hashable()?;
      let found = dict.borrow().get(&key);
      match found {
        Some(value) => value,
        None => {
          let default = values.get(1).cloned().unwrap_or(Value::None);
          dict.borrow_mut().insert(key, default.clone())?;
          default
        }
      }
    }
    "pop" => {
      let values = call.between(1, 2)?;
      let key = &values[0];
      key.check_hashable()?;
      let removed = dict.borrow_mut().remove(key);
      match (removed, values.get(1)) {
        (Some(value), _) => value,
        (None, Some(default)) => default.clone(),
        (None, None) => return Err(ScriptError::raise(ErrorKind::KeyError, key.repr())),
      }
    }
    "update" => {
      let extra = std::mem::take(&mut call.keywords);
      let [source] = call.optional::<1>()?;
      let updates = build_dict(interp, source, extra)?;
      let mut target = dict.borrow_mut();
      for (key, value) in updates.items() {
        target.insert(key.clone(), value.clone())?;
      }
      Value::None
    }
    "copy" => {
      call.between(0, 0)?;
      Value::dict(dict.borrow().clone())
    }
    "clear" => {
      call.between(0, 0)?;
      dict.borrow_mut().clear();
      Value::None
    }
    other => return Err(no_such_method("dict", other)),
  };
  Ok(value)
}

fn split_whitespace(text: &str, max_split: i64) -> Vec<String> {
  let mut out = Vec::new();
  let mut rest = text.trim_start();
  while !rest.is_empty() {
    if max_split >= 0 && out.len() as i64 == max_split {
      out.push(rest.to_string());
      break;
    }
    match rest.find(char::is_whitespace) {
      Some(p) => {
        out.push(rest[..p].to_string());
        rest = rest[p..].trim_start();
      }
      None => {
        out.push(rest.to_string());
        break;
      }
    }
  }
  out
}

fn strip_chars(chars: Option<Value>) -> Result<Option<Vec<char>>> {
  match chars {
    Some(v) => Ok(Some(str_arg(&v, "strip arg")?.chars().collect())),
    None => Ok(None),
  }
}

fn affix_matches(text: &str, affix: &Value, check: fn(&str, &str) -> bool) -> Result<bool> {
  match affix {
    Value::Tuple(options) => {
      for option in options.iter() {
        if check(text, str_arg(option, "tuple for startswith")?) {
          return Ok(true);
        }
      }
      Ok(false)
    }
    other => Ok(check(text, str_arg(other, "prefix")?)),
  }
}

/// `str.format` 的替换字段
fn format_template(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<String> {
  let mut out = String::new();
  let mut chars = template.chars().peekable();
  let mut auto = 0usize;
  while let Some(c) = chars.next() {
    match c {
      '{' if chars.peek() == Some(&'{') => {
        chars.next();
        out.push('{');
      }
      '}' if chars.peek() == Some(&'}') => {
        chars.next();
        out.push('}');
      }
      '{' => {
        let mut field = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          field.push(c);
        }
        if !closed {
          return Err(ScriptError::value_error("Single '{' encountered in format string"));
        }
        let (name, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
        let name = name.split_once('!').map(|(n, _)| n).unwrap_or(name);
        let value = if name.is_empty() {
          let value = args.get(auto).cloned();
          auto += 1;
          value.ok_or_else(|| {
            ScriptError::raise(
              ErrorKind::IndexError,
              format!("Replacement index {} out of range for positional args tuple", auto - 1),
            )
          })?
        } else if let Ok(index) = name.parse::<usize>() {
          args.get(index).cloned().ok_or_else(|| {
            ScriptError::raise(
              ErrorKind::IndexError,
              format!("Replacement index {} out of range for positional args tuple", index),
            )
          })?
        } else {
          kwargs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ScriptError::raise(ErrorKind::KeyError, format!("'{}'", name)))?
        };
        out.push_str(&value::format_value(&value, spec)?);
      }
      '}' => {
        return Err(ScriptError::value_error("Single '}' encountered in format string"));
      }
      c => out.push(c),
    }
  }
  Ok(out)
}

fn str_method(interp: &mut Interpreter<'_>, text: &str, name: &str, mut call: CallArgs) -> Result<Value> {
  let value = match name {
    "lower" => {
      call.between(0, 0)?;
      Value::str(text.to_lowercase())
    }
    "upper" => {
      call.between(0, 0)?;
      Value::str(text.to_uppercase())
    }
    "strip" | "lstrip" | "rstrip" => {
      let [chars] = call.optional::<1>()?;
      let chars = strip_chars(chars.filter(|v| !matches!(v, Value::None)))?;
      let stripped = match (name, &chars) {
        ("strip", None) => text.trim(),
        ("lstrip", None) => text.trim_start(),
        (_, None) => text.trim_end(),
        ("strip", Some(set)) => text.trim_matches(|c| set.contains(&c)),
        ("lstrip", Some(set)) => text.trim_start_matches(|c| set.contains(&c)),
        (_, Some(set)) => text.trim_end_matches(|c| set.contains(&c)),
      };
      Value::str(stripped)
    }
    "split" => {
      let sep = call.keyword("sep");
      let max_split = call.keyword("maxsplit");
      let [sep_pos, max_pos] = call.optional::<2>()?;
      let sep = sep_pos.filter(|v| !matches!(v, Value::None)).or(sep);
      let max_split = match max_pos.or(max_split) {
        Some(v) => int_arg(&v, "maxsplit")?,
        None => -1,
      };
      let parts: Vec<String> = match sep {
        None => split_whitespace(text, max_split),
        Some(sep) => {
          let sep = str_arg(&sep, "sep")?;
          if sep.is_empty() {
            return Err(ScriptError::value_error("empty separator"));
          }
          if max_split < 0 {
            text.split(sep).map(str::to_string).collect()
          } else {
            text.splitn(max_split as usize + 1, sep).map(str::to_string).collect()
          }
        }
      };
      interp.check_len(parts.len())?;
      Value::list(parts.into_iter().map(Value::str).collect())
    }
    "join" => {
      let [iterable] = call.exact()?;
      let items = interp.iterate(&iterable)?;
      let mut parts = Vec::with_capacity(items.len());
      for (i, item) in items.iter().enumerate() {
        match item {
          Value::Str(s) => parts.push(s.to_string()),
          other => {
            return Err(ScriptError::type_error(format!(
              "sequence item {}: expected str instance, {} found",
              i,
              other.type_name()
            )));
          }
        }
      }
      let joined = parts.join(text);
      interp.check_len(joined.len())?;
      Value::str(joined)
    }
    "replace" => {
      let values = call.between(2, 3)?;
      let old = str_arg(&values[0], "replace() argument 1")?;
      let new = str_arg(&values[1], "replace() argument 2")?;
      let replaced = match values.get(2) {
        Some(count) => {
          let count = int_arg(count, "count")?;
          if count < 0 {
            text.replace(old, new)
          } else {
            text.replacen(old, new, count as usize)
          }
        }
        None => text.replace(old, new),
      };
      interp.check_len(replaced.len())?;
      Value::str(replaced)
    }
    "startswith" => {
      let [prefix] = call.exact()?;
      Value::Bool(affix_matches(text, &prefix, |t, p| t.starts_with(p))?)
    }
    "endswith" => {
      let [suffix] = call.exact()?;
      Value::Bool(affix_matches(text, &suffix, |t, s| t.ends_with(s))?)
    }
    "find" => {
      let [needle] = call.exact()?;
      let needle = str_arg(&needle, "find() argument")?;
      match text.find(needle) {
        Some(byte) => Value::Int(text[..byte].chars().count() as i64),
        None => Value::Int(-1),
      }
    }
    "count" => {
      let [needle] = call.exact()?;
      let needle = str_arg(&needle, "count() argument")?;
      let count = if needle.is_empty() {
        text.chars().count() + 1
      } else {
        text.matches(needle).count()
      };
      Value::Int(count as i64)
    }
    "format" => {
      let kwargs = std::mem::take(&mut call.keywords);
      let formatted = format_template(text, &call.positional, &kwargs)?;
      interp.check_len(formatted.len())?;
      Value::str(formatted)
    }
    "capitalize" => {
      call.between(0, 0)?;
      let mut chars = text.chars();
      let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
      };
      Value::str(capitalized)
    }
    "title" => {
      call.between(0, 0)?;
      let mut out = String::with_capacity(text.len());
      let mut previous_cased = false;
      for c in text.chars() {
        if c.is_alphabetic() {
          if previous_cased {
            out.extend(c.to_lowercase());
          } else {
            out.extend(c.to_uppercase());
          }
          previous_cased = true;
        } else {
          out.push(c);
          previous_cased = false;
        }
      }
      Value::str(out)
    }
    "isdigit" => {
      call.between(0, 0)?;
      Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
    }
    "isalpha" => {
      call.between(0, 0)?;
      Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))
    }
    other => return Err(no_such_method("str", other)),
  };
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    capability::{CapabilitySurface, Host},
    detector::Detections,
    region::Region,
    script::{interp::ExecutionLimits, parser::parse_module},
  };

  struct NoHost;

  impl Host for NoHost {
    fn emit(&mut self, _text: &str) {}

    fn find(&mut self, _region: &Region, _expression: &str) -> Detections {
      Detections::Single(Vec::new())
    }

    fn caption(&mut self, _region: &Region) -> Option<String> {
      None
    }
  }

  /// 在函数体里执行若干行，返回最后一行 `return` 的值
  fn run(body: &str) -> Result<Value> {
    let mut source = String::from("def main():\n");
    for line in body.lines() {
      source.push_str("    ");
      source.push_str(line);
      source.push('\n');
    }
    let surface = CapabilitySurface::standard();
    let mut host = NoHost;
    let mut interp = Interpreter::new(&surface, &mut host, ExecutionLimits::default());
    let module = parse_module(&source)?;
    let globals = interp.run_module(&module)?;
    let main = globals
      .get("main")
      .ok_or_else(|| ScriptError::raise(ErrorKind::NameError, "main"))?;
    interp.call(&main, vec![], vec![])
  }

  fn repr(expr: &str) -> String {
    match run(&format!("return {expr}")) {
      Ok(value) => value.repr(),
      Err(e) => panic!("{expr}: {e}"),
    }
  }

  fn error_kind(body: &str) -> Option<ErrorKind> {
    run(body).unwrap_err().kind()
  }

  #[test]
  fn round_is_half_to_even() {
    assert_eq!(repr("round(2.5)"), "2");
    assert_eq!(repr("round(3.5)"), "4");
    assert_eq!(repr("round(-0.5)"), "0");
    assert_eq!(repr("round(-2.5)"), "-2");
    assert_eq!(repr("round(0.125, 2)"), "0.12");
    assert_eq!(repr("round(2.675, 2)"), "2.67");
    assert_eq!(repr("round(7, 1)"), "7");
    assert_eq!(repr("round(1.4999)"), "1");
    assert_eq!(error_kind("return round('1')"), Some(ErrorKind::TypeError));
  }

  #[test]
  fn floor_division_and_modulo_follow_the_divisor_sign() {
    assert_eq!(repr("-7 // 2"), "-4");
    assert_eq!(repr("7 // -2"), "-4");
    assert_eq!(repr("-7 % 2"), "1");
    assert_eq!(repr("7 % -2"), "-1");
    assert_eq!(error_kind("return 1 // 0"), Some(ErrorKind::ZeroDivisionError));
  }

  #[test]
  fn int_and_float_conversions() {
    assert_eq!(repr("int('  42 ')"), "42");
    assert_eq!(repr("int('-17')"), "-17");
    assert_eq!(repr("int('1_000')"), "1000");
    assert_eq!(repr("int(-3.7)"), "-3");
    assert_eq!(repr("int(True)"), "1");
    assert_eq!(repr("float('2.5')"), "2.5");
    assert_eq!(repr("str(1e16)"), "'1e+16'");
    assert_eq!(repr("f'{0.00001}'"), "'1e-05'");
    assert_eq!(error_kind("return int('4.2')"), Some(ErrorKind::ValueError));
    assert_eq!(error_kind("return int('')"), Some(ErrorKind::ValueError));
    assert_eq!(error_kind("return int([])"), Some(ErrorKind::TypeError));
    assert_eq!(error_kind("return float('apple')"), Some(ErrorKind::ValueError));
  }

  #[test]
  fn str_split() {
    assert_eq!(repr("'a, b,,c'.split(',')"), "['a', ' b', '', 'c']");
    assert_eq!(repr("'  a  b \\tc '.split()"), "['a', 'b', 'c']");
    assert_eq!(repr("'a b c'.split(None, 1)"), "['a', 'b c']");
    assert_eq!(repr("'a,b,c'.split(',', 1)"), "['a', 'b,c']");
    assert_eq!(repr("'a,b,c'.split(sep=',', maxsplit=1)"), "['a', 'b,c']");
    assert_eq!(repr("''.split()"), "[]");
    assert_eq!(repr("''.split(',')"), "['']");
    assert_eq!(error_kind("return 'abc'.split('')"), Some(ErrorKind::ValueError));
  }

  #[test]
  fn str_replace_and_friends() {
    assert_eq!(repr("'apple apple'.replace('apple', 'pear')"), "'pear pear'");
    assert_eq!(repr("'aaa'.replace('a', 'b', 2)"), "'bba'");
    assert_eq!(repr("'abc'.replace('', '-')"), "'-a-b-c-'");
    assert_eq!(repr("' x '.strip()"), "'x'");
    assert_eq!(repr("'xxhixx'.strip('x')"), "'hi'");
    assert_eq!(repr("', '.join(['a', 'b'])"), "'a, b'");
    assert_eq!(repr("'banana'.find('na')"), "2");
    assert_eq!(repr("'banana'.count('a')"), "3");
    assert_eq!(repr("'{} of {n}'.format(1, n=2)"), "'1 of 2'");
    assert_eq!(error_kind("return ', '.join([1])"), Some(ErrorKind::TypeError));
  }

  #[test]
  fn list_index_pop_insert() {
    assert_eq!(repr("[5, 6, 7].index(6)"), "1");
    assert_eq!(
      run("xs = [1, 2, 3]\nreturn xs.index(9)")
        .unwrap_err()
        .to_string(),
      "ValueError: 9 is not in list (line 3)"
    );
    assert_eq!(repr("[1, 2, 3].pop()"), "3");
    assert_eq!(repr("[1, 2, 3].pop(0)"), "1");
    assert_eq!(repr("[1, 2, 3].pop(-2)"), "2");
    assert_eq!(error_kind("return [].pop()"), Some(ErrorKind::IndexError));
    assert_eq!(error_kind("return [1].pop(5)"), Some(ErrorKind::IndexError));

    let inserted = "xs = [1, 2, 3]\nxs.insert(-1, 9)\nxs.insert(100, 8)\nxs.insert(-100, 0)\nreturn xs";
    assert_eq!(run(inserted).unwrap().repr(), "[0, 1, 2, 9, 3, 8]");
  }

  #[test]
  fn min_and_max_with_key_and_default() {
    assert_eq!(repr("max(['a', 'ccc', 'bb'], key=len)"), "'ccc'");
    assert_eq!(repr("min(['a', 'ccc', 'bb'], key=len)"), "'a'");
    assert_eq!(repr("max([(1, 'a'), (1, 'b')], key=lambda p: p[0])"), "(1, 'a')");
    assert_eq!(repr("min([(1, 'a'), (1, 'b')], key=lambda p: p[0])"), "(1, 'a')");
    assert_eq!(repr("min(3, 1, 2)"), "1");
    assert_eq!(repr("max([], default=-1)"), "-1");
    assert_eq!(error_kind("return max([])"), Some(ErrorKind::ValueError));
    assert_eq!(error_kind("return min(1, 'a')"), Some(ErrorKind::TypeError));
  }
}
