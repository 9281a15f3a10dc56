// 该文件是 Shanan （山南西风） 项目的一部分。
// src/capability.rs - 例程可见的能力表
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

//! 例程在执行时只能解析到两类名字：自己的局部变量，以及这里登记的条目。
//! 条目包括语言内建函数（`print`、`len` 等）和检测领域能力
//! （`ImagePatch`、`delete_overlaps`、`delete_large_box`、`dist`、`formatting_answer`）。
//!
//! 领域能力需要与外界交互（输出、检测、描述），这些交互统一经过 [`Host`]。

use std::{cell::RefCell, rc::Rc};

use crate::{
  detector::Detections,
  format,
  geometry::{self, OVERSIZED_HEIGHT},
  region::Region,
  script::{Builtin, Dict, ErrorKind, Function, ScriptError, Value},
};

type Result<T> = std::result::Result<T, ScriptError>;

/// 例程与外界交互的出口
pub trait Host {
  /// 追加到执行轨迹
  fn emit(&mut self, text: &str);
  /// 在区域内检测目标，坐标已换算回整张图
  fn find(&mut self, region: &Region, expression: &str) -> Detections;
  /// 描述区域内容；未配置描述模型时返回 `None`
  fn caption(&mut self, region: &Region) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  ImagePatch,
  DeleteOverlaps,
  DeleteLargeBox,
  Dist,
  FormattingAnswer,
}

impl Capability {
  pub const ALL: [Capability; 5] = [
    Capability::ImagePatch,
    Capability::DeleteOverlaps,
    Capability::DeleteLargeBox,
    Capability::Dist,
    Capability::FormattingAnswer,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Capability::ImagePatch => "ImagePatch",
      Capability::DeleteOverlaps => "delete_overlaps",
      Capability::DeleteLargeBox => "delete_large_box",
      Capability::Dist => "dist",
      Capability::FormattingAnswer => "formatting_answer",
    }
  }
}

/// 名字到值的显式映射
pub struct CapabilitySurface {
  entries: Vec<(&'static str, Value)>,
}

impl CapabilitySurface {
  pub fn standard() -> Self {
    let builtins = Builtin::ALL
      .iter()
      .map(|b| (b.name(), Value::Function(Function::Builtin(*b))));
    let capabilities = Capability::ALL
      .iter()
      .map(|c| (c.name(), Value::Function(Function::Capability(*c))));
    CapabilitySurface {
      entries: builtins.chain(capabilities).collect(),
    }
  }

  pub fn lookup(&self, name: &str) -> Option<Value> {
    self
      .entries
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v.clone())
  }

  pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.entries.iter().map(|(n, _)| *n)
  }
}

impl Default for CapabilitySurface {
  fn default() -> Self {
    Self::standard()
  }
}

/// 按参数名绑定位置参数与关键字参数
fn bind<const N: usize>(
  name: &str,
  params: [&str; N],
  args: Vec<Value>,
  kwargs: Vec<(String, Value)>,
) -> Result<[Option<Value>; N]> {
  if args.len() > N {
    return Err(ScriptError::type_error(format!(
      "{}() takes at most {} arguments ({} given)",
      name,
      N,
      args.len()
    )));
  }
  let mut slots: [Option<Value>; N] = std::array::from_fn(|_| None);
  for (slot, value) in slots.iter_mut().zip(args) {
    *slot = Some(value);
  }
  for (key, value) in kwargs {
    let Some(i) = params.iter().position(|p| *p == key) else {
      return Err(ScriptError::type_error(format!(
        "{}() got an unexpected keyword argument '{}'",
        name, key
      )));
    };
    if slots[i].is_some() {
      return Err(ScriptError::type_error(format!(
        "{}() got multiple values for argument '{}'",
        name, key
      )));
    }
    slots[i] = Some(value);
  }
  Ok(slots)
}

fn required(name: &str, param: &str, value: Option<Value>) -> Result<Value> {
  value.ok_or_else(|| {
    ScriptError::type_error(format!(
      "{}() missing required argument: '{}'",
      name, param
    ))
  })
}

fn as_region(value: &Value, what: &str) -> Result<Region> {
  match value {
    Value::Region(region) => Ok(*region),
    other => Err(ScriptError::type_error(format!(
      "{} must be ImagePatch, not {}",
      what,
      other.type_name()
    ))),
  }
}

type RegionList = Rc<RefCell<Vec<Value>>>;

fn region_list(value: &Value, what: &str) -> Result<(RegionList, Vec<Region>)> {
  let Value::List(items) = value else {
    return Err(ScriptError::type_error(format!(
      "{} must be a list of ImagePatch, not {}",
      what,
      value.type_name()
    )));
  };
  let regions = items
    .borrow()
    .iter()
    .map(|v| as_region(v, what))
    .collect::<Result<Vec<_>>>()?;
  Ok((items.clone(), regions))
}

fn regions_to_list(regions: Vec<Region>) -> Value {
  Value::list(regions.into_iter().map(Value::Region).collect())
}

/// 坐标允许整数或浮点（截断）
fn coordinate(value: &Value, what: &str) -> Result<i32> {
  let raw = match value {
    Value::Float(f) if f.is_finite() => f.trunc(),
    other => match other.as_int() {
      Some(i) => i as f64,
      None => {
        return Err(ScriptError::type_error(format!(
          "ImagePatch {} must be a number, not {}",
          what,
          other.type_name()
        )));
      }
    },
  };
  if raw < i32::MIN as f64 || raw > i32::MAX as f64 {
    return Err(ScriptError::raise(
      ErrorKind::OverflowError,
      format!("ImagePatch {} out of range", what),
    ));
  }
  Ok(raw as i32)
}

fn image_patch(args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value> {
  const PARAMS: [&str; 6] = ["image", "left", "lower", "right", "upper", "score"];
  let [image, left, lower, right, upper, score] = bind("ImagePatch", PARAMS, args, kwargs)?;
  let Value::Image(info) = required("ImagePatch", "image", image)? else {
    return Err(ScriptError::type_error("ImagePatch() expects the inspected image"));
  };

  let score = match score {
    Some(v) => v
      .as_f64()
      .ok_or_else(|| ScriptError::type_error("ImagePatch score must be a number"))?,
    None => 1.0,
  };
  let region = match (left, lower, right, upper) {
    (None, None, None, None) => Region::full(info.width, info.height).with_score(score),
    (Some(left), Some(lower), Some(right), Some(upper)) => Region::new(
      coordinate(&left, "left")?,
      coordinate(&upper, "upper")?,
      coordinate(&right, "right")?,
      coordinate(&lower, "lower")?,
      score,
    ),
    _ => {
      return Err(ScriptError::type_error(
        "ImagePatch() takes either no bounds or all of left, lower, right, upper",
      ));
    }
  }
  .map_err(|e| ScriptError::value_error(e.to_string()))?;
  Ok(Value::Region(region))
}

/// 执行一项领域能力
pub fn call(
  capability: Capability,
  args: Vec<Value>,
  kwargs: Vec<(String, Value)>,
  host: &mut dyn Host,
) -> Result<Value> {
  let name = capability.name();
  match capability {
    Capability::ImagePatch => image_patch(args, kwargs),
    Capability::DeleteOverlaps => {
      let [first, second] = bind(name, ["first", "second"], args, kwargs)?;
      let first = required(name, "first", first)?;
      let second = required(name, "second", second)?;
      let (first_list, mut first_regions) = region_list(&first, "first")?;
      let (second_list, mut second_regions) = region_list(&second, "second")?;
      geometry::delete_overlaps(&mut first_regions, &mut second_regions);
      *first_list.borrow_mut() = first_regions.into_iter().map(Value::Region).collect();
      *second_list.borrow_mut() = second_regions.into_iter().map(Value::Region).collect();
      Ok(Value::tuple(vec![first, second]))
    }
    Capability::DeleteLargeBox => {
      let [regions] = bind(name, ["regions"], args, kwargs)?;
      let (_, regions) = region_list(&required(name, "regions", regions)?, "regions")?;
      Ok(regions_to_list(geometry::drop_oversized(regions, OVERSIZED_HEIGHT)))
    }
    Capability::Dist => {
      let [a, b] = bind(name, ["a", "b"], args, kwargs)?;
      let a = as_region(&required(name, "a", a)?, "a")?;
      let b = as_region(&required(name, "b", b)?, "b")?;
      let dx = a.horizontal_center() - b.horizontal_center();
      let dy = a.vertical_center() - b.vertical_center();
      Ok(Value::Float(dx.hypot(dy)))
    }
    Capability::FormattingAnswer => {
      let [answer] = bind(name, ["answer"], args, kwargs)?;
      format::formatting_answer(&required(name, "answer", answer)?, host)
    }
  }
}

pub fn region_attribute(region: &Region, name: &str) -> Option<Value> {
  let int = |v: i32| Some(Value::Int(v as i64));
  match name {
    "x1" => int(region.x1()),
    "y1" => int(region.y1()),
    "x2" => int(region.x2()),
    "y2" => int(region.y2()),
    "left" => int(region.left()),
    "right" => int(region.right()),
    "upper" => int(region.upper()),
    "lower" => int(region.lower()),
    "width" => int(region.width()),
    "height" => int(region.height()),
    "horizontal_center" => Some(Value::Float(region.horizontal_center())),
    "vertical_center" => Some(Value::Float(region.vertical_center())),
    "detection_score" => Some(Value::Float(region.score())),
    "box" => Some(Value::list(
      region.bbox().iter().map(|v| Value::Int(*v as i64)).collect(),
    )),
    _ => None,
  }
}

const REGION_METHODS: &[&str] = &["find", "overlaps", "expand_patch_with_surrounding"];

pub fn is_region_method(name: &str) -> bool {
  REGION_METHODS.contains(&name)
}

pub fn region_method(
  region: &Region,
  name: &str,
  args: Vec<Value>,
  kwargs: Vec<(String, Value)>,
  host: &mut dyn Host,
) -> Result<Value> {
  match name {
    "find" => {
      let [expression] = bind("find", ["object_name"], args, kwargs)?;
      let expression = match required("find", "object_name", expression)? {
        Value::Str(text) => text,
        other => {
          return Err(ScriptError::type_error(format!(
            "find() argument must be str, not {}",
            other.type_name()
          )));
        }
      };
      host.emit(&format!("Calling find function . Detect {}.\n", expression));
      Ok(match host.find(region, &expression) {
        Detections::Single(regions) => regions_to_list(regions),
        Detections::Grouped(groups) => {
          let mut dict = Dict::default();
          for (phrase, regions) in groups {
            dict.insert(Value::str(phrase), regions_to_list(regions))?;
          }
          Value::dict(dict)
        }
      })
    }
    "overlaps" => {
      let [other] = bind("overlaps", ["other"], args, kwargs)?;
      let other = as_region(&required("overlaps", "other", other)?, "other")?;
      Ok(Value::Bool(region.overlaps(&other)))
    }
    "expand_patch_with_surrounding" => {
      bind::<0>(name, [], args, kwargs)?;
      Ok(Value::Region(region.expand_with_surrounding()))
    }
    other => Err(ScriptError::raise(
      ErrorKind::AttributeError,
      format!("'ImagePatch' object has no attribute '{}'", other),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FixedHost {
    trace: String,
    found: Vec<Region>,
    queries: Vec<(Region, String)>,
  }

  impl FixedHost {
    fn new(found: Vec<Region>) -> Self {
      FixedHost {
        trace: String::new(),
        found,
        queries: Vec::new(),
      }
    }
  }

  impl Host for FixedHost {
    fn emit(&mut self, text: &str) {
      self.trace.push_str(text);
    }

    fn find(&mut self, region: &Region, expression: &str) -> Detections {
      self.queries.push((*region, expression.to_string()));
      if expression.contains('.') {
        Detections::Grouped(vec![
          ("apple".to_string(), self.found.clone()),
          ("pear".to_string(), Vec::new()),
        ])
      } else {
        Detections::Single(self.found.clone())
      }
    }

    fn caption(&mut self, _region: &Region) -> Option<String> {
      None
    }
  }

  fn region(x1: i32, y1: i32, x2: i32, y2: i32, score: f64) -> Region {
    Region::new(x1, y1, x2, y2, score).unwrap()
  }

  fn image() -> Value {
    Value::Image(crate::script::ImageInfo {
      width: 640,
      height: 480,
    })
  }

  #[test]
  fn surface_lists_builtins_and_capabilities() {
    let surface = CapabilitySurface::standard();
    let names: Vec<_> = surface.names().collect();
    for expected in ["print", "len", "ImagePatch", "delete_overlaps", "formatting_answer"] {
      assert!(names.contains(&expected), "{expected} missing");
    }
    assert!(surface.lookup("open").is_none());
    assert!(surface.lookup("__import__").is_none());
  }

  #[test]
  fn image_patch_maps_lower_to_y2() {
    let mut host = FixedHost::new(Vec::new());
    let whole = call(Capability::ImagePatch, vec![image()], vec![], &mut host).unwrap();
    let Value::Region(whole) = whole else { panic!("not a region") };
    assert_eq!(whole.bbox(), [0, 0, 640, 480]);

    let args = vec![
      image(),
      Value::Int(10),
      Value::Int(90),
      Value::Float(50.7),
      Value::Int(20),
    ];
    let Value::Region(patch) = call(Capability::ImagePatch, args, vec![], &mut host).unwrap() else {
      panic!("not a region")
    };
    assert_eq!(patch.bbox(), [10, 20, 50, 90]);
    assert_eq!(patch.lower(), 90);
    assert_eq!(patch.upper(), 20);

    let inverted = vec![image(), Value::Int(50), Value::Int(0), Value::Int(10), Value::Int(20)];
    let err = call(Capability::ImagePatch, inverted, vec![], &mut host).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ValueError));
  }

  #[test]
  fn find_returns_list_or_mapping() {
    let apple = region(1, 1, 10, 10, 0.9);
    let mut host = FixedHost::new(vec![apple]);
    let patch = region(0, 0, 100, 100, 1.0);

    let single = region_method(&patch, "find", vec![Value::str("apple")], vec![], &mut host).unwrap();
    assert_eq!(single.repr(), Value::list(vec![Value::Region(apple)]).repr());

    let grouped =
      region_method(&patch, "find", vec![Value::str("apple. pear.")], vec![], &mut host).unwrap();
    let Value::Dict(dict) = grouped else { panic!("not a dict") };
    assert_eq!(dict.borrow().len(), 2);
    assert_eq!(host.queries.len(), 2);
    assert_eq!(host.queries[0].0, patch);
    assert_eq!(
      host.trace,
      "Calling find function . Detect apple.\nCalling find function . Detect apple. pear..\n"
    );
  }

  #[test]
  fn delete_overlaps_mutates_both_lists() {
    let mut host = FixedHost::new(Vec::new());
    let strong = region(0, 0, 10, 10, 0.9);
    let weak = region(0, 0, 10, 10, 0.4);
    let first = Value::list(vec![Value::Region(strong)]);
    let second = Value::list(vec![Value::Region(weak)]);
    call(
      Capability::DeleteOverlaps,
      vec![first.clone(), second.clone()],
      vec![],
      &mut host,
    )
    .unwrap();
    assert_eq!(first.repr(), Value::list(vec![Value::Region(strong)]).repr());
    assert_eq!(second.repr(), Value::list(Vec::new()).repr());
  }

  #[test]
  fn dist_and_large_box_filter() {
    let mut host = FixedHost::new(Vec::new());
    let a = Value::Region(region(0, 0, 6, 8, 1.0));
    let b = Value::Region(region(6, 8, 12, 16, 1.0));
    let d = call(Capability::Dist, vec![a.clone(), b], vec![], &mut host).unwrap();
    assert!(d.py_eq(&Value::Float(10.0)));

    let tall = Value::Region(region(0, 0, 10, 900, 1.0));
    let kept = call(
      Capability::DeleteLargeBox,
      vec![Value::list(vec![a.clone(), tall])],
      vec![],
      &mut host,
    )
    .unwrap();
    assert_eq!(kept.repr(), Value::list(vec![a]).repr());
  }

  #[test]
  fn region_attributes() {
    let r = region(10, 20, 30, 60, 0.5);
    assert!(region_attribute(&r, "width").unwrap().py_eq(&Value::Int(20)));
    assert!(region_attribute(&r, "lower").unwrap().py_eq(&Value::Int(60)));
    assert!(region_attribute(&r, "vertical_center").unwrap().py_eq(&Value::Float(40.0)));
    assert!(region_attribute(&r, "cropped_image").is_none());
  }
}
