// 该文件是 Shanan （山南西风） 项目的一部分。
// src/format.rs - 例程答案的规范化
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

use crate::{
  capability::Host,
  region::Region,
  script::{ErrorKind, ScriptError, Value},
};

/// 按类型划分的答案
#[derive(Debug, Clone)]
pub enum Answer {
  Flag(bool),
  Number(Value),
  Text(String),
  List(Vec<Value>),
  Region(Region),
  Other(Value),
}

impl Answer {
  pub fn classify(value: &Value) -> Self {
    match value {
      Value::Bool(b) => Answer::Flag(*b),
      Value::Int(_) | Value::Float(_) => Answer::Number(value.clone()),
      Value::Str(text) => Answer::Text(text.to_string()),
      Value::List(items) => Answer::List(items.borrow().clone()),
      Value::Region(region) => Answer::Region(*region),
      other => Answer::Other(other.clone()),
    }
  }

  /// 布尔转 yes/no，列表以 `" , "` 连接，数字原样保留，字符串去掉首尾空白
  pub fn render(self, host: &mut dyn Host) -> Result<Value, ScriptError> {
    Ok(match self {
      Answer::Flag(true) => Value::str("yes"),
      Answer::Flag(false) => Value::str("no"),
      Answer::Number(value) => value,
      Answer::Text(text) => Value::str(text.trim()),
      Answer::List(items) => {
        let parts: Vec<String> = items.iter().map(Value::to_str).collect();
        Value::str(parts.join(" , "))
      }
      Answer::Region(region) => match host.caption(&region) {
        Some(caption) => Value::str(caption),
        None => {
          return Err(ScriptError::raise(
            ErrorKind::RuntimeError,
            format!("no caption available for region {}", region),
          ));
        }
      },
      Answer::Other(value) => Value::str(value.to_str()),
    })
  }
}

/// 规范化答案并写入轨迹
pub fn formatting_answer(value: &Value, host: &mut dyn Host) -> Result<Value, ScriptError> {
  let answer = Answer::classify(value).render(host)?;
  host.emit(&format!("Program output: {}\n", answer.to_str()));
  Ok(answer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::Detections;

  #[derive(Default)]
  struct TraceHost {
    trace: String,
    caption: Option<String>,
  }

  impl Host for TraceHost {
    fn emit(&mut self, text: &str) {
      self.trace.push_str(text);
    }

    fn find(&mut self, _region: &Region, _expression: &str) -> Detections {
      Detections::Single(Vec::new())
    }

    fn caption(&mut self, _region: &Region) -> Option<String> {
      self.caption.clone()
    }
  }

  #[test]
  fn canonical_forms() {
    let mut host = TraceHost::default();
    let yes = formatting_answer(&Value::Bool(true), &mut host).unwrap();
    assert!(yes.py_eq(&Value::str("yes")));

    let joined = formatting_answer(&Value::list(vec![Value::Int(1), Value::Int(2)]), &mut host).unwrap();
    assert!(joined.py_eq(&Value::str("1 , 2")));

    let zero = formatting_answer(&Value::Int(0), &mut host).unwrap();
    assert!(matches!(zero, Value::Int(0)));

    let text = formatting_answer(&Value::str("  ok \n"), &mut host).unwrap();
    assert!(text.py_eq(&Value::str("ok")));

    assert_eq!(
      host.trace,
      "Program output: yes\nProgram output: 1 , 2\nProgram output: 0\nProgram output: ok\n"
    );
  }

  #[test]
  fn regions_need_a_captioner() {
    let region = Region::new(0, 0, 10, 10, 1.0).unwrap();
    let mut host = TraceHost::default();
    let err = formatting_answer(&Value::Region(region), &mut host).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::RuntimeError));
    assert!(host.trace.is_empty());

    host.caption = Some("a red apple".to_string());
    let caption = formatting_answer(&Value::Region(region), &mut host).unwrap();
    assert!(caption.py_eq(&Value::str("a red apple")));
  }
}
