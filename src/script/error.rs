// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/error.rs - 例程语言错误
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

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// 例程内抛出的错误种类，沿用例程作者熟悉的名字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NameError,
  TypeError,
  ValueError,
  IndexError,
  KeyError,
  AttributeError,
  ZeroDivisionError,
  OverflowError,
  AssertionError,
  ImportError,
  RecursionError,
  RuntimeError,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

fn at_line(line: &usize) -> String {
  if *line == 0 {
    String::new()
  } else {
    format!(" (line {})", line)
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
  #[error("SyntaxError: {message}{}", at_line(.line))]
  Syntax { message: String, line: usize },
  #[error("{kind}: {message}{}", at_line(.line))]
  Raised {
    kind: ErrorKind,
    message: String,
    line: usize,
  },
  #[error("Timeout: {reason}{}", at_line(.line))]
  Timeout { reason: String, line: usize },
  #[error("ResourceExhaustion: {reason}{}", at_line(.line))]
  ResourceExhausted { reason: String, line: usize },
}

impl ScriptError {
  pub fn syntax(message: impl Into<String>, line: usize) -> Self {
    ScriptError::Syntax {
      message: message.into(),
      line,
    }
  }

  pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Self {
    ScriptError::Raised {
      kind,
      message: message.into(),
      line: 0,
    }
  }

  pub fn type_error(message: impl Into<String>) -> Self {
    Self::raise(ErrorKind::TypeError, message)
  }

  pub fn value_error(message: impl Into<String>) -> Self {
    Self::raise(ErrorKind::ValueError, message)
  }

  pub fn step_budget(max_steps: u64) -> Self {
    ScriptError::Timeout {
      reason: format!("step budget of {} exhausted", max_steps),
      line: 0,
    }
  }

  pub fn deadline(timeout: Duration) -> Self {
    ScriptError::Timeout {
      reason: format!("exceeded {:?} wall-clock limit", timeout),
      line: 0,
    }
  }

  pub fn too_large(len: usize, limit: usize) -> Self {
    ScriptError::ResourceExhausted {
      reason: format!("collection of {} elements exceeds limit {}", len, limit),
      line: 0,
    }
  }

  /// 补上行号（已有行号的保持不变）
  pub fn at(mut self, at: usize) -> Self {
    match &mut self {
      ScriptError::Syntax { line, .. }
      | ScriptError::Raised { line, .. }
      | ScriptError::Timeout { line, .. }
      | ScriptError::ResourceExhausted { line, .. } => {
        if *line == 0 {
          *line = at;
        }
      }
    }
    self
  }

  pub fn kind(&self) -> Option<ErrorKind> {
    match self {
      ScriptError::Raised { kind, .. } => Some(*kind),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_carry_kind_and_line() {
    let err = ScriptError::raise(ErrorKind::NameError, "name 'foo' is not defined").at(4);
    assert_eq!(err.to_string(), "NameError: name 'foo' is not defined (line 4)");

    let err = err.at(9);
    assert_eq!(err.to_string(), "NameError: name 'foo' is not defined (line 4)");

    let err = ScriptError::type_error("unsupported operand");
    assert_eq!(err.to_string(), "TypeError: unsupported operand");
  }
}
