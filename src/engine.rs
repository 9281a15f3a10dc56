// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 检测引擎：执行例程并给出判定
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

use std::{fmt, str::FromStr, time::Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  detector::{DetectionAdapter, DetectionPolicy, DetectionRecord},
  input::InspectionImage,
  model::{BackendCandidate, Captioner},
  resource::{MemoryStatus, ResourceGuard},
  sandbox::{Invocation, Sandbox, SandboxError},
  script::{ExecutionLimits, ScriptError, Value},
};

pub const DEFAULT_THRESHOLD: f32 = 0.3;
pub const MIN_THRESHOLD: f32 = 0.1;
pub const MAX_THRESHOLD: f32 = 0.9;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("阈值必须在 0.1 到 0.9 之间: {0}")]
  ThresholdOutOfRange(f32),
  #[error("无效的阈值: {0}")]
  InvalidThreshold(String),
  #[error("没有配置任何检测后端")]
  NoBackend,
}

/// 检测框置信度阈值，取值 [0.1, 0.9]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold(f32);

impl Threshold {
  pub fn new(value: f32) -> Result<Self, EngineError> {
    if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&value) {
      return Err(EngineError::ThresholdOutOfRange(value));
    }
    Ok(Threshold(value))
  }

  pub fn value(&self) -> f32 {
    self.0
  }
}

impl Default for Threshold {
  fn default() -> Self {
    Threshold(DEFAULT_THRESHOLD)
  }
}

impl FromStr for Threshold {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value = s
      .trim()
      .parse::<f32>()
      .map_err(|_| EngineError::InvalidThreshold(s.to_string()))?;
    Threshold::new(value)
  }
}

impl fmt::Display for Threshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Success,
  Failure,
  Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
  System,
  Memory,
  Timeout,
}

/// 一次检测的判定
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
  pub status: Status,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub score: Option<i64>,
  pub message: String,
  pub output_text: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_type: Option<ErrorType>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory_warning: Option<MemoryStatus>,
  pub detections: Vec<DetectionRecord>,
}

impl Verdict {
  fn scored(score: i64, output_text: String) -> Self {
    let (status, message) = if score == 0 {
      (Status::Success, "The image satisfies the conditions")
    } else {
      (Status::Failure, "The image does not satisfy the conditions")
    };
    Verdict {
      status,
      score: Some(score),
      message: message.to_string(),
      output_text,
      error_type: None,
      memory_warning: None,
      detections: Vec::new(),
    }
  }

  fn error(error_type: ErrorType, message: String, output_text: String) -> Self {
    Verdict {
      status: Status::Error,
      score: None,
      message,
      output_text,
      error_type: Some(error_type),
      memory_warning: None,
      detections: Vec::new(),
    }
  }

  /// 未能进入例程执行的系统错误，例如图像无法读取
  pub fn system_error(message: impl fmt::Display) -> Self {
    Verdict::error(
      ErrorType::System,
      format!("System error: {}", message),
      String::new(),
    )
  }

  /// 进程退出码：成功 0，不合格 1，出错 2
  pub fn exit_code(&self) -> i32 {
    match self.status {
      Status::Success => 0,
      Status::Failure => 1,
      Status::Error => 2,
    }
  }
}

/// 例程返回值必须是整数（布尔按 0/1 计）
fn score_of(value: &Value) -> Result<i64, String> {
  match value {
    Value::Int(i) => Ok(*i),
    Value::Bool(b) => Ok(i64::from(*b)),
    other => Err(format!("score must be int, got {}", other.type_name())),
  }
}

fn classify(error: &SandboxError) -> (ErrorType, String) {
  match error {
    SandboxError::Script(ScriptError::Timeout { .. }) => (
      ErrorType::Timeout,
      format!("Routine exceeded its execution limit: {}", error),
    ),
    SandboxError::Script(ScriptError::ResourceExhausted { .. }) => (
      ErrorType::Memory,
      format!(
        "Insufficient memory to run the routine; reduce the image size and retry: {}",
        error
      ),
    ),
    other => (ErrorType::System, format!("System error: {}", other)),
  }
}

/// 检测引擎：持有检测适配器与受限执行环境，一次服务一个检测
pub struct InspectionEngine {
  adapter: DetectionAdapter,
  sandbox: Sandbox,
  captioner: Option<Box<dyn Captioner>>,
}

impl InspectionEngine {
  pub fn builder() -> InspectionEngineBuilder {
    InspectionEngineBuilder::default()
  }

  pub fn adapter(&self) -> &DetectionAdapter {
    &self.adapter
  }

  pub fn adapter_mut(&mut self) -> &mut DetectionAdapter {
    &mut self.adapter
  }

  /// 对一张图像执行例程。任何故障都体现在判定中，不会返回错误
  pub fn run(&mut self, code: &str, image: &InspectionImage, threshold: Threshold) -> Verdict {
    info!("开始检测: {} (阈值 {})", image.path(), threshold);
    let now = Instant::now();

    let memory = self.adapter.resource_guard().check();
    if memory.warning {
      warn!(
        "内存紧张: 可用 {:.1}GB, 占用 {:.1}%",
        memory.available_gb, memory.percent_used
      );
    }
    // 丢弃上一次未取走的记录
    self.adapter.take_records();

    let invocation = Invocation {
      code,
      image_path: image.path(),
      image: image.pixels(),
      threshold: threshold.value(),
    };
    let outcome = self
      .sandbox
      .execute(&invocation, &mut self.adapter, self.captioner.as_deref());

    let mut verdict = match outcome {
      Ok(execution) => match score_of(&execution.value) {
        Ok(score) => Verdict::scored(score, execution.trace.into_string()),
        Err(message) => {
          error!("例程返回值无效: {}", message);
          Verdict::error(
            ErrorType::System,
            format!("System error: {}", message),
            execution.trace.into_string(),
          )
        }
      },
      Err(failure) => {
        error!("例程执行失败: {}", failure.error);
        let (error_type, message) = classify(&failure.error);
        Verdict::error(error_type, message, failure.trace.into_string())
      }
    };

    verdict.memory_warning = memory.warning.then_some(memory);
    verdict.detections = self.adapter.take_records();
    info!(
      "检测完成: {:?}, 耗时: {:.2?}",
      verdict.status,
      now.elapsed()
    );
    verdict
  }
}

#[derive(Default)]
pub struct InspectionEngineBuilder {
  candidates: Vec<Box<dyn BackendCandidate>>,
  guard: Option<ResourceGuard>,
  policy: DetectionPolicy,
  limits: ExecutionLimits,
  captioner: Option<Box<dyn Captioner>>,
}

impl InspectionEngineBuilder {
  /// 追加一个候选后端，越早加入优先级越高
  pub fn candidate(mut self, candidate: impl BackendCandidate + 'static) -> Self {
    self.candidates.push(Box::new(candidate));
    self
  }

  pub fn candidates(mut self, candidates: Vec<Box<dyn BackendCandidate>>) -> Self {
    self.candidates.extend(candidates);
    self
  }

  pub fn resource_guard(mut self, guard: ResourceGuard) -> Self {
    self.guard = Some(guard);
    self
  }

  pub fn policy(mut self, policy: DetectionPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn limits(mut self, limits: ExecutionLimits) -> Self {
    self.limits = limits;
    self
  }

  pub fn captioner(mut self, captioner: impl Captioner + 'static) -> Self {
    self.captioner = Some(Box::new(captioner));
    self
  }

  pub fn build(self) -> Result<InspectionEngine, EngineError> {
    if self.candidates.is_empty() {
      return Err(EngineError::NoBackend);
    }
    info!("候选检测后端: {}", self.candidates.len());
    let adapter = DetectionAdapter::new(
      self.candidates,
      self.guard.unwrap_or_default(),
      self.policy,
    );
    Ok(InspectionEngine {
      adapter,
      sandbox: Sandbox::new(self.limits),
      captioner: self.captioner,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn threshold_bounds() {
    assert_eq!(Threshold::default().value(), 0.3);
    assert_eq!("0.5".parse::<Threshold>().unwrap().value(), 0.5);
    assert!(matches!(
      "0.95".parse::<Threshold>(),
      Err(EngineError::ThresholdOutOfRange(_))
    ));
    assert!(matches!(
      "abc".parse::<Threshold>(),
      Err(EngineError::InvalidThreshold(_))
    ));
  }

  #[test]
  fn scores_must_be_integers() {
    assert_eq!(score_of(&Value::Int(3)), Ok(3));
    assert_eq!(score_of(&Value::Bool(true)), Ok(1));
    assert_eq!(
      score_of(&Value::Float(0.0)),
      Err("score must be int, got float".to_string())
    );
    assert_eq!(
      score_of(&Value::str("0")),
      Err("score must be int, got str".to_string())
    );
  }

  #[test]
  fn verdict_json_shape() {
    let verdict = Verdict::scored(0, "Program output: 0\n".to_string());
    let json = serde_json::to_value(&verdict).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["score"], 0);
    assert!(json.get("error_type").is_none());

    let verdict = Verdict::error(ErrorType::Timeout, "slow".to_string(), String::new());
    let json = serde_json::to_value(&verdict).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["error_type"], "timeout");
    assert!(json.get("score").is_none());
    assert_eq!(verdict.exit_code(), 2);
  }

  #[test]
  fn builder_requires_a_backend() {
    assert!(matches!(
      InspectionEngine::builder().build(),
      Err(EngineError::NoBackend)
    ));
  }
}
