// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 检测后端接口
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 一次开放词汇检测的输入
pub struct InferRequest<'a> {
  pub image: &'a RgbImage,
  /// 以句点分隔的目标短语，例如 `"apple. strawberry."`
  pub prompt: &'a str,
  pub box_threshold: f32,
  pub text_threshold: f32,
}

/// 已加载、可推理的检测后端
pub trait DetectionBackend {
  fn id(&self) -> &str;
  fn infer(&self, request: &InferRequest<'_>) -> Result<DetectResult, BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("后端输出格式错误: {0}")]
  Malformed(String),
  #[error("内存不足: {0}")]
  OutOfMemory(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 后端的资源档位；内存紧张时只尝试轻量档
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTier {
  Light,
  Heavy,
}

/// 候选后端：按优先级排列，由适配器依次尝试加载
pub trait BackendCandidate {
  fn id(&self) -> &str;
  fn tier(&self) -> BackendTier;
  fn load(&self) -> Result<Box<dyn DetectionBackend>, BackendError>;
}

/// 区域描述模型，用于把区域类型的答案转成文字
pub trait Captioner {
  fn caption(&self, image: &RgbImage) -> Result<String, BackendError>;
}

mod replay;
pub use self::replay::{REPLAY_SCHEME, ReplayBackend, ReplayCandidate, ReplayError};

#[derive(Error, Debug)]
pub enum CandidateError {
  #[error("回放后端错误: {0}")]
  Replay(#[from] ReplayError),
  #[error("不支持的后端方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择候选后端
pub enum CandidateWrapper {
  Replay(ReplayCandidate),
}

impl FromUrl for CandidateWrapper {
  type Error = CandidateError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayCandidate::SCHEME => Ok(CandidateWrapper::Replay(ReplayCandidate::from_url(url)?)),
      other => Err(CandidateError::SchemeMismatch(other.to_string())),
    }
  }
}

impl BackendCandidate for CandidateWrapper {
  fn id(&self) -> &str {
    match self {
      CandidateWrapper::Replay(candidate) => candidate.id(),
    }
  }

  fn tier(&self) -> BackendTier {
    match self {
      CandidateWrapper::Replay(candidate) => candidate.tier(),
    }
  }

  fn load(&self) -> Result<Box<dyn DetectionBackend>, BackendError> {
    match self {
      CandidateWrapper::Replay(candidate) => candidate.load(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn candidates_are_chosen_by_scheme() {
    let url = Url::parse("replay:///tmp/fixtures/large.json?tier=heavy").unwrap();
    let candidate = CandidateWrapper::from_url(&url).unwrap();
    assert_eq!(candidate.id(), "large");
    assert_eq!(candidate.tier(), BackendTier::Heavy);

    let url = Url::parse("rknn:///tmp/model.rknn").unwrap();
    assert!(matches!(
      CandidateWrapper::from_url(&url),
      Err(CandidateError::SchemeMismatch(_))
    ));
  }
}
