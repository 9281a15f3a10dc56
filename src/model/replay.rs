// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/replay.rs - 回放检测后端（从 JSON 记录读取检测结果）
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    BackendCandidate, BackendError, BackendTier, DetectItem, DetectResult, DetectionBackend,
    InferRequest,
  },
};

pub const REPLAY_SCHEME: &str = "replay";

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: 期望 'replay', 实际 '{0}'")]
  SchemeMismatch(String),
  #[error("未知的后端档位: {0}")]
  UnknownTier(String),
}

#[derive(Debug, Deserialize)]
struct ReplayFixture {
  #[serde(default)]
  detections: Vec<ReplayItem>,
  #[serde(default)]
  failure: Option<ReplayFailure>,
}

#[derive(Debug, Deserialize)]
struct ReplayItem {
  label: String,
  score: f32,
  bbox: [f32; 4],
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplayFailure {
  OutOfMemory,
  Inference,
  Malformed,
}

/// 回放后端：对提示词做开放词汇匹配，返回记录中分数高于阈值的检测
pub struct ReplayBackend {
  id: String,
  items: Vec<DetectItem>,
  failure: Option<ReplayFailure>,
}

impl ReplayBackend {
  pub fn from_items(id: impl Into<String>, items: Vec<DetectItem>) -> Self {
    ReplayBackend {
      id: id.into(),
      items,
      failure: None,
    }
  }

  fn from_fixture(id: String, fixture: ReplayFixture) -> Self {
    let items = fixture
      .detections
      .into_iter()
      .map(|item| DetectItem {
        label: item.label,
        score: item.score,
        bbox: item.bbox,
      })
      .collect();
    ReplayBackend {
      id,
      items,
      failure: fixture.failure,
    }
  }
}

fn squash(text: &str) -> String {
  text.chars().filter(|c| !c.is_whitespace()).collect()
}

impl DetectionBackend for ReplayBackend {
  fn id(&self) -> &str {
    &self.id
  }

  fn infer(&self, request: &InferRequest<'_>) -> Result<DetectResult, BackendError> {
    match self.failure {
      Some(ReplayFailure::OutOfMemory) => {
        return Err(BackendError::OutOfMemory(format!("{} 推理时内存不足", self.id)));
      }
      Some(ReplayFailure::Inference) => {
        return Err(BackendError::Inference(format!("{} 推理失败", self.id)));
      }
      Some(ReplayFailure::Malformed) => {
        return Err(BackendError::Malformed(format!("{} 返回的结果不完整", self.id)));
      }
      None => {}
    }

    let phrases: Vec<String> = request
      .prompt
      .split('.')
      .map(squash)
      .filter(|p| !p.is_empty())
      .collect();

    let mut items: Vec<DetectItem> = self
      .items
      .iter()
      .filter(|item| item.score > request.box_threshold)
      .filter(|item| {
        let label = squash(&item.label);
        phrases
          .iter()
          .any(|p| label.contains(p.as_str()) || p.contains(label.as_str()))
      })
      .cloned()
      .collect();
    items.sort_by(|a, b| b.score.total_cmp(&a.score));

    debug!(
      "回放后端 {}: 提示词 {:?}, 阈值 {}, 命中 {} 个",
      self.id,
      request.prompt,
      request.box_threshold,
      items.len()
    );
    Ok(DetectResult::from(items))
  }
}

/// 回放后端候选：`replay:///path/to/detections.json?tier=heavy&id=name`
#[derive(Debug, Clone)]
pub struct ReplayCandidate {
  id: String,
  path: PathBuf,
  tier: BackendTier,
}

impl FromUrlWithScheme for ReplayCandidate {
  const SCHEME: &'static str = REPLAY_SCHEME;
}

impl FromUrl for ReplayCandidate {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut candidate = ReplayCandidate::from_path(url.path(), BackendTier::Light);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "tier" => {
          candidate.tier = match value.as_ref() {
            "light" => BackendTier::Light,
            "heavy" => BackendTier::Heavy,
            other => return Err(ReplayError::UnknownTier(other.to_string())),
          }
        }
        "id" => candidate.id = value.into_owned(),
        _ => {}
      }
    }
    Ok(candidate)
  }
}

impl ReplayCandidate {
  pub fn from_path(path: impl AsRef<Path>, tier: BackendTier) -> Self {
    let path = path.as_ref().to_path_buf();
    let id = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "replay".to_string());
    ReplayCandidate { id, path, tier }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl BackendCandidate for ReplayCandidate {
  fn id(&self) -> &str {
    &self.id
  }

  fn tier(&self) -> BackendTier {
    self.tier
  }

  fn load(&self) -> Result<Box<dyn DetectionBackend>, BackendError> {
    info!("加载回放记录: {}", self.path.display());
    let text = std::fs::read_to_string(&self.path)?;
    let fixture: ReplayFixture = serde_json::from_str(&text)
      .map_err(|e| BackendError::Load(format!("{}: {}", self.path.display(), e)))?;
    debug!("回放记录包含 {} 个检测", fixture.detections.len());
    Ok(Box::new(ReplayBackend::from_fixture(self.id.clone(), fixture)))
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use image::RgbImage;

  use super::*;

  fn item(label: &str, score: f32) -> DetectItem {
    DetectItem {
      label: label.to_string(),
      score,
      bbox: [0.0, 0.0, 10.0, 10.0],
    }
  }

  fn request<'a>(image: &'a RgbImage, prompt: &'a str, threshold: f32) -> InferRequest<'a> {
    InferRequest {
      image,
      prompt,
      box_threshold: threshold,
      text_threshold: 0.3,
    }
  }

  #[test]
  fn filters_by_prompt_and_threshold() {
    let backend = ReplayBackend::from_items(
      "fixture",
      vec![
        item("apple", 0.5),
        item("strawberry", 0.9),
        item("apple", 0.2),
        item("banana chips", 0.7),
      ],
    );
    let image = RgbImage::new(4, 4);

    let result = backend.infer(&request(&image, "apple.", 0.3)).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].label, "apple");

    let result = backend
      .infer(&request(&image, "strawberry. banana chips.", 0.3))
      .unwrap();
    let labels: Vec<_> = result.items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["strawberry", "banana chips"]);
  }

  #[test]
  fn candidate_from_url() {
    let url = Url::parse("replay:///tmp/base.json?tier=heavy&id=dino-base").unwrap();
    let candidate = ReplayCandidate::from_url(&url).unwrap();
    assert_eq!(candidate.id(), "dino-base");
    assert_eq!(candidate.tier(), BackendTier::Heavy);
    assert_eq!(candidate.path(), Path::new("/tmp/base.json"));

    let url = Url::parse("yolo26:///tmp/model.rknn").unwrap();
    assert!(matches!(
      ReplayCandidate::from_url(&url),
      Err(ReplayError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn loads_fixture_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{"detections": [{{"label": "apple", "score": 0.8, "bbox": [1, 2, 3, 4]}}]}}"#
    )
    .unwrap();

    let candidate = ReplayCandidate::from_path(file.path(), BackendTier::Light);
    let backend = candidate.load().unwrap();
    let image = RgbImage::new(4, 4);
    let result = backend.infer(&request(&image, "apple.", 0.3)).unwrap();
    assert_eq!(result.items[0].bbox, [1.0, 2.0, 3.0, 4.0]);
  }

  #[test]
  fn fixture_can_simulate_out_of_memory() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"failure": "out_of_memory"}}"#).unwrap();

    let backend = ReplayCandidate::from_path(file.path(), BackendTier::Light)
      .load()
      .unwrap();
    let image = RgbImage::new(4, 4);
    assert!(matches!(
      backend.infer(&request(&image, "apple.", 0.3)),
      Err(BackendError::OutOfMemory(_))
    ));
  }
}
