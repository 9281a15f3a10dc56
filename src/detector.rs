// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector.rs - 检测适配器（模型缓存、回退加载、结果分组）
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

use std::ops::{Deref, DerefMut};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  geometry::{self, BBox, DetectionSet},
  model::{BackendCandidate, BackendError, BackendTier, DetectionBackend, InferRequest},
  region::{Region, RegionError},
  resource::ResourceGuard,
  utils::round_to,
};

pub const DEFAULT_BOX_THRESHOLD: f32 = 0.3;
pub const DEFAULT_TEXT_THRESHOLD: f32 = 0.3;
pub const DEFAULT_NMS_IOU: f64 = 0.2;

/// 检测策略
#[derive(Debug, Clone)]
pub struct DetectionPolicy {
  /// 未设置阈值时使用的检测置信度阈值
  pub default_threshold: f32,
  pub text_threshold: f32,
  pub nms_iou: f64,
  /// 特定表达式的阈值下限，例如 `("pushpin.", 0.3)`
  pub threshold_floors: Vec<(String, f32)>,
  /// 不做 NMS 的表达式
  pub nms_exempt: Vec<String>,
  /// 是否按图像宽高比换算检测坐标
  pub aspect_rescale: bool,
}

impl Default for DetectionPolicy {
  fn default() -> Self {
    DetectionPolicy {
      default_threshold: DEFAULT_BOX_THRESHOLD,
      text_threshold: DEFAULT_TEXT_THRESHOLD,
      nms_iou: DEFAULT_NMS_IOU,
      threshold_floors: vec![("pushpin.".to_string(), 0.3)],
      nms_exempt: vec!["terminal.".to_string()],
      aspect_rescale: false,
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectionError {
  #[error("所有候选模型加载失败: [{}]", tried.join(", "))]
  AllCandidatesFailed { tried: Vec<String> },
  #[error(transparent)]
  Backend(#[from] BackendError),
  #[error("检测框无效: {0}")]
  InvalidBox(#[from] RegionError),
}

/// 一次检测的结论：区分“没有目标”和“后端出错”
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum DetectOutcome {
  Found,
  Empty,
  BackendFailed(String),
  OutOfMemory,
}

impl DetectOutcome {
  pub fn is_failure(&self) -> bool {
    matches!(self, DetectOutcome::BackendFailed(_) | DetectOutcome::OutOfMemory)
  }
}

/// 单个短语返回列表，多个短语返回 短语 → 列表 的映射（保持短语顺序）
#[derive(Debug, Clone, PartialEq)]
pub enum Detections {
  Single(Vec<Region>),
  Grouped(Vec<(String, Vec<Region>)>),
}

impl Detections {
  fn empty_for(phrases: &[String]) -> Self {
    if phrases.len() > 1 {
      Detections::Grouped(empty_groups(phrases))
    } else {
      Detections::Single(Vec::new())
    }
  }

  pub fn total(&self) -> usize {
    match self {
      Detections::Single(regions) => regions.len(),
      Detections::Grouped(groups) => groups.iter().map(|(_, r)| r.len()).sum(),
    }
  }

  pub fn all_regions(&self) -> Vec<Region> {
    match self {
      Detections::Single(regions) => regions.clone(),
      Detections::Grouped(groups) => groups.iter().flat_map(|(_, r)| r.iter().copied()).collect(),
    }
  }

  fn translate(self, dx: i32, dy: i32) -> Self {
    let shift = |regions: Vec<Region>| regions.iter().map(|r| r.translate(dx, dy)).collect();
    match self {
      Detections::Single(regions) => Detections::Single(shift(regions)),
      Detections::Grouped(groups) => {
        Detections::Grouped(groups.into_iter().map(|(p, r)| (p, shift(r))).collect())
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub detections: Detections,
  pub outcome: DetectOutcome,
}

/// 例程发出的一次检测请求及其结果（原图坐标）
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecord {
  pub expression: String,
  pub outcome: DetectOutcome,
  pub regions: Vec<Region>,
}

struct LoadedBackend {
  backend: Box<dyn DetectionBackend>,
  id: String,
}

/// 检测适配器：持有模型缓存与本次调用的阈值，显式传入每次检测调用
pub struct DetectionAdapter {
  candidates: Vec<Box<dyn BackendCandidate>>,
  guard: ResourceGuard,
  policy: DetectionPolicy,
  cache: Option<LoadedBackend>,
  threshold: Option<f32>,
  records: Vec<DetectionRecord>,
}

/// 以句点结尾的检测表达式
fn normalize_expression(expression: &str) -> String {
  let mut prompt = expression.to_string();
  if !prompt.ends_with('.') {
    prompt.push('.');
  }
  prompt
}

fn squash(text: &str) -> String {
  text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// `"oatmeal. banana chips. almonds"` → `["oatmeal", "bananachips", "almonds"]`
///
/// 重复的短语保留：是否返回映射只看表达式里写了几个短语
pub fn split_phrases(expression: &str) -> Vec<String> {
  expression
    .split('.')
    .map(squash)
    .filter(|phrase| !phrase.is_empty())
    .collect()
}

/// 每个不同的短语一组，按首次出现的顺序
fn empty_groups(phrases: &[String]) -> Vec<(String, Vec<Region>)> {
  let mut groups: Vec<(String, Vec<Region>)> = Vec::new();
  for phrase in phrases {
    if !groups.iter().any(|(p, _)| p == phrase) {
      groups.push((phrase.clone(), Vec::new()));
    }
  }
  groups
}

impl DetectionAdapter {
  pub fn new(
    candidates: Vec<Box<dyn BackendCandidate>>,
    guard: ResourceGuard,
    policy: DetectionPolicy,
  ) -> Self {
    DetectionAdapter {
      candidates,
      guard,
      policy,
      cache: None,
      threshold: None,
      records: Vec::new(),
    }
  }

  pub fn policy(&self) -> &DetectionPolicy {
    &self.policy
  }

  pub fn resource_guard(&self) -> &ResourceGuard {
    &self.guard
  }

  /// 当前缓存的后端 id
  pub fn loaded_backend(&self) -> Option<&str> {
    self.cache.as_ref().map(|c| c.id.as_str())
  }

  pub fn threshold(&self) -> Option<f32> {
    self.threshold
  }

  /// 在返回值的生命周期内使用给定阈值，离开作用域时恢复原值
  pub fn scoped_threshold(&mut self, threshold: f32) -> ThresholdScope<'_> {
    let previous = self.threshold.replace(threshold);
    ThresholdScope {
      adapter: self,
      previous,
    }
  }

  /// 清空模型缓存，下次检测重新选择模型
  pub fn evict(&mut self) {
    if let Some(loaded) = self.cache.take() {
      warn!("清除模型缓存: {}", loaded.id);
    }
  }

  /// 取出并清空检测记录
  pub fn take_records(&mut self) -> Vec<DetectionRecord> {
    std::mem::take(&mut self.records)
  }

  /// 按优先级加载模型并缓存，返回模型 id
  pub fn load(&mut self) -> Result<&str, DetectionError> {
    Ok(&self.ensure_loaded()?.id)
  }

  fn ensure_loaded(&mut self) -> Result<&LoadedBackend, DetectionError> {
    let loaded = match self.cache.take() {
      Some(loaded) => {
        debug!("使用缓存的模型: {}", loaded.id);
        loaded
      }
      None => {
        info!("首次加载模型...");
        self.load_candidates()?
      }
    };
    Ok(self.cache.insert(loaded))
  }

  fn load_candidates(&self) -> Result<LoadedBackend, DetectionError> {
    let mut tried = Vec::with_capacity(self.candidates.len());

    for candidate in &self.candidates {
      let status = self.guard.check();
      if status.warning && candidate.tier() != BackendTier::Light {
        warn!("内存不足，跳过较重的模型: {}", candidate.id());
        tried.push(format!("{} (skipped)", candidate.id()));
        continue;
      }

      info!("模型加载尝试: {}", candidate.id());
      match candidate.load() {
        Ok(backend) => {
          info!("模型加载成功: {}", candidate.id());
          return Ok(LoadedBackend {
            backend,
            id: candidate.id().to_string(),
          });
        }
        Err(e) => {
          warn!("模型加载失败: {} - {}", candidate.id(), e);
          tried.push(candidate.id().to_string());
        }
      }
    }

    error!("所有模型加载失败");
    Err(DetectionError::AllCandidatesFailed { tried })
  }

  fn effective_threshold(&self, prompt: &str) -> f32 {
    let mut threshold = self.threshold.unwrap_or(self.policy.default_threshold);
    for (expression, floor) in &self.policy.threshold_floors {
      if expression == prompt {
        threshold = threshold.max(*floor);
      }
    }
    threshold
  }

  /// 在整幅图像上检测。不会返回错误：失败时给出空结果并在 `outcome` 中注明原因
  pub fn detect(&mut self, image: &RgbImage, expression: &str) -> Detection {
    let prompt = normalize_expression(expression);
    let phrases = split_phrases(&prompt);
    if phrases.is_empty() {
      warn!("检测表达式为空: {:?}", expression);
      return Detection {
        detections: Detections::Single(Vec::new()),
        outcome: DetectOutcome::Empty,
      };
    }

    match self.try_detect(image, &prompt, &phrases) {
      Ok(detection) => detection,
      Err(DetectionError::Backend(BackendError::OutOfMemory(reason))) => {
        error!("物体检测中内存不足: {}", reason);
        self.evict();
        Detection {
          detections: Detections::empty_for(&phrases),
          outcome: DetectOutcome::OutOfMemory,
        }
      }
      Err(e) => {
        error!("物体检测中发生错误: {}", e);
        Detection {
          detections: Detections::empty_for(&phrases),
          outcome: DetectOutcome::BackendFailed(e.to_string()),
        }
      }
    }
  }

  /// 在 `region` 对应的裁剪图上检测，结果映射回原图坐标并记录
  pub fn detect_region(&mut self, image: &RgbImage, region: &Region, expression: &str) -> Detection {
    let (width, height) = (image.width(), image.height());
    let full = Region::full(width, height);

    let detection = if region.bbox() == full.bbox() {
      self.detect(image, expression)
    } else {
      let clamp_x = |v: i32| v.clamp(0, full.x2()) as u32;
      let clamp_y = |v: i32| v.clamp(0, full.y2()) as u32;
      let (x1, y1) = (clamp_x(region.x1()), clamp_y(region.y1()));
      let (x2, y2) = (clamp_x(region.x2()), clamp_y(region.y2()));

      if x2 <= x1 || y2 <= y1 {
        warn!("检测区域在图像之外: {}", region);
        Detection {
          detections: Detections::empty_for(&split_phrases(expression)),
          outcome: DetectOutcome::Empty,
        }
      } else {
        debug!("在裁剪区域 {} {} {} {} 上检测", x1, y1, x2, y2);
        let crop = image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
        let detection = self.detect(&crop, expression);
        Detection {
          detections: detection.detections.translate(x1 as i32, y1 as i32),
          outcome: detection.outcome,
        }
      }
    };

    self.records.push(DetectionRecord {
      expression: expression.to_string(),
      outcome: detection.outcome.clone(),
      regions: detection.detections.all_regions(),
    });
    detection
  }

  fn try_detect(
    &mut self,
    image: &RgbImage,
    prompt: &str,
    phrases: &[String],
  ) -> Result<Detection, DetectionError> {
    let box_threshold = self.effective_threshold(prompt);
    let text_threshold = self.policy.text_threshold;
    info!("检测对象: {}, 使用阈值: {}", prompt, box_threshold);

    let raw = {
      let loaded = self.ensure_loaded()?;
      loaded.backend.infer(&InferRequest {
        image,
        prompt,
        box_threshold,
        text_threshold,
      })?
    };
    debug!("检测结果: {:?}", raw);

    let mut coords = Vec::with_capacity(raw.len());
    for item in raw.items.iter() {
      if !item.score.is_finite() || item.bbox.iter().any(|v| !v.is_finite()) {
        return Err(BackendError::Malformed(format!("非有限数值: {:?}", item)).into());
      }
      coords.push(item.bbox.map(f64::from));
    }
    if self.policy.aspect_rescale {
      let (x_ratio, y_ratio) = geometry::image_ratio(image.width(), image.height());
      coords = geometry::rescale(&coords, x_ratio, y_ratio);
    }

    let mut set = DetectionSet::default();
    for (item, coords) in raw.items.iter().zip(coords) {
      // 先保留一位小数再截断为整数像素
      let bbox: BBox = coords.map(|v| round_to(v, 1) as i32);
      set.push(bbox, round_to(f64::from(item.score), 2), item.label.clone());
    }

    if set.is_empty() {
      return Ok(Detection {
        detections: Detections::empty_for(phrases),
        outcome: DetectOutcome::Empty,
      });
    }

    if !self.policy.nms_exempt.iter().any(|e| e == prompt) {
      set = geometry::nms(&set, self.policy.nms_iou);
    }
    debug!("NMS 后的结果: {:?}", set);

    let detections = group(&set, phrases)?;
    let outcome = if detections.total() == 0 {
      DetectOutcome::Empty
    } else {
      DetectOutcome::Found
    };
    Ok(Detection {
      detections,
      outcome,
    })
  }
}

fn to_region(bbox: &BBox, score: f64) -> Result<Region, RegionError> {
  Region::new(bbox[0], bbox[1], bbox[2], bbox[3], score)
}

fn group(set: &DetectionSet, phrases: &[String]) -> Result<Detections, RegionError> {
  if phrases.len() <= 1 {
    let regions = set
      .iter()
      .map(|(bbox, score, _)| to_region(bbox, score))
      .collect::<Result<Vec<_>, _>>()?;
    return Ok(Detections::Single(regions));
  }

  let mut groups = empty_groups(phrases);
  for (bbox, score, label) in set.iter() {
    let label = squash(label);
    if label.is_empty() {
      continue;
    }
    for (phrase, regions) in groups.iter_mut() {
      if label.contains(phrase.as_str()) {
        regions.push(to_region(bbox, score)?);
      }
    }
  }
  debug!("检测对象分组: {:?}", phrases);
  Ok(Detections::Grouped(groups))
}

/// 作用域阈值：析构时恢复之前的阈值
pub struct ThresholdScope<'a> {
  adapter: &'a mut DetectionAdapter,
  previous: Option<f32>,
}

impl Deref for ThresholdScope<'_> {
  type Target = DetectionAdapter;

  fn deref(&self) -> &Self::Target {
    self.adapter
  }
}

impl DerefMut for ThresholdScope<'_> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    self.adapter
  }
}

impl Drop for ThresholdScope<'_> {
  fn drop(&mut self) {
    self.adapter.threshold = self.previous;
  }
}
