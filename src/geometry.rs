// 该文件是 Shanan （山南西风） 项目的一部分。
// src/geometry.rs - 检测几何后处理（IoU、NMS、去重、过滤、缩放）
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

use crate::{region::Region, utils::round_to};

/// `[x_min, y_min, x_max, y_max]`，像素坐标
pub type BBox = [i32; 4];

/// 跨类别去重时的 IoU 阈值
pub const OVERLAP_IOU: f64 = 0.5;
/// 高度达到该值的区域视为整图误检
pub const OVERSIZED_HEIGHT: i32 = 800;

/// 交并比，按像素计数（每个维度 +1）
pub fn iou(a: &BBox, b: &BBox) -> f64 {
  let area = |r: &BBox| (r[2] as i64 - r[0] as i64 + 1) * (r[3] as i64 - r[1] as i64 + 1);

  let w = (a[2].min(b[2]) as i64 - a[0].max(b[0]) as i64 + 1).max(0);
  let h = (a[3].min(b[3]) as i64 - a[1].max(b[1]) as i64 + 1).max(0);
  let intersection = w * h;
  let union = area(a) + area(b) - intersection;

  if union > 0 {
    intersection as f64 / union as f64
  } else {
    0.0
  }
}

/// 交并比，按连续面积计算（不加 1），NMS 使用
pub fn iou_exclusive(a: &BBox, b: &BBox) -> f64 {
  let area = |r: &BBox| (r[2] as i64 - r[0] as i64) * (r[3] as i64 - r[1] as i64);

  let w = (a[2].min(b[2]) as i64 - a[0].max(b[0]) as i64).max(0);
  let h = (a[3].min(b[3]) as i64 - a[1].max(b[1]) as i64).max(0);
  let intersection = w * h;
  let union = area(a) + area(b) - intersection;

  if union > 0 {
    intersection as f64 / union as f64
  } else {
    0.0
  }
}

/// 一次后端调用得到的 (boxes, scores, labels) 三元组
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  pub boxes: Vec<BBox>,
  pub scores: Vec<f64>,
  pub labels: Vec<String>,
}

impl DetectionSet {
  pub fn push(&mut self, bbox: BBox, score: f64, label: impl Into<String>) {
    self.boxes.push(bbox);
    self.scores.push(score);
    self.labels.push(label.into());
  }

  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&BBox, f64, &str)> {
    self
      .boxes
      .iter()
      .zip(self.scores.iter().copied())
      .zip(self.labels.iter().map(String::as_str))
      .map(|((bbox, score), label)| (bbox, score, label))
  }

  /// 按给定下标顺序挑选子集
  pub fn select(&self, indices: &[usize]) -> Self {
    let mut selected = DetectionSet::default();
    for &i in indices {
      selected.push(self.boxes[i], self.scores[i], self.labels[i].clone());
    }
    selected
  }
}

/// 非极大值抑制，返回保留下来的下标（按选取顺序）
pub fn nms_keep(boxes: &[BBox], scores: &[f64], iou_thresh: f64) -> Vec<usize> {
  let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
  // 稳定排序：分数相同时保持检测器给出的顺序
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut keep = Vec::with_capacity(order.len());
  while let Some(&best) = order.first() {
    keep.push(best);
    order.retain(|&i| i != best && iou_exclusive(&boxes[best], &boxes[i]) <= iou_thresh);
  }
  keep
}

pub fn nms(set: &DetectionSet, iou_thresh: f64) -> DetectionSet {
  set.select(&nms_keep(&set.boxes, &set.scores, iou_thresh))
}

/// 跨列表去重：IoU 超过 0.5 的一对中删除分数较低的一方，分数相同时保留第一个列表的元素。
///
/// 结果依赖遍历顺序：三个以上跨列表互相重叠的区域没有确定的全序。
pub fn delete_overlaps(first: &mut Vec<Region>, second: &mut Vec<Region>) {
  let mut i = 0;
  while i < first.len() {
    let mut removed = false;
    let mut j = 0;
    while j < second.len() {
      if iou(&first[i].bbox(), &second[j].bbox()) > OVERLAP_IOU {
        if first[i].score() >= second[j].score() {
          second.remove(j);
          continue;
        }
        first.remove(i);
        removed = true;
        break;
      }
      j += 1;
    }
    if !removed {
      i += 1;
    }
  }
}

/// 去掉高度不小于 `max_height` 的区域
pub fn drop_oversized(regions: Vec<Region>, max_height: i32) -> Vec<Region> {
  regions
    .into_iter()
    .filter(|r| r.height() < max_height)
    .collect()
}

/// 由图像宽高得到 (x_ratio, y_ratio)：长边方向保持 1
pub fn image_ratio(width: u32, height: u32) -> (f64, f64) {
  if width == 0 || height == 0 {
    return (1.0, 1.0);
  }
  if width > height {
    (1.0, width as f64 / height as f64)
  } else {
    (height as f64 / width as f64, 1.0)
  }
}

/// 把检测器坐标映射到按宽高比换算的图像坐标
pub fn rescale(boxes: &[[f64; 4]], x_ratio: f64, y_ratio: f64) -> Vec<[f64; 4]> {
  boxes
    .iter()
    .map(|b| {
      let b = b.map(|v| round_to(v, 2));
      [
        round_to(b[0] * x_ratio, 3),
        round_to(b[1] * y_ratio, 3),
        round_to(b[2] * x_ratio, 3),
        round_to(b[3] * y_ratio, 3),
      ]
    })
    .collect()
}
