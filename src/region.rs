// 该文件是 Shanan （山南西风） 项目的一部分。
// src/region.rs - 区域（边界框）定义
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

use serde::Serialize;
use thiserror::Error;

use crate::utils::format_float;

/// 扩展区域时使用的归一化画布上限（999×999）
pub const CANVAS_LIMIT: i32 = 999;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
  #[error("边界框坐标反转: ({x1}, {y1}, {x2}, {y2})")]
  Inverted { x1: i32, y1: i32, x2: i32, y2: i32 },
  #[error("置信度超出 [0, 1] 范围: {0}")]
  ScoreOutOfRange(f64),
}

/// 轴对齐的边界框，坐标以图像左上角为原点。
///
/// 构造后不可变；`upper` 对应 `y1`，`lower` 对应 `y2`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
  x1: i32,
  y1: i32,
  x2: i32,
  y2: i32,
  score: f64,
}

impl Region {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, score: f64) -> Result<Self, RegionError> {
    if x1 > x2 || y1 > y2 {
      return Err(RegionError::Inverted { x1, y1, x2, y2 });
    }
    if !(0.0..=1.0).contains(&score) {
      return Err(RegionError::ScoreOutOfRange(score));
    }
    Ok(Self {
      x1,
      y1,
      x2,
      y2,
      score,
    })
  }

  /// 覆盖整幅图像的区域
  pub fn full(width: u32, height: u32) -> Self {
    Self {
      x1: 0,
      y1: 0,
      x2: i32::try_from(width).unwrap_or(i32::MAX),
      y2: i32::try_from(height).unwrap_or(i32::MAX),
      score: 1.0,
    }
  }

  /// 以新的置信度重建同一边界框
  pub fn with_score(&self, score: f64) -> Result<Self, RegionError> {
    Self::new(self.x1, self.y1, self.x2, self.y2, score)
  }

  pub fn x1(&self) -> i32 {
    self.x1
  }

  pub fn y1(&self) -> i32 {
    self.y1
  }

  pub fn x2(&self) -> i32 {
    self.x2
  }

  pub fn y2(&self) -> i32 {
    self.y2
  }

  pub fn left(&self) -> i32 {
    self.x1
  }

  pub fn right(&self) -> i32 {
    self.x2
  }

  pub fn upper(&self) -> i32 {
    self.y1
  }

  pub fn lower(&self) -> i32 {
    self.y2
  }

  pub fn width(&self) -> i32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> i32 {
    self.y2 - self.y1
  }

  pub fn horizontal_center(&self) -> f64 {
    (self.x1 as f64 + self.x2 as f64) / 2.0
  }

  pub fn vertical_center(&self) -> f64 {
    (self.y1 as f64 + self.y2 as f64) / 2.0
  }

  pub fn score(&self) -> f64 {
    self.score
  }

  /// `[x1, y1, x2, y2]`
  pub fn bbox(&self) -> [i32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }

  /// 平移区域（用于把裁剪图内的检测结果映射回原图）
  pub fn translate(&self, dx: i32, dy: i32) -> Self {
    Self {
      x1: self.x1.saturating_add(dx),
      y1: self.y1.saturating_add(dy),
      x2: self.x2.saturating_add(dx),
      y2: self.y2.saturating_add(dy),
      score: self.score,
    }
  }

  /// 判断两个区域是否相交。
  ///
  /// 水平方向比较左右边，竖直方向以 `lower`/`upper` 的命名约定比较。
  pub fn overlaps(&self, other: &Region) -> bool {
    if other.right() < self.left() || self.right() < other.left() {
      return false;
    }
    if other.lower() < self.upper() || self.lower() < other.upper() {
      return false;
    }
    true
  }

  /// 以同一中心将宽高各扩大一倍，并限制在 999×999 的归一化画布内。
  ///
  /// 两侧各向外扩展半个宽（高），奇数时向上取整，
  /// 中心保持不变，结果是包含精确扩展框的最小整数框。
  pub fn expand_with_surrounding(&self) -> Self {
    let half_w = (self.width() + 1) / 2;
    let half_h = (self.height() + 1) / 2;

    let x1 = self.x1.saturating_sub(half_w).clamp(0, CANVAS_LIMIT);
    let x2 = self.x2.saturating_add(half_w).clamp(0, CANVAS_LIMIT);
    let y1 = self.y1.saturating_sub(half_h).clamp(0, CANVAS_LIMIT);
    let y2 = self.y2.saturating_add(half_h).clamp(0, CANVAS_LIMIT);

    Self {
      x1,
      y1,
      x2,
      y2,
      score: 1.0,
    }
  }

  /// `"x1 y1 x2 y2"`
  pub fn describe(&self) -> String {
    format!("{} {} {} {}", self.x1, self.y1, self.x2, self.y2)
  }
}

impl fmt::Display for Region {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} score: {}", self.describe(), format_float(self.score))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn region(x1: i32, y1: i32, x2: i32, y2: i32) -> Region {
    Region::new(x1, y1, x2, y2, 0.5).unwrap()
  }

  #[test]
  fn derived_geometry() {
    let r = region(10, 20, 50, 80);
    assert_eq!(r.width(), 40);
    assert_eq!(r.height(), 60);
    assert_eq!(r.horizontal_center(), 30.0);
    assert_eq!(r.vertical_center(), 50.0);
    assert_eq!(r.upper(), 20);
    assert_eq!(r.lower(), 80);
    assert_eq!(r.to_string(), "10 20 50 80 score: 0.5");
  }

  #[test]
  fn rejects_inverted_bounds_and_bad_scores() {
    assert!(matches!(
      Region::new(5, 0, 4, 10, 0.5),
      Err(RegionError::Inverted { .. })
    ));
    assert!(Region::new(0, 0, 1, 1, 1.5).is_err());
    assert!(Region::new(0, 0, 1, 1, f64::NAN).is_err());
  }

  #[test]
  fn full_region_spans_image() {
    let r = Region::full(640, 480);
    assert_eq!(r.bbox(), [0, 0, 640, 480]);
    assert_eq!(r.to_string(), "0 0 640 480 score: 1.0");
  }

  #[test]
  fn overlap_test() {
    let a = region(0, 0, 10, 10);
    assert!(a.overlaps(&region(5, 5, 15, 15)));
    assert!(a.overlaps(&region(10, 10, 20, 20)));
    assert!(!a.overlaps(&region(11, 0, 20, 10)));
    assert!(!a.overlaps(&region(0, 11, 10, 20)));
    assert!(!region(0, 11, 10, 20).overlaps(&a));
  }

  #[test]
  fn expand_doubles_and_clamps() {
    let r = region(100, 100, 140, 160).expand_with_surrounding();
    assert_eq!(r.bbox(), [80, 70, 160, 190]);
    assert_eq!(r.width(), 80);
    assert_eq!(r.height(), 120);

    let edge = region(0, 900, 100, 990).expand_with_surrounding();
    assert_eq!(edge.bbox(), [0, 855, 150, 999]);
  }

  #[test]
  fn expand_keeps_the_center_for_odd_sizes() {
    let odd = region(100, 100, 141, 127);
    let r = odd.expand_with_surrounding();
    assert_eq!(r.bbox(), [79, 86, 162, 141]);
    assert_eq!(r.horizontal_center(), odd.horizontal_center());
    assert_eq!(r.vertical_center(), odd.vertical_center());
    assert_eq!(r.width(), 83);
    assert_eq!(r.height(), 55);
  }
}
