// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测判定可视化
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
  rect::Rect,
};

use crate::{
  engine::{Status, Verdict},
  input::InspectionImage,
  region::Region,
};

const BOX_THICKNESS: i32 = 2;
const STATUS_BAR_HEIGHT: u32 = 6;

// 每个检测表达式轮换一种颜色
const PALETTE: &[[u8; 3]] = &[
  [0, 0, 255],
  [255, 128, 0],
  [0, 200, 200],
  [200, 0, 200],
  [255, 255, 0],
];

const SUCCESS_COLOR: [u8; 3] = [0, 192, 0];
const FAILURE_COLOR: [u8; 3] = [224, 0, 0];
const ERROR_COLOR: [u8; 3] = [128, 128, 128];

pub struct Draw {
  thickness: i32,
  status_bar_height: u32,
  palette: Vec<[u8; 3]>,
}

impl Default for Draw {
  fn default() -> Self {
    Draw {
      thickness: BOX_THICKNESS,
      status_bar_height: STATUS_BAR_HEIGHT,
      palette: PALETTE.to_vec(),
    }
  }
}

fn status_color(status: Status) -> [u8; 3] {
  match status {
    Status::Success => SUCCESS_COLOR,
    Status::Failure => FAILURE_COLOR,
    Status::Error => ERROR_COLOR,
  }
}

impl Draw {
  // 区域坐标为原图像素坐标，超出部分裁掉
  fn draw_region(&self, image: &mut RgbImage, region: &Region, color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x_min = region.x1().clamp(0, w - 1);
    let y_min = region.y1().clamp(0, h - 1);
    let x_max = region.x2().clamp(0, w - 1);
    let y_max = region.y2().clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  // 图像顶部的状态条：绿色合格，红色不合格，灰色出错
  fn draw_status(&self, image: &mut RgbImage, status: Status) {
    let height = self.status_bar_height.min(image.height());
    if height == 0 || image.width() == 0 {
      return;
    }
    let bar = Rect::at(0, 0).of_size(image.width(), height);
    draw_filled_rect_mut(image, bar, Rgb(status_color(status)));
  }

  pub fn draw_verdict(&self, image: &InspectionImage, verdict: &Verdict) -> RgbImage {
    let mut canvas = image.pixels().clone();
    if canvas.width() == 0 || canvas.height() == 0 {
      return canvas;
    }
    for (index, record) in verdict.detections.iter().enumerate() {
      let color = self.palette[index % self.palette.len()];
      for region in &record.regions {
        self.draw_region(&mut canvas, region, color);
      }
    }
    self.draw_status(&mut canvas, verdict.status);
    canvas
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::{DetectOutcome, DetectionRecord};

  fn verdict(status: Status, regions: Vec<Region>) -> Verdict {
    Verdict {
      status,
      score: None,
      message: String::new(),
      output_text: String::new(),
      error_type: None,
      memory_warning: None,
      detections: vec![DetectionRecord {
        expression: "apple".to_string(),
        outcome: DetectOutcome::Found,
        regions,
      }],
    }
  }

  #[test]
  fn draws_boxes_and_status_bar() {
    let image = InspectionImage::new("blank.png", RgbImage::new(40, 40));
    let region = Region::new(10, 10, 30, 30, 0.9).unwrap();
    let canvas = Draw::default().draw_verdict(&image, &verdict(Status::Failure, vec![region]));

    assert_eq!(canvas.get_pixel(20, 0).0, FAILURE_COLOR);
    assert_eq!(canvas.get_pixel(10, 20).0, PALETTE[0]);
    assert_eq!(canvas.get_pixel(20, 20).0, [0, 0, 0]);
  }

  #[test]
  fn regions_outside_the_image_are_skipped() {
    let image = InspectionImage::new("blank.png", RgbImage::new(20, 20));
    let region = Region::new(50, 50, 80, 80, 0.9).unwrap();
    let canvas = Draw::default().draw_verdict(&image, &verdict(Status::Success, vec![region]));
    assert_eq!(canvas.get_pixel(10, 10).0, [0, 0, 0]);
    assert_eq!(canvas.get_pixel(10, 0).0, SUCCESS_COLOR);
  }

  #[test]
  fn status_bar_spans_the_full_width() {
    let image = InspectionImage::new("blank.png", RgbImage::new(40, 40));
    let canvas = Draw::default().draw_verdict(&image, &verdict(Status::Error, Vec::new()));
    let bottom = STATUS_BAR_HEIGHT - 1;
    assert_eq!(canvas.get_pixel(0, 0).0, ERROR_COLOR);
    assert_eq!(canvas.get_pixel(39, bottom).0, ERROR_COLOR);
    assert_eq!(canvas.get_pixel(39, STATUS_BAR_HEIGHT).0, [0, 0, 0]);

    let short = InspectionImage::new("short.png", RgbImage::new(8, 3));
    let canvas = Draw::default().draw_verdict(&short, &verdict(Status::Success, Vec::new()));
    assert!(canvas.pixels().all(|p| p.0 == SUCCESS_COLOR));
  }
}
