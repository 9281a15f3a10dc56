// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 按日期目录归档检测判定
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

use std::{
  path::PathBuf,
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{Status, Verdict},
  input::InspectionImage,
  output::{Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("判定序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct VerdictRecord<'a> {
  image: &'a str,
  verdict: &'a Verdict,
}

/// 记录方式：`draw` 保存标注后的图像，`raw` 保存原图；两者都附带判定 JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
  Draw,
  Raw,
}

/// `folder:///dir[?always][&record=raw]`
///
/// 默认只归档不合格或出错的判定，带 `always` 时全部归档。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  kind: RecordKind,
  counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| if v == "raw" { RecordKind::Raw } else { RecordKind::Draw })
      .unwrap_or(RecordKind::Draw);
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::default(),
      kind,
      counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn record_id(&self) -> u16 {
    self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// `<dir>/<年>/<月>/<日>/<时-分-秒>-<序号>`，不含扩展名
  fn record_stem(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }

  fn should_record(&self, verdict: &Verdict) -> bool {
    self.always || verdict.status != Status::Success
  }
}

impl Render<InspectionImage, Verdict> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &InspectionImage, result: &Verdict) -> Result<(), Self::Error> {
    if !self.should_record(result) {
      debug!("判定合格，跳过归档: {}", frame.path());
      return Ok(());
    }

    let stem = self.record_stem()?;
    let image = match self.kind {
      RecordKind::Draw => self.draw.draw_verdict(frame, result),
      RecordKind::Raw => frame.pixels().clone(),
    };
    image.save(stem.with_extension("png"))?;

    let record = VerdictRecord {
      image: frame.path(),
      verdict: result,
    };
    std::fs::write(stem.with_extension("json"), serde_json::to_string_pretty(&record)?)?;

    info!("归档检测判定: {}", stem.display());
    Ok(())
  }
}
