// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 待检测图像的读取
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub const IMAGE_SCHEME: &str = "image";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch: expected 'image', found '{0}'")]
  SchemeMismatch(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoad(#[from] image::ImageError),
  #[error("没有可用的图像: {0}")]
  Missing(String),
}

/// 一张待检测的图像及其路径
#[derive(Debug, Clone)]
pub struct InspectionImage {
  path: String,
  pixels: RgbImage,
}

impl FromUrlWithScheme for InspectionImage {
  const SCHEME: &'static str = IMAGE_SCHEME;
}

impl FromUrl for InspectionImage {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        IMAGE_SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    InspectionImage::open(url.path())
  }
}

impl InspectionImage {
  pub fn new(path: impl Into<String>, pixels: RgbImage) -> Self {
    InspectionImage {
      path: path.into(),
      pixels,
    }
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    info!("读取图像: {}", path.display());
    let pixels = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .into_rgb8();
    Ok(InspectionImage::new(path.display().to_string(), pixels))
  }

  /// 未指定图像或图像文件不存在时使用备用图像
  pub fn open_or_fallback(path: Option<&Path>, fallback: Option<&Path>) -> Result<Self, InputError> {
    if let Some(path) = path
      && (path.exists() || fallback.is_none())
    {
      return InspectionImage::open(path);
    }
    match (path, fallback) {
      (_, Some(fallback)) if fallback.exists() => {
        match path {
          Some(path) => warn!("图像不存在: {}，使用默认图像: {}", path.display(), fallback.display()),
          None => info!("未指定图像，使用默认图像: {}", fallback.display()),
        }
        InspectionImage::open(fallback)
      }
      (_, Some(fallback)) => Err(InputError::Missing(format!(
        "默认图像不存在: {}",
        fallback.display()
      ))),
      (_, None) => Err(InputError::Missing("未指定图像路径".to_string())),
    }
  }

  /// `image:///path` 形式按 URL 解析，其余视为文件路径
  pub fn locate(location: &str) -> Result<Self, InputError> {
    InspectionImage::locate_or_fallback(location, None)
  }

  /// 同 [`InspectionImage::locate`]，文件不存在时改用备用图像
  pub fn locate_or_fallback(location: &str, fallback: Option<&Path>) -> Result<Self, InputError> {
    match Url::parse(location) {
      Ok(url) if url.scheme() == IMAGE_SCHEME => {
        let path = PathBuf::from(url.path());
        if fallback.is_some() && !path.exists() {
          InspectionImage::open_or_fallback(Some(&path), fallback)
        } else {
          InspectionImage::from_url(&url)
        }
      }
      _ => InspectionImage::open_or_fallback(Some(Path::new(location)), fallback),
    }
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn pixels(&self) -> &RgbImage {
    &self.pixels
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// 依次读取多张图像
pub struct ImageBatch {
  pending: VecDeque<PathBuf>,
}

impl ImageBatch {
  pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
    ImageBatch {
      pending: paths.into_iter().collect(),
    }
  }

  /// 目录下的图像文件，按文件名排序
  pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, InputError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        paths.push(path);
      }
    }
    paths.sort();
    info!("在 {} 中找到 {} 张图像", dir.as_ref().display(), paths.len());
    Ok(ImageBatch::new(paths))
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}

impl Iterator for ImageBatch {
  type Item = (PathBuf, Result<InspectionImage, InputError>);

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.pending.pop_front()?;
    let image = InspectionImage::open(&path);
    Some((path, image))
  }
}
