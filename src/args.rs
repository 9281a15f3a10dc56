// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{io::Read, path::PathBuf};

use clap::Parser;
use shanan_inspect::engine::Threshold;
use url::Url;

/// Shanan 检测例程执行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 例程文件路径，`-` 表示从标准输入读取
  #[arg(long, value_name = "FILE")]
  pub routine: String,

  /// 待检测图像（文件路径或 image:///path），可重复指定
  #[arg(long, value_name = "IMAGE")]
  pub image: Vec<String>,

  /// 未指定图像或图像不存在时使用的默认图像
  #[arg(long, value_name = "FILE")]
  pub fallback_image: Option<PathBuf>,

  /// 检测框置信度阈值 (0.1 - 0.9)
  #[arg(long, default_value_t = Threshold::default(), value_name = "THRESHOLD")]
  pub threshold: Threshold,

  /// 检测后端，按优先级重复指定
  /// 支持格式:
  /// - 回放记录: replay:///path/to/detections.json?tier=light|heavy
  #[arg(long = "backend", value_name = "BACKEND", required = true)]
  pub backends: Vec<Url>,

  /// 输出路径
  /// 支持格式:
  /// - 标注图像: image:///path/to/out.png
  /// - 归档目录: folder:///path/to/dir?always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 例程执行时间上限（秒）
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub timeout: u64,

  /// 以 JSON 输出判定
  #[arg(long)]
  pub json: bool,
}

impl Args {
  pub fn read_routine(&self) -> std::io::Result<String> {
    if self.routine == "-" {
      let mut code = String::new();
      std::io::stdin().read_to_string(&mut code)?;
      Ok(code)
    } else {
      std::fs::read_to_string(&self.routine)
    }
  }
}
