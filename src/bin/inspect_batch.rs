// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/inspect_batch.rs - 对目录下的图像连续执行检测例程
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_inspect::{
  FromUrl,
  engine::{InspectionEngine, Status, Threshold},
  input::ImageBatch,
  model::{BackendCandidate, CandidateWrapper},
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

/// 批量检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 例程文件路径
  #[arg(long, value_name = "FILE")]
  pub routine: PathBuf,
  /// 图像目录
  #[arg(long, value_name = "DIR")]
  pub dir: PathBuf,
  /// 检测后端，按优先级重复指定
  #[arg(long = "backend", value_name = "BACKEND", required = true)]
  pub backends: Vec<Url>,
  #[arg(long, default_value_t = Threshold::default(), value_name = "THRESHOLD")]
  pub threshold: Threshold,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 最多检测的图像数
  #[arg(long, value_name = "IMAGE_NUMBER")]
  pub image_number: Option<usize>,
  /// 将全部判定写入 JSON 文件
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("例程: {}", args.routine.display());
  info!("图像目录: {}", args.dir.display());

  let code = std::fs::read_to_string(&args.routine)
    .with_context(|| format!("无法读取例程: {}", args.routine.display()))?;
  let batch = ImageBatch::from_dir(&args.dir)?;

  let mut candidates: Vec<Box<dyn BackendCandidate>> = Vec::new();
  for url in &args.backends {
    candidates.push(Box::new(CandidateWrapper::from_url(url)?));
  }
  let mut engine = InspectionEngine::builder().candidates(candidates).build()?;
  let output = args.output.as_ref().map(OutputWrapper::from_url).transpose()?;

  let report = ContinuousTask::new(code, args.threshold)
    .with_image_number(args.image_number)
    .run_task(batch, &mut engine, output)?;

  for outcome in &report.outcomes {
    println!("{}\t{:?}\t{}", outcome.image, outcome.verdict.status, outcome.verdict.message);
  }
  println!(
    "合格 {}, 不合格 {}, 出错 {}{}",
    report.count(Status::Success),
    report.count(Status::Failure),
    report.count(Status::Error),
    if report.interrupted { " (已中断)" } else { "" }
  );

  if let Some(path) = &args.report {
    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    info!("判定已写入: {}", path.display());
  }

  Ok(())
}
