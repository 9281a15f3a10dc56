// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 检测例程命令行入口
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

mod args;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use shanan_inspect::{
  FromUrl,
  engine::InspectionEngine,
  input::InspectionImage,
  model::{BackendCandidate, CandidateWrapper},
  output::OutputWrapper,
  script::ExecutionLimits,
  task::{ContinuousTask, ImageItem, OneShotTask, Task, TaskReport},
};

fn print_report(report: &TaskReport, json: bool) -> Result<()> {
  if json {
    let text = match report.outcomes.as_slice() {
      [single] => serde_json::to_string_pretty(single)?,
      _ => serde_json::to_string_pretty(report)?,
    };
    println!("{}", text);
    return Ok(());
  }

  for outcome in &report.outcomes {
    let verdict = &outcome.verdict;
    println!("{}: {:?} - {}", outcome.image, verdict.status, verdict.message);
    if let Some(score) = verdict.score {
      println!("  score: {}", score);
    }
    for line in verdict.output_text.lines() {
      println!("  | {}", line);
    }
  }
  Ok(())
}

fn run(args: args::Args) -> Result<i32> {
  info!("例程: {}", args.routine);
  info!("阈值: {}", args.threshold);

  let code = args
    .read_routine()
    .with_context(|| format!("无法读取例程: {}", args.routine))?;

  let mut candidates: Vec<Box<dyn BackendCandidate>> = Vec::with_capacity(args.backends.len());
  for url in &args.backends {
    info!("检测后端: {}", url);
    candidates.push(Box::new(CandidateWrapper::from_url(url)?));
  }

  let limits = ExecutionLimits {
    timeout: Duration::from_secs(args.timeout),
    ..ExecutionLimits::default()
  };
  let mut engine = InspectionEngine::builder()
    .candidates(candidates)
    .limits(limits)
    .build()?;

  let images: Vec<ImageItem> = if args.image.is_empty() {
    let image = InspectionImage::open_or_fallback(None, args.fallback_image.as_deref())?;
    vec![(PathBuf::from(image.path()), Ok(image))]
  } else {
    args
      .image
      .iter()
      .map(|location| {
        let image = InspectionImage::locate_or_fallback(location, args.fallback_image.as_deref());
        (PathBuf::from(location), image)
      })
      .collect()
  };

  let output = args.output.as_ref().map(OutputWrapper::from_url).transpose()?;
  if let Some(url) = &args.output {
    info!("输出路径: {}", url);
  }

  let report = if images.len() == 1 {
    OneShotTask::new(code, args.threshold).run_task(images, &mut engine, output)?
  } else {
    ContinuousTask::new(code, args.threshold).run_task(images, &mut engine, output)?
  };

  print_report(&report, args.json)?;
  Ok(report.exit_code())
}

fn main() {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let args = args::Args::parse();
  let code = match run(args) {
    Ok(code) => code,
    Err(e) => {
      error!("{:#}", e);
      eprintln!("Error: {:#}", e);
      2
    }
  };
  std::process::exit(code);
}
