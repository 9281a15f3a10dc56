// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 检测任务：单张与连续
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
  thread,
  time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  engine::{InspectionEngine, Status, Threshold, Verdict},
  input::{InputError, InspectionImage},
  output::Render,
};

/// 任务输入：图像路径与读取结果
pub type ImageItem = (PathBuf, Result<InspectionImage, InputError>);

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(self, input: I, engine: &mut InspectionEngine, output: O) -> Result<TaskReport, Self::Error>;
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionOutcome {
  pub image: String,
  #[serde(flatten)]
  pub verdict: Verdict,
}

#[derive(Debug, Default, Serialize)]
pub struct TaskReport {
  pub outcomes: Vec<InspectionOutcome>,
  pub interrupted: bool,
}

impl TaskReport {
  /// 取所有判定中最差的退出码；没有检测任何图像时视为出错
  pub fn exit_code(&self) -> i32 {
    self
      .outcomes
      .iter()
      .map(|o| o.verdict.exit_code())
      .max()
      .unwrap_or(2)
  }

  pub fn count(&self, status: Status) -> usize {
    self
      .outcomes
      .iter()
      .filter(|o| o.verdict.status == status)
      .count()
  }
}

/// 一段例程及其阈值
#[derive(Debug, Clone)]
struct Routine {
  code: String,
  threshold: Threshold,
}

impl Routine {
  fn inspect<O>(
    &self,
    engine: &mut InspectionEngine,
    (path, image): ImageItem,
    output: &O,
  ) -> Result<InspectionOutcome, O::Error>
  where
    O: Render<InspectionImage, Verdict>,
  {
    let name = path.display().to_string();
    let image = match image {
      Ok(image) => image,
      Err(e) => {
        error!("无法读取图像 {}: {}", name, e);
        return Ok(InspectionOutcome {
          image: name,
          verdict: Verdict::system_error(e),
        });
      }
    };

    let now = Instant::now();
    let verdict = engine.run(&self.code, &image, self.threshold);
    let elapsed_a = now.elapsed();
    output.render_result(&image, &verdict)?;
    info!(
      "{}: {:?}, 检测耗时: {:.2?} / {:.2?}",
      name,
      verdict.status,
      elapsed_a,
      now.elapsed()
    );
    Ok(InspectionOutcome {
      image: image.path().to_string(),
      verdict,
    })
  }
}

/// 只检测第一张图像
pub struct OneShotTask {
  routine: Routine,
}

impl OneShotTask {
  pub fn new(code: impl Into<String>, threshold: Threshold) -> Self {
    OneShotTask {
      routine: Routine {
        code: code.into(),
        threshold,
      },
    }
  }
}

impl<RE, I, O> Task<I, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: IntoIterator<Item = ImageItem>,
  O: Render<InspectionImage, Verdict, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, engine: &mut InspectionEngine, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let item = input
      .into_iter()
      .next()
      .ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    let outcome = self.routine.inspect(engine, item, &output)?;
    Ok(TaskReport {
      outcomes: vec![outcome],
      interrupted: false,
    })
  }
}

/// 依次检测所有图像，Ctrl-C 后在当前图像完成时停止
#[derive(Debug)]
pub struct ContinuousTask {
  routine: Routine,
  image_number: Option<usize>,
}

impl ContinuousTask {
  pub fn new(code: impl Into<String>, threshold: Threshold) -> Self {
    ContinuousTask {
      routine: Routine {
        code: code.into(),
        threshold,
      },
      image_number: None,
    }
  }

  pub fn with_image_number(mut self, image_number: Option<usize>) -> Self {
    self.image_number = image_number;
    self
  }
}

impl<RE, I, O> Task<I, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: IntoIterator<Item = ImageItem>,
  O: Render<InspectionImage, Verdict, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, engine: &mut InspectionEngine, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    // 每个进程只能注册一次处理函数
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，当前图像完成后退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(2);
      });
    }) {
      warn!("无法注册 Ctrl-C 处理函数: {}", e);
    }

    let mut report = TaskReport::default();
    for item in input {
      info!("处理第 {} 张图像: {}", report.outcomes.len() + 1, item.0.display());
      let outcome = self.routine.inspect(engine, item, &output)?;
      report.outcomes.push(outcome);

      if self
        .image_number
        .is_some_and(|n| report.outcomes.len() >= n)
      {
        info!("达到指定图像数 {}, 退出任务循环", report.outcomes.len());
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        report.interrupted = true;
        break;
      }
    }

    info!(
      "任务完成: 合格 {}, 不合格 {}, 出错 {}",
      report.count(Status::Success),
      report.count(Status::Failure),
      report.count(Status::Error)
    );
    Ok(report)
  }
}
