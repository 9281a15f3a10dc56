// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sandbox.rs - 例程提取与受限执行
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  capability::{CapabilitySurface, Host},
  detector::{DetectionAdapter, Detections},
  model::Captioner,
  region::Region,
  script::{ExecutionLimits, ImageInfo, Interpreter, ScriptError, StmtKind, Value, parse_module},
};

/// 例程入口函数名
pub const ENTRY_POINT: &str = "execute_command";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
  #[error("No function found in the routine")]
  NoFunctionFound,
  #[error("Routine entry must be `execute_command(image_path, image)`, found `{0}`")]
  BadEntryPoint(String),
  #[error(transparent)]
  Script(#[from] ScriptError),
}

/// 例程输出的执行轨迹
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Trace {
  text: String,
}

impl Trace {
  pub fn push(&mut self, text: &str) {
    for line in text.lines().filter(|l| !l.is_empty()) {
      info!(target: "routine", "{}", line);
    }
    self.text.push_str(text);
  }

  pub fn as_str(&self) -> &str {
    &self.text
  }

  pub fn is_empty(&self) -> bool {
    self.text.is_empty()
  }

  pub fn into_string(self) -> String {
    self.text
  }
}

#[derive(Debug)]
pub struct Execution {
  pub value: Value,
  pub trace: Trace,
}

/// 执行失败时仍带回已产生的轨迹
#[derive(Debug)]
pub struct SandboxFailure {
  pub error: SandboxError,
  pub trace: Trace,
}

fn indent_of(line: &str) -> usize {
  line.len() - line.trim_start().len()
}

/// 从生成的文本中取出第一个顶层函数定义并去掉缩进。
///
/// 代码围栏行（```` ``` ```` 及语言标记）先被移除；函数体为定义行之后
/// 所有空行或缩进更深的行。
pub fn extract_routine(code: &str) -> Result<String, SandboxError> {
  let lines: Vec<&str> = code
    .lines()
    .filter(|line| !line.trim_start().starts_with("```"))
    .collect();

  let start = lines
    .iter()
    .position(|line| line.trim_start().starts_with("def "))
    .ok_or(SandboxError::NoFunctionFound)?;
  let header_indent = indent_of(lines[start]);

  let mut end = start + 1;
  while end < lines.len() {
    let line = lines[end];
    if !line.trim().is_empty() && indent_of(line) <= header_indent {
      break;
    }
    end += 1;
  }
  while end > start + 1 && lines[end - 1].trim().is_empty() {
    end -= 1;
  }

  let routine: Vec<&str> = lines[start..end]
    .iter()
    .map(|line| line.get(header_indent..).unwrap_or("").trim_end())
    .collect();
  Ok(routine.join("\n") + "\n")
}

/// 例程执行期间的宿主：轨迹、检测与描述
struct SandboxHost<'a> {
  image: &'a RgbImage,
  adapter: &'a mut DetectionAdapter,
  captioner: Option<&'a dyn Captioner>,
  trace: &'a mut Trace,
}

impl Host for SandboxHost<'_> {
  fn emit(&mut self, text: &str) {
    self.trace.push(text);
  }

  fn find(&mut self, region: &Region, expression: &str) -> Detections {
    let detection = self.adapter.detect_region(self.image, region, expression);
    if detection.outcome.is_failure() {
      warn!("检测 {:?} 未成功: {:?}", expression, detection.outcome);
    }
    detection.detections
  }

  fn caption(&mut self, region: &Region) -> Option<String> {
    let captioner = self.captioner?;
    let (width, height) = (self.image.width(), self.image.height());
    let x1 = region.x1().clamp(0, width as i32) as u32;
    let y1 = region.y1().clamp(0, height as i32) as u32;
    let x2 = region.x2().clamp(0, width as i32) as u32;
    let y2 = region.y2().clamp(0, height as i32) as u32;
    if x2 <= x1 || y2 <= y1 {
      warn!("描述区域在图像之外: {}", region);
      return None;
    }
    let crop = image::imageops::crop_imm(self.image, x1, y1, x2 - x1, y2 - y1).to_image();
    match captioner.caption(&crop) {
      Ok(caption) => Some(caption),
      Err(e) => {
        warn!("区域描述失败: {}", e);
        None
      }
    }
  }
}

/// 受限执行环境：能力表与执行上限
pub struct Sandbox {
  surface: CapabilitySurface,
  limits: ExecutionLimits,
}

impl Default for Sandbox {
  fn default() -> Self {
    Sandbox::new(ExecutionLimits::default())
  }
}

/// 一次执行的输入
pub struct Invocation<'a> {
  pub code: &'a str,
  pub image_path: &'a str,
  pub image: &'a RgbImage,
  pub threshold: f32,
}

impl Sandbox {
  pub fn new(limits: ExecutionLimits) -> Self {
    Sandbox {
      surface: CapabilitySurface::standard(),
      limits,
    }
  }

  pub fn limits(&self) -> &ExecutionLimits {
    &self.limits
  }

  /// 提取并执行例程。阈值仅在本次执行期间生效
  pub fn execute(
    &self,
    invocation: &Invocation<'_>,
    adapter: &mut DetectionAdapter,
    captioner: Option<&dyn Captioner>,
  ) -> Result<Execution, SandboxFailure> {
    let mut trace = Trace::default();
    match self.run(invocation, adapter, captioner, &mut trace) {
      Ok(value) => Ok(Execution { value, trace }),
      Err(error) => Err(SandboxFailure { error, trace }),
    }
  }

  fn run(
    &self,
    invocation: &Invocation<'_>,
    adapter: &mut DetectionAdapter,
    captioner: Option<&dyn Captioner>,
    trace: &mut Trace,
  ) -> Result<Value, SandboxError> {
    let routine = extract_routine(invocation.code)?;
    debug!("提取的例程:\n{}", routine);
    let body = parse_module(&routine)?;

    let entry = body.iter().find_map(|stmt| match &stmt.kind {
      StmtKind::FunctionDef(def) => Some(def.clone()),
      _ => None,
    });
    let Some(entry) = entry else {
      return Err(SandboxError::NoFunctionFound);
    };
    if entry.name != ENTRY_POINT || entry.params.len() != 2 {
      let params: Vec<&str> = entry.params.iter().map(|p| p.name.as_str()).collect();
      return Err(SandboxError::BadEntryPoint(format!(
        "{}({})",
        entry.name,
        params.join(", ")
      )));
    }

    let mut scoped = adapter.scoped_threshold(invocation.threshold);
    let mut host = SandboxHost {
      image: invocation.image,
      adapter: &mut *scoped,
      captioner,
      trace,
    };
    let mut interp = Interpreter::new(&self.surface, &mut host, self.limits);
    let globals = interp.run_module(&body)?;
    let Some(function) = globals.get(ENTRY_POINT) else {
      return Err(SandboxError::NoFunctionFound);
    };

    info!("执行例程 {}", ENTRY_POINT);
    let image = Value::Image(ImageInfo {
      width: invocation.image.width(),
      height: invocation.image.height(),
    });
    let value = interp.call(&function, vec![Value::str(invocation.image_path), image], vec![])?;
    debug!("例程执行 {} 步", interp.steps());
    Ok(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detector::DetectionPolicy,
    model::{
      BackendCandidate, BackendError, BackendTier, DetectItem, DetectionBackend, ReplayBackend,
    },
    resource::{ResourceGuard, StaticMemorySampler},
    script::ErrorKind,
  };

  struct FixedCandidate(Vec<DetectItem>);

  impl BackendCandidate for FixedCandidate {
    fn id(&self) -> &str {
      "fixed"
    }

    fn tier(&self) -> BackendTier {
      BackendTier::Light
    }

    fn load(&self) -> Result<Box<dyn DetectionBackend>, BackendError> {
      Ok(Box::new(ReplayBackend::from_items("fixed", self.0.clone())))
    }
  }

  fn apple(x: f32) -> DetectItem {
    DetectItem {
      label: "apple".to_string(),
      score: 0.8,
      bbox: [x, 10.0, x + 20.0, 30.0],
    }
  }

  fn adapter(items: Vec<DetectItem>) -> DetectionAdapter {
    DetectionAdapter::new(
      vec![Box::new(FixedCandidate(items))],
      ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(8.0, 16.0))),
      DetectionPolicy::default(),
    )
  }

  fn execute(code: &str, adapter: &mut DetectionAdapter) -> Result<Execution, SandboxFailure> {
    let image = RgbImage::new(200, 100);
    let invocation = Invocation {
      code,
      image_path: "sample.png",
      image: &image,
      threshold: 0.5,
    };
    Sandbox::default().execute(&invocation, adapter, None)
  }

  #[test]
  fn extracts_first_function_from_fenced_text() {
    let code = "Here is the routine:\n```python\n    def execute_command(image_path, image):\n        x = 1\n\n        return x\n    print('outside')\n```\n";
    let routine = extract_routine(code).unwrap();
    assert_eq!(routine, "def execute_command(image_path, image):\n    x = 1\n\n    return x\n");

    assert_eq!(
      extract_routine("print('no function here')"),
      Err(SandboxError::NoFunctionFound)
    );
  }

  #[test]
  fn runs_routine_with_detections() {
    let mut adapter = adapter(vec![apple(0.0), apple(100.0)]);
    let code = r#"
def execute_command(image_path, image):
    image_patch = ImagePatch(image)
    apples = image_patch.find("apple")
    print(f"Number of apples is {len(apples)}")
    anomaly_score = 0 if len(apples) == 2 else 1
    return formatting_answer(anomaly_score)
"#;
    let execution = execute(code, &mut adapter).unwrap();
    assert!(execution.value.py_eq(&Value::Int(0)));
    assert_eq!(
      execution.trace.as_str(),
      "Calling find function . Detect apple.\nNumber of apples is 2\nProgram output: 0\n"
    );
    assert_eq!(adapter.threshold(), None);
    assert_eq!(adapter.take_records().len(), 1);
  }

  #[test]
  fn failures_keep_partial_trace_and_restore_threshold() {
    let mut adapter = adapter(Vec::new());
    let code = "def execute_command(image_path, image):\n    print('start')\n    return undefined_name\n";
    let failure = execute(code, &mut adapter).unwrap_err();
    assert_eq!(failure.trace.as_str(), "start\n");
    let SandboxError::Script(error) = &failure.error else {
      panic!("unexpected error {:?}", failure.error)
    };
    assert_eq!(error.kind(), Some(ErrorKind::NameError));
    assert_eq!(adapter.threshold(), None);
  }

  #[test]
  fn entry_point_is_checked_before_running() {
    let mut adapter = adapter(vec![apple(0.0)]);
    let code = "def main(image):\n    return ImagePatch(image).find('apple')\n";
    let failure = execute(code, &mut adapter).unwrap_err();
    assert!(matches!(failure.error, SandboxError::BadEntryPoint(_)));
    assert!(adapter.take_records().is_empty());
    assert_eq!(adapter.loaded_backend(), None);
  }
}
