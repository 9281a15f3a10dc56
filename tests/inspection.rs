// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/inspection.rs - 检测引擎端到端测试
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

mod common;

use image::RgbImage;

use shanan_inspect::{
  detector::DetectOutcome,
  engine::{ErrorType, InspectionEngine, Status, Threshold},
  input::InspectionImage,
  model::{BackendTier, ReplayCandidate},
  resource::{ResourceGuard, StaticMemorySampler},
  script::ExecutionLimits,
};

use common::{APPLES_WITH_STRAWBERRIES, TWO_APPLES, Workspace, apples, engine, engine_with_memory};

fn blank() -> InspectionImage {
  InspectionImage::new(
    "blank.png",
    RgbImage::new(common::IMAGE_WIDTH, common::IMAGE_HEIGHT),
  )
}

#[test]
fn two_apples_pass() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let verdict = engine.run(TWO_APPLES, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Success);
  assert_eq!(verdict.score, Some(0));
  assert_eq!(verdict.message, "The image satisfies the conditions");
  assert_eq!(
    verdict.output_text,
    "Calling find function . Detect apple.\nNumber of apples is 2\nProgram output: 0\n"
  );
  assert_eq!(verdict.detections.len(), 1);
  assert_eq!(verdict.detections[0].expression, "apple");
  assert_eq!(verdict.detections[0].regions.len(), 2);
  assert_eq!(verdict.exit_code(), 0);
}

#[test]
fn three_apples_fail() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(3));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let verdict = engine.run(TWO_APPLES, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Failure);
  assert_eq!(verdict.score, Some(1));
  assert_eq!(verdict.message, "The image does not satisfy the conditions");
  assert_eq!(verdict.exit_code(), 1);
}

#[test]
fn missing_function_never_touches_the_detector() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let verdict = engine.run("print('no routine here')", &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Error);
  assert_eq!(verdict.error_type, Some(ErrorType::System));
  assert!(verdict.message.contains("No function found"), "{}", verdict.message);
  assert!(verdict.detections.is_empty());
  assert_eq!(engine.adapter().loaded_backend(), None);
  assert_eq!(verdict.exit_code(), 2);
}

#[test]
fn non_integer_scores_are_errors() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let code = "def execute_command(image_path, image):\n    return formatting_answer(0.5)\n";
  let verdict = engine.run(code, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Error);
  assert_eq!(verdict.score, None);
  assert_eq!(verdict.message, "System error: score must be int, got float");
  assert_eq!(verdict.output_text, "Program output: 0.5\n");

  let code = "def execute_command(image_path, image):\n    return formatting_answer(True)\n";
  let verdict = engine.run(code, &blank(), Threshold::default());
  assert_eq!(verdict.message, "System error: score must be int, got str");
}

#[test]
fn grouped_phrases_feed_the_routine() {
  let ws = Workspace::new();
  let fixture = ws.replay(
    "fruit.json",
    &[
      ("apple", 0.9, [10.0, 20.0, 50.0, 60.0]),
      ("apple", 0.85, [250.0, 20.0, 290.0, 60.0]),
      ("strawberry", 0.7, [20.0, 100.0, 40.0, 120.0]),
    ],
  );
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let verdict = engine.run(APPLES_WITH_STRAWBERRIES, &blank(), Threshold::default());
  assert_eq!(
    verdict.output_text,
    "Calling find function . Detect apple. strawberry..\n\
     apples=2 strawberries=1 lonely=1\n\
     Program output: 1\n"
  );
  assert_eq!(verdict.status, Status::Failure);
  assert_eq!(verdict.detections[0].regions.len(), 3);
}

#[test]
fn detection_failures_are_absorbed() {
  let ws = Workspace::new();
  let fixture = ws.failing_replay("broken.json", "inference");
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let verdict = engine.run(TWO_APPLES, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Failure);
  assert_eq!(
    verdict.output_text,
    "Calling find function . Detect apple.\nNumber of apples is 0\nProgram output: 1\n"
  );
  assert!(verdict.detections[0].outcome.is_failure());
}

#[test]
fn unloadable_backends_fall_through_to_the_next_candidate() {
  let ws = Workspace::new();
  let missing = ws.path().join("missing.json");
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[
    (&missing, BackendTier::Light),
    (&fixture, BackendTier::Light),
  ]);

  let verdict = engine.run(TWO_APPLES, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Success);
  assert_eq!(engine.adapter().loaded_backend(), Some("apples"));
}

#[test]
fn memory_pressure_prefers_light_backends() {
  let ws = Workspace::new();
  let heavy = ws.replay("heavy.json", &apples(3));
  let light = ws.replay("light.json", &apples(2));
  let mut engine = engine_with_memory(
    &[(&heavy, BackendTier::Heavy), (&light, BackendTier::Light)],
    0.5,
  );

  let verdict = engine.run(TWO_APPLES, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Success);
  assert_eq!(engine.adapter().loaded_backend(), Some("light"));
  let warning = verdict.memory_warning.expect("memory warning");
  assert!(warning.warning);
}

#[test]
fn threshold_applies_to_one_run_only() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let strict = "0.85".parse::<Threshold>().unwrap();
  let verdict = engine.run(TWO_APPLES, &blank(), strict);
  assert_eq!(verdict.status, Status::Failure);
  assert_eq!(engine.adapter().threshold(), None);

  let verdict = engine.run(TWO_APPLES, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Success);
}

#[test]
fn runtime_faults_keep_the_partial_trace() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let code = "def execute_command(image_path, image):\n    print('before')\n    return 1 / 0\n";
  let verdict = engine.run(code, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Error);
  assert_eq!(verdict.error_type, Some(ErrorType::System));
  assert!(verdict.message.contains("ZeroDivisionError"), "{}", verdict.message);
  assert_eq!(verdict.output_text, "before\n");
}

#[test]
fn deeply_nested_routines_are_errors_not_crashes() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let code = format!(
    "def execute_command(image_path, image):\n    x = {}1{}\n    return 0\n",
    "(".repeat(300),
    ")".repeat(300)
  );
  let verdict = engine.run(&code, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Error);
  assert_eq!(verdict.error_type, Some(ErrorType::System));
  assert!(verdict.message.contains("SyntaxError"), "{}", verdict.message);

  let code = format!(
    "def execute_command(image_path, image):\n    x = {}\n    return x - 2000\n",
    vec!["1"; 2000].join("+")
  );
  let verdict = engine.run(&code, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Success, "{}", verdict.message);
  assert_eq!(verdict.score, Some(0));
}

#[test]
fn runaway_routines_time_out() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = InspectionEngine::builder()
    .candidate(ReplayCandidate::from_path(&fixture, BackendTier::Light))
    .resource_guard(ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(8.0, 16.0))))
    .limits(ExecutionLimits {
      max_steps: 10_000,
      ..ExecutionLimits::default()
    })
    .build()
    .unwrap();

  let code = "def execute_command(image_path, image):\n    while True:\n        pass\n";
  let verdict = engine.run(code, &blank(), Threshold::default());
  assert_eq!(verdict.status, Status::Error);
  assert_eq!(verdict.error_type, Some(ErrorType::Timeout));
}

#[test]
fn oversized_collections_are_memory_errors() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = InspectionEngine::builder()
    .candidate(ReplayCandidate::from_path(&fixture, BackendTier::Light))
    .resource_guard(ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(8.0, 16.0))))
    .limits(ExecutionLimits {
      max_collection_len: 100,
      ..ExecutionLimits::default()
    })
    .build()
    .unwrap();

  let code = "def execute_command(image_path, image):\n    return len([0] * 1000)\n";
  let verdict = engine.run(code, &blank(), Threshold::default());
  assert_eq!(verdict.error_type, Some(ErrorType::Memory));
}

#[test]
fn the_backend_is_loaded_once_and_records_do_not_leak() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));
  let mut engine = engine(&[(&fixture, BackendTier::Light)]);

  let first = engine.run(TWO_APPLES, &blank(), Threshold::default());
  std::fs::remove_file(&fixture).unwrap();
  let second = engine.run(TWO_APPLES, &blank(), Threshold::default());

  assert_eq!(first.status, Status::Success);
  assert_eq!(second.status, Status::Success);
  assert_eq!(second.detections.len(), 1);
  assert!(matches!(second.detections[0].outcome, DetectOutcome::Found));
}
