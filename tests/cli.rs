// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/cli.rs - 命令行入口测试
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

#![allow(deprecated)]

mod common;

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

use common::{TWO_APPLES, Workspace, apples, replay_url};

fn inspect_cmd() -> Command {
  Command::cargo_bin("shanan-inspect").expect("binary should be built")
}

fn batch_cmd() -> Command {
  Command::cargo_bin("inspect-batch").expect("binary should be built")
}

fn count_files(dir: &Path) -> usize {
  let mut count = 0;
  for entry in std::fs::read_dir(dir).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      count += count_files(&path);
    } else {
      count += 1;
    }
  }
  count
}

#[test]
fn two_apples_exit_0() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--image")
    .arg(ws.image("a.png"))
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--json")
    .assert()
    .code(0)
    .stdout(predicate::str::contains("\"status\": \"success\""))
    .stdout(predicate::str::contains("\"score\": 0"));
}

#[test]
fn three_apples_exit_1() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(3));

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--image")
    .arg(ws.image("a.png"))
    .arg("--backend")
    .arg(replay_url(&fixture))
    .assert()
    .code(1)
    .stdout(predicate::str::contains("Number of apples is 3"));
}

#[test]
fn routine_from_stdin_without_function_exits_2() {
  let ws = Workspace::new();
  let fixture = ws.replay("apples.json", &apples(2));

  inspect_cmd()
    .arg("--routine")
    .arg("-")
    .arg("--image")
    .arg(ws.image("a.png"))
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--json")
    .write_stdin("print('nothing to run')\n")
    .assert()
    .code(2)
    .stdout(predicate::str::contains("\"error_type\": \"system\""))
    .stdout(predicate::str::contains("No function found"));
}

#[test]
fn threshold_out_of_range_is_rejected() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--image")
    .arg(ws.image("a.png"))
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--threshold")
    .arg("0.95")
    .assert()
    .failure()
    .stderr(predicate::str::contains("0.95"));
}

#[test]
fn fallback_image_is_used_without_image() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));
  let fallback = ws.image("default.png");

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--fallback-image")
    .arg(&fallback)
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--json")
    .assert()
    .code(0)
    .stdout(predicate::str::contains("default.png"));
}

#[test]
fn fallback_image_replaces_a_missing_image() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));
  let fallback = ws.image("default.png");

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--image")
    .arg(ws.path().join("missing.png"))
    .arg("--fallback-image")
    .arg(&fallback)
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--json")
    .assert()
    .code(0)
    .stdout(predicate::str::contains("default.png"));
}

#[test]
fn folder_output_records_every_image() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));
  let records = ws.path().join("records");

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--image")
    .arg(ws.image("a.png"))
    .arg("--image")
    .arg(ws.image("b.png"))
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--output")
    .arg(format!("folder://{}?always", records.display()))
    .arg("--json")
    .assert()
    .code(0)
    .stdout(predicate::str::contains("\"outcomes\""));

  // 每张图像一张标注图与一个判定 JSON
  assert_eq!(count_files(&records), 4);
}

#[test]
fn unreadable_image_makes_the_run_an_error() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));

  inspect_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--image")
    .arg(ws.image("a.png"))
    .arg("--image")
    .arg(ws.path().join("missing.png"))
    .arg("--backend")
    .arg(replay_url(&fixture))
    .assert()
    .code(2);
}

#[test]
fn batch_writes_a_report() {
  let ws = Workspace::new();
  let routine = ws.write("routine.txt", TWO_APPLES);
  let fixture = ws.replay("apples.json", &apples(2));
  let images = ws.path().join("images");
  std::fs::create_dir(&images).unwrap();
  for name in ["a.png", "b.png", "c.png"] {
    image::RgbImage::new(64, 64).save(images.join(name)).unwrap();
  }
  let report = ws.path().join("report.json");

  batch_cmd()
    .arg("--routine")
    .arg(&routine)
    .arg("--dir")
    .arg(&images)
    .arg("--backend")
    .arg(replay_url(&fixture))
    .arg("--image-number")
    .arg("2")
    .arg("--report")
    .arg(&report)
    .assert()
    .success()
    .stdout(predicate::str::contains("合格 2"));

  let report: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
  assert_eq!(report["outcomes"].as_array().unwrap().len(), 2);
  assert_eq!(report["interrupted"], false);
}
