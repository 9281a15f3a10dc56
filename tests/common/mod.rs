// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的夹具
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

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde_json::json;
use tempfile::TempDir;

use shanan_inspect::{
  engine::InspectionEngine,
  model::{BackendTier, ReplayCandidate},
  resource::{ResourceGuard, StaticMemorySampler},
};

pub const IMAGE_WIDTH: u32 = 320;
pub const IMAGE_HEIGHT: u32 = 240;

/// 恰好两个苹果时合格
pub const TWO_APPLES: &str = r#"Here is the routine:
```python
def execute_command(image_path, image):
    image_patch = ImagePatch(image)
    apples = image_patch.find("apple")
    print(f"Number of apples is {len(apples)}")
    anomaly_score = 0 if len(apples) == 2 else 1
    return formatting_answer(anomaly_score)
```
"#;

/// 每个苹果旁边都要有一颗草莓
pub const APPLES_WITH_STRAWBERRIES: &str = r#"
def execute_command(image_path, image):
    image_patch = ImagePatch(image)
    found = image_patch.find("apple. strawberry.")
    apples = found["apple"]
    strawberries = found["strawberry"]
    lonely = []
    for apple in apples:
        near = [s for s in strawberries if dist(apple, s) < 100]
        if not near:
            lonely.append(apple)
    print(f"apples={len(apples)} strawberries={len(strawberries)} lonely={len(lonely)}")
    return formatting_answer(len(lonely))
"#;

/// 一个检测框：标签、分数、像素坐标
pub type Item<'a> = (&'a str, f32, [f32; 4]);

/// 互不重叠的 n 个苹果
pub fn apples(n: usize) -> Vec<Item<'static>> {
  (0..n)
    .map(|i| {
      let x = 10.0 + 60.0 * i as f32;
      ("apple", 0.8, [x, 20.0, x + 40.0, 60.0])
    })
    .collect()
}

pub struct Workspace {
  dir: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    Workspace {
      dir: tempfile::tempdir().expect("temp dir"),
    }
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  pub fn image(&self, name: &str) -> PathBuf {
    let path = self.dir.path().join(name);
    RgbImage::new(IMAGE_WIDTH, IMAGE_HEIGHT)
      .save(&path)
      .expect("write image");
    path
  }

  pub fn replay(&self, name: &str, items: &[Item<'_>]) -> PathBuf {
    let detections: Vec<_> = items
      .iter()
      .map(|(label, score, bbox)| json!({ "label": label, "score": score, "bbox": bbox }))
      .collect();
    self.write(name, &json!({ "detections": detections }).to_string())
  }

  pub fn failing_replay(&self, name: &str, failure: &str) -> PathBuf {
    self.write(name, &json!({ "failure": failure }).to_string())
  }

  pub fn write(&self, name: &str, text: &str) -> PathBuf {
    let path = self.dir.path().join(name);
    std::fs::write(&path, text).expect("write file");
    path
  }
}

pub fn replay_url(path: &Path) -> String {
  format!("replay://{}", path.display())
}

/// 内存充足的引擎，候选按给定顺序
pub fn engine<P: AsRef<Path>>(fixtures: &[(P, BackendTier)]) -> InspectionEngine {
  engine_with_memory(fixtures, 8.0)
}

pub fn engine_with_memory<P: AsRef<Path>>(
  fixtures: &[(P, BackendTier)],
  available_gb: f64,
) -> InspectionEngine {
  let mut builder = InspectionEngine::builder()
    .resource_guard(ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(available_gb, 16.0))));
  for (path, tier) in fixtures {
    builder = builder.candidate(ReplayCandidate::from_path(path.as_ref(), *tier));
  }
  builder.build().expect("engine")
}
