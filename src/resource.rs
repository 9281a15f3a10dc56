// 该文件是 Shanan （山南西风） 项目的一部分。
// src/resource.rs - 内存压力检测
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

use serde::Serialize;
use sysinfo::System;
use thiserror::Error;
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 可用内存低于该值（GB）时告警
pub const LOW_MEMORY_GB: f64 = 1.0;
/// 内存占用率高于该值（%）时告警
pub const HIGH_USAGE_PERCENT: f64 = 85.0;

#[derive(Error, Debug)]
pub enum SampleError {
  #[error("无法读取系统内存信息")]
  Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
  pub available_bytes: u64,
  pub total_bytes: u64,
}

pub trait MemorySampler {
  fn sample(&self) -> Result<MemorySample, SampleError>;
}

/// 通过 sysinfo 读取系统内存
#[derive(Debug, Default)]
pub struct SystemMemorySampler;

impl MemorySampler for SystemMemorySampler {
  fn sample(&self) -> Result<MemorySample, SampleError> {
    let mut system = System::new();
    system.refresh_memory();

    let total_bytes = system.total_memory();
    if total_bytes == 0 {
      return Err(SampleError::Unavailable);
    }

    Ok(MemorySample {
      available_bytes: system.available_memory(),
      total_bytes,
    })
  }
}

/// 固定读数，用于测试或在容器内屏蔽宿主机内存
#[derive(Debug, Clone, Copy)]
pub struct StaticMemorySampler(pub MemorySample);

impl StaticMemorySampler {
  /// 以 GB 为单位构造
  pub fn gigabytes(available_gb: f64, total_gb: f64) -> Self {
    StaticMemorySampler(MemorySample {
      available_bytes: (available_gb * BYTES_PER_GB) as u64,
      total_bytes: (total_gb * BYTES_PER_GB) as u64,
    })
  }
}

impl MemorySampler for StaticMemorySampler {
  fn sample(&self) -> Result<MemorySample, SampleError> {
    Ok(self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStatus {
  pub available_gb: f64,
  pub percent_used: f64,
  pub warning: bool,
}

impl MemoryStatus {
  pub fn from_sample(sample: MemorySample) -> Self {
    let available_gb = sample.available_bytes as f64 / BYTES_PER_GB;
    let percent_used = if sample.total_bytes == 0 {
      100.0
    } else {
      let used = sample.total_bytes.saturating_sub(sample.available_bytes);
      used as f64 / sample.total_bytes as f64 * 100.0
    };

    MemoryStatus {
      available_gb,
      percent_used,
      warning: available_gb < LOW_MEMORY_GB || percent_used > HIGH_USAGE_PERCENT,
    }
  }

  /// 读取失败时按最坏情况处理
  fn unknown() -> Self {
    MemoryStatus {
      available_gb: 0.0,
      percent_used: 100.0,
      warning: true,
    }
  }
}

/// 内存压力守卫：只报告，不阻塞执行
pub struct ResourceGuard {
  sampler: Box<dyn MemorySampler>,
}

impl Default for ResourceGuard {
  fn default() -> Self {
    Self::new(Box::new(SystemMemorySampler))
  }
}

impl ResourceGuard {
  pub fn new(sampler: Box<dyn MemorySampler>) -> Self {
    Self { sampler }
  }

  pub fn check(&self) -> MemoryStatus {
    match self.sampler.sample() {
      Ok(sample) => {
        let status = MemoryStatus::from_sample(sample);
        debug!(
          "内存状态: 可用 {:.1}GB, 占用 {:.1}%",
          status.available_gb, status.percent_used
        );
        status
      }
      Err(e) => {
        warn!("内存使用量检查失败: {}", e);
        MemoryStatus::unknown()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct BrokenSampler;

  impl MemorySampler for BrokenSampler {
    fn sample(&self) -> Result<MemorySample, SampleError> {
      Err(SampleError::Unavailable)
    }
  }

  #[test]
  fn plenty_of_memory_is_quiet() {
    let guard = ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(8.0, 16.0)));
    let status = guard.check();
    assert!(!status.warning);
    assert!((status.available_gb - 8.0).abs() < 1e-6);
    assert!((status.percent_used - 50.0).abs() < 1e-6);
  }

  #[test]
  fn low_available_memory_warns() {
    let status = ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(0.5, 2.0))).check();
    assert!(status.warning);
  }

  #[test]
  fn high_utilisation_warns() {
    let status = ResourceGuard::new(Box::new(StaticMemorySampler::gigabytes(4.0, 40.0))).check();
    assert!(status.percent_used > HIGH_USAGE_PERCENT);
    assert!(status.warning);
  }

  #[test]
  fn failed_sample_reports_worst_case() {
    let status = ResourceGuard::new(Box::new(BrokenSampler)).check();
    assert_eq!(status.available_gb, 0.0);
    assert_eq!(status.percent_used, 100.0);
    assert!(status.warning);
  }
}
