// 该文件是 Shanan （山南西风） 项目的一部分。
// src/utils.rs - 通用工具函数
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

/// 按小数位数四舍五入
pub fn round_to(value: f64, digits: i32) -> f64 {
  let factor = 10f64.powi(digits);
  (value * factor).round() / factor
}

/// 以脚本语言的习惯格式化浮点数：整数值保留一位小数（`1.0`），
/// 其余使用最短表示（`0.85`）。十进制指数小于 -4 或不小于 16 时
/// 改用科学计数法，指数至少两位（`1e+16`、`1e-05`）
pub fn format_float(value: f64) -> String {
  if value.is_nan() {
    return "nan".to_string();
  }
  if value.is_infinite() {
    return if value > 0.0 { "inf" } else { "-inf" }.to_string();
  }

  let scientific = format!("{:e}", value);
  let (mantissa, exponent) = scientific
    .split_once('e')
    .unwrap_or((scientific.as_str(), "0"));
  let exponent: i32 = exponent.parse().unwrap_or(0);
  if !(-4..16).contains(&exponent) {
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exponent.abs())
  } else if value.fract() == 0.0 {
    format!("{:.1}", value)
  } else {
    format!("{}", value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn integral_floats_keep_one_decimal() {
    assert_eq!(format_float(1.0), "1.0");
    assert_eq!(format_float(-3.0), "-3.0");
    assert_eq!(format_float(0.85), "0.85");
    assert_eq!(format_float(f64::NAN), "nan");
    assert_eq!(format_float(-0.0), "-0.0");
  }

  #[test]
  fn large_and_tiny_floats_use_exponents() {
    assert_eq!(format_float(1e15), "1000000000000000.0");
    assert_eq!(format_float(1e16), "1e+16");
    assert_eq!(format_float(123456789012345678.0), "1.2345678901234568e+17");
    assert_eq!(format_float(-2.5e100), "-2.5e+100");
    assert_eq!(format_float(0.0001), "0.0001");
    assert_eq!(format_float(1e-5), "1e-05");
    assert_eq!(format_float(1.5e-7), "1.5e-07");
    assert_eq!(format_float(0.0), "0.0");
  }

  #[test]
  fn rounds_to_requested_digits() {
    assert_eq!(round_to(0.8765, 2), 0.88);
    assert_eq!(round_to(12.34, 1), 12.3);
  }
}
