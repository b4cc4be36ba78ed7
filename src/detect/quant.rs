// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/detect/quant.rs - 仿射量化
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

use crate::detect::QuantParam;

/// 把浮点值转入量化域，裁剪到 i8 的取值范围。
pub fn quantize(value: f32, q: QuantParam) -> i8 {
  let dst = value / q.scale + q.zero_point as f32;
  dst.clamp(-128.0, 127.0) as i8
}

/// 把量化值还原为浮点值。
pub fn dequantize(value: i8, q: QuantParam) -> f32 {
  (value as i32 - q.zero_point) as f32 * q.scale
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip_within_one_step() {
    let params = [
      QuantParam {
        zero_point: 0,
        scale: 1.0 / 127.0,
      },
      QuantParam {
        zero_point: -14,
        scale: 0.023,
      },
      QuantParam {
        zero_point: 37,
        scale: 0.004_2,
      },
    ];
    for q in params {
      for i in -30..30 {
        let value = i as f32 * q.scale * 2.5;
        let restored = dequantize(quantize(value, q), q);
        assert!(
          (restored - value).abs() <= q.scale,
          "round trip 偏差超过一个量化步长: {} -> {}",
          value,
          restored
        );
      }
    }
  }

  #[test]
  fn quantize_clips_to_i8_range() {
    let q = QuantParam {
      zero_point: 0,
      scale: 0.01,
    };
    assert_eq!(quantize(100.0, q), 127);
    assert_eq!(quantize(-100.0, q), -128);
  }

  #[test]
  fn dequantize_subtracts_zero_point() {
    let q = QuantParam {
      zero_point: 10,
      scale: 0.5,
    };
    assert_eq!(dequantize(10, q), 0.0);
    assert_eq!(dequantize(14, q), 2.0);
    assert_eq!(dequantize(6, q), -2.0);
  }
}
