// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/detect.rs - 检测结果数据模型
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

pub mod quant;

mod yolov5;
pub use self::yolov5::{
  DEFAULT_BOX_THRESHOLD, DEFAULT_NMS_THRESHOLD, OBJ_CLASS_NUM, Yolov5Decoder,
};

/// 轴对齐的整数框，坐标为 (left, top, right, bottom)。
///
/// 解码过程中处于信箱坐标系，投影后处于原始图像坐标系；
/// 也用来表示信箱填充的四边宽度。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxRect {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

/// 信箱缩放的几何输出。
///
/// 由外部前处理计算，这里只消费：填充矩形与两个轴向的缩放系数。
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
  pub pads: BoxRect,
  pub scale_w: f32,
  pub scale_h: f32,
}

impl Default for Letterbox {
  fn default() -> Self {
    Self {
      pads: BoxRect::default(),
      scale_w: 1.0,
      scale_h: 1.0,
    }
  }
}

/// 张量的仿射量化参数: real = (quantized - zero_point) * scale。
#[derive(Debug, Clone, Copy)]
pub struct QuantParam {
  pub zero_point: i32,
  pub scale: f32,
}

/// 一条检测结果，框位于原始图像坐标系。
#[derive(Debug, Clone)]
pub struct Detection {
  pub class_id: usize,
  pub name: String,
  pub bbox: BoxRect,
  pub score: f32,
}

/// 容量受限的检测结果组，按置信度从高到低排列。
///
/// 超出容量的候选按保留最高置信度的策略被截断。
#[derive(Debug, Clone, Default)]
pub struct DetectionGroup {
  items: Vec<Detection>,
}

impl DetectionGroup {
  pub const CAPACITY: usize = 64;

  pub fn new() -> Self {
    Self {
      items: Vec::with_capacity(Self::CAPACITY),
    }
  }

  /// 追加一条结果；已满时丢弃并返回 false。
  pub(crate) fn push(&mut self, detection: Detection) -> bool {
    if self.is_full() {
      return false;
    }
    self.items.push(detection);
    true
  }

  pub fn is_full(&self) -> bool {
    self.items.len() >= Self::CAPACITY
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn items(&self) -> &[Detection] {
    &self.items
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn into_items(self) -> Vec<Detection> {
    self.items
  }
}

impl<'a> IntoIterator for &'a DetectionGroup {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
