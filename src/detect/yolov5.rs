// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/detect/yolov5.rs - YOLOv5 量化输出解码
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

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, error};

use crate::detect::quant::{dequantize, quantize};
use crate::detect::{BoxRect, Detection, DetectionGroup, Letterbox, QuantParam};
use crate::model::{LabelError, LabelTable};

pub const OBJ_CLASS_NUM: usize = 80;
pub const DEFAULT_BOX_THRESHOLD: f32 = 0.25;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

const PROP_BOX_SIZE: usize = 5 + OBJ_CLASS_NUM;
const ANCHOR_NUM: usize = 3;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS: [[i32; 6]; 3] = [
  [10, 13, 16, 30, 33, 23],
  [30, 61, 62, 45, 59, 119],
  [116, 90, 156, 198, 373, 326],
];

/// 抑制之前的候选框：(x, y, w, h)，左上原点，信箱坐标系。
struct RawCandidate {
  bbox: [f32; 4],
  class_id: usize,
  score: f32,
}

/// YOLOv5 三头量化输出的解码器。
///
/// 纯函数式流水线：按头解码候选框、按置信度排名、按类别做非极大
/// 值抑制，最后投影回原始图像坐标。标签表在构建时一次性加载，
/// 加载失败直接中止构建；随解码器一起释放。
pub struct Yolov5Decoder {
  labels: LabelTable,
  box_threshold: f32,
  nms_threshold: f32,
}

impl Yolov5Decoder {
  pub fn open<P: AsRef<Path>>(label_path: P) -> Result<Self, LabelError> {
    Self::with_thresholds(label_path, DEFAULT_BOX_THRESHOLD, DEFAULT_NMS_THRESHOLD)
  }

  pub fn with_thresholds<P: AsRef<Path>>(
    label_path: P,
    box_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Self, LabelError> {
    let labels = LabelTable::open(label_path, OBJ_CLASS_NUM)?;
    Ok(Self {
      labels,
      box_threshold,
      nms_threshold,
    })
  }

  /// 解码一次推理的三个量化输出张量。
  ///
  /// `outputs` 依次对应 stride 8/16/32 的检测头，`quants` 是各头的
  /// 量化参数。对合法的量化输入这是全函数：没有候选时返回空组，
  /// 不是错误。
  pub fn decode(
    &self,
    outputs: [&[i8]; 3],
    model_h: usize,
    model_w: usize,
    letterbox: &Letterbox,
    quants: [QuantParam; 3],
  ) -> DetectionGroup {
    let mut candidates = Vec::new();
    for (head, (&stride, anchors)) in STRIDES.iter().zip(ANCHORS.iter()).enumerate() {
      let grid_h = model_h / stride;
      let grid_w = model_w / stride;
      let needed = PROP_BOX_SIZE * ANCHOR_NUM * grid_h * grid_w;
      if outputs[head].len() < needed {
        error!(
          "检测头 {} 输出大小不符: 期望 {}, 实际 {}",
          head,
          needed,
          outputs[head].len()
        );
        continue;
      }
      self.process_head(
        outputs[head],
        anchors,
        grid_h,
        grid_w,
        stride,
        quants[head],
        &mut candidates,
      );
    }
    debug!("阈值过滤后剩余 {} 个候选框", candidates.len());

    let mut group = DetectionGroup::new();
    if candidates.is_empty() {
      return group;
    }

    // 按置信度从高到低排名，order 持有候选的原始下标
    let mut scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    rank_descending(&mut scores, &mut order);

    // 抑制只发生在同一类别内部，不同类别的框互不影响
    let mut removed = vec![false; order.len()];
    let classes: BTreeSet<usize> = candidates.iter().map(|c| c.class_id).collect();
    for &class in &classes {
      nms_for_class(&candidates, &order, &mut removed, class, self.nms_threshold);
    }

    for rank in 0..order.len() {
      if removed[rank] || group.is_full() {
        continue;
      }
      let candidate = &candidates[order[rank]];
      let x1 = candidate.bbox[0] - letterbox.pads.left as f32;
      let y1 = candidate.bbox[1] - letterbox.pads.top as f32;
      let x2 = x1 + candidate.bbox[2];
      let y2 = y1 + candidate.bbox[3];
      group.push(Detection {
        class_id: candidate.class_id,
        name: self
          .labels
          .name(candidate.class_id)
          .unwrap_or("unknown")
          .to_string(),
        bbox: BoxRect {
          left: (clamp(x1, 0, model_w as i32) as f32 / letterbox.scale_w) as i32,
          top: (clamp(y1, 0, model_h as i32) as f32 / letterbox.scale_h) as i32,
          right: (clamp(x2, 0, model_w as i32) as f32 / letterbox.scale_w) as i32,
          bottom: (clamp(y2, 0, model_h as i32) as f32 / letterbox.scale_h) as i32,
        },
        score: scores[rank],
      });
    }
    debug!("检测到 {} 个目标", group.len());
    group
  }

  /// 解码单个检测头。
  ///
  /// 目标置信度的门限比较在量化域完成：阈值用该头的量化参数转换
  /// 一次，逐格只比较原始字节，避免对每个格子做反量化。类别通道
  /// 的 arg-max 同样在量化域比较。
  fn process_head(
    &self,
    input: &[i8],
    anchors: &[i32; 6],
    grid_h: usize,
    grid_w: usize,
    stride: usize,
    q: QuantParam,
    out: &mut Vec<RawCandidate>,
  ) {
    let grid_len = grid_h * grid_w;
    let threshold_q = quantize(self.box_threshold, q);
    for a in 0..ANCHOR_NUM {
      for i in 0..grid_h {
        for j in 0..grid_w {
          let cell = i * grid_w + j;
          let box_confidence = input[(PROP_BOX_SIZE * a + 4) * grid_len + cell];
          if box_confidence < threshold_q {
            continue;
          }

          let base = (PROP_BOX_SIZE * a) * grid_len + cell;
          let box_x = dequantize(input[base], q) * 2.0 - 0.5;
          let box_y = dequantize(input[base + grid_len], q) * 2.0 - 0.5;
          let box_w = dequantize(input[base + 2 * grid_len], q) * 2.0;
          let box_h = dequantize(input[base + 3 * grid_len], q) * 2.0;
          let x = (box_x + j as f32) * stride as f32;
          let y = (box_y + i as f32) * stride as f32;
          let w = box_w * box_w * anchors[a * 2] as f32;
          let h = box_h * box_h * anchors[a * 2 + 1] as f32;

          let mut max_class_q = input[base + 5 * grid_len];
          let mut class_id = 0usize;
          for k in 1..OBJ_CLASS_NUM {
            let prob = input[base + (5 + k) * grid_len];
            if prob > max_class_q {
              max_class_q = prob;
              class_id = k;
            }
          }

          if max_class_q > threshold_q {
            out.push(RawCandidate {
              bbox: [x - w / 2.0, y - h / 2.0, w, h],
              class_id,
              score: dequantize(max_class_q, q) * dequantize(box_confidence, q),
            });
          }
        }
      }
    }
  }
}

/// 对 `class` 类别的候选做非极大值抑制，按排名顺序两两比较，
/// IoU 超过阈值时去掉排名靠后的那个。
fn nms_for_class(
  candidates: &[RawCandidate],
  order: &[usize],
  removed: &mut [bool],
  class: usize,
  threshold: f32,
) {
  for i in 0..order.len() {
    if removed[i] || candidates[order[i]].class_id != class {
      continue;
    }
    for j in (i + 1)..order.len() {
      if removed[j] || candidates[order[j]].class_id != class {
        continue;
      }
      let iou = overlap(&candidates[order[i]].bbox, &candidates[order[j]].bbox);
      if iou > threshold {
        removed[j] = true;
      }
    }
  }
}

/// 像素闭区间约定的 IoU，边长按 +1 计算。
fn overlap(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let (xmin0, ymin0) = (a[0], a[1]);
  let (xmax0, ymax0) = (a[0] + a[2], a[1] + a[3]);
  let (xmin1, ymin1) = (b[0], b[1]);
  let (xmax1, ymax1) = (b[0] + b[2], b[1] + b[3]);

  let w = (xmax0.min(xmax1) - xmin0.max(xmin1) + 1.0).max(0.0);
  let h = (ymax0.min(ymax1) - ymin0.max(ymin1) + 1.0).max(0.0);
  let intersection = w * h;
  let union = (xmax0 - xmin0 + 1.0) * (ymax0 - ymin0 + 1.0)
    + (xmax1 - xmin1 + 1.0) * (ymax1 - ymin1 + 1.0)
    - intersection;
  if union <= 0.0 { 0.0 } else { intersection / union }
}

/// 原地的降序下标排序，交换分区实现。
///
/// 相等键之间的先后次序不作保证。
fn rank_descending(scores: &mut [f32], order: &mut [usize]) {
  if scores.is_empty() {
    return;
  }
  sort_range(scores, order, 0, scores.len() - 1);
}

fn sort_range(scores: &mut [f32], order: &mut [usize], left: usize, right: usize) {
  if left >= right {
    return;
  }
  let key = scores[left];
  let key_index = order[left];
  let mut low = left;
  let mut high = right;
  while low < high {
    while low < high && scores[high] <= key {
      high -= 1;
    }
    scores[low] = scores[high];
    order[low] = order[high];
    while low < high && scores[low] >= key {
      low += 1;
    }
    scores[high] = scores[low];
    order[high] = order[low];
  }
  scores[low] = key;
  order[low] = key_index;
  if low > left {
    sort_range(scores, order, left, low - 1);
  }
  sort_range(scores, order, low + 1, right);
}

fn clamp(value: f32, min: i32, max: i32) -> i32 {
  if value > min as f32 {
    if value < max as f32 { value as i32 } else { max }
  } else {
    min
  }
}
