// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/model.rs - 模型接口
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

/// 推理模型接口。
///
/// NPU 推理的调用序列由外部实现提供，本库只通过该接口提交输入、
/// 取回输出。`infer` 需要在内部完成前处理、推理与后处理。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 共享权重的模型复制接口。
///
/// `attach` 以当前实例为权重所有者，复制出一个共享只读权重、
/// 但持有独立执行上下文的新实例（对应 rknn_dup_context 的语义）。
/// 权重的释放顺序由实现内部的引用计数保证。
pub trait AttachModel: Model + Sized {
  fn attach(&self) -> Result<Self, Self::Error>;
}

mod labels;
pub use self::labels::{LabelError, LabelTable};
