// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/pool/model_pool.rs - 模型工作池
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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{AttachModel, Model};
use crate::pool::thread_pool::{TaskHandle, ThreadPool};

#[derive(Error, Debug)]
pub enum PoolError<E> {
  #[error("工作实例数量无效: {0}")]
  WorkerCount(usize),
  #[error("模型实例初始化失败")]
  ModelInit(#[source] E),
}

#[derive(Error, Debug)]
pub enum RetrieveError<E> {
  /// 结果队列为空，可轮询。
  #[error("结果队列为空")]
  Empty,
  #[error("推理任务在执行前被丢弃")]
  Abandoned,
  #[error("模型推理失败")]
  Infer(#[source] E),
}

type Slot<M> = TaskHandle<Result<<M as Model>::Output, <M as Model>::Error>>;

/// 固定大小的模型工作池。
///
/// 持有 N 个长生命周期的模型实例：0 号实例是权重的所有者，
/// 其余实例通过 [`AttachModel::attach`] 共享只读权重。提交的输入
/// 按轮转顺序分派到实例上，由内部线程池并行执行；结果通过先进
/// 先出队列取回，取回顺序严格等于提交顺序，与完成顺序无关。
pub struct ModelPool<M: Model> {
  models: Vec<Arc<Mutex<M>>>,
  dispatch: Mutex<u64>,
  pending: Mutex<VecDeque<Slot<M>>>,
  pool: ThreadPool,
}

impl<M> ModelPool<M>
where
  M: Model + AttachModel + Send + 'static,
  M::Input: Send + 'static,
  M::Output: Send + 'static,
  M::Error: Send + 'static,
{
  /// 以 `primary` 为 0 号实例构建 `workers` 个实例的工作池。
  ///
  /// 任何一个实例复制失败都会中止构建并把错误向上传播，
  /// 不支持部分初始化的状态。
  pub fn new(primary: M, workers: usize) -> Result<Self, PoolError<M::Error>> {
    if workers == 0 {
      return Err(PoolError::WorkerCount(workers));
    }

    info!("初始化模型工作池, 实例数量: {}", workers);
    let mut models = Vec::with_capacity(workers);
    for index in 1..workers {
      debug!("复制共享权重的模型实例 {}", index);
      let attached = primary.attach().map_err(PoolError::ModelInit)?;
      models.push(Arc::new(Mutex::new(attached)));
    }
    models.insert(0, Arc::new(Mutex::new(primary)));

    Ok(Self {
      models,
      dispatch: Mutex::new(0),
      pending: Mutex::new(VecDeque::new()),
      pool: ThreadPool::new(workers),
    })
  }

  /// 提交一个输入，按轮转顺序分派到模型实例，从不阻塞调用者。
  pub fn submit(&self, input: M::Input) {
    let model = Arc::clone(&self.models[self.next_model()]);
    let slot = self.pool.submit(move || {
      // 同一实例上的推理由实例锁串行化
      let guard = model.lock().expect("模型实例锁中毒");
      guard.infer(&input)
    });
    let mut pending = self.pending.lock().expect("结果队列锁中毒");
    pending.push_back(slot);
  }

  /// 取回最早一次提交的结果。
  ///
  /// 队列为空时返回 [`RetrieveError::Empty`]；否则阻塞直到该次
  /// 提交执行完成，即使后提交的任务已经先完成。
  pub fn retrieve(&self) -> Result<M::Output, RetrieveError<M::Error>> {
    let slot = {
      let mut pending = self.pending.lock().expect("结果队列锁中毒");
      pending.pop_front().ok_or(RetrieveError::Empty)?
    };
    match slot.wait() {
      Ok(Ok(output)) => Ok(output),
      Ok(Err(err)) => Err(RetrieveError::Infer(err)),
      Err(_) => Err(RetrieveError::Abandoned),
    }
  }

  pub fn worker_count(&self) -> usize {
    self.models.len()
  }

  /// 轮转计数器使用独立的锁，避免分派与取回互相排队。
  fn next_model(&self) -> usize {
    let mut id = self.dispatch.lock().expect("分派计数锁中毒");
    let index = (*id % self.models.len() as u64) as usize;
    *id += 1;
    index
  }
}

impl<M: Model> Drop for ModelPool<M> {
  fn drop(&mut self) {
    // 在释放模型实例之前同步排空所有未取回的结果，
    // 保证共享权重不会在推理进行中被释放
    let mut pending = self.pending.lock().expect("结果队列锁中毒");
    let outstanding = pending.len();
    if outstanding > 0 {
      debug!("排空 {} 个未取回的推理结果", outstanding);
    }
    while let Some(slot) = pending.pop_front() {
      let _ = slot.wait();
    }
  }
}
