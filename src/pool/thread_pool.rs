// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/pool/thread_pool.rs - 弹性线程池
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

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

/// 空闲工作线程的默认退休等待窗口。
const IDLE_WAIT: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 任务在执行前被线程池丢弃。
///
/// 只会在线程池关闭时发生：已入队但尚未被任何线程取走的任务
/// 不会再被执行，对应的 [`TaskHandle::wait`] 返回该错误。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("任务在执行前被线程池丢弃")]
pub struct TaskAbandoned;

/// 单次提交的结果槽。
///
/// 按值消费：结果只能取回一次。`wait` 阻塞直到对应任务执行完成，
/// 与其他任务的完成顺序无关。
pub struct TaskHandle<R> {
  rx: mpsc::Receiver<R>,
}

impl<R> TaskHandle<R> {
  pub fn wait(self) -> Result<R, TaskAbandoned> {
    self.rx.recv().map_err(|_| TaskAbandoned)
  }
}

struct PoolState {
  quit: bool,
  current_threads: usize,
  idle_threads: usize,
  tasks: VecDeque<Job>,
  // 已退休待 join 的线程，由下一个持有池锁的线程代为 join，
  // 线程不允许 join 自己。
  finished: VecDeque<ThreadId>,
  threads: HashMap<ThreadId, JoinHandle<()>>,
}

struct PoolShared {
  state: Mutex<PoolState>,
  cv: Condvar,
  idle_wait: Duration,
}

/// 弹性线程池。
///
/// 工作线程在首次提交时按需创建，数量不超过上限；
/// 空闲超过等待窗口的线程自行退休，线程数量随负载回落。
pub struct ThreadPool {
  max_threads: usize,
  shared: Arc<PoolShared>,
}

impl ThreadPool {
  pub fn new(max_threads: usize) -> Self {
    Self::with_idle_timeout(max_threads, IDLE_WAIT)
  }

  pub fn with_idle_timeout(max_threads: usize, idle_wait: Duration) -> Self {
    Self {
      max_threads,
      shared: Arc::new(PoolShared {
        state: Mutex::new(PoolState {
          quit: false,
          current_threads: 0,
          idle_threads: 0,
          tasks: VecDeque::new(),
          finished: VecDeque::new(),
          threads: HashMap::new(),
        }),
        cv: Condvar::new(),
        idle_wait,
      }),
    }
  }

  /// 提交一个任务，立即返回结果槽，从不阻塞调用者。
  ///
  /// 有空闲线程时唤醒一个；没有且线程数未达上限时新建一个；
  /// 否则任务留在队列中等待线程空闲。
  pub fn submit<F, R>(&self, f: F) -> TaskHandle<R>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let (tx, rx) = mpsc::channel();
    let job: Job = Box::new(move || {
      // 结果槽被丢弃时发送失败，任务本身照常执行完毕
      let _ = tx.send(f());
    });

    let mut state = self.shared.state.lock().expect("线程池状态锁中毒");
    debug_assert!(!state.quit);
    Self::join_finished(&mut state);
    state.tasks.push_back(job);

    if state.idle_threads > 0 {
      self.shared.cv.notify_one();
    } else if state.current_threads < self.max_threads {
      Self::spawn_worker(&self.shared, &mut state);
    }

    TaskHandle { rx }
  }

  /// 当前已创建（不一定在忙）的线程数量，用于诊断。
  pub fn thread_count(&self) -> usize {
    let state = self.shared.state.lock().expect("线程池状态锁中毒");
    state.current_threads
  }

  fn spawn_worker(shared: &Arc<PoolShared>, state: &mut PoolState) {
    let cloned = Arc::clone(shared);
    let handle = thread::spawn(move || Self::worker_loop(cloned));
    let id = handle.thread().id();
    trace!("创建工作线程 {:?}", id);
    state.threads.insert(id, handle);
    state.current_threads += 1;
  }

  fn worker_loop(shared: Arc<PoolShared>) {
    loop {
      let job = {
        let mut state = shared.state.lock().expect("线程池状态锁中毒");
        state.idle_threads += 1;
        let (guard, timeout) = shared
          .cv
          .wait_timeout_while(state, shared.idle_wait, |s| !s.quit && s.tasks.is_empty())
          .expect("线程池状态锁中毒");
        state = guard;
        state.idle_threads -= 1;

        // 收到退出请求就立即离开，队列里未开始的任务被放弃
        if state.quit {
          state.current_threads -= 1;
          return;
        }

        if state.tasks.is_empty() {
          if timeout.timed_out() {
            // 空闲超时，自行退休；自己的 join 留给下一个持锁线程
            state.current_threads -= 1;
            Self::join_finished(&mut state);
            state.finished.push_back(thread::current().id());
            trace!("工作线程 {:?} 空闲退休", thread::current().id());
            return;
          }
          continue;
        }

        match state.tasks.pop_front() {
          Some(job) => job,
          None => continue,
        }
      };
      job();
    }
  }

  fn join_finished(state: &mut PoolState) {
    while let Some(id) = state.finished.pop_front() {
      if let Some(handle) = state.threads.remove(&id) {
        let _ = handle.join();
      }
    }
  }
}

impl Drop for ThreadPool {
  fn drop(&mut self) {
    let handles: Vec<JoinHandle<()>> = {
      let mut state = self.shared.state.lock().expect("线程池状态锁中毒");
      state.quit = true;
      state.finished.clear();
      state.threads.drain().map(|(_, handle)| handle).collect()
    };
    debug!("线程池关闭, 等待 {} 个线程退出", handles.len());
    self.shared.cv.notify_all();
    for handle in handles {
      let _ = handle.join();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
  }

  #[test]
  fn submit_returns_task_result() {
    init_tracing();
    let pool = ThreadPool::new(2);
    let handle = pool.submit(|| 40 + 2);
    assert_eq!(handle.wait(), Ok(42));
  }

  #[test]
  fn handles_resolve_in_wait_order_despite_latency() {
    init_tracing();
    let pool = ThreadPool::new(4);
    let handles: Vec<_> = (0..4u64)
      .map(|i| {
        pool.submit(move || {
          thread::sleep(Duration::from_millis((4 - i) * 30));
          i
        })
      })
      .collect();
    let results: Vec<u64> = handles
      .into_iter()
      .map(|h| h.wait().expect("任务被放弃"))
      .collect();
    assert_eq!(results, vec![0, 1, 2, 3]);
  }

  #[test]
  fn spawns_at_most_max_threads() {
    init_tracing();
    let started = std::time::Instant::now();
    let pool = ThreadPool::new(2);
    let handles: Vec<_> = (0..5usize)
      .map(|i| {
        pool.submit(move || {
          thread::sleep(Duration::from_millis(100));
          i
        })
      })
      .collect();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(pool.thread_count(), 2);
    for (i, handle) in handles.into_iter().enumerate() {
      assert_eq!(handle.wait(), Ok(i));
    }
    // 两个线程跑五个 100ms 的任务至少需要三轮
    assert!(started.elapsed() >= Duration::from_millis(290));
    assert_eq!(pool.thread_count(), 2);
  }

  #[test]
  fn idle_threads_retire_to_zero() {
    init_tracing();
    let pool = ThreadPool::with_idle_timeout(3, Duration::from_millis(80));
    let handles: Vec<_> = (0..3)
      .map(|i| {
        pool.submit(move || {
          thread::sleep(Duration::from_millis(40));
          i
        })
      })
      .collect();
    for handle in handles {
      handle.wait().expect("任务被放弃");
    }
    assert!(pool.thread_count() >= 1);
    // 等待超过空闲窗口，所有线程应已退休
    thread::sleep(Duration::from_millis(400));
    assert_eq!(pool.thread_count(), 0);
  }

  #[test]
  fn idle_thread_is_reused_instead_of_spawning() {
    init_tracing();
    let pool = ThreadPool::new(4);
    pool.submit(|| ()).wait().expect("任务被放弃");
    assert_eq!(pool.thread_count(), 1);
    // 结果先于线程回到等待状态送达，稍等让线程真正空闲下来
    thread::sleep(Duration::from_millis(50));
    pool.submit(|| ()).wait().expect("任务被放弃");
    assert_eq!(pool.thread_count(), 1);
  }

  #[test]
  fn pool_grows_again_after_retirement() {
    init_tracing();
    let pool = ThreadPool::with_idle_timeout(2, Duration::from_millis(60));
    pool.submit(|| ()).wait().expect("任务被放弃");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.thread_count(), 0);
    assert_eq!(pool.submit(|| 7).wait(), Ok(7));
    assert_eq!(pool.thread_count(), 1);
  }

  #[test]
  fn shutdown_abandons_queued_tasks_but_joins_threads() {
    init_tracing();
    let ran = Arc::new(AtomicUsize::new(0));
    let (started_tx, started_rx) = mpsc::channel();
    let pool = ThreadPool::new(1);
    let first = {
      let ran = Arc::clone(&ran);
      pool.submit(move || {
        started_tx.send(()).expect("通知任务启动失败");
        thread::sleep(Duration::from_millis(200));
        ran.fetch_add(1, Ordering::SeqCst);
        1
      })
    };
    let second = {
      let ran = Arc::clone(&ran);
      pool.submit(move || {
        ran.fetch_add(1, Ordering::SeqCst);
        2
      })
    };
    // 等第一个任务开始执行：唯一的线程被占住，第二个任务尚未出队
    started_rx.recv().expect("等待任务启动失败");
    drop(pool);
    assert_eq!(first.wait(), Ok(1));
    assert_eq!(second.wait(), Err(TaskAbandoned));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
  }
}
