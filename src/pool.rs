// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/pool.rs - 并发调度
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

mod model_pool;
mod thread_pool;

pub use self::model_pool::{ModelPool, PoolError, RetrieveError};
pub use self::thread_pool::{TaskAbandoned, TaskHandle, ThreadPool};
