// 该文件是 Shuofeng （塞北朔风） 项目的一部分。
// src/model/labels.rs - 标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 类别标签表。
///
/// 从按行分隔的文本文件加载，一行一个类别名称，只加载一次。
/// 文件行数少于类别数量时，缺失的类别没有名称。
#[derive(Debug, Clone)]
pub struct LabelTable {
  names: Vec<String>,
}

impl LabelTable {
  /// 打开标签文件，读取至多 `max_labels` 行。
  pub fn open<P: AsRef<Path>>(path: P, max_labels: usize) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let names: Vec<String> = content
      .lines()
      .take(max_labels)
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect();
    if names.len() < max_labels {
      warn!("标签文件只有 {} 行, 期望 {} 行", names.len(), max_labels);
    }
    Ok(Self { names })
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_labels(lines: &[&str]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
      "shuofeng-labels-{}-{:?}.txt",
      std::process::id(),
      std::thread::current().id()
    ));
    std::fs::write(&path, lines.join("\n")).expect("写入临时标签文件失败");
    path
  }

  #[test]
  fn open_reads_one_name_per_line() {
    let path = write_labels(&["person", "bicycle", "car"]);
    let table = LabelTable::open(&path, 3).expect("打开标签文件失败");
    assert_eq!(table.len(), 3);
    assert_eq!(table.name(0), Some("person"));
    assert_eq!(table.name(2), Some("car"));
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn missing_lines_have_no_name() {
    let path = write_labels(&["person"]);
    let table = LabelTable::open(&path, 3).expect("打开标签文件失败");
    assert_eq!(table.name(0), Some("person"));
    assert_eq!(table.name(1), None);
    assert_eq!(table.name(2), None);
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn missing_file_is_an_error() {
    let result = LabelTable::open("/nonexistent/labels_list.txt", 3);
    assert!(matches!(result, Err(LabelError::Io(_))));
  }

  #[test]
  fn extra_lines_are_truncated() {
    let path = write_labels(&["a", "b", "c", "d"]);
    let table = LabelTable::open(&path, 2).expect("打开标签文件失败");
    assert_eq!(table.len(), 2);
    assert_eq!(table.name(2), None);
    let _ = std::fs::remove_file(path);
  }
}
