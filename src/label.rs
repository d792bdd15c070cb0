// 该文件是 Shouwang （守望） 项目的一部分。
// src/label.rs - 类别表与计数
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

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

/// 未知类别的显示名称
pub const UNKNOWN_LABEL: &str = "Unknown";
/// 未知类别的显示颜色（白色）
pub const UNKNOWN_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
  #[error("类别表为空")]
  Empty,
  #[error("类别 ID 重复: {0}")]
  DuplicateId(u32),
  #[error("类别名称重复: {0}")]
  DuplicateName(String),
}

/// 单个类别的显示信息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassEntry {
  pub id: u32,
  pub name: String,
  #[serde(default = "default_color")]
  pub color: [u8; 3],
}

fn default_color() -> [u8; 3] {
  UNKNOWN_COLOR
}

/// 类别表：标签 ID 到显示名称和颜色的映射，构造后不可变
#[derive(Debug, Clone)]
pub struct ClassTaxonomy {
  entries: BTreeMap<u32, ClassEntry>,
}

impl ClassTaxonomy {
  pub fn new(entries: impl IntoIterator<Item = ClassEntry>) -> Result<Self, LabelError> {
    let mut map = BTreeMap::new();
    for entry in entries {
      if map.values().any(|e: &ClassEntry| e.name == entry.name) {
        return Err(LabelError::DuplicateName(entry.name));
      }
      if map.contains_key(&entry.id) {
        return Err(LabelError::DuplicateId(entry.id));
      }
      map.insert(entry.id, entry);
    }

    if map.is_empty() {
      return Err(LabelError::Empty);
    }

    Ok(Self { entries: map })
  }

  /// 查询显示名称，未配置的 ID 返回 "Unknown"
  pub fn name(&self, id: u32) -> &str {
    self
      .entries
      .get(&id)
      .map(|e| e.name.as_str())
      .unwrap_or(UNKNOWN_LABEL)
  }

  /// 查询显示颜色，未配置的 ID 返回白色
  pub fn color(&self, id: u32) -> [u8; 3] {
    self
      .entries
      .get(&id)
      .map(|e| e.color)
      .unwrap_or(UNKNOWN_COLOR)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ClassEntry> {
    self.entries.values()
  }

  /// 按类别表生成全零计数
  pub fn zero_counts(&self) -> ClassCounts {
    ClassCounts {
      counts: self.entries.keys().map(|id| (*id, 0)).collect(),
    }
  }
}

/// 单次采样中各类别的检测数量
///
/// 每个周期都从 [`ClassTaxonomy::zero_counts`] 重新构造，不与上一周期合并。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts {
  counts: BTreeMap<u32, u32>,
}

impl ClassCounts {
  /// 为已配置的类别计数，未配置的 ID 返回 false 且不计入
  pub fn increment(&mut self, id: u32) -> bool {
    match self.counts.get_mut(&id) {
      Some(count) => {
        *count += 1;
        true
      }
      None => false,
    }
  }

  pub fn get(&self, id: u32) -> u32 {
    self.counts.get(&id).copied().unwrap_or(0)
  }

  pub fn any_detected(&self) -> bool {
    self.counts.values().any(|c| *c > 0)
  }

  pub fn total(&self) -> u32 {
    self.counts.values().sum()
  }

  /// 转为 名称 -> 数量 的映射，包含每个已配置的类别
  pub fn by_name(&self, taxonomy: &ClassTaxonomy) -> BTreeMap<String, u32> {
    taxonomy
      .iter()
      .map(|entry| (entry.name.clone(), self.get(entry.id)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn taxonomy() -> ClassTaxonomy {
    ClassTaxonomy::new([
      ClassEntry {
        id: 0,
        name: "hole".to_string(),
        color: [255, 0, 0],
      },
      ClassEntry {
        id: 1,
        name: "wither".to_string(),
        color: [127, 255, 212],
      },
    ])
    .unwrap()
  }

  #[test]
  fn unknown_id_falls_back() {
    let taxonomy = taxonomy();
    assert_eq!(taxonomy.name(0), "hole");
    assert_eq!(taxonomy.name(7), UNKNOWN_LABEL);
    assert_eq!(taxonomy.color(7), UNKNOWN_COLOR);
    assert_eq!(taxonomy.color(1), [127, 255, 212]);
  }

  #[test]
  fn zero_counts_cover_every_class() {
    let taxonomy = taxonomy();
    let mut counts = taxonomy.zero_counts();
    assert!(!counts.any_detected());
    assert!(counts.increment(1));
    assert!(!counts.increment(9));
    assert_eq!(counts.total(), 1);

    let named = counts.by_name(&taxonomy);
    assert_eq!(named.get("hole"), Some(&0));
    assert_eq!(named.get("wither"), Some(&1));
    assert_eq!(named.len(), 2);
  }

  #[test]
  fn rejects_duplicates_and_empty() {
    let dup = ClassTaxonomy::new([
      ClassEntry {
        id: 0,
        name: "a".to_string(),
        color: [0, 0, 0],
      },
      ClassEntry {
        id: 0,
        name: "b".to_string(),
        color: [0, 0, 0],
      },
    ]);
    assert_eq!(dup.unwrap_err(), LabelError::DuplicateId(0));
    assert_eq!(ClassTaxonomy::new([]).unwrap_err(), LabelError::Empty);
  }
}
