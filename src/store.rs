// 该文件是 Shouwang （守望） 项目的一部分。
// src/store.rs - 已发布帧存储
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

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Local};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
  #[error("未知的流水线: {0}")]
  UnknownPipeline(String),
}

/// 最近一次发布的标注帧
#[derive(Debug, Clone)]
pub struct PublishedFrame {
  /// JPEG 编码数据
  pub bytes: Vec<u8>,
  /// 写入时间
  pub written_at: DateTime<Local>,
  /// 产生该帧的采样周期序号
  pub cycle: u64,
}

/// 单条流水线的帧槽
///
/// 写入时整体替换 `Arc`，读者拿到的要么是旧帧要么是新帧。
#[derive(Debug, Default)]
struct FrameSlot {
  frame: RwLock<Option<Arc<PublishedFrame>>>,
}

impl FrameSlot {
  fn publish(&self, frame: PublishedFrame) {
    let frame = Arc::new(frame);
    let mut slot = self.frame.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(frame);
  }

  fn read(&self) -> Option<Arc<PublishedFrame>> {
    self
      .frame
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }
}

/// 各流水线最近标注帧的存储，流水线集合在构造时确定
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
  slots: HashMap<String, Arc<FrameSlot>>,
}

impl FrameStore {
  pub fn new<I, S>(pipelines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      slots: pipelines
        .into_iter()
        .map(|name| (name.into(), Arc::new(FrameSlot::default())))
        .collect(),
    }
  }

  pub fn publish(
    &self,
    pipeline: &str,
    bytes: Vec<u8>,
    cycle: u64,
  ) -> Result<(), StoreError> {
    let slot = self
      .slots
      .get(pipeline)
      .ok_or_else(|| StoreError::UnknownPipeline(pipeline.to_string()))?;
    slot.publish(PublishedFrame {
      bytes,
      written_at: Local::now(),
      cycle,
    });
    Ok(())
  }

  /// 读取最近的帧；尚未发布过时返回 `None`
  pub fn read(&self, pipeline: &str) -> Option<Arc<PublishedFrame>> {
    self.slots.get(pipeline).and_then(|slot| slot.read())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn read_before_publish_is_none() {
    let store = FrameStore::new(["abnormal", "growth"]);
    assert!(store.read("abnormal").is_none());
    assert!(store.read("missing").is_none());
  }

  #[test]
  fn publish_replaces_whole_frame() {
    let store = FrameStore::new(["abnormal"]);
    store.publish("abnormal", vec![1, 2, 3], 1).unwrap();
    let first = store.read("abnormal").unwrap();

    store.publish("abnormal", vec![4, 5], 2).unwrap();
    let second = store.read("abnormal").unwrap();

    assert_eq!(first.bytes, vec![1, 2, 3]);
    assert_eq!(first.cycle, 1);
    assert_eq!(second.bytes, vec![4, 5]);
    assert_eq!(second.cycle, 2);
  }

  #[test]
  fn unknown_pipeline_is_rejected() {
    let store = FrameStore::new(["abnormal"]);
    assert_eq!(
      store.publish("growth", vec![0], 1),
      Err(StoreError::UnknownPipeline("growth".to_string()))
    );
  }

  #[test]
  fn concurrent_readers_see_complete_frames() {
    let store = FrameStore::new(["abnormal"]);
    let writer_store = store.clone();
    let writer = std::thread::spawn(move || {
      for i in 0..200u8 {
        writer_store
          .publish("abnormal", vec![i; 64], u64::from(i))
          .unwrap();
      }
    });

    for _ in 0..200 {
      if let Some(frame) = store.read("abnormal") {
        let first = frame.bytes[0];
        assert!(frame.bytes.iter().all(|b| *b == first));
        assert_eq!(u64::from(first), frame.cycle);
      }
    }
    writer.join().unwrap();
  }
}
