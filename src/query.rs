// 该文件是 Shouwang （守望） 项目的一部分。
// src/query.rs - 状态查询接口
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

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  pipeline::PipelineShared,
  store::{FrameStore, PublishedFrame},
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
  #[error("Unknown pipeline: {0}")]
  UnknownPipeline(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
  pub detected: bool,
  pub tracking: bool,
  pub time_since_detection: f64,
  pub should_notify: bool,
  pub class_counts: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusWithTime {
  pub detected: bool,
  pub tracking: bool,
  pub time_since_detection: f64,
  pub detection_timestamp: Option<String>,
  pub last_update: String,
  pub should_notify: bool,
}

/// 所有流水线的查询入口
///
/// 只持有共享状态的只读引用，唯一的写操作是 [`Monitor::reset_status`]。
#[derive(Debug, Clone, Default)]
pub struct Monitor {
  pipelines: BTreeMap<String, Arc<PipelineShared>>,
  frames: FrameStore,
}

impl Monitor {
  pub fn new(frames: FrameStore) -> Self {
    Self {
      pipelines: BTreeMap::new(),
      frames,
    }
  }

  pub fn register(&mut self, shared: Arc<PipelineShared>) {
    self.pipelines.insert(shared.name().to_string(), shared);
  }

  pub fn pipelines(&self) -> Vec<String> {
    self.pipelines.keys().cloned().collect()
  }

  fn pipeline(&self, name: &str) -> Result<&Arc<PipelineShared>, QueryError> {
    self
      .pipelines
      .get(name)
      .ok_or_else(|| QueryError::UnknownPipeline(name.to_string()))
  }

  pub fn status(&self, name: &str) -> Result<StatusSnapshot, QueryError> {
    self.status_at(name, Instant::now())
  }

  pub fn status_at(&self, name: &str, now: Instant) -> Result<StatusSnapshot, QueryError> {
    let reading = self.pipeline(name)?.read(now);
    let evaluation = reading.evaluation;
    Ok(StatusSnapshot {
      detected: evaluation.detected,
      tracking: evaluation.tracking,
      time_since_detection: evaluation.time_since_detection,
      should_notify: evaluation.should_notify,
      class_counts: reading.class_counts,
    })
  }

  pub fn status_with_time(&self, name: &str) -> Result<StatusWithTime, QueryError> {
    self.status_with_time_at(name, Instant::now())
  }

  pub fn status_with_time_at(
    &self,
    name: &str,
    now: Instant,
  ) -> Result<StatusWithTime, QueryError> {
    let evaluation = self.pipeline(name)?.read(now).evaluation;
    Ok(StatusWithTime {
      detected: evaluation.detected,
      tracking: evaluation.tracking,
      time_since_detection: evaluation.time_since_detection,
      detection_timestamp: evaluation
        .detected_since
        .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
      last_update: evaluation
        .last_changed_at
        .format(TIMESTAMP_FORMAT)
        .to_string(),
      should_notify: evaluation.should_notify,
    })
  }

  pub fn class_counts(&self, name: &str) -> Result<BTreeMap<String, u32>, QueryError> {
    Ok(self.pipeline(name)?.class_counts())
  }

  /// 最近发布的标注帧，尚未发布时为 `None`
  pub fn image(&self, name: &str) -> Result<Option<Arc<PublishedFrame>>, QueryError> {
    self.pipeline(name)?;
    Ok(self.frames.read(name))
  }

  pub fn reset_status(&self, name: &str) -> Result<bool, QueryError> {
    self.reset_status_at(name, Instant::now())
  }

  pub fn reset_status_at(&self, name: &str, now: Instant) -> Result<bool, QueryError> {
    let active = self.pipeline(name)?.reset(now);
    info!("[{}] 状态已手动重置", name);
    Ok(active)
  }
}
