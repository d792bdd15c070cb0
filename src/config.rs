// 该文件是 Shouwang （守望） 项目的一部分。
// src/config.rs - 配置文件
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

use std::{collections::HashSet, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{
  label::{ClassEntry, ClassTaxonomy, LabelError},
  output::DEFAULT_JPEG_QUALITY,
  pipeline::PipelineConfig,
  status::StatusTiming,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("流水线 {pipeline} 类别配置错误: {source}")]
  LabelError {
    pipeline: String,
    #[source]
    source: LabelError,
  },
  #[error("未配置任何流水线")]
  NoPipeline,
  #[error("流水线名称重复: {0}")]
  DuplicatePipeline(String),
  #[error("流水线 {0} 的采样间隔必须大于 0")]
  ZeroInterval(String),
  #[error("流水线 {pipeline} 的 {field} 必须是非负有限数")]
  InvalidDuration { pipeline: String, field: &'static str },
}

/// 顶层配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerConfig,
  pub camera: CameraConfig,
  #[serde(default)]
  pub annotation: AnnotationConfig,
  #[serde(rename = "pipeline")]
  pub pipelines: Vec<PipelineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".to_string(),
      port: 5000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
  pub url: Url,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
  /// 标签字体，缺省时查找系统字体
  pub font: Option<String>,
  pub jpeg_quality: u8,
}

impl Default for AnnotationConfig {
  fn default() -> Self {
    Self {
      font: None,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

/// 单条流水线配置项
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineEntry {
  pub name: String,
  pub detector: Url,
  #[serde(default = "default_interval_ms")]
  pub interval_ms: u64,
  #[serde(default = "default_true")]
  pub debounce: bool,
  #[serde(default = "default_tracking_time_limit_secs")]
  pub tracking_time_limit_secs: f64,
  #[serde(default = "default_notification_threshold_secs")]
  pub notification_threshold_secs: f64,
  #[serde(default = "default_notification_interval_secs")]
  pub notification_interval_secs: f64,
  #[serde(default = "default_freeze_secs")]
  pub freeze_secs: f64,
  pub classes: Vec<ClassEntry>,
}

fn default_interval_ms() -> u64 {
  2000
}

fn default_true() -> bool {
  true
}

fn default_tracking_time_limit_secs() -> f64 {
  5.0
}

fn default_notification_threshold_secs() -> f64 {
  5.0
}

fn default_notification_interval_secs() -> f64 {
  5.0 * 60.0 * 60.0
}

fn default_freeze_secs() -> f64 {
  100.0
}

fn seconds(value: f64) -> Duration {
  Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl PipelineEntry {
  pub fn timing(&self) -> StatusTiming {
    StatusTiming {
      tracking_time_limit: seconds(self.tracking_time_limit_secs),
      notification_threshold: seconds(self.notification_threshold_secs),
      notification_interval: seconds(self.notification_interval_secs),
      freeze_duration: seconds(self.freeze_secs),
    }
  }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      name: self.name.clone(),
      interval: Duration::from_millis(self.interval_ms),
      debounce: self.debounce,
      timing: self.timing(),
    }
  }

  pub fn taxonomy(&self) -> Result<ClassTaxonomy, ConfigError> {
    ClassTaxonomy::new(self.classes.iter().cloned()).map_err(|source| ConfigError::LabelError {
      pipeline: self.name.clone(),
      source,
    })
  }
}

impl AppConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.pipelines.is_empty() {
      return Err(ConfigError::NoPipeline);
    }
    let mut names = HashSet::new();
    for entry in &self.pipelines {
      if !names.insert(entry.name.as_str()) {
        return Err(ConfigError::DuplicatePipeline(entry.name.clone()));
      }
      if entry.interval_ms == 0 {
        return Err(ConfigError::ZeroInterval(entry.name.clone()));
      }
      for (field, value) in [
        ("tracking_time_limit_secs", entry.tracking_time_limit_secs),
        ("notification_threshold_secs", entry.notification_threshold_secs),
        ("notification_interval_secs", entry.notification_interval_secs),
        ("freeze_secs", entry.freeze_secs),
      ] {
        if !value.is_finite() || value < 0.0 {
          return Err(ConfigError::InvalidDuration {
            pipeline: entry.name.clone(),
            field,
          });
        }
      }
      entry.taxonomy()?;
    }
    Ok(())
  }
}
