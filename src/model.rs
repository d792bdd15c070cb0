// 该文件是 Shouwang （守望） 项目的一部分。
// src/model.rs - 检测器
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

use image::RgbImage;
use serde::Deserialize;

/// 目标检测器
///
/// 输入一帧图像，输出该帧的检测结果。检测器本身是外部协作者，
/// 流水线只依赖这个接口。
pub trait Detector: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: Detector + Sync> Detector for std::sync::Arc<D> {
  type Error = D::Error;

  fn infer(&self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(frame)
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
  pub label_id: u32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  pub confidence: f32,
}

mod remote;
pub use self::remote::{RemoteDetector, RemoteDetectorError};
