// 该文件是 Shouwang （守望） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;

use crate::model::Detection;

/// 将一帧的检测结果渲染到某个输出
pub trait Render {
  type Error: std::error::Error + Send + Sync + 'static;

  fn render_result(
    &self,
    frame: &RgbImage,
    detections: &[Detection],
    cycle: u64,
  ) -> Result<(), Self::Error>;
}

pub mod draw;

mod slot_output;
pub use self::slot_output::{DEFAULT_JPEG_QUALITY, SlotOutput, SlotOutputError};
