// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/slot_output.rs - 发布标注帧到帧槽
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

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  label::ClassTaxonomy,
  model::Detection,
  output::{
    Render,
    draw::{Draw, encode_jpeg},
  },
  store::{FrameStore, StoreError},
};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum SlotOutputError {
  #[error("图像编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
  #[error("帧存储错误: {0}")]
  StoreError(#[from] StoreError),
}

/// 在工作副本上绘制检测结果，编码为 JPEG 后整体替换所属流水线的帧
pub struct SlotOutput {
  draw: Draw,
  taxonomy: Arc<ClassTaxonomy>,
  store: FrameStore,
  pipeline: String,
  quality: u8,
}

impl SlotOutput {
  pub fn new(
    draw: Draw,
    taxonomy: Arc<ClassTaxonomy>,
    store: FrameStore,
    pipeline: impl Into<String>,
  ) -> Self {
    Self {
      draw,
      taxonomy,
      store,
      pipeline: pipeline.into(),
      quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn with_quality(mut self, quality: u8) -> Self {
    self.quality = quality;
    self
  }
}

impl Render for SlotOutput {
  type Error = SlotOutputError;

  fn render_result(
    &self,
    frame: &RgbImage,
    detections: &[Detection],
    cycle: u64,
  ) -> Result<(), Self::Error> {
    let mut image = frame.clone();
    self
      .draw
      .draw_detections(&mut image, detections, &self.taxonomy);
    let bytes = encode_jpeg(&image, self.quality)?;
    debug!("发布第 {} 周期标注帧, {} 字节", cycle, bytes.len());

    self.store.publish(&self.pipeline, bytes, cycle)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  use crate::label::ClassEntry;

  fn taxonomy() -> Arc<ClassTaxonomy> {
    Arc::new(
      ClassTaxonomy::new([ClassEntry {
        id: 0,
        name: "hole".to_string(),
        color: [255, 0, 0],
      }])
      .unwrap(),
    )
  }

  fn detections() -> Vec<Detection> {
    vec![Detection {
      label_id: 0,
      bbox: [2.0, 2.0, 20.0, 20.0],
      confidence: 0.8,
    }]
  }

  #[test]
  fn renders_into_own_pipeline() {
    let store = FrameStore::new(["abnormal", "growth"]);
    let output = SlotOutput::new(Draw::default(), taxonomy(), store.clone(), "abnormal");
    let frame = RgbImage::from_pixel(32, 24, Rgb([10, 20, 30]));

    output.render_result(&frame, &detections(), 3).unwrap();

    let published = store.read("abnormal").unwrap();
    assert_eq!(published.cycle, 3);
    let decoded = image::load_from_memory(&published.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));
    assert!(store.read("growth").is_none());
    // 原始帧不被修改
    assert_eq!(frame.get_pixel(2, 2), &Rgb([10, 20, 30]));
  }

  #[test]
  fn unregistered_pipeline_fails() {
    let store = FrameStore::new(["abnormal"]);
    let output = SlotOutput::new(Draw::default(), taxonomy(), store, "pest");
    let frame = RgbImage::new(8, 8);

    assert!(matches!(
      output.render_result(&frame, &[], 1),
      Err(SlotOutputError::StoreError(StoreError::UnknownPipeline(name))) if name == "pest"
    ));
  }
}
