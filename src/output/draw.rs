// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/draw.rs - 检测结果标注与 JPEG 编码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{ImageError, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::{label::ClassTaxonomy, model::Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 常见系统字体位置，未指定字体文件时依次尝试
const SYSTEM_FONT_CANDIDATES: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
}

/// 检测结果绘制器
///
/// 没有可用字体时只绘制边框和标签底色。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载字体: {}", path.as_ref().display());
    Ok(Self::new(Some(font)))
  }

  /// 在常见系统字体位置中查找字体
  pub fn with_system_font() -> Self {
    for candidate in SYSTEM_FONT_CANDIDATES {
      if Path::new(candidate).exists()
        && let Ok(draw) = Self::from_font_file(candidate)
      {
        return draw;
      }
    }
    warn!("未找到可用字体, 标注将不包含文字");
    Self::default()
  }

  /// 在图像上绘制所有检测框与标签
  pub fn draw_detections(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    taxonomy: &ClassTaxonomy,
  ) {
    for detection in detections {
      let color = Rgb(taxonomy.color(detection.label_id));
      let label = format!(
        "{} {:.2}",
        taxonomy.name(detection.label_id),
        detection.confidence
      );
      self.draw_bbox_with_label(image, &detection.bbox, &label, color);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框加粗
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let (text_width, text_height) = match &self.font {
      Some(font) => {
        let (tw, th) = text_size(self.font_scale, font, label);
        (tw as i32, th as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING)
      }
      None => (
        (label.len() as f32 * LABEL_FONT_SIZE * 0.55) as i32,
        LABEL_FONT_SIZE as i32,
      ),
    };

    // 标签放在边框上方，空间不足时贴住图像顶部
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x);
    let label_height = text_height.min(h - label_y);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        self.font_scale,
        font,
        label,
      );
    }
  }
}

/// 将 RGB 图像编码为 JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
  let mut buffer = Vec::with_capacity((image.width() * image.height()) as usize / 4);
  JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
  Ok(buffer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::{ClassEntry, ClassTaxonomy, UNKNOWN_COLOR};

  fn taxonomy() -> ClassTaxonomy {
    ClassTaxonomy::new([ClassEntry {
      id: 0,
      name: "hole".to_string(),
      color: [255, 0, 0],
    }])
    .unwrap()
  }

  #[test]
  fn draws_box_in_class_color() {
    let mut image = RgbImage::new(64, 64);
    let detections = [Detection {
      label_id: 0,
      bbox: [20.0, 30.0, 50.0, 60.0],
      confidence: 0.9,
    }];
    Draw::default().draw_detections(&mut image, &detections, &taxonomy());

    assert_eq!(image.get_pixel(20, 45), &Rgb([255, 0, 0]));
    assert_eq!(image.get_pixel(21, 45), &Rgb([255, 0, 0]));
    assert_eq!(image.get_pixel(35, 45), &Rgb([0, 0, 0]));
  }

  #[test]
  fn unknown_label_uses_fallback_color() {
    let mut image = RgbImage::new(64, 64);
    let detections = [Detection {
      label_id: 42,
      bbox: [10.0, 30.0, 40.0, 50.0],
      confidence: 0.5,
    }];
    Draw::default().draw_detections(&mut image, &detections, &taxonomy());
    assert_eq!(image.get_pixel(10, 40), &Rgb(UNKNOWN_COLOR));
  }

  #[test]
  fn degenerate_boxes_are_ignored() {
    let mut image = RgbImage::new(16, 16);
    let detections = [
      Detection {
        label_id: 0,
        bbox: [10.0, 10.0, 10.0, 10.0],
        confidence: 0.5,
      },
      Detection {
        label_id: 0,
        bbox: [-50.0, -50.0, -10.0, -10.0],
        confidence: 0.5,
      },
    ];
    Draw::default().draw_detections(&mut image, &detections, &taxonomy());
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn encoded_jpeg_decodes() {
    let image = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
    let bytes = encode_jpeg(&image, 85).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));
  }
}
