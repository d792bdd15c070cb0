// 该文件是 Shouwang （守望） 项目的一部分。
// src/input/read_image_file.rs - 静态图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, InputError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 将一张静态图像当作摄像头
///
/// 每次 `retrieve` 都返回同一帧的副本，用于调试与演示。
/// 形如 `image:///path/to/frame.jpg`。
pub struct ImageFileInput {
  image: RgbImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    let image: RgbImage = ImageReader::open(path)?.decode()?.into();
    info!("打开图像文件 {} ({}x{})", path, image.width(), image.height());

    Ok(Self { image })
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbImage) -> Self {
    Self { image }
  }
}

impl FrameSource for ImageFileInput {
  fn grab(&mut self) -> Result<(), InputError> {
    Ok(())
  }

  fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
    Ok(Some(self.image.clone()))
  }
}
